//! Process-group runtime services.
//!
//! The benchmark needs four things from its launcher: rank/size, an ordered
//! all-to-all exchange of fixed-size payloads, a barrier, and a max
//! reduction for worst-case latency. [`ProcessGroup`] is that seam.
//!
//! [`ThreadGroup`] is the provided implementation: one rank per thread of a
//! single process. A PMI- or MPI-backed implementation is a drop-in; its
//! construction is the fallible step, so a failed rank/size query aborts
//! the job before any component runs.

use std::sync::{Arc, Barrier, Mutex};

/// Collective services every rank of the job can rely on.
///
/// All operations are collective: every rank must call them in the same
/// order, SPMD style.
pub trait ProcessGroup {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Stable all-to-all exchange. Every rank contributes `local`; index `r`
    /// of the result holds rank `r`'s bytes on every rank, regardless of
    /// arrival order.
    fn exchange(&self, local: &[u8]) -> Vec<Vec<u8>>;

    /// Block until every rank has entered the barrier.
    fn barrier(&self);

    /// Maximum of `value` across all ranks, returned to every rank.
    fn max_f64(&self, value: f64) -> f64;
}

struct GroupShared {
    size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Vec<u8>>>,
    values: Mutex<Vec<f64>>,
}

/// One rank per thread of a single process.
pub struct ThreadGroup {
    shared: Arc<GroupShared>,
    rank: usize,
}

impl ThreadGroup {
    /// Create a group of `size` ranks. Hand each handle to its own thread.
    ///
    /// # Panics
    /// Panics if `size` is 0.
    pub fn create(size: usize) -> Vec<ThreadGroup> {
        assert!(size > 0, "group must have at least one rank");
        let shared = Arc::new(GroupShared {
            size,
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
            values: Mutex::new(vec![0.0; size]),
        });
        (0..size)
            .map(|rank| ThreadGroup {
                shared: shared.clone(),
                rank,
            })
            .collect()
    }
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn exchange(&self, local: &[u8]) -> Vec<Vec<u8>> {
        self.shared.slots.lock().unwrap()[self.rank] = local.to_vec();
        // First wait: every slot is written. Second wait: every rank has
        // read, so the next collective may overwrite.
        self.shared.barrier.wait();
        let gathered = self.shared.slots.lock().unwrap().clone();
        self.shared.barrier.wait();
        gathered
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn max_f64(&self, value: f64) -> f64 {
        self.shared.values.lock().unwrap()[self.rank] = value;
        self.shared.barrier.wait();
        let max = self
            .shared
            .values
            .lock()
            .unwrap()
            .iter()
            .copied()
            .fold(f64::MIN, f64::max);
        self.shared.barrier.wait();
        max
    }
}
