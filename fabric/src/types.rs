//! Wire-level types shared by fabric providers and their consumers.

use bitflags::bitflags;

bitflags! {
    /// Memory access flags for region registration.
    ///
    /// Local read access is always enabled. `REMOTE_WRITE` requires
    /// `LOCAL_WRITE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        /// Enable local write access.
        const LOCAL_WRITE = 1 << 0;

        /// Enable remote write access (inbound one-sided puts).
        const REMOTE_WRITE = 1 << 1;

        /// Enable remote read access.
        const REMOTE_READ = 1 << 2;
    }
}

/// Network address of a NIC, resolved when the NIC is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct NicAddress(pub u32);

/// Exchangeable memory-region descriptor: base address plus protection
/// handle. A copy of every peer's receive-region descriptor is held locally
/// after the all-to-all exchange, indexed by peer rank.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RegionDesc {
    /// Base virtual address of the registered buffer.
    pub addr: u64,
    /// Protection handle returned by registration.
    pub handle: u64,
}

pub const REGION_DESC_SIZE: usize = std::mem::size_of::<RegionDesc>();

impl RegionDesc {
    pub fn to_bytes(self) -> Vec<u8> {
        let ptr = &self as *const Self as *const u8;
        unsafe { std::slice::from_raw_parts(ptr, REGION_DESC_SIZE).to_vec() }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert!(bytes.len() >= REGION_DESC_SIZE);
        let mut desc = Self::default();
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                &mut desc as *mut Self as *mut u8,
                REGION_DESC_SIZE,
            );
        }
        desc
    }
}

/// Which completion queue an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CqKind {
    /// Local completion of a posted put.
    Source,
    /// Data arrival in a local registered region.
    Destination,
}

/// A completion event drained from a queue.
///
/// Source events carry the instance id the endpoint was bound with (the
/// target peer); destination events carry the initiator's instance id.
#[derive(Debug, Clone, Copy)]
pub struct CompletionEvent {
    pub kind: CqKind,
    /// Peer instance id this event refers to.
    pub peer: usize,
    /// Post sequence of the operation on its endpoint (backreference).
    pub op: u64,
}

/// Outcome of one non-blocking completion-queue poll.
#[derive(Debug, Clone, Copy)]
pub enum CqPoll {
    /// An event was drained.
    Event(CompletionEvent),
    /// No event is ready yet.
    NotDone,
    /// The queue had no free slot when an event arrived; the event was lost.
    Overrun,
    /// Unrecoverable local queue error.
    Error,
}

/// Non-blocking completion-queue poll interface.
///
/// The fabric exposes no blocking wait primitive; all synchronization above
/// this seam is bounded busy-polling with backoff.
pub trait PollCq {
    fn poll_cq(&self, kind: CqKind) -> CqPoll;
}

/// One-sided put request. One descriptor is built per window per hop;
/// descriptors are scratch records mutated per submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutDescriptor {
    /// Address of the sending buffer slice.
    pub local_addr: u64,
    /// Protection handle of the local region containing `local_addr`.
    pub local_handle: u64,
    /// Address inside the peer's registered region.
    pub remote_addr: u64,
    /// Protection handle of the peer's region.
    pub remote_handle: u64,
    /// Transfer length in bytes.
    pub length: usize,
    /// Also raise a destination-side arrival event at the peer.
    pub remote_event: bool,
    /// Ordering hint: do not start this put before prior puts on the same
    /// endpoint have completed.
    pub fenced: bool,
}
