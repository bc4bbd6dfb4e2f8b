//! In-process fabric provider.
//!
//! Every node of a [`SimFabric`] lives on its own thread of one process, so
//! a one-sided put is a direct memory copy into the target's registered
//! buffer followed by event delivery into bounded completion queues. What
//! the provider preserves from the hardware model:
//!
//! - registration is mandatory; a put addressing memory outside a registered
//!   region (or a region without `REMOTE_WRITE`) fails at post time,
//! - source and destination queues are bounded and drop events on overflow,
//!   reporting the overrun on the next poll,
//! - an endpoint refuses to unbind while puts posted on it have not been
//!   drained from the source queue.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::types::{
    AccessFlags, CompletionEvent, CqKind, CqPoll, NicAddress, PollCq, PutDescriptor, RegionDesc,
};

/// Base of the synthetic NIC address space.
const ADDR_BASE: u32 = 0xA000_0000;

/// Completion-queue capacities for a fabric.
#[derive(Debug, Clone, Copy)]
pub struct SimFabricConfig {
    /// Source queue slots per node.
    pub source_cq_entries: usize,
    /// Destination queue slots per node.
    pub dest_cq_entries: usize,
}

impl Default for SimFabricConfig {
    fn default() -> Self {
        Self {
            source_cq_entries: 4096,
            dest_cq_entries: 4096,
        }
    }
}

/// Bounded event queue. An event arriving with no free slot is dropped and
/// the loss is reported once by the next poll.
struct CqState {
    events: VecDeque<(CompletionEvent, Option<Arc<AtomicI64>>)>,
    capacity: usize,
    overrun: bool,
}

impl CqState {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            overrun: false,
        }
    }

    fn push(&mut self, event: CompletionEvent, outstanding: Option<Arc<AtomicI64>>) {
        if self.events.len() >= self.capacity {
            self.overrun = true;
        } else {
            self.events.push_back((event, outstanding));
        }
    }

    fn poll(&mut self) -> CqPoll {
        if self.overrun {
            self.overrun = false;
            return CqPoll::Overrun;
        }
        match self.events.pop_front() {
            Some((event, outstanding)) => {
                if let Some(counter) = outstanding {
                    counter.fetch_sub(1, Ordering::AcqRel);
                }
                CqPoll::Event(event)
            }
            None => CqPoll::NotDone,
        }
    }
}

struct RegionEntry {
    addr: u64,
    len: usize,
    access: AccessFlags,
}

struct NodeState {
    source_cq: Mutex<CqState>,
    dest_cq: Mutex<CqState>,
    regions: Mutex<HashMap<u64, RegionEntry>>,
    next_handle: AtomicU64,
}

struct Shared {
    nodes: Vec<NodeState>,
}

impl Shared {
    fn node(&self, id: usize) -> &NodeState {
        &self.nodes[id]
    }

    fn resolve(&self, addr: NicAddress) -> io::Result<usize> {
        let id = addr.0.wrapping_sub(ADDR_BASE) as usize;
        if id < self.nodes.len() {
            Ok(id)
        } else {
            Err(io::Error::other(format!(
                "no NIC at address {:#x}",
                addr.0
            )))
        }
    }

    /// Check that `[addr, addr + len)` lies inside the registered region
    /// `handle` of `node`, with all bits of `required` access.
    fn check_region(
        &self,
        node: usize,
        handle: u64,
        addr: u64,
        len: usize,
        required: AccessFlags,
    ) -> io::Result<()> {
        let regions = self.node(node).regions.lock().unwrap();
        let entry = regions.get(&handle).ok_or_else(|| {
            io::Error::other(format!("invalid memory handle {:#x} for node {}", handle, node))
        })?;
        let end = addr
            .checked_add(len as u64)
            .ok_or_else(|| io::Error::other("put length overflows address"))?;
        if addr < entry.addr || end > entry.addr + entry.len as u64 {
            return Err(io::Error::other(format!(
                "address range {:#x}+{} outside registered region {:#x}+{}",
                addr, len, entry.addr, entry.len
            )));
        }
        if !entry.access.contains(required) {
            return Err(io::Error::other(format!(
                "region {:#x} lacks access {:?}",
                handle, required
            )));
        }
        Ok(())
    }
}

/// Factory for in-process fabrics.
pub struct SimFabric;

impl SimFabric {
    /// Create a fabric of `num_nodes` NICs sharing one event domain.
    ///
    /// Returns one [`SimNic`] per node; hand each to its rank's thread.
    pub fn create(num_nodes: usize, config: &SimFabricConfig) -> Vec<SimNic> {
        assert!(num_nodes > 0, "fabric must have at least one node");
        let shared = Arc::new(Shared {
            nodes: (0..num_nodes)
                .map(|_| NodeState {
                    source_cq: Mutex::new(CqState::new(config.source_cq_entries)),
                    dest_cq: Mutex::new(CqState::new(config.dest_cq_entries)),
                    regions: Mutex::new(HashMap::new()),
                    next_handle: AtomicU64::new(1),
                })
                .collect(),
        });
        (0..num_nodes)
            .map(|id| SimNic {
                shared: shared.clone(),
                id,
            })
            .collect()
    }
}

/// Per-node NIC handle. Owned by exactly one rank.
pub struct SimNic {
    shared: Arc<Shared>,
    id: usize,
}

impl SimNic {
    /// Instance id of this NIC (equals the creating index).
    pub fn id(&self) -> usize {
        self.id
    }

    /// Locally resolved network address, exchanged with peers at setup.
    pub fn address(&self) -> NicAddress {
        NicAddress(ADDR_BASE + self.id as u32)
    }

    /// Register a memory region with the NIC.
    ///
    /// The region is deregistered when the returned [`MemoryRegion`] drops.
    ///
    /// # Safety
    /// The buffer at `addr` with `len` bytes must stay valid, unmoved, and
    /// unresized for the lifetime of the returned `MemoryRegion`.
    ///
    /// # Errors
    /// Fails if `REMOTE_WRITE` is requested without `LOCAL_WRITE`, or if
    /// `len` is zero.
    pub unsafe fn register(
        &self,
        addr: *mut u8,
        len: usize,
        access: AccessFlags,
    ) -> io::Result<MemoryRegion> {
        if len == 0 {
            return Err(io::Error::other("cannot register empty region"));
        }
        if access.contains(AccessFlags::REMOTE_WRITE) && !access.contains(AccessFlags::LOCAL_WRITE)
        {
            return Err(io::Error::other("REMOTE_WRITE requires LOCAL_WRITE"));
        }
        let node = self.shared.node(self.id);
        let handle = node.next_handle.fetch_add(1, Ordering::Relaxed);
        node.regions.lock().unwrap().insert(
            handle,
            RegionEntry {
                addr: addr as u64,
                len,
                access,
            },
        );
        Ok(MemoryRegion {
            shared: self.shared.clone(),
            node: self.id,
            handle,
            addr: addr as u64,
            len,
        })
    }

    /// Create a logical endpoint and bind it to the peer at `remote`.
    ///
    /// `inst_id` tags this endpoint's source completion events and is
    /// validated by the consumer against the expected peer.
    pub fn create_endpoint(&self, remote: NicAddress, inst_id: usize) -> io::Result<SimEndpoint> {
        let target = self.shared.resolve(remote)?;
        Ok(SimEndpoint {
            shared: self.shared.clone(),
            local: self.id,
            target,
            inst_id,
            bound: true,
            posted: AtomicU64::new(0),
            outstanding: Arc::new(AtomicI64::new(0)),
        })
    }
}

impl PollCq for SimNic {
    fn poll_cq(&self, kind: CqKind) -> CqPoll {
        let node = self.shared.node(self.id);
        match kind {
            CqKind::Source => node.source_cq.lock().unwrap().poll(),
            CqKind::Destination => node.dest_cq.lock().unwrap().poll(),
        }
    }
}

/// Registered memory region. Deregisters on drop.
pub struct MemoryRegion {
    shared: Arc<Shared>,
    node: usize,
    handle: u64,
    addr: u64,
    len: usize,
}

impl MemoryRegion {
    /// Protection handle, valid on this node and (for remote access) in
    /// exchanged descriptors.
    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Exchangeable descriptor for this region.
    pub fn desc(&self) -> RegionDesc {
        RegionDesc {
            addr: self.addr,
            handle: self.handle,
        }
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        self.shared
            .node(self.node)
            .regions
            .lock()
            .unwrap()
            .remove(&self.handle);
    }
}

/// Per-peer logical channel. One per peer other than self.
pub struct SimEndpoint {
    shared: Arc<Shared>,
    local: usize,
    target: usize,
    inst_id: usize,
    bound: bool,
    posted: AtomicU64,
    outstanding: Arc<AtomicI64>,
}

impl SimEndpoint {
    /// Post a one-sided put described by `desc`.
    ///
    /// On success the data is in flight toward the peer's region; a source
    /// event is raised locally, and a destination event at the peer when
    /// `desc.remote_event` is set. Once posted, a put cannot be withdrawn.
    ///
    /// # Errors
    /// Fails without side effects if the endpoint is unbound, either handle
    /// is invalid, an address range falls outside its region, or the remote
    /// region lacks `REMOTE_WRITE`.
    pub fn post_put(&self, desc: &PutDescriptor) -> io::Result<()> {
        if !self.bound {
            return Err(io::Error::other("endpoint is not bound"));
        }
        self.shared.check_region(
            self.local,
            desc.local_handle,
            desc.local_addr,
            desc.length,
            AccessFlags::empty(),
        )?;
        self.shared.check_region(
            self.target,
            desc.remote_handle,
            desc.remote_addr,
            desc.length,
            AccessFlags::REMOTE_WRITE,
        )?;

        // Same-process fabric: delivery is a direct copy. Both ranges were
        // validated against live registrations above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                desc.local_addr as *const u8,
                desc.remote_addr as *mut u8,
                desc.length,
            );
        }

        let op = self.posted.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        if desc.remote_event {
            self.shared.node(self.target).dest_cq.lock().unwrap().push(
                CompletionEvent {
                    kind: CqKind::Destination,
                    peer: self.local,
                    op,
                },
                None,
            );
        }
        self.shared.node(self.local).source_cq.lock().unwrap().push(
            CompletionEvent {
                kind: CqKind::Source,
                peer: self.inst_id,
                op,
            },
            Some(self.outstanding.clone()),
        );
        Ok(())
    }

    /// Number of puts posted that have not yet been drained from the source
    /// queue.
    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Unbind the endpoint from its peer. Idempotent.
    ///
    /// # Errors
    /// Fails, leaving the endpoint bound, while operations posted on it are
    /// still outstanding; destroying such an endpoint is erroneous.
    pub fn unbind(&mut self) -> io::Result<()> {
        if !self.bound {
            return Ok(());
        }
        if self.outstanding() != 0 {
            return Err(io::Error::other(format!(
                "{} operations outstanding on endpoint to node {}",
                self.outstanding(),
                self.target
            )));
        }
        self.bound = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Vec<SimNic>, Vec<u8>, Vec<u8>) {
        let nics = SimFabric::create(2, &SimFabricConfig::default());
        (nics, vec![0u8; 256], vec![0u8; 256])
    }

    fn put_desc(local: &MemoryRegion, remote: RegionDesc, len: usize) -> PutDescriptor {
        PutDescriptor {
            local_addr: local.addr(),
            local_handle: local.handle(),
            remote_addr: remote.addr,
            remote_handle: remote.handle,
            length: len,
            remote_event: true,
            fenced: false,
        }
    }

    #[test]
    fn put_copies_bytes_and_raises_events() {
        let (nics, mut src, mut dst) = pair();
        src[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let src_mr = unsafe {
            nics[0]
                .register(src.as_mut_ptr(), src.len(), AccessFlags::LOCAL_WRITE)
                .unwrap()
        };
        let dst_mr = unsafe {
            nics[1]
                .register(
                    dst.as_mut_ptr(),
                    dst.len(),
                    AccessFlags::LOCAL_WRITE | AccessFlags::REMOTE_WRITE,
                )
                .unwrap()
        };

        let ep = nics[0].create_endpoint(nics[1].address(), 1).unwrap();
        ep.post_put(&put_desc(&src_mr, dst_mr.desc(), 8)).unwrap();

        assert_eq!(&dst[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);

        match nics[0].poll_cq(CqKind::Source) {
            CqPoll::Event(ev) => {
                assert_eq!(ev.kind, CqKind::Source);
                assert_eq!(ev.peer, 1);
            }
            other => panic!("expected source event, got {:?}", other),
        }
        match nics[1].poll_cq(CqKind::Destination) {
            CqPoll::Event(ev) => {
                assert_eq!(ev.kind, CqKind::Destination);
                assert_eq!(ev.peer, 0);
            }
            other => panic!("expected destination event, got {:?}", other),
        }
        assert!(matches!(nics[0].poll_cq(CqKind::Source), CqPoll::NotDone));
    }

    #[test]
    fn destination_queue_overruns_when_full() {
        let config = SimFabricConfig {
            source_cq_entries: 16,
            dest_cq_entries: 2,
        };
        let nics = SimFabric::create(2, &config);
        let mut src = vec![7u8; 64];
        let mut dst = vec![0u8; 64];

        let src_mr = unsafe {
            nics[0]
                .register(src.as_mut_ptr(), src.len(), AccessFlags::LOCAL_WRITE)
                .unwrap()
        };
        let dst_mr = unsafe {
            nics[1]
                .register(
                    dst.as_mut_ptr(),
                    dst.len(),
                    AccessFlags::LOCAL_WRITE | AccessFlags::REMOTE_WRITE,
                )
                .unwrap()
        };

        let ep = nics[0].create_endpoint(nics[1].address(), 1).unwrap();
        for _ in 0..3 {
            ep.post_put(&put_desc(&src_mr, dst_mr.desc(), 64)).unwrap();
        }

        // Third arrival had no slot: the loss is reported first, then the
        // two surviving events drain.
        assert!(matches!(nics[1].poll_cq(CqKind::Destination), CqPoll::Overrun));
        assert!(matches!(nics[1].poll_cq(CqKind::Destination), CqPoll::Event(_)));
        assert!(matches!(nics[1].poll_cq(CqKind::Destination), CqPoll::Event(_)));
        assert!(matches!(nics[1].poll_cq(CqKind::Destination), CqPoll::NotDone));
    }

    #[test]
    fn unbind_refused_while_outstanding() {
        let (nics, mut src, mut dst) = pair();
        let src_mr = unsafe {
            nics[0]
                .register(src.as_mut_ptr(), src.len(), AccessFlags::LOCAL_WRITE)
                .unwrap()
        };
        let dst_mr = unsafe {
            nics[1]
                .register(
                    dst.as_mut_ptr(),
                    dst.len(),
                    AccessFlags::LOCAL_WRITE | AccessFlags::REMOTE_WRITE,
                )
                .unwrap()
        };

        let mut ep = nics[0].create_endpoint(nics[1].address(), 1).unwrap();
        ep.post_put(&put_desc(&src_mr, dst_mr.desc(), 16)).unwrap();

        assert!(ep.unbind().is_err());

        assert!(matches!(nics[0].poll_cq(CqKind::Source), CqPoll::Event(_)));
        assert_eq!(ep.outstanding(), 0);
        assert!(ep.unbind().is_ok());
        // Idempotent once unbound.
        assert!(ep.unbind().is_ok());
    }

    #[test]
    fn post_rejects_invalid_regions() {
        let (nics, mut src, mut dst) = pair();
        let src_mr = unsafe {
            nics[0]
                .register(src.as_mut_ptr(), src.len(), AccessFlags::LOCAL_WRITE)
                .unwrap()
        };
        // Remote region without REMOTE_WRITE.
        let dst_mr = unsafe {
            nics[1]
                .register(dst.as_mut_ptr(), dst.len(), AccessFlags::LOCAL_WRITE)
                .unwrap()
        };

        let ep = nics[0].create_endpoint(nics[1].address(), 1).unwrap();
        assert!(ep.post_put(&put_desc(&src_mr, dst_mr.desc(), 16)).is_err());

        // Unknown remote handle.
        let bogus = RegionDesc {
            addr: dst_mr.addr(),
            handle: 0xdead,
        };
        assert!(ep.post_put(&put_desc(&src_mr, bogus, 16)).is_err());

        // Range past the end of the local region.
        let mut desc = put_desc(&src_mr, dst_mr.desc(), 16);
        desc.local_addr += src.len() as u64;
        assert!(ep.post_put(&desc).is_err());

        // Failed posts leave nothing outstanding and raise no events.
        assert_eq!(ep.outstanding(), 0);
        assert!(matches!(nics[0].poll_cq(CqKind::Source), CqPoll::NotDone));
    }

    #[test]
    fn deregistration_invalidates_handle() {
        let (nics, mut src, mut dst) = pair();
        let src_mr = unsafe {
            nics[0]
                .register(src.as_mut_ptr(), src.len(), AccessFlags::LOCAL_WRITE)
                .unwrap()
        };
        let dst_desc = {
            let dst_mr = unsafe {
                nics[1]
                    .register(
                        dst.as_mut_ptr(),
                        dst.len(),
                        AccessFlags::LOCAL_WRITE | AccessFlags::REMOTE_WRITE,
                    )
                    .unwrap()
            };
            dst_mr.desc()
            // dst_mr drops here: deregistered.
        };

        let ep = nics[0].create_endpoint(nics[1].address(), 1).unwrap();
        assert!(ep.post_put(&put_desc(&src_mr, dst_desc, 16)).is_err());
    }

    #[test]
    fn endpoint_to_unknown_address_fails() {
        let nics = SimFabric::create(2, &SimFabricConfig::default());
        assert!(nics[0].create_endpoint(NicAddress(0x1234), 1).is_err());
    }
}
