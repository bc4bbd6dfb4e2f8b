//! RDMA-style fabric with one-sided put and polled completion queues.
//!
//! The model follows low-latency NICs with a non-blocking completion API:
//!
//! - **Memory regions**: a buffer is registered before the fabric may touch
//!   it, yielding a [`RegionDesc`] (base address plus protection handle)
//!   that peers use to address the buffer remotely.
//! - **Endpoints**: one logical channel per peer, created against the local
//!   NIC and bound to the peer's resolved address plus an instance id used
//!   to tag completion events.
//! - **Completion queues**: a *source* queue reports local completion of
//!   posted puts; a *destination* queue reports data arrival. Both are
//!   bounded and polled non-blockingly; a queue that drops an event because
//!   no slot was free reports an overrun on the next poll.
//! - **One-sided put**: the initiator writes directly into a peer's
//!   registered region; the peer executes no matching receive code.
//!
//! [`sim`] provides an in-process provider: every node lives on its own
//! thread of one process and shares a [`sim::SimFabric`]. It preserves the
//! completion-count semantics of the hardware model (bounded queues, event
//! identity tags, unbind refusal while operations are outstanding) and is
//! the provider the benchmark and tests run on. The types in [`types`] are
//! the seam a hardware-backed provider would implement.

pub mod sim;
pub mod types;

pub use sim::{MemoryRegion, SimEndpoint, SimFabric, SimFabricConfig, SimNic};
pub use types::{
    AccessFlags, CompletionEvent, CqKind, CqPoll, NicAddress, PollCq, PutDescriptor, RegionDesc,
};
