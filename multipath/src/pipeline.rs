//! Windowed put pipeline over a 0-, 1-, or 2-proxy route.
//!
//! One parametrized routine drives every role. The payload is sliced into
//! fixed windows; each iteration's windows land at a fresh offset, so a
//! round of `iterations * num_windows` puts covers the whole transfer
//! buffer exactly once. With two proxies the source splits the put index
//! range between them; each proxy forwards only after the inbound window
//! has fully landed, so a window is never forwarded speculatively.
//!
//! Completions are matched by queue and count, never by sequence number.
//! A failed post is logged and skipped; the round keeps going and reports
//! aggregate tallies instead of aborting.

use std::io;
use std::ops::Range;

use fabric::{CqKind, CqPoll, PollCq, PutDescriptor, SimNic};

use crate::endpoint::EndpointTable;
use crate::error::{Error, Result};
use crate::region::TransferMemory;
use crate::roles::{Role, RolePlan};
use crate::tracker::{CompletionTracker, WaitOutcome, WaitSummary};

/// Transfer route: the ordered ranks a window travels through.
#[derive(Debug, Clone)]
pub struct Route {
    pub source: usize,
    /// Proxy ranks in share order; empty for a direct route.
    pub proxies: Vec<usize>,
    pub dest: usize,
}

impl Route {
    pub fn from_plan(plan: &RolePlan) -> Route {
        Route {
            source: plan.source,
            proxies: plan.proxies.clone(),
            dest: plan.dest,
        }
    }

    /// Ranks the destination receives from. The share index of each
    /// contributor is its position in this list.
    pub fn contributors(&self) -> Vec<usize> {
        if self.proxies.is_empty() {
            vec![self.source]
        } else {
            self.proxies.clone()
        }
    }
}

/// Transport surface the engine drives: posting a put toward a peer plus
/// polling the local completion queues. The engine never touches a
/// provider type directly, so any fabric that can put and poll slots in.
pub trait Transport: PollCq {
    /// Post one put to `target`.
    ///
    /// # Errors
    /// Propagates the provider's post rejection; the put had no effect.
    fn post_put(&self, target: usize, desc: &PutDescriptor) -> io::Result<()>;
}

/// A rank's NIC paired with its bound endpoint table.
pub struct RankTransport<'a> {
    pub nic: &'a SimNic,
    pub endpoints: &'a EndpointTable,
}

impl PollCq for RankTransport<'_> {
    fn poll_cq(&self, kind: CqKind) -> CqPoll {
        self.nic.poll_cq(kind)
    }
}

impl Transport for RankTransport<'_> {
    fn post_put(&self, target: usize, desc: &PutDescriptor) -> io::Result<()> {
        let Some(ep) = self.endpoints.get(target) else {
            return Err(io::Error::other(format!(
                "no endpoint for remote rank {}",
                target
            )));
        };
        ep.post_put(desc)
    }
}

/// One round's shape: total payload, window size, iteration count.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub payload: usize,
    pub window: usize,
    pub iterations: usize,
}

impl PipelineConfig {
    /// # Errors
    /// `UnevenWindow` unless the window evenly divides the payload;
    /// remainder windows are not handled.
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 || self.payload % self.window != 0 {
            return Err(Error::UnevenWindow {
                payload: self.payload,
                window: self.window,
            });
        }
        Ok(())
    }

    pub fn num_windows(&self) -> usize {
        self.payload / self.window
    }

    /// Puts per round per hop.
    pub fn num_loops(&self) -> usize {
        self.iterations * self.num_windows()
    }

    /// Transfer-buffer length: every put in a round has its own slot.
    pub fn buffer_len(&self) -> usize {
        self.payload * self.iterations
    }
}

/// Put index range assigned to contributor `j` of `k`.
pub fn share_range(total: usize, j: usize, k: usize) -> Range<usize> {
    total * j / k..total * (j + 1) / k
}

/// Aggregate tallies of one round on one rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundStats {
    /// Puts accepted by the fabric.
    pub posted: usize,
    /// Puts rejected at post time (logged and skipped).
    pub post_failures: usize,
    /// Source-queue waits for this rank's own posts.
    pub outbound: WaitSummary,
    /// Destination-queue waits for inbound windows.
    pub inbound: WaitSummary,
}

/// Drives one rank through transfer rounds of a fixed shape.
pub struct PipelineEngine {
    rank: usize,
    role: Role,
    route: Route,
    config: PipelineConfig,
}

impl PipelineEngine {
    /// # Errors
    /// Propagates window validation failure.
    pub fn new(rank: usize, plan: &RolePlan, config: PipelineConfig) -> Result<PipelineEngine> {
        config.validate()?;
        Ok(PipelineEngine {
            rank,
            role: plan.role_of(rank),
            route: Route::from_plan(plan),
            config,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Run one full round in this rank's role. Collective across the route:
    /// source, proxies, and destination must all call it.
    pub fn run_round(
        &self,
        transport: &impl Transport,
        memory: &TransferMemory,
        tracker: &CompletionTracker,
    ) -> RoundStats {
        match self.role {
            Role::Source => self.run_source(transport, memory, tracker),
            Role::Proxy => self.run_proxy(transport, memory, tracker),
            Role::Destination => self.run_dest(transport, tracker),
            Role::Idle => RoundStats::default(),
        }
    }

    /// Post every put to the next hop, split across proxies by index range,
    /// then drain own source completions per hop.
    fn run_source(
        &self,
        transport: &impl Transport,
        memory: &TransferMemory,
        tracker: &CompletionTracker,
    ) -> RoundStats {
        let mut stats = RoundStats::default();
        let num_loops = self.config.num_loops();
        let next_hops = self.route.contributors();
        let k = next_hops.len();

        let mut posted_per_hop = vec![0usize; k];
        for (j, &hop) in next_hops.iter().enumerate() {
            for i in share_range(num_loops, j, k) {
                let desc = self.window_desc(i, memory.send_base(), memory.send_handle(), memory, hop);
                if self.post(transport, hop, &desc) {
                    stats.posted += 1;
                    posted_per_hop[j] += 1;
                } else {
                    stats.post_failures += 1;
                }
            }
        }
        for (j, &hop) in next_hops.iter().enumerate() {
            stats
                .outbound
                .merge(tracker.wait_all(transport, CqKind::Source, hop, posted_per_hop[j]));
        }
        stats
    }

    /// For each assigned window: confirm arrival from the source, then
    /// forward the landed bytes onward from the receive buffer. Forwarding
    /// is best-effort once the inbound wait resolves; the tallies record
    /// anything that went wrong.
    fn run_proxy(
        &self,
        transport: &impl Transport,
        memory: &TransferMemory,
        tracker: &CompletionTracker,
    ) -> RoundStats {
        let mut stats = RoundStats::default();
        let num_loops = self.config.num_loops();
        let k = self.route.proxies.len();
        let j = self
            .route
            .proxies
            .iter()
            .position(|&p| p == self.rank)
            .unwrap_or(0);

        for i in share_range(num_loops, j, k) {
            match tracker.wait_one(transport, CqKind::Destination, self.route.source) {
                WaitOutcome::Completed => stats.inbound.completed += 1,
                WaitOutcome::Mismatch { .. } => stats.inbound.mismatched += 1,
                WaitOutcome::Error(_) => stats.inbound.errors += 1,
                WaitOutcome::Timeout => stats.inbound.timeouts += 1,
            }
            let desc = self.window_desc(
                i,
                memory.recv_base(),
                memory.recv_handle(),
                memory,
                self.route.dest,
            );
            if self.post(transport, self.route.dest, &desc) {
                stats.posted += 1;
            } else {
                stats.post_failures += 1;
            }
        }
        stats
            .outbound
            .merge(tracker.wait_all(transport, CqKind::Source, self.route.dest, stats.posted));
        stats
    }

    /// Drain each contributor's share of arrival events.
    fn run_dest(&self, transport: &impl Transport, tracker: &CompletionTracker) -> RoundStats {
        let mut stats = RoundStats::default();
        let num_loops = self.config.num_loops();
        let contributors = self.route.contributors();
        let k = contributors.len();
        for (j, &from) in contributors.iter().enumerate() {
            let share = share_range(num_loops, j, k).len();
            stats
                .inbound
                .merge(tracker.wait_all(transport, CqKind::Destination, from, share));
        }
        stats
    }

    /// Descriptor for put `i`: both sides offset by `i * window` from their
    /// buffer bases.
    fn window_desc(
        &self,
        i: usize,
        local_base: u64,
        local_handle: u64,
        memory: &TransferMemory,
        target: usize,
    ) -> PutDescriptor {
        let offset = (i * self.config.window) as u64;
        let remote = memory.peer_recv(target);
        PutDescriptor {
            local_addr: local_base + offset,
            local_handle,
            remote_addr: remote.addr + offset,
            remote_handle: remote.handle,
            length: self.config.window,
            remote_event: true,
            fenced: false,
        }
    }

    /// Post one put; a failure is logged with the decoded status and the
    /// window is skipped.
    fn post(&self, transport: &impl Transport, target: usize, desc: &PutDescriptor) -> bool {
        match transport.post_put(target, desc) {
            Ok(()) => true,
            Err(err) => {
                eprintln!(
                    "Rank: {:4} PUT post failed remote rank: {:4} status: {}",
                    self.rank, target, err
                );
                false
            }
        }
    }
}
