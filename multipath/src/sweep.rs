//! Window-size sweep and the full per-rank benchmark job.
//!
//! One round per window size, doubling from the minimum to the maximum.
//! Latency is wall time per iteration, max-reduced across ranks so every
//! rank reports the same worst-case figure; bandwidth follows from it.
//! After each round the destination byte-checks the received buffer
//! against the source pattern and reports, never aborts, on mismatch.

use std::time::Instant;

use fabric::SimNic;

use crate::endpoint::{exchange_nic_addresses, EndpointTable};
use crate::error::{Error, Result};
use crate::group::ProcessGroup;
use crate::pipeline::{PipelineConfig, PipelineEngine, RankTransport};
use crate::region::TransferMemory;
use crate::roles::{plan_roles, Role};
use crate::topology::{exchange_identities, JobContext, Placement};
use crate::tracker::CompletionTracker;

/// Swept window range and transfer shape.
#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub min_window: usize,
    pub max_window: usize,
    pub payload: usize,
    pub iterations: usize,
}

impl SweepConfig {
    /// Window sizes for the sweep: doubling from the minimum, capped at the
    /// payload size since a window cannot exceed what it slices.
    ///
    /// # Errors
    /// `InvalidWindowRange` for an empty or zero range, `UnevenWindow` if
    /// any swept size does not divide the payload.
    pub fn window_sizes(&self) -> Result<Vec<usize>> {
        if self.min_window == 0 || self.min_window > self.max_window {
            return Err(Error::InvalidWindowRange {
                min: self.min_window,
                max: self.max_window,
            });
        }
        let cap = self.max_window.min(self.payload);
        let mut sizes = Vec::new();
        let mut window = self.min_window;
        while window <= cap {
            if self.payload % window != 0 {
                return Err(Error::UnevenWindow {
                    payload: self.payload,
                    window,
                });
            }
            sizes.push(window);
            window *= 2;
        }
        if sizes.is_empty() {
            return Err(Error::InvalidWindowRange {
                min: self.min_window,
                max: cap,
            });
        }
        Ok(sizes)
    }

    pub fn buffer_len(&self) -> usize {
        self.payload * self.iterations
    }
}

/// Everything a rank needs to run the benchmark.
#[derive(Debug, Clone, Copy)]
pub struct JobConfig {
    pub sweep: SweepConfig,
    pub placement: Placement,
    /// Proxy hops on the route, 0 to 2.
    pub num_proxies: usize,
}

/// One measured sweep point, identical on every rank after reduction.
#[derive(Debug, Clone, Copy)]
pub struct SweepPoint {
    pub window: usize,
    pub bandwidth_mib_s: f64,
    /// Worst-case microseconds per iteration across ranks.
    pub latency_us: f64,
    /// Pattern words that differed at the destination; zero elsewhere.
    pub mismatched_words: usize,
}

/// Fill `buf` with the deterministic transfer pattern, one tagged 64-bit
/// word per slot, so the destination can verify without holding the
/// source's buffer.
pub fn fill_pattern(buf: &mut [u8]) {
    for (i, chunk) in buf.chunks_exact_mut(8).enumerate() {
        let word = 0xdddd_dddd_0000_0000u64 | (i as u64 + 1);
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}

/// Count pattern words in `buf` that differ from [`fill_pattern`]'s output.
pub fn verify_pattern(buf: &[u8]) -> usize {
    let mut mismatched = 0;
    for (i, chunk) in buf.chunks_exact(8).enumerate() {
        let expected = 0xdddd_dddd_0000_0000u64 | (i as u64 + 1);
        if chunk != expected.to_le_bytes() {
            mismatched += 1;
        }
    }
    mismatched
}

/// Run the whole benchmark job on this rank: identity exchange, role
/// assignment, registration, endpoint setup, the window sweep, teardown.
/// Collective: every rank of the group must call it.
///
/// # Errors
/// Fatal setup failures only: insufficient distinct nodes, registration
/// failure, invalid sweep shape. Per-operation transfer errors are logged
/// and absorbed into the round tallies.
pub fn run_rank<G: ProcessGroup>(
    group: &G,
    nic: &SimNic,
    job: &JobConfig,
) -> Result<Vec<SweepPoint>> {
    let windows = job.sweep.window_sizes()?;
    let ctx = JobContext::resolve(group, &job.placement);
    let identities = exchange_identities(group, &ctx);
    let plan = plan_roles(&identities, job.num_proxies)?;
    let role = plan.role_of(ctx.rank);

    let mut memory = TransferMemory::register_and_exchange(nic, group, job.sweep.buffer_len())?;
    let addrs = exchange_nic_addresses(group, nic);
    let mut endpoints = EndpointTable::create_and_bind(nic, ctx.rank, &addrs)?;
    let tracker = CompletionTracker::new(ctx.rank);

    if role == Role::Source {
        fill_pattern(memory.send_slice_mut());
    }

    let mut points = Vec::with_capacity(windows.len());
    for window in windows {
        let config = PipelineConfig {
            payload: job.sweep.payload,
            window,
            iterations: job.sweep.iterations,
        };
        let engine = PipelineEngine::new(ctx.rank, &plan, config)?;
        let transport = RankTransport {
            nic,
            endpoints: &endpoints,
        };

        group.barrier();
        let start = Instant::now();
        engine.run_round(&transport, &memory, &tracker);
        group.barrier();
        let elapsed_us = start.elapsed().as_secs_f64() * 1e6;

        let latency_us = group.max_f64(elapsed_us / job.sweep.iterations as f64);
        let bandwidth_mib_s = job.sweep.payload as f64 * 1e6 / (latency_us * 1024.0 * 1024.0);

        let mut mismatched_words = 0;
        if role == Role::Destination {
            mismatched_words = verify_pattern(memory.recv_slice());
            if mismatched_words > 0 {
                eprintln!(
                    "Rank: {:4} payload mismatch, window: {} bad words: {}",
                    ctx.rank, window, mismatched_words
                );
            }
            memory.clear_recv();
        }

        points.push(SweepPoint {
            window,
            bandwidth_mib_s,
            latency_us,
            mismatched_words,
        });
    }

    group.barrier();
    endpoints.teardown(ctx.rank);
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_doubles_and_caps_at_the_payload() {
        let sweep = SweepConfig {
            min_window: 128 << 10,
            max_window: 4 << 20,
            payload: 1 << 20,
            iterations: 10,
        };
        assert_eq!(
            sweep.window_sizes().unwrap(),
            vec![128 << 10, 256 << 10, 512 << 10, 1 << 20]
        );
    }

    #[test]
    fn degenerate_ranges_are_rejected() {
        let sweep = SweepConfig {
            min_window: 1 << 20,
            max_window: 128 << 10,
            payload: 4 << 20,
            iterations: 1,
        };
        assert!(matches!(
            sweep.window_sizes(),
            Err(Error::InvalidWindowRange { .. })
        ));

        let sweep = SweepConfig {
            min_window: 3000,
            max_window: 6000,
            payload: 1 << 20,
            iterations: 1,
        };
        assert!(matches!(sweep.window_sizes(), Err(Error::UnevenWindow { .. })));
    }

    #[test]
    fn pattern_verifies_clean_and_detects_damage() {
        let mut buf = vec![0u8; 4096];
        fill_pattern(&mut buf);
        assert_eq!(verify_pattern(&buf), 0);
        buf[100] ^= 0xff;
        assert_eq!(verify_pattern(&buf), 1);
    }
}
