//! Bounded busy-poll completion tracking.
//!
//! The fabric has no blocking wait, so every synchronization point is a
//! poll loop with a retry budget. Exhausting the budget is a timeout, not
//! a hang; queue overrun and queue error are reported distinctly so the
//! caller can tell lost events from broken hardware.

use std::thread;
use std::time::Duration;

use fabric::{CqKind, CqPoll, PollCq};

/// Default poll budget per expected event.
pub const MAX_CQ_RETRY_COUNT: u64 = 1_000_000;

/// Microseconds slept at each backoff step.
const BACKOFF_SLEEP_US: u64 = 50;

/// Unrecoverable queue condition observed while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CqFailure {
    /// The queue dropped at least one event for lack of space.
    Overrun,
    /// The provider reported a local queue error.
    Queue,
}

/// Outcome of waiting for one completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The expected event was drained.
    Completed,
    /// An event was drained but its peer id did not match. The event is
    /// consumed; the transfer it signalled still happened.
    Mismatch { expected: usize, got: usize },
    /// The queue reported an unrecoverable condition.
    Error(CqFailure),
    /// The retry budget ran out with no event.
    Timeout,
}

/// Tally of a multi-event wait. Never fail-fast: every expected event gets
/// its own budget so one bad peer cannot mask the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitSummary {
    pub completed: usize,
    pub mismatched: usize,
    pub errors: usize,
    pub timeouts: usize,
}

impl WaitSummary {
    pub fn merge(&mut self, other: WaitSummary) {
        self.completed += other.completed;
        self.mismatched += other.mismatched;
        self.errors += other.errors;
        self.timeouts += other.timeouts;
    }

    pub fn all_completed(&self, expected: usize) -> bool {
        self.completed == expected && self.mismatched == 0 && self.errors == 0 && self.timeouts == 0
    }
}

/// Completion waiter for one rank. Holds the rank id for log prefixes and
/// the per-event retry budget.
pub struct CompletionTracker {
    rank: usize,
    retry_budget: u64,
}

impl CompletionTracker {
    pub fn new(rank: usize) -> CompletionTracker {
        CompletionTracker {
            rank,
            retry_budget: MAX_CQ_RETRY_COUNT,
        }
    }

    /// Override the per-event poll budget. Tests use small budgets to make
    /// timeouts cheap.
    pub fn with_retry_budget(rank: usize, retry_budget: u64) -> CompletionTracker {
        CompletionTracker { rank, retry_budget }
    }

    /// Poll `kind` until one event arrives or the budget runs out.
    ///
    /// Most iterations yield the core; every tenth of the budget the loop
    /// sleeps instead, so a stalled peer does not spin a CPU flat out.
    pub fn wait_one(&self, cq: &impl PollCq, kind: CqKind, expected_peer: usize) -> WaitOutcome {
        let backoff_step = (self.retry_budget / 10).max(1);
        for attempt in 0..self.retry_budget {
            match cq.poll_cq(kind) {
                CqPoll::Event(event) => {
                    if event.peer != expected_peer {
                        eprintln!(
                            "Rank: {:4} CQ event peer mismatch, expected: {:4} got: {:4}",
                            self.rank, expected_peer, event.peer
                        );
                        return WaitOutcome::Mismatch {
                            expected: expected_peer,
                            got: event.peer,
                        };
                    }
                    return WaitOutcome::Completed;
                }
                CqPoll::NotDone => {
                    if attempt % backoff_step == backoff_step - 1 {
                        thread::sleep(Duration::from_micros(BACKOFF_SLEEP_US));
                    } else {
                        thread::yield_now();
                    }
                }
                CqPoll::Overrun => {
                    eprintln!("Rank: {:4} CQ overrun", self.rank);
                    return WaitOutcome::Error(CqFailure::Overrun);
                }
                CqPoll::Error => {
                    eprintln!("Rank: {:4} CQ error", self.rank);
                    return WaitOutcome::Error(CqFailure::Queue);
                }
            }
        }
        eprintln!(
            "Rank: {:4} CQ timeout waiting on peer: {:4}",
            self.rank, expected_peer
        );
        WaitOutcome::Timeout
    }

    /// Wait for `count` events from `expected_peer`, tallying outcomes.
    pub fn wait_all(
        &self,
        cq: &impl PollCq,
        kind: CqKind,
        expected_peer: usize,
        count: usize,
    ) -> WaitSummary {
        let mut summary = WaitSummary::default();
        for _ in 0..count {
            match self.wait_one(cq, kind, expected_peer) {
                WaitOutcome::Completed => summary.completed += 1,
                WaitOutcome::Mismatch { .. } => summary.mismatched += 1,
                WaitOutcome::Error(_) => summary.errors += 1,
                WaitOutcome::Timeout => summary.timeouts += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric::CompletionEvent;
    use std::cell::RefCell;

    /// Scripted queue: replays a fixed sequence of poll results, then
    /// reports `NotDone` forever.
    struct ScriptedCq {
        script: RefCell<Vec<CqPoll>>,
    }

    impl ScriptedCq {
        fn new(mut polls: Vec<CqPoll>) -> ScriptedCq {
            polls.reverse();
            ScriptedCq {
                script: RefCell::new(polls),
            }
        }
    }

    impl PollCq for ScriptedCq {
        fn poll_cq(&self, _kind: CqKind) -> CqPoll {
            self.script.borrow_mut().pop().unwrap_or(CqPoll::NotDone)
        }
    }

    fn event(peer: usize) -> CqPoll {
        CqPoll::Event(CompletionEvent {
            kind: CqKind::Source,
            peer,
            op: 0,
        })
    }

    #[test]
    fn wait_one_drains_the_expected_event() {
        let cq = ScriptedCq::new(vec![CqPoll::NotDone, CqPoll::NotDone, event(3)]);
        let tracker = CompletionTracker::with_retry_budget(0, 100);
        assert_eq!(tracker.wait_one(&cq, CqKind::Source, 3), WaitOutcome::Completed);
    }

    #[test]
    fn mismatched_peer_consumes_the_event_without_failing_the_wait_loop() {
        let cq = ScriptedCq::new(vec![event(7), event(3)]);
        let tracker = CompletionTracker::with_retry_budget(0, 100);
        assert_eq!(
            tracker.wait_one(&cq, CqKind::Source, 3),
            WaitOutcome::Mismatch { expected: 3, got: 7 }
        );
        // The stray event is gone; the next wait sees the right one.
        assert_eq!(tracker.wait_one(&cq, CqKind::Source, 3), WaitOutcome::Completed);
    }

    #[test]
    fn empty_queue_times_out_after_the_budget() {
        let cq = ScriptedCq::new(vec![]);
        let tracker = CompletionTracker::with_retry_budget(0, 50);
        assert_eq!(tracker.wait_one(&cq, CqKind::Source, 0), WaitOutcome::Timeout);
    }

    #[test]
    fn overrun_is_distinct_from_timeout() {
        let cq = ScriptedCq::new(vec![CqPoll::NotDone, CqPoll::Overrun]);
        let tracker = CompletionTracker::with_retry_budget(0, 50);
        assert_eq!(
            tracker.wait_one(&cq, CqKind::Destination, 0),
            WaitOutcome::Error(CqFailure::Overrun)
        );
    }

    #[test]
    fn wait_all_tallies_every_outcome_without_fail_fast() {
        let cq = ScriptedCq::new(vec![event(1), event(9), CqPoll::Overrun, event(1)]);
        let tracker = CompletionTracker::with_retry_budget(0, 50);
        let summary = tracker.wait_all(&cq, CqKind::Source, 1, 5);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.mismatched, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.timeouts, 1);
        assert!(!summary.all_completed(5));
    }
}
