//! Multipath put-pipeline benchmark.
//!
//! Measures bulk one-sided transfers between distinct nodes of a fabric,
//! sweeping the pipeline window size over direct and proxy-routed paths.
//! Roles (source, up to two proxies, destination) are assigned from the
//! distinct-node list computed after a global identity exchange; the
//! pipeline slices the payload into windows, posts them asynchronously,
//! and tracks completion by bounded busy-polling of the source and
//! destination queues.

pub mod affinity;
pub mod endpoint;
pub mod error;
pub mod group;
pub mod parquet_out;
pub mod pipeline;
pub mod region;
pub mod roles;
pub mod sweep;
pub mod topology;
pub mod tracker;

pub use error::{Error, Result, EXIT_INSUFFICIENT_TOPOLOGY};
pub use group::{ProcessGroup, ThreadGroup};
pub use pipeline::{PipelineConfig, PipelineEngine, RankTransport, Route, Transport};
pub use roles::{plan_roles, Role, RolePlan};
pub use sweep::{run_rank, JobConfig, SweepConfig, SweepPoint};
pub use tracker::{CompletionTracker, WaitOutcome, WaitSummary};
