//! Error types for the multipath benchmark.

use std::io;

/// Exit status for a job that cannot separate source, proxy, and
/// destination roles onto distinct physical nodes.
pub const EXIT_INSUFFICIENT_TOPOLOGY: i32 = 91;

/// Benchmark setup and protocol errors.
#[derive(Debug)]
pub enum Error {
    /// IO error from the underlying fabric layer.
    Io(io::Error),
    /// Fewer distinct physical nodes than roles require.
    InsufficientTopology { found: usize, required: usize },
    /// A swept window size does not evenly divide the payload.
    UnevenWindow { payload: usize, window: usize },
    /// Window sizes must be positive and min must not exceed max.
    InvalidWindowRange { min: usize, max: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::InsufficientTopology { found, required } => write!(
                f,
                "only {} distinct nodes, need at least {}",
                found, required
            ),
            Error::UnevenWindow { payload, window } => write!(
                f,
                "window size {} does not divide payload {}",
                window, payload
            ),
            Error::InvalidWindowRange { min, max } => {
                write!(f, "invalid window range {}..={}", min, max)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type for multipath operations.
pub type Result<T> = std::result::Result<T, Error>;
