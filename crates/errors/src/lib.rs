//! Shared error taxonomy.
//!
//! Every component-level error type in this node is built from these
//! primitives so that the top-level binary can answer one question
//! uniformly: does this error call for a retry, a reconnect, or a process
//! exit?

#![warn(missing_docs)]

use std::time::Duration;
use thiserror::Error;

/// A failure that is expected to resolve itself given time: network
/// blips, the rollup node being briefly unavailable, a preimage fetch
/// timing out. Callers retry these locally, usually with backoff.
#[derive(Debug, Error)]
pub enum TransientError {
    /// The underlying operation did not complete within its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    /// An HTTP call to an external service failed transiently (network
    /// error, 5xx, or connection reset).
    #[error("transient request failure: {0}")]
    Request(#[source] reqwest::Error),
    /// A local I/O operation (store read/write, preimage cache) failed
    /// transiently.
    #[error("transient I/O failure: {0}")]
    Io(#[source] std::io::Error),
}

impl TransientError {
    /// Returns `true` if the error is almost certainly transient and
    /// worth retrying immediately; `false` suggests backing off further
    /// (e.g. the remote gave a well-formed 5xx rather than failing to
    /// connect at all).
    #[must_use]
    pub const fn is_immediately_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io(_))
    }
}

/// A node-fatal condition: an error that must never be auto-repaired.
/// Surfacing one of these causes `bin/evmnode` to log and
/// exit with code 2 (state inconsistency) or 1 (protocol mismatch /
/// configuration).
#[derive(Debug, Error)]
pub enum FatalError {
    /// The durable store is internally inconsistent (checkpoint points at
    /// a missing hash, a gap in the blueprint sequence, etc).
    #[error("state inconsistency: {0}")]
    StateInconsistency(String),
    /// The kernel module does not implement the host ABI the runner
    /// expects, or advertises an incompatible ABI version.
    #[error("kernel/node protocol mismatch: {0}")]
    ProtocolMismatch(String),
    /// Configuration was invalid or a required resource was missing at
    /// startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl FatalError {
    /// The process exit code this error should produce.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::StateInconsistency(_) => 2,
            Self::ProtocolMismatch(_) | Self::Configuration(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_exit_codes_match_spec() {
        assert_eq!(FatalError::StateInconsistency("x".into()).exit_code(), 2);
        assert_eq!(FatalError::ProtocolMismatch("x".into()).exit_code(), 1);
        assert_eq!(FatalError::Configuration("x".into()).exit_code(), 1);
    }

    #[test]
    fn timeout_is_immediately_retryable() {
        assert!(TransientError::Timeout(Duration::from_secs(1)).is_immediately_retryable());
    }
}
