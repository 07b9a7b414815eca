use evmnode_errors::TransientError;
use thiserror::Error;

/// Errors raised by [`crate::RollupClient`].
///
/// Splits invalid-external-input errors from transient I/O failures:
/// a non-2xx response is [`Self::Unavailable`] (retried with backoff)
/// unless it is a 4xx other than 404/409, in which case it is
/// [`Self::Rejected`] and [`Self::is_fatal`] returns `true`.
#[derive(Debug, Error)]
pub enum RollupClientError {
    /// The request itself failed at the transport layer (connect
    /// refused, TLS error, timed out).
    #[error(transparent)]
    Transport(#[from] TransientError),

    /// The rollup node responded with a status worth retrying: a 5xx,
    /// or a 404/409 (resource/level not yet available).
    #[error("rollup node returned {status} (retryable): {body}")]
    Unavailable {
        /// The HTTP status code.
        status: u16,
        /// The response body, for logging.
        body: String,
    },

    /// The rollup node rejected the request outright: a 4xx other than
    /// 404/409. Retrying will not help; this almost always means the
    /// caller sent something structurally invalid.
    #[error("rollup node rejected the request with status {status}: {body}")]
    Rejected {
        /// The HTTP status code.
        status: u16,
        /// The response body, for logging.
        body: String,
    },

    /// A response body did not parse as the expected shape (malformed
    /// JSON, a base58 address that doesn't decode to 20 bytes, a stream
    /// line that isn't valid `BlueprintWithEvents` JSON).
    #[error("malformed response from rollup node: {0}")]
    Decode(String),
}

impl RollupClientError {
    /// `true` only for [`Self::Rejected`]: a structurally invalid
    /// request that retrying can never fix. Every other variant is
    /// recoverable by the caller's own retry/reconnect loop.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
