use evmnode_context::ContextError;

/// Errors raised by [`crate::DelayedInboxFollower`].
#[derive(Debug, thiserror::Error)]
pub enum FollowerError {
    /// The configured [`crate::DelayedInboxSource`] failed to answer.
    #[error("delayed inbox source error: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The context's durable store could not be read or written.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// A level's event payload did not decode to the expected shape.
    #[error("malformed L1 level event payload: {0}")]
    Decode(String),
}

impl FollowerError {
    /// `true` for conditions the caller should treat as fatal rather
    /// than retry on the next poll: a state-inconsistent context.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Context(err) if err.is_fatal())
    }
}
