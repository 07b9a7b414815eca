use evmnode_context::ContextError;
use evmnode_rollup_client::RollupClientError;

/// Errors raised by [`crate::BlueprintsPublisher`].
#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    /// The rollup node rejected or could not be reached for injection.
    #[error(transparent)]
    Rollup(#[from] RollupClientError),
    /// The context's durable store could not be read or written.
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl PublisherError {
    /// `true` for a permanent condition: the caller must stop and
    /// propagate, never drop the blueprint.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Rollup(err) => err.is_fatal(),
            Self::Context(err) => err.is_fatal(),
        }
    }
}
