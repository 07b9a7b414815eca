use thiserror::Error;

/// Errors raised by [`crate::ContentStore`] and [`crate::AuxIndex`].
///
/// Shaped after reth's `BlockExecutionError`/`ProviderError`: a flat
/// enum with a single `is_fatal` predicate the caller consults to decide
/// between local recovery and a process exit.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying backend (sled tree, sqlite connection, filesystem)
    /// returned an I/O-level failure. Transient; callers should retry.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored blob failed to decode, or a checkpoint points at a hash
    /// with no corresponding snapshot. Fatal: never auto-repair silently.
    #[error("corrupt store state: {0}")]
    Corrupt(String),

    /// A commit or blueprint insert arrived out of sequence.
    #[error("unexpected number: expected {expected}, found {found}")]
    UnexpectedNumber {
        /// The number the store expected next.
        expected: u64,
        /// The number actually supplied.
        found: u64,
    },

    /// `load(name)` found no checkpoint under that name.
    #[error("checkpoint {0:?} is missing")]
    CheckpointMissing(String),
}

impl StorageError {
    /// Mirrors `BlockExecutionError::is_fatal`: distinguishes conditions
    /// the caller can recover from locally (retry, drop payload) from
    /// ones that demand `bin/evmnode` exit rather than continue on
    /// possibly-corrupted state.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Corrupt(_) | Self::UnexpectedNumber { .. } | Self::CheckpointMissing(_))
    }
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}
