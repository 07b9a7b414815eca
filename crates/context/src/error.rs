use evmnode_kernel::KernelError;
use evmnode_primitives::{BlueprintError, PayloadDecodeError, Quantity};
use evmnode_store::StorageError;
use thiserror::Error;

/// Errors raised by [`crate::EvmContext`].
///
/// Most variants are recovered locally by the caller (a rejected
/// blueprint, a number mismatch); the ones flagged
/// [`ContextError::is_fatal`] indicate state the node must never attempt
/// to auto-repair.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The durable store returned an error while reading or writing.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The kernel runner failed to execute, or the kernel module itself
    /// is incompatible with the host ABI.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// A blueprint payload failed its own shape checks
    /// ([`evmnode_primitives::Blueprint::validate`]).
    #[error(transparent)]
    BlueprintShape(#[from] BlueprintError),

    /// A blueprint payload could not be decoded into transactions.
    #[error(transparent)]
    PayloadDecode(#[from] PayloadDecodeError),

    /// `apply_blueprint` was called with a number that is neither the
    /// next expected number nor a prior, already-committed one whose
    /// content matches (the idempotence case).
    #[error("unexpected blueprint number: expected {expected}, got {got}")]
    NumberMismatch {
        /// The number the context expected.
        expected: Quantity,
        /// The number actually supplied.
        got: Quantity,
    },

    /// The kernel produced more than one block for a single blueprint.
    /// This indicates a kernel bug; the candidate state is discarded.
    #[error("kernel produced {produced} blocks for blueprint {number}, expected at most 1")]
    BlueprintInvalid {
        /// The blueprint number that was being applied.
        number: Quantity,
        /// How many blocks the kernel reported producing.
        produced: usize,
    },

    /// `last_produced_blueprint`/`replay` referenced a number the store
    /// has no record of (history has been pruned, or the node is not an
    /// archive).
    #[error("no record of blueprint {0}")]
    NotFound(Quantity),

    /// `init_from_rollup_node` was pointed at a directory that is not a
    /// rollup node archive, or one with insufficient history.
    #[error("rollup node directory is not usable as a bootstrap source: {0}")]
    NotArchive(String),

    /// The on-disk checkpoint pointed at a hash with no corresponding
    /// snapshot, or the store's blueprint count disagrees with
    /// `next_blueprint_number`. The node must exit rather than guess.
    #[error("state inconsistency: {0}")]
    Inconsistent(String),

    /// The kernel module file referenced by configuration does not exist.
    #[error("kernel module not found at {0}")]
    KernelNotFound(String),
}

impl ContextError {
    /// `true` for a state inconsistency or protocol mismatch: the
    /// caller (`bin/evmnode`) must log and exit rather than continue.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_fatal(),
            Self::Kernel(err) => err.is_fatal(),
            Self::Inconsistent(_) | Self::KernelNotFound(_) => true,
            Self::BlueprintShape(_)
            | Self::PayloadDecode(_)
            | Self::NumberMismatch { .. }
            | Self::BlueprintInvalid { .. }
            | Self::NotFound(_)
            | Self::NotArchive(_) => false,
        }
    }
}
