use evmnode_primitives::BlockHash;

/// An opaque handle to a persistent state snapshot, identified by its
/// content hash. Equality is by content hash.
///
/// Cheap to copy and compare; the actual key/value map lives in the
/// [`evmnode_store::ContentStore`] behind [`crate::EvmContext`]. Two
/// `EvmState` values with the same hash are, by the content store's own
/// commit semantics, the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvmState(BlockHash);

impl EvmState {
    /// Wraps a content hash returned by a prior
    /// [`evmnode_store::ContentStore::commit`]/`modify` call.
    #[must_use]
    pub const fn new(hash: BlockHash) -> Self {
        Self(hash)
    }

    /// The content hash identifying this state.
    #[must_use]
    pub const fn hash(self) -> BlockHash {
        self.0
    }
}

impl From<BlockHash> for EvmState {
    fn from(hash: BlockHash) -> Self {
        Self(hash)
    }
}

impl From<EvmState> for BlockHash {
    fn from(state: EvmState) -> Self {
        state.0
    }
}
