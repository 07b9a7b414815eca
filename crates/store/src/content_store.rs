use std::collections::BTreeMap;

use evmnode_primitives::BlockHash;

use crate::error::StorageError;

/// A fully-materialized key/value state, the unit [`ContentStore::commit`]
/// persists and hashes.
///
/// The Merkle-tree internals of a real rollup store are explicitly out of
/// scope; this is an opaque key-value backend with commit/checkpoint
/// semantics, not a from-scratch Merkle trie.
pub type StateSnapshot = BTreeMap<String, Vec<u8>>;

/// A content-addressed, transactional key-value store.
///
/// Every method is synchronous and expected to be cheap relative to
/// network I/O; callers that need it off the async executor thread should
/// wrap calls in `tokio::task::spawn_blocking`.
pub trait ContentStore: Send + Sync + std::fmt::Debug {
    /// Persists `snapshot`, returning its deterministic content hash.
    /// Committing an already-known snapshot is a no-op that returns the
    /// same hash (committing is idempotent).
    fn commit(&self, snapshot: &StateSnapshot) -> Result<BlockHash, StorageError>;

    /// Atomically points the named checkpoint at `hash`. Survives a crash:
    /// a process killed mid-call leaves either the old or the new value,
    /// never a torn write.
    fn checkpoint(&self, name: &str, hash: BlockHash) -> Result<(), StorageError>;

    /// Reads the named checkpoint, if any has ever been set.
    fn load(&self, name: &str) -> Result<Option<BlockHash>, StorageError>;

    /// Fetches the value at `path` within the snapshot identified by
    /// `hash`, or `None` if the path is absent. Errors only on a missing
    /// or corrupt snapshot, never on a missing path.
    fn inspect(&self, hash: BlockHash, path: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Produces and persists a new snapshot equal to the one at `hash`
    /// with `path` set to `value`, returning its hash. Calling this twice
    /// with the same `(hash, path, value)` yields the same output hash.
    fn modify(&self, hash: BlockHash, path: &str, value: Vec<u8>) -> Result<BlockHash, StorageError>;

    /// Loads the full materialized snapshot identified by `hash`.
    ///
    /// Used by callers (the kernel runner, `replay`) that need the whole
    /// map rather than a single path, as opposed to [`Self::inspect`].
    fn snapshot(&self, hash: BlockHash) -> Result<StateSnapshot, StorageError>;
}

fn hash_snapshot(snapshot: &StateSnapshot) -> Result<BlockHash, StorageError> {
    let encoded = bincode::serialize(snapshot)?;
    let digest: [u8; 32] = *blake3::hash(&encoded).as_bytes();
    Ok(BlockHash::from(alloy_primitives::B256::from(digest)))
}

/// In-memory [`ContentStore`], used in tests and by `execute_and_inspect`
/// simulations that must never touch disk.
#[derive(Debug, Default)]
pub struct MemContentStore {
    snapshots: parking_lot::RwLock<std::collections::HashMap<BlockHash, StateSnapshot>>,
    checkpoints: parking_lot::RwLock<std::collections::HashMap<String, BlockHash>>,
}

impl MemContentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for MemContentStore {
    fn commit(&self, snapshot: &StateSnapshot) -> Result<BlockHash, StorageError> {
        let hash = hash_snapshot(snapshot)?;
        self.snapshots.write().entry(hash).or_insert_with(|| snapshot.clone());
        Ok(hash)
    }

    fn checkpoint(&self, name: &str, hash: BlockHash) -> Result<(), StorageError> {
        self.checkpoints.write().insert(name.to_string(), hash);
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<BlockHash>, StorageError> {
        Ok(self.checkpoints.read().get(name).copied())
    }

    fn inspect(&self, hash: BlockHash, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let snapshots = self.snapshots.read();
        let snapshot = snapshots
            .get(&hash)
            .ok_or_else(|| StorageError::Corrupt(format!("no snapshot for {hash}")))?;
        Ok(snapshot.get(path).cloned())
    }

    fn modify(&self, hash: BlockHash, path: &str, value: Vec<u8>) -> Result<BlockHash, StorageError> {
        let mut next = {
            let snapshots = self.snapshots.read();
            snapshots
                .get(&hash)
                .ok_or_else(|| StorageError::Corrupt(format!("no snapshot for {hash}")))?
                .clone()
        };
        next.insert(path.to_string(), value);
        self.commit(&next)
    }

    fn snapshot(&self, hash: BlockHash) -> Result<StateSnapshot, StorageError> {
        self.snapshots
            .read()
            .get(&hash)
            .cloned()
            .ok_or_else(|| StorageError::Corrupt(format!("no snapshot for {hash}")))
    }
}

/// `sled`-backed [`ContentStore`]. Snapshots live in one tree keyed by
/// their content hash; checkpoints live in a second tree keyed by name.
#[derive(Debug)]
pub struct SledContentStore {
    snapshots: sled::Tree,
    checkpoints: sled::Tree,
}

impl SledContentStore {
    /// Opens (creating if absent) a store rooted at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        tracing::debug!(target: "store", ?path, "opening content store");
        let db = sled::open(path)?;
        let snapshots = db.open_tree("snapshots")?;
        let checkpoints = db.open_tree("checkpoints")?;
        Ok(Self { snapshots, checkpoints })
    }
}

impl ContentStore for SledContentStore {
    fn commit(&self, snapshot: &StateSnapshot) -> Result<BlockHash, StorageError> {
        let hash = hash_snapshot(snapshot)?;
        if !self.snapshots.contains_key(hash.as_bytes())? {
            let encoded = bincode::serialize(snapshot)?;
            self.snapshots.insert(hash.as_bytes(), encoded)?;
            self.snapshots.flush()?;
        }
        Ok(hash)
    }

    fn checkpoint(&self, name: &str, hash: BlockHash) -> Result<(), StorageError> {
        self.checkpoints.insert(name.as_bytes(), hash.as_bytes())?;
        self.checkpoints.flush()?;
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<BlockHash>, StorageError> {
        let Some(raw) = self.checkpoints.get(name.as_bytes())? else {
            return Ok(None);
        };
        let bytes: [u8; 32] = raw
            .as_ref()
            .try_into()
            .map_err(|_| StorageError::Corrupt(format!("checkpoint {name:?} is not 32 bytes")))?;
        Ok(Some(BlockHash::from(alloy_primitives::B256::from(bytes))))
    }

    fn inspect(&self, hash: BlockHash, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let snapshot = self.snapshot(hash)?;
        Ok(snapshot.get(path).cloned())
    }

    fn modify(&self, hash: BlockHash, path: &str, value: Vec<u8>) -> Result<BlockHash, StorageError> {
        let mut snapshot = self.snapshot(hash)?;
        snapshot.insert(path.to_string(), value);
        self.commit(&snapshot)
    }

    fn snapshot(&self, hash: BlockHash) -> Result<StateSnapshot, StorageError> {
        let raw = self
            .snapshots
            .get(hash.as_bytes())?
            .ok_or_else(|| StorageError::Corrupt(format!("no snapshot for {hash}")))?;
        Ok(bincode::deserialize(&raw)?)
    }
}
