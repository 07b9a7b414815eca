use std::path::{Path, PathBuf};
use std::sync::Arc;

use alloy_primitives::B256;
use evmnode_kernel::{InboxMessage, KernelRunner, PreimageResolver};
use evmnode_primitives::{
    decode_payload, encode_payload, BlockHash, Blueprint, BlueprintError, BlueprintWithEvents, DelayedTx,
    PayloadContents, Quantity, RollupAddress, GENESIS_PARENT_HASH, MAX_BLUEPRINT_PAYLOAD_LEN,
};
use evmnode_store::{AuxIndex, BlueprintRecord, ContentStore, JournalMode, MemContentStore, SledContentStore, StateSnapshot};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::{error::ContextError, state::EvmState};

/// Capacity of the in-process blueprint watcher broadcast channel.
///
/// A slow subscriber falls behind and receives `Lagged` on its next
/// `recv` rather than stalling the sender; [`EvmContext::subscribe_blueprints`]
/// callers are expected to treat `Lagged` as "skip forward", not fatal.
const BLUEPRINT_WATCHER_CAPACITY: usize = 256;

const LATEST_CHECKPOINT: &str = "LATEST";
const GENESIS_STATE_CHECKPOINT: &str = "GENESIS_STATE";

/// The outcome of a successful or locally-recovered [`EvmContext::apply_blueprint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The blueprint produced exactly one block and was committed (or was
    /// an idempotent re-application of an already-committed one).
    Applied {
        /// The resulting state.
        state: EvmState,
        /// The block hash the kernel reported producing.
        block_hash: BlockHash,
    },
    /// The blueprint produced zero blocks; nothing was committed and
    /// `next_blueprint_number` is unchanged. Non-fatal.
    Rejected {
        /// The blueprint number that was rejected.
        number: Quantity,
    },
}

/// The outcome of [`EvmContext::replay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Re-execution produced exactly one block, matching the original.
    Success {
        /// The resulting state (not committed).
        state: StateSnapshot,
    },
    /// Re-execution diverged from the historical record (zero or more
    /// than one block produced against the altered state).
    Failure {
        /// How many blocks were produced this time.
        produced: usize,
    },
}

struct Inner {
    current_state: EvmState,
    next_blueprint_number: Quantity,
    current_block_hash: BlockHash,
}

/// Orchestrates state transitions and durable persistence for the
/// sequencer/observer node.
///
/// Owns the durable store, the aux index, and the kernel runner for the
/// node's lifetime. All commits are totally ordered by
/// `next_blueprint_number`; mutation methods serialize on an internal
/// lock rather than requiring the caller to hold one, since there is a
/// single logical writer.
pub struct EvmContext {
    #[allow(dead_code)]
    data_dir: PathBuf,
    store: Arc<dyn ContentStore>,
    aux: Mutex<AuxIndex>,
    kernel: KernelRunner,
    rollup_address: RollupAddress,
    #[allow(dead_code)]
    preimages_dir: PathBuf,
    #[allow(dead_code)]
    preimages_endpoint: Option<Url>,
    blueprint_watcher: broadcast::Sender<BlueprintWithEvents>,
    pending_events: Mutex<Vec<InboxMessage>>,
    inner: Mutex<Inner>,
}

impl EvmContext {
    /// Opens or initializes the context rooted at `data_dir`.
    ///
    /// Returns `(ctx, loaded_from_disk)`: `true` if an existing checkpoint
    /// was found and reloaded, `false` if `data_dir` was empty and a
    /// fresh genesis state was created.
    pub fn init(
        data_dir: PathBuf,
        preimages_dir: PathBuf,
        preimages_endpoint: Option<Url>,
        rollup_address: RollupAddress,
        kernel_path: PathBuf,
        journal_mode: JournalMode,
    ) -> Result<(Self, bool), ContextError> {
        if !kernel_path.exists() {
            return Err(ContextError::KernelNotFound(kernel_path.display().to_string()));
        }

        std::fs::create_dir_all(&data_dir).map_err(evmnode_store::StorageError::from)?;
        let store: Arc<dyn ContentStore> = Arc::new(SledContentStore::open(data_dir.join("store"))?);
        let aux = AuxIndex::open(data_dir.join("sqlite.db"), journal_mode)?;

        let (current_state, loaded_from_disk) = match store.load(LATEST_CHECKPOINT)? {
            Some(hash) => (EvmState::new(hash), true),
            None => {
                let empty_hash = store.commit(&StateSnapshot::new())?;
                store.checkpoint(GENESIS_STATE_CHECKPOINT, empty_hash)?;
                (EvmState::new(empty_hash), false)
            }
        };

        let blueprint_count = aux.count_blueprints()?;
        let next_blueprint_number = Quantity::from(blueprint_count);
        let current_block_hash = match next_blueprint_number.checked_prev() {
            Some(last) => {
                let record = aux
                    .get_blueprint(last.as_u64())?
                    .ok_or_else(|| ContextError::Inconsistent(format!("missing record for blueprint {last}")))?;
                BlockHash::from(B256::from(record.block_hash))
            }
            None => GENESIS_PARENT_HASH,
        };

        if loaded_from_disk {
            info!(
                target: "context",
                ?next_blueprint_number,
                ?current_block_hash,
                "reloaded existing context from disk"
            );
        } else {
            info!(target: "context", "initialized fresh context");
        }

        let preimages = PreimageResolver::new(preimages_dir.clone(), preimages_endpoint.clone());
        let kernel = KernelRunner::new(&kernel_path, preimages)?;

        let (blueprint_watcher, _) = broadcast::channel(BLUEPRINT_WATCHER_CAPACITY);

        let ctx = Self {
            data_dir,
            store,
            aux: Mutex::new(aux),
            kernel,
            rollup_address,
            preimages_dir,
            preimages_endpoint,
            blueprint_watcher,
            pending_events: Mutex::new(Vec::new()),
            inner: Mutex::new(Inner { current_state, next_blueprint_number, current_block_hash }),
        };
        Ok((ctx, loaded_from_disk))
    }

    /// Opens an in-memory context for tests: a [`MemContentStore`] and an
    /// in-memory aux index, backed by a kernel module already on disk.
    #[doc(hidden)]
    pub fn init_in_memory(
        kernel_path: PathBuf,
        rollup_address: RollupAddress,
    ) -> Result<(Self, bool), ContextError> {
        let preimages_dir = std::env::temp_dir().join("evmnode-test-preimages");
        let store: Arc<dyn ContentStore> = Arc::new(MemContentStore::new());
        let aux = AuxIndex::open_in_memory()?;
        let empty_hash = store.commit(&StateSnapshot::new())?;
        store.checkpoint(GENESIS_STATE_CHECKPOINT, empty_hash)?;

        let preimages = PreimageResolver::new(preimages_dir.clone(), None);
        let kernel = KernelRunner::new(&kernel_path, preimages)?;
        let (blueprint_watcher, _) = broadcast::channel(BLUEPRINT_WATCHER_CAPACITY);

        let ctx = Self {
            data_dir: PathBuf::new(),
            store,
            aux: Mutex::new(aux),
            kernel,
            rollup_address,
            preimages_dir,
            preimages_endpoint: None,
            blueprint_watcher,
            pending_events: Mutex::new(Vec::new()),
            inner: Mutex::new(Inner {
                current_state: EvmState::new(empty_hash),
                next_blueprint_number: Quantity::ZERO,
                current_block_hash: GENESIS_PARENT_HASH,
            }),
        };
        Ok((ctx, false))
    }

    /// Bootstraps `data_dir` by copying `rollup_node_dir`'s store and
    /// aux index, then opens the result as a normal context.
    ///
    /// `rollup_node_dir` must contain at least one committed blueprint;
    /// an empty or missing archive is rejected rather than silently
    /// falling back to a fresh genesis (`ContextError::NotArchive`).
    pub fn init_from_rollup_node(
        data_dir: PathBuf,
        rollup_node_dir: PathBuf,
        preimages_dir: PathBuf,
        preimages_endpoint: Option<Url>,
        rollup_address: RollupAddress,
        kernel_path: PathBuf,
        journal_mode: JournalMode,
    ) -> Result<Self, ContextError> {
        let source_store = rollup_node_dir.join("store");
        let source_index = rollup_node_dir.join("sqlite.db");
        if !source_store.is_dir() || !source_index.is_file() {
            return Err(ContextError::NotArchive(format!(
                "{} does not look like a rollup node data directory",
                rollup_node_dir.display()
            )));
        }

        let source_aux = AuxIndex::open(&source_index, JournalMode::Delete)?;
        if source_aux.count_blueprints()? == 0 {
            return Err(ContextError::NotArchive(format!(
                "{} has no committed blueprints to bootstrap from",
                rollup_node_dir.display()
            )));
        }
        drop(source_aux);

        std::fs::create_dir_all(&data_dir).map_err(evmnode_store::StorageError::from)?;
        copy_dir_recursive(&source_store, &data_dir.join("store")).map_err(evmnode_store::StorageError::from)?;
        std::fs::copy(&source_index, data_dir.join("sqlite.db")).map_err(evmnode_store::StorageError::from)?;

        let (ctx, _) =
            Self::init(data_dir, preimages_dir, preimages_endpoint, rollup_address, kernel_path, journal_mode)?;
        Ok(ctx)
    }

    /// The rollup address this context was configured with.
    #[must_use]
    pub const fn rollup_address(&self) -> RollupAddress {
        self.rollup_address
    }

    /// Returns the freshest committed (or genesis) state.
    #[must_use]
    pub fn evm_state(&self) -> EvmState {
        self.inner.lock().current_state
    }

    /// The next blueprint number this context expects to apply.
    #[must_use]
    pub fn next_blueprint_number(&self) -> Quantity {
        self.inner.lock().next_blueprint_number
    }

    /// The hash of the last committed block.
    #[must_use]
    pub fn current_block_hash(&self) -> BlockHash {
        self.inner.lock().current_block_hash
    }

    /// The content digest of the loaded kernel module.
    #[must_use]
    pub fn kernel_digest(&self) -> evmnode_kernel::ModuleDigest {
        self.kernel.module_digest()
    }

    /// Subscribes to the in-process blueprint watcher.
    ///
    /// Used by the publisher (to learn what to inject into L1) and, in
    /// tests, to observe what the sequencer produced.
    #[must_use]
    pub fn subscribe_blueprints(&self) -> broadcast::Receiver<BlueprintWithEvents> {
        self.blueprint_watcher.subscribe()
    }

    /// Queues L1-originated events (delayed transactions, kernel
    /// upgrades, finalization signals) translated into kernel inbox
    /// messages, to be delivered with the next applied blueprint.
    pub fn apply_evm_events(&self, events: Vec<InboxMessage>) {
        self.pending_events.lock().extend(events);
    }

    /// Reconstructs the blueprint at `number` from the aux index.
    ///
    /// Public wrapper over the lookup `last_produced_blueprint` and the
    /// publisher use to re-fetch a committed blueprint's payload for
    /// (re-)injection into L1.
    pub fn blueprint(&self, number: Quantity) -> Result<Blueprint, ContextError> {
        self.blueprint_at(number)
    }

    /// The publisher's crash-safe high-water-mark: `(published, acked)`,
    /// each a count of blueprints, not a blueprint number, backed by the
    /// `publisher_state` table. Absent state (a node that has never run
    /// a publisher) reads as `(0, 0)`.
    pub fn publisher_high_water_mark(&self) -> Result<(Quantity, Quantity), ContextError> {
        Ok(match self.aux.lock().get_publisher_state()? {
            Some((published, acked)) => (Quantity::from(published), Quantity::from(acked)),
            None => (Quantity::ZERO, Quantity::ZERO),
        })
    }

    /// Persists the publisher's high-water-mark.
    pub fn persist_publisher_high_water_mark(&self, published: Quantity, acked: Quantity) -> Result<(), ContextError> {
        self.aux.lock().set_publisher_state(published.as_u64(), acked.as_u64())?;
        Ok(())
    }

    /// The delayed-inbox follower's persisted monotonic cursor for
    /// `source`, if it has ever advanced past genesis.
    pub fn delayed_inbox_cursor(&self, source: &str) -> Result<Option<Quantity>, ContextError> {
        Ok(self.aux.lock().get_delayed_inbox_cursor(source)?.map(Quantity::from))
    }

    /// Persists the delayed-inbox follower's cursor for `source`. The
    /// caller (the follower) is responsible for only ever advancing it.
    pub fn persist_delayed_inbox_cursor(&self, source: &str, level: Quantity) -> Result<(), ContextError> {
        self.aux.lock().set_delayed_inbox_cursor(source, level.as_u64())?;
        Ok(())
    }

    /// Records a kernel upgrade payload the follower observed on L1,
    /// scheduled to take effect at blueprint `at`.
    pub fn schedule_kernel_upgrade(&self, at: Quantity, payload: &[u8]) -> Result<(), ContextError> {
        self.aux.lock().insert_kernel_upgrade(at.as_u64(), payload)?;
        Ok(())
    }

    /// Installs `state` as the current state at `number`, without
    /// executing anything. Used by tooling that has already produced a
    /// validated state (e.g. bootstrap paths) rather than by the normal
    /// blueprint-application flow, which calls [`Self::apply_blueprint`].
    pub fn commit(&self, number: Quantity, state: EvmState, block_hash: BlockHash) -> Result<(), ContextError> {
        let mut inner = self.inner.lock();
        if number != inner.next_blueprint_number {
            return Err(ContextError::NumberMismatch { expected: inner.next_blueprint_number, got: number });
        }
        self.store.checkpoint(LATEST_CHECKPOINT, state.hash())?;
        inner.current_state = state;
        inner.current_block_hash = block_hash;
        inner.next_blueprint_number = number.next();
        Ok(())
    }

    /// Executes `payload` as inbox input against the current state.
    ///
    /// Checks that exactly one block is produced with the expected
    /// number and commits iff so. Duplicate application of an
    /// already-committed `(number, payload)` pair is idempotent.
    pub fn apply_blueprint(
        &self,
        number: Quantity,
        timestamp: i64,
        payload: &alloy_primitives::Bytes,
    ) -> Result<ApplyOutcome, ContextError> {
        if payload.len() > MAX_BLUEPRINT_PAYLOAD_LEN {
            return Err(BlueprintError::PayloadTooLarge { len: payload.len(), limit: MAX_BLUEPRINT_PAYLOAD_LEN }.into());
        }

        let expected = self.inner.lock().next_blueprint_number;
        if number > expected {
            return Err(ContextError::NumberMismatch { expected, got: number });
        }
        if number < expected {
            return self.apply_duplicate(number, payload);
        }

        let contents = decode_payload(payload)?;
        let events = self.pending_events.lock().clone();
        let mut messages: Vec<InboxMessage> = Vec::with_capacity(events.len() + contents.raw_txs.len() + contents.delayed.len());
        messages.extend(events.iter().cloned());
        messages.extend(contents.raw_txs.iter().map(|raw| InboxMessage(raw.to_vec())));
        messages.extend(contents.delayed.iter().map(|tx| InboxMessage(tx.raw.to_vec())));

        let snapshot = self.store.snapshot(self.inner.lock().current_state.hash())?;
        let outcome = self.kernel.execute(&snapshot, &messages)?;

        match outcome.produced_blocks.len() {
            0 => {
                debug!(target: "context", %number, "blueprint produced zero blocks, rejected");
                Ok(ApplyOutcome::Rejected { number })
            }
            1 => {
                let block_hash = outcome.produced_blocks[0];
                let state_hash = self.store.commit(&outcome.state)?;

                self.aux.lock().insert_blueprint(
                    number.as_u64(),
                    payload,
                    timestamp,
                    *block_hash.as_bytes(),
                    *state_hash.as_bytes(),
                    &events.iter().map(|m| m.0.clone()).collect::<Vec<_>>(),
                )?;
                self.store.checkpoint(LATEST_CHECKPOINT, state_hash)?;

                let mut inner = self.inner.lock();
                inner.current_state = EvmState::new(state_hash);
                inner.current_block_hash = block_hash;
                inner.next_blueprint_number = number.next();
                drop(inner);

                self.pending_events.lock().clear();

                info!(target: "context", %number, %block_hash, "committed blueprint");
                Ok(ApplyOutcome::Applied { state: EvmState::new(state_hash), block_hash })
            }
            produced => {
                warn!(target: "context", %number, produced, "kernel produced more than one block, rejecting");
                Err(ContextError::BlueprintInvalid { number, produced })
            }
        }
    }

    fn apply_duplicate(&self, number: Quantity, payload: &alloy_primitives::Bytes) -> Result<ApplyOutcome, ContextError> {
        let expected = self.inner.lock().next_blueprint_number;
        let record = self
            .aux
            .lock()
            .get_blueprint(number.as_u64())?
            .ok_or(ContextError::NumberMismatch { expected, got: number })?;
        if record.payload != payload.as_ref() {
            return Err(ContextError::NumberMismatch { expected, got: number });
        }
        let block_hash = BlockHash::from(B256::from(record.block_hash));
        let state = EvmState::new(BlockHash::from(B256::from(record.state_hash)));
        debug!(target: "context", %number, "duplicate apply_blueprint, returning committed result");
        Ok(ApplyOutcome::Applied { state, block_hash })
    }

    /// Applies `blueprint` and, on success, publishes it (with
    /// `delayed_transactions`) to the blueprint watcher for the
    /// publisher/observers to pick up.
    ///
    /// Publication failure never rolls back the local commit: the
    /// publisher retries independently.
    pub fn apply_and_publish_blueprint(
        &self,
        blueprint: Blueprint,
        delayed_transactions: Vec<DelayedTx>,
    ) -> Result<ApplyOutcome, ContextError> {
        let outcome = self.apply_blueprint(blueprint.number, blueprint.timestamp, &blueprint.payload)?;
        if matches!(outcome, ApplyOutcome::Applied { .. }) {
            let event = BlueprintWithEvents { blueprint, delayed_transactions };
            if self.blueprint_watcher.send(event).is_err() {
                debug!(target: "context", "no blueprint watcher subscribers currently listening");
            }
        }
        Ok(outcome)
    }

    /// Reconstructs the blueprint at `next_blueprint_number - 1` from the
    /// aux index.
    pub fn last_produced_blueprint(&self) -> Result<Blueprint, ContextError> {
        let next = self.inner.lock().next_blueprint_number;
        let number = next.checked_prev().ok_or(ContextError::NotFound(Quantity::ZERO))?;
        self.blueprint_at(number)
    }

    fn blueprint_at(&self, number: Quantity) -> Result<Blueprint, ContextError> {
        let record = self.aux.lock().get_blueprint(number.as_u64())?.ok_or(ContextError::NotFound(number))?;
        let parent_hash = match number.checked_prev() {
            Some(prev) => {
                let parent = self.aux.lock().get_blueprint(prev.as_u64())?.ok_or(ContextError::NotFound(prev))?;
                BlockHash::from(B256::from(parent.block_hash))
            }
            None => GENESIS_PARENT_HASH,
        };
        Ok(Blueprint {
            number,
            timestamp: record.timestamp,
            payload: alloy_primitives::Bytes::from(record.payload),
            parent_hash,
        })
    }

    /// Re-executes the blueprint at `number` against the state at
    /// `number - 1`, optionally pre-modifying that state, without
    /// committing. Used for tracing/what-if analysis.
    pub fn replay(
        &self,
        number: Quantity,
        alter_state: Option<&dyn Fn(StateSnapshot) -> StateSnapshot>,
    ) -> Result<ReplayOutcome, ContextError> {
        let record = self
            .aux
            .lock()
            .get_blueprint(number.as_u64())?
            .ok_or_else(|| ContextError::NotArchive(format!("no record of blueprint {number}")))?;

        let parent_state_hash = match number.checked_prev() {
            Some(prev) => {
                let parent = self
                    .aux
                    .lock()
                    .get_blueprint(prev.as_u64())?
                    .ok_or_else(|| ContextError::NotArchive(format!("no record of blueprint {prev}")))?;
                BlockHash::from(B256::from(parent.state_hash))
            }
            None => self
                .store
                .load(GENESIS_STATE_CHECKPOINT)?
                .ok_or_else(|| ContextError::Inconsistent("missing genesis state checkpoint".to_string()))?,
        };

        let mut snapshot = self.store.snapshot(parent_state_hash)?;
        if let Some(alter) = alter_state {
            snapshot = alter(snapshot);
        }

        let payload = alloy_primitives::Bytes::from(record.payload);
        let contents = decode_payload(&payload)?;
        let mut messages: Vec<InboxMessage> = Vec::new();
        messages.extend(record.applied_events.into_iter().map(InboxMessage));
        messages.extend(contents.raw_txs.iter().map(|raw| InboxMessage(raw.to_vec())));
        messages.extend(contents.delayed.iter().map(|tx| InboxMessage(tx.raw.to_vec())));

        let outcome = self.kernel.execute(&snapshot, &messages)?;
        match outcome.produced_blocks.len() {
            1 => Ok(ReplayOutcome::Success { state: outcome.state }),
            produced => Ok(ReplayOutcome::Failure { produced }),
        }
    }
}

impl std::fmt::Debug for EvmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EvmContext")
            .field("next_blueprint_number", &inner.next_blueprint_number)
            .field("current_block_hash", &inner.current_block_hash)
            .field("rollup_address", &self.rollup_address)
            .finish_non_exhaustive()
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}

/// Encodes a batch of raw transactions and delayed transactions into a
/// blueprint payload, the inverse of the decoding `apply_blueprint`
/// performs internally.
#[must_use]
pub fn build_payload(raw_txs: Vec<alloy_primitives::Bytes>, delayed: Vec<DelayedTx>) -> alloy_primitives::Bytes {
    encode_payload(&PayloadContents { raw_txs, delayed })
}
