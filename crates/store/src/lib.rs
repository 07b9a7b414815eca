//! The durable store: a content-addressed key-value backend plus a small
//! SQLite auxiliary index for fast by-number lookups.
//!
//! Two cooperating pieces, each independently swappable: [`ContentStore`]
//! (content-addressed snapshots with atomic checkpointing) and
//! [`AuxIndex`] (the `sqlite.db` side index). `EvmContext`, in
//! `evmnode-context`, owns one of each for the node's lifetime.

#![warn(missing_docs)]

mod aux_index;
mod content_store;
mod error;

pub use aux_index::{AuxIndex, BlueprintRecord, JournalMode};
pub use content_store::{ContentStore, MemContentStore, SledContentStore, StateSnapshot};
pub use error::StorageError;
