//! Core data types shared by every crate in the sequencer/observer node.
//!
//! These are intentionally thin: the node treats the WASM kernel as an
//! opaque black box, so there is no EVM transaction/receipt/state-root
//! machinery here — just the identifiers and wire shapes the node itself
//! reasons about (blueprint numbers, hashes, delayed transactions).

#![warn(missing_docs)]

mod blueprint;
mod hash;
mod payload;

pub use blueprint::{Blueprint, BlueprintError, BlueprintWithEvents, DelayedTx};
pub use hash::{BlockHash, Quantity, RollupAddress, TxHash, GENESIS_PARENT_HASH};
pub use payload::{decode_payload, encode_payload, PayloadContents, PayloadDecodeError};

/// Maximum payload length for a single blueprint, in bytes.
///
/// The kernel rejects any payload above this bound before it ever reaches
/// the WASM guest; producers and observers enforce it up front so an
/// oversized payload never occupies a blueprint number.
pub const MAX_BLUEPRINT_PAYLOAD_LEN: usize = 512 * 1024;
