use crate::{BlockHash, Quantity, TxHash};
use alloy_primitives::Bytes;

/// An ordered, signed batch of EVM transactions plus delayed-inbox items,
/// identified by a strictly increasing number.
///
/// Invariants (enforced by [`Blueprint::validate`] and by
/// `evmnode-context` before a blueprint is ever applied):
/// - `number == parent.number + 1` for the parent it is built against.
/// - `payload.len() <= evmnode_primitives::MAX_BLUEPRINT_PAYLOAD_LEN`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Blueprint {
    /// The blueprint number.
    pub number: Quantity,
    /// Unix timestamp assigned by the producer/upstream sequencer.
    pub timestamp: i64,
    /// Opaque, kernel-decodable payload (the encoded inbox messages).
    pub payload: Bytes,
    /// Hash of the block the kernel will build this blueprint on top of.
    pub parent_hash: BlockHash,
}

/// Error returned by [`Blueprint::validate`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BlueprintError {
    /// `payload.len()` exceeded [`crate::MAX_BLUEPRINT_PAYLOAD_LEN`].
    #[error("blueprint payload of {len} bytes exceeds the {limit} byte bound")]
    PayloadTooLarge {
        /// Observed payload length.
        len: usize,
        /// Configured bound.
        limit: usize,
    },
}

impl Blueprint {
    /// Checks the size-only invariant that can be verified without a
    /// parent in hand; the `number == parent.number + 1` invariant is
    /// checked by the context, which is the only place that knows the
    /// parent.
    pub fn validate(&self) -> Result<(), BlueprintError> {
        if self.payload.len() > crate::MAX_BLUEPRINT_PAYLOAD_LEN {
            return Err(BlueprintError::PayloadTooLarge {
                len: self.payload.len(),
                limit: crate::MAX_BLUEPRINT_PAYLOAD_LEN,
            });
        }
        Ok(())
    }
}

/// A transaction originating from the L1 delayed inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct DelayedTx {
    /// Hash of the raw transaction.
    pub hash: TxHash,
    /// Raw transaction bytes, kernel-decodable.
    pub raw: Bytes,
}

/// A blueprint bundled with the delayed transactions it carries, as
/// streamed from an upstream sequencer to its observers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct BlueprintWithEvents {
    /// The blueprint itself.
    pub blueprint: Blueprint,
    /// Delayed transactions that accompany it.
    pub delayed_transactions: Vec<DelayedTx>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GENESIS_PARENT_HASH;

    fn blueprint_with_payload(len: usize) -> Blueprint {
        Blueprint {
            number: Quantity(1),
            timestamp: 0,
            payload: Bytes::from(vec![0u8; len]),
            parent_hash: GENESIS_PARENT_HASH,
        }
    }

    #[test]
    fn validate_accepts_payload_at_bound() {
        blueprint_with_payload(crate::MAX_BLUEPRINT_PAYLOAD_LEN).validate().unwrap();
    }

    #[test]
    fn validate_rejects_oversized_payload() {
        let err = blueprint_with_payload(crate::MAX_BLUEPRINT_PAYLOAD_LEN + 1)
            .validate()
            .unwrap_err();
        assert_matches::assert_matches!(err, BlueprintError::PayloadTooLarge { .. });
    }

    #[test]
    fn json_roundtrip() {
        let bp = blueprint_with_payload(16);
        let json = serde_json::to_string(&bp).unwrap();
        let back: Blueprint = serde_json::from_str(&json).unwrap();
        assert_eq!(bp, back);
    }
}
