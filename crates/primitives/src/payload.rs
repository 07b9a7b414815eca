use alloy_primitives::Bytes;
use thiserror::Error;

use crate::DelayedTx;

/// The decoded contents of a [`crate::Blueprint`] payload: the raw
/// transactions a producer or upstream sequencer batched together, plus
/// any delayed transactions carried alongside them.
///
/// The wire format itself is an implementation detail the kernel never
/// sees directly — `evmnode-context` turns each entry into an opaque
/// inbox message before handing it to the kernel runner. It is shared
/// here because the producer (which builds payloads), the context
/// (which decodes them before execution), and the observer (which
/// forwards upstream payloads verbatim) all need the same encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct PayloadContents {
    /// Raw transaction bytes, in submission order.
    pub raw_txs: Vec<Bytes>,
    /// Delayed transactions carried by this blueprint.
    pub delayed: Vec<DelayedTx>,
}

/// Error returned by [`decode_payload`].
#[derive(Debug, Error)]
pub enum PayloadDecodeError {
    /// The payload bytes were not a valid encoding.
    #[error("malformed blueprint payload: {0}")]
    Malformed(String),
}

/// Encodes `contents` into the opaque payload bytes a [`crate::Blueprint`]
/// carries.
#[must_use]
pub fn encode_payload(contents: &PayloadContents) -> Bytes {
    Bytes::from(bincode::serialize(contents).expect("PayloadContents encoding is infallible"))
}

/// Decodes a blueprint payload previously produced by [`encode_payload`].
///
/// Any bytes that do not round-trip (a malformed or foreign payload,
/// e.g. received from an untrusted upstream) yield
/// [`PayloadDecodeError::Malformed`] rather than a panic.
pub fn decode_payload(payload: &Bytes) -> Result<PayloadContents, PayloadDecodeError> {
    bincode::deserialize(payload).map_err(|err| PayloadDecodeError::Malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxHash;
    use alloy_primitives::B256;

    #[test]
    fn roundtrip_empty() {
        let contents = PayloadContents::default();
        let encoded = encode_payload(&contents);
        assert_eq!(decode_payload(&encoded).unwrap(), contents);
    }

    #[test]
    fn roundtrip_with_txs_and_delayed() {
        let contents = PayloadContents {
            raw_txs: vec![Bytes::from_static(b"tx-a"), Bytes::from_static(b"tx-b")],
            delayed: vec![DelayedTx { hash: TxHash::from(B256::repeat_byte(1)), raw: Bytes::from_static(b"delayed") }],
        };
        let encoded = encode_payload(&contents);
        assert_eq!(decode_payload(&encoded).unwrap(), contents);
    }

    #[test]
    fn decode_rejects_garbage() {
        let garbage = Bytes::from_static(b"not a valid encoding at all, far too short");
        assert!(decode_payload(&garbage).is_err());
    }
}
