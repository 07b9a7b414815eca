use alloy_primitives::Bytes;
use evmnode_primitives::TxHash;
use serde::{Deserialize, Serialize};

/// A single durable-storage insight request, naming the path to read
/// back after a simulated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightRequest {
    /// The path segments making up the durable storage key, e.g.
    /// `["evm", "simulation_result"]`.
    pub durable_storage_key: Vec<String>,
}

/// Body of `POST /global/block/head/simulate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulateInput {
    /// Inbox messages to feed before the simulation entrypoint runs.
    pub messages: Vec<Bytes>,
    /// Preimages supplied directly, bypassing the resolver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reveal_pages: Option<Vec<Bytes>>,
    /// Paths to read back after the run.
    pub insight_requests: Vec<InsightRequest>,
    /// Optional server-side debug log file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_kernel_debug_file: Option<String>,
}

/// Response body of `POST /global/block/head/simulate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalResult {
    /// One entry per requested insight, in order; `None` for a missing
    /// path.
    pub insights: Vec<Option<Bytes>>,
}

/// A delayed transaction as carried on the wire, alongside a streamed
/// blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireDelayedTx {
    /// Hash of the raw transaction.
    pub hash: TxHash,
    /// Raw transaction bytes.
    pub raw: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulate_input_omits_null_fields() {
        let input = SimulateInput {
            messages: vec![Bytes::from_static(b"msg")],
            reveal_pages: None,
            insight_requests: vec![InsightRequest { durable_storage_key: vec!["evm".into()] }],
            log_kernel_debug_file: None,
        };
        let json = serde_json::to_value(&input).unwrap();
        assert!(json.get("reveal_pages").is_none());
        assert!(json.get("log_kernel_debug_file").is_none());
    }

    #[test]
    fn eval_result_roundtrip() {
        let result = EvalResult { insights: vec![Some(Bytes::from_static(b"x")), None] };
        let json = serde_json::to_string(&result).unwrap();
        let back: EvalResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result.insights, back.insights);
    }
}
