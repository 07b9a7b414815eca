//! Typed HTTP client for the rollup node's consumed API: batch
//! injection, the durable-storage read, the simulation endpoint, the
//! rollup address lookup, and the `monitor_blueprints` event stream.
//!
//! Every method is a thin `reqwest` call; the interesting behavior is
//! in [`RollupClientError`]'s status-code classification, which encodes
//! the Open Question decision recorded in `DESIGN.md`.

#![warn(missing_docs)]

mod error;
mod types;

use alloy_primitives::{Address, Bytes};
use evmnode_errors::TransientError;
use evmnode_primitives::{BlueprintWithEvents, Quantity, RollupAddress};
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use tokio::io::AsyncBufReadExt;
use url::Url;

pub use error::RollupClientError;
pub use types::{EvalResult, InsightRequest, SimulateInput, WireDelayedTx};

/// A client for the rollup node's HTTP API.
///
/// Cheap to clone (an `Arc`-backed `reqwest::Client` internally);
/// components that need concurrent access (publisher and follower
/// sharing one endpoint) should each hold their own clone rather than
/// share a lock.
#[derive(Debug, Clone)]
pub struct RollupClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RollupClient {
    /// Builds a client targeting `base_url`. A trailing slash is added
    /// if missing so relative-path joins behave predictably.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { http: reqwest::Client::new(), base_url }
    }

    fn join(&self, path: &str) -> Result<Url, RollupClientError> {
        self.base_url.join(path).map_err(|err| RollupClientError::Decode(err.to_string()))
    }

    /// Submits `raw_txs` to `POST /injection/batch`. The returned
    /// message ids are intentionally discarded; only the status of the
    /// call matters to the caller.
    pub async fn inject_batch(&self, raw_txs: &[Bytes]) -> Result<(), RollupClientError> {
        let url = self.join("injection/batch")?;
        let body: Vec<String> = raw_txs.iter().map(ToString::to_string).collect();
        let request = self.http.post(url).json(&body);
        self.execute(request).await?;
        Ok(())
    }

    /// Reads `GET /global/block/head/durable/wasm_2_0_0/value?key=<path>`.
    /// A 404 is treated as "no value", not an error.
    pub async fn get_durable_value(&self, path: &str) -> Result<Option<Vec<u8>>, RollupClientError> {
        let mut url = self.join("global/block/head/durable/wasm_2_0_0/value")?;
        url.query_pairs_mut().append_pair("key", path);
        match self.execute(self.http.get(url)).await {
            Ok(bytes) => Ok(Some(bytes.to_vec())),
            Err(RollupClientError::Unavailable { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Calls `POST /global/block/head/simulate`.
    pub async fn simulate(&self, input: &SimulateInput) -> Result<EvalResult, RollupClientError> {
        let url = self.join("global/block/head/simulate")?;
        let request = self.http.post(url).json(input);
        let bytes = self.execute(request).await?;
        serde_json::from_slice(&bytes).map_err(|err| RollupClientError::Decode(err.to_string()))
    }

    /// Calls `GET /global/smart_rollup_address` and decodes the
    /// base58-encoded 20-byte address.
    pub async fn smart_rollup_address(&self) -> Result<RollupAddress, RollupClientError> {
        let url = self.join("global/smart_rollup_address")?;
        let bytes = self.execute(self.http.get(url)).await?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|err| RollupClientError::Decode(err.to_string()))?
            .trim();
        let decoded = bs58::decode(text).into_vec().map_err(|err| RollupClientError::Decode(err.to_string()))?;
        let address: [u8; 20] =
            decoded.try_into().map_err(|bytes: Vec<u8>| {
                RollupClientError::Decode(format!("expected 20 bytes, found {}", bytes.len()))
            })?;
        Ok(RollupAddress::from(Address::from(address)))
    }

    /// Opens `GET /monitor_blueprints?from=<number>`, a newline-delimited
    /// JSON stream of [`BlueprintWithEvents`]. Blank lines (keep-alives)
    /// are silently skipped; a malformed line surfaces as
    /// [`RollupClientError::Decode`] without ending the stream.
    pub async fn monitor_blueprints(
        &self,
        from: Quantity,
    ) -> Result<impl Stream<Item = Result<BlueprintWithEvents, RollupClientError>> + Send, RollupClientError> {
        let mut url = self.join("monitor_blueprints")?;
        url.query_pairs_mut().append_pair("from", &from.as_u64().to_string());

        let response = self.http.get(url).send().await.map_err(TransientError::Request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let byte_stream =
            response.bytes_stream().map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err));
        let reader = tokio_util::io::StreamReader::new(byte_stream);
        let lines = tokio_stream::wrappers::LinesStream::new(tokio::io::BufReader::new(reader).lines());

        Ok(lines.filter_map(|line| async move {
            let line = match line {
                Ok(line) => line,
                Err(err) => return Some(Err(RollupClientError::Decode(err.to_string()))),
            };
            if line.trim().is_empty() {
                return None;
            }
            Some(
                serde_json::from_str::<BlueprintWithEvents>(&line)
                    .map_err(|err| RollupClientError::Decode(err.to_string())),
            )
        }))
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<bytes::Bytes, RollupClientError> {
        let response = request.send().await.map_err(TransientError::Request)?;
        let status = response.status();
        if status.is_success() {
            return response.bytes().await.map_err(|err| TransientError::Request(err).into());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }
}

/// Classifies a non-2xx rollup-node response: any 4xx other than
/// 404/409 is fatal, everything else is retryable.
fn classify_status(status: StatusCode, body: String) -> RollupClientError {
    let retryable_client_error = status == StatusCode::NOT_FOUND || status == StatusCode::CONFLICT;
    if status.is_client_error() && !retryable_client_error {
        RollupClientError::Rejected { status: status.as_u16(), body }
    } else {
        RollupClientError::Unavailable { status: status.as_u16(), body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evmnode_primitives::{Blueprint, DelayedTx, GENESIS_PARENT_HASH};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> RollupClient {
        RollupClient::new(Url::parse(&server.uri()).unwrap())
    }

    #[tokio::test]
    async fn inject_batch_succeeds_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/injection/batch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<String>::new()))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.inject_batch(&[Bytes::from_static(b"tx")]).await.unwrap();
    }

    #[tokio::test]
    async fn inject_batch_404_is_retryable_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/injection/batch"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.inject_batch(&[Bytes::from_static(b"tx")]).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(err, RollupClientError::Unavailable { status: 404, .. }));
    }

    #[tokio::test]
    async fn inject_batch_400_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/injection/batch"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad blueprint"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.inject_batch(&[Bytes::from_static(b"tx")]).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn get_durable_value_missing_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/global/block/head/durable/wasm_2_0_0/value"))
            .and(query_param("key", "/counter"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.get_durable_value("/counter").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_durable_value_present_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/global/block/head/durable/wasm_2_0_0/value"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"value".to_vec()))
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.get_durable_value("/counter").await.unwrap(), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn simulate_roundtrips_json() {
        let server = MockServer::start().await;
        let expected = EvalResult { insights: vec![Some(Bytes::from_static(b"x")), None] };
        Mock::given(method("POST"))
            .and(path("/global/block/head/simulate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&expected))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result = client.simulate(&SimulateInput::default()).await.unwrap();
        assert_eq!(result.insights, expected.insights);
    }

    #[tokio::test]
    async fn smart_rollup_address_decodes_base58() {
        let server = MockServer::start().await;
        let address = Address::repeat_byte(9);
        let encoded = bs58::encode(address.as_slice()).into_string();
        Mock::given(method("GET"))
            .and(path("/global/smart_rollup_address"))
            .respond_with(ResponseTemplate::new(200).set_body_string(encoded))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let decoded = client.smart_rollup_address().await.unwrap();
        assert_eq!(decoded, RollupAddress::from(address));
    }

    #[tokio::test]
    async fn monitor_blueprints_parses_ndjson_lines() {
        let server = MockServer::start().await;
        let blueprint = BlueprintWithEvents {
            blueprint: Blueprint {
                number: Quantity::from(1),
                timestamp: 1,
                payload: Bytes::from_static(b"payload"),
                parent_hash: GENESIS_PARENT_HASH,
            },
            delayed_transactions: vec![DelayedTx {
                hash: evmnode_primitives::TxHash::from(alloy_primitives::B256::repeat_byte(2)),
                raw: Bytes::from_static(b"raw"),
            }],
        };
        let line = serde_json::to_string(&blueprint).unwrap();
        let body = format!("{line}\n\n");

        Mock::given(method("GET"))
            .and(path("/monitor_blueprints"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut stream = Box::pin(client.monitor_blueprints(Quantity::from(1)).await.unwrap());
        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received, blueprint);
        assert!(stream.next().await.is_none());
    }
}
