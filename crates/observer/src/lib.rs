//! The observer-mode stream loop: follows an upstream sequencer's
//! `monitor_blueprints` stream, applies each blueprint locally, and
//! forwards locally-submitted transactions upstream.

#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use evmnode_config::TimeBetweenBlocks;
use evmnode_context::{ApplyOutcome, EvmContext};
use evmnode_kernel::InboxMessage;
use evmnode_primitives::Quantity;
use evmnode_rollup_client::RollupClient;
use evmnode_tasks::GracefulShutdown;
use evmnode_txpool::TxPool;
use futures_util::StreamExt;
use rand::Rng;
use tracing::{error, info, warn};

/// The uniform random range the reconnect backoff is drawn from:
/// a random delay in `[0, 2s)`.
const RECONNECT_JITTER: Duration = Duration::from_secs(2);

/// Follows an upstream sequencer and mirrors its blueprints locally.
pub struct BlueprintObserver {
    ctx: Arc<EvmContext>,
    client: RollupClient,
    pool: Arc<TxPool>,
    time_between_blocks: TimeBetweenBlocks,
}

impl BlueprintObserver {
    /// Builds an observer that streams from `client` and mirrors into
    /// `ctx`, forwarding `pool`'s contents upstream after each applied
    /// blueprint.
    #[must_use]
    pub fn new(
        ctx: Arc<EvmContext>,
        client: RollupClient,
        pool: Arc<TxPool>,
        time_between_blocks: TimeBetweenBlocks,
    ) -> Self {
        Self { ctx, client, pool, time_between_blocks }
    }

    /// Runs until `shutdown` fires, reconnecting on any stream error,
    /// idle timeout, or blueprint-number mismatch.
    pub async fn run(self, shutdown: GracefulShutdown) -> eyre::Result<()> {
        loop {
            tokio::select! {
                () = shutdown.wait() => {
                    info!(target: "observer", "shutting down");
                    return Ok(());
                }
                result = self.run_one_connection() => {
                    match result {
                        Ok(()) => unreachable!("run_one_connection only returns on error"),
                        Err(ObserverOutcome::Fatal(err)) => return Err(err),
                        Err(ObserverOutcome::Reconnect(reason)) => {
                            warn!(target: "observer", %reason, "reconnecting to upstream blueprint stream");
                        }
                    }
                }
            }

            let jitter = rand::thread_rng().gen_range(Duration::ZERO..RECONNECT_JITTER);
            tokio::select! {
                () = shutdown.wait() => return Ok(()),
                () = tokio::time::sleep(jitter) => {}
            }
        }
    }

    async fn run_one_connection(&self) -> Result<(), ObserverOutcome> {
        let mut expected = self.ctx.next_blueprint_number();
        let mut stream = Box::pin(
            self.client
                .monitor_blueprints(expected)
                .await
                .map_err(|err| ObserverOutcome::Reconnect(err.to_string()))?,
        );

        let idle_timeout = match self.time_between_blocks {
            TimeBetweenBlocks::Never => None,
            TimeBetweenBlocks::Every(d) => Some(d + Duration::from_secs(1)),
        };

        loop {
            let next = match idle_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, stream.next()).await {
                    Ok(item) => item,
                    Err(_) => return Err(ObserverOutcome::Reconnect("idle timeout waiting for next blueprint".into())),
                },
                None => stream.next().await,
            };

            let Some(item) = next else {
                return Err(ObserverOutcome::Reconnect("upstream blueprint stream closed".into()));
            };
            let event = item.map_err(|err| ObserverOutcome::Reconnect(err.to_string()))?;

            if event.blueprint.number != expected {
                return Err(ObserverOutcome::Reconnect(format!(
                    "expected blueprint {expected}, upstream sent {}",
                    event.blueprint.number
                )));
            }

            if !event.delayed_transactions.is_empty() {
                let messages = event
                    .delayed_transactions
                    .iter()
                    .map(|tx| InboxMessage(tx.raw.to_vec()))
                    .collect();
                self.ctx.apply_evm_events(messages);
            }

            match self.ctx.apply_blueprint(event.blueprint.number, event.blueprint.timestamp, &event.blueprint.payload)
            {
                Ok(ApplyOutcome::Applied { block_hash, .. }) => {
                    info!(target: "observer", number = %event.blueprint.number, %block_hash, "mirrored blueprint");
                    expected = expected.next();
                }
                Ok(ApplyOutcome::Rejected { number }) => {
                    error!(target: "observer", %number, "locally rejected a blueprint the upstream sequencer committed");
                    return Err(ObserverOutcome::Fatal(eyre::eyre!(
                        "state inconsistency: blueprint {number} committed upstream but rejected locally"
                    )));
                }
                Err(err) if err.is_fatal() => return Err(ObserverOutcome::Fatal(err.into())),
                Err(err) => return Err(ObserverOutcome::Reconnect(err.to_string())),
            }

            self.forward_pending_txs().await;
        }
    }

    async fn forward_pending_txs(&self) {
        let drained = self.pool.drain();
        if drained.is_empty() {
            return;
        }
        let raw_txs = drained.iter().map(|tx| tx.raw.clone()).collect::<Vec<_>>();
        let count = raw_txs.len();
        if let Err(err) = self.client.inject_batch(&raw_txs).await {
            warn!(target: "observer", %err, count, "failed to forward pending txs upstream");
        }
    }
}

/// How [`BlueprintObserver::run_one_connection`] ended.
enum ObserverOutcome {
    /// Drop the connection and reconnect after a jittered delay.
    Reconnect(String),
    /// State inconsistency or protocol mismatch; the caller exits.
    Fatal(eyre::Report),
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes};
    use evmnode_primitives::{Blueprint, DelayedTx, RollupAddress, TxHash};
    use evmnode_txpool::TxPoolLimits;
    use url::Url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PRODUCES_ONE_BLOCK_WAT: &str = r#"
        (module
            (import "env" "write_output" (func $write_output (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0)
                "\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42")
            (func (export "kernel_run")
                (call $write_output (i32.const 0) (i32.const 32))))
    "#;

    fn test_observer(server: &MockServer) -> (BlueprintObserver, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let kernel_path = dir.path().join("kernel.wat");
        std::fs::write(&kernel_path, PRODUCES_ONE_BLOCK_WAT).unwrap();
        let (ctx, _) =
            EvmContext::init_in_memory(kernel_path, RollupAddress::from(Address::repeat_byte(4))).unwrap();
        let client = RollupClient::new(Url::parse(&server.uri()).unwrap());
        let pool = Arc::new(TxPool::new(TxPoolLimits {
            timeout: Duration::from_secs(3600),
            addr_limit: 100,
            tx_per_addr_limit: 16,
        }));
        (
            BlueprintObserver::new(Arc::new(ctx), client, pool, TimeBetweenBlocks::Never),
            dir,
        )
    }

    fn blueprint_body(number: u64) -> String {
        let blueprint = Blueprint {
            number: Quantity::from(number),
            timestamp: 0,
            payload: evmnode_primitives::encode_payload(&evmnode_primitives::PayloadContents::default()),
            parent_hash: evmnode_primitives::GENESIS_PARENT_HASH,
        };
        let event = evmnode_primitives::BlueprintWithEvents {
            blueprint,
            delayed_transactions: Vec::<DelayedTx>::new(),
        };
        serde_json::to_string(&event).unwrap()
    }

    #[tokio::test]
    async fn mismatched_number_triggers_reconnect_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/monitor_blueprints"))
            .and(query_param("from", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(format!("{}\n", blueprint_body(1)), "application/x-ndjson"))
            .mount(&server)
            .await;

        let (observer, _dir) = test_observer(&server);
        let err = observer.run_one_connection().await.unwrap_err();
        assert!(matches!(err, ObserverOutcome::Reconnect(_)));
    }

    #[tokio::test]
    async fn applies_matching_blueprint_and_advances() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/monitor_blueprints"))
            .and(query_param("from", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(format!("{}\n", blueprint_body(0)), "application/x-ndjson"))
            .mount(&server)
            .await;
        Mock::given(method("POST")).and(path("/injection/batch")).respond_with(ResponseTemplate::new(200).set_body_json(Vec::<String>::new())).mount(&server).await;

        let (observer, _dir) = test_observer(&server);
        // the stream ends after one item, so this always ends in a
        // "closed" reconnect once the one matching blueprint applied.
        let err = observer.run_one_connection().await.unwrap_err();
        assert!(matches!(err, ObserverOutcome::Reconnect(_)));
        assert_eq!(observer.ctx.next_blueprint_number(), Quantity::from(1));
    }

    #[tokio::test]
    async fn forwards_pending_txs_after_applying_a_blueprint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/monitor_blueprints"))
            .and(query_param("from", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(format!("{}\n", blueprint_body(0)), "application/x-ndjson"))
            .mount(&server)
            .await;
        Mock::given(method("POST")).and(path("/injection/batch")).respond_with(ResponseTemplate::new(200).set_body_json(Vec::<String>::new())).mount(&server).await;

        let (observer, _dir) = test_observer(&server);
        observer.pool.insert(evmnode_txpool::PendingTx {
            hash: TxHash::from(alloy_primitives::B256::repeat_byte(5)),
            sender: Address::repeat_byte(5),
            raw: Bytes::from_static(b"tx"),
        }).unwrap();

        let _ = observer.run_one_connection().await;
        assert!(observer.pool.is_empty());
    }
}
