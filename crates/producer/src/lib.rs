//! The sequencer's cooperative block-production loop: drains the tx
//! pool on a schedule (or on demand), builds a blueprint, and hands it
//! to [`EvmContext::apply_and_publish_blueprint`].

#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use evmnode_config::TimeBetweenBlocks;
use evmnode_context::{build_payload, ApplyOutcome, EvmContext};
use evmnode_primitives::Blueprint;
use evmnode_tasks::GracefulShutdown;
use evmnode_txpool::TxPool;
use tracing::{info, warn};

const TICK: Duration = Duration::from_millis(500);

/// Drives [`BlockProducer::produce_block`] on the schedule described by
/// `time_between_blocks`, forcing a production attempt whenever enough
/// time has elapsed since the last one actually produced a block.
pub struct BlockProducer {
    ctx: Arc<EvmContext>,
    pool: Arc<TxPool>,
    time_between_blocks: TimeBetweenBlocks,
}

impl BlockProducer {
    /// Builds a producer over `pool`, scheduled per `time_between_blocks`.
    #[must_use]
    pub fn new(ctx: Arc<EvmContext>, pool: Arc<TxPool>, time_between_blocks: TimeBetweenBlocks) -> Self {
        Self { ctx, pool, time_between_blocks }
    }

    /// Runs the cooperative production loop until `shutdown` fires.
    ///
    /// `TimeBetweenBlocks::Never` suspends the timer entirely: the
    /// producer only ever fires when [`Self::force_produce`] is called
    /// out-of-band (e.g. by a full tx pool), which this loop alone does
    /// not do — the producer suspends forever.
    pub async fn run(self, shutdown: GracefulShutdown) -> eyre::Result<()> {
        let Some(interval) = self.interval_duration() else {
            info!(target: "producer", "time_between_blocks=never, suspending the production timer");
            shutdown.wait().await;
            return Ok(());
        };

        let mut last_produced = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                () = shutdown.wait() => {
                    info!(target: "producer", "shutting down");
                    return Ok(());
                }
                now = ticker.tick() => {
                    let force = now.duration_since(last_produced) >= interval;
                    let produced = self.produce_block(force, unix_timestamp())?;
                    if produced > 0 || force {
                        last_produced = now;
                    }
                }
            }
        }
    }

    fn interval_duration(&self) -> Option<Duration> {
        match self.time_between_blocks {
            TimeBetweenBlocks::Never => None,
            TimeBetweenBlocks::Every(d) => Some(d),
        }
    }

    /// Attempts to produce one block.
    ///
    /// Returns the number of raw transactions included, or `0` if
    /// nothing was produced (an empty, unforced attempt, or a kernel
    /// rejection).
    pub fn produce_block(&self, force: bool, timestamp: i64) -> eyre::Result<usize> {
        let drained = self.pool.drain();
        if drained.is_empty() && !force {
            return Ok(0);
        }

        let raw_txs = drained.iter().map(|tx| tx.raw.clone()).collect::<Vec<_>>();
        let count = raw_txs.len();
        let payload = build_payload(raw_txs, Vec::new());
        let blueprint = Blueprint {
            number: self.ctx.next_blueprint_number(),
            timestamp,
            payload,
            parent_hash: self.ctx.current_block_hash(),
        };

        match self.ctx.apply_and_publish_blueprint(blueprint.clone(), Vec::new())? {
            ApplyOutcome::Applied { block_hash, .. } => {
                info!(target: "producer", number = %blueprint.number, %block_hash, count, "produced block");
                Ok(count)
            }
            ApplyOutcome::Rejected { number } => {
                // The host ABI reports only block-level accept/reject, not
                // a per-transaction verdict, so a rejection drops every
                // raw tx drained this attempt rather than singling one
                // out. Pending delayed-inbox events are left queued by
                // the context itself and are retried on the next attempt.
                warn!(target: "producer", %number, count, "kernel rejected blueprint, dropping this attempt's raw txs");
                Ok(0)
            }
        }
    }
}

fn unix_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes};
    use evmnode_primitives::RollupAddress;
    use evmnode_txpool::{PendingTx, TxPoolLimits};

    const PRODUCES_ONE_BLOCK_WAT: &str = r#"
        (module
            (import "env" "write_output" (func $write_output (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0)
                "\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42")
            (func (export "kernel_run")
                (call $write_output (i32.const 0) (i32.const 32))))
    "#;

    const REJECTS_EVERYTHING_WAT: &str = r#"
        (module (memory (export "memory") 1) (func (export "kernel_run")))
    "#;

    fn test_producer(wat: &str) -> (BlockProducer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let kernel_path = dir.path().join("kernel.wat");
        std::fs::write(&kernel_path, wat).unwrap();
        let (ctx, _) =
            EvmContext::init_in_memory(kernel_path, RollupAddress::from(Address::repeat_byte(3))).unwrap();
        let pool = Arc::new(TxPool::new(TxPoolLimits {
            timeout: Duration::from_secs(3600),
            addr_limit: 100,
            tx_per_addr_limit: 16,
        }));
        (BlockProducer::new(Arc::new(ctx), pool.clone(), TimeBetweenBlocks::Never), dir)
    }

    fn sample_tx(byte: u8) -> PendingTx {
        PendingTx {
            hash: evmnode_primitives::TxHash::from(alloy_primitives::B256::repeat_byte(byte)),
            sender: Address::repeat_byte(byte),
            raw: Bytes::from(vec![byte; 4]),
        }
    }

    #[test]
    fn empty_unforced_pool_produces_nothing() {
        let (producer, _dir) = test_producer(PRODUCES_ONE_BLOCK_WAT);
        assert_eq!(producer.produce_block(false, 0).unwrap(), 0);
    }

    #[test]
    fn forced_attempt_with_empty_pool_still_runs_the_kernel() {
        let (producer, _dir) = test_producer(PRODUCES_ONE_BLOCK_WAT);
        assert_eq!(producer.produce_block(true, 0).unwrap(), 0);
        assert_eq!(producer.ctx.next_blueprint_number(), evmnode_primitives::Quantity::from(1));
    }

    #[test]
    fn drains_pool_and_advances_on_success() {
        let (producer, _dir) = test_producer(PRODUCES_ONE_BLOCK_WAT);
        producer.pool.insert(sample_tx(1)).unwrap();
        producer.pool.insert(sample_tx(2)).unwrap();

        let produced = producer.produce_block(false, 100).unwrap();
        assert_eq!(produced, 2);
        assert!(producer.pool.is_empty());
        assert_eq!(producer.ctx.next_blueprint_number(), evmnode_primitives::Quantity::from(1));
    }

    #[test]
    fn kernel_rejection_drops_drained_txs_without_advancing() {
        let (producer, _dir) = test_producer(REJECTS_EVERYTHING_WAT);
        producer.pool.insert(sample_tx(9)).unwrap();

        let produced = producer.produce_block(true, 0).unwrap();
        assert_eq!(produced, 0);
        assert!(producer.pool.is_empty());
        assert_eq!(producer.ctx.next_blueprint_number(), evmnode_primitives::Quantity::ZERO);
    }
}
