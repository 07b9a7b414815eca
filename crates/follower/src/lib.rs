//! The delayed-inbox follower: polls the rollup node at a fixed
//! interval for new delayed transactions, kernel/sequencer upgrades, and
//! L1 finalization signals, and feeds them into [`EvmContext`]
//! at-most-once per level.

#![warn(missing_docs)]

mod error;
mod source;

pub use error::FollowerError;
pub use source::{DelayedInboxSource, L1LevelEvents, RollupNodeInboxSource};

use std::sync::Arc;
use std::time::Duration;

use evmnode_context::EvmContext;
use evmnode_kernel::InboxMessage;
use evmnode_primitives::Quantity;
use evmnode_tasks::GracefulShutdown;
use tracing::{debug, info, warn};

/// Tunables for one follower instance.
#[derive(Debug, Clone)]
pub struct FollowerConfig {
    /// How often to poll the source for a new level.
    pub poll_interval: Duration,
    /// The cursor key this follower's progress is persisted under, a
    /// per-event-source monotonic cursor. Distinct sources (e.g. the
    /// primary rollup node vs. a fallback) use distinct names so their
    /// cursors never collide.
    pub source_name: String,
}

/// A transform applied to every [`L1LevelEvents`] before it is fed into
/// the context. The identity transform (sequencer mode) keeps
/// everything; observer mode strips `delayed_transactions` since it
/// only trusts the upstream sequencer's own stream for those.
pub type EventFilter = Box<dyn Fn(L1LevelEvents) -> L1LevelEvents + Send + Sync>;

/// Strips delayed transactions, keeping kernel-upgrade and finalization
/// signals. Use via [`DelayedInboxFollower::with_filter`] in observer
/// mode.
#[must_use]
pub fn ignore_delayed_transactions() -> EventFilter {
    Box::new(|mut events: L1LevelEvents| {
        events.delayed_transactions.clear();
        events
    })
}

/// Polls `source` and integrates its events into `ctx`.
pub struct DelayedInboxFollower<S: DelayedInboxSource> {
    ctx: Arc<EvmContext>,
    source: S,
    config: FollowerConfig,
    filter: Option<EventFilter>,
    on_finalized: Option<Box<dyn Fn(Quantity) + Send + Sync>>,
}

impl<S: DelayedInboxSource> DelayedInboxFollower<S> {
    /// Builds a follower that keeps every event it observes.
    #[must_use]
    pub fn new(ctx: Arc<EvmContext>, source: S, config: FollowerConfig) -> Self {
        Self { ctx, source, config, filter: None, on_finalized: None }
    }

    /// Installs a transform applied to every polled [`L1LevelEvents`]
    /// before it reaches the context.
    #[must_use]
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Installs a callback invoked with the finalized blueprint number
    /// whenever a level carries a finalization signal — the follower's
    /// link to the publisher's `record_seen_on_chain`.
    #[must_use]
    pub fn on_finalized(mut self, callback: impl Fn(Quantity) + Send + Sync + 'static) -> Self {
        self.on_finalized = Some(Box::new(callback));
        self
    }

    /// Runs until `shutdown` fires, polling `source` on
    /// `config.poll_interval`.
    pub async fn run(self, shutdown: GracefulShutdown) -> eyre::Result<()> {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                () = shutdown.wait() => {
                    info!(target: "follower", source = %self.config.source_name, "shutting down");
                    return Ok(());
                }
                _ = interval.tick() => {}
            }

            match self.poll_once().await {
                Ok(0) => {}
                Ok(applied) => debug!(target: "follower", source = %self.config.source_name, applied, "advanced delayed-inbox cursor"),
                Err(err) if err.is_fatal() => {
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(target: "follower", source = %self.config.source_name, %err, "transient follower error, retrying next tick");
                }
            }
        }
    }

    /// Polls forward from the persisted cursor until the source has no
    /// more levels to offer, applying each level's events at most once.
    /// Returns how many levels were newly applied.
    pub async fn poll_once(&self) -> Result<usize, FollowerError> {
        let mut applied = 0usize;
        loop {
            let cursor = self.ctx.delayed_inbox_cursor(&self.config.source_name)?;
            let next_level = cursor.map_or(0, |c| c.as_u64() + 1);

            let Some(events) = self.source.poll_level(next_level).await? else {
                break;
            };
            let events = match &self.filter {
                Some(filter) => filter(events),
                None => events,
            };

            if !events.delayed_transactions.is_empty() {
                let messages = events
                    .delayed_transactions
                    .iter()
                    .map(|tx| InboxMessage(tx.raw.to_vec()))
                    .collect::<Vec<_>>();
                self.ctx.apply_evm_events(messages);
            }
            if let Some(upgrade) = &events.kernel_upgrade {
                self.ctx.schedule_kernel_upgrade(self.ctx.next_blueprint_number(), upgrade)?;
            }
            if let Some(finalized) = events.finalized_blueprint {
                if let Some(callback) = &self.on_finalized {
                    callback(finalized);
                }
            }

            self.ctx.persist_delayed_inbox_cursor(&self.config.source_name, Quantity::from(next_level))?;
            applied += 1;
        }
        Ok(applied)
    }
}

impl<S: DelayedInboxSource> std::fmt::Debug for DelayedInboxFollower<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedInboxFollower").field("source_name", &self.config.source_name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FakeSource;
    use alloy_primitives::{Address, B256};
    use evmnode_primitives::{DelayedTx, RollupAddress, TxHash};
    use std::sync::atomic::{AtomicU64, Ordering};

    const NOOP_WAT: &str = r#"(module (memory (export "memory") 1) (func (export "kernel_run")))"#;

    fn test_ctx() -> (Arc<EvmContext>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let kernel_path = dir.path().join("kernel.wat");
        std::fs::write(&kernel_path, NOOP_WAT).unwrap();
        let (ctx, _) =
            EvmContext::init_in_memory(kernel_path, RollupAddress::from(Address::repeat_byte(1))).unwrap();
        (Arc::new(ctx), dir)
    }

    fn config() -> FollowerConfig {
        FollowerConfig { poll_interval: Duration::from_millis(10), source_name: "l1".to_string() }
    }

    #[tokio::test]
    async fn advances_cursor_and_queues_delayed_txs() {
        let (ctx, _dir) = test_ctx();
        let source = FakeSource::default();
        source.levels.lock().unwrap().insert(0, L1LevelEvents {
            delayed_transactions: vec![DelayedTx {
                hash: TxHash::from(B256::repeat_byte(1)),
                raw: alloy_primitives::Bytes::from_static(b"delayed"),
            }],
            ..Default::default()
        });

        let follower = DelayedInboxFollower::new(ctx.clone(), source, config());
        let applied = follower.poll_once().await.unwrap();
        assert_eq!(applied, 1);
        assert_eq!(ctx.delayed_inbox_cursor("l1").unwrap(), Some(Quantity::ZERO));

        // polling again with nothing new at level 1 is a no-op
        assert_eq!(follower.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cursor_is_monotonic_and_processes_levels_in_order() {
        let (ctx, _dir) = test_ctx();
        let source = FakeSource::default();
        {
            let mut levels = source.levels.lock().unwrap();
            levels.insert(0, L1LevelEvents::default());
            levels.insert(1, L1LevelEvents::default());
            levels.insert(2, L1LevelEvents::default());
        }
        let follower = DelayedInboxFollower::new(ctx.clone(), source, config());
        assert_eq!(follower.poll_once().await.unwrap(), 3);
        assert_eq!(ctx.delayed_inbox_cursor("l1").unwrap(), Some(Quantity::from(2)));
    }

    #[tokio::test]
    async fn filter_strips_delayed_transactions_in_observer_mode() {
        let (ctx, _dir) = test_ctx();
        let source = FakeSource::default();
        source.levels.lock().unwrap().insert(0, L1LevelEvents {
            delayed_transactions: vec![DelayedTx {
                hash: TxHash::from(B256::repeat_byte(2)),
                raw: alloy_primitives::Bytes::from_static(b"delayed"),
            }],
            ..Default::default()
        });

        let follower = DelayedInboxFollower::new(ctx.clone(), source, config())
            .with_filter(ignore_delayed_transactions());
        follower.poll_once().await.unwrap();
        // apply_evm_events was never called with anything, so a noop-kernel
        // blueprint still produces zero blocks (rejected) rather than
        // carrying the delayed tx through; this is exercised at the
        // context layer, so here we only assert the cursor advanced.
        assert_eq!(ctx.delayed_inbox_cursor("l1").unwrap(), Some(Quantity::ZERO));
    }

    #[tokio::test]
    async fn finalized_level_invokes_callback() {
        let (ctx, _dir) = test_ctx();
        let source = FakeSource::default();
        source.levels.lock().unwrap().insert(
            0,
            L1LevelEvents { finalized_blueprint: Some(Quantity::from(7)), ..Default::default() },
        );
        let seen = Arc::new(AtomicU64::new(u64::MAX));
        let seen_clone = seen.clone();
        let follower = DelayedInboxFollower::new(ctx, source, config())
            .on_finalized(move |n| seen_clone.store(n.as_u64(), Ordering::SeqCst));
        follower.poll_once().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
