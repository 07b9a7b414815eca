//! The blueprints publisher: a long-running worker that guarantees
//! *eventual* injection of every committed blueprint into the L1 rollup
//! inbox, tolerating L1 lag via catch-up re-publication.
//!
//! The publisher never holds the blueprint queue purely in memory: its
//! source of truth is [`evmnode_context::EvmContext`]'s committed
//! history plus the `publisher_state` high-water-mark persisted
//! alongside it. The in-process blueprint broadcast
//! (`EvmContext::subscribe_blueprints`) is only a wake-up signal — a
//! lagged or dropped broadcast message never loses a blueprint, since
//! every wake-up re-scans forward from the persisted mark.

#![warn(missing_docs)]

mod error;

pub use error::PublisherError;

use std::{sync::Arc, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use evmnode_context::EvmContext;
use evmnode_primitives::Quantity;
use evmnode_rollup_client::{RollupClient, RollupClientError};
use evmnode_tasks::GracefulShutdown;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Tunables for the publisher's lag/catch-up behavior.
#[derive(Debug, Clone, Copy)]
pub struct PublisherConfig {
    /// Once `published - acked > max_blueprints_lag`, the publisher
    /// pauses normal publication and enters catch-up mode.
    pub max_blueprints_lag: u64,
    /// Upper bound on how many unacknowledged blueprints a single
    /// catch-up pass re-publishes.
    pub max_blueprints_catchup: u64,
    /// Minimum time between catch-up re-publication attempts.
    pub catchup_cooldown: Duration,
    /// How often the main loop wakes even without a broadcast
    /// notification, so a missed wake-up is never fatal to liveness.
    pub poll_interval: Duration,
}

/// The outcome of a single [`BlueprintsPublisher::publish_one`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishProgress {
    /// Published the given (previously unpublished) blueprint number.
    Published(Quantity),
    /// Nothing to publish; the publisher is fully caught up.
    Idle,
    /// Ran one catch-up re-publication pass.
    CaughtUp,
}

/// Ships every committed blueprint to the rollup node's inbox.
#[derive(Debug)]
pub struct BlueprintsPublisher {
    ctx: Arc<EvmContext>,
    client: RollupClient,
    config: PublisherConfig,
}

impl BlueprintsPublisher {
    /// Builds a publisher targeting `client`, reading and writing its
    /// crash-safe high-water-mark through `ctx`.
    #[must_use]
    pub fn new(ctx: Arc<EvmContext>, client: RollupClient, config: PublisherConfig) -> Self {
        Self { ctx, client, config }
    }

    /// Runs until `shutdown` fires.
    ///
    /// Takes `&self` rather than `self` so a caller can hold a shared
    /// [`std::sync::Arc`] and use it both to drive this loop and to call
    /// [`Self::record_seen_on_chain`] from the follower's finalization
    /// callback concurrently.
    pub async fn run(&self, shutdown: GracefulShutdown) -> eyre::Result<()> {
        let mut blueprints = self.ctx.subscribe_blueprints();
        loop {
            tokio::select! {
                () = shutdown.wait() => {
                    info!(target: "publisher", "shutting down");
                    return Ok(());
                }
                result = blueprints.recv() => {
                    if let Err(RecvError::Lagged(skipped)) = result {
                        metrics::counter!("publisher.watcher_lagged").increment(1);
                        warn!(target: "publisher", skipped, "blueprint watcher lagged, falling back to a store scan");
                    }
                }
                () = sleep(self.config.poll_interval) => {}
            }

            loop {
                match self.publish_one().await {
                    Ok(PublishProgress::Published(number)) => {
                        debug!(target: "publisher", %number, "published blueprint");
                    }
                    Ok(PublishProgress::CaughtUp) | Ok(PublishProgress::Idle) => break,
                    Err(err) if err.is_fatal() => {
                        error!(target: "publisher", %err, "permanent rollup node rejection, blueprint stays queued");
                        return Err(err.into());
                    }
                    Err(err) => {
                        warn!(target: "publisher", %err, "transient publish failure, will retry next wake-up");
                        break;
                    }
                }
            }
        }
    }

    /// Advances publication by exactly one step. Exposed directly so
    /// tests can drive the state machine without a running loop.
    pub async fn publish_one(&self) -> Result<PublishProgress, PublisherError> {
        let (published, acked) = self.ctx.publisher_high_water_mark()?;
        let next_committed = self.ctx.next_blueprint_number();

        if published >= next_committed {
            return Ok(PublishProgress::Idle);
        }

        let lag = published.as_u64().saturating_sub(acked.as_u64());
        if lag > self.config.max_blueprints_lag {
            return self.catch_up(acked, published).await;
        }

        self.publish(published).await?;
        self.ctx.persist_publisher_high_water_mark(published.next(), acked)?;
        Ok(PublishProgress::Published(published))
    }

    async fn catch_up(&self, acked: Quantity, published: Quantity) -> Result<PublishProgress, PublisherError> {
        if published.as_u64() == 0 {
            return Ok(PublishProgress::Idle);
        }
        let last_unacked = Quantity::from(published.as_u64() - 1);
        info!(target: "publisher", %acked, %last_unacked, "entering catch-up mode");

        let mut number = acked;
        let mut republished = 0u64;
        while number <= last_unacked && republished < self.config.max_blueprints_catchup {
            self.publish(number).await?;
            republished += 1;
            number = number.next();
            if number <= last_unacked && republished < self.config.max_blueprints_catchup {
                sleep(self.config.catchup_cooldown).await;
            }
        }
        Ok(PublishProgress::CaughtUp)
    }

    async fn publish(&self, number: Quantity) -> Result<(), PublisherError> {
        let blueprint = self.ctx.blueprint(number)?;
        let client = &self.client;
        let payload = blueprint.payload;
        (|| async { client.inject_batch(std::slice::from_ref(&payload)).await })
            .retry(ExponentialBuilder::default().with_jitter().with_max_delay(Duration::from_secs(2)))
            .when(|err: &RollupClientError| !err.is_fatal())
            .await
            .map_err(PublisherError::from)
    }

    /// Records that `number` has been acknowledged by, or observed
    /// on-chain at its expected level by, the rollup node. Called by
    /// the follower once it sees the corresponding L1 finalization
    /// signal; exposed publicly so tests can simulate acks directly.
    pub fn record_seen_on_chain(&self, number: Quantity) -> Result<(), PublisherError> {
        let (published, acked) = self.ctx.publisher_high_water_mark()?;
        let candidate = number.next();
        let acked = if candidate > acked { candidate } else { acked };
        self.ctx.persist_publisher_high_water_mark(published, acked)?;
        Ok(())
    }
}
