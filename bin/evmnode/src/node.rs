//! Constructs the node's components from a parsed [`Cli`] and runs them
//! to completion, dispatching on [`Mode`].

use std::sync::Arc;
use std::time::Duration;

use evmnode_config::{Cli, Mode, SqliteJournalMode};
use evmnode_context::EvmContext;
use evmnode_errors::FatalError;
use evmnode_follower::{ignore_delayed_transactions, DelayedInboxFollower, FollowerConfig, RollupNodeInboxSource};
use evmnode_observer::BlueprintObserver;
use evmnode_producer::BlockProducer;
use evmnode_publisher::{BlueprintsPublisher, PublisherConfig};
use evmnode_rollup_client::RollupClient;
use evmnode_store::JournalMode;
use evmnode_tasks::TaskManager;
use evmnode_txpool::{TxPool, TxPoolLimits};
use tracing::info;

/// The bounded time every shutdown finalizer gets before the process
/// aborts.
const FINALIZER_TIMEOUT: Duration = Duration::from_secs(10);

/// The follower's persisted cursor name for the primary rollup/upstream
/// source. A node running more than one follower would give each a
/// distinct name; this node runs exactly one.
const PRIMARY_FOLLOWER_SOURCE: &str = "primary";

/// How often the tx pool sweeps for entries that sat past
/// `tx_pool_timeout_limit` without being drained by a producer or
/// observer.
const TX_POOL_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Builds every component the configured [`Mode`] needs and runs them
/// until shutdown.
pub async fn run(cli: Cli) -> eyre::Result<()> {
    let endpoint = match cli.mode {
        Mode::Sequencer => cli.rollup.rollup_node_endpoint.as_ref(),
        Mode::Observer => cli.rollup.evm_node_endpoint.as_ref(),
    }
    .expect("validated by Cli::validate");

    let client = RollupClient::new(endpoint.clone());
    let rollup_address = client
        .smart_rollup_address()
        .await
        .map_err(|err| FatalError::Configuration(format!("failed to resolve smart rollup address: {err}")))?;
    info!(target: "evmnode", %rollup_address, mode = ?cli.mode, "resolved rollup address");

    let journal_mode = convert_journal_mode(cli.storage.sqlite_journal_mode);
    let ctx = Arc::new(build_context(&cli, rollup_address, journal_mode)?);

    let pool = Arc::new(TxPool::new(TxPoolLimits {
        timeout: cli.tx_pool.tx_pool_timeout_limit,
        addr_limit: cli.tx_pool.tx_pool_addr_limit as usize,
        tx_per_addr_limit: cli.tx_pool.tx_pool_tx_per_addr_limit as usize,
    }));

    let mut manager = TaskManager::new(FINALIZER_TIMEOUT);
    let executor = manager.executor();

    executor.spawn_critical_with_graceful_shutdown_signal("tx-pool-sweep", {
        let pool = pool.clone();
        move |shutdown| async move {
            pool.run_sweep_loop(shutdown, TX_POOL_SWEEP_INTERVAL).await;
            Ok(())
        }
    });

    match cli.mode {
        Mode::Sequencer => {
            let publisher = Arc::new(BlueprintsPublisher::new(
                ctx.clone(),
                client.clone(),
                PublisherConfig {
                    max_blueprints_lag: cli.publisher.max_blueprints_lag,
                    max_blueprints_catchup: cli.publisher.max_blueprints_catchup,
                    catchup_cooldown: cli.publisher.catchup_cooldown,
                    poll_interval: Duration::from_millis(500),
                },
            ));

            let follower = DelayedInboxFollower::new(
                ctx.clone(),
                RollupNodeInboxSource::new(client.clone()),
                FollowerConfig { poll_interval: Duration::from_secs(5), source_name: PRIMARY_FOLLOWER_SOURCE.to_string() },
            )
            .on_finalized({
                let publisher = publisher.clone();
                move |number| {
                    if let Err(err) = publisher.record_seen_on_chain(number) {
                        tracing::warn!(target: "evmnode", %err, %number, "failed to record finalization ack");
                    }
                }
            });

            let producer = BlockProducer::new(ctx.clone(), pool.clone(), cli.sequencer.time_between_blocks);

            executor.spawn_critical_with_graceful_shutdown_signal("producer", move |shutdown| producer.run(shutdown));
            executor.spawn_critical_with_graceful_shutdown_signal("follower", move |shutdown| follower.run(shutdown));
            let publisher_task = publisher;
            executor.spawn_critical_with_graceful_shutdown_signal("publisher", move |shutdown| async move {
                publisher_task.run(shutdown).await
            });

            register_shutdown_log(&mut manager, "tx-pool-sweep");
            register_shutdown_log(&mut manager, "follower");
            register_shutdown_log(&mut manager, "producer");
            register_shutdown_log(&mut manager, "publisher");
            register_context_finalizer(&mut manager, ctx.clone());
        }
        Mode::Observer => {
            let follower = DelayedInboxFollower::new(
                ctx.clone(),
                RollupNodeInboxSource::new(client.clone()),
                FollowerConfig { poll_interval: Duration::from_secs(5), source_name: PRIMARY_FOLLOWER_SOURCE.to_string() },
            )
            .with_filter(ignore_delayed_transactions());

            let observer = BlueprintObserver::new(ctx.clone(), client, pool.clone(), cli.sequencer.time_between_blocks);

            executor.spawn_critical_with_graceful_shutdown_signal("follower", move |shutdown| follower.run(shutdown));
            executor.spawn_critical_with_graceful_shutdown_signal("observer", move |shutdown| observer.run(shutdown));

            register_shutdown_log(&mut manager, "tx-pool-sweep");
            register_shutdown_log(&mut manager, "follower");
            register_shutdown_log(&mut manager, "observer");
            register_context_finalizer(&mut manager, ctx.clone());
        }
    }

    if manager.run_until_shutdown().await {
        return Err(FatalError::StateInconsistency("a critical task failed".to_string()).into());
    }
    Ok(())
}

fn build_context(cli: &Cli, rollup_address: evmnode_primitives::RollupAddress, journal_mode: JournalMode) -> Result<EvmContext, FatalError> {
    let context_result = match &cli.bootstrap_from_rollup_node {
        Some(archive_dir) => EvmContext::init_from_rollup_node(
            cli.data_dir.clone(),
            archive_dir.clone(),
            cli.preimages.preimages.clone(),
            cli.preimages.preimages_endpoint.clone(),
            rollup_address,
            cli.kernel_path.clone(),
            journal_mode,
        )
        .map(|ctx| (ctx, true)),
        None => EvmContext::init(
            cli.data_dir.clone(),
            cli.preimages.preimages.clone(),
            cli.preimages.preimages_endpoint.clone(),
            rollup_address,
            cli.kernel_path.clone(),
            journal_mode,
        ),
    };

    let (ctx, loaded_from_disk) = context_result.map_err(|err| {
        if err.is_fatal() {
            FatalError::StateInconsistency(err.to_string())
        } else {
            FatalError::Configuration(err.to_string())
        }
    })?;
    info!(target: "evmnode", loaded_from_disk, next_blueprint_number = %ctx.next_blueprint_number(), "context ready");
    Ok(ctx)
}

fn convert_journal_mode(mode: SqliteJournalMode) -> JournalMode {
    match mode {
        SqliteJournalMode::Wal => JournalMode::Wal,
        SqliteJournalMode::Delete => JournalMode::Delete,
    }
}

fn register_shutdown_log(manager: &mut TaskManager, name: &'static str) {
    manager.register_finalizer(name, move || async move {
        info!(target: "evmnode", component = name, "stopped");
    });
}

fn register_context_finalizer(manager: &mut TaskManager, ctx: Arc<EvmContext>) {
    manager.register_finalizer("context", move || async move {
        info!(
            target: "evmnode",
            next_blueprint_number = %ctx.next_blueprint_number(),
            current_block_hash = %ctx.current_block_hash(),
            "final commit state at shutdown"
        );
    });
}
