//! CLI and typed configuration for the sequencer/observer node.
//!
//! One `clap::Args` sub-struct per concern, following the convention in
//! reth's `node/core` args module (see e.g. `PerformanceOptimizationArgs`):
//! every configuration field gets a home here, grouped by the component
//! that consumes it.

#![warn(missing_docs)]

mod time_between_blocks;

pub use time_between_blocks::TimeBetweenBlocks;

use clap::{Args, Parser, ValueEnum};
use evmnode_errors::FatalError;
use std::path::PathBuf;
use url::Url;

/// Top-level CLI entry point for `bin/evmnode`.
#[derive(Debug, Parser)]
#[command(name = "evmnode", about = "EVM sequencer/observer node")]
pub struct Cli {
    /// Which role the node runs as.
    #[arg(long, value_enum, default_value_t = Mode::Sequencer)]
    pub mode: Mode,

    /// Directory holding the durable store (content store + sqlite index).
    #[arg(long, env = "EVMNODE_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Path to the WASM kernel module driving every state transition.
    #[arg(long, env = "EVMNODE_KERNEL_PATH")]
    pub kernel_path: PathBuf,

    /// Bootstrap `data_dir` from an existing rollup node's archive
    /// (`EvmContext::init_from_rollup_node`) instead of starting from an
    /// empty or previously-initialized `data_dir`. Only meaningful the
    /// first time a node is brought up against `data_dir`.
    #[arg(long)]
    pub bootstrap_from_rollup_node: Option<PathBuf>,

    #[command(flatten)]
    pub rpc: RpcArgs,

    #[command(flatten)]
    pub rollup: RollupArgs,

    #[command(flatten)]
    pub preimages: PreimagesArgs,

    #[command(flatten)]
    pub sequencer: SequencerArgs,

    #[command(flatten)]
    pub publisher: PublisherArgs,

    #[command(flatten)]
    pub tx_pool: TxPoolArgs,

    #[command(flatten)]
    pub storage: StorageArgs,
}

/// The role this node process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Produces and publishes blueprints.
    Sequencer,
    /// Follows an upstream node's blueprint stream; no tx pool or publishing.
    Observer,
}

impl Cli {
    /// Validates cross-field constraints clap's derive can't express
    /// (e.g. `max_blueprints_lag < max_blueprints_catchup`), returning a
    /// [`FatalError::Configuration`] on failure so `bin/evmnode` can exit 1.
    pub fn validate(&self) -> Result<(), FatalError> {
        if self.mode == Mode::Observer && self.rollup.evm_node_endpoint.is_none() {
            return Err(FatalError::Configuration(
                "observer mode requires --evm-node-endpoint".to_string(),
            ));
        }
        if self.mode == Mode::Sequencer && self.rollup.rollup_node_endpoint.is_none() {
            return Err(FatalError::Configuration(
                "sequencer mode requires --rollup-node-endpoint".to_string(),
            ));
        }
        if self.publisher.max_blueprints_lag >= self.publisher.max_blueprints_catchup {
            return Err(FatalError::Configuration(format!(
                "max_blueprints_lag ({}) must be less than max_blueprints_catchup ({})",
                self.publisher.max_blueprints_lag, self.publisher.max_blueprints_catchup
            )));
        }
        Ok(())
    }
}

/// JSON-RPC HTTP surface configuration.
///
/// The server and method dispatch are out of scope here; only the
/// configuration shape is modeled so a future RPC crate can be wired in
/// without reshaping this struct.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "RPC")]
pub struct RpcArgs {
    /// Address the JSON-RPC server binds to.
    #[arg(long = "rpc.addr", default_value = "127.0.0.1")]
    pub rpc_addr: String,

    /// Port the JSON-RPC server listens on.
    #[arg(long = "rpc.port", default_value_t = 8545)]
    pub rpc_port: u16,

    /// Optional separate port for a restricted/private RPC surface.
    #[arg(long = "rpc.private-port")]
    pub private_rpc_port: Option<u16>,

    /// Allowed CORS origins.
    #[arg(long = "rpc.cors-origins", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Allowed CORS headers.
    #[arg(long = "rpc.cors-headers", value_delimiter = ',')]
    pub cors_headers: Vec<String>,

    /// Maximum number of concurrently open RPC connections.
    #[arg(long = "rpc.max-active-connections", default_value_t = 400)]
    pub max_active_connections: u32,
}

/// Endpoints for the rollup node (sequencer mode) and upstream node
/// (observer mode).
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Rollup")]
pub struct RollupArgs {
    /// Rollup node HTTP endpoint. Required in sequencer mode.
    #[arg(long = "rollup-node-endpoint", env = "EVMNODE_ROLLUP_NODE_ENDPOINT")]
    pub rollup_node_endpoint: Option<Url>,

    /// Upstream EVM node endpoint to follow. Required in observer mode.
    #[arg(long = "evm-node-endpoint", env = "EVMNODE_EVM_NODE_ENDPOINT")]
    pub evm_node_endpoint: Option<Url>,
}

/// Preimage resolution configuration for the kernel runner.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Preimages")]
pub struct PreimagesArgs {
    /// Local directory used as the preimage cache.
    #[arg(long = "preimages")]
    pub preimages: PathBuf,

    /// Optional remote preimage service, consulted on local cache miss.
    #[arg(long = "preimages-endpoint")]
    pub preimages_endpoint: Option<Url>,
}

/// Block production scheduling for the sequencer loop.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Sequencer")]
pub struct SequencerArgs {
    /// How often to attempt producing a block: `never` or a duration
    /// such as `2s`.
    #[arg(long = "time-between-blocks", default_value = "never")]
    pub time_between_blocks: TimeBetweenBlocks,

    /// Maximum number of chunks a blueprint payload may be split into
    /// before publication, if the rollup node imposes one.
    #[arg(long = "max-number-of-chunks")]
    pub max_number_of_chunks: Option<u32>,
}

/// Publisher lag/catch-up tolerance.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Publisher")]
pub struct PublisherArgs {
    /// Blueprints committed locally but not yet acknowledged by the
    /// rollup node before the publisher considers itself lagging.
    #[arg(long = "max-blueprints-lag", default_value_t = 100)]
    pub max_blueprints_lag: u64,

    /// Upper bound on outstanding unacknowledged blueprints before
    /// catch-up mode backs off entirely.
    #[arg(long = "max-blueprints-catchup", default_value_t = 1000)]
    pub max_blueprints_catchup: u64,

    /// Minimum time to wait between catch-up publication bursts.
    #[arg(long = "catchup-cooldown", value_parser = humantime::parse_duration, default_value = "60s")]
    pub catchup_cooldown: std::time::Duration,
}

/// Pending-transaction pool bounds.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Tx Pool")]
pub struct TxPoolArgs {
    /// How long a transaction may sit in the pool before it is evicted.
    #[arg(long = "tx-pool.timeout-limit", value_parser = humantime::parse_duration, default_value = "3600s")]
    pub tx_pool_timeout_limit: std::time::Duration,

    /// Maximum number of distinct sender addresses tracked at once.
    #[arg(long = "tx-pool.addr-limit", default_value_t = 4000)]
    pub tx_pool_addr_limit: u32,

    /// Maximum number of pending transactions per sender address.
    #[arg(long = "tx-pool.tx-per-addr-limit", default_value_t = 16)]
    pub tx_pool_tx_per_addr_limit: u32,
}

/// Durable store configuration.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Storage")]
pub struct StorageArgs {
    /// Keep the underlying store handle open between requests rather
    /// than reopening it per operation.
    #[arg(long = "keep-alive", default_value_t = true)]
    pub keep_alive: bool,

    /// SQLite journal mode for the auxiliary index.
    #[arg(long = "sqlite-journal-mode", default_value = "wal")]
    pub sqlite_journal_mode: SqliteJournalMode,
}

/// SQLite journal mode for the auxiliary index database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SqliteJournalMode {
    /// Write-ahead log; allows concurrent readers during a write.
    Wal,
    /// Classic rollback journal; simpler, less concurrent.
    Delete,
}

impl SqliteJournalMode {
    /// The `PRAGMA journal_mode` value to issue.
    #[must_use]
    pub const fn as_pragma(self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec![
            "evmnode",
            "--data-dir",
            "/tmp/evmnode",
            "--kernel-path",
            "/tmp/kernel.wasm",
            "--preimages",
            "/tmp/preimages",
        ]
    }

    #[test]
    fn sequencer_mode_requires_rollup_endpoint() {
        let cli = Cli::parse_from(base_args());
        assert!(cli.validate().is_err());
    }

    #[test]
    fn sequencer_mode_with_endpoint_validates() {
        let mut args = base_args();
        args.extend(["--rollup-node-endpoint", "http://localhost:8932"]);
        let cli = Cli::parse_from(args);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn lag_must_be_below_catchup() {
        let mut args = base_args();
        args.extend([
            "--rollup-node-endpoint",
            "http://localhost:8932",
            "--max-blueprints-lag",
            "2000",
            "--max-blueprints-catchup",
            "1000",
        ]);
        let cli = Cli::parse_from(args);
        assert!(cli.validate().is_err());
    }
}
