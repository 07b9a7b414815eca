//! `evmnode`: the sequencer/observer node binary.
//!
//! Thin by design: this crate owns the `tokio` runtime, CLI parsing,
//! `tracing` installation, and shutdown orchestration, and wires the
//! library crates together. It contains no sequencing/state-transition
//! logic of its own.

mod node;

use clap::Parser;
use evmnode_config::Cli;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    install_tracing();

    if let Err(err) = cli.validate() {
        eprintln!("configuration error: {err}");
        std::process::exit(err.exit_code());
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(node::run(cli)) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            tracing::error!(target: "evmnode", %err, "node exited with an error");
            std::process::exit(err.downcast_ref::<evmnode_errors::FatalError>().map_or(2, evmnode_errors::FatalError::exit_code));
        }
    }
}

/// Installs a `tracing-subscriber` `fmt` layer driven by `RUST_LOG`,
/// defaulting to `info`.
fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
