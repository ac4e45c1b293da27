//! # Fast-Transfer Solver
//!
//! Observes fast-transfer orders on EVM source chains, fills them on Cosmos
//! destination chains, settles batched claims over Hyperlane, and rebalances
//! its USDC inventory.

use clap::Parser;
use solver::{cli::Args, spawn};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    if let Err(err) = spawn::try_spawn_with_args(args, Default::default()).await {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
