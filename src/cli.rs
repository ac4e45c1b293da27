//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;
use url::Url;

/// The fast-transfer solver.
#[derive(Debug, Clone, Parser)]
#[command(author, about = "Cross-chain fast-transfer solver", long_about = None)]
pub struct Args {
    /// Path to the solver config file.
    #[arg(long, value_name = "PATH", default_value = "./config/local/config.yml")]
    pub config: PathBuf,

    /// Path to the solver keys file.
    #[arg(long, value_name = "PATH", default_value = "./config/local/keys.json")]
    pub keys: PathBuf,

    /// Path to the sqlite database file.
    #[arg(long = "sqlite-db-path", value_name = "PATH", default_value = "./solver.db")]
    pub sqlite_db_path: PathBuf,

    /// On a fresh database, start scanning near the chain head instead of
    /// from genesis.
    #[arg(long)]
    pub quickstart: bool,

    /// Whether the solver should refund timed-out orders.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub refund_orders: bool,

    /// Base URL of the routing API used by the fund rebalancer.
    #[arg(long, value_name = "URL", default_value = "https://api.skip.build")]
    pub routing_api: Url,
}
