//! # Fast-Transfer Solver
//!
//! An off-chain operator that observes fast-transfer order events on EVM
//! source chains, fills them on Cosmos destination chains, settles batched
//! claims back to the source chain over Hyperlane, and continuously
//! rebalances its USDC inventory across chains.

pub mod chains;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod fulfiller;
pub mod keys;
pub mod metrics;
pub mod monitor;
pub mod price;
pub mod rebalancer;
pub mod relayer;
pub mod serde;
pub mod settler;
pub mod spawn;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;
