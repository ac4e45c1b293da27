//! Cosmos gateway client seam.

use super::{Fill, OrderFillEvent, SubmittedChainTx, TxResult};
use crate::{
    error::ChainError,
    storage::{Order, OrderSettlement},
};
use alloy::primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Gateway operations on a Cosmos chain.
///
/// The solver core drives this trait; the concrete CosmWasm RPC wrapper
/// (connection handling, tx signing and broadcast) is an external
/// collaborator injected at startup. Tests implement it with mocks.
#[async_trait]
pub trait CosmosGateway: Send + Sync + Debug {
    /// The chain this gateway lives on.
    fn chain_id(&self) -> &str;

    /// Bank balance of `address` for `denom`.
    async fn balance(&self, address: &str, denom: &str) -> Result<U256, ChainError>;

    /// Gas-token balance of the solver's signer account.
    async fn signer_gas_balance(&self) -> Result<U256, ChainError>;

    /// Latest committed block height.
    async fn block_height(&self) -> Result<u64, ChainError>;

    /// Executes the gateway's fill for `order`, paying `amount_out` to the
    /// recipient.
    async fn fill_order(&self, order: &Order, gateway: &str)
        -> Result<SubmittedChainTx, ChainError>;

    /// Executes the gateway's settlement initiation for every order in
    /// `batch`, dispatching one hyperlane message to the batch's source
    /// chain.
    async fn initiate_batch_settlement(
        &self,
        batch: &[OrderSettlement],
        gateway: &str,
    ) -> Result<SubmittedChainTx, ChainError>;

    /// Executes the gateway's timeout initiation for an expired unfilled
    /// order, dispatching the refund message to the order's source chain.
    async fn initiate_timeout(
        &self,
        order: &Order,
        gateway: &str,
    ) -> Result<SubmittedChainTx, ChainError>;

    /// All fills `filler` has made at the gateway.
    async fn order_fills_by_filler(
        &self,
        gateway: &str,
        filler: &str,
    ) -> Result<Vec<Fill>, ChainError>;

    /// A fill event for `order_id` if one exists, along with the chain's
    /// current block time.
    async fn query_order_fill_event(
        &self,
        gateway: &str,
        order_id: &str,
    ) -> Result<(Option<OrderFillEvent>, DateTime<Utc>), ChainError>;

    /// Result of a landed transaction. [`ChainError::TxNotFound`] while the
    /// transaction has not been indexed.
    async fn get_tx_result(&self, tx_hash: &str) -> Result<TxResult, ChainError>;
}
