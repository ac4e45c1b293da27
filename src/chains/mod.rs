//! Uniform client interface over EVM and Cosmos fast-transfer gateways.
//!
//! The loops never inspect chain types: they resolve a [`ChainClient`]
//! through the [`ClientManager`] and call the capability set. The EVM
//! variant is implemented directly over alloy; the Cosmos variant dispatches
//! into a [`CosmosGateway`] trait object whose concrete RPC wiring lives
//! outside the solver core.

pub mod cosmos;
pub mod evm;

pub use cosmos::CosmosGateway;
pub use evm::EvmClient;

use crate::{
    config::{ChainType, SolverConfig},
    error::ChainError,
    keys::KeyStore,
    storage::{Order, OrderSettlement},
};
use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

type Result<T> = std::result::Result<T, ChainError>;

/// A fill of an order, as reported by the destination gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    /// Hex-encoded order id.
    pub order_id: String,
    /// Hyperlane domain of the order's source chain.
    pub source_domain: u32,
    /// Amount paid to the recipient, in uusdc.
    pub amount: U256,
}

/// An observed fill event for a specific order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFillEvent {
    /// Transaction that performed the fill.
    pub tx_hash: String,
    /// Address that filled the order.
    pub filler: String,
}

/// Result of a landed transaction.
#[derive(Debug, Clone)]
pub struct TxResult {
    /// Total gas cost of the transaction, in the chain's native unit.
    pub gas_cost: U256,
    /// Failure description, `None` when the transaction succeeded.
    pub failure: Option<String>,
}

/// A transaction the client broadcast.
#[derive(Debug, Clone)]
pub struct SubmittedChainTx {
    /// Transaction hash, hex encoded.
    pub tx_hash: String,
    /// The broadcast payload, hex encoded, kept for the audit log.
    pub raw_tx: String,
}

/// A client for one chain's fast-transfer gateway.
#[derive(Debug)]
pub enum ChainClient {
    Evm(EvmClient),
    Cosmos(Arc<dyn CosmosGateway>),
}

impl ChainClient {
    /// USDC balance of `address`.
    pub async fn balance(&self, address: &str, denom: &str) -> Result<U256> {
        match self {
            Self::Evm(client) => client.balance(address, denom).await,
            Self::Cosmos(gateway) => gateway.balance(address, denom).await,
        }
    }

    /// Gas-token balance of the solver's signer.
    pub async fn signer_gas_balance(&self) -> Result<U256> {
        match self {
            Self::Evm(client) => client.signer_gas_balance().await,
            Self::Cosmos(gateway) => gateway.signer_gas_balance().await,
        }
    }

    /// Current block height.
    pub async fn block_height(&self) -> Result<u64> {
        match self {
            Self::Evm(client) => client.block_height().await,
            Self::Cosmos(gateway) => gateway.block_height().await,
        }
    }

    /// Pays out `order.amount_out` to the recipient via the gateway.
    pub async fn fill_order(&self, order: &Order, gateway: &str) -> Result<SubmittedChainTx> {
        match self {
            Self::Evm(client) => client.fill_order(order, gateway).await,
            Self::Cosmos(cosmos) => cosmos.fill_order(order, gateway).await,
        }
    }

    /// Initiates settlement of a batch of fills on this (destination) chain.
    pub async fn initiate_batch_settlement(
        &self,
        batch: &[OrderSettlement],
        gateway: &str,
    ) -> Result<SubmittedChainTx> {
        match self {
            Self::Evm(_) => Err(ChainError::UnsupportedOperation {
                operation: "initiate_batch_settlement",
                chain_id: self.chain_id().to_string(),
            }),
            Self::Cosmos(gateway_client) => {
                gateway_client.initiate_batch_settlement(batch, gateway).await
            }
        }
    }

    /// Initiates the refund flow for an expired unfilled order on this
    /// (destination) chain.
    pub async fn initiate_timeout(&self, order: &Order, gateway: &str) -> Result<SubmittedChainTx> {
        match self {
            Self::Evm(client) => client.initiate_timeout(order, gateway).await,
            Self::Cosmos(cosmos) => cosmos.initiate_timeout(order, gateway).await,
        }
    }

    /// All fills made by `filler` at the gateway.
    pub async fn order_fills_by_filler(&self, gateway: &str, filler: &str) -> Result<Vec<Fill>> {
        match self {
            Self::Evm(_) => Err(ChainError::UnsupportedOperation {
                operation: "order_fills_by_filler",
                chain_id: self.chain_id().to_string(),
            }),
            Self::Cosmos(cosmos) => cosmos.order_fills_by_filler(gateway, filler).await,
        }
    }

    /// Looks up a fill event for `order_id`, along with the chain's current
    /// block time (used to judge order expiry on the destination's clock).
    pub async fn query_order_fill_event(
        &self,
        gateway: &str,
        order_id: &str,
    ) -> Result<(Option<OrderFillEvent>, DateTime<Utc>)> {
        match self {
            Self::Evm(_) => Err(ChainError::UnsupportedOperation {
                operation: "query_order_fill_event",
                chain_id: self.chain_id().to_string(),
            }),
            Self::Cosmos(cosmos) => cosmos.query_order_fill_event(gateway, order_id).await,
        }
    }

    /// Source-chain status of the order (0 = unfilled).
    pub async fn order_status(&self, gateway: &str, order_id: &str) -> Result<u8> {
        match self {
            Self::Evm(client) => client.order_status(gateway, order_id).await,
            Self::Cosmos(gateway_client) => Err(ChainError::UnsupportedOperation {
                operation: "order_status",
                chain_id: gateway_client.chain_id().to_string(),
            }),
        }
    }

    /// True once the source gateway paid the settlement out to the filler.
    pub async fn is_settlement_complete(&self, gateway: &str, order_id: &str) -> Result<bool> {
        match self {
            Self::Evm(client) => client.is_settlement_complete(gateway, order_id).await,
            Self::Cosmos(gateway_client) => Err(ChainError::UnsupportedOperation {
                operation: "is_settlement_complete",
                chain_id: gateway_client.chain_id().to_string(),
            }),
        }
    }

    /// Whether the order exists at the gateway, optionally pinned to a block,
    /// along with its `amount_in`.
    pub async fn order_exists(
        &self,
        gateway: &str,
        order_id: &str,
        block_height: Option<u64>,
    ) -> Result<(bool, U256)> {
        match self {
            Self::Evm(client) => client.order_exists(gateway, order_id, block_height).await,
            Self::Cosmos(gateway_client) => Err(ChainError::UnsupportedOperation {
                operation: "order_exists",
                chain_id: gateway_client.chain_id().to_string(),
            }),
        }
    }

    /// Whether the order was refunded on the source chain, and the refund tx.
    pub async fn is_order_refunded(
        &self,
        gateway: &str,
        order_id: &str,
    ) -> Result<(bool, Option<String>)> {
        match self {
            Self::Evm(client) => client.is_order_refunded(gateway, order_id).await,
            Self::Cosmos(gateway_client) => Err(ChainError::UnsupportedOperation {
                operation: "is_order_refunded",
                chain_id: gateway_client.chain_id().to_string(),
            }),
        }
    }

    /// Result of a landed transaction. [`ChainError::TxNotFound`] while the
    /// transaction is not indexed yet.
    pub async fn get_tx_result(&self, tx_hash: &str) -> Result<TxResult> {
        match self {
            Self::Evm(client) => client.get_tx_result(tx_hash).await,
            Self::Cosmos(cosmos) => cosmos.get_tx_result(tx_hash).await,
        }
    }

    fn chain_id(&self) -> &str {
        match self {
            Self::Evm(client) => client.chain_id(),
            Self::Cosmos(cosmos) => cosmos.chain_id(),
        }
    }
}

/// Maps chain ids to lazily constructed [`ChainClient`]s.
#[derive(Debug)]
pub struct ClientManager {
    config: Arc<SolverConfig>,
    keystore: KeyStore,
    cosmos_gateways: HashMap<String, Arc<dyn CosmosGateway>>,
    clients: Mutex<HashMap<String, Arc<ChainClient>>>,
}

impl ClientManager {
    /// Creates a manager that builds EVM clients from the config and key
    /// store, and serves the registered Cosmos gateways.
    pub fn new(
        config: Arc<SolverConfig>,
        keystore: KeyStore,
        cosmos_gateways: HashMap<String, Arc<dyn CosmosGateway>>,
    ) -> Self {
        Self { config, keystore, cosmos_gateways, clients: Mutex::new(HashMap::new()) }
    }

    /// Returns the client for `chain_id`, constructing it on first use.
    pub async fn client(&self, chain_id: &str) -> Result<Arc<ChainClient>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(chain_id) {
            return Ok(client.clone());
        }

        let chain = self
            .config
            .chains
            .get(chain_id)
            .ok_or_else(|| ChainError::UnknownChain(chain_id.to_string()))?;

        let client = match chain.chain_type {
            ChainType::Evm => Arc::new(ChainClient::Evm(
                EvmClient::connect(self.config.clone(), chain, &self.keystore).await?,
            )),
            ChainType::Cosmos => Arc::new(ChainClient::Cosmos(
                self.cosmos_gateways
                    .get(chain_id)
                    .ok_or_else(|| ChainError::UnknownChain(chain_id.to_string()))?
                    .clone(),
            )),
        };

        clients.insert(chain_id.to_string(), client.clone());
        Ok(client)
    }
}
