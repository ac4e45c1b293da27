//! Persisted row types.

use crate::{
    error::StorageError,
    types::{
        OrderStatus, RebalanceStatus, SettlementStatus, TransferStatus, TxStatus, TxType,
    },
};
use alloy::primitives::U256;
use chrono::{DateTime, Utc};

fn parse_amount(entity: &'static str, amount: &str) -> Result<U256, StorageError> {
    amount
        .parse()
        .map_err(|_| StorageError::InvalidAmount { entity, amount: amount.to_string() })
}

/// Natural key of an order row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderKey {
    /// Chain the order was submitted on.
    pub source_chain_id: String,
    /// Gateway contract that emitted the order.
    pub source_chain_gateway_address: String,
    /// Order id emitted by the gateway, hex encoded.
    pub order_id: String,
}

/// One row per observed source-chain order.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Order {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_chain_id: String,
    pub destination_chain_id: String,
    pub source_chain_gateway_address: String,
    pub sender: Vec<u8>,
    pub recipient: Vec<u8>,
    pub amount_in: String,
    pub amount_out: String,
    pub nonce: i64,
    pub order_id: String,
    pub order_status: OrderStatus,
    pub order_status_message: Option<String>,
    pub fill_tx: Option<String>,
    pub filler: Option<String>,
    pub refund_tx: Option<String>,
    pub order_creation_tx: String,
    pub order_creation_tx_block_height: i64,
    pub timeout_timestamp: DateTime<Utc>,
    pub data: Option<String>,
}

impl Order {
    /// The order's natural key.
    pub fn key(&self) -> OrderKey {
        OrderKey {
            source_chain_id: self.source_chain_id.clone(),
            source_chain_gateway_address: self.source_chain_gateway_address.clone(),
            order_id: self.order_id.clone(),
        }
    }

    pub fn amount_in(&self) -> Result<U256, StorageError> {
        parse_amount("order", &self.amount_in)
    }

    pub fn amount_out(&self) -> Result<U256, StorageError> {
        parse_amount("order", &self.amount_out)
    }
}

/// Insert parameters for [`Order`].
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub source_chain_id: String,
    pub destination_chain_id: String,
    pub source_chain_gateway_address: String,
    pub sender: Vec<u8>,
    pub recipient: Vec<u8>,
    pub amount_in: String,
    pub amount_out: String,
    pub nonce: u32,
    pub order_id: String,
    pub order_creation_tx: String,
    pub order_creation_tx_block_height: u64,
    pub timeout_timestamp: DateTime<Utc>,
    pub data: Option<String>,
}

/// One row per filled order whose source-chain payout is outstanding.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderSettlement {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_chain_id: String,
    pub destination_chain_id: String,
    pub source_chain_gateway_address: String,
    pub order_id: String,
    pub amount: String,
    pub settlement_status: SettlementStatus,
    pub settlement_status_message: Option<String>,
    pub initiate_settlement_tx: Option<String>,
    pub complete_settlement_tx: Option<String>,
}

impl OrderSettlement {
    /// Natural key of the settled order.
    pub fn order_key(&self) -> OrderKey {
        OrderKey {
            source_chain_id: self.source_chain_id.clone(),
            source_chain_gateway_address: self.source_chain_gateway_address.clone(),
            order_id: self.order_id.clone(),
        }
    }

    pub fn amount(&self) -> Result<U256, StorageError> {
        parse_amount("order settlement", &self.amount)
    }
}

/// Insert parameters for [`OrderSettlement`].
#[derive(Debug, Clone)]
pub struct NewOrderSettlement {
    pub source_chain_id: String,
    pub destination_chain_id: String,
    pub source_chain_gateway_address: String,
    pub order_id: String,
    pub amount: String,
}

/// One row per hyperlane message the relayer must deliver.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HyperlaneTransfer {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_chain_id: String,
    pub destination_chain_id: String,
    pub message_id: String,
    pub message_sent_tx: String,
    pub transfer_status: TransferStatus,
    pub transfer_status_message: Option<String>,
    pub max_tx_fee_uusdc: Option<String>,
}

impl HyperlaneTransfer {
    pub fn max_tx_fee_uusdc(&self) -> Result<Option<U256>, StorageError> {
        self.max_tx_fee_uusdc
            .as_deref()
            .map(|amount| parse_amount("hyperlane transfer", amount))
            .transpose()
    }
}

/// Insert parameters for [`HyperlaneTransfer`].
#[derive(Debug, Clone)]
pub struct NewHyperlaneTransfer {
    pub source_chain_id: String,
    pub destination_chain_id: String,
    pub message_id: String,
    pub message_sent_tx: String,
    pub max_tx_fee_uusdc: Option<String>,
}

/// One row per inventory move between chains.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RebalanceTransfer {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tx_hash: String,
    pub source_chain_id: String,
    pub destination_chain_id: String,
    pub amount: String,
    pub status: RebalanceStatus,
}

impl RebalanceTransfer {
    pub fn amount(&self) -> Result<U256, StorageError> {
        parse_amount("rebalance transfer", &self.amount)
    }
}

/// Append-only audit log of every broadcast transaction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubmittedTx {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub order_id: Option<i64>,
    pub order_settlement_id: Option<i64>,
    pub hyperlane_transfer_id: Option<i64>,
    pub rebalance_transfer_id: Option<i64>,
    pub chain_id: String,
    pub tx_hash: String,
    pub raw_tx: String,
    pub tx_type: TxType,
    pub tx_status: TxStatus,
    pub tx_status_message: Option<String>,
}

/// Insert parameters for [`SubmittedTx`].
#[derive(Debug, Clone, Default)]
pub struct NewSubmittedTx {
    pub order_id: Option<i64>,
    pub order_settlement_id: Option<i64>,
    pub hyperlane_transfer_id: Option<i64>,
    pub rebalance_transfer_id: Option<i64>,
    pub chain_id: String,
    pub tx_hash: String,
    pub raw_tx: String,
}
