//! Solver persistence layer.
//!
//! The database is the synchronization point between the solver's loops:
//! every state transition is written here and every row is addressed by its
//! natural key. [`Storage`] wraps a SQLite pool; [`queries`] exposes the same
//! operations generically over any executor so callers can compose several
//! of them into one transaction via [`Storage::begin`].

pub mod queries;
mod rows;

pub use rows::{
    HyperlaneTransfer, NewHyperlaneTransfer, NewOrder, NewOrderSettlement, NewSubmittedTx, Order,
    OrderKey, OrderSettlement, RebalanceTransfer, SubmittedTx,
};

use crate::{
    error::StorageError,
    types::{OrderStatus, RebalanceStatus, SettlementStatus, TransferStatus, TxStatus, TxType},
};
use sqlx::{
    Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::Path;

type Result<T> = std::result::Result<T, StorageError>;

/// Handle to the solver database.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Opens (creating if missing) and migrates the database at `path`.
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        Self::migrate(pool).await
    }

    /// Creates a migrated in-memory database. Used for testing only.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Starts a transaction for multi-row composites.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn insert_order(&self, order: &NewOrder) -> Result<()> {
        queries::insert_order(&self.pool, order).await
    }

    pub async fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        queries::orders_by_status(&self.pool, status).await
    }

    pub async fn order_by_key(&self, key: &OrderKey) -> Result<Order> {
        queries::order_by_key(&self.pool, key).await
    }

    pub async fn set_fill_tx(&self, key: &OrderKey, fill_tx: &str, filler: &str) -> Result<()> {
        queries::set_fill_tx(&self.pool, key, fill_tx, filler).await
    }

    pub async fn set_refund_tx(&self, key: &OrderKey, refund_tx: &str) -> Result<()> {
        queries::set_refund_tx(&self.pool, key, refund_tx).await
    }

    pub async fn set_order_status(
        &self,
        key: &OrderKey,
        status: OrderStatus,
        message: Option<&str>,
    ) -> Result<()> {
        queries::set_order_status(&self.pool, key, status, message).await
    }

    pub async fn insert_order_settlement(&self, settlement: &NewOrderSettlement) -> Result<()> {
        queries::insert_order_settlement(&self.pool, settlement).await
    }

    pub async fn settlements_by_status(
        &self,
        status: SettlementStatus,
    ) -> Result<Vec<OrderSettlement>> {
        queries::settlements_by_status(&self.pool, status).await
    }

    pub async fn set_settlement_status(
        &self,
        key: &OrderKey,
        status: SettlementStatus,
        message: Option<&str>,
    ) -> Result<()> {
        queries::set_settlement_status(&self.pool, key, status, message).await
    }

    pub async fn set_complete_settlement_tx(&self, key: &OrderKey, tx_hash: &str) -> Result<()> {
        queries::set_complete_settlement_tx(&self.pool, key, tx_hash).await
    }

    pub async fn transfers_by_status(
        &self,
        status: TransferStatus,
    ) -> Result<Vec<HyperlaneTransfer>> {
        queries::transfers_by_status(&self.pool, status).await
    }

    pub async fn set_transfer_status(
        &self,
        transfer: &HyperlaneTransfer,
        status: TransferStatus,
        message: Option<&str>,
    ) -> Result<()> {
        queries::set_transfer_status(&self.pool, transfer, status, message).await
    }

    pub async fn transfer_by_message_sent_tx(
        &self,
        source_chain_id: &str,
        message_sent_tx: &str,
    ) -> Result<Option<HyperlaneTransfer>> {
        queries::transfer_by_message_sent_tx(&self.pool, source_chain_id, message_sent_tx).await
    }

    pub async fn insert_hyperlane_transfer(&self, transfer: &NewHyperlaneTransfer) -> Result<()> {
        queries::insert_hyperlane_transfer(&self.pool, transfer).await
    }

    pub async fn insert_submitted_tx(&self, tx: &NewSubmittedTx, tx_type: TxType) -> Result<()> {
        queries::insert_submitted_tx(&self.pool, tx, tx_type).await
    }

    pub async fn submitted_txs_by_order_and_type(
        &self,
        order_row_id: i64,
        tx_type: TxType,
    ) -> Result<Vec<SubmittedTx>> {
        queries::submitted_txs_by_order_and_type(&self.pool, order_row_id, tx_type).await
    }

    pub async fn submitted_txs_by_transfer(&self, transfer_row_id: i64) -> Result<Vec<SubmittedTx>> {
        queries::submitted_txs_by_transfer(&self.pool, transfer_row_id).await
    }

    pub async fn set_submitted_tx_status(
        &self,
        chain_id: &str,
        tx_hash: &str,
        status: TxStatus,
        message: Option<&str>,
    ) -> Result<()> {
        queries::set_submitted_tx_status(&self.pool, chain_id, tx_hash, status, message).await
    }

    pub async fn insert_rebalance_transfer(
        &self,
        tx_hash: &str,
        source_chain_id: &str,
        destination_chain_id: &str,
        amount: &str,
    ) -> Result<i64> {
        queries::insert_rebalance_transfer(
            &self.pool,
            tx_hash,
            source_chain_id,
            destination_chain_id,
            amount,
        )
        .await
    }

    pub async fn pending_rebalance_transfers(&self) -> Result<Vec<RebalanceTransfer>> {
        queries::pending_rebalance_transfers(&self.pool).await
    }

    pub async fn pending_rebalance_transfers_to_chain(
        &self,
        destination_chain_id: &str,
    ) -> Result<Vec<RebalanceTransfer>> {
        queries::pending_rebalance_transfers_to_chain(&self.pool, destination_chain_id).await
    }

    pub async fn set_rebalance_status(&self, id: i64, status: RebalanceStatus) -> Result<()> {
        queries::set_rebalance_status(&self.pool, id, status).await
    }

    pub async fn monitor_height(&self, chain_id: &str) -> Result<Option<u64>> {
        queries::monitor_height(&self.pool, chain_id).await
    }

    pub async fn set_monitor_height(&self, chain_id: &str, height: u64) -> Result<()> {
        queries::set_monitor_height(&self.pool, chain_id, height).await
    }

    /// Pings the database, checking that the connection is alive.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Rewrites a rebalance transfer's creation time, to simulate old rows.
    #[cfg(test)]
    pub(crate) async fn backdate_rebalance_transfer(
        &self,
        id: i64,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE rebalance_transfers SET created_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
