//! Executor-generic queries.
//!
//! Every function takes any [`SqliteExecutor`] so callers can run them
//! against the pool or compose several inside one [`sqlx::Transaction`]
//! (the settler's initiate-and-enqueue composite relies on this).

use super::rows::{
    HyperlaneTransfer, NewHyperlaneTransfer, NewOrder, NewOrderSettlement, NewSubmittedTx, Order,
    OrderKey, OrderSettlement, RebalanceTransfer, SubmittedTx,
};
use crate::{
    error::StorageError,
    types::{OrderStatus, RebalanceStatus, SettlementStatus, TransferStatus, TxStatus, TxType},
};
use chrono::Utc;
use sqlx::sqlite::SqliteExecutor;

type Result<T> = std::result::Result<T, StorageError>;

/// Inserts a freshly observed order as `PENDING`. A duplicate of the natural
/// key is a no-op, so the monitor's catch-up scan and live subscription can
/// both report the same event.
pub async fn insert_order<'e, E: SqliteExecutor<'e>>(executor: E, order: &NewOrder) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO orders (
            created_at, updated_at, source_chain_id, destination_chain_id,
            source_chain_gateway_address, sender, recipient, amount_in, amount_out,
            nonce, order_id, order_status, order_creation_tx,
            order_creation_tx_block_height, timeout_timestamp, data
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (source_chain_id, source_chain_gateway_address, order_id) DO NOTHING
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(&order.source_chain_id)
    .bind(&order.destination_chain_id)
    .bind(&order.source_chain_gateway_address)
    .bind(&order.sender)
    .bind(&order.recipient)
    .bind(&order.amount_in)
    .bind(&order.amount_out)
    .bind(order.nonce as i64)
    .bind(&order.order_id)
    .bind(OrderStatus::Pending)
    .bind(&order.order_creation_tx)
    .bind(order.order_creation_tx_block_height as i64)
    .bind(order.timeout_timestamp)
    .bind(&order.data)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn orders_by_status<'e, E: SqliteExecutor<'e>>(
    executor: E,
    status: OrderStatus,
) -> Result<Vec<Order>> {
    Ok(sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_status = ? ORDER BY id")
        .bind(status)
        .fetch_all(executor)
        .await?)
}

pub async fn order_by_key<'e, E: SqliteExecutor<'e>>(
    executor: E,
    key: &OrderKey,
) -> Result<Order> {
    sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE source_chain_id = ? AND source_chain_gateway_address = ? AND order_id = ?
        "#,
    )
    .bind(&key.source_chain_id)
    .bind(&key.source_chain_gateway_address)
    .bind(&key.order_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| StorageError::NotFound { entity: "order", key: key.order_id.clone() })
}

/// Records the observed fill and transitions the order to `FILLED`.
///
/// Terminal rows are never touched, so a late duplicate observation cannot
/// resurrect an order.
pub async fn set_fill_tx<'e, E: SqliteExecutor<'e>>(
    executor: E,
    key: &OrderKey,
    fill_tx: &str,
    filler: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE orders
        SET fill_tx = ?, filler = ?, order_status = ?, updated_at = ?
        WHERE source_chain_id = ? AND source_chain_gateway_address = ? AND order_id = ?
          AND order_status NOT IN ('FILLED', 'REFUNDED', 'ABANDONED')
        "#,
    )
    .bind(fill_tx)
    .bind(filler)
    .bind(OrderStatus::Filled)
    .bind(Utc::now())
    .bind(&key.source_chain_id)
    .bind(&key.source_chain_gateway_address)
    .bind(&key.order_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Records the observed refund and transitions the order to `REFUNDED`.
pub async fn set_refund_tx<'e, E: SqliteExecutor<'e>>(
    executor: E,
    key: &OrderKey,
    refund_tx: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE orders
        SET refund_tx = ?, order_status = ?, updated_at = ?
        WHERE source_chain_id = ? AND source_chain_gateway_address = ? AND order_id = ?
          AND order_status NOT IN ('FILLED', 'REFUNDED', 'ABANDONED')
        "#,
    )
    .bind(refund_tx)
    .bind(OrderStatus::Refunded)
    .bind(Utc::now())
    .bind(&key.source_chain_id)
    .bind(&key.source_chain_gateway_address)
    .bind(&key.order_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn set_order_status<'e, E: SqliteExecutor<'e>>(
    executor: E,
    key: &OrderKey,
    status: OrderStatus,
    message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE orders
        SET order_status = ?, order_status_message = COALESCE(?, order_status_message),
            updated_at = ?
        WHERE source_chain_id = ? AND source_chain_gateway_address = ? AND order_id = ?
          AND order_status NOT IN ('FILLED', 'REFUNDED', 'ABANDONED')
        "#,
    )
    .bind(status)
    .bind(message)
    .bind(Utc::now())
    .bind(&key.source_chain_id)
    .bind(&key.source_chain_gateway_address)
    .bind(&key.order_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Inserts a discovered settlement as `PENDING`. Duplicates of the natural
/// key are no-ops; the settler re-discovers fills every tick.
pub async fn insert_order_settlement<'e, E: SqliteExecutor<'e>>(
    executor: E,
    settlement: &NewOrderSettlement,
) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO order_settlements (
            created_at, updated_at, source_chain_id, destination_chain_id,
            source_chain_gateway_address, order_id, amount, settlement_status
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (source_chain_id, source_chain_gateway_address, order_id) DO NOTHING
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(&settlement.source_chain_id)
    .bind(&settlement.destination_chain_id)
    .bind(&settlement.source_chain_gateway_address)
    .bind(&settlement.order_id)
    .bind(&settlement.amount)
    .bind(SettlementStatus::Pending)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn settlements_by_status<'e, E: SqliteExecutor<'e>>(
    executor: E,
    status: SettlementStatus,
) -> Result<Vec<OrderSettlement>> {
    Ok(sqlx::query_as::<_, OrderSettlement>(
        "SELECT * FROM order_settlements WHERE settlement_status = ? ORDER BY id",
    )
    .bind(status)
    .fetch_all(executor)
    .await?)
}

pub async fn set_initiate_settlement_tx<'e, E: SqliteExecutor<'e>>(
    executor: E,
    key: &OrderKey,
    tx_hash: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE order_settlements
        SET initiate_settlement_tx = ?, updated_at = ?
        WHERE source_chain_id = ? AND source_chain_gateway_address = ? AND order_id = ?
        "#,
    )
    .bind(tx_hash)
    .bind(Utc::now())
    .bind(&key.source_chain_id)
    .bind(&key.source_chain_gateway_address)
    .bind(&key.order_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn set_complete_settlement_tx<'e, E: SqliteExecutor<'e>>(
    executor: E,
    key: &OrderKey,
    tx_hash: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE order_settlements
        SET complete_settlement_tx = ?, updated_at = ?
        WHERE source_chain_id = ? AND source_chain_gateway_address = ? AND order_id = ?
        "#,
    )
    .bind(tx_hash)
    .bind(Utc::now())
    .bind(&key.source_chain_id)
    .bind(&key.source_chain_gateway_address)
    .bind(&key.order_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn set_settlement_status<'e, E: SqliteExecutor<'e>>(
    executor: E,
    key: &OrderKey,
    status: SettlementStatus,
    message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE order_settlements
        SET settlement_status = ?,
            settlement_status_message = COALESCE(?, settlement_status_message),
            updated_at = ?
        WHERE source_chain_id = ? AND source_chain_gateway_address = ? AND order_id = ?
        "#,
    )
    .bind(status)
    .bind(message)
    .bind(Utc::now())
    .bind(&key.source_chain_id)
    .bind(&key.source_chain_gateway_address)
    .bind(&key.order_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Inserts a hyperlane transfer as `PENDING`. Duplicates of
/// `(source, destination, message id)` are no-ops.
pub async fn insert_hyperlane_transfer<'e, E: SqliteExecutor<'e>>(
    executor: E,
    transfer: &NewHyperlaneTransfer,
) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO hyperlane_transfers (
            created_at, updated_at, source_chain_id, destination_chain_id,
            message_id, message_sent_tx, transfer_status, max_tx_fee_uusdc
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (source_chain_id, destination_chain_id, message_id) DO NOTHING
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(&transfer.source_chain_id)
    .bind(&transfer.destination_chain_id)
    .bind(&transfer.message_id)
    .bind(&transfer.message_sent_tx)
    .bind(TransferStatus::Pending)
    .bind(&transfer.max_tx_fee_uusdc)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn transfers_by_status<'e, E: SqliteExecutor<'e>>(
    executor: E,
    status: TransferStatus,
) -> Result<Vec<HyperlaneTransfer>> {
    Ok(sqlx::query_as::<_, HyperlaneTransfer>(
        "SELECT * FROM hyperlane_transfers WHERE transfer_status = ? ORDER BY id",
    )
    .bind(status)
    .fetch_all(executor)
    .await?)
}

pub async fn set_transfer_status<'e, E: SqliteExecutor<'e>>(
    executor: E,
    transfer: &HyperlaneTransfer,
    status: TransferStatus,
    message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE hyperlane_transfers
        SET transfer_status = ?,
            transfer_status_message = COALESCE(?, transfer_status_message),
            updated_at = ?
        WHERE source_chain_id = ? AND destination_chain_id = ? AND message_id = ?
        "#,
    )
    .bind(status)
    .bind(message)
    .bind(Utc::now())
    .bind(&transfer.source_chain_id)
    .bind(&transfer.destination_chain_id)
    .bind(&transfer.message_id)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn transfer_by_message_sent_tx<'e, E: SqliteExecutor<'e>>(
    executor: E,
    source_chain_id: &str,
    message_sent_tx: &str,
) -> Result<Option<HyperlaneTransfer>> {
    Ok(sqlx::query_as::<_, HyperlaneTransfer>(
        "SELECT * FROM hyperlane_transfers WHERE source_chain_id = ? AND message_sent_tx = ?",
    )
    .bind(source_chain_id)
    .bind(message_sent_tx)
    .fetch_optional(executor)
    .await?)
}

/// Appends a broadcast transaction to the audit log as `PENDING`.
pub async fn insert_submitted_tx<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tx: &NewSubmittedTx,
    tx_type: TxType,
) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO submitted_txs (
            created_at, updated_at, order_id, order_settlement_id, hyperlane_transfer_id,
            rebalance_transfer_id, chain_id, tx_hash, raw_tx, tx_type, tx_status
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(tx.order_id)
    .bind(tx.order_settlement_id)
    .bind(tx.hyperlane_transfer_id)
    .bind(tx.rebalance_transfer_id)
    .bind(&tx.chain_id)
    .bind(&tx.tx_hash)
    .bind(&tx.raw_tx)
    .bind(tx_type)
    .bind(TxStatus::Pending)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn submitted_txs_by_order_and_type<'e, E: SqliteExecutor<'e>>(
    executor: E,
    order_row_id: i64,
    tx_type: TxType,
) -> Result<Vec<SubmittedTx>> {
    Ok(sqlx::query_as::<_, SubmittedTx>(
        "SELECT * FROM submitted_txs WHERE order_id = ? AND tx_type = ? ORDER BY id",
    )
    .bind(order_row_id)
    .bind(tx_type)
    .fetch_all(executor)
    .await?)
}

pub async fn submitted_txs_by_transfer<'e, E: SqliteExecutor<'e>>(
    executor: E,
    transfer_row_id: i64,
) -> Result<Vec<SubmittedTx>> {
    Ok(sqlx::query_as::<_, SubmittedTx>(
        "SELECT * FROM submitted_txs WHERE hyperlane_transfer_id = ? ORDER BY id",
    )
    .bind(transfer_row_id)
    .fetch_all(executor)
    .await?)
}

pub async fn set_submitted_tx_status<'e, E: SqliteExecutor<'e>>(
    executor: E,
    chain_id: &str,
    tx_hash: &str,
    status: TxStatus,
    message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE submitted_txs
        SET tx_status = ?, tx_status_message = COALESCE(?, tx_status_message), updated_at = ?
        WHERE chain_id = ? AND tx_hash = ?
        "#,
    )
    .bind(status)
    .bind(message)
    .bind(Utc::now())
    .bind(chain_id)
    .bind(tx_hash)
    .execute(executor)
    .await?;

    Ok(())
}

/// Inserts a rebalance transfer as `PENDING` and returns its row id.
pub async fn insert_rebalance_transfer<'e, E: SqliteExecutor<'e>>(
    executor: E,
    tx_hash: &str,
    source_chain_id: &str,
    destination_chain_id: &str,
    amount: &str,
) -> Result<i64> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO rebalance_transfers (
            created_at, updated_at, tx_hash, source_chain_id, destination_chain_id,
            amount, status
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(tx_hash)
    .bind(source_chain_id)
    .bind(destination_chain_id)
    .bind(amount)
    .bind(RebalanceStatus::Pending)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn pending_rebalance_transfers<'e, E: SqliteExecutor<'e>>(
    executor: E,
) -> Result<Vec<RebalanceTransfer>> {
    Ok(sqlx::query_as::<_, RebalanceTransfer>(
        "SELECT * FROM rebalance_transfers WHERE status = ? ORDER BY id",
    )
    .bind(RebalanceStatus::Pending)
    .fetch_all(executor)
    .await?)
}

pub async fn pending_rebalance_transfers_to_chain<'e, E: SqliteExecutor<'e>>(
    executor: E,
    destination_chain_id: &str,
) -> Result<Vec<RebalanceTransfer>> {
    Ok(sqlx::query_as::<_, RebalanceTransfer>(
        "SELECT * FROM rebalance_transfers WHERE status = ? AND destination_chain_id = ? ORDER BY id",
    )
    .bind(RebalanceStatus::Pending)
    .bind(destination_chain_id)
    .fetch_all(executor)
    .await?)
}

pub async fn set_rebalance_status<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
    status: RebalanceStatus,
) -> Result<()> {
    sqlx::query("UPDATE rebalance_transfers SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Returns the last scanned block height for a chain, if any.
pub async fn monitor_height<'e, E: SqliteExecutor<'e>>(
    executor: E,
    chain_id: &str,
) -> Result<Option<u64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT height_last_seen FROM transfer_monitor_metadata WHERE chain_id = ?",
    )
    .bind(chain_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(|(height,)| height as u64))
}

/// Upserts the last scanned block height for a chain.
pub async fn set_monitor_height<'e, E: SqliteExecutor<'e>>(
    executor: E,
    chain_id: &str,
    height: u64,
) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO transfer_monitor_metadata (created_at, updated_at, chain_id, height_last_seen)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (chain_id)
        DO UPDATE SET height_last_seen = excluded.height_last_seen, updated_at = excluded.updated_at
        "#,
    )
    .bind(now)
    .bind(now)
    .bind(chain_id)
    .bind(height as i64)
    .execute(executor)
    .await?;

    Ok(())
}
