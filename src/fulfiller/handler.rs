//! Order fulfillment handler: state updates, admission gates, fills, and
//! timeouts.

use crate::{
    chains::ClientManager,
    constants::{EXCESSIVE_FILL_LATENCY, TIMEOUT_RELAY_ATTEMPTS, TIMEOUT_RELAY_BASE_DELAY},
    config::SolverConfig,
    metrics::FulfillerMetrics,
    relayer::{RelayOpts, RelayerRunner},
    storage::{NewSubmittedTx, Order, Storage, queries},
    types::{OrderStatus, TxType, fee_bps},
};
use chrono::Utc;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives individual orders through their fill or refund lifecycle.
#[derive(Debug)]
pub struct OrderFulfillmentHandler {
    config: Arc<SolverConfig>,
    storage: Storage,
    clients: Arc<ClientManager>,
    relayer: Arc<RelayerRunner>,
}

impl OrderFulfillmentHandler {
    pub fn new(
        config: Arc<SolverConfig>,
        storage: Storage,
        clients: Arc<ClientManager>,
        relayer: Arc<RelayerRunner>,
    ) -> Self {
        Self { config, storage, clients, relayer }
    }

    fn metrics(&self, order: &Order) -> FulfillerMetrics {
        FulfillerMetrics::new_with_labels(&[
            ("source_chain_id", order.source_chain_id.clone()),
            ("destination_chain_id", order.destination_chain_id.clone()),
        ])
    }

    /// Reconciles an order's stored status with what the chains report:
    /// records an observed fill, an observed refund, or expiry.
    pub async fn update_fulfillment_status(&self, order: &Order) -> eyre::Result<OrderStatus> {
        let source = self.clients.client(&order.source_chain_id).await?;
        let destination = self.clients.client(&order.destination_chain_id).await?;
        let destination_gateway =
            &self.config.chain(&order.destination_chain_id)?.fast_transfer_contract_address;

        let metrics = self.metrics(order);
        if order.created_at + EXCESSIVE_FILL_LATENCY < Utc::now() {
            metrics.excessive_fill_latency.increment(1);
        }

        let (fill_event, destination_block_time) =
            destination.query_order_fill_event(destination_gateway, &order.order_id).await?;

        if let Some(fill) = fill_event {
            self.storage.set_fill_tx(&order.key(), &fill.tx_hash, &fill.filler).await?;
            metrics.order_status_changes.increment(1);
            metrics
                .fill_latency_seconds
                .record((Utc::now() - order.created_at).num_seconds() as f64);
            return Ok(OrderStatus::Filled);
        }

        // The destination chain's clock decides expiry.
        if destination_block_time > order.timeout_timestamp {
            let (refunded, refund_tx) = source
                .is_order_refunded(&order.source_chain_gateway_address, &order.order_id)
                .await?;
            if refunded {
                match refund_tx {
                    Some(refund_tx) => {
                        self.storage.set_refund_tx(&order.key(), &refund_tx).await?
                    }
                    None => {
                        self.storage
                            .set_order_status(&order.key(), OrderStatus::Refunded, None)
                            .await?
                    }
                }
                metrics.order_status_changes.increment(1);
                return Ok(OrderStatus::Refunded);
            }

            self.storage
                .set_order_status(&order.key(), OrderStatus::ExpiredPendingRefund, None)
                .await?;
            if order.order_status == OrderStatus::Pending {
                metrics.order_status_changes.increment(1);
            }
            return Ok(OrderStatus::ExpiredPendingRefund);
        }

        Ok(OrderStatus::Pending)
    }

    /// Fills a pending order, subject to the admission gates. Returns the
    /// fill tx hash, or `None` when a gate stopped the fill.
    pub async fn fill_order(&self, order: &Order) -> eyre::Result<Option<String>> {
        let source_chain = self.config.chain(&order.source_chain_id)?;
        let destination_chain = self.config.chain(&order.destination_chain_id)?;
        let source = self.clients.client(&order.source_chain_id).await?;
        let destination = self.clients.client(&order.destination_chain_id).await?;

        let amount_in = order.amount_in()?;
        let amount_out = order.amount_out()?;
        let metrics = self.metrics(order);

        // Transfer size window configured on the destination chain.
        if let Some(cosmos) = &destination_chain.cosmos {
            if amount_in < cosmos.min_fill_size || amount_in > cosmos.max_fill_size {
                let reason = format!(
                    "transfer amount {} outside fill size window [{}, {}] for chain {}",
                    amount_in, cosmos.min_fill_size, cosmos.max_fill_size, destination_chain.chain_id,
                );
                info!(order_id = %order.order_id, %reason, "abandoning order");
                self.storage
                    .set_order_status(&order.key(), OrderStatus::Abandoned, Some(&reason))
                    .await?;
                metrics.order_status_changes.increment(1);
                return Ok(None);
            }
        }

        // Solver fee floor configured on the source chain.
        if fee_bps(amount_in, amount_out)? < source_chain.min_fee_bps as u64 {
            let reason = format!(
                "solver fee for order below configured min fee bps of {}",
                source_chain.min_fee_bps,
            );
            info!(order_id = %order.order_id, %reason, "abandoning order");
            self.storage
                .set_order_status(&order.key(), OrderStatus::Abandoned, Some(&reason))
                .await?;
            metrics.order_status_changes.increment(1);
            return Ok(None);
        }

        // Capital may replenish later; an insufficient balance does not
        // abandon the order.
        let balance = destination
            .balance(&destination_chain.solver_address, &destination_chain.usdc_denom)
            .await?;
        if balance < amount_out {
            warn!(
                order_id = %order.order_id,
                %balance,
                %amount_out,
                "insufficient balance to fill order"
            );
            metrics.insufficient_balance.increment(1);
            return Ok(None);
        }

        // At most one in-flight fill per order.
        let prior_fills = self
            .storage
            .submitted_txs_by_order_and_type(order.id, TxType::OrderFill)
            .await?;
        if !prior_fills.is_empty() {
            return Ok(None);
        }

        // Wait out the confirmation window, then re-check the order still
        // exists at its creation block to catch reorgs.
        let source_height = source.block_height().await?;
        if source_height
            < order.order_creation_tx_block_height as u64
                + source_chain.num_block_confirmations_before_fill
        {
            debug!(order_id = %order.order_id, "required block confirmations not met");
            return Ok(None);
        }
        let (exists, _) = source
            .order_exists(
                &order.source_chain_gateway_address,
                &order.order_id,
                Some(order.order_creation_tx_block_height as u64),
            )
            .await?;
        if !exists {
            info!(order_id = %order.order_id, "abandoning order due to reorg");
            self.storage
                .set_order_status(&order.key(), OrderStatus::Abandoned, Some("reorged"))
                .await?;
            metrics.order_status_changes.increment(1);
            return Ok(None);
        }

        let submitted = destination
            .fill_order(order, &destination_chain.fast_transfer_contract_address)
            .await?;
        metrics.transactions_submitted.increment(1);

        self.storage
            .insert_submitted_tx(
                &NewSubmittedTx {
                    order_id: Some(order.id),
                    chain_id: order.destination_chain_id.clone(),
                    tx_hash: submitted.tx_hash.clone(),
                    raw_tx: submitted.raw_tx,
                    ..Default::default()
                },
                TxType::OrderFill,
            )
            .await?;

        Ok(Some(submitted.tx_hash))
    }

    /// Initiates the refund flow for an expired order on its destination
    /// gateway, reusing a previously submitted timeout tx if one exists.
    ///
    /// Runs on the caller's transaction so the timeout submission and its
    /// relay enqueue commit together.
    pub async fn initiate_timeout(
        &self,
        order: &Order,
        conn: &mut SqliteConnection,
    ) -> eyre::Result<String> {
        let prior = queries::submitted_txs_by_order_and_type(
            &mut *conn,
            order.id,
            TxType::InitiateTimeout,
        )
        .await?;
        match prior.len() {
            0 => {}
            1 => return Ok(prior[0].tx_hash.clone()),
            n => eyre::bail!(
                "invariant violation: got {n} submitted txs of type {} for order {}, expected 1",
                TxType::InitiateTimeout,
                order.order_id,
            ),
        }

        let destination = self.clients.client(&order.destination_chain_id).await?;
        let destination_gateway =
            &self.config.chain(&order.destination_chain_id)?.fast_transfer_contract_address;

        let submitted = destination.initiate_timeout(order, destination_gateway).await?;
        self.metrics(order).transactions_submitted.increment(1);
        if submitted.tx_hash.is_empty() {
            eyre::bail!("empty tx hash after submitting timeout to {destination_gateway}");
        }

        queries::insert_submitted_tx(
            &mut *conn,
            &NewSubmittedTx {
                order_id: Some(order.id),
                chain_id: order.destination_chain_id.clone(),
                tx_hash: submitted.tx_hash.clone(),
                raw_tx: submitted.raw_tx,
                ..Default::default()
            },
            TxType::InitiateTimeout,
        )
        .await?;

        info!(
            order_id = %order.order_id,
            source_chain_id = %order.source_chain_id,
            destination_chain_id = %order.destination_chain_id,
            "successfully initiated timeout"
        );
        Ok(submitted.tx_hash)
    }

    /// Submits an initiated timeout to the relayer, retrying transient
    /// failures with exponential backoff.
    pub async fn submit_timeout_for_relay(
        &self,
        order: &Order,
        tx_hash: &str,
        conn: &mut SqliteConnection,
    ) -> eyre::Result<()> {
        // The relay's source chain is where the timeout was initiated: the
        // order's destination chain.
        let initiate_timeout_chain = &order.destination_chain_id;

        let mut last_err = None;
        for attempt in 0..TIMEOUT_RELAY_ATTEMPTS {
            match self
                .relayer
                .submit_tx_to_relay(
                    tx_hash,
                    initiate_timeout_chain,
                    RelayOpts { submitter: Some(&mut *conn), ..Default::default() },
                )
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) => {
                    last_err = Some(err);
                    tokio::time::sleep(TIMEOUT_RELAY_BASE_DELAY * 2u32.pow(attempt)).await;
                }
            }
        }

        Err(eyre::eyre!(
            "submitting timeout tx {tx_hash} to be relayed from chain {initiate_timeout_chain}: {}",
            last_err.expect("at least one attempt"),
        ))
    }
}
