//! Order settler.
//!
//! Every tick: discover fills made by the solver on Cosmos gateways, batch
//! the resulting settlements by chain pair, initiate on-chain settlement for
//! batches past the value threshold, and verify previously initiated
//! settlements. The initiation write, its audit-log row, and the relay
//! enqueue commit in one database transaction: a settlement initiated on
//! chain with no relay request would strand the solver's principal.

mod batch;

pub use batch::SettlementBatch;

use crate::{
    chains::ClientManager,
    config::SolverConfig,
    constants::{SETTLEMENT_INTERVAL, SETTLEMENT_RELAY_DELAY},
    error::ChainError,
    metrics::SettlerMetrics,
    relayer::{RelayOpts, RelayerRunner},
    storage::{
        NewOrderSettlement, NewSubmittedTx, OrderSettlement, Storage, queries,
    },
    types::{
        SettlementStatus, TxStatus, TxType,
        gateway::GATEWAY_ORDER_UNFILLED,
    },
};
use alloy::primitives::U256;
use futures_util::future::try_join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Batches fills into settlement transactions and drives each settlement to
/// `COMPLETE`.
#[derive(Debug)]
pub struct OrderSettler {
    config: Arc<SolverConfig>,
    storage: Storage,
    clients: Arc<ClientManager>,
    relayer: Arc<RelayerRunner>,
}

impl OrderSettler {
    pub fn new(
        config: Arc<SolverConfig>,
        storage: Storage,
        clients: Arc<ClientManager>,
        relayer: Arc<RelayerRunner>,
    ) -> Self {
        Self { config, storage, clients, relayer }
    }

    /// Runs the settle loop until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!("starting order settler");
        let mut ticker = tokio::time::interval(SETTLEMENT_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.find_new_settlements().await {
                        error!(%err, "error finding new settlements");
                        continue;
                    }
                    if let Err(err) = self.settle_orders().await {
                        error!(%err, "error settling orders");
                    }
                    if let Err(err) = self.verify_order_settlements().await {
                        error!(%err, "error verifying settlements");
                    }
                }
            }
        }
    }

    /// Discovers fills made by the solver and records a settlement for each
    /// one whose order is still unsettled on its source chain.
    pub async fn find_new_settlements(&self) -> eyre::Result<()> {
        for chain in self.config.gateway_chains(crate::config::ChainType::Cosmos) {
            let client = self.clients.client(&chain.chain_id).await?;
            let fills = client
                .order_fills_by_filler(
                    &chain.fast_transfer_contract_address,
                    &chain.solver_address,
                )
                .await?;
            if fills.is_empty() {
                continue;
            }

            for fill in fills {
                let Some(source_chain_id) = self.config.chain_id_by_domain(fill.source_domain)
                else {
                    warn!(
                        order_id = %fill.order_id,
                        source_domain = fill.source_domain,
                        "fill references an unconfigured source domain"
                    );
                    continue;
                };
                let source_chain_id = source_chain_id.to_string();
                let source_chain = self.config.chain(&source_chain_id)?;
                let source_gateway = source_chain.fast_transfer_contract_address.clone();
                let source = self.clients.client(&source_chain_id).await?;

                let height = source.block_height().await?;
                let (exists, amount) = source
                    .order_exists(&source_gateway, &fill.order_id, Some(height))
                    .await?;
                if !exists {
                    continue;
                }

                // An order is only marked filled on its source chain once it
                // is settled; anything non-zero is already done.
                let status = source.order_status(&source_gateway, &fill.order_id).await?;
                if status != GATEWAY_ORDER_UNFILLED {
                    continue;
                }

                self.storage
                    .insert_order_settlement(&NewOrderSettlement {
                        source_chain_id,
                        destination_chain_id: chain.chain_id.clone(),
                        source_chain_gateway_address: source_gateway,
                        order_id: fill.order_id,
                        amount: amount.to_string(),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Initiates settlement for every batch past its source chain's value
    /// threshold. Batches settle in parallel; each `(source, destination)`
    /// pair produces at most one initiation per tick.
    pub async fn settle_orders(&self) -> eyre::Result<()> {
        let batches = self.pending_settlement_batches().await?;

        let mut to_settle = Vec::new();
        for batch in batches {
            if self.should_initiate_settlement(&batch)? {
                to_settle.push(batch);
            } else {
                debug!(%batch, "settlement batch is not past the settle-up threshold yet");
            }
        }
        if to_settle.is_empty() {
            debug!("no settlement batches ready to be settled yet");
            return Ok(());
        }

        info!(batches = to_settle.len(), "initiating order settlements");
        let hashes =
            try_join_all(to_settle.iter().map(|batch| self.settle_batch(batch))).await?;
        info!(?hashes, "order settlements initiated on chain");
        Ok(())
    }

    /// Batches of pending settlements that have no initiation tx yet.
    async fn pending_settlement_batches(&self) -> eyre::Result<Vec<SettlementBatch>> {
        let pending = self.storage.settlements_by_status(SettlementStatus::Pending).await?;
        let uninitiated = pending
            .into_iter()
            .filter(|settlement| settlement.initiate_settlement_tx.is_none())
            .collect();
        Ok(SettlementBatch::group(uninitiated))
    }

    /// True when the batch's value is at or past the source chain's
    /// settle-up threshold.
    fn should_initiate_settlement(&self, batch: &SettlementBatch) -> eyre::Result<bool> {
        let threshold =
            self.config.chain(batch.source_chain_id())?.batch_uusdc_settle_up_threshold;
        Ok(batch.total_value()? >= threshold)
    }

    /// Initiates one batch on chain and, in a single database transaction,
    /// records the initiation tx on every settlement, appends the audit-log
    /// row, and enqueues the relay.
    async fn settle_batch(&self, batch: &SettlementBatch) -> eyre::Result<String> {
        let destination = self.clients.client(batch.destination_chain_id()).await?;
        let destination_gateway = self
            .config
            .chain(batch.destination_chain_id())?
            .fast_transfer_contract_address
            .clone();

        let submitted =
            destination.initiate_batch_settlement(batch.settlements(), &destination_gateway).await?;
        if submitted.raw_tx.is_empty() {
            error!(%batch, "batch settlement raw tx is empty");
            eyre::bail!("empty batch settlement transaction");
        }

        let max_tx_fee_uusdc = self.max_batch_tx_fee_uusdc(batch).await?;
        SettlerMetrics::new_with_labels(&[
            ("source_chain_id", batch.source_chain_id().to_string()),
            ("destination_chain_id", batch.destination_chain_id().to_string()),
        ])
        .batches_initiated
        .increment(1);

        let mut tx = self.storage.begin().await?;
        for settlement in batch.settlements() {
            queries::set_initiate_settlement_tx(
                &mut *tx,
                &settlement.order_key(),
                &submitted.tx_hash,
            )
            .await?;
        }

        // One audit row for the whole batch; it can only link one
        // settlement, so the first one stands in for all of them.
        queries::insert_submitted_tx(
            &mut *tx,
            &NewSubmittedTx {
                order_settlement_id: Some(batch.settlements()[0].id),
                chain_id: batch.destination_chain_id().to_string(),
                tx_hash: submitted.tx_hash.clone(),
                raw_tx: submitted.raw_tx.clone(),
                ..Default::default()
            },
            TxType::Settlement,
        )
        .await?;

        self.relayer
            .submit_tx_to_relay(
                &submitted.tx_hash,
                batch.destination_chain_id(),
                RelayOpts {
                    delay: Some(SETTLEMENT_RELAY_DELAY),
                    max_tx_fee_uusdc: Some(max_tx_fee_uusdc),
                    submitter: Some(&mut *tx),
                },
            )
            .await?;
        tx.commit().await?;

        info!(%batch, tx_hash = %submitted.tx_hash, "submitted order settlements to be relayed");
        Ok(submitted.tx_hash)
    }

    /// The largest relay fee that still preserves the source chain's
    /// configured profit margin:
    /// `profit − total_value · min_profit_margin_bps / 10000`.
    async fn max_batch_tx_fee_uusdc(&self, batch: &SettlementBatch) -> eyre::Result<U256> {
        let total_value = batch.total_value()?;
        let profit = self.total_batch_profit(batch, total_value).await?;

        let margin_bps = self.config.chain(batch.source_chain_id())?.min_profit_margin_bps;
        let value_margin = total_value * U256::from(margin_bps) / U256::from(10_000u64);

        match profit.checked_sub(value_margin) {
            Some(fee) => Ok(fee),
            None => {
                error!(
                    %batch,
                    %profit,
                    %value_margin,
                    "relay fee budget is not positive; min_profit_margin_bps >= min_fee_bps is infeasible"
                );
                Ok(U256::ZERO)
            }
        }
    }

    /// Batch profit. Settlements only store `amount_in`; the orders table
    /// supplies each order's `amount_out`.
    async fn total_batch_profit(
        &self,
        batch: &SettlementBatch,
        total_value: U256,
    ) -> eyre::Result<U256> {
        let mut total_out = U256::ZERO;
        for settlement in batch.settlements() {
            let order = self.storage.order_by_key(&settlement.order_key()).await?;
            total_out += order.amount_out()?;
        }
        Ok(total_value.saturating_sub(total_out))
    }

    /// Checks initiated settlements against their on-chain results and marks
    /// them `SETTLEMENT_INITIATED`, `FAILED`, or `COMPLETE`.
    pub async fn verify_order_settlements(&self) -> eyre::Result<()> {
        let mut settlements =
            self.storage.settlements_by_status(SettlementStatus::Pending).await?;
        settlements.extend(
            self.storage
                .settlements_by_status(SettlementStatus::SettlementInitiated)
                .await?,
        );

        for settlement in settlements {
            if settlement.initiate_settlement_tx.is_none() {
                continue;
            }
            match self.verify_order_settlement(&settlement).await {
                Ok(()) => info!(
                    order_id = %settlement.order_id,
                    source_chain_id = %settlement.source_chain_id,
                    "successfully verified order settlement"
                ),
                Err(err) => warn!(
                    order_id = %settlement.order_id,
                    source_chain_id = %settlement.source_chain_id,
                    %err,
                    "failed to verify order settlement, will retry next interval"
                ),
            }
        }
        Ok(())
    }

    async fn verify_order_settlement(&self, settlement: &OrderSettlement) -> eyre::Result<()> {
        let initiate_tx =
            settlement.initiate_settlement_tx.as_deref().expect("filtered by caller");
        let source = self.clients.client(&settlement.source_chain_id).await?;
        let destination = self.clients.client(&settlement.destination_chain_id).await?;

        if settlement.settlement_status == SettlementStatus::Pending {
            let result = match destination.get_tx_result(initiate_tx).await {
                Ok(result) => result,
                Err(ChainError::TxNotFound(_)) => {
                    eyre::bail!("transaction not yet indexed, will retry next interval");
                }
                Err(err) => return Err(err.into()),
            };

            if let Some(failure) = result.failure {
                error!(tx_hash = %initiate_tx, %failure, "settlement initiation tx failed");
                self.storage
                    .set_settlement_status(
                        &settlement.order_key(),
                        SettlementStatus::Failed,
                        Some(&failure),
                    )
                    .await?;
                self.storage
                    .set_submitted_tx_status(
                        &settlement.destination_chain_id,
                        initiate_tx,
                        TxStatus::Failed,
                        Some(&failure),
                    )
                    .await?;
                eyre::bail!("settlement initiation tx failed: {failure}");
            }

            self.storage
                .set_settlement_status(
                    &settlement.order_key(),
                    SettlementStatus::SettlementInitiated,
                    None,
                )
                .await?;
            self.storage
                .set_submitted_tx_status(
                    &settlement.destination_chain_id,
                    initiate_tx,
                    TxStatus::Success,
                    None,
                )
                .await?;
        }

        if !source
            .is_settlement_complete(&settlement.source_chain_gateway_address, &settlement.order_id)
            .await?
        {
            eyre::bail!("settlement is not complete");
        }

        // The payout arrived through the relayed message; link its delivery
        // tx if it is known.
        if let Some(transfer) = self
            .storage
            .transfer_by_message_sent_tx(&settlement.destination_chain_id, initiate_tx)
            .await?
        {
            if let Some(delivery) =
                self.storage.submitted_txs_by_transfer(transfer.id).await?.first()
            {
                self.storage
                    .set_complete_settlement_tx(&settlement.order_key(), &delivery.tx_hash)
                    .await?;
            }
        }

        self.storage
            .set_settlement_status(&settlement.order_key(), SettlementStatus::Complete, None)
            .await?;
        SettlerMetrics::new_with_labels(&[
            ("source_chain_id", settlement.source_chain_id.clone()),
            ("destination_chain_id", settlement.destination_chain_id.clone()),
        ])
        .settlements_completed
        .increment(1);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chains::{CosmosGateway, TxResult},
        relayer::{HyperlaneClient, MultiClient},
        test_utils::{
            GatewayState, HyperlaneState, MockGateway, MockHyperlane, insert_order,
            test_keystore, two_chain_config,
        },
        types::TransferStatus,
    };
    use alloy::primitives::U256;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashMap;

    struct Env {
        storage: Storage,
        settler: OrderSettler,
        gateway: std::sync::Arc<MockGateway>,
    }

    async fn env(gateway_state: GatewayState) -> Env {
        let config = two_chain_config();
        let storage = Storage::in_memory().await.unwrap();
        let gateway = MockGateway::new("osmosis-1", gateway_state);

        let gateways: HashMap<String, Arc<dyn CosmosGateway>> =
            [("osmosis-1".to_string(), gateway.clone() as Arc<dyn CosmosGateway>)].into();
        let clients =
            Arc::new(crate::chains::ClientManager::new(config.clone(), test_keystore(), gateways));

        let hyperlane = MockHyperlane::new(875, HyperlaneState::default());
        let (dispatch, insertion) = MockHyperlane::dispatch(42161, b"settle batch");
        hyperlane.state.lock().unwrap().dispatch = Some((dispatch, insertion));
        let multi = Arc::new(MultiClient::from_clients(
            [
                (875u32, hyperlane.clone() as Arc<dyn HyperlaneClient>),
                (42161u32, hyperlane as Arc<dyn HyperlaneClient>),
            ]
            .into(),
        ));
        let relayer = Arc::new(RelayerRunner::new(config.clone(), storage.clone(), multi));

        let settler = OrderSettler::new(config, storage.clone(), clients, relayer);
        Env { storage, settler, gateway }
    }

    async fn insert_settlement(env: &Env, order_id: &str, amount: u64) {
        env.storage
            .insert_order_settlement(&NewOrderSettlement {
                source_chain_id: "42161".to_string(),
                destination_chain_id: "osmosis-1".to_string(),
                source_chain_gateway_address: "0x00000000000000000000000000000000000000aa"
                    .to_string(),
                order_id: order_id.to_string(),
                amount: amount.to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn initiates_batch_and_enqueues_relay_with_profit_margin_cap() {
        let env = env(GatewayState::default()).await;
        insert_order(&env.storage, "aa", 5_000_000, 4_995_000, ChronoDuration::hours(1)).await;
        insert_settlement(&env, "aa", 5_000_000).await;

        env.settler.settle_orders().await.unwrap();

        let settlements =
            env.storage.settlements_by_status(SettlementStatus::Pending).await.unwrap();
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].initiate_settlement_tx.as_deref(), Some("settle-1"));

        // 5000 uusdc of profit minus 5 bps of 5 USDC (2500) leaves a 2500
        // uusdc relay budget.
        let transfers =
            env.storage.transfers_by_status(TransferStatus::Pending).await.unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].max_tx_fee_uusdc.as_deref(), Some("2500"));
        assert_eq!(transfers[0].source_chain_id, "osmosis-1");
        assert_eq!(transfers[0].destination_chain_id, "42161");

        assert_eq!(
            env.gateway.state.lock().unwrap().broadcasts,
            vec![("initiate_batch_settlement", "settle-1".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn skips_batches_below_settle_up_threshold() {
        let env = env(GatewayState::default()).await;
        insert_order(&env.storage, "aa", 500_000, 499_000, ChronoDuration::hours(1)).await;
        insert_settlement(&env, "aa", 500_000).await;

        env.settler.settle_orders().await.unwrap();

        let settlements =
            env.storage.settlements_by_status(SettlementStatus::Pending).await.unwrap();
        assert!(settlements[0].initiate_settlement_tx.is_none());
        assert!(env.gateway.state.lock().unwrap().broadcasts.is_empty());
    }

    #[tokio::test]
    async fn verification_follows_the_initiation_tx_result() {
        let env = env(GatewayState {
            tx_results: [
                ("ok-tx".to_string(), TxResult { gas_cost: U256::from(1u64), failure: None }),
                (
                    "bad-tx".to_string(),
                    TxResult {
                        gas_cost: U256::from(1u64),
                        failure: Some("out of gas".to_string()),
                    },
                ),
            ]
            .into(),
            ..Default::default()
        })
        .await;

        insert_settlement(&env, "good", 5_000_000).await;
        insert_settlement(&env, "bad", 5_000_000).await;
        let settlements =
            env.storage.settlements_by_status(SettlementStatus::Pending).await.unwrap();
        let mut tx = env.storage.begin().await.unwrap();
        for settlement in &settlements {
            let hash = if settlement.order_id == "good" { "ok-tx" } else { "bad-tx" };
            queries::set_initiate_settlement_tx(&mut *tx, &settlement.order_key(), hash)
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        env.settler.verify_order_settlements().await.unwrap();

        // The failed initiation is terminal; the good one advanced to
        // SETTLEMENT_INITIATED (completion needs the source chain, which is
        // checked next tick).
        let failed =
            env.storage.settlements_by_status(SettlementStatus::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].order_id, "bad");
        assert!(failed[0].settlement_status_message.as_deref().unwrap().contains("out of gas"));

        let initiated = env
            .storage
            .settlements_by_status(SettlementStatus::SettlementInitiated)
            .await
            .unwrap();
        assert_eq!(initiated.len(), 1);
        assert_eq!(initiated[0].order_id, "good");
    }
}
