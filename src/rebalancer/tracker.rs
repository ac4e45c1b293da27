//! Rebalance transfer tracker.

use super::skipgo::{RoutingClient, STATE_COMPLETED_ERROR, STATE_COMPLETED_SUCCESS};
use crate::{
    config::SolverConfig,
    constants::REBALANCE_INTERVAL,
    metrics::RebalancerMetrics,
    storage::{RebalanceTransfer, Storage},
    types::RebalanceStatus,
};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Tracks pending rebalance transfers to a terminal status.
#[derive(Debug)]
pub struct TransferTracker {
    config: Arc<SolverConfig>,
    storage: Storage,
    routing: Arc<dyn RoutingClient>,
}

impl TransferTracker {
    pub fn new(
        config: Arc<SolverConfig>,
        storage: Storage,
        routing: Arc<dyn RoutingClient>,
    ) -> Self {
        Self { config, storage, routing }
    }

    /// Runs the tracker until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(REBALANCE_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.update_transfers().await {
                        error!(%err, "error updating rebalance transfers");
                    }
                }
            }
        }
    }

    /// Reconciles every pending transfer with the routing API, abandoning
    /// transfers that have been pending past their source chain's timeout.
    pub async fn update_transfers(&self) -> eyre::Result<()> {
        for transfer in self.storage.pending_rebalance_transfers().await? {
            if let Err(err) = self.update_transfer(&transfer).await {
                warn!(
                    tx_hash = %transfer.tx_hash,
                    source_chain_id = %transfer.source_chain_id,
                    %err,
                    "error updating rebalance transfer"
                );
            }
        }
        Ok(())
    }

    async fn update_transfer(&self, transfer: &RebalanceTransfer) -> eyre::Result<()> {
        let metrics = RebalancerMetrics::new_with_labels(&[
            ("source_chain_id", transfer.source_chain_id.clone()),
            ("destination_chain_id", transfer.destination_chain_id.clone()),
        ]);

        // A transfer stuck past the timeout is abandoned even without status
        // information, so a replacement can be issued.
        if let Some(rebalance) = self.config.fund_rebalancer.get(&transfer.source_chain_id) {
            let age = (Utc::now() - transfer.created_at).to_std().unwrap_or_default();
            if age > rebalance.rebalance_transfer_timeout {
                warn!(
                    tx_hash = %transfer.tx_hash,
                    age_secs = age.as_secs(),
                    "abandoning rebalance transfer stuck past timeout"
                );
                self.storage
                    .set_rebalance_status(transfer.id, RebalanceStatus::Abandoned)
                    .await?;
                metrics.transfers_abandoned.increment(1);
                return Ok(());
            }
        }

        self.routing.track_tx(&transfer.tx_hash, &transfer.source_chain_id).await?;
        let status =
            self.routing.status(&transfer.tx_hash, &transfer.source_chain_id).await?;
        if status.transfers.is_empty() {
            return Ok(());
        }

        if let Some(failed) =
            status.transfers.iter().find(|leg| leg.state == STATE_COMPLETED_ERROR)
        {
            warn!(
                tx_hash = %transfer.tx_hash,
                error = failed.error.as_deref().unwrap_or("unknown"),
                "rebalance transfer failed"
            );
            self.storage.set_rebalance_status(transfer.id, RebalanceStatus::Failed).await?;
            return Ok(());
        }

        if status.transfers.iter().all(|leg| leg.state == STATE_COMPLETED_SUCCESS) {
            info!(tx_hash = %transfer.tx_hash, "rebalance transfer completed");
            self.storage.set_rebalance_status(transfer.id, RebalanceStatus::Success).await?;
        }

        Ok(())
    }
}
