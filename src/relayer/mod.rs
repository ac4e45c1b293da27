//! Hyperlane message relayer.
//!
//! Work enters through [`RelayerRunner::submit_tx_to_relay`], called by the
//! settler and the fulfiller's timeout path (optionally inside their own
//! database transaction); the drive loop then delivers each pending transfer,
//! deferring the ones whose fee estimate exceeds their cap.

pub mod checkpoint;
pub mod client;
mod relay;

pub use client::{EvmHyperlane, HyperlaneClient, MultiClient};
pub use relay::{RelayResult, Relayer};

use crate::{
    config::SolverConfig,
    constants::RELAY_INTERVAL,
    error::RelayError,
    metrics::RelayerMetrics,
    storage::{HyperlaneTransfer, NewHyperlaneTransfer, NewSubmittedTx, Storage, queries},
    types::{TransferStatus, TxType},
};
use alloy::{hex, primitives::U256};
use sqlx::SqliteConnection;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Options for a relay submission.
#[derive(Default)]
pub struct RelayOpts<'a> {
    /// Wait before reading the dispatch, letting the source tx index.
    pub delay: Option<Duration>,
    /// Absolute delivery-fee cap in uusdc. The relayer will not submit the
    /// message while the fee estimate is above it.
    pub max_tx_fee_uusdc: Option<U256>,
    /// Run the transfer insert on this connection instead of the pool, so
    /// callers can make enqueueing atomic with their own writes.
    pub submitter: Option<&'a mut SqliteConnection>,
}

/// Drives pending hyperlane transfers to delivery.
#[derive(Debug)]
pub struct RelayerRunner {
    config: Arc<SolverConfig>,
    storage: Storage,
    clients: Arc<MultiClient>,
    relayer: Relayer,
}

impl RelayerRunner {
    pub fn new(config: Arc<SolverConfig>, storage: Storage, clients: Arc<MultiClient>) -> Self {
        let relayer = Relayer::new(config.clone(), clients.clone(), Default::default());
        Self { config, storage, clients, relayer }
    }

    /// Queues the dispatch contained in `tx_hash` for relaying. Duplicate
    /// submissions of the same message are no-ops.
    pub async fn submit_tx_to_relay(
        &self,
        tx_hash: &str,
        source_chain_id: &str,
        opts: RelayOpts<'_>,
    ) -> Result<(), RelayError> {
        if let Some(delay) = opts.delay {
            tokio::time::sleep(delay).await;
        }

        let source_chain = self.config.chain(source_chain_id).map_err(|_| {
            RelayError::CheckpointFetch(format!("unknown source chain {source_chain_id}"))
        })?;
        let origin = self.clients.client(source_chain.hyperlane_domain)?;
        let (dispatch, _) = origin.get_dispatch(tx_hash).await?;

        let destination_chain_id = self
            .config
            .chain_id_by_domain(dispatch.destination_domain)
            .ok_or(RelayError::UnknownDomain(dispatch.destination_domain))?;

        let transfer = NewHyperlaneTransfer {
            source_chain_id: source_chain_id.to_string(),
            destination_chain_id: destination_chain_id.to_string(),
            message_id: hex::encode(dispatch.message_id),
            message_sent_tx: tx_hash.to_string(),
            max_tx_fee_uusdc: opts.max_tx_fee_uusdc.map(|cap| cap.to_string()),
        };
        match opts.submitter {
            Some(conn) => queries::insert_hyperlane_transfer(&mut *conn, &transfer).await?,
            None => self.storage.insert_hyperlane_transfer(&transfer).await?,
        }

        info!(
            source_chain_id,
            destination_chain_id,
            message_id = %transfer.message_id,
            "queued tx for relay"
        );
        Ok(())
    }

    /// Runs the drive loop until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("starting hyperlane relayer");
        let mut ticker = tokio::time::interval(RELAY_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.process_pending().await {
                        error!(%err, "relayer tick failed");
                    }
                }
            }
        }
    }

    /// Processes every pending transfer once. Per-transfer failures are
    /// isolated; only a persistence failure aborts the tick.
    pub async fn process_pending(&self) -> Result<(), RelayError> {
        let transfers = self.storage.transfers_by_status(TransferStatus::Pending).await?;
        for transfer in transfers {
            if let Err(err) = self.process_transfer(&transfer).await {
                error!(
                    source_chain_id = %transfer.source_chain_id,
                    tx_hash = %transfer.message_sent_tx,
                    %err,
                    "error relaying pending hyperlane transfer"
                );
            }
        }
        Ok(())
    }

    async fn process_transfer(&self, transfer: &HyperlaneTransfer) -> Result<(), RelayError> {
        let metrics = RelayerMetrics::new_with_labels(&[
            ("source_chain_id", transfer.source_chain_id.clone()),
            ("destination_chain_id", transfer.destination_chain_id.clone()),
        ]);

        if !self.check_should_relay(transfer).await? {
            return Ok(());
        }

        let max_tx_fee_uusdc = self.effective_fee_cap(transfer)?;
        match self
            .relayer
            .relay(&transfer.source_chain_id, &transfer.message_sent_tx, max_tx_fee_uusdc)
            .await
        {
            Ok(result) => {
                self.storage
                    .insert_submitted_tx(
                        &NewSubmittedTx {
                            hyperlane_transfer_id: Some(transfer.id),
                            chain_id: result.destination_chain_id,
                            tx_hash: result.tx_hash,
                            ..Default::default()
                        },
                        TxType::HyperlaneMessageDelivery,
                    )
                    .await?;
                metrics.messages_submitted.increment(1);
                Ok(())
            }
            Err(RelayError::AlreadyDelivered) => {
                self.storage
                    .set_transfer_status(transfer, TransferStatus::Success, None)
                    .await?;
                Ok(())
            }
            Err(err @ RelayError::TooExpensive { .. }) => {
                metrics.relays_too_expensive.increment(1);
                warn!(
                    message_id = %transfer.message_id,
                    %err,
                    "not currently profitable to relay transfer, waiting for better conditions"
                );
                Ok(())
            }
            Err(err @ RelayError::NotEnoughSignatures { .. }) => {
                // Checkpoints may still be propagating; retry next tick.
                warn!(message_id = %transfer.message_id, %err, "quorum not reached yet");
                Ok(())
            }
            Err(RelayError::Chain(err)) if err.is_execution_reverted() => {
                warn!(
                    message_id = %transfer.message_id,
                    %err,
                    "abandoning hyperlane transfer"
                );
                self.storage
                    .set_transfer_status(
                        transfer,
                        TransferStatus::Abandoned,
                        Some(&err.to_string()),
                    )
                    .await?;
                metrics.transfers_abandoned.increment(1);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Returns false when the transfer needs no (further) submission: it was
    /// already delivered, or a delivery attempt is already on chain.
    async fn check_should_relay(&self, transfer: &HyperlaneTransfer) -> Result<bool, RelayError> {
        let destination_chain = self.config.chain(&transfer.destination_chain_id).map_err(|_| {
            RelayError::CheckpointFetch(format!(
                "unknown destination chain {}",
                transfer.destination_chain_id
            ))
        })?;
        let destination = self.clients.client(destination_chain.hyperlane_domain)?;

        let message_id = crate::chains::evm::parse_b256(&transfer.message_id)?;
        if destination.delivered(message_id).await? {
            self.storage.set_transfer_status(transfer, TransferStatus::Success, None).await?;
            info!(message_id = %transfer.message_id, "message has already been delivered");
            return Ok(false);
        }

        // One delivery attempt only: a second submission of a reverting
        // message would just burn gas again.
        let attempts = self.storage.submitted_txs_by_transfer(transfer.id).await?;
        if !attempts.is_empty() {
            info!(
                message_id = %transfer.message_id,
                attempt_tx = %attempts[0].tx_hash,
                "delivery attempt already made for message"
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// The fee cap to relay under: the transfer's own cap while it is young,
    /// the chain's hard cost cap once `profitable_relay_timeout` has expired.
    fn effective_fee_cap(&self, transfer: &HyperlaneTransfer) -> Result<Option<U256>, RelayError> {
        let Some(cap) = transfer.max_tx_fee_uusdc()? else {
            return Ok(None);
        };

        let Some(relayer) =
            self.config.chain(&transfer.source_chain_id).ok().and_then(|c| c.relayer.as_ref())
        else {
            return Ok(Some(cap));
        };

        let age = (chrono::Utc::now() - transfer.created_at)
            .to_std()
            .unwrap_or_default();
        if age > relayer.profitable_relay_timeout {
            info!(
                message_id = %transfer.message_id,
                cap = %cap,
                cost_cap = %relayer.relay_cost_cap_uusdc,
                "profitable relay timeout expired, relaying under the hard cost cap"
            );
            return Ok(Some(relayer.relay_cost_cap_uusdc));
        }

        Ok(Some(cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{HyperlaneState, MockHyperlane, two_chain_config, write_signed_checkpoint},
        types::TxStatus,
    };
    use alloy::{primitives::B256, signers::local::PrivateKeySigner};
    use std::time::Duration;

    /// A runner whose origin (875) and destination (42161) clients are the
    /// same scriptable mock, with one validator at threshold 1 and a valid
    /// checkpoint on disk.
    async fn runner(
        quote_uusdc: u64,
        checkpoint_dir: &std::path::Path,
    ) -> (RelayerRunner, Arc<MockHyperlane>, Storage) {
        let signer = PrivateKeySigner::random();
        let mock = MockHyperlane::new(875, HyperlaneState::default());

        let (dispatch, insertion) = MockHyperlane::dispatch(42161, b"settle it");
        let location = write_signed_checkpoint(
            checkpoint_dir,
            &signer,
            B256::repeat_byte(0x55),
            insertion.index,
            dispatch.message_id,
            mock.domain,
            mock.merkle_hook,
        );
        {
            let mut state = mock.state.lock().unwrap();
            state.dispatch = Some((dispatch, insertion));
            state.validators = vec![signer.address()];
            state.storage_locations = [(signer.address(), location)].into();
            state.quote_uusdc = U256::from(quote_uusdc);
        }

        let clients = Arc::new(MultiClient::from_clients(
            [
                (875u32, mock.clone() as Arc<dyn HyperlaneClient>),
                (42161u32, mock.clone() as Arc<dyn HyperlaneClient>),
            ]
            .into(),
        ));
        let storage = Storage::in_memory().await.unwrap();
        let runner = RelayerRunner::new(two_chain_config(), storage.clone(), clients);
        (runner, mock, storage)
    }

    #[tokio::test]
    async fn submit_and_relay_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, mock, storage) = runner(1_000, dir.path()).await;

        runner
            .submit_tx_to_relay("aa", "osmosis-1", RelayOpts::default())
            .await
            .unwrap();
        let transfers = storage.transfers_by_status(TransferStatus::Pending).await.unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].source_chain_id, "osmosis-1");
        assert_eq!(transfers[0].destination_chain_id, "42161");

        // Duplicate submissions are no-ops.
        runner
            .submit_tx_to_relay("aa", "osmosis-1", RelayOpts::default())
            .await
            .unwrap();
        assert_eq!(storage.transfers_by_status(TransferStatus::Pending).await.unwrap().len(), 1);

        runner.process_pending().await.unwrap();
        assert_eq!(mock.state.lock().unwrap().processed.len(), 1);
        let attempts = storage.submitted_txs_by_transfer(transfers[0].id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].tx_type, TxType::HyperlaneMessageDelivery);
        assert_eq!(attempts[0].tx_status, TxStatus::Pending);

        // The delivery landed: the next tick resolves the transfer.
        runner.process_pending().await.unwrap();
        assert_eq!(
            storage.transfers_by_status(TransferStatus::Success).await.unwrap().len(),
            1
        );
        // And no second delivery was attempted.
        assert_eq!(mock.state.lock().unwrap().processed.len(), 1);
    }

    #[tokio::test]
    async fn defers_expensive_relay_then_forces_through_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, mock, storage) = runner(3_000, dir.path()).await;

        // Cap of 2500 with a 3000 estimate: deferred every tick.
        runner
            .submit_tx_to_relay(
                "aa",
                "osmosis-1",
                RelayOpts { max_tx_fee_uusdc: Some(U256::from(2_500u64)), ..Default::default() },
            )
            .await
            .unwrap();
        runner.process_pending().await.unwrap();
        runner.process_pending().await.unwrap();
        assert!(mock.state.lock().unwrap().processed.is_empty());
        assert_eq!(storage.transfers_by_status(TransferStatus::Pending).await.unwrap().len(), 1);

        // Once the profitable-relay window expires the hard cost cap
        // (10000) applies and the message goes through.
        let mut config = (*two_chain_config()).clone();
        config
            .chains
            .get_mut("osmosis-1")
            .unwrap()
            .relayer
            .as_mut()
            .unwrap()
            .profitable_relay_timeout = Duration::ZERO;
        let forced = RelayerRunner {
            config: Arc::new(config),
            storage: storage.clone(),
            clients: runner.clients.clone(),
            relayer: Relayer::new(runner.config.clone(), runner.clients.clone(), Default::default()),
        };
        forced.process_pending().await.unwrap();
        assert_eq!(mock.state.lock().unwrap().processed.len(), 1);
    }

    #[tokio::test]
    async fn quorum_failure_keeps_transfer_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, mock, storage) = runner(0, dir.path()).await;

        runner
            .submit_tx_to_relay("aa", "osmosis-1", RelayOpts::default())
            .await
            .unwrap();

        // An empty validator set yields a quorum failure, which is
        // retryable: the transfer must stay pending and nothing may be
        // submitted.
        mock.state.lock().unwrap().validators.clear();
        runner.process_pending().await.unwrap();
        assert!(mock.state.lock().unwrap().processed.is_empty());
        assert_eq!(storage.transfers_by_status(TransferStatus::Pending).await.unwrap().len(), 1);
    }
}

