//! The relay protocol: dispatch lookup, quorum assembly, cost gating,
//! destination submission.

use super::{
    checkpoint::{CheckpointFetcher, checkpoint_at_index},
    client::MultiClient,
};
use crate::{config::SolverConfig, error::RelayError};
use alloy::{hex, primitives::U256};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info};

type Result<T> = std::result::Result<T, RelayError>;

/// Outcome of a successful relay.
#[derive(Debug, Clone)]
pub struct RelayResult {
    /// The `process` transaction on the destination chain.
    pub tx_hash: String,
    /// The destination chain.
    pub destination_chain_id: String,
}

/// Delivers dispatched hyperlane messages to their destination mailbox.
#[derive(Debug)]
pub struct Relayer {
    config: Arc<SolverConfig>,
    clients: Arc<MultiClient>,
    /// Validator address (lowercase hex, no prefix) → replacement storage
    /// location.
    storage_location_overrides: HashMap<String, String>,
}

impl Relayer {
    pub fn new(
        config: Arc<SolverConfig>,
        clients: Arc<MultiClient>,
        storage_location_overrides: HashMap<String, String>,
    ) -> Self {
        Self { config, clients, storage_location_overrides }
    }

    /// Relays the dispatch contained in `tx_hash` on `source_chain_id` to its
    /// destination mailbox.
    ///
    /// With `max_tx_fee_uusdc` set, the destination fee estimate is checked
    /// against the cap before submitting and [`RelayError::TooExpensive`] is
    /// returned when it does not fit.
    pub async fn relay(
        &self,
        source_chain_id: &str,
        tx_hash: &str,
        max_tx_fee_uusdc: Option<U256>,
    ) -> Result<RelayResult> {
        let source_chain =
            self.config.chain(source_chain_id).map_err(|_| {
                RelayError::CheckpointFetch(format!("unknown source chain {source_chain_id}"))
            })?;
        let origin = self.clients.client(source_chain.hyperlane_domain)?;

        let (dispatch, insertion) = origin.get_dispatch(tx_hash).await?;
        let destination = self.clients.client(dispatch.destination_domain)?;
        let destination_chain_id = self
            .config
            .chain_id_by_domain(dispatch.destination_domain)
            .ok_or(RelayError::UnknownDomain(dispatch.destination_domain))?
            .to_string();

        if destination.delivered(dispatch.message_id).await? {
            return Err(RelayError::AlreadyDelivered);
        }

        if !destination.is_contract(dispatch.recipient).await? {
            return Err(RelayError::RecipientNotContract(hex::encode(dispatch.recipient)));
        }

        let (validators, threshold) = destination
            .validators_and_threshold(dispatch.recipient, &dispatch.message)
            .await?;
        if validators.is_empty() {
            return Err(RelayError::NotEnoughSignatures { threshold: threshold as usize, found: 0 });
        }
        debug!(
            validators = validators.len(),
            threshold,
            message_id = %hex::encode(dispatch.message_id),
            "got validators and threshold from recipient ism"
        );

        let locations = origin.validator_storage_locations(&validators).await?;
        let fetchers = locations
            .iter()
            .map(|(validator, location)| {
                let location = self
                    .storage_location_overrides
                    .get(&hex::encode(validator))
                    .unwrap_or(location);
                CheckpointFetcher::from_storage_location(*validator, location)
            })
            .collect::<Result<Vec<_>>>()?;

        let quorum = checkpoint_at_index(
            &fetchers,
            insertion.index,
            threshold as usize,
            origin.domain(),
            origin.merkle_hook(),
            dispatch.message_id,
        )
        .await?;
        debug!(index = insertion.index, "found checkpoint with quorum");

        let metadata = quorum.to_metadata(origin.merkle_hook());

        if let Some(cap) = max_tx_fee_uusdc {
            let estimate = destination.quote_process_uusdc(&dispatch.message, &metadata).await?;
            if estimate > cap {
                return Err(RelayError::TooExpensive {
                    estimate: estimate.to_string(),
                    cap: cap.to_string(),
                });
            }
        }

        let process_tx = destination.process(&dispatch.message, &metadata).await?;
        info!(
            source_chain_id,
            destination_chain_id = %destination_chain_id,
            dispatch_tx = tx_hash,
            process_tx = %process_tx,
            "relayed hyperlane message"
        );

        Ok(RelayResult { tx_hash: process_tx, destination_chain_id })
    }
}
