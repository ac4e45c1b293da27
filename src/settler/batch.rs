//! Settlement batches.

use crate::{error::StorageError, storage::OrderSettlement};
use alloy::primitives::U256;
use itertools::Itertools;
use std::fmt;

/// Settlements sharing a `(source, destination)` chain pair, settled by one
/// initiation transaction.
#[derive(Debug, Clone)]
pub struct SettlementBatch {
    settlements: Vec<OrderSettlement>,
}

impl SettlementBatch {
    /// Groups uninitiated settlements into per-pair batches.
    pub fn group(settlements: Vec<OrderSettlement>) -> Vec<Self> {
        settlements
            .into_iter()
            .into_group_map_by(|settlement| {
                (settlement.source_chain_id.clone(), settlement.destination_chain_id.clone())
            })
            .into_values()
            .map(|settlements| Self { settlements })
            .collect()
    }

    /// The chain the batch pays out on.
    pub fn source_chain_id(&self) -> &str {
        &self.settlements[0].source_chain_id
    }

    /// The chain the batch is initiated on.
    pub fn destination_chain_id(&self) -> &str {
        &self.settlements[0].destination_chain_id
    }

    /// The settlements in the batch.
    pub fn settlements(&self) -> &[OrderSettlement] {
        &self.settlements
    }

    /// Order ids in the batch.
    pub fn order_ids(&self) -> Vec<&str> {
        self.settlements.iter().map(|settlement| settlement.order_id.as_str()).collect()
    }

    /// Sum of the batch's settlement amounts (the orders' `amount_in`).
    pub fn total_value(&self) -> Result<U256, StorageError> {
        let mut total = U256::ZERO;
        for settlement in &self.settlements {
            total += settlement.amount()?;
        }
        Ok(total)
    }
}

impl fmt::Display for SettlementBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({} settlements)",
            self.destination_chain_id(),
            self.source_chain_id(),
            self.settlements.len(),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::SettlementStatus;
    use chrono::Utc;

    pub(crate) fn settlement(
        source: &str,
        destination: &str,
        order_id: &str,
        amount: u64,
    ) -> OrderSettlement {
        OrderSettlement {
            id: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            source_chain_id: source.into(),
            destination_chain_id: destination.into(),
            source_chain_gateway_address: "0xaa".into(),
            order_id: order_id.into(),
            amount: amount.to_string(),
            settlement_status: SettlementStatus::Pending,
            settlement_status_message: None,
            initiate_settlement_tx: None,
            complete_settlement_tx: None,
        }
    }

    #[test]
    fn groups_by_chain_pair() {
        let batches = SettlementBatch::group(vec![
            settlement("42161", "osmosis-1", "aa", 1),
            settlement("8453", "osmosis-1", "bb", 2),
            settlement("42161", "osmosis-1", "cc", 3),
        ]);

        assert_eq!(batches.len(), 2);
        let arb = batches.iter().find(|batch| batch.source_chain_id() == "42161").unwrap();
        assert_eq!(arb.settlements().len(), 2);
        assert_eq!(arb.total_value().unwrap(), U256::from(4u64));
    }

    #[test]
    fn total_value_rejects_bad_amounts() {
        let mut bad = settlement("42161", "osmosis-1", "aa", 1);
        bad.amount = "not-a-number".into();
        let batch = SettlementBatch::group(vec![bad]).remove(0);
        assert!(batch.total_value().is_err());
    }
}
