//! Solver domain types.

mod order;
pub use order::{FastTransferOrder, ORDER_PAYLOAD_FIXED_LEN, fee_bps};

pub mod gateway;
pub mod hyperlane;

use strum::{Display, EnumString};

/// Lifecycle of an observed order.
///
/// `Filled`, `Refunded` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, sqlx::Type)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    ExpiredPendingRefund,
    Refunded,
    Abandoned,
}

impl OrderStatus {
    /// Returns true if no further transitions are allowed from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Refunded | Self::Abandoned)
    }
}

/// Lifecycle of a settlement claim for a filled order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, sqlx::Type)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Pending,
    SettlementInitiated,
    Complete,
    Failed,
}

/// Lifecycle of a hyperlane message the relayer must deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, sqlx::Type)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Success,
    Abandoned,
    Cancelled,
}

/// Lifecycle of an inventory move between chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, sqlx::Type)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebalanceStatus {
    Pending,
    Success,
    Failed,
    Abandoned,
}

/// Status of a broadcast transaction in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, sqlx::Type)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
    Abandoned,
}

/// Kind of a broadcast transaction in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, sqlx::Type)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    OrderFill,
    Settlement,
    HyperlaneMessageDelivery,
    InitiateTimeout,
    Erc20Approval,
    FundRebalance,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_strings_match_schema() {
        assert_eq!(OrderStatus::ExpiredPendingRefund.to_string(), "EXPIRED_PENDING_REFUND");
        assert_eq!(SettlementStatus::SettlementInitiated.to_string(), "SETTLEMENT_INITIATED");
        assert_eq!(TxType::HyperlaneMessageDelivery.to_string(), "HYPERLANE_MESSAGE_DELIVERY");
        assert_eq!(OrderStatus::from_str("PENDING").unwrap(), OrderStatus::Pending);
        assert_eq!(TxType::from_str("ORDER_FILL").unwrap(), TxType::OrderFill);
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Refunded.is_terminal());
        assert!(OrderStatus::Abandoned.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::ExpiredPendingRefund.is_terminal());
    }
}
