//! Solver error types.

use alloy::transports::{RpcError, TransportErrorKind};
use thiserror::Error;

/// The solver overarching error type.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Errors related to persistence.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Errors related to chain clients.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Errors related to hyperlane relaying.
    #[error(transparent)]
    Relay(#[from] RelayError),
    /// Errors related to the price oracle.
    #[error(transparent)]
    Price(#[from] PriceError),
    /// Errors related to the external routing API.
    #[error(transparent)]
    Routing(#[from] RoutingError),
    /// Errors related to configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// An internal error occurred.
    #[error(transparent)]
    Internal(#[from] eyre::Error),
}

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    /// Migration error.
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    /// A row that must exist was not found.
    #[error("{entity} not found for key {key}")]
    NotFound {
        /// Entity name.
        entity: &'static str,
        /// Natural key of the missing row.
        key: String,
    },
    /// A stored amount could not be parsed.
    #[error("invalid amount {amount} stored for {entity}")]
    InvalidAmount {
        /// Entity name.
        entity: &'static str,
        /// The offending value.
        amount: String,
    },
    /// A stored status string is not a known enum value.
    #[error("unknown {entity} status {status}")]
    UnknownStatus {
        /// Entity name.
        entity: &'static str,
        /// The offending value.
        status: String,
    },
}

/// Errors raised by chain clients.
#[derive(Debug, Error)]
pub enum ChainError {
    /// An error occurred talking to RPC.
    #[error(transparent)]
    Rpc(#[from] RpcError<TransportErrorKind>),
    /// An error occurred ABI encoding/decoding.
    #[error(transparent)]
    Abi(#[from] alloy::sol_types::Error),
    /// An error occurred constructing or signing a transaction.
    #[error(transparent)]
    Contract(#[from] alloy::contract::Error),
    /// The transaction is not indexed yet. Callers retry on the next tick.
    #[error("tx {0} not found, not yet indexed")]
    TxNotFound(String),
    /// The transaction landed but reverted.
    #[error("tx failed: {0}")]
    TxFailed(String),
    /// No client is configured for the chain.
    #[error("unknown chain {0}")]
    UnknownChain(String),
    /// The operation is not supported by this chain type.
    #[error("operation {operation} not supported on chain {chain_id}")]
    UnsupportedOperation {
        /// Operation name.
        operation: &'static str,
        /// The chain the operation was attempted on.
        chain_id: String,
    },
    /// No signing key configured for the chain.
    #[error("no signing key for chain {0}")]
    MissingKey(String),
    /// The configured signing key could not be parsed.
    #[error("invalid signing key for chain {0}")]
    InvalidKey(String),
    /// Gateway returned data that could not be interpreted.
    #[error("malformed gateway response: {0}")]
    MalformedResponse(String),
}

impl ChainError {
    /// Returns true if the underlying failure is an on-chain execution
    /// revert, which is terminal for the submitted action.
    pub fn is_execution_reverted(&self) -> bool {
        match self {
            Self::TxFailed(msg) => msg.contains("execution reverted"),
            Self::Rpc(err) => err.to_string().contains("execution reverted"),
            Self::Contract(err) => err.to_string().contains("execution reverted"),
            _ => false,
        }
    }
}

/// Errors raised while relaying hyperlane messages.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The message has already been delivered on the destination.
    #[error("message has already been delivered")]
    AlreadyDelivered,
    /// The estimated delivery fee exceeds the transfer's fee cap.
    #[error("relay too expensive: estimated {estimate} uusdc, cap {cap} uusdc")]
    TooExpensive {
        /// Estimated delivery fee in uusdc.
        estimate: String,
        /// Configured fee cap in uusdc.
        cap: String,
    },
    /// Not enough matching signed checkpoints to reach the ISM threshold.
    #[error("expected at least {threshold} checkpoint signatures, found {found}")]
    NotEnoughSignatures {
        /// Required quorum size.
        threshold: usize,
        /// Matching signatures found.
        found: usize,
    },
    /// The message recipient has no code on the destination chain.
    #[error("recipient {0} is not a contract")]
    RecipientNotContract(String),
    /// The destination ISM is not a message-id multisig module.
    #[error("ism type {0} not supported")]
    UnsupportedIsm(u8),
    /// The source tx carries no dispatch event.
    #[error("no dispatch event found in tx {0}")]
    DispatchNotFound(String),
    /// The winning checkpoint disagrees with the dispatch.
    #[error("checkpoint mismatch: {0}")]
    CheckpointMismatch(String),
    /// A checkpoint could not be fetched from its storage location.
    #[error("fetching checkpoint: {0}")]
    CheckpointFetch(String),
    /// The hyperlane domain is not present in the config.
    #[error("no chain configured for hyperlane domain {0}")]
    UnknownDomain(u32),
    /// Underlying chain error.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Underlying storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Underlying price oracle error.
    #[error(transparent)]
    Price(#[from] PriceError),
}

/// Errors raised by the price oracle.
#[derive(Debug, Error)]
pub enum PriceError {
    /// The price feed request failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The price feed responded with something unparseable.
    #[error("price feed returned no usable price for {0}")]
    Unavailable(String),
}

/// Errors raised by the external routing API client.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// The routing API request failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The routing API rejected the request.
    #[error("routing api error: {0}")]
    Api(String),
    /// The returned route is missing data the rebalancer needs.
    #[error("unusable route: {0}")]
    UnusableRoute(String),
}

/// Errors raised at config load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The config file could not be parsed.
    #[error(transparent)]
    Parse(#[from] serde_yaml::Error),
    /// A validation rule failed.
    #[error("invalid config for chain {chain_id}: {reason}")]
    Invalid {
        /// The offending chain.
        chain_id: String,
        /// Which rule failed.
        reason: String,
    },
}
