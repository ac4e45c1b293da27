//! Execution of routing-API transactions on EVM chains.

use super::skipgo::{Erc20Approval, EvmTx};
use crate::{config::SolverConfig, error::ChainError, keys::KeyStore};
use alloy::{
    hex,
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Bytes, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use std::{collections::HashMap, fmt::Debug, sync::Arc};
use tokio::sync::Mutex;

type Result<T> = std::result::Result<T, ChainError>;

/// Simulates and broadcasts rebalance transactions.
///
/// A separate seam from [`crate::chains::ChainClient`]: routing-API
/// transactions are arbitrary contract calls, not gateway operations.
#[async_trait]
pub trait RebalanceTxExecutor: Send + Sync + Debug {
    /// Estimated (gas, gas price in wei) of executing `tx`.
    async fn estimate_gas(&self, tx: &EvmTx) -> Result<(u64, u128)>;

    /// Signs and broadcasts `tx`, returning the tx hash.
    async fn execute(&self, tx: &EvmTx) -> Result<String>;

    /// Executes an ERC-20 approval required by a route, returning the tx
    /// hash.
    async fn approve_erc20(&self, chain_id: &str, approval: &Erc20Approval) -> Result<String>;
}

/// [`RebalanceTxExecutor`] over per-chain alloy providers.
#[derive(Debug)]
pub struct EvmRebalanceExecutor {
    config: Arc<SolverConfig>,
    keystore: KeyStore,
    providers: Mutex<HashMap<String, DynProvider>>,
}

impl EvmRebalanceExecutor {
    pub fn new(config: Arc<SolverConfig>, keystore: KeyStore) -> Self {
        Self { config, keystore, providers: Mutex::new(HashMap::new()) }
    }

    async fn provider(&self, chain_id: &str) -> Result<DynProvider> {
        let mut providers = self.providers.lock().await;
        if let Some(provider) = providers.get(chain_id) {
            return Ok(provider.clone());
        }

        let chain = self
            .config
            .chains
            .get(chain_id)
            .ok_or_else(|| ChainError::UnknownChain(chain_id.to_string()))?;
        let evm =
            chain.evm.as_ref().ok_or_else(|| ChainError::UnknownChain(chain_id.to_string()))?;
        let key = self
            .keystore
            .key_for_chain(chain_id)
            .ok_or_else(|| ChainError::MissingKey(chain_id.to_string()))?;
        let signer: PrivateKeySigner = key
            .private_key
            .parse()
            .map_err(|_| ChainError::InvalidKey(chain_id.to_string()))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(evm.rpc.clone())
            .erased();
        providers.insert(chain_id.to_string(), provider.clone());
        Ok(provider)
    }

    fn request(tx: &EvmTx) -> Result<TransactionRequest> {
        let to = crate::chains::evm::parse_address(&tx.to)?;
        let value = if tx.value.is_empty() {
            U256::ZERO
        } else {
            tx.value.parse().map_err(|_| {
                ChainError::MalformedResponse(format!("invalid route tx value {}", tx.value))
            })?
        };
        let data: Bytes = if tx.data.is_empty() {
            Bytes::new()
        } else {
            hex::decode(&tx.data)
                .map_err(|_| {
                    ChainError::MalformedResponse("route tx data is not hex".to_string())
                })?
                .into()
        };

        Ok(TransactionRequest::default().with_to(to).with_value(value).with_input(data))
    }
}

#[async_trait]
impl RebalanceTxExecutor for EvmRebalanceExecutor {
    async fn estimate_gas(&self, tx: &EvmTx) -> Result<(u64, u128)> {
        let provider = self.provider(&tx.chain_id).await?;
        let gas = provider.estimate_gas(Self::request(tx)?).await?;
        let gas_price = provider.get_gas_price().await?;
        Ok((gas, gas_price))
    }

    async fn execute(&self, tx: &EvmTx) -> Result<String> {
        let provider = self.provider(&tx.chain_id).await?;
        let pending = provider.send_transaction(Self::request(tx)?).await?;
        Ok(hex::encode(pending.tx_hash()))
    }

    async fn approve_erc20(&self, chain_id: &str, approval: &Erc20Approval) -> Result<String> {
        let provider = self.provider(chain_id).await?;
        let token = crate::chains::evm::IERC20::new(
            crate::chains::evm::parse_address(&approval.token_contract)?,
            provider,
        );
        let amount: U256 = approval.amount.parse().map_err(|_| {
            ChainError::MalformedResponse(format!("invalid approval amount {}", approval.amount))
        })?;

        let pending = token
            .approve(crate::chains::evm::parse_address(&approval.spender)?, amount)
            .send()
            .await?;
        Ok(hex::encode(pending.tx_hash()))
    }
}
