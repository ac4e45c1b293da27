//! Shared test doubles.

use crate::{
    chains::{CosmosGateway, Fill, OrderFillEvent, SubmittedChainTx, TxResult},
    config::{
        CoinGeckoConfig, MetricsConfig, OrderFillerConfig, SolverConfig, TransferMonitorConfig,
        tests::{cosmos_chain, evm_chain},
    },
    error::ChainError,
    keys::{ChainKey, KeyStore},
    relayer::HyperlaneClient,
    storage::{NewOrder, Order, OrderSettlement, Storage},
    types::hyperlane::{DispatchedMessage, MerkleHookInsertion},
};
use alloy::primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// A config with EVM chain `42161` (domain 42161) and Cosmos chain
/// `osmosis-1` (domain 875).
pub(crate) fn two_chain_config() -> Arc<SolverConfig> {
    Arc::new(SolverConfig {
        chains: [
            ("42161".to_string(), evm_chain("42161", 42161)),
            ("osmosis-1".to_string(), cosmos_chain("osmosis-1", 875)),
        ]
        .into(),
        order_filler: OrderFillerConfig::default(),
        transfer_monitor: TransferMonitorConfig::default(),
        fund_rebalancer: HashMap::new(),
        metrics: MetricsConfig::default(),
        coingecko: CoinGeckoConfig::default(),
    })
}

/// A key store holding a valid signing key for the EVM test chain.
pub(crate) fn test_keystore() -> KeyStore {
    KeyStore::from_keys(
        [(
            "42161".to_string(),
            ChainKey {
                private_key:
                    "0x0000000000000000000000000000000000000000000000000000000000000001"
                        .to_string(),
                address: "0x00000000000000000000000000000000000000bb".to_string(),
            },
        )]
        .into(),
    )
}

/// Inserts a pending order and returns its stored row.
pub(crate) async fn insert_order(
    storage: &Storage,
    order_id: &str,
    amount_in: u64,
    amount_out: u64,
    timeout_in: Duration,
) -> Order {
    storage
        .insert_order(&NewOrder {
            source_chain_id: "42161".to_string(),
            destination_chain_id: "osmosis-1".to_string(),
            source_chain_gateway_address: "0x00000000000000000000000000000000000000aa"
                .to_string(),
            sender: vec![1; 32],
            recipient: vec![2; 32],
            amount_in: amount_in.to_string(),
            amount_out: amount_out.to_string(),
            nonce: 1,
            order_id: order_id.to_string(),
            order_creation_tx: "11".repeat(32),
            order_creation_tx_block_height: 100,
            timeout_timestamp: Utc::now() + timeout_in,
            data: None,
        })
        .await
        .unwrap();

    storage
        .orders_by_status(crate::types::OrderStatus::Pending)
        .await
        .unwrap()
        .into_iter()
        .find(|order| order.order_id == order_id)
        .unwrap()
}

/// Mutable state of a [`MockGateway`].
#[derive(Debug, Default)]
pub(crate) struct GatewayState {
    pub balance: U256,
    pub fill_event: Option<OrderFillEvent>,
    pub block_time: Option<DateTime<Utc>>,
    pub fills: Vec<Fill>,
    pub tx_results: HashMap<String, TxResult>,
    /// Transactions the gateway was asked to broadcast, as (op, tx hash).
    pub broadcasts: Vec<(&'static str, String)>,
}

/// Scriptable [`CosmosGateway`].
#[derive(Debug)]
pub(crate) struct MockGateway {
    pub chain_id: String,
    pub state: Mutex<GatewayState>,
}

impl MockGateway {
    pub(crate) fn new(chain_id: &str, state: GatewayState) -> Arc<Self> {
        Arc::new(Self { chain_id: chain_id.to_string(), state: Mutex::new(state) })
    }
}

#[async_trait]
impl CosmosGateway for MockGateway {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn balance(&self, _address: &str, _denom: &str) -> Result<U256, ChainError> {
        Ok(self.state.lock().unwrap().balance)
    }

    async fn signer_gas_balance(&self) -> Result<U256, ChainError> {
        Ok(U256::ZERO)
    }

    async fn block_height(&self) -> Result<u64, ChainError> {
        Ok(1)
    }

    async fn fill_order(
        &self,
        order: &Order,
        _gateway: &str,
    ) -> Result<SubmittedChainTx, ChainError> {
        let tx_hash = format!("fill-{}", order.order_id);
        self.state.lock().unwrap().broadcasts.push(("fill_order", tx_hash.clone()));
        Ok(SubmittedChainTx { tx_hash, raw_tx: "raw".to_string() })
    }

    async fn initiate_batch_settlement(
        &self,
        batch: &[OrderSettlement],
        _gateway: &str,
    ) -> Result<SubmittedChainTx, ChainError> {
        let tx_hash = format!("settle-{}", batch.len());
        self.state.lock().unwrap().broadcasts.push(("initiate_batch_settlement", tx_hash.clone()));
        Ok(SubmittedChainTx { tx_hash, raw_tx: "raw".to_string() })
    }

    async fn initiate_timeout(
        &self,
        order: &Order,
        _gateway: &str,
    ) -> Result<SubmittedChainTx, ChainError> {
        let tx_hash = format!("timeout-{}", order.order_id);
        self.state.lock().unwrap().broadcasts.push(("initiate_timeout", tx_hash.clone()));
        Ok(SubmittedChainTx { tx_hash, raw_tx: "raw".to_string() })
    }

    async fn order_fills_by_filler(
        &self,
        _gateway: &str,
        _filler: &str,
    ) -> Result<Vec<Fill>, ChainError> {
        Ok(self.state.lock().unwrap().fills.clone())
    }

    async fn query_order_fill_event(
        &self,
        _gateway: &str,
        _order_id: &str,
    ) -> Result<(Option<OrderFillEvent>, DateTime<Utc>), ChainError> {
        let state = self.state.lock().unwrap();
        Ok((state.fill_event.clone(), state.block_time.unwrap_or_else(Utc::now)))
    }

    async fn get_tx_result(&self, tx_hash: &str) -> Result<TxResult, ChainError> {
        self.state
            .lock()
            .unwrap()
            .tx_results
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| ChainError::TxNotFound(tx_hash.to_string()))
    }
}

/// Mutable state of a [`MockHyperlane`].
#[derive(Debug)]
pub(crate) struct HyperlaneState {
    pub dispatch: Option<(DispatchedMessage, MerkleHookInsertion)>,
    pub delivered: bool,
    pub validators: Vec<Address>,
    pub threshold: u8,
    pub storage_locations: HashMap<Address, String>,
    pub quote_uusdc: U256,
    pub processed: Vec<String>,
}

impl Default for HyperlaneState {
    fn default() -> Self {
        Self {
            dispatch: None,
            delivered: false,
            validators: vec![],
            threshold: 1,
            storage_locations: HashMap::new(),
            quote_uusdc: U256::ZERO,
            processed: vec![],
        }
    }
}

/// Scriptable [`HyperlaneClient`], usable as both origin and destination.
#[derive(Debug)]
pub(crate) struct MockHyperlane {
    pub domain: u32,
    pub merkle_hook: B256,
    pub state: Mutex<HyperlaneState>,
}

impl MockHyperlane {
    pub(crate) fn new(domain: u32, state: HyperlaneState) -> Arc<Self> {
        Arc::new(Self { domain, merkle_hook: B256::repeat_byte(0x77), state: Mutex::new(state) })
    }

    /// A dispatch of `message` bound for `destination_domain` at tree index
    /// 0.
    pub(crate) fn dispatch(
        destination_domain: u32,
        message: &[u8],
    ) -> (DispatchedMessage, MerkleHookInsertion) {
        let message = Bytes::copy_from_slice(message);
        let message_id = alloy::primitives::keccak256(&message);
        (
            DispatchedMessage {
                destination_domain,
                recipient: B256::repeat_byte(0x44),
                message,
                message_id,
            },
            MerkleHookInsertion { message_id, index: 0 },
        )
    }
}

#[async_trait]
impl HyperlaneClient for MockHyperlane {
    fn domain(&self) -> u32 {
        self.domain
    }

    fn merkle_hook(&self) -> B256 {
        self.merkle_hook
    }

    async fn get_dispatch(
        &self,
        tx_hash: &str,
    ) -> Result<(DispatchedMessage, MerkleHookInsertion), crate::error::RelayError> {
        self.state
            .lock()
            .unwrap()
            .dispatch
            .clone()
            .ok_or_else(|| ChainError::TxNotFound(tx_hash.to_string()).into())
    }

    async fn delivered(&self, _message_id: B256) -> Result<bool, crate::error::RelayError> {
        Ok(self.state.lock().unwrap().delivered)
    }

    async fn is_contract(&self, _recipient: B256) -> Result<bool, crate::error::RelayError> {
        Ok(true)
    }

    async fn validators_and_threshold(
        &self,
        _recipient: B256,
        _message: &Bytes,
    ) -> Result<(Vec<Address>, u8), crate::error::RelayError> {
        let state = self.state.lock().unwrap();
        Ok((state.validators.clone(), state.threshold))
    }

    async fn validator_storage_locations(
        &self,
        validators: &[Address],
    ) -> Result<HashMap<Address, String>, crate::error::RelayError> {
        let state = self.state.lock().unwrap();
        Ok(validators
            .iter()
            .filter_map(|validator| {
                state.storage_locations.get(validator).map(|loc| (*validator, loc.clone()))
            })
            .collect())
    }

    async fn quote_process_uusdc(
        &self,
        _message: &Bytes,
        _metadata: &Bytes,
    ) -> Result<U256, crate::error::RelayError> {
        Ok(self.state.lock().unwrap().quote_uusdc)
    }

    async fn process(
        &self,
        _message: &Bytes,
        _metadata: &Bytes,
    ) -> Result<String, crate::error::RelayError> {
        let mut state = self.state.lock().unwrap();
        let tx_hash = format!("process-{}", state.processed.len());
        state.processed.push(tx_hash.clone());
        state.delivered = true;
        Ok(tx_hash)
    }
}

/// Writes a validly signed checkpoint for `signer` into `dir` and returns
/// the `file://` storage location.
pub(crate) fn write_signed_checkpoint(
    dir: &std::path::Path,
    signer: &alloy::signers::local::PrivateKeySigner,
    root: B256,
    index: u32,
    message_id: B256,
    origin_domain: u32,
    origin_merkle_hook: B256,
) -> String {
    use alloy::{primitives::keccak256, signers::SignerSync};

    let mut domain = Vec::new();
    domain.extend_from_slice(&origin_domain.to_be_bytes());
    domain.extend_from_slice(origin_merkle_hook.as_slice());
    domain.extend_from_slice(b"HYPERLANE");
    let domain_hash = keccak256(&domain);

    let mut digest = Vec::new();
    digest.extend_from_slice(domain_hash.as_slice());
    digest.extend_from_slice(root.as_slice());
    digest.extend_from_slice(&index.to_be_bytes());
    digest.extend_from_slice(message_id.as_slice());
    let signature = signer.sign_message_sync(keccak256(&digest).as_slice()).unwrap();

    std::fs::write(
        dir.join(format!("signed_checkpoint_{index}.json")),
        serde_json::json!({
            "value": {
                "checkpoint": { "root": root, "index": index },
                "message_id": message_id,
            },
            "signature": {
                "r": format!("{:#x}", signature.r()),
                "s": format!("{:#x}", signature.s()),
                "v": 27 + signature.v() as u64,
            },
        })
        .to_string(),
    )
    .unwrap();

    format!("file://{}", dir.display())
}
