//! EVM gateway client.

use super::{SubmittedChainTx, TxResult};
use crate::{
    config::{ChainConfig, SolverConfig},
    error::ChainError,
    storage::Order,
    types::{
        FastTransferOrder,
        gateway::{GATEWAY_ORDER_REFUNDED, IFastTransferGateway},
    },
};
use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    hex,
    network::EthereumWallet,
    primitives::{Address, B256, Bytes, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::Filter,
    signers::local::PrivateKeySigner,
    sol_types::SolEvent,
};
use std::sync::Arc;
use tokio::sync::Mutex;

type Result<T> = std::result::Result<T, ChainError>;

/// Client for a single EVM chain's fast-transfer gateway.
#[derive(Debug)]
pub struct EvmClient {
    config: Arc<SolverConfig>,
    chain_id: String,
    solver_address: Address,
    provider: DynProvider,
    /// Serializes submissions from the solver's signer so concurrent loops
    /// cannot race the account nonce.
    send_lock: Mutex<()>,
}

impl EvmClient {
    /// Connects to the chain's HTTP endpoint with the solver's signing key
    /// attached.
    pub async fn connect(
        config: Arc<SolverConfig>,
        chain: &ChainConfig,
        keystore: &crate::keys::KeyStore,
    ) -> Result<Self> {
        let evm = chain
            .evm
            .as_ref()
            .ok_or_else(|| ChainError::UnknownChain(chain.chain_id.clone()))?;
        let key = keystore
            .key_for_chain(&chain.chain_id)
            .ok_or_else(|| ChainError::MissingKey(chain.chain_id.clone()))?;
        let signer: PrivateKeySigner = key
            .private_key
            .parse()
            .map_err(|_| ChainError::InvalidKey(chain.chain_id.clone()))?;
        let solver_address = parse_address(&chain.solver_address)?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(evm.rpc.clone())
            .erased();

        Ok(Self {
            config,
            chain_id: chain.chain_id.clone(),
            solver_address,
            provider,
            send_lock: Mutex::new(()),
        })
    }

    /// The chain this client talks to.
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub async fn balance(&self, address: &str, denom: &str) -> Result<U256> {
        let token = IERC20::new(parse_address(denom)?, self.provider.clone());
        Ok(token.balanceOf(parse_address(address)?).call().await?)
    }

    pub async fn signer_gas_balance(&self) -> Result<U256> {
        Ok(self.provider.get_balance(self.solver_address).await?)
    }

    pub async fn block_height(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    pub async fn fill_order(&self, order: &Order, gateway: &str) -> Result<SubmittedChainTx> {
        let gateway = IFastTransferGateway::new(parse_address(gateway)?, self.provider.clone());
        let call = gateway.fillOrder(parse_order_id(&order.order_id)?, self.order_payload(order)?);
        let raw_tx = hex::encode(call.calldata());

        let _guard = self.send_lock.lock().await;
        let pending = call.send().await?;
        Ok(SubmittedChainTx { tx_hash: hex::encode(pending.tx_hash()), raw_tx })
    }

    pub async fn initiate_timeout(&self, order: &Order, gateway: &str) -> Result<SubmittedChainTx> {
        let gateway = IFastTransferGateway::new(parse_address(gateway)?, self.provider.clone());
        let call = gateway.initiateTimeout(self.order_payload(order)?);
        let raw_tx = hex::encode(call.calldata());

        let _guard = self.send_lock.lock().await;
        let pending = call.send().await?;
        Ok(SubmittedChainTx { tx_hash: hex::encode(pending.tx_hash()), raw_tx })
    }

    pub async fn order_status(&self, gateway: &str, order_id: &str) -> Result<u8> {
        let gateway = IFastTransferGateway::new(parse_address(gateway)?, self.provider.clone());
        Ok(gateway.orderStatuses(parse_order_id(order_id)?).call().await?)
    }

    pub async fn is_settlement_complete(&self, gateway: &str, order_id: &str) -> Result<bool> {
        let gateway = IFastTransferGateway::new(parse_address(gateway)?, self.provider.clone());
        Ok(gateway.settled(parse_order_id(order_id)?).call().await?)
    }

    pub async fn order_exists(
        &self,
        gateway: &str,
        order_id: &str,
        block_height: Option<u64>,
    ) -> Result<(bool, U256)> {
        let gateway = IFastTransferGateway::new(parse_address(gateway)?, self.provider.clone());
        let mut call = gateway.orders(parse_order_id(order_id)?);
        if let Some(height) = block_height {
            call = call.block(BlockId::number(height));
        }
        let amount = call.call().await?;
        Ok((!amount.is_zero(), amount))
    }

    pub async fn is_order_refunded(
        &self,
        gateway: &str,
        order_id: &str,
    ) -> Result<(bool, Option<String>)> {
        let gateway_address = parse_address(gateway)?;
        let gateway = IFastTransferGateway::new(gateway_address, self.provider.clone());
        let order_id = parse_order_id(order_id)?;
        if gateway.orderStatuses(order_id).call().await? != GATEWAY_ORDER_REFUNDED {
            return Ok((false, None));
        }

        let filter = Filter::new()
            .address(gateway_address)
            .event_signature(IFastTransferGateway::OrderRefunded::SIGNATURE_HASH)
            .topic1(order_id)
            .from_block(BlockNumberOrTag::Earliest);
        let refund_tx = self
            .provider
            .get_logs(&filter)
            .await?
            .last()
            .and_then(|log| log.transaction_hash)
            .map(hex::encode);

        Ok((true, refund_tx))
    }

    pub async fn get_tx_result(&self, tx_hash: &str) -> Result<TxResult> {
        let hash = parse_b256(tx_hash)?;
        let Some(receipt) = self.provider.get_transaction_receipt(hash).await? else {
            return Err(ChainError::TxNotFound(tx_hash.to_string()));
        };

        let gas_cost =
            U256::from(receipt.gas_used) * U256::from(receipt.effective_gas_price);
        let failure = (!receipt.status()).then(|| "execution reverted".to_string());
        Ok(TxResult { gas_cost, failure })
    }

    /// Reassembles the packed order payload from a stored order row.
    fn order_payload(&self, order: &Order) -> Result<Bytes> {
        let malformed =
            |what: &str| ChainError::MalformedResponse(format!("stored order {what}"));

        let source = self
            .config
            .chains
            .get(&order.source_chain_id)
            .ok_or_else(|| ChainError::UnknownChain(order.source_chain_id.clone()))?;
        let destination = self
            .config
            .chains
            .get(&order.destination_chain_id)
            .ok_or_else(|| ChainError::UnknownChain(order.destination_chain_id.clone()))?;

        let data = match &order.data {
            Some(data) => {
                hex::decode(data).map_err(|_| malformed("data is not hex"))?.into()
            }
            None => Bytes::new(),
        };

        Ok(FastTransferOrder {
            sender: B256::try_from(order.sender.as_slice())
                .map_err(|_| malformed("sender is not 32 bytes"))?,
            recipient: B256::try_from(order.recipient.as_slice())
                .map_err(|_| malformed("recipient is not 32 bytes"))?,
            amount_in: order.amount_in()
                .map_err(|_| malformed("amount_in is not an integer"))?,
            amount_out: order.amount_out()
                .map_err(|_| malformed("amount_out is not an integer"))?,
            nonce: order.nonce as u32,
            source_domain: source.hyperlane_domain,
            destination_domain: destination.hyperlane_domain,
            timeout_timestamp: order.timeout_timestamp.timestamp() as u64,
            data,
        }
        .encode())
    }
}

alloy::sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

pub(crate) fn parse_address(address: &str) -> Result<Address> {
    address
        .parse()
        .map_err(|_| ChainError::MalformedResponse(format!("invalid address {address}")))
}

pub(crate) fn parse_b256(value: &str) -> Result<B256> {
    let bytes = hex::decode(value)
        .map_err(|_| ChainError::MalformedResponse(format!("invalid 32-byte value {value}")))?;
    B256::try_from(bytes.as_slice())
        .map_err(|_| ChainError::MalformedResponse(format!("invalid 32-byte value {value}")))
}

pub(crate) fn parse_order_id(order_id: &str) -> Result<B256> {
    parse_b256(order_id)
}
