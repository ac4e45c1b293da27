//! Hyperlane chain clients.

use crate::{
    config::{ChainConfig, ChainType, SolverConfig},
    error::{ChainError, RelayError},
    keys::KeyStore,
    price::TxPriceOracle,
    types::hyperlane::{
        DispatchedMessage, IInterchainSecurityModule, IMailbox, IMerkleTreeHook, IMultisigIsm,
        ISM_TYPE_MESSAGE_ID_MULTISIG, IValidatorAnnounce, MerkleHookInsertion,
    },
};
use alloy::{
    hex,
    network::EthereumWallet,
    primitives::{Address, B256, Bytes, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
    sol_types::SolEvent,
};
use async_trait::async_trait;
use std::{collections::HashMap, fmt::Debug, sync::Arc};
use tokio::sync::Mutex;
use tracing::debug;

type Result<T> = std::result::Result<T, RelayError>;

/// Mailbox-side operations the relayer needs on one chain.
///
/// The EVM implementation lives here; Cosmos mailboxes are external
/// collaborators registered on the [`MultiClient`] behind the same trait.
#[async_trait]
pub trait HyperlaneClient: Send + Sync + Debug {
    /// The chain's hyperlane domain.
    fn domain(&self) -> u32;

    /// The chain's merkle tree hook, left-padded to 32 bytes. Part of the
    /// checkpoint signing domain and of the ISM metadata.
    fn merkle_hook(&self) -> B256;

    /// Reads the dispatch and merkle-hook events out of a source
    /// transaction. [`ChainError::TxNotFound`] while the tx is unindexed.
    async fn get_dispatch(
        &self,
        tx_hash: &str,
    ) -> Result<(DispatchedMessage, MerkleHookInsertion)>;

    /// Whether the mailbox has delivered the message.
    async fn delivered(&self, message_id: B256) -> Result<bool>;

    /// Whether `recipient` has code on this chain.
    async fn is_contract(&self, recipient: B256) -> Result<bool>;

    /// The validator set and quorum threshold the recipient's ISM requires
    /// for `message`.
    async fn validators_and_threshold(
        &self,
        recipient: B256,
        message: &Bytes,
    ) -> Result<(Vec<Address>, u8)>;

    /// Checkpoint storage location announced by each validator on this
    /// (origin) chain.
    async fn validator_storage_locations(
        &self,
        validators: &[Address],
    ) -> Result<HashMap<Address, String>>;

    /// Estimated cost, in uusdc, of processing `message` with `metadata` on
    /// this chain's mailbox.
    async fn quote_process_uusdc(&self, message: &Bytes, metadata: &Bytes) -> Result<U256>;

    /// Submits `process(message, metadata)` to the mailbox, returning the tx
    /// hash.
    async fn process(&self, message: &Bytes, metadata: &Bytes) -> Result<String>;
}

/// [`HyperlaneClient`] over an EVM chain.
#[derive(Debug)]
pub struct EvmHyperlane {
    domain: u32,
    provider: DynProvider,
    mailbox: Address,
    validator_announce: Address,
    merkle_hook: Address,
    oracle: TxPriceOracle,
    /// The recipient ISM is resolved once and cached.
    ism_address: Mutex<Option<Address>>,
    send_lock: Mutex<()>,
}

impl EvmHyperlane {
    /// Connects to the chain's HTTP endpoint with the solver's signing key
    /// attached.
    pub fn connect(
        chain: &ChainConfig,
        keystore: &KeyStore,
        oracle: TxPriceOracle,
    ) -> std::result::Result<Self, ChainError> {
        let evm =
            chain.evm.as_ref().ok_or_else(|| ChainError::UnknownChain(chain.chain_id.clone()))?;
        let relayer = chain
            .relayer
            .as_ref()
            .ok_or_else(|| ChainError::UnknownChain(chain.chain_id.clone()))?;
        let key = keystore
            .key_for_chain(&chain.chain_id)
            .ok_or_else(|| ChainError::MissingKey(chain.chain_id.clone()))?;
        let signer: PrivateKeySigner = key
            .private_key
            .parse()
            .map_err(|_| ChainError::InvalidKey(chain.chain_id.clone()))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(evm.rpc.clone())
            .erased();

        Ok(Self {
            domain: chain.hyperlane_domain,
            provider,
            mailbox: crate::chains::evm::parse_address(&relayer.mailbox_address)?,
            validator_announce: crate::chains::evm::parse_address(
                &relayer.validator_announce_address,
            )?,
            merkle_hook: crate::chains::evm::parse_address(&relayer.merkle_hook_address)?,
            oracle,
            ism_address: Mutex::new(None),
            send_lock: Mutex::new(()),
        })
    }

    async fn ism_address(&self, recipient: Address) -> Result<Address> {
        let mut cached = self.ism_address.lock().await;
        if let Some(address) = *cached {
            return Ok(address);
        }

        let mailbox = IMailbox::new(self.mailbox, self.provider.clone());
        let address = mailbox.recipientIsm(recipient).call().await.map_err(ChainError::from)?;
        *cached = Some(address);
        Ok(address)
    }
}

#[async_trait]
impl HyperlaneClient for EvmHyperlane {
    fn domain(&self) -> u32 {
        self.domain
    }

    fn merkle_hook(&self) -> B256 {
        self.merkle_hook.into_word()
    }

    async fn get_dispatch(
        &self,
        tx_hash: &str,
    ) -> Result<(DispatchedMessage, MerkleHookInsertion)> {
        let hash = crate::chains::evm::parse_b256(tx_hash)?;
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(ChainError::from)?
            .ok_or_else(|| ChainError::TxNotFound(tx_hash.to_string()))?;

        let mut dispatch = None;
        let mut message_id = None;
        let mut insertion = None;
        for log in receipt.logs() {
            match log.topic0() {
                Some(&IMailbox::Dispatch::SIGNATURE_HASH) if log.address() == self.mailbox => {
                    let event = log.log_decode::<IMailbox::Dispatch>().map_err(ChainError::from)?;
                    dispatch = Some(event.inner.data);
                }
                Some(&IMailbox::DispatchId::SIGNATURE_HASH) if log.address() == self.mailbox => {
                    let event =
                        log.log_decode::<IMailbox::DispatchId>().map_err(ChainError::from)?;
                    message_id = Some(event.inner.data.messageId);
                }
                Some(&IMerkleTreeHook::InsertedIntoTree::SIGNATURE_HASH)
                    if log.address() == self.merkle_hook =>
                {
                    let event = log
                        .log_decode::<IMerkleTreeHook::InsertedIntoTree>()
                        .map_err(ChainError::from)?;
                    insertion = Some(MerkleHookInsertion {
                        message_id: event.inner.data.messageId,
                        index: event.inner.data.index,
                    });
                }
                _ => {}
            }
        }

        let (Some(dispatch), Some(message_id), Some(insertion)) =
            (dispatch, message_id, insertion)
        else {
            return Err(RelayError::DispatchNotFound(tx_hash.to_string()));
        };

        Ok((
            DispatchedMessage {
                destination_domain: dispatch.destination,
                recipient: dispatch.recipient,
                message: dispatch.message,
                message_id,
            },
            insertion,
        ))
    }

    async fn delivered(&self, message_id: B256) -> Result<bool> {
        let mailbox = IMailbox::new(self.mailbox, self.provider.clone());
        Ok(mailbox.delivered(message_id).call().await.map_err(ChainError::from)?)
    }

    async fn is_contract(&self, recipient: B256) -> Result<bool> {
        let code = self
            .provider
            .get_code_at(Address::from_word(recipient))
            .await
            .map_err(ChainError::from)?;
        Ok(!code.is_empty())
    }

    async fn validators_and_threshold(
        &self,
        recipient: B256,
        message: &Bytes,
    ) -> Result<(Vec<Address>, u8)> {
        let ism_address = self.ism_address(Address::from_word(recipient)).await?;

        let ism = IInterchainSecurityModule::new(ism_address, self.provider.clone());
        let module_type = ism.moduleType().call().await.map_err(ChainError::from)?;
        if module_type != ISM_TYPE_MESSAGE_ID_MULTISIG {
            return Err(RelayError::UnsupportedIsm(module_type));
        }

        let multisig = IMultisigIsm::new(ism_address, self.provider.clone());
        let result =
            multisig.validatorsAndThreshold(message.clone()).call().await.map_err(ChainError::from)?;
        debug!(
            validators = result.validators.len(),
            threshold = result.threshold,
            "fetched validator set from recipient ism"
        );
        Ok((result.validators, result.threshold))
    }

    async fn validator_storage_locations(
        &self,
        validators: &[Address],
    ) -> Result<HashMap<Address, String>> {
        let announce = IValidatorAnnounce::new(self.validator_announce, self.provider.clone());
        let locations = announce
            .getAnnouncedStorageLocations(validators.to_vec())
            .call()
            .await
            .map_err(ChainError::from)?;

        // A validator may re-announce; the latest location wins.
        Ok(validators
            .iter()
            .zip(locations)
            .filter_map(|(validator, locations)| {
                locations.last().map(|location| (*validator, location.clone()))
            })
            .collect())
    }

    async fn quote_process_uusdc(&self, message: &Bytes, metadata: &Bytes) -> Result<U256> {
        let mailbox = IMailbox::new(self.mailbox, self.provider.clone());
        let call = mailbox.process(metadata.clone(), message.clone());
        let gas = call.estimate_gas().await.map_err(ChainError::from)?;
        let gas_price = self.provider.get_gas_price().await.map_err(ChainError::from)?;
        Ok(self.oracle.tx_fee_uusdc(gas, gas_price).await?)
    }

    async fn process(&self, message: &Bytes, metadata: &Bytes) -> Result<String> {
        let mailbox = IMailbox::new(self.mailbox, self.provider.clone());
        let call = mailbox.process(metadata.clone(), message.clone());

        let _guard = self.send_lock.lock().await;
        let pending = call.send().await.map_err(ChainError::from)?;
        Ok(hex::encode(pending.tx_hash()))
    }
}

/// Maps hyperlane domains to their chain clients.
#[derive(Debug)]
pub struct MultiClient {
    clients: HashMap<u32, Arc<dyn HyperlaneClient>>,
}

impl MultiClient {
    /// Builds EVM clients for every configured EVM chain with relayer
    /// settings. Cosmos clients are injected via `extra`.
    pub fn from_config(
        config: &SolverConfig,
        keystore: &KeyStore,
        oracle: TxPriceOracle,
        extra: HashMap<u32, Arc<dyn HyperlaneClient>>,
    ) -> std::result::Result<Self, ChainError> {
        let mut clients = extra;
        for chain in config.chains.values() {
            if chain.chain_type == ChainType::Evm && chain.relayer.is_some() {
                clients.insert(
                    chain.hyperlane_domain,
                    Arc::new(EvmHyperlane::connect(chain, keystore, oracle.clone())?),
                );
            }
        }
        Ok(Self { clients })
    }

    /// Builds a client map directly. Used for testing.
    pub fn from_clients(clients: HashMap<u32, Arc<dyn HyperlaneClient>>) -> Self {
        Self { clients }
    }

    /// Returns the client for `domain`.
    pub fn client(&self, domain: u32) -> Result<Arc<dyn HyperlaneClient>> {
        self.clients.get(&domain).cloned().ok_or(RelayError::UnknownDomain(domain))
    }
}
