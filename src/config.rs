//! Solver configuration.

use crate::{constants::PRICE_CACHE_TTL, error::ConfigError};
use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    net::SocketAddr,
    path::Path,
    time::Duration,
};
use url::Url;

/// Top-level solver configuration, loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Per-chain configuration, keyed by chain id.
    pub chains: HashMap<String, ChainConfig>,
    /// Order filler configuration.
    #[serde(default)]
    pub order_filler: OrderFillerConfig,
    /// Transfer monitor configuration.
    #[serde(default)]
    pub transfer_monitor: TransferMonitorConfig,
    /// Fund rebalancer configuration, keyed by chain id. Chains without an
    /// entry are not rebalanced.
    #[serde(default)]
    pub fund_rebalancer: HashMap<String, FundRebalancerConfig>,
    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// CoinGecko price feed configuration.
    #[serde(default)]
    pub coingecko: CoinGeckoConfig,
}

/// Which kind of chain a [`ChainConfig`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Cosmos,
    Evm,
}

/// Deployment environment of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainEnvironment {
    Mainnet,
    Testnet,
}

/// Configuration of a single chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Human-readable chain name, used in logs only.
    #[serde(default)]
    pub chain_name: String,
    /// Chain kind.
    #[serde(rename = "type")]
    pub chain_type: ChainType,
    /// Deployment environment.
    pub environment: ChainEnvironment,
    /// Canonical chain id (numeric string for EVM, bech32-style for Cosmos).
    pub chain_id: String,
    /// Hyperlane domain of the chain.
    pub hyperlane_domain: u32,
    /// Fast-transfer gateway contract address. Empty disables order flows on
    /// this chain.
    #[serde(default)]
    pub fast_transfer_contract_address: String,
    /// The solver's address on this chain.
    pub solver_address: String,
    /// USDC denomination: ERC-20 address on EVM, bank denom on Cosmos.
    pub usdc_denom: String,
    /// Minimum solver fee, in basis points of `amount_in`, for an order to
    /// be fillable.
    #[serde(default)]
    pub min_fee_bps: u32,
    /// Minimum profit margin preserved when relaying settlements, in basis
    /// points of the batch value.
    #[serde(default)]
    pub min_profit_margin_bps: u32,
    /// Batch value threshold at which pending settlements are initiated.
    #[serde(default, with = "crate::serde::u256_decimal")]
    pub batch_uusdc_settle_up_threshold: U256,
    /// Source-chain confirmations required before an order is filled.
    #[serde(default)]
    pub num_block_confirmations_before_fill: u64,
    /// On a fresh database, start scanning this many blocks back from the
    /// chain head instead of from genesis.
    #[serde(default)]
    pub quick_start_num_blocks_back: u64,
    /// EVM-specific settings. Required when `type` is `evm`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm: Option<EvmConfig>,
    /// Cosmos-specific settings. Required when `type` is `cosmos`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cosmos: Option<CosmosConfig>,
    /// Hyperlane relayer settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relayer: Option<RelayerConfig>,
}

/// EVM chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmConfig {
    /// HTTP JSON-RPC endpoint.
    pub rpc: Url,
    /// WebSocket JSON-RPC endpoint, used for live log subscriptions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_rpc: Option<Url>,
}

/// Cosmos chain settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosmosConfig {
    /// RPC endpoint of the chain.
    pub rpc: Url,
    /// Smallest order the solver will fill on this chain, in uusdc.
    #[serde(with = "crate::serde::u256_decimal")]
    pub min_fill_size: U256,
    /// Largest order the solver will fill on this chain, in uusdc.
    #[serde(with = "crate::serde::u256_decimal")]
    pub max_fill_size: U256,
}

/// Hyperlane contract addresses and relay limits for a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    /// Mailbox contract address.
    pub mailbox_address: String,
    /// Validator announce contract address.
    #[serde(default)]
    pub validator_announce_address: String,
    /// Merkle tree hook contract address.
    #[serde(default)]
    pub merkle_hook_address: String,
    /// How long a transfer may stay deferred as unprofitable before its fee
    /// estimate is re-tested against `relay_cost_cap_uusdc`.
    #[serde(default = "default_profitable_relay_timeout", with = "crate::serde::duration")]
    pub profitable_relay_timeout: Duration,
    /// Hard delivery-fee cap applied once `profitable_relay_timeout` expires.
    #[serde(default, with = "crate::serde::u256_decimal")]
    pub relay_cost_cap_uusdc: U256,
}

fn default_profitable_relay_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Order filler process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFillerConfig {
    /// Number of concurrent fill workers.
    pub order_fill_worker_count: usize,
}

impl Default for OrderFillerConfig {
    fn default() -> Self {
        Self { order_fill_worker_count: 10 }
    }
}

/// Transfer monitor process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferMonitorConfig {
    /// Interval between catch-up scan windows.
    #[serde(with = "crate::serde::duration")]
    pub poll_interval: Duration,
}

impl Default for TransferMonitorConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(5) }
    }
}

/// Per-chain inventory targets for the fund rebalancer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundRebalancerConfig {
    /// Balance the rebalancer tops a deficit chain up to.
    #[serde(with = "crate::serde::u256_decimal")]
    pub target_amount: U256,
    /// Balance below which a chain is considered in deficit.
    #[serde(with = "crate::serde::u256_decimal")]
    pub min_allowed_amount: U256,
    /// Pending transfers older than this are abandoned.
    #[serde(default = "default_rebalance_transfer_timeout", with = "crate::serde::duration")]
    pub rebalance_transfer_timeout: Duration,
    /// Gas cost, in uusdc, below which a rebalance executes immediately.
    #[serde(with = "crate::serde::u256_decimal")]
    pub max_rebalancing_gas_cost_uusdc: U256,
    /// Hard gas-cost cap applied once `profitability_timeout` expires.
    #[serde(with = "crate::serde::u256_decimal")]
    pub transfer_cost_cap_uusdc: U256,
    /// How long a needed rebalance may be deferred as too expensive before
    /// `transfer_cost_cap_uusdc` takes over as the limit.
    #[serde(default = "default_profitability_timeout", with = "crate::serde::duration")]
    pub profitability_timeout: Duration,
}

fn default_rebalance_transfer_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_profitability_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Metrics export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Address the Prometheus exporter listens on.
    pub prometheus_address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { prometheus_address: ([0, 0, 0, 0], 8001).into() }
    }
}

/// CoinGecko price feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinGeckoConfig {
    /// API base URL.
    pub base_url: Url,
    /// API key, empty for the public endpoint.
    #[serde(default)]
    pub api_key: String,
    /// How long a fetched price stays fresh.
    #[serde(default = "default_price_cache_ttl", with = "crate::serde::duration")]
    pub cache_refresh_interval: Duration,
}

fn default_price_cache_ttl() -> Duration {
    PRICE_CACHE_TTL
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coingecko.com/api/v3".parse().expect("valid URL"),
            api_key: String::new(),
            cache_refresh_interval: PRICE_CACHE_TTL,
        }
    }
}

impl SolverConfig {
    /// Loads and validates a configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the config for `chain_id`.
    pub fn chain(&self, chain_id: &str) -> Result<&ChainConfig, ConfigError> {
        self.chains.get(chain_id).ok_or_else(|| ConfigError::Invalid {
            chain_id: chain_id.to_string(),
            reason: "chain not configured".to_string(),
        })
    }

    /// Resolves a hyperlane domain to its chain id.
    pub fn chain_id_by_domain(&self, domain: u32) -> Option<&str> {
        self.chains
            .values()
            .find(|chain| chain.hyperlane_domain == domain)
            .map(|chain| chain.chain_id.as_str())
    }

    /// All chains of the given type that have a gateway configured.
    pub fn gateway_chains(&self, chain_type: ChainType) -> impl Iterator<Item = &ChainConfig> {
        self.chains.values().filter(move |chain| {
            chain.chain_type == chain_type && !chain.fast_transfer_contract_address.is_empty()
        })
    }

    /// Validates cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, chain) in &self.chains {
            let invalid = |reason: &str| ConfigError::Invalid {
                chain_id: key.clone(),
                reason: reason.to_string(),
            };

            if key != &chain.chain_id {
                return Err(invalid("map key does not match chain_id"));
            }
            if chain.solver_address.is_empty() {
                return Err(invalid("solver_address must not be empty"));
            }
            if chain.min_profit_margin_bps > chain.min_fee_bps {
                return Err(invalid("min_profit_margin_bps must be <= min_fee_bps"));
            }
            if chain.relayer.as_ref().is_none_or(|r| r.mailbox_address.is_empty()) {
                return Err(invalid("relayer.mailbox_address must not be empty"));
            }

            match chain.chain_type {
                ChainType::Evm => {
                    if chain.evm.is_none() {
                        return Err(invalid("evm settings missing for evm chain"));
                    }
                }
                ChainType::Cosmos => {
                    let Some(cosmos) = &chain.cosmos else {
                        return Err(invalid("cosmos settings missing for cosmos chain"));
                    };
                    if cosmos.max_fill_size < cosmos.min_fill_size {
                        return Err(invalid("max_fill_size must be >= min_fill_size"));
                    }
                    let relayer = chain.relayer.as_ref().expect("checked above");
                    if relayer.validator_announce_address.is_empty() {
                        return Err(invalid("relayer.validator_announce_address must not be empty"));
                    }
                    if relayer.merkle_hook_address.is_empty() {
                        return Err(invalid("relayer.merkle_hook_address must not be empty"));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn evm_chain(chain_id: &str, domain: u32) -> ChainConfig {
        ChainConfig {
            chain_name: format!("evm-{chain_id}"),
            chain_type: ChainType::Evm,
            environment: ChainEnvironment::Testnet,
            chain_id: chain_id.to_string(),
            hyperlane_domain: domain,
            fast_transfer_contract_address: "0x00000000000000000000000000000000000000aa".into(),
            solver_address: "0x00000000000000000000000000000000000000bb".into(),
            usdc_denom: "0x00000000000000000000000000000000000000cc".into(),
            min_fee_bps: 10,
            min_profit_margin_bps: 5,
            batch_uusdc_settle_up_threshold: U256::from(1_000_000u64),
            num_block_confirmations_before_fill: 1,
            quick_start_num_blocks_back: 100,
            evm: Some(EvmConfig { rpc: "http://localhost:8545".parse().unwrap(), ws_rpc: None }),
            cosmos: None,
            relayer: Some(RelayerConfig {
                mailbox_address: "0x00000000000000000000000000000000000000dd".into(),
                validator_announce_address: String::new(),
                merkle_hook_address: String::new(),
                profitable_relay_timeout: Duration::from_secs(3600),
                relay_cost_cap_uusdc: U256::from(10_000u64),
            }),
        }
    }

    pub(crate) fn cosmos_chain(chain_id: &str, domain: u32) -> ChainConfig {
        ChainConfig {
            chain_name: format!("cosmos-{chain_id}"),
            chain_type: ChainType::Cosmos,
            environment: ChainEnvironment::Testnet,
            chain_id: chain_id.to_string(),
            hyperlane_domain: domain,
            fast_transfer_contract_address: "wasm1gateway".into(),
            solver_address: "wasm1solver".into(),
            usdc_denom: "uusdc".into(),
            min_fee_bps: 10,
            min_profit_margin_bps: 5,
            batch_uusdc_settle_up_threshold: U256::from(1_000_000u64),
            num_block_confirmations_before_fill: 0,
            quick_start_num_blocks_back: 0,
            evm: None,
            cosmos: Some(CosmosConfig {
                rpc: "http://localhost:26657".parse().unwrap(),
                min_fill_size: U256::from(1_000_000u64),
                max_fill_size: U256::from(1_000_000_000u64),
            }),
            relayer: Some(RelayerConfig {
                mailbox_address: "wasm1mailbox".into(),
                validator_announce_address: "wasm1announce".into(),
                merkle_hook_address: "wasm1hook".into(),
                profitable_relay_timeout: Duration::from_secs(3600),
                relay_cost_cap_uusdc: U256::from(10_000u64),
            }),
        }
    }

    pub(crate) fn test_config() -> SolverConfig {
        SolverConfig {
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
        }
    }

    #[test]
    fn accepts_valid_config() {
        test_config().validate().unwrap();
    }

    #[test]
    fn rejects_margin_above_fee() {
        let mut config = test_config();
        config.chains.get_mut("42161").unwrap().min_profit_margin_bps = 20;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { reason, .. })
            if reason.contains("min_profit_margin_bps")));
    }

    #[test]
    fn rejects_inverted_fill_sizes() {
        let mut config = test_config();
        config.chains.get_mut("osmosis-1").unwrap().cosmos.as_mut().unwrap().max_fill_size =
            U256::from(1u64);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { reason, .. })
            if reason.contains("max_fill_size")));
    }

    #[test]
    fn rejects_missing_mailbox() {
        let mut config = test_config();
        config.chains.get_mut("42161").unwrap().relayer = None;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { reason, .. })
            if reason.contains("mailbox_address")));
    }

    #[test]
    fn rejects_missing_validator_announce_on_cosmos() {
        let mut config = test_config();
        config
            .chains
            .get_mut("osmosis-1")
            .unwrap()
            .relayer
            .as_mut()
            .unwrap()
            .validator_announce_address
            .clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { reason, .. })
            if reason.contains("validator_announce_address")));
    }

    #[test]
    fn resolves_domains() {
        let config = test_config();
        assert_eq!(config.chain_id_by_domain(875), Some("osmosis-1"));
        assert_eq!(config.chain_id_by_domain(42161), Some("42161"));
        assert_eq!(config.chain_id_by_domain(1), None);
    }
}
