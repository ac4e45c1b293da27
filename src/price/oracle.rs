//! EVM gas cost → uusdc conversion.

use super::CoinGecko;
use crate::error::PriceError;
use alloy::primitives::U256;
use std::sync::Arc;

const WEI_PER_ETH: f64 = 1e18;
const UUSDC_PER_USD: f64 = 1e6;

/// Prices the execution of an EVM transaction in uusdc.
#[derive(Debug, Clone)]
pub struct TxPriceOracle {
    feed: Arc<CoinGecko>,
    constant_eth_price: Option<f64>,
}

impl TxPriceOracle {
    /// Creates an oracle backed by the given price feed.
    pub fn new(feed: Arc<CoinGecko>) -> Self {
        Self { feed, constant_eth_price: None }
    }

    /// Pins the ETH/USD price instead of consulting the feed. Should not be
    /// used in production.
    pub fn with_constant_eth_price(mut self, price: f64) -> Self {
        self.constant_eth_price = Some(price);
        self
    }

    /// Estimated cost in uusdc of a transaction with the given gas limit and
    /// price per gas in wei. Assumes 1 USD ≙ 1 USDC; may be off by one uusdc
    /// from float rounding.
    pub async fn tx_fee_uusdc(&self, gas: u64, gas_price_wei: u128) -> Result<U256, PriceError> {
        let eth_usd = match self.constant_eth_price {
            Some(price) => price,
            None => self.feed.eth_usd_price().await?,
        };
        let fee_wei = gas as f64 * gas_price_wei as f64;
        let fee_uusdc = fee_wei / WEI_PER_ETH * eth_usd * UUSDC_PER_USD;
        Ok(U256::from(fee_uusdc.max(0.0) as u128))
    }
}
