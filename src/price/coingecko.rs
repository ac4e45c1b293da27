//! CoinGecko price feed.

use crate::{config::CoinGeckoConfig, error::PriceError};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{error, trace};

const ETHEREUM_ID: &str = "ethereum";
const USD_CURRENCY: &str = "usd";

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: f64,
    fetched_at: Instant,
}

/// CoinGecko `simple/price` client with a TTL cache.
///
/// The cache lock is held across the refresh so concurrent lookups do not
/// stampede the API.
#[derive(Debug)]
pub struct CoinGecko {
    http: reqwest::Client,
    url: String,
    ttl: Duration,
    cached: Mutex<Option<CachedPrice>>,
}

impl CoinGecko {
    /// Creates a client from the feed configuration.
    pub fn new(config: &CoinGeckoConfig) -> Self {
        let mut url = format!(
            "{}/simple/price?ids={ETHEREUM_ID}&vs_currencies={USD_CURRENCY}",
            config.base_url.as_str().trim_end_matches('/'),
        );
        if !config.api_key.is_empty() {
            url.push_str(&format!("&x_cg_pro_api_key={}", config.api_key));
        }

        Self {
            http: reqwest::Client::new(),
            url,
            ttl: config.cache_refresh_interval,
            cached: Mutex::new(None),
        }
    }

    /// The current ETH price in USD, served from cache while fresh.
    pub async fn eth_usd_price(&self) -> Result<f64, PriceError> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = *cached {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.price);
            }
        }

        let price = self.fetch_price().await?;
        *cached = Some(CachedPrice { price, fetched_at: Instant::now() });
        Ok(price)
    }

    async fn fetch_price(&self) -> Result<f64, PriceError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()
            .inspect_err(|err| error!(%err, "price feed request failed"))?;

        let data: HashMap<String, HashMap<String, f64>> = resp.json().await?;
        let price = data
            .get(ETHEREUM_ID)
            .and_then(|prices| prices.get(USD_CURRENCY))
            .copied()
            .ok_or_else(|| PriceError::Unavailable(ETHEREUM_ID.to_string()))?;

        trace!(price, "fetched ETH/USD price");
        Ok(price)
    }
}
