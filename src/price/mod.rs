//! Gas pricing in uusdc.

mod coingecko;
mod oracle;

pub use coingecko::CoinGecko;
pub use oracle::TxPriceOracle;
