//! Transfer monitor.
//!
//! Populates the `orders` table from `OrderSubmitted` events on every EVM
//! chain with a configured gateway. Each chain runs a catch-up scanner that
//! advances a persisted block watermark, plus a live WebSocket subscription
//! for new events; inserts are idempotent so the two paths can overlap.

use crate::{
    config::{ChainConfig, ChainType, SolverConfig},
    constants::{
        MAX_BLOCKS_PER_ITERATION, MAX_CONCURRENT_SCAN_RANGES, SCAN_RANGE_ATTEMPTS,
        SCAN_RANGE_RETRY_DELAY, SCAN_RANGE_SIZE,
    },
    error::ChainError,
    metrics::MonitorMetrics,
    storage::{NewOrder, Storage},
    types::{FastTransferOrder, gateway::IFastTransferGateway},
};
use alloy::{
    hex,
    primitives::Address,
    providers::{DynProvider, Provider, ProviderBuilder, WsConnect},
    rpc::types::{Filter, Log},
    sol_types::SolEvent,
};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Watches source chains for newly submitted orders.
#[derive(Debug)]
pub struct TransferMonitor {
    config: Arc<SolverConfig>,
    storage: Storage,
    quick_start: bool,
}

impl TransferMonitor {
    pub fn new(config: Arc<SolverConfig>, storage: Storage, quick_start: bool) -> Self {
        Self { config, storage, quick_start }
    }

    /// Runs per-chain scanners until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!("starting transfer monitor");

        let monitor = Arc::new(self);
        let mut tasks = JoinSet::new();
        for chain in monitor.config.gateway_chains(ChainType::Evm) {
            let monitor = monitor.clone();
            let chain = chain.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { monitor.run_chain(chain, cancel).await });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                error!(%err, "transfer monitor chain task panicked");
            }
        }
    }

    async fn run_chain(&self, chain: ChainConfig, cancel: CancellationToken) {
        let Some(evm) = chain.evm.clone() else {
            warn!(chain_id = %chain.chain_id, "evm settings missing, not monitoring chain");
            return;
        };
        let gateway: Address = match chain.fast_transfer_contract_address.parse() {
            Ok(gateway) => gateway,
            Err(_) => {
                error!(chain_id = %chain.chain_id, "invalid gateway address, not monitoring chain");
                return;
            }
        };

        let provider = ProviderBuilder::new().connect_http(evm.rpc.clone()).erased();

        // Live subscription; the catch-up scanner below will pick up anything
        // it misses while (re)connecting.
        if let Some(ws_rpc) = evm.ws_rpc.clone() {
            let this = SubscriptionTask {
                storage: self.storage.clone(),
                config: self.config.clone(),
                chain_id: chain.chain_id.clone(),
                gateway,
                ws_rpc: ws_rpc.to_string(),
            };
            let cancel = cancel.clone();
            tokio::spawn(async move { this.run(cancel).await });
        }

        let mut ticker = tokio::time::interval(self.config.transfer_monitor.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.scan_window(&provider, &chain, gateway).await {
                        error!(chain_id = %chain.chain_id, %err, "catch-up scan failed");
                    }
                }
            }
        }
    }

    /// Scans one watermark-bounded window of blocks. The watermark only
    /// advances when every sub-range succeeded.
    async fn scan_window(
        &self,
        provider: &DynProvider,
        chain: &ChainConfig,
        gateway: Address,
    ) -> eyre::Result<()> {
        let latest = provider.get_block_number().await?;
        let start = match self.storage.monitor_height(&chain.chain_id).await? {
            Some(height) => height,
            None if self.quick_start => {
                latest.saturating_sub(chain.quick_start_num_blocks_back)
            }
            None => 0,
        };
        let end = latest.min(start + MAX_BLOCKS_PER_ITERATION);
        if start > end {
            return Ok(());
        }

        let metrics = MonitorMetrics::new_with_labels(&[("chain_id", chain.chain_id.clone())]);
        let ranges = (start..=end).step_by(SCAN_RANGE_SIZE as usize).map(|range_start| {
            let range_end = (range_start + SCAN_RANGE_SIZE - 1).min(end);
            let provider = provider.clone();
            async move { scan_range(&provider, gateway, range_start, range_end).await }
        });

        let mut failed = false;
        let mut results = futures_util::stream::iter(ranges)
            .buffer_unordered(MAX_CONCURRENT_SCAN_RANGES);
        while let Some(result) = results.next().await {
            match result {
                Ok(logs) => {
                    for log in logs {
                        if let Err(err) = self.insert_order_from_log(chain, &log).await {
                            warn!(chain_id = %chain.chain_id, %err, "skipping undecodable order event");
                        } else {
                            metrics.orders_observed.increment(1);
                        }
                    }
                }
                Err(err) => {
                    metrics.scan_failures.increment(1);
                    error!(chain_id = %chain.chain_id, %err, "abandoning log range after retries");
                    failed = true;
                }
            }
        }

        if failed {
            // Leave the watermark so the failed range is re-scanned.
            return Ok(());
        }

        debug!(chain_id = %chain.chain_id, start, end, "scanned block window");
        self.storage.set_monitor_height(&chain.chain_id, end).await?;
        Ok(())
    }

    async fn insert_order_from_log(&self, chain: &ChainConfig, log: &Log) -> eyre::Result<()> {
        let order = decode_order_log(&self.config, chain, log)?;
        self.storage.insert_order(&order).await?;
        info!(
            source_chain_id = %order.source_chain_id,
            destination_chain_id = %order.destination_chain_id,
            order_id = %order.order_id,
            amount_in = %order.amount_in,
            "fast transfer order found"
        );
        Ok(())
    }
}

/// Live `OrderSubmitted` subscription over WebSocket.
struct SubscriptionTask {
    storage: Storage,
    config: Arc<SolverConfig>,
    chain_id: String,
    gateway: Address,
    ws_rpc: String,
}

impl SubscriptionTask {
    async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.subscribe() => {
                    if let Err(err) = result {
                        warn!(chain_id = %self.chain_id, %err, "log subscription ended, reconnecting");
                    }
                    tokio::time::sleep(SCAN_RANGE_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn subscribe(&self) -> eyre::Result<()> {
        let chain = self.config.chain(&self.chain_id)?.clone();
        let provider =
            ProviderBuilder::new().connect_ws(WsConnect::new(self.ws_rpc.clone())).await?;
        let filter = Filter::new()
            .address(self.gateway)
            .event_signature(IFastTransferGateway::OrderSubmitted::SIGNATURE_HASH);
        let mut stream = provider.subscribe_logs(&filter).await?.into_stream();

        while let Some(log) = stream.next().await {
            match decode_order_log(&self.config, &chain, &log) {
                Ok(order) => {
                    if let Err(err) = self.storage.insert_order(&order).await {
                        error!(chain_id = %self.chain_id, %err, "inserting subscribed order");
                    }
                }
                Err(err) => {
                    warn!(chain_id = %self.chain_id, %err, "skipping undecodable order event")
                }
            }
        }

        Ok(())
    }
}

async fn scan_range(
    provider: &DynProvider,
    gateway: Address,
    start: u64,
    end: u64,
) -> Result<Vec<Log>, ChainError> {
    let filter = Filter::new()
        .address(gateway)
        .event_signature(IFastTransferGateway::OrderSubmitted::SIGNATURE_HASH)
        .from_block(start)
        .to_block(end);

    let mut last_err = None;
    for _ in 0..SCAN_RANGE_ATTEMPTS {
        match provider.get_logs(&filter).await {
            Ok(logs) => return Ok(logs),
            Err(err) => {
                last_err = Some(err);
                tokio::time::sleep(SCAN_RANGE_RETRY_DELAY).await;
            }
        }
    }

    Err(ChainError::Rpc(last_err.expect("at least one attempt")))
}

/// Decodes an `OrderSubmitted` log into order insert parameters.
fn decode_order_log(
    config: &SolverConfig,
    chain: &ChainConfig,
    log: &Log,
) -> eyre::Result<NewOrder> {
    let event = log.log_decode::<IFastTransferGateway::OrderSubmitted>()?;
    let order = FastTransferOrder::decode(&event.inner.data.order)?;

    let destination_chain_id = config
        .chain_id_by_domain(order.destination_domain)
        .ok_or_else(|| eyre::eyre!("no chain for destination domain {}", order.destination_domain))?
        .to_string();

    let timeout_timestamp = DateTime::<Utc>::from_timestamp(order.timeout_timestamp as i64, 0)
        .ok_or_else(|| eyre::eyre!("order timeout {} out of range", order.timeout_timestamp))?;

    Ok(NewOrder {
        source_chain_id: chain.chain_id.clone(),
        destination_chain_id,
        source_chain_gateway_address: chain.fast_transfer_contract_address.clone(),
        sender: order.sender.to_vec(),
        recipient: order.recipient.to_vec(),
        amount_in: order.amount_in.to_string(),
        amount_out: order.amount_out.to_string(),
        nonce: order.nonce,
        order_id: hex::encode(event.inner.data.orderID),
        order_creation_tx: log
            .transaction_hash
            .map(hex::encode)
            .ok_or_else(|| eyre::eyre!("order log missing transaction hash"))?,
        order_creation_tx_block_height: log
            .block_number
            .ok_or_else(|| eyre::eyre!("order log missing block number"))?,
        timeout_timestamp,
        data: (!order.data.is_empty()).then(|| hex::encode(&order.data)),
    })
}
