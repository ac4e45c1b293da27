//! Fund rebalancer.
//!
//! Keeps each configured chain's USDC balance at or above its minimum by
//! routing surplus from chains above their target, via the external routing
//! API. Transfers are tracked to completion by the [`TransferTracker`], and
//! abandoned if they get stuck.

mod executor;
pub mod skipgo;
mod tracker;

pub use executor::{EvmRebalanceExecutor, RebalanceTxExecutor};
pub use tracker::TransferTracker;

use crate::{
    chains::ClientManager,
    config::SolverConfig,
    constants::REBALANCE_INTERVAL,
    metrics::RebalancerMetrics,
    price::TxPriceOracle,
    storage::{NewSubmittedTx, Storage},
    types::TxType,
};
use alloy::primitives::U256;
use skipgo::RoutingClient;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Moves USDC from surplus chains to deficit chains.
#[derive(Debug)]
pub struct FundRebalancer {
    config: Arc<SolverConfig>,
    storage: Storage,
    clients: Arc<ClientManager>,
    routing: Arc<dyn RoutingClient>,
    executor: Arc<dyn RebalanceTxExecutor>,
    oracle: TxPriceOracle,
    /// When a (source, destination) move was first deferred as too
    /// expensive; drives the profitability-timeout escalation.
    deferred_since: Mutex<HashMap<(String, String), Instant>>,
}

impl FundRebalancer {
    pub fn new(
        config: Arc<SolverConfig>,
        storage: Storage,
        clients: Arc<ClientManager>,
        routing: Arc<dyn RoutingClient>,
        executor: Arc<dyn RebalanceTxExecutor>,
        oracle: TxPriceOracle,
    ) -> Self {
        Self {
            config,
            storage,
            clients,
            routing,
            executor,
            oracle,
            deferred_since: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the rebalance loop (and its tracker) until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!("starting fund rebalancer");

        let tracker =
            TransferTracker::new(self.config.clone(), self.storage.clone(), self.routing.clone());
        let tracker_cancel = cancel.clone();
        tokio::spawn(async move { tracker.run(tracker_cancel).await });

        let mut ticker = tokio::time::interval(REBALANCE_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.rebalance().await {
                        error!(%err, "rebalance tick failed");
                    }
                }
            }
        }
    }

    /// One rebalance pass: measure, partition into deficit and surplus, and
    /// move funds until every deficit is covered or surplus runs out.
    pub async fn rebalance(&self) -> eyre::Result<()> {
        let mut balances = HashMap::new();
        for chain_id in self.config.fund_rebalancer.keys() {
            balances.insert(chain_id.clone(), self.usdc_balance(chain_id).await?);
        }

        let mut deficits = Vec::new();
        let mut surplus: HashMap<String, U256> = HashMap::new();
        for (chain_id, balance) in &balances {
            let targets = &self.config.fund_rebalancer[chain_id];
            if *balance < targets.min_allowed_amount {
                deficits.push((chain_id.clone(), targets.target_amount.saturating_sub(*balance)));
            } else if *balance > targets.target_amount {
                surplus.insert(chain_id.clone(), *balance - targets.target_amount);
            }
        }
        if deficits.is_empty() {
            return Ok(());
        }
        deficits.sort();

        for (deficit_chain, mut need) in deficits {
            let mut surplus_chains: Vec<String> = surplus.keys().cloned().collect();
            surplus_chains.sort();

            for surplus_chain in surplus_chains {
                if need.is_zero() {
                    break;
                }
                let available = surplus[&surplus_chain];
                if available.is_zero() {
                    continue;
                }

                let amount = need.min(available);
                match self.try_move(&surplus_chain, &deficit_chain, amount).await {
                    Ok(true) => {
                        need -= amount;
                        *surplus.get_mut(&surplus_chain).expect("present") -= amount;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(
                            source_chain_id = %surplus_chain,
                            destination_chain_id = %deficit_chain,
                            %amount,
                            %err,
                            "error moving funds"
                        );
                    }
                }
            }

            if !need.is_zero() {
                warn!(
                    destination_chain_id = %deficit_chain,
                    remaining = %need,
                    "not enough surplus to cover deficit"
                );
            }
        }

        Ok(())
    }

    /// A chain's working balance: on-chain USDC plus pending inbound
    /// rebalances. Outgoing pending transfers already left the source
    /// accounting.
    async fn usdc_balance(&self, chain_id: &str) -> eyre::Result<U256> {
        let chain = self.config.chain(chain_id)?;
        let client = self.clients.client(chain_id).await?;
        let mut balance = client.balance(&chain.solver_address, &chain.usdc_denom).await?;

        for transfer in self.storage.pending_rebalance_transfers_to_chain(chain_id).await? {
            balance += transfer.amount()?;
        }
        Ok(balance)
    }

    /// Attempts one routed move. Returns false when the move was deferred
    /// (too expensive) or the route was unusable.
    async fn try_move(&self, source: &str, destination: &str, amount: U256) -> eyre::Result<bool> {
        let source_chain = self.config.chain(source)?;
        let destination_chain = self.config.chain(destination)?;
        let targets = &self.config.fund_rebalancer[source];

        let route = self
            .routing
            .route(
                &source_chain.usdc_denom,
                source,
                &destination_chain.usdc_denom,
                destination,
                amount,
            )
            .await?;
        let amount_out: U256 = route.amount_out.parse().map_err(|_| {
            eyre::eyre!("route returned an invalid amount out {}", route.amount_out)
        })?;

        let address_list = route
            .required_chain_addresses
            .iter()
            .map(|chain_id| Ok(self.config.chain(chain_id)?.solver_address.clone()))
            .collect::<eyre::Result<Vec<_>>>()?;

        let txs = self
            .routing
            .msgs(
                &source_chain.usdc_denom,
                source,
                &destination_chain.usdc_denom,
                destination,
                amount,
                amount_out,
                address_list,
                route.operations,
            )
            .await?;
        let Some(evm_tx) = txs.first().and_then(|tx| tx.evm_tx.as_ref()) else {
            warn!(
                source_chain_id = %source,
                destination_chain_id = %destination,
                "route does not start with an EVM transaction, skipping"
            );
            return Ok(false);
        };

        // Gas gate: execute cheap moves immediately; an expensive move only
        // goes through once it has been deferred past the profitability
        // timeout and still fits under the hard cost cap.
        let (gas, gas_price) = self.executor.estimate_gas(evm_tx).await?;
        let cost = self.oracle.tx_fee_uusdc(gas, gas_price).await?;
        if cost > targets.max_rebalancing_gas_cost_uusdc {
            let key = (source.to_string(), destination.to_string());
            let deferred_for = {
                let mut deferred = self.deferred_since.lock().expect("not poisoned");
                deferred.entry(key.clone()).or_insert_with(Instant::now).elapsed()
            };

            if deferred_for <= targets.profitability_timeout
                || cost > targets.transfer_cost_cap_uusdc
            {
                info!(
                    source_chain_id = %source,
                    destination_chain_id = %destination,
                    cost_uusdc = %cost,
                    "deferring rebalance, gas cost above threshold"
                );
                return Ok(false);
            }

            info!(
                source_chain_id = %source,
                destination_chain_id = %destination,
                cost_uusdc = %cost,
                deferred_secs = deferred_for.as_secs(),
                "profitability timeout expired, rebalancing under the hard cost cap"
            );
        }

        for approval in &evm_tx.required_erc20_approvals {
            let tx_hash = self.executor.approve_erc20(source, approval).await?;
            self.storage
                .insert_submitted_tx(
                    &NewSubmittedTx {
                        chain_id: source.to_string(),
                        tx_hash,
                        ..Default::default()
                    },
                    TxType::Erc20Approval,
                )
                .await?;
        }

        let tx_hash = self.executor.execute(evm_tx).await?;
        let transfer_id = self
            .storage
            .insert_rebalance_transfer(&tx_hash, source, destination, &amount.to_string())
            .await?;
        self.storage
            .insert_submitted_tx(
                &NewSubmittedTx {
                    rebalance_transfer_id: Some(transfer_id),
                    chain_id: source.to_string(),
                    tx_hash: tx_hash.clone(),
                    ..Default::default()
                },
                TxType::FundRebalance,
            )
            .await?;

        RebalancerMetrics::new_with_labels(&[
            ("source_chain_id", source.to_string()),
            ("destination_chain_id", destination.to_string()),
        ])
        .transfers_initiated
        .increment(1);
        self.deferred_since.lock().expect("not poisoned").remove(&(
            source.to_string(),
            destination.to_string(),
        ));

        info!(
            source_chain_id = %source,
            destination_chain_id = %destination,
            %amount,
            %tx_hash,
            "initiated rebalance transfer"
        );
        Ok(true)
    }
}
