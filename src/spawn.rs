//! Solver wiring and supervision.

use crate::{
    chains::{ClientManager, CosmosGateway},
    cli::Args,
    config::{ChainType, SolverConfig},
    fulfiller::{OrderFulfillmentHandler, OrderFulfiller},
    keys::KeyStore,
    metrics,
    monitor::TransferMonitor,
    price::{CoinGecko, TxPriceOracle},
    rebalancer::{EvmRebalanceExecutor, FundRebalancer, skipgo::SkipGo},
    relayer::{HyperlaneClient, MultiClient, RelayerRunner},
    settler::OrderSettler,
    storage::Storage,
};
use std::{collections::HashMap, sync::Arc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Externally provided Cosmos-side clients; the concrete RPC wrappers live
/// outside the solver core.
#[derive(Default)]
pub struct CosmosClients {
    /// Gateway clients, keyed by chain id.
    pub gateways: HashMap<String, Arc<dyn CosmosGateway>>,
    /// Hyperlane mailbox clients, keyed by hyperlane domain.
    pub hyperlane: HashMap<u32, Arc<dyn HyperlaneClient>>,
}

/// Loads config and keys from the CLI arguments and runs the solver until a
/// shutdown signal arrives.
pub async fn try_spawn_with_args(args: Args, cosmos: CosmosClients) -> eyre::Result<()> {
    let config = Arc::new(SolverConfig::load_from_file(&args.config)?);
    let keystore = KeyStore::load_from_file(&args.keys)?;
    let storage = Storage::connect(&args.sqlite_db_path).await?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    try_spawn(config, keystore, storage, args, cosmos, cancel).await
}

/// Builds every component and runs the solver's loops under a shared
/// cancellation token, returning once all of them have stopped.
pub async fn try_spawn(
    config: Arc<SolverConfig>,
    keystore: KeyStore,
    storage: Storage,
    args: Args,
    cosmos: CosmosClients,
    cancel: CancellationToken,
) -> eyre::Result<()> {
    metrics::setup_exporter(config.metrics.prometheus_address)?;

    for chain in config.gateway_chains(ChainType::Cosmos) {
        if !cosmos.gateways.contains_key(&chain.chain_id) {
            warn!(
                chain_id = %chain.chain_id,
                "no cosmos gateway client registered; order flows on this chain will fail"
            );
        }
    }

    let oracle = TxPriceOracle::new(Arc::new(CoinGecko::new(&config.coingecko)));
    let clients = Arc::new(ClientManager::new(config.clone(), keystore.clone(), cosmos.gateways));
    let hyperlane = Arc::new(MultiClient::from_config(
        &config,
        &keystore,
        oracle.clone(),
        cosmos.hyperlane,
    )?);
    let relayer = Arc::new(RelayerRunner::new(config.clone(), storage.clone(), hyperlane));
    let handler = Arc::new(OrderFulfillmentHandler::new(
        config.clone(),
        storage.clone(),
        clients.clone(),
        relayer.clone(),
    ));

    let mut tasks = JoinSet::new();

    let monitor = TransferMonitor::new(config.clone(), storage.clone(), args.quickstart);
    tasks.spawn(monitor.run(cancel.clone()));

    let fulfiller = OrderFulfiller::new(
        storage.clone(),
        handler,
        config.order_filler.order_fill_worker_count,
        true,
        args.refund_orders,
    );
    tasks.spawn(fulfiller.run(cancel.clone()));

    let settler =
        OrderSettler::new(config.clone(), storage.clone(), clients.clone(), relayer.clone());
    tasks.spawn(settler.run(cancel.clone()));

    tasks.spawn(relayer.clone().run(cancel.clone()));

    if !config.fund_rebalancer.is_empty() {
        let routing = Arc::new(SkipGo::new(args.routing_api.clone()));
        let rebalancer = FundRebalancer::new(
            config.clone(),
            storage.clone(),
            clients,
            routing,
            Arc::new(EvmRebalanceExecutor::new(config.clone(), keystore)),
            oracle,
        );
        tasks.spawn(rebalancer.run(cancel.clone()));
    }

    info!("solver started");
    while let Some(result) = tasks.join_next().await {
        if let Err(err) = result {
            warn!(%err, "solver task panicked");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
