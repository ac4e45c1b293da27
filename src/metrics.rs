//! Solver metrics.

use metrics::{Counter, Histogram};
use metrics_derive::Metrics;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Installs the Prometheus exporter on `address`.
pub fn setup_exporter(address: SocketAddr) -> eyre::Result<()> {
    PrometheusBuilder::new().with_http_listener(address).install()?;
    Ok(())
}

/// Metrics for the transfer monitor.
#[derive(Metrics)]
#[metrics(scope = "solver.monitor")]
pub struct MonitorMetrics {
    /// Orders observed on chain and inserted.
    pub orders_observed: Counter,
    /// Log scan sub-ranges that exhausted their retries.
    pub scan_failures: Counter,
}

/// Metrics for the order fulfiller, labeled by source and destination chain.
#[derive(Metrics)]
#[metrics(scope = "solver.fulfiller")]
pub struct FulfillerMetrics {
    /// Order status transitions.
    pub order_status_changes: Counter,
    /// Seconds from order observation to a fill-side terminal status.
    pub fill_latency_seconds: Histogram,
    /// Fills skipped because the destination balance was insufficient.
    pub insufficient_balance: Counter,
    /// Orders still being worked past the excessive-latency threshold.
    pub excessive_fill_latency: Counter,
    /// Transactions submitted on chain.
    pub transactions_submitted: Counter,
}

/// Metrics for the order settler, labeled by source and destination chain.
#[derive(Metrics)]
#[metrics(scope = "solver.settler")]
pub struct SettlerMetrics {
    /// Settlement batches initiated on chain.
    pub batches_initiated: Counter,
    /// Settlements that reached COMPLETE.
    pub settlements_completed: Counter,
}

/// Metrics for the hyperlane relayer.
#[derive(Metrics)]
#[metrics(scope = "solver.relayer")]
pub struct RelayerMetrics {
    /// Messages submitted to a destination mailbox.
    pub messages_submitted: Counter,
    /// Relays deferred because the fee estimate exceeded the cap.
    pub relays_too_expensive: Counter,
    /// Transfers abandoned on execution revert.
    pub transfers_abandoned: Counter,
}

/// Metrics for the fund rebalancer.
#[derive(Metrics)]
#[metrics(scope = "solver.rebalancer")]
pub struct RebalancerMetrics {
    /// Rebalance transfers initiated.
    pub transfers_initiated: Counter,
    /// Rebalance transfers abandoned after the tracking timeout.
    pub transfers_abandoned: Counter,
}
