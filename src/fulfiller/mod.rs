//! Order fulfiller.
//!
//! A dispatcher feeds pending orders through a dedupe queue to a pool of
//! fill workers; a separate timeout worker walks expired orders and
//! initiates their refunds. All per-order work goes through the
//! [`OrderFulfillmentHandler`].

mod handler;
mod queue;

pub use handler::OrderFulfillmentHandler;
pub use queue::OrderQueue;

use crate::{
    constants::{
        ORDER_QUEUE_CAPACITY, ORDER_REQUEUE_DELAY, ORDER_TIMEOUT_INTERVAL,
        PENDING_ORDER_DISPATCH_INTERVAL,
    },
    storage::{Order, Storage},
    types::OrderStatus,
};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Drives pending orders to a terminal status.
#[derive(Debug)]
pub struct OrderFulfiller {
    storage: Storage,
    handler: Arc<OrderFulfillmentHandler>,
    worker_count: usize,
    should_fill_orders: bool,
    should_refund_orders: bool,
}

impl OrderFulfiller {
    pub fn new(
        storage: Storage,
        handler: Arc<OrderFulfillmentHandler>,
        worker_count: usize,
        should_fill_orders: bool,
        should_refund_orders: bool,
    ) -> Self {
        Self {
            storage,
            handler,
            worker_count: worker_count.max(1),
            should_fill_orders,
            should_refund_orders,
        }
    }

    /// Runs the dispatcher, worker pool, and timeout worker until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(workers = self.worker_count, "starting order fulfiller");

        let (queue, rx) = OrderQueue::new(ORDER_REQUEUE_DELAY, ORDER_QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        let mut tasks = Vec::new();
        if self.should_refund_orders {
            let storage = self.storage.clone();
            let handler = self.handler.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                timeout_worker(storage, handler, cancel).await;
            }));
        }

        if self.should_fill_orders {
            for _ in 0..self.worker_count {
                let rx = rx.clone();
                let handler = self.handler.clone();
                let cancel = cancel.clone();
                tasks.push(tokio::spawn(async move {
                    fill_worker(rx, handler, cancel).await;
                }));
            }

            self.dispatch_order_fills(&queue, cancel).await;
        } else {
            cancel.cancelled().await;
        }

        for task in tasks {
            let _ = task.await;
        }
    }

    /// Periodically queries pending orders and pushes them onto the queue.
    /// Orders are re-pushed every tick; the queue's dedupe window keeps
    /// in-flight orders from being double-worked.
    async fn dispatch_order_fills(&self, queue: &OrderQueue, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(PENDING_ORDER_DISPATCH_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let orders = match self.storage.orders_by_status(OrderStatus::Pending).await {
                        Ok(orders) => orders,
                        Err(err) => {
                            error!(%err, "error getting pending orders");
                            continue;
                        }
                    };
                    for order in orders {
                        let _ = queue.queue(order);
                    }
                }
            }
        }
    }
}

async fn fill_worker(
    rx: Arc<Mutex<mpsc::Receiver<Order>>>,
    handler: Arc<OrderFulfillmentHandler>,
    cancel: CancellationToken,
) {
    loop {
        let order = tokio::select! {
            _ = cancel.cancelled() => return,
            order = async { rx.lock().await.recv().await } => match order {
                Some(order) => order,
                None => return,
            },
        };

        let status = match handler.update_fulfillment_status(&order).await {
            Ok(status) => status,
            Err(err) => {
                warn!(
                    order_id = %order.order_id,
                    source_chain_id = %order.source_chain_id,
                    %err,
                    "error updating fulfillment status"
                );
                continue;
            }
        };
        if status != OrderStatus::Pending {
            continue;
        }

        match handler.fill_order(&order).await {
            Ok(Some(tx_hash)) => {
                info!(
                    order_id = %order.order_id,
                    source_chain_id = %order.source_chain_id,
                    %tx_hash,
                    "successfully filled order"
                );
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    order_id = %order.order_id,
                    source_chain_id = %order.source_chain_id,
                    %err,
                    "error filling order"
                );
            }
        }
    }
}

/// Walks expired orders: re-checks their status, then initiates the refund
/// flow and hands the timeout tx to the relayer, atomically.
async fn timeout_worker(
    storage: Storage,
    handler: Arc<OrderFulfillmentHandler>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(ORDER_TIMEOUT_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let orders =
                    match storage.orders_by_status(OrderStatus::ExpiredPendingRefund).await {
                        Ok(orders) => orders,
                        Err(err) => {
                            error!(%err, "error getting expired orders");
                            continue;
                        }
                    };

                for order in orders {
                    if let Err(err) = handle_expired_order(&storage, &handler, &order).await {
                        warn!(
                            order_id = %order.order_id,
                            source_chain_id = %order.source_chain_id,
                            %err,
                            "error initiating timeout"
                        );
                    }
                }
            }
        }
    }
}

async fn handle_expired_order(
    storage: &Storage,
    handler: &OrderFulfillmentHandler,
    order: &Order,
) -> eyre::Result<()> {
    // The order may have been filled or refunded since it was marked
    // expired.
    if handler.update_fulfillment_status(order).await? != OrderStatus::ExpiredPendingRefund {
        return Ok(());
    }

    let mut tx = storage.begin().await?;
    let tx_hash = handler.initiate_timeout(order, &mut tx).await?;
    handler.submit_timeout_for_relay(order, &tx_hash, &mut tx).await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chains::{ClientManager, CosmosGateway, OrderFillEvent},
        relayer::{HyperlaneClient, MultiClient, RelayerRunner},
        storage::NewSubmittedTx,
        test_utils::{
            GatewayState, HyperlaneState, MockGateway, MockHyperlane, insert_order,
            test_keystore, two_chain_config,
        },
        types::{TransferStatus, TxType},
    };
    use alloy::primitives::U256;
    use chrono::Duration as ChronoDuration;
    use std::{collections::HashMap, sync::Arc};

    struct Env {
        storage: Storage,
        handler: OrderFulfillmentHandler,
        gateway: Arc<MockGateway>,
    }

    async fn env(gateway_state: GatewayState) -> Env {
        let config = two_chain_config();
        let storage = Storage::in_memory().await.unwrap();
        let gateway = MockGateway::new("osmosis-1", gateway_state);

        let gateways: HashMap<String, Arc<dyn CosmosGateway>> =
            [("osmosis-1".to_string(), gateway.clone() as Arc<dyn CosmosGateway>)].into();
        let clients = Arc::new(ClientManager::new(config.clone(), test_keystore(), gateways));

        let hyperlane = MockHyperlane::new(875, HyperlaneState::default());
        let (dispatch, insertion) = MockHyperlane::dispatch(42161, b"refund order");
        hyperlane.state.lock().unwrap().dispatch = Some((dispatch, insertion));
        let multi = Arc::new(MultiClient::from_clients(
            [
                (875u32, hyperlane.clone() as Arc<dyn HyperlaneClient>),
                (42161u32, hyperlane.clone() as Arc<dyn HyperlaneClient>),
            ]
            .into(),
        ));
        let relayer = Arc::new(RelayerRunner::new(config.clone(), storage.clone(), multi));

        let handler = OrderFulfillmentHandler::new(config, storage.clone(), clients, relayer);
        Env { storage, handler, gateway }
    }

    #[tokio::test]
    async fn abandons_orders_below_min_fee_bps() {
        let env = env(GatewayState::default()).await;
        // 1000 uusdc fee over 5 USDC is 2 bps, below the configured 10.
        let order = insert_order(
            &env.storage,
            "aa",
            5_000_000,
            4_999_000,
            ChronoDuration::hours(1),
        )
        .await;

        assert!(env.handler.fill_order(&order).await.unwrap().is_none());

        let stored = env.storage.order_by_key(&order.key()).await.unwrap();
        assert_eq!(stored.order_status, OrderStatus::Abandoned);
        assert!(stored.order_status_message.unwrap().contains("min fee bps"));
        assert!(env
            .storage
            .submitted_txs_by_order_and_type(order.id, TxType::OrderFill)
            .await
            .unwrap()
            .is_empty());
        assert!(env.gateway.state.lock().unwrap().broadcasts.is_empty());
    }

    #[tokio::test]
    async fn abandons_orders_outside_fill_size_window() {
        let env = env(GatewayState::default()).await;
        // Above the 1000 USDC max fill size.
        let order = insert_order(
            &env.storage,
            "aa",
            2_000_000_000,
            1_999_000_000,
            ChronoDuration::hours(1),
        )
        .await;

        assert!(env.handler.fill_order(&order).await.unwrap().is_none());

        let stored = env.storage.order_by_key(&order.key()).await.unwrap();
        assert_eq!(stored.order_status, OrderStatus::Abandoned);
        assert!(stored.order_status_message.unwrap().contains("fill size window"));
    }

    #[tokio::test]
    async fn insufficient_balance_leaves_order_pending() {
        let env = env(GatewayState { balance: U256::from(1u64), ..Default::default() }).await;
        let order = insert_order(
            &env.storage,
            "aa",
            5_000_000,
            4_995_000,
            ChronoDuration::hours(1),
        )
        .await;

        assert!(env.handler.fill_order(&order).await.unwrap().is_none());
        let stored = env.storage.order_by_key(&order.key()).await.unwrap();
        assert_eq!(stored.order_status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn suppresses_duplicate_fills() {
        let env = env(GatewayState {
            balance: U256::from(10_000_000u64),
            ..Default::default()
        })
        .await;
        let order = insert_order(
            &env.storage,
            "aa",
            5_000_000,
            4_995_000,
            ChronoDuration::hours(1),
        )
        .await;
        env.storage
            .insert_submitted_tx(
                &NewSubmittedTx {
                    order_id: Some(order.id),
                    chain_id: "osmosis-1".to_string(),
                    tx_hash: "earlier-fill".to_string(),
                    ..Default::default()
                },
                TxType::OrderFill,
            )
            .await
            .unwrap();

        assert!(env.handler.fill_order(&order).await.unwrap().is_none());
        assert!(env.gateway.state.lock().unwrap().broadcasts.is_empty());
    }

    #[tokio::test]
    async fn observed_fill_marks_order_filled() {
        let env = env(GatewayState {
            fill_event: Some(OrderFillEvent {
                tx_hash: "fill-tx".to_string(),
                filler: "wasm1solver".to_string(),
            }),
            ..Default::default()
        })
        .await;
        let order = insert_order(
            &env.storage,
            "aa",
            5_000_000,
            4_995_000,
            ChronoDuration::hours(1),
        )
        .await;

        let status = env.handler.update_fulfillment_status(&order).await.unwrap();
        assert_eq!(status, OrderStatus::Filled);

        let stored = env.storage.order_by_key(&order.key()).await.unwrap();
        assert_eq!(stored.order_status, OrderStatus::Filled);
        assert_eq!(stored.fill_tx.as_deref(), Some("fill-tx"));
        assert_eq!(stored.filler.as_deref(), Some("wasm1solver"));
    }

    #[tokio::test]
    async fn timeout_initiation_is_idempotent_and_enqueues_relay() {
        let env = env(GatewayState::default()).await;
        let order = insert_order(
            &env.storage,
            "aa",
            5_000_000,
            4_995_000,
            ChronoDuration::hours(1),
        )
        .await;

        let mut tx = env.storage.begin().await.unwrap();
        let first = env.handler.initiate_timeout(&order, &mut tx).await.unwrap();
        env.handler.submit_timeout_for_relay(&order, &first, &mut tx).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first, "timeout-aa");
        assert_eq!(
            env.storage.transfers_by_status(TransferStatus::Pending).await.unwrap().len(),
            1
        );

        // A second initiation reuses the recorded tx instead of
        // broadcasting again.
        let broadcasts_before = env.gateway.state.lock().unwrap().broadcasts.len();
        let mut tx = env.storage.begin().await.unwrap();
        let second = env.handler.initiate_timeout(&order, &mut tx).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(second, first);
        assert_eq!(env.gateway.state.lock().unwrap().broadcasts.len(), broadcasts_before);

        // Two recorded initiations for one order is a hard invariant
        // violation.
        env.storage
            .insert_submitted_tx(
                &NewSubmittedTx {
                    order_id: Some(order.id),
                    chain_id: "osmosis-1".to_string(),
                    tx_hash: "rogue-timeout".to_string(),
                    ..Default::default()
                },
                TxType::InitiateTimeout,
            )
            .await
            .unwrap();
        let mut tx = env.storage.begin().await.unwrap();
        let err = env.handler.initiate_timeout(&order, &mut tx).await.unwrap_err();
        assert!(err.to_string().contains("invariant violation"));
    }
}
