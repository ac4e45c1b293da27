//! Solver-wide constants.

use std::time::Duration;

/// Maximum number of blocks the transfer monitor will cover in a single
/// catch-up scan window.
pub const MAX_BLOCKS_PER_ITERATION: u64 = 100_000;

/// Size of a single `eth_getLogs` sub-range within a scan window.
pub const SCAN_RANGE_SIZE: u64 = 1_000;

/// Maximum number of sub-ranges scanned concurrently.
pub const MAX_CONCURRENT_SCAN_RANGES: usize = 20;

/// Attempts per log sub-range before the scan window is abandoned.
pub const SCAN_RANGE_ATTEMPTS: usize = 5;

/// Sleep between log sub-range attempts.
pub const SCAN_RANGE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How often the fulfiller dispatcher queries for pending orders.
pub const PENDING_ORDER_DISPATCH_INTERVAL: Duration = Duration::from_secs(1);

/// How often the timeout worker queries for expired orders.
pub const ORDER_TIMEOUT_INTERVAL: Duration = Duration::from_secs(10);

/// Capacity of the in-process order queue.
pub const ORDER_QUEUE_CAPACITY: usize = 100;

/// An order popped from the queue is not re-queued for this long.
pub const ORDER_REQUEUE_DELAY: Duration = Duration::from_secs(30);

/// Attempts at submitting an initiated timeout to the relayer.
pub const TIMEOUT_RELAY_ATTEMPTS: u32 = 5;

/// Base delay of the timeout relay submission backoff (doubles per attempt).
pub const TIMEOUT_RELAY_BASE_DELAY: Duration = Duration::from_secs(2);

/// How often the settler runs its discovery/settle/verify phases.
pub const SETTLEMENT_INTERVAL: Duration = Duration::from_secs(20);

/// How long the settler lets an initiation tx index before the relayer
/// inspects it.
pub const SETTLEMENT_RELAY_DELAY: Duration = Duration::from_secs(5);

/// How often the relayer drives pending transfers.
pub const RELAY_INTERVAL: Duration = Duration::from_secs(10);

/// How often the rebalancer compares inventory against targets.
pub const REBALANCE_INTERVAL: Duration = Duration::from_secs(30);

/// Orders worked on for longer than this bump a latency metric.
pub const EXCESSIVE_FILL_LATENCY: Duration = Duration::from_secs(30 * 60);

/// Default TTL of a cached gas-token price.
pub const PRICE_CACHE_TTL: Duration = Duration::from_secs(15 * 60);
