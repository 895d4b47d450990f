//! In-process backend simulator
//!
//! Used by tests and the `demo` command where no real trading service is reachable.
//! Latencies and failures are configurable per search text and per symbol so that
//! out-of-order completions can be reproduced deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

use super::MarketBackend;
use super::types::{
    Bar, BarSink, LookupError, OrderConfirmation, OrderError, OrderRequest, StreamStartError,
    StreamToken,
};

/// Tickers known to the simulator when no universe is given
pub const DEFAULT_UNIVERSE: [&str; 10] = [
    "AAPL", "GOOGL", "MSFT", "TSLA", "AMZN", "FB", "NFLX", "NVDA", "AMD", "INTC",
];

/// Chart interval of generated bars
const MOCK_BAR_SECONDS: i64 = 60;

/// Mock backend for testing
pub struct MockBackend {
    universe: Vec<String>,
    search_delays: HashMap<String, Duration>,
    default_search_delay: Duration,
    start_delays: HashMap<String, Duration>,
    default_start_delay: Duration,
    failing_symbols: HashSet<String>,
    failing_searches: HashSet<String>,
    closing_feeds: HashSet<String>,
    bar_interval: Duration,
    bars_per_stream: Option<usize>,
    next_token: AtomicU64,
    search_calls: AtomicUsize,
    feeds: Mutex<HashMap<StreamToken, JoinHandle<()>>>,
    stopped: Mutex<Vec<StreamToken>>,
    orders: Mutex<Vec<OrderRequest>>,
}

impl MockBackend {
    /// Create a MockBackend over the default universe with no artificial latency
    pub fn new() -> Self {
        Self::with_universe(DEFAULT_UNIVERSE.iter().map(|s| s.to_string()).collect())
    }

    /// Create a MockBackend over a custom universe
    pub fn with_universe(universe: Vec<String>) -> Self {
        Self {
            universe,
            search_delays: HashMap::new(),
            default_search_delay: Duration::ZERO,
            start_delays: HashMap::new(),
            default_start_delay: Duration::ZERO,
            failing_symbols: HashSet::new(),
            failing_searches: HashSet::new(),
            closing_feeds: HashSet::new(),
            bar_interval: Duration::from_millis(250),
            bars_per_stream: None,
            next_token: AtomicU64::new(1),
            search_calls: AtomicUsize::new(0),
            feeds: Mutex::new(HashMap::new()),
            stopped: Mutex::new(Vec::new()),
            orders: Mutex::new(Vec::new()),
        }
    }

    /// Delay the lookup for one exact search text
    pub fn with_search_delay(mut self, text: &str, delay: Duration) -> Self {
        self.search_delays.insert(text.to_uppercase(), delay);
        self
    }

    /// Delay every lookup without a specific delay
    pub fn with_default_search_delay(mut self, delay: Duration) -> Self {
        self.default_search_delay = delay;
        self
    }

    /// Delay the stream start acknowledgment for one symbol
    pub fn with_start_delay(mut self, symbol: &str, delay: Duration) -> Self {
        self.start_delays.insert(symbol.to_uppercase(), delay);
        self
    }

    /// Delay every stream start without a specific delay
    pub fn with_default_start_delay(mut self, delay: Duration) -> Self {
        self.default_start_delay = delay;
        self
    }

    /// Reject stream starts for a symbol
    pub fn with_failing_symbol(mut self, symbol: &str) -> Self {
        self.failing_symbols.insert(symbol.to_uppercase());
        self
    }

    /// Fail lookups for one exact search text
    pub fn with_failing_search(mut self, text: &str) -> Self {
        self.failing_searches.insert(text.to_uppercase());
        self
    }

    /// Drop the feed of a symbol before acknowledging its start, like a connection
    /// that dies right after the subscribe frame went out
    pub fn with_feed_closed_on_start(mut self, symbol: &str) -> Self {
        self.closing_feeds.insert(symbol.to_uppercase());
        self
    }

    /// Pace of generated bars
    pub fn with_bar_interval(mut self, interval: Duration) -> Self {
        self.bar_interval = interval;
        self
    }

    /// End every feed after `count` bars, simulating transport termination
    pub fn with_bars_per_stream(mut self, count: usize) -> Self {
        self.bars_per_stream = Some(count);
        self
    }

    /// Number of lookups that reached the backend
    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Tokens passed to `stop_stream`, in call order
    pub async fn stopped_tokens(&self) -> Vec<StreamToken> {
        self.stopped.lock().await.clone()
    }

    /// Number of feeds still generating bars
    pub async fn live_feeds(&self) -> usize {
        let feeds = self.feeds.lock().await;
        feeds.values().filter(|handle| !handle.is_finished()).count()
    }

    /// Orders accepted so far
    pub async fn placed_orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().await.clone()
    }

    fn issue_token(&self, symbol: &str) -> StreamToken {
        let id = self.next_token.fetch_add(1, Ordering::SeqCst);
        StreamToken::new(format!("mock-{}-{}", symbol, id))
    }

    fn matching_symbols(&self, text: &str) -> Vec<String> {
        let needle = text.trim().to_uppercase();
        let mut prefix: Vec<String> = Vec::new();
        let mut contains: Vec<String> = Vec::new();

        for symbol in &self.universe {
            if symbol.starts_with(&needle) {
                prefix.push(symbol.clone());
            } else if symbol.contains(&needle) {
                contains.push(symbol.clone());
            }
        }

        prefix.sort();
        contains.sort();
        prefix.extend(contains);
        prefix
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn search_symbols(&self, text: &str) -> Result<Vec<String>, LookupError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let key = text.trim().to_uppercase();

        let delay = self
            .search_delays
            .get(&key)
            .copied()
            .unwrap_or(self.default_search_delay);
        sleep(delay).await;

        if self.failing_searches.contains(&key) {
            return Err(LookupError::Backend(format!("search for {} failed", key)));
        }

        let symbols = self.matching_symbols(&key);
        debug!("Mock lookup for {:?} returned {} symbols", key, symbols.len());
        Ok(symbols)
    }

    async fn start_stream(
        &self,
        symbol: &str,
        sink: BarSink,
    ) -> Result<StreamToken, StreamStartError> {
        let symbol = symbol.to_uppercase();
        let delay = self
            .start_delays
            .get(&symbol)
            .copied()
            .unwrap_or(self.default_start_delay);

        if self.closing_feeds.contains(&symbol) {
            drop(sink);
            sleep(delay).await;
            let token = self.issue_token(&symbol);
            info!("Mock stream for {} acknowledged after its feed closed", symbol);
            return Ok(token);
        }

        sleep(delay).await;

        if self.failing_symbols.contains(&symbol) || !self.universe.contains(&symbol) {
            return Err(StreamStartError::Rejected {
                symbol,
                reason: "unknown symbol".to_string(),
            });
        }

        let token = self.issue_token(&symbol);

        let mut generator = MockBarGenerator::new(&symbol, chrono::Utc::now().timestamp());
        let interval = self.bar_interval;
        let limit = self.bars_per_stream;
        let feed_symbol = symbol.clone();

        let handle = tokio::spawn(async move {
            let mut sent = 0usize;
            loop {
                if limit.is_some_and(|limit| sent >= limit) {
                    debug!("Mock feed for {} reached its bar limit", feed_symbol);
                    break;
                }
                sleep(interval).await;
                if sink.send(generator.next_bar()).is_err() {
                    break;
                }
                sent += 1;
            }
        });

        let mut feeds = self.feeds.lock().await;
        feeds.retain(|_, handle| !handle.is_finished());
        feeds.insert(token.clone(), handle);
        drop(feeds);
        info!("Mock stream started for {} ({})", symbol, token);
        Ok(token)
    }

    async fn stop_stream(&self, token: StreamToken) {
        if let Some(handle) = self.feeds.lock().await.remove(&token) {
            handle.abort();
        }
        debug!("Mock stream stopped: {}", token);
        self.stopped.lock().await.push(token);
    }

    async fn place_order(&self, order: OrderRequest) -> Result<OrderConfirmation, OrderError> {
        let symbol = order.symbol.to_uppercase();
        if !self.universe.contains(&symbol) {
            return Err(OrderError::Rejected(format!("unknown symbol {}", symbol)));
        }

        let mut orders = self.orders.lock().await;
        orders.push(order.clone());

        Ok(OrderConfirmation {
            order_id: format!("mock-order-{}", orders.len()),
            symbol,
            quantity: order.quantity,
            side: order.side,
            status: "accepted".to_string(),
        })
    }
}

/// Deterministic bar source for the simulator
///
/// Slots are emitted in blocks of four with the middle two swapped, so every block
/// produces one out-of-order correction. Every fifth emission revises the close of
/// the previous bar at the same timestamp.
#[derive(Debug, Clone)]
pub struct MockBarGenerator {
    base_price: f64,
    base_time: i64,
    emitted: u64,
    slots: i64,
    last: Option<Bar>,
}

impl MockBarGenerator {
    pub fn new(symbol: &str, now: i64) -> Self {
        let seed: u32 = symbol.bytes().map(u32::from).sum();
        Self {
            base_price: 20.0 + f64::from(seed % 400),
            base_time: now - now.rem_euclid(MOCK_BAR_SECONDS),
            emitted: 0,
            slots: 0,
            last: None,
        }
    }

    pub fn next_bar(&mut self) -> Bar {
        self.emitted += 1;

        if self.emitted % 5 == 0 {
            if let Some(last) = self.last {
                let close = last.close + 0.05;
                let revised = Bar {
                    high: last.high.max(close),
                    low: last.low.min(close),
                    close,
                    ..last
                };
                self.last = Some(revised);
                return revised;
            }
        }

        const BLOCK_ORDER: [i64; 4] = [0, 2, 1, 3];
        let block = self.slots / 4;
        let slot = block * 4 + BLOCK_ORDER[(self.slots % 4) as usize];
        self.slots += 1;

        let wave = (slot as f64 * 0.7).sin() * 2.0;
        let open = self.base_price + wave;
        let close = open + (slot as f64 * 1.3).cos();
        let bar = Bar::new(
            self.base_time + slot * MOCK_BAR_SECONDS,
            open,
            open.max(close) + 0.5,
            open.min(close) - 0.5,
            close,
        )
        .with_volume(1_000.0 + (slot % 7) as f64 * 150.0);

        self.last = Some(bar);
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_mock_search_ranks_prefix_matches_first() {
        let backend = MockBackend::new();

        let symbols = backend.search_symbols("a").await.unwrap();
        assert_eq!(symbols[..3], ["AAPL", "AMD", "AMZN"]);
        assert!(symbols.contains(&"NVDA".to_string()));
        assert_eq!(backend.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_search_failure() {
        let backend = MockBackend::new().with_failing_search("ZZ");
        let result = backend.search_symbols("zz").await;
        assert!(matches!(result, Err(LookupError::Backend(_))));
    }

    #[tokio::test]
    async fn test_mock_stream_rejects_unknown_symbol() {
        let backend = MockBackend::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = backend.start_stream("NOPE", tx).await;
        assert!(matches!(result, Err(StreamStartError::Rejected { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_stream_delivers_until_stopped() {
        let backend = MockBackend::new().with_bar_interval(Duration::from_millis(10));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let token = backend.start_stream("AAPL", tx).await.unwrap();
        assert!(rx.recv().await.is_some());
        assert_eq!(backend.live_feeds().await, 1);

        backend.stop_stream(token.clone()).await;
        assert_eq!(backend.stopped_tokens().await, vec![token]);

        // Sender dropped with the aborted feed task
        while rx.recv().await.is_some() {}
        assert_eq!(backend.live_feeds().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_stream_ends_after_bar_limit() {
        let backend = MockBackend::new()
            .with_bar_interval(Duration::from_millis(1))
            .with_bars_per_stream(3);
        let (tx, mut rx) = mpsc::unbounded_channel();

        backend.start_stream("MSFT", tx).await.unwrap();

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_feeds_are_pruned() {
        let backend = MockBackend::new()
            .with_bar_interval(Duration::from_millis(1))
            .with_bars_per_stream(1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        backend.start_stream("AAPL", tx).await.unwrap();
        while rx.recv().await.is_some() {}

        let (tx, _rx) = mpsc::unbounded_channel();
        backend.start_stream("MSFT", tx).await.unwrap();
        assert_eq!(backend.feeds.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_closed_before_ack() {
        let backend = MockBackend::new()
            .with_feed_closed_on_start("TSLA")
            .with_start_delay("TSLA", Duration::from_millis(5));
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(backend.start_stream("TSLA", tx).await.is_ok());
        assert_eq!(rx.recv().await, None);
        assert_eq!(backend.live_feeds().await, 0);
    }

    #[tokio::test]
    async fn test_mock_order_recorded() {
        let backend = MockBackend::new();
        let order = OrderRequest {
            symbol: "aapl".to_string(),
            quantity: 2.0,
            side: crate::backend::Side::Buy,
        };

        let confirmation = backend.place_order(order.clone()).await.unwrap();
        assert_eq!(confirmation.symbol, "AAPL");
        assert_eq!(confirmation.order_id, "mock-order-1");
        assert_eq!(backend.placed_orders().await, vec![order]);
    }

    #[test]
    fn test_generator_emits_corrections_and_revisions() {
        let mut generator = MockBarGenerator::new("AAPL", 6_000);
        let bars: Vec<Bar> = (0..5).map(|_| generator.next_bar()).collect();

        let times: Vec<i64> = bars.iter().map(|b| b.time).collect();
        assert_eq!(times, vec![6_000, 6_120, 6_060, 6_180, 6_180]);
        assert!((bars[4].close - bars[3].close - 0.05).abs() < 1e-9);
    }
}
