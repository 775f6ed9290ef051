//! Market Data Gateway
//!
//! Price source for the engine and the classifier. [`SimulatedMarket`] is the
//! shipped implementation: a seeded random walk that doubles as a scriptable
//! test feed (fixed prices, loaded series, injected outages and latency).

use crate::types::PriceSample;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Market data gateway errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Market data unavailable: {0}")]
    Unavailable(String),

    #[error("Market data request timed out after {0:?}")]
    Timeout(Duration),
}

/// Boxed future returned by gateway calls.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>;

/// Source of current prices and recent price/volume history.
pub trait MarketDataGateway: Send + Sync {
    /// Latest price for a symbol.
    fn current_price<'a>(&'a self, symbol: &'a str) -> GatewayFuture<'a, f64>;

    /// Up to `window` most recent samples, oldest first.
    fn recent_series<'a>(
        &'a self,
        symbol: &'a str,
        window: usize,
    ) -> GatewayFuture<'a, Vec<PriceSample>>;
}

// =============================================================================
// Simulated Market
// =============================================================================

/// Samples kept per symbol.
const HISTORY_CAPACITY: usize = 500;

/// Largest per-step drift the random walk wanders to.
const MAX_DRIFT: f64 = 0.002;

/// Per-symbol random walk state.
#[derive(Debug, Clone)]
struct SymbolFeed {
    price: f64,
    /// Per-step return standard deviation
    step_volatility: f64,
    /// Slowly wandering per-step drift, gives the walk trending stretches
    drift: f64,
    base_volume: f64,
    history: VecDeque<PriceSample>,
}

impl SymbolFeed {
    fn new(price: f64, step_volatility: f64) -> Self {
        Self {
            price,
            step_volatility,
            drift: 0.0,
            base_volume: 1_000.0,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    fn push(&mut self, sample: PriceSample) {
        self.price = sample.price;
        self.history.push_back(sample);
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }

    fn advance(&mut self, rng: &mut StdRng, timestamp: i64) {
        self.drift = (self.drift + rng.gen_range(-0.0002..0.0002)).clamp(-MAX_DRIFT, MAX_DRIFT);
        // Uniform noise scaled to the configured standard deviation
        let noise = rng.gen_range(-1.0..1.0) * self.step_volatility * 3f64.sqrt();
        let price = (self.price * (1.0 + self.drift + noise)).max(f64::EPSILON);
        let volume = self.base_volume * rng.gen_range(0.5..1.5);
        self.push(PriceSample::new(timestamp, price, volume));
    }
}

/// Seeded random-walk market feed.
pub struct SimulatedMarket {
    feeds: DashMap<String, SymbolFeed>,
    rng: Mutex<StdRng>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl SimulatedMarket {
    /// Create an empty market. The same seed always yields the same walk.
    pub fn new(seed: u64) -> Self {
        Self {
            feeds: DashMap::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            unavailable: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Market pre-loaded with a few crypto pairs and `warm_up` samples of history.
    pub fn with_defaults(seed: u64, warm_up: usize) -> Self {
        let market = Self::new(seed);
        market.add_symbol("BTC/USD", 50_000.0, 0.004);
        market.add_symbol("ETH/USD", 3_000.0, 0.006);
        market.add_symbol("SOL/USD", 150.0, 0.01);

        let now = chrono::Utc::now().timestamp_millis();
        for i in 0..warm_up {
            let timestamp = now - ((warm_up - i) as i64) * 1_000;
            market.step_at(timestamp);
        }
        market
    }

    /// Register a symbol with a starting price and per-step volatility.
    pub fn add_symbol(&self, symbol: &str, price: f64, step_volatility: f64) {
        let mut feed = SymbolFeed::new(price, step_volatility);
        feed.push(PriceSample::new(chrono::Utc::now().timestamp_millis(), price, feed.base_volume));
        self.feeds.insert(normalize(symbol), feed);
    }

    /// Pin the current price, registering the symbol if needed.
    pub fn set_price(&self, symbol: &str, price: f64) {
        let sample = PriceSample::new(chrono::Utc::now().timestamp_millis(), price, 1_000.0);
        self.feeds
            .entry(normalize(symbol))
            .or_insert_with(|| SymbolFeed::new(price, 0.0))
            .push(sample);
    }

    /// Replace a symbol's history with a scripted series. The last sample
    /// becomes the current price.
    pub fn load_series(&self, symbol: &str, samples: Vec<PriceSample>) {
        let Some(last) = samples.last().copied() else {
            return;
        };
        let mut feed = SymbolFeed::new(last.price, 0.0);
        for sample in samples {
            feed.push(sample);
        }
        self.feeds.insert(normalize(symbol), feed);
    }

    /// Make every call fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Symbols currently quoted, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.feeds.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    /// Advance every symbol one random-walk step.
    pub fn step(&self) {
        self.step_at(chrono::Utc::now().timestamp_millis());
    }

    fn step_at(&self, timestamp: i64) {
        let Ok(mut rng) = self.rng.lock() else {
            return;
        };
        // Sorted so the walk only depends on the seed
        for symbol in self.symbols() {
            if let Some(mut feed) = self.feeds.get_mut(&symbol) {
                feed.advance(&mut rng, timestamp);
            }
        }
    }

    /// Step the market on an interval until shutdown.
    pub async fn run(self: Arc<Self>, tick: Duration, mut shutdown: broadcast::Receiver<()>) {
        info!("Simulated market started ({} symbols, tick {:?})", self.feeds.len(), tick);
        let mut interval = tokio::time::interval(tick);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.step();
                }
                _ = shutdown.recv() => {
                    info!("Simulated market stopping");
                    break;
                }
            }
        }
    }

    async fn gate(&self) -> Result<(), GatewayError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

impl MarketDataGateway for SimulatedMarket {
    fn current_price<'a>(&'a self, symbol: &'a str) -> GatewayFuture<'a, f64> {
        Box::pin(async move {
            self.gate().await?;
            let key = normalize(symbol);
            let price = self
                .feeds
                .get(&key)
                .map(|feed| feed.price)
                .ok_or(GatewayError::UnknownSymbol(key))?;
            debug!("Quote {} = {}", symbol, price);
            Ok(price)
        })
    }

    fn recent_series<'a>(
        &'a self,
        symbol: &'a str,
        window: usize,
    ) -> GatewayFuture<'a, Vec<PriceSample>> {
        Box::pin(async move {
            self.gate().await?;
            let key = normalize(symbol);
            let feed = self
                .feeds
                .get(&key)
                .ok_or(GatewayError::UnknownSymbol(key))?;
            let skip = feed.history.len().saturating_sub(window);
            Ok(feed.history.iter().skip(skip).copied().collect())
        })
    }
}

fn normalize(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}
