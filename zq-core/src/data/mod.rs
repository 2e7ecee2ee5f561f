//! Data engine: drives providers, validates their output, feeds the cache
//!
//! Providers push parsed market data into a bounded ingest queue (default
//! capacity 4096). The engine's worker drains it, validates every item,
//! writes survivors into the cache and publishes `market_data.*` events.
//!
//! Backpressure: when the queue is full an incoming quote evicts the
//! oldest queued quote for the same pair (freshness wins) and a gap is
//! recorded; candles and trades are never dropped. A disconnected provider
//! is flagged degraded, `system.provider.<name>.down` is published, and
//! reconnection runs with jittered exponential backoff (100ms up to 30s).
//! Subscriptions are replayed after every successful (re)connect.

pub mod validator;

pub use validator::MarketValidator;

use crate::adapter::DataProvider;
use crate::bus::{Event, MessageBus};
use crate::cache::Cache;
use crate::core::errors::Result;
use crate::core::types::{Candle, MarketTrade, Quote, Timeframe, TradingPair};
use crate::resilience::{BackoffConfig, ExponentialBackoff, ShutdownToken};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default ingest queue capacity.
pub const DEFAULT_INGEST_CAPACITY: usize = 4096;

/// One item pushed by a provider.
#[derive(Debug, Clone)]
pub enum MarketItem {
    Quote(Quote),
    Candle(Candle),
    Trade(MarketTrade),
}

#[derive(Debug, Default)]
pub struct DataStats {
    pub quotes_accepted: AtomicU64,
    pub candles_accepted: AtomicU64,
    pub trades_accepted: AtomicU64,
    pub invalid_dropped: AtomicU64,
    pub backpressure_dropped: AtomicU64,
    pub gaps: AtomicU64,
}

struct IngestQueue {
    capacity: usize,
    items: Mutex<VecDeque<MarketItem>>,
    available: Condvar,
    stats: Arc<DataStats>,
}

impl IngestQueue {
    fn push(&self, item: MarketItem) {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            if matches!(item, MarketItem::Quote(_)) {
                let incoming_pair = match &item {
                    MarketItem::Quote(q) => q.pair.clone(),
                    _ => unreachable!(),
                };
                // Prefer evicting a stale quote for the same pair, then any
                // quote at all. Candles and trades stay queued regardless.
                let victim = items
                    .iter()
                    .position(|queued| {
                        matches!(queued, MarketItem::Quote(q) if q.pair == incoming_pair)
                    })
                    .or_else(|| {
                        items
                            .iter()
                            .position(|queued| matches!(queued, MarketItem::Quote(_)))
                    });
                match victim {
                    Some(idx) => {
                        items.remove(idx);
                        self.stats.backpressure_dropped.fetch_add(1, Ordering::Relaxed);
                        self.stats.gaps.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        // Queue full of candles/trades; the quote grows the
                        // queue rather than losing never-droppable items.
                    }
                }
            }
        }
        items.push_back(item);
        drop(items);
        self.available.notify_one();
    }

    fn pop(&self, timeout: Duration) -> Option<MarketItem> {
        let mut items = self.items.lock();
        if items.is_empty() {
            self.available.wait_for(&mut items, timeout);
        }
        items.pop_front()
    }
}

/// Handle given to providers for pushing market data.
#[derive(Clone)]
pub struct MarketSink {
    queue: Arc<IngestQueue>,
}

impl MarketSink {
    pub fn push_quote(&self, quote: Quote) {
        self.queue.push(MarketItem::Quote(quote));
    }

    pub fn push_candle(&self, candle: Candle) {
        self.queue.push(MarketItem::Candle(candle));
    }

    pub fn push_trade(&self, trade: MarketTrade) {
        self.queue.push(MarketItem::Trade(trade));
    }
}

impl std::fmt::Debug for MarketSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketSink").finish()
    }
}

#[derive(Debug, Clone)]
pub struct DataEngineConfig {
    pub ingest_capacity: usize,
    /// How often the monitor thread checks provider liveness.
    pub monitor_interval: Duration,
}

impl Default for DataEngineConfig {
    fn default() -> Self {
        Self {
            ingest_capacity: DEFAULT_INGEST_CAPACITY,
            monitor_interval: Duration::from_secs(1),
        }
    }
}

struct ProviderSlot {
    provider: Arc<dyn DataProvider>,
    degraded: Arc<AtomicBool>,
    reconnecting: Arc<AtomicBool>,
}

/// Owns provider adapters and the ingest pipeline.
pub struct DataEngine {
    bus: MessageBus,
    cache: Arc<Cache>,
    queue: Arc<IngestQueue>,
    stats: Arc<DataStats>,
    providers: Mutex<Vec<ProviderSlot>>,
    subscriptions: Mutex<Vec<(TradingPair, Option<Timeframe>)>>,
    shutdown: ShutdownToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    config: DataEngineConfig,
}

impl DataEngine {
    pub fn new(bus: MessageBus, cache: Arc<Cache>, config: DataEngineConfig) -> Arc<Self> {
        let stats = Arc::new(DataStats::default());
        let queue = Arc::new(IngestQueue {
            capacity: config.ingest_capacity,
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            stats: Arc::clone(&stats),
        });
        Arc::new(Self {
            bus,
            cache,
            queue,
            stats,
            providers: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            shutdown: ShutdownToken::new(),
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            config,
        })
    }

    /// The sink handed to providers on connect.
    pub fn sink(&self) -> MarketSink {
        MarketSink {
            queue: Arc::clone(&self.queue),
        }
    }

    pub fn stats(&self) -> &DataStats {
        &self.stats
    }

    /// Install a provider adapter. Its capabilities are queried here; pairs
    /// outside them are refused at subscribe time by the adapter itself.
    pub fn register_provider(&self, provider: Arc<dyn DataProvider>) {
        let caps = provider.capabilities();
        info!(
            provider = provider.name(),
            pairs = caps.pairs.len(),
            streaming = caps.streaming,
            "registered data provider"
        );
        self.providers.lock().push(ProviderSlot {
            provider,
            degraded: Arc::new(AtomicBool::new(false)),
            reconnecting: Arc::new(AtomicBool::new(false)),
        });
    }

    /// Request a stream. Recorded before providers start; replayed on every
    /// (re)connect.
    pub fn subscribe(&self, pair: TradingPair, timeframe: Option<Timeframe>) -> Result<()> {
        {
            let mut subs = self.subscriptions.lock();
            if !subs.contains(&(pair.clone(), timeframe)) {
                subs.push((pair.clone(), timeframe));
            }
        }
        if self.running.load(Ordering::Acquire) {
            for slot in self.providers.lock().iter() {
                if slot.provider.is_connected() {
                    slot.provider.subscribe(&pair, timeframe)?;
                }
            }
        }
        Ok(())
    }

    /// Connect all providers, replay subscriptions, start the ingest worker
    /// and the connection monitor.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for slot in self.providers.lock().iter() {
            match slot.provider.connect(self.sink()) {
                Ok(()) => self.replay_subscriptions(slot.provider.as_ref()),
                Err(err) => {
                    warn!(provider = slot.provider.name(), %err, "initial connect failed");
                    slot.degraded.store(true, Ordering::Release);
                }
            }
        }

        let engine = Arc::clone(self);
        let ingest = std::thread::Builder::new()
            .name("data-ingest".into())
            .spawn(move || {
                let worker = Arc::clone(&engine);
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                    worker.ingest_loop()
                }));
                if outcome.is_err() {
                    // A dead ingest pipeline is a critical failure; the
                    // engine reacts to this topic by tripping the kill
                    // switch.
                    engine.bus.publish(
                        "system.component.data.crashed",
                        Event::ComponentCrashed {
                            component: "data".to_string(),
                            message: "ingest worker panicked".to_string(),
                        },
                    );
                }
            })
            .expect("failed to spawn data ingest thread");

        let engine = Arc::clone(self);
        let monitor = std::thread::Builder::new()
            .name("data-monitor".into())
            .spawn(move || engine.monitor_loop())
            .expect("failed to spawn data monitor thread");

        let mut workers = self.workers.lock();
        workers.push(ingest);
        workers.push(monitor);
        Ok(())
    }

    /// Stop workers and disconnect providers.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shutdown.stop();
        for slot in self.providers.lock().iter() {
            if let Err(err) = slot.provider.disconnect() {
                warn!(provider = slot.provider.name(), %err, "disconnect failed");
            }
        }
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
    }

    fn replay_subscriptions(&self, provider: &dyn DataProvider) {
        for (pair, timeframe) in self.subscriptions.lock().iter() {
            if let Err(err) = provider.subscribe(pair, *timeframe) {
                warn!(provider = provider.name(), %pair, %err, "subscription replay failed");
            }
        }
    }

    fn ingest_loop(self: Arc<Self>) {
        let mut validator = MarketValidator::new();
        while !self.shutdown.is_stopped() {
            let Some(item) = self.queue.pop(Duration::from_millis(100)) else {
                continue;
            };
            self.process(&mut validator, item);
        }
        // Drain what is already queued so a stop does not lose validated data.
        while let Some(item) = self.queue.pop(Duration::from_millis(0)) {
            self.process(&mut validator, item);
        }
        debug!("data ingest worker stopped");
    }

    fn process(&self, validator: &mut MarketValidator, item: MarketItem) {
        match item {
            MarketItem::Quote(quote) => {
                if let Err(err) = validator.validate_quote(&quote) {
                    self.stats.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(%err, "dropping invalid quote");
                    return;
                }
                let topic = format!("market_data.quote.{}", quote.pair);
                if self.cache.update_quote(quote.clone()).is_ok() {
                    self.stats.quotes_accepted.fetch_add(1, Ordering::Relaxed);
                    self.bus.publish(&topic, Event::Quote(quote));
                }
            }
            MarketItem::Candle(candle) => {
                if let Err(err) = validator.validate_candle(&candle) {
                    self.stats.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(%err, "dropping invalid candle");
                    return;
                }
                let topic = format!(
                    "market_data.candle.{}.{}",
                    candle.pair, candle.timeframe
                );
                if self.cache.update_candle(candle.clone()).is_ok() {
                    self.stats.candles_accepted.fetch_add(1, Ordering::Relaxed);
                    self.bus.publish(&topic, Event::Candle(candle));
                }
            }
            MarketItem::Trade(trade) => {
                if let Err(err) = validator.validate_trade(&trade) {
                    self.stats.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(%err, "dropping invalid trade");
                    return;
                }
                self.stats.trades_accepted.fetch_add(1, Ordering::Relaxed);
                let topic = format!("market_data.trade.{}", trade.pair);
                self.bus.publish(&topic, Event::Trade(trade));
            }
        }
    }

    fn monitor_loop(self: Arc<Self>) {
        while !self.shutdown.wait_timeout(self.config.monitor_interval) {
            let slots: Vec<(Arc<dyn DataProvider>, Arc<AtomicBool>, Arc<AtomicBool>)> = self
                .providers
                .lock()
                .iter()
                .map(|s| {
                    (
                        Arc::clone(&s.provider),
                        Arc::clone(&s.degraded),
                        Arc::clone(&s.reconnecting),
                    )
                })
                .collect();

            for (provider, degraded, reconnecting) in slots {
                let connected = provider.is_connected();
                let was_degraded = degraded.load(Ordering::Acquire);

                if connected && was_degraded {
                    degraded.store(false, Ordering::Release);
                    self.bus.publish(
                        &format!("system.provider.{}.up", provider.name()),
                        Event::ProviderStatus {
                            provider: provider.name().to_string(),
                            connected: true,
                        },
                    );
                } else if !connected && !was_degraded {
                    degraded.store(true, Ordering::Release);
                    warn!(provider = provider.name(), "provider disconnected");
                    self.bus.publish(
                        &format!("system.provider.{}.down", provider.name()),
                        Event::ProviderStatus {
                            provider: provider.name().to_string(),
                            connected: false,
                        },
                    );
                }

                if !connected && !reconnecting.swap(true, Ordering::AcqRel) {
                    self.spawn_reconnect(provider, degraded, reconnecting);
                }
            }
        }
        debug!("data monitor stopped");
    }

    fn spawn_reconnect(
        self: &Arc<Self>,
        provider: Arc<dyn DataProvider>,
        degraded: Arc<AtomicBool>,
        reconnecting: Arc<AtomicBool>,
    ) {
        let engine = Arc::clone(self);
        let name = provider.name().to_string();
        let handle = std::thread::Builder::new()
            .name(format!("data-reconnect-{name}"))
            .spawn(move || {
                let mut backoff = ExponentialBackoff::new(BackoffConfig::reconnect());
                loop {
                    let Some(delay) = backoff.next_delay() else { break };
                    if engine.shutdown.wait_timeout(delay) {
                        break;
                    }
                    match provider.connect(engine.sink()) {
                        Ok(()) => {
                            info!(provider = %name, attempts = backoff.attempt(), "provider reconnected");
                            engine.replay_subscriptions(provider.as_ref());
                            degraded.store(false, Ordering::Release);
                            engine.bus.publish(
                                &format!("system.provider.{name}.up"),
                                Event::ProviderStatus {
                                    provider: name.clone(),
                                    connected: true,
                                },
                            );
                            break;
                        }
                        Err(err) => {
                            debug!(provider = %name, %err, "reconnect attempt failed");
                        }
                    }
                }
                reconnecting.store(false, Ordering::Release);
            })
            .expect("failed to spawn reconnect thread");
        self.workers.lock().push(handle);
    }
}

impl std::fmt::Debug for DataEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEngine")
            .field("providers", &self.providers.lock().len())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::core::time::Timestamp;
    use rust_decimal_macros::dec;

    fn pair() -> TradingPair {
        TradingPair::new("BTC", "USDC")
    }

    fn quote(ns: i64, bid: rust_decimal::Decimal) -> Quote {
        Quote {
            pair: pair(),
            bid,
            ask: bid + dec!(1),
            bid_size: dec!(1),
            ask_size: dec!(1),
            ts: Timestamp::from_ns(ns),
        }
    }

    fn engine() -> Arc<DataEngine> {
        let bus = MessageBus::new();
        let cache = Arc::new(Cache::new(
            bus.clone(),
            CacheConfig {
                enable_notifications: false,
                ..Default::default()
            },
        ));
        DataEngine::new(bus, cache, DataEngineConfig::default())
    }

    #[test]
    fn test_invalid_items_counted_and_dropped() {
        let engine = engine();
        let sink = engine.sink();
        sink.push_quote(quote(100, dec!(50)));
        let mut crossed = quote(200, dec!(50));
        crossed.ask = dec!(40);
        sink.push_quote(crossed);

        let mut validator = MarketValidator::new();
        while let Some(item) = engine.queue.pop(Duration::from_millis(0)) {
            engine.process(&mut validator, item);
        }
        assert_eq!(engine.stats.quotes_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(engine.stats.invalid_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(engine.cache.quote(&pair()).unwrap().bid, dec!(50));
    }

    #[test]
    fn test_out_of_order_quote_dropped() {
        let engine = engine();
        let mut validator = MarketValidator::new();
        engine.process(&mut validator, MarketItem::Quote(quote(2_000, dec!(50))));
        engine.process(&mut validator, MarketItem::Quote(quote(1_000, dec!(60))));
        // Stale update must not overwrite the fresher quote.
        assert_eq!(engine.cache.quote(&pair()).unwrap().bid, dec!(50));
        assert_eq!(engine.stats.invalid_dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_backpressure_drops_oldest_same_pair_quote() {
        let bus = MessageBus::new();
        let cache = Arc::new(Cache::new(
            bus.clone(),
            CacheConfig {
                enable_notifications: false,
                ..Default::default()
            },
        ));
        let engine = DataEngine::new(
            bus,
            cache,
            DataEngineConfig {
                ingest_capacity: 2,
                ..Default::default()
            },
        );
        let sink = engine.sink();
        sink.push_quote(quote(100, dec!(10)));
        sink.push_quote(quote(200, dec!(11)));
        sink.push_quote(quote(300, dec!(12))); // evicts the ts=100 quote

        assert_eq!(engine.stats.backpressure_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(engine.stats.gaps.load(Ordering::Relaxed), 1);

        let first = engine.queue.pop(Duration::from_millis(0)).unwrap();
        match first {
            MarketItem::Quote(q) => assert_eq!(q.ts.as_ns(), 200),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_candles_never_dropped_under_backpressure() {
        let bus = MessageBus::new();
        let cache = Arc::new(Cache::new(
            bus.clone(),
            CacheConfig {
                enable_notifications: false,
                ..Default::default()
            },
        ));
        let engine = DataEngine::new(
            bus,
            cache,
            DataEngineConfig {
                ingest_capacity: 1,
                ..Default::default()
            },
        );
        let sink = engine.sink();
        let candle = Candle {
            pair: pair(),
            timeframe: Timeframe::M1,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100),
            volume: dec!(1),
            open_ts: Timestamp::from_ns(Timeframe::M1.duration_ns()),
        };
        sink.push_candle(candle.clone());
        sink.push_candle(candle.clone());
        sink.push_candle(candle);

        let mut count = 0;
        while engine.queue.pop(Duration::from_millis(0)).is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
