//! Live engine composition: event-mode strategy dispatch through the
//! data pipeline, tick-mode clocking, and clean shutdown.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use zq_core::adapter::{DataProvider, ExecutionClient};
use zq_core::bus::MessageBus;
use zq_core::cache::{Cache, CacheConfig};
use zq_core::core::types::{Balance, Quote, Side, TradingPair};
use zq_core::core::Timestamp;
use zq_core::data::{DataEngine, DataEngineConfig};
use zq_core::engine::{EngineConfig, EngineMode, LiveTradingEngine};
use zq_core::execution::{ExecutionConfig, ExecutionEngine};
use zq_core::risk::stops::StopLossManager;
use zq_core::risk::{RiskConfig, RiskEngine};
use zq_core::strategy::{Strategy, StrategyContext, ThresholdStrategy};
use zq_core::testing::{MockDataProvider, MockExecutionClient};

fn pair() -> TradingPair {
    TradingPair::new("BTC", "USDC")
}

struct Harness {
    bus: MessageBus,
    engine: Arc<LiveTradingEngine>,
    provider: Arc<MockDataProvider>,
    client: Arc<MockExecutionClient>,
    cache: Arc<Cache>,
}

fn harness(mode: EngineMode) -> Harness {
    let bus = MessageBus::new();
    let cache = Arc::new(Cache::new(bus.clone(), CacheConfig::default()));
    cache
        .update_balance(Balance {
            asset: "USDC".into(),
            total: dec!(1_000_000),
            available: dec!(1_000_000),
            locked: Decimal::ZERO,
            ts: Timestamp::now(),
        })
        .unwrap();

    let risk = RiskEngine::new(bus.clone(), Arc::clone(&cache), RiskConfig::default());
    let client = Arc::new(MockExecutionClient::new());
    let execution = ExecutionEngine::new(
        bus.clone(),
        Arc::clone(&cache),
        Arc::clone(&risk),
        Arc::clone(&client) as Arc<dyn ExecutionClient>,
        ExecutionConfig::default(),
    );
    let stops = StopLossManager::new(Arc::clone(&execution));
    let data = DataEngine::new(bus.clone(), Arc::clone(&cache), DataEngineConfig::default());
    let provider = Arc::new(MockDataProvider::new("mock-feed"));
    data.register_provider(Arc::clone(&provider) as Arc<dyn DataProvider>);
    data.subscribe(pair(), None).unwrap();

    let engine = LiveTradingEngine::new(
        bus.clone(),
        Arc::clone(&cache),
        data,
        execution,
        risk,
        stops,
        None,
        EngineConfig {
            mode,
            tick_interval: Duration::from_millis(20),
            cancel_orders_on_stop: true,
            stop_grace: Duration::from_secs(2),
            run_recovery: false,
            metrics_interval: Duration::from_secs(60),
        },
    );
    Harness {
        bus,
        engine,
        provider,
        client,
        cache,
    }
}

fn quote(bid: Decimal, ns: i64) -> Quote {
    Quote {
        pair: pair(),
        bid,
        ask: bid + dec!(1),
        bid_size: dec!(5),
        ask_size: dec!(5),
        ts: Timestamp::from_ns(ns),
    }
}

#[test]
fn test_event_mode_quote_to_order_flow() {
    let h = harness(EngineMode::Event);
    h.engine.attach_strategy(Box::new(ThresholdStrategy::new(
        pair(),
        dec!(50_100),
        dec!(49_000),
        dec!(0.1),
    )));
    h.engine.start().unwrap();

    // Feed quotes through the provider: the second one crosses the band.
    let sink = h.provider.sink().expect("provider connected");
    sink.push_quote(quote(dec!(50_000), 1_000));
    sink.push_quote(quote(dec!(50_200), 2_000));

    let deadline = Instant::now() + Duration::from_secs(3);
    while h.client.submit_count() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(h.client.submit_count(), 1, "threshold crossing buys once");
    let submitted = &h.client.submits.lock()[0];
    assert_eq!(submitted.side, Side::Buy);
    assert_eq!(submitted.qty, dec!(0.1));

    // The cache saw the quotes on the way through.
    assert_eq!(h.cache.quote(&pair()).unwrap().bid, dec!(50_200));

    h.engine.stop();
}

#[test]
fn test_tick_mode_dispatches_and_counts() {
    struct TickCounter(Arc<AtomicU64>);
    impl Strategy for TickCounter {
        fn name(&self) -> &str {
            "tick-counter"
        }
        fn on_tick(&mut self, _ctx: &StrategyContext) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let h = harness(EngineMode::Tick);
    let ticks = Arc::new(AtomicU64::new(0));
    h.engine
        .attach_strategy(Box::new(TickCounter(Arc::clone(&ticks))));
    h.engine.start().unwrap();

    std::thread::sleep(Duration::from_millis(250));
    h.engine.stop();

    let seen = ticks.load(Ordering::SeqCst);
    assert!(seen >= 5, "expected at least 5 ticks in 250ms, got {seen}");
    assert!(h.engine.stats().ticks.load(Ordering::Relaxed) >= seen);
}

#[test]
fn test_stop_cancels_open_orders() {
    let h = harness(EngineMode::Event);
    h.engine.start().unwrap();

    // Park a resting order through the bus command surface, the way an
    // external caller would reach the engine.
    let request = zq_core::core::types::OrderRequest::limit(
        pair(),
        Side::Buy,
        dec!(0.1),
        dec!(49_000),
    );
    let reply = h
        .bus
        .request(
            "execution.submit",
            zq_core::bus::Event::SubmitRequest(request),
        )
        .unwrap();
    let zq_core::bus::Event::OrderIdAck(cloid) = reply else {
        panic!("expected an order id ack, got {reply:?}");
    };
    assert_eq!(h.cache.active_orders().len(), 1);

    h.engine.stop();
    assert!(
        h.client.cancels.lock().contains(&cloid),
        "stop sequence cancels the resting order"
    );
    assert!(h.cache.active_orders().is_empty());
}
