//! End-to-end order lifecycle through the execution engine against a
//! scripted mock venue: happy path, retry, risk rejection, local limits,
//! and stream-update idempotence.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use zq_core::adapter::ExecutionClient;
use zq_core::bus::{MessageBus, OrderUpdate};
use zq_core::cache::{Cache, CacheConfig};
use zq_core::core::errors::{BusinessError, RiskError, ZqError};
use zq_core::core::types::{
    Balance, Fill, OrderRequest, OrderStatus, Side, TradingPair,
};
use zq_core::core::Timestamp;
use zq_core::execution::{ExecutionConfig, ExecutionEngine};
use zq_core::risk::{RiskConfig, RiskEngine};
use zq_core::testing::{EventCollector, MockExecutionClient, SubmitOutcome};

struct Harness {
    bus: MessageBus,
    cache: Arc<Cache>,
    risk: Arc<RiskEngine>,
    client: Arc<MockExecutionClient>,
    engine: Arc<ExecutionEngine>,
}

fn pair() -> TradingPair {
    TradingPair::new("BTC", "USDC")
}

fn harness(risk_config: RiskConfig, execution_config: ExecutionConfig) -> Harness {
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
    let risk = RiskEngine::new(bus.clone(), Arc::clone(&cache), risk_config);
    let client = Arc::new(MockExecutionClient::new());
    let engine = ExecutionEngine::new(
        bus.clone(),
        Arc::clone(&cache),
        Arc::clone(&risk),
        Arc::clone(&client) as Arc<dyn ExecutionClient>,
        execution_config,
    );
    Harness {
        bus,
        cache,
        risk,
        client,
        engine,
    }
}

fn lifecycle_topics(collector: &EventCollector) -> Vec<String> {
    collector
        .topics()
        .into_iter()
        .filter(|t| t != "order.snapshot")
        .collect()
}

#[test]
fn test_happy_path_submit_and_fill() {
    let h = harness(RiskConfig::default(), ExecutionConfig::default());
    let collector = EventCollector::subscribe(&h.bus, "order.*");

    let request = OrderRequest::limit(pair(), Side::Buy, dec!(0.1), dec!(50_000));
    let cloid = h.engine.submit(request).unwrap();

    // Exactly one adapter call, carrying the client order id.
    assert_eq!(h.client.submit_count(), 1);
    assert_eq!(h.client.submits.lock()[0].client_order_id, cloid);

    // Synthetic full fill, as the stream would report it.
    h.engine.on_fill(&Fill {
        client_order_id: cloid.clone(),
        pair: pair(),
        side: Side::Buy,
        qty: dec!(0.1),
        price: dec!(50_000),
        fee: Decimal::ZERO,
        ts: Timestamp::now(),
    });

    assert!(collector.wait_for_topic("order.filled", Duration::from_secs(2)));
    let topics = lifecycle_topics(&collector);
    assert_eq!(
        topics,
        vec!["order.pending", "order.submitted", "order.accepted", "order.filled"]
    );

    let order = h.cache.order(&cloid).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_qty, dec!(0.1));
    assert_eq!(order.remaining_qty, Decimal::ZERO);
    assert_eq!(order.avg_fill_price, Some(dec!(50_000)));
    assert_eq!(h.engine.pending_count(), 0);
}

#[test]
fn test_retry_on_timeout_succeeds_third_attempt() {
    let h = harness(RiskConfig::default(), ExecutionConfig::default());
    h.client.script([
        SubmitOutcome::Timeout,
        SubmitOutcome::Timeout,
        SubmitOutcome::Ack(OrderStatus::Open),
    ]);
    let collector = EventCollector::subscribe(&h.bus, "order.rejected");

    let started = Instant::now();
    let request = OrderRequest::limit(pair(), Side::Buy, dec!(0.1), dec!(50_000));
    let cloid = h.engine.submit(request).unwrap();
    let elapsed = started.elapsed();

    // Three calls, with backoffs of at least 1s then 2s between them.
    assert_eq!(h.client.submit_count(), 3);
    assert!(
        elapsed >= Duration::from_secs(3),
        "backoff intervals too short: {elapsed:?}"
    );

    let order = h.cache.order(&cloid).unwrap();
    assert_eq!(order.status, OrderStatus::Open);
    assert!(order.exchange_order_id.is_some());

    std::thread::sleep(Duration::from_millis(50));
    assert!(collector.is_empty(), "no order.rejected while retrying");
}

#[test]
fn test_retries_exhausted_rejects() {
    let h = harness(
        RiskConfig::default(),
        ExecutionConfig {
            max_retries: 1,
            retry_base: Duration::from_millis(20),
            ..Default::default()
        },
    );
    h.client
        .script([SubmitOutcome::Timeout, SubmitOutcome::Timeout]);

    let request = OrderRequest::limit(pair(), Side::Buy, dec!(0.1), dec!(50_000));
    let err = h.engine.submit(request).unwrap_err();
    assert!(err.is_retryable(), "surfaced error is the transport error");
    assert_eq!(h.client.submit_count(), 2);

    let orders = h.cache.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Rejected);
}

#[test]
fn test_risk_rejection_with_structured_details() {
    let h = harness(
        RiskConfig {
            max_daily_loss: dec!(1_000),
            kill_switch_threshold: Decimal::ZERO,
            ..Default::default()
        },
        ExecutionConfig::default(),
    );
    h.risk.note_realized_pnl(dec!(-1_100));
    let rejections = EventCollector::subscribe(&h.bus, "risk.rejection");

    let request = OrderRequest::limit(pair(), Side::Buy, dec!(0.1), dec!(50_000));
    match h.engine.submit(request) {
        Err(ZqError::Risk(RiskError::DailyLossExceeded { limit, actual })) => {
            assert_eq!(limit, dec!(1_000));
            assert_eq!(actual, dec!(1_100));
        }
        other => panic!("unexpected: {other:?}"),
    }

    // No adapter call; the order is terminal-rejected in the cache.
    assert_eq!(h.client.submit_count(), 0);
    let orders = h.cache.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Rejected);
    assert!(rejections.wait_for(1, Duration::from_secs(2)));
}

#[test]
fn test_zero_quantity_rejected() {
    let h = harness(RiskConfig::default(), ExecutionConfig::default());
    let request = OrderRequest::market(pair(), Side::Buy, Decimal::ZERO);
    assert!(matches!(
        h.engine.submit(request),
        Err(ZqError::Business(BusinessError::InvalidQuantity(_)))
    ));
    assert_eq!(h.client.submit_count(), 0);
}

#[test]
fn test_limit_without_price_rejected() {
    let h = harness(RiskConfig::default(), ExecutionConfig::default());
    let mut request = OrderRequest::limit(pair(), Side::Buy, dec!(0.1), dec!(50_000));
    request.price = None;
    assert!(matches!(
        h.engine.submit(request),
        Err(ZqError::Business(BusinessError::LimitOrderRequiresPrice))
    ));
}

#[test]
fn test_max_open_orders_boundary() {
    let h = harness(
        RiskConfig::default(),
        ExecutionConfig {
            max_open_orders: 3,
            ..Default::default()
        },
    );
    for i in 0..3 {
        let request =
            OrderRequest::limit(pair(), Side::Buy, dec!(0.01), dec!(40_000) + Decimal::from(i));
        h.engine.submit(request).unwrap();
    }
    let request = OrderRequest::limit(pair(), Side::Buy, dec!(0.01), dec!(41_000));
    assert!(matches!(
        h.engine.submit(request),
        Err(ZqError::Risk(RiskError::OrderRateExceeded { limit: 3 }))
    ));
    assert_eq!(h.client.submit_count(), 3);
}

#[test]
fn test_kill_switch_rejects_next_submission() {
    let h = harness(RiskConfig::default(), ExecutionConfig::default());
    h.risk.trip("test halt");

    let request = OrderRequest::limit(pair(), Side::Buy, dec!(0.1), dec!(50_000));
    assert!(matches!(
        h.engine.submit(request),
        Err(ZqError::Risk(RiskError::KillSwitchActive))
    ));
    assert_eq!(h.client.submit_count(), 0);
}

#[test]
fn test_duplicate_stream_updates_are_noops() {
    let h = harness(RiskConfig::default(), ExecutionConfig::default());
    let request = OrderRequest::limit(pair(), Side::Buy, dec!(1), dec!(50_000));
    let cloid = h.engine.submit(request).unwrap();

    let filled = OrderUpdate {
        client_order_id: cloid.clone(),
        exchange_order_id: Some("ex-1".into()),
        status: OrderStatus::Filled,
        filled_qty: Some(dec!(1)),
        avg_fill_price: Some(dec!(50_000)),
        ts: Timestamp::now(),
    };
    h.engine.on_order_update(&filled);
    let snapshot = h.cache.order(&cloid).unwrap();
    assert_eq!(snapshot.status, OrderStatus::Filled);

    // Replaying the same update, and a regressing one, changes nothing.
    h.engine.on_order_update(&filled);
    let open_again = OrderUpdate {
        status: OrderStatus::Open,
        filled_qty: Some(dec!(0.5)),
        ..filled.clone()
    };
    h.engine.on_order_update(&open_again);

    let after = h.cache.order(&cloid).unwrap();
    assert_eq!(after.status, OrderStatus::Filled);
    assert_eq!(after.filled_qty, dec!(1));
}

#[test]
fn test_stream_promotion_before_sync_ack() {
    // The stream resolves the order while the submit call is still
    // retrying; the late ack must not regress it.
    let h = harness(
        RiskConfig::default(),
        ExecutionConfig {
            max_retries: 3,
            retry_base: Duration::from_millis(100),
            ..Default::default()
        },
    );
    h.client.script([
        SubmitOutcome::Timeout,
        SubmitOutcome::Ack(OrderStatus::Open),
    ]);

    let engine = Arc::clone(&h.engine);
    let cache = Arc::clone(&h.cache);
    let handle = std::thread::spawn(move || {
        let request = OrderRequest::limit(pair(), Side::Buy, dec!(0.5), dec!(50_000));
        engine.submit(request)
    });

    // While the engine sleeps on backoff, the venue's stream reports the
    // order open.
    std::thread::sleep(Duration::from_millis(30));
    let pending = cache.orders();
    assert_eq!(pending.len(), 1);
    let cloid = pending[0].client_order_id.clone();
    h.engine.on_order_update(&OrderUpdate {
        client_order_id: cloid.clone(),
        exchange_order_id: Some("ex-77".into()),
        status: OrderStatus::Open,
        filled_qty: None,
        avg_fill_price: None,
        ts: Timestamp::now(),
    });

    let result = handle.join().unwrap();
    assert_eq!(result.unwrap(), cloid);
    let order = h.cache.order(&cloid).unwrap();
    assert_eq!(order.status, OrderStatus::Open);
    assert_eq!(order.exchange_order_id.as_deref(), Some("ex-77"));
    assert_eq!(h.engine.pending_count(), 0);
}

#[test]
fn test_cancel_all_with_filter() {
    let h = harness(RiskConfig::default(), ExecutionConfig::default());
    let eth = TradingPair::new("ETH", "USDC");

    h.engine
        .submit(OrderRequest::limit(pair(), Side::Buy, dec!(0.1), dec!(50_000)))
        .unwrap();
    h.engine
        .submit(OrderRequest::limit(pair(), Side::Sell, dec!(0.1), dec!(60_000)))
        .unwrap();
    h.engine
        .submit(OrderRequest::limit(eth.clone(), Side::Buy, dec!(1), dec!(3_000)))
        .unwrap();

    let report = h.engine.cancel_all(&zq_core::core::types::CancelFilter {
        pair: Some(pair()),
        ..Default::default()
    });
    assert_eq!(report.cancelled, 2);
    assert_eq!(report.failed, 0);

    let active = h.cache.active_orders();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].pair, eth);
}

#[test]
fn test_overfill_clamped_and_counted() {
    let h = harness(RiskConfig::default(), ExecutionConfig::default());
    let cloid = h
        .engine
        .submit(OrderRequest::limit(pair(), Side::Buy, dec!(0.5), dec!(50_000)))
        .unwrap();

    h.engine.on_fill(&Fill {
        client_order_id: cloid.clone(),
        pair: pair(),
        side: Side::Buy,
        qty: dec!(0.9), // venue bug: more than the order size
        price: dec!(50_000),
        fee: Decimal::ZERO,
        ts: Timestamp::now(),
    });

    let order = h.cache.order(&cloid).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_qty, dec!(0.5));
    order.check_invariants().unwrap();
    assert_eq!(
        h.engine
            .stats()
            .overfills
            .load(std::sync::atomic::Ordering::Relaxed),
        1
    );
}
