//! Scriptable venue mocks
//!
//! [`MockExecutionClient`] replays a scripted sequence of submit outcomes
//! (ack / timeout / reject) and records every call, which is what the
//! retry and reconciliation tests assert against. [`MockDataProvider`]
//! exposes the sink it was connected with so tests can push quotes.

use crate::adapter::{Capabilities, DataProvider, ExchangeAck, ExecutionClient};
use crate::core::errors::{AdapterError, NetworkError, Result, ZqError};
use crate::core::types::{
    Balance, Order, OrderChanges, OrderId, OrderStatus, Position, TimeInForce, Timeframe,
    TradingPair,
};
use crate::data::MarketSink;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// One scripted response to `submit`.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Acknowledge with this status.
    Ack(OrderStatus),
    /// Fail with a retryable network timeout.
    Timeout,
    /// Fail terminally.
    Reject(String),
}

#[derive(Default)]
pub struct MockExecutionClient {
    script: Mutex<VecDeque<SubmitOutcome>>,
    pub submits: Mutex<Vec<Order>>,
    pub cancels: Mutex<Vec<OrderId>>,
    pub open_orders: Mutex<Vec<Order>>,
    pub positions: Mutex<Vec<Position>>,
    pub balances: Mutex<Vec<Balance>>,
    next_oid: AtomicU64,
}

impl MockExecutionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue submit outcomes; once exhausted, submits ack as `Open`.
    pub fn script(&self, outcomes: impl IntoIterator<Item = SubmitOutcome>) {
        self.script.lock().extend(outcomes);
    }

    pub fn submit_count(&self) -> usize {
        self.submits.lock().len()
    }
}

impl ExecutionClient for MockExecutionClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pairs: vec![],
            timeframes: Timeframe::ALL.to_vec(),
            streaming: true,
            lot_size: Decimal::new(1, 3),
            min_notional: Decimal::ZERO,
            supports_market_orders: true,
            supported_tifs: vec![TimeInForce::Gtc, TimeInForce::Ioc, TimeInForce::Alo],
        }
    }

    fn submit(&self, order: &Order) -> Result<ExchangeAck> {
        self.submits.lock().push(order.clone());
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(SubmitOutcome::Ack(OrderStatus::Open));
        match outcome {
            SubmitOutcome::Ack(status) => Ok(ExchangeAck {
                exchange_order_id: format!(
                    "mock-{}",
                    self.next_oid.fetch_add(1, Ordering::Relaxed)
                ),
                status,
            }),
            SubmitOutcome::Timeout => Err(ZqError::Network(NetworkError::Timeout(1_000))),
            SubmitOutcome::Reject(reason) => {
                Err(ZqError::Adapter(AdapterError::InvalidRequest(reason)))
            }
        }
    }

    fn cancel(&self, order: &Order) -> Result<()> {
        self.cancels.lock().push(order.client_order_id.clone());
        Ok(())
    }

    fn modify(&self, order: &Order, _changes: &OrderChanges) -> Result<ExchangeAck> {
        Ok(ExchangeAck {
            exchange_order_id: order
                .exchange_order_id
                .clone()
                .unwrap_or_else(|| "mock-mod".to_string()),
            status: OrderStatus::Open,
        })
    }

    fn fetch_open_orders(&self) -> Result<Vec<Order>> {
        Ok(self.open_orders.lock().clone())
    }

    fn fetch_positions(&self) -> Result<Vec<Position>> {
        Ok(self.positions.lock().clone())
    }

    fn fetch_balances(&self) -> Result<Vec<Balance>> {
        Ok(self.balances.lock().clone())
    }

    fn set_leverage(&self, _pair: &TradingPair, _leverage: u32) -> Result<()> {
        Ok(())
    }

    fn stream_order_updates(&self) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for MockExecutionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockExecutionClient")
            .field("submits", &self.submit_count())
            .finish()
    }
}

/// Data provider whose sink is exposed for direct pushes.
pub struct MockDataProvider {
    name: String,
    connected: AtomicBool,
    sink: Mutex<Option<MarketSink>>,
    pub subscriptions: Mutex<Vec<(TradingPair, Option<Timeframe>)>>,
    /// Remaining connect attempts that should fail.
    fail_connects: AtomicU64,
}

impl MockDataProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(false),
            sink: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            fail_connects: AtomicU64::new(0),
        }
    }

    pub fn fail_next_connects(&self, count: u64) {
        self.fail_connects.store(count, Ordering::Release);
    }

    pub fn sink(&self) -> Option<MarketSink> {
        self.sink.lock().clone()
    }

    /// Simulate the venue dropping the connection.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

impl DataProvider for MockDataProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pairs: vec![],
            timeframes: Timeframe::ALL.to_vec(),
            streaming: true,
            lot_size: Decimal::new(1, 3),
            min_notional: Decimal::ZERO,
            supports_market_orders: true,
            supported_tifs: vec![TimeInForce::Gtc, TimeInForce::Ioc],
        }
    }

    fn connect(&self, sink: MarketSink) -> Result<()> {
        let failures = self.fail_connects.load(Ordering::Acquire);
        if failures > 0 {
            self.fail_connects.store(failures - 1, Ordering::Release);
            return Err(ZqError::Network(NetworkError::ConnectionFailed(
                "scripted failure".into(),
            )));
        }
        *self.sink.lock() = Some(sink);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn subscribe(&self, pair: &TradingPair, timeframe: Option<Timeframe>) -> Result<()> {
        self.subscriptions.lock().push((pair.clone(), timeframe));
        Ok(())
    }

    fn unsubscribe(&self, pair: &TradingPair, timeframe: Option<Timeframe>) -> Result<()> {
        self.subscriptions
            .lock()
            .retain(|(p, t)| !(p == pair && *t == timeframe));
        Ok(())
    }
}

impl std::fmt::Debug for MockDataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDataProvider")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}
