//! Strategy interface
//!
//! Strategies are driven by the engines, never the other way round: the
//! live engine feeds them bus events (or clock ticks), the backtester
//! feeds them replayed history through the same trait. All order flow
//! goes through the [`StrategyContext`], which wraps the execution engine
//! and a read-only view of the cache.

use crate::cache::Cache;
use crate::core::errors::Result;
use crate::core::types::{
    Candle, Order, OrderId, OrderRequest, Position, Quote, Timeframe, TradingPair,
};
use crate::core::Timestamp;
use crate::execution::ExecutionEngine;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Execution and state access handed to strategy callbacks.
pub struct StrategyContext {
    cache: Arc<Cache>,
    execution: Arc<ExecutionEngine>,
    /// Event time: wall clock live, simulated in backtests.
    pub now: Timestamp,
}

impl StrategyContext {
    pub fn new(cache: Arc<Cache>, execution: Arc<ExecutionEngine>, now: Timestamp) -> Self {
        Self {
            cache,
            execution,
            now,
        }
    }

    pub fn submit(&self, request: OrderRequest) -> Result<OrderId> {
        self.execution.submit(request)
    }

    pub fn cancel(&self, client_order_id: &OrderId) -> Result<()> {
        self.execution.cancel(client_order_id)
    }

    pub fn quote(&self, pair: &TradingPair) -> Option<Quote> {
        self.cache.quote(pair)
    }

    pub fn candles(&self, pair: &TradingPair, timeframe: Timeframe) -> Vec<Candle> {
        self.cache.candles(pair, timeframe)
    }

    pub fn position(&self, pair: &TradingPair) -> Option<Position> {
        self.cache.position(pair)
    }

    pub fn active_orders(&self, pair: &TradingPair) -> Vec<Order> {
        self.cache.active_orders_for(pair)
    }
}

/// A trading strategy. Callbacks default to no-ops so implementations
/// only override what they react to.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn on_quote(&mut self, _ctx: &StrategyContext, _quote: &Quote) {}

    fn on_candle(&mut self, _ctx: &StrategyContext, _candle: &Candle) {}

    /// Clock tick (tick-driven deployments only).
    fn on_tick(&mut self, _ctx: &StrategyContext) {}

    fn on_order(&mut self, _ctx: &StrategyContext, _order: &Order) {}
}

/// Reference strategy: go long when the close breaks above `upper`, flat
/// when it falls below `lower`. Small enough to reason about by hand,
/// which is exactly what the backtester parity checks need.
#[derive(Debug)]
pub struct ThresholdStrategy {
    pub pair: TradingPair,
    pub upper: Decimal,
    pub lower: Decimal,
    pub qty: Decimal,
    long: bool,
}

impl ThresholdStrategy {
    pub fn new(pair: TradingPair, upper: Decimal, lower: Decimal, qty: Decimal) -> Self {
        Self {
            pair,
            upper,
            lower,
            qty,
            long: false,
        }
    }
}

impl Strategy for ThresholdStrategy {
    fn name(&self) -> &str {
        "threshold"
    }

    fn on_quote(&mut self, ctx: &StrategyContext, quote: &Quote) {
        if quote.pair != self.pair {
            return;
        }
        let mid = quote.mid();
        if !self.long && mid > self.upper {
            if ctx
                .submit(OrderRequest::market(
                    self.pair.clone(),
                    crate::core::types::Side::Buy,
                    self.qty,
                ))
                .is_ok()
            {
                self.long = true;
            }
        } else if self.long && mid < self.lower {
            if ctx
                .submit(
                    OrderRequest::market(
                        self.pair.clone(),
                        crate::core::types::Side::Sell,
                        self.qty,
                    )
                    .reduce_only(),
                )
                .is_ok()
            {
                self.long = false;
            }
        }
    }
}
