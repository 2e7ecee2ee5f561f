//! Central cache: the single source of truth for market and account state
//!
//! Keyed stores for quotes, candles, orders, positions and balances. Every
//! `update_*` validates the incoming value first; a failed validation
//! leaves the store untouched. Successful writes replace the prior value
//! and, when notifications are enabled, publish `cache.<kind>.<key>` with
//! both the previous and the new value.
//!
//! Concurrency: one `RwLock` per store, so writers serialise per store and
//! readers always observe a complete entity. Readers receive cloned
//! snapshots, never references into the store.

use crate::bus::{Event, MessageBus};
use crate::core::errors::{BusinessError, Result, ZqError};
use crate::core::types::{
    Balance, Candle, Order, OrderId, Position, Quote, Timeframe, TradingPair,
};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Default number of candles retained per (pair, timeframe).
pub const DEFAULT_CANDLE_CAPACITY: usize = 1_000;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Publish `cache.*` change events on every successful write.
    pub enable_notifications: bool,
    /// Ring capacity per (pair, timeframe); oldest candles are evicted.
    pub candle_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_notifications: true,
            candle_capacity: DEFAULT_CANDLE_CAPACITY,
        }
    }
}

/// Shared cache handle.
pub struct Cache {
    bus: MessageBus,
    config: CacheConfig,
    quotes: RwLock<HashMap<TradingPair, Quote>>,
    candles: RwLock<HashMap<(TradingPair, Timeframe), VecDeque<Candle>>>,
    orders: RwLock<HashMap<OrderId, Order>>,
    positions: RwLock<HashMap<TradingPair, Position>>,
    balances: RwLock<HashMap<String, Balance>>,
}

impl Cache {
    pub fn new(bus: MessageBus, config: CacheConfig) -> Self {
        Self {
            bus,
            config,
            quotes: RwLock::new(HashMap::new()),
            candles: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            balances: RwLock::new(HashMap::new()),
        }
    }

    fn notify(&self, topic: String, event: Event) {
        if self.config.enable_notifications {
            self.bus.publish(&topic, event);
        }
    }

    // -- quotes ------------------------------------------------------------

    /// Overwrite the quote for a pair.
    pub fn update_quote(&self, quote: Quote) -> Result<()> {
        quote.validate()?;
        let prev = {
            let mut quotes = self.quotes.write();
            quotes.insert(quote.pair.clone(), quote.clone())
        };
        self.notify(
            format!("cache.quotes.{}", quote.pair),
            Event::CacheQuote { prev, new: quote },
        );
        Ok(())
    }

    pub fn quote(&self, pair: &TradingPair) -> Option<Quote> {
        self.quotes.read().get(pair).cloned()
    }

    pub fn quotes(&self) -> Vec<Quote> {
        self.quotes.read().values().cloned().collect()
    }

    // -- candles -----------------------------------------------------------

    /// Append or replace a candle in the per-(pair, timeframe) ring.
    ///
    /// A candle with the same open timestamp as the newest entry replaces
    /// it (in-progress bar update); a strictly newer one is appended and
    /// the oldest entry evicted once the ring is full. Older timestamps
    /// are rejected.
    pub fn update_candle(&self, candle: Candle) -> Result<()> {
        candle.validate()?;
        let key = (candle.pair.clone(), candle.timeframe);
        let prev = {
            let mut stores = self.candles.write();
            let ring = stores.entry(key).or_default();
            match ring.back() {
                Some(last) if last.open_ts == candle.open_ts => {
                    let prev = ring.pop_back();
                    ring.push_back(candle.clone());
                    prev
                }
                Some(last) if last.open_ts > candle.open_ts => {
                    return Err(ZqError::Data(crate::core::errors::DataError::ValidationFailed(
                        format!(
                            "{} {}: candle open {} older than newest {}",
                            candle.pair,
                            candle.timeframe,
                            candle.open_ts.as_ns(),
                            last.open_ts.as_ns()
                        ),
                    )));
                }
                _ => {
                    ring.push_back(candle.clone());
                    if ring.len() > self.config.candle_capacity {
                        ring.pop_front();
                    }
                    None
                }
            }
        };
        self.notify(
            format!("cache.candles.{}.{}", candle.pair, candle.timeframe),
            Event::CacheCandle { prev, new: candle },
        );
        Ok(())
    }

    /// All retained candles for a (pair, timeframe), oldest first.
    pub fn candles(&self, pair: &TradingPair, timeframe: Timeframe) -> Vec<Candle> {
        self.candles
            .read()
            .get(&(pair.clone(), timeframe))
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest_candle(&self, pair: &TradingPair, timeframe: Timeframe) -> Option<Candle> {
        self.candles
            .read()
            .get(&(pair.clone(), timeframe))
            .and_then(|ring| ring.back().cloned())
    }

    // -- orders ------------------------------------------------------------

    /// Upsert an order snapshot.
    ///
    /// Commit-time transition guard: a terminal order never changes status
    /// again, and the status rank never regresses (no filled back to open).
    /// Replaying an update the store already reflects is a no-op.
    pub fn update_order(&self, order: Order) -> Result<()> {
        order.check_invariants()?;
        let prev = {
            let mut orders = self.orders.write();
            if let Some(existing) = orders.get(&order.client_order_id) {
                if existing == &order {
                    // Duplicate delivery; nothing to do.
                    return Ok(());
                }
                if existing.status.is_terminal() && order.status != existing.status {
                    return Err(ZqError::Business(BusinessError::InvalidOrderStatus {
                        id: order.client_order_id.to_string(),
                        status: existing.status.to_string(),
                    }));
                }
                if order.status.rank() < existing.status.rank() {
                    debug!(
                        order = %order.client_order_id,
                        from = %existing.status,
                        to = %order.status,
                        "ignoring regressing order update"
                    );
                    return Ok(());
                }
            }
            orders.insert(order.client_order_id.clone(), order.clone())
        };
        self.notify(
            format!("cache.orders.{}", order.client_order_id),
            Event::CacheOrder {
                prev: prev.map(Box::new),
                new: Box::new(order),
            },
        );
        Ok(())
    }

    pub fn order(&self, id: &OrderId) -> Option<Order> {
        self.orders.read().get(id).cloned()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.read().values().cloned().collect()
    }

    /// Orders not yet in a terminal state.
    pub fn active_orders(&self) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| o.is_active())
            .cloned()
            .collect()
    }

    pub fn active_orders_for(&self, pair: &TradingPair) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| o.is_active() && &o.pair == pair)
            .cloned()
            .collect()
    }

    /// Drop a terminal order from the store (post-checkpoint cleanup).
    pub fn remove_order(&self, id: &OrderId) -> Option<Order> {
        let mut orders = self.orders.write();
        match orders.get(id) {
            Some(order) if order.status.is_terminal() => orders.remove(id),
            _ => None,
        }
    }

    // -- positions ---------------------------------------------------------

    pub fn update_position(&self, position: Position) -> Result<()> {
        position.validate()?;
        let prev = {
            let mut positions = self.positions.write();
            positions.insert(position.pair.clone(), position.clone())
        };
        self.notify(
            format!("cache.positions.{}", position.pair),
            Event::CachePosition {
                prev,
                new: position,
            },
        );
        Ok(())
    }

    pub fn position(&self, pair: &TradingPair) -> Option<Position> {
        self.positions.read().get(pair).cloned()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    /// Remove a closed position.
    pub fn remove_position(&self, pair: &TradingPair) -> Option<Position> {
        self.positions.write().remove(pair)
    }

    // -- balances ----------------------------------------------------------

    pub fn update_balance(&self, balance: Balance) -> Result<()> {
        balance.validate()?;
        let prev = {
            let mut balances = self.balances.write();
            balances.insert(balance.asset.clone(), balance.clone())
        };
        self.notify(
            format!("cache.balances.{}", balance.asset),
            Event::CacheBalance { prev, new: balance },
        );
        Ok(())
    }

    pub fn balance(&self, asset: &str) -> Option<Balance> {
        self.balances.read().get(asset).cloned()
    }

    pub fn balances(&self) -> Vec<Balance> {
        self.balances.read().values().cloned().collect()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("quotes", &self.quotes.read().len())
            .field("orders", &self.orders.read().len())
            .field("positions", &self.positions.read().len())
            .field("balances", &self.balances.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{OrderRequest, OrderStatus, Side};
    use crate::core::Timestamp;
    use rust_decimal_macros::dec;

    fn pair() -> TradingPair {
        TradingPair::new("BTC", "USDC")
    }

    fn cache() -> Cache {
        Cache::new(
            MessageBus::new(),
            CacheConfig {
                enable_notifications: false,
                candle_capacity: 3,
            },
        )
    }

    fn quote(bid: rust_decimal::Decimal, ask: rust_decimal::Decimal) -> Quote {
        Quote {
            pair: pair(),
            bid,
            ask,
            bid_size: dec!(1),
            ask_size: dec!(1),
            ts: Timestamp::now(),
        }
    }

    fn candle(open_ts_bars: i64) -> Candle {
        Candle {
            pair: pair(),
            timeframe: Timeframe::M1,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(1),
            open_ts: Timestamp::from_ns(open_ts_bars * Timeframe::M1.duration_ns()),
        }
    }

    #[test]
    fn test_quote_overwrite_in_place() {
        let cache = cache();
        cache.update_quote(quote(dec!(100), dec!(101))).unwrap();
        cache.update_quote(quote(dec!(102), dec!(103))).unwrap();
        assert_eq!(cache.quote(&pair()).unwrap().bid, dec!(102));
        assert_eq!(cache.quotes().len(), 1);
    }

    #[test]
    fn test_failed_validation_preserves_pre_image() {
        let cache = cache();
        cache.update_quote(quote(dec!(100), dec!(101))).unwrap();

        let crossed = quote(dec!(105), dec!(104));
        assert!(cache.update_quote(crossed).is_err());
        assert_eq!(cache.quote(&pair()).unwrap().bid, dec!(100));
    }

    #[test]
    fn test_candle_ring_eviction() {
        let cache = cache();
        for i in 1..=5 {
            cache.update_candle(candle(i)).unwrap();
        }
        let candles = cache.candles(&pair(), Timeframe::M1);
        assert_eq!(candles.len(), 3, "capacity 3 evicts the oldest");
        assert_eq!(
            candles[0].open_ts.as_ns(),
            3 * Timeframe::M1.duration_ns()
        );
    }

    #[test]
    fn test_candle_same_bar_replaces() {
        let cache = cache();
        cache.update_candle(candle(1)).unwrap();
        let mut updated = candle(1);
        updated.close = dec!(100.9);
        cache.update_candle(updated).unwrap();

        let candles = cache.candles(&pair(), Timeframe::M1);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, dec!(100.9));
    }

    #[test]
    fn test_candle_older_rejected() {
        let cache = cache();
        cache.update_candle(candle(5)).unwrap();
        assert!(cache.update_candle(candle(4)).is_err());
        assert_eq!(cache.candles(&pair(), Timeframe::M1).len(), 1);
    }

    #[test]
    fn test_order_terminal_guard() {
        let cache = cache();
        let req = OrderRequest::limit(pair(), Side::Buy, dec!(1), dec!(100));
        let mut order = Order::from_request(&req, OrderId::generate());
        order.status = OrderStatus::Filled;
        order.filled_qty = order.qty;
        order.remaining_qty = rust_decimal::Decimal::ZERO;
        cache.update_order(order.clone()).unwrap();

        let mut reopened = order.clone();
        reopened.status = OrderStatus::Open;
        reopened.filled_qty = dec!(0.5);
        reopened.remaining_qty = dec!(0.5);
        assert!(cache.update_order(reopened).is_err());
        assert_eq!(
            cache.order(&order.client_order_id).unwrap().status,
            OrderStatus::Filled
        );
    }

    #[test]
    fn test_order_duplicate_update_is_noop() {
        let cache = cache();
        let req = OrderRequest::limit(pair(), Side::Buy, dec!(1), dec!(100));
        let order = Order::from_request(&req, OrderId::generate());
        cache.update_order(order.clone()).unwrap();
        cache.update_order(order.clone()).unwrap();
        assert_eq!(cache.orders().len(), 1);
    }

    #[test]
    fn test_remove_order_only_when_terminal() {
        let cache = cache();
        let req = OrderRequest::limit(pair(), Side::Buy, dec!(1), dec!(100));
        let order = Order::from_request(&req, OrderId::generate());
        cache.update_order(order.clone()).unwrap();

        assert!(cache.remove_order(&order.client_order_id).is_none());

        let mut done = order.clone();
        done.status = OrderStatus::Canceled;
        cache.update_order(done).unwrap();
        assert!(cache.remove_order(&order.client_order_id).is_some());
    }

    #[test]
    fn test_balance_invariant_enforced_on_write() {
        let cache = cache();
        let bad = Balance {
            asset: "USDC".into(),
            total: dec!(10),
            available: dec!(3),
            locked: dec!(3),
            ts: Timestamp::now(),
        };
        assert!(cache.update_balance(bad).is_err());
        assert!(cache.balance("USDC").is_none());
    }

    #[test]
    fn test_notifications_carry_prev_and_new() {
        let bus = MessageBus::new();
        let cache = Cache::new(bus.clone(), CacheConfig::default());
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = std::sync::Arc::clone(&seen);
        bus.subscribe(
            "cache.quotes.*",
            Box::new(move |_, event| {
                if let Event::CacheQuote { prev, new } = event {
                    s.lock().push((prev.clone(), new.clone()));
                }
                Ok(())
            }),
        );

        cache.update_quote(quote(dec!(100), dec!(101))).unwrap();
        cache.update_quote(quote(dec!(102), dec!(103))).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while seen.lock().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].0.is_none());
        assert_eq!(seen[1].0.as_ref().unwrap().bid, dec!(100));
        assert_eq!(seen[1].1.bid, dec!(102));
    }
}
