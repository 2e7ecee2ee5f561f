//! Exchange adapter capabilities
//!
//! Every venue exposes two capabilities: a [`DataProvider`] (market data
//! in) and an [`ExecutionClient`] (orders out, account state back). Both
//! are object-safe traits so the engines stay polymorphic over venues.
//!
//! Adapters never hold framework locks; everything they learn flows back
//! through the data engine's sink or as `adapter.*` bus publications.

pub mod hyperliquid;

use crate::core::errors::{AdapterError, Result, ZqError};
use crate::core::types::{
    Balance, Order, OrderChanges, OrderStatus, Position, TimeInForce, Timeframe, TradingPair,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// What a venue supports, queried once at registration.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub pairs: Vec<TradingPair>,
    pub timeframes: Vec<Timeframe>,
    /// Streams pushes (WebSocket) rather than polling.
    pub streaming: bool,
    /// Quantity increment; sizing output is floored to this.
    pub lot_size: Decimal,
    pub min_notional: Decimal,
    pub supports_market_orders: bool,
    pub supported_tifs: Vec<TimeInForce>,
}

impl Capabilities {
    pub fn supports_pair(&self, pair: &TradingPair) -> bool {
        self.pairs.is_empty() || self.pairs.contains(pair)
    }

    pub fn supports_tif(&self, tif: TimeInForce) -> bool {
        self.supported_tifs.contains(&tif)
    }
}

/// Synchronous result of a submit/modify call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeAck {
    pub exchange_order_id: String,
    pub status: OrderStatus,
}

/// Market data capability of a venue.
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Open the market data connection. The sink is where parsed quotes,
    /// candles and trades are pushed; it applies the engine's backpressure
    /// policy internally.
    fn connect(&self, sink: crate::data::MarketSink) -> Result<()>;

    fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Request a stream for a pair (and a candle timeframe, if any).
    fn subscribe(&self, pair: &TradingPair, timeframe: Option<Timeframe>) -> Result<()>;

    fn unsubscribe(&self, pair: &TradingPair, timeframe: Option<Timeframe>) -> Result<()>;
}

/// Trading capability of a venue.
pub trait ExecutionClient: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Submit an order; the client order id travels with the call so the
    /// ack and any stream update reconcile to the same order.
    fn submit(&self, order: &Order) -> Result<ExchangeAck>;

    fn cancel(&self, order: &Order) -> Result<()>;

    fn modify(&self, order: &Order, changes: &OrderChanges) -> Result<ExchangeAck>;

    fn fetch_open_orders(&self) -> Result<Vec<Order>>;

    fn fetch_positions(&self) -> Result<Vec<Position>>;

    fn fetch_balances(&self) -> Result<Vec<Balance>>;

    /// Set leverage for a pair. Must only return `Ok` on an explicit
    /// confirmation from the venue.
    fn set_leverage(&self, pair: &TradingPair, leverage: u32) -> Result<()>;

    /// Start streaming order updates, fills, positions and balances as
    /// `adapter.*` bus events. Idempotent.
    fn stream_order_updates(&self) -> Result<()>;
}

/// Canonical-to-native symbol translation, bijective per exchange.
pub trait SymbolMapper: Send + Sync {
    fn to_exchange(&self, pair: &TradingPair) -> Result<String>;
    fn from_exchange(&self, symbol: &str) -> Result<TradingPair>;
}

/// Commands queued while the venue connection is down.
///
/// Holds at most `limit` entries; pushes beyond that fail `Disconnected`
/// so callers learn the truth instead of queueing unbounded work.
#[derive(Debug)]
pub struct OutboundBuffer<T> {
    limit: usize,
    queue: Mutex<VecDeque<T>>,
}

impl<T> OutboundBuffer<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, item: T) -> Result<()> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.limit {
            return Err(ZqError::Adapter(AdapterError::Disconnected));
        }
        queue.push_back(item);
        Ok(())
    }

    /// Take everything buffered, FIFO, for replay after reconnect.
    pub fn drain(&self) -> Vec<T> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_buffer_bound() {
        let buffer = OutboundBuffer::new(2);
        buffer.push(1).unwrap();
        buffer.push(2).unwrap();
        assert!(matches!(
            buffer.push(3),
            Err(ZqError::Adapter(AdapterError::Disconnected))
        ));
        assert_eq!(buffer.drain(), vec![1, 2]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_capabilities_tif_check() {
        let caps = Capabilities {
            pairs: vec![],
            timeframes: vec![Timeframe::M1],
            streaming: true,
            lot_size: Decimal::new(1, 3),
            min_notional: Decimal::new(10, 0),
            supports_market_orders: false,
            supported_tifs: vec![TimeInForce::Gtc, TimeInForce::Ioc, TimeInForce::Alo],
        };
        assert!(caps.supports_tif(TimeInForce::Ioc));
        assert!(!caps.supports_tif(TimeInForce::Fok));
        assert!(caps.supports_pair(&TradingPair::new("ETH", "USDC")));
    }
}
