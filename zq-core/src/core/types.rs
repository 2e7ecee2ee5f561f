//! Domain types shared across the runtime
//!
//! Orders, quotes, candles, balances and positions, together with the
//! invariants the rest of the system assumes:
//!
//! - `Order`: `qty == filled_qty + remaining_qty`, `remaining_qty >= 0`
//! - `Balance`: `total == available + locked`
//! - `Quote`: `0 < bid <= ask`
//! - `Candle`: `low <= open, close <= high`, `volume >= 0`
//!
//! Every `validate()` is called before a value enters the cache; a value
//! that fails validation never mutates state.

use crate::core::errors::{BusinessError, DataError, ZqError};
use crate::core::time::Timestamp;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

// ---------------------------------------------------------------------------
// Instruments
// ---------------------------------------------------------------------------

/// A traded pair, canonical form `BASE-QUOTE` (e.g. `BTC-USDC`).
///
/// Exchange-native symbol mapping lives in the adapter layer; the core only
/// ever sees canonical pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = ZqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self::new(base, quote))
            }
            _ => Err(ZqError::Data(DataError::InvalidFormat(format!(
                "trading pair must be BASE-QUOTE, got {s:?}"
            )))),
        }
    }
}

/// Candle timeframes with exact minute durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
    ];

    pub const fn minutes(&self) -> u64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1_440,
            Timeframe::W1 => 10_080,
        }
    }

    pub const fn duration_ns(&self) -> i64 {
        self.minutes() as i64 * 60 * 1_000_000_000
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ZqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            "1w" => Ok(Timeframe::W1),
            other => Err(ZqError::Data(DataError::InvalidFormat(format!(
                "unknown timeframe {other:?}"
            )))),
        }
    }
}

// ---------------------------------------------------------------------------
// Order enums
// ---------------------------------------------------------------------------

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub const fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Signed multiplier: +1 for buys, -1 for sells.
    pub const fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    StopMarket,
    StopLimit,
    Trigger,
}

impl OrderType {
    pub const fn is_stop_variant(&self) -> bool {
        matches!(
            self,
            OrderType::StopMarket | OrderType::StopLimit | OrderType::Trigger
        )
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::Limit => "limit",
            OrderType::Market => "market",
            OrderType::StopMarket => "stop_market",
            OrderType::StopLimit => "stop_limit",
            OrderType::Trigger => "trigger",
        };
        write!(f, "{s}")
    }
}

/// Time-in-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-til-cancelled.
    Gtc,
    /// Immediate-or-cancel.
    Ioc,
    /// Add-liquidity-only (post only).
    Alo,
    /// Fill-or-kill.
    Fok,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeInForce::Gtc => "gtc",
            TimeInForce::Ioc => "ioc",
            TimeInForce::Alo => "alo",
            TimeInForce::Fok => "fok",
        };
        write!(f, "{s}")
    }
}

/// Order lifecycle state.
///
/// `PartiallyFilled` exists because some venues report it explicitly on the
/// wire; internally a partial fill is `Open` with `filled_qty > 0` and the
/// execution engine normalises on ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Triggered,
    Expired,
    MarginCanceled,
}

impl OrderStatus {
    /// Terminal states admit no further transitions.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
                | OrderStatus::MarginCanceled
        )
    }

    /// Monotonic rank used to refuse regressing transitions
    /// (e.g. Filled back to Open).
    pub const fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Submitted => 1,
            OrderStatus::Open => 2,
            OrderStatus::Triggered => 2,
            OrderStatus::PartiallyFilled => 3,
            OrderStatus::Filled => 4,
            OrderStatus::Canceled => 4,
            OrderStatus::Rejected => 4,
            OrderStatus::Expired => 4,
            OrderStatus::MarginCanceled => 4,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Triggered => "triggered",
            OrderStatus::Expired => "expired",
            OrderStatus::MarginCanceled => "margin_canceled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Order identity
// ---------------------------------------------------------------------------

static ORDER_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Client order id, unique per process lifetime.
///
/// Layout of the underlying 128 bits: `[timestamp_ns:64][random:32][counter:32]`,
/// rendered as 32 hex characters. Attached to every adapter call so that
/// acks and stream updates reconcile idempotently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        use rand::Rng;
        let ts = Timestamp::now().as_ns() as u64;
        let random: u32 = rand::thread_rng().gen();
        let counter = ORDER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let raw = ((ts as u128) << 64) | ((random as u128) << 32) | counter as u128;
        Self(format!("{raw:032x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Order request and entity
// ---------------------------------------------------------------------------

/// What a strategy asks the execution engine to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub pair: TradingPair,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub tif: TimeInForce,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn limit(pair: TradingPair, side: Side, qty: Decimal, price: Decimal) -> Self {
        Self {
            pair,
            side,
            order_type: OrderType::Limit,
            qty,
            price: Some(price),
            stop_price: None,
            trigger_price: None,
            tif: TimeInForce::Gtc,
            reduce_only: false,
        }
    }

    pub fn market(pair: TradingPair, side: Side, qty: Decimal) -> Self {
        Self {
            pair,
            side,
            order_type: OrderType::Market,
            qty,
            price: None,
            stop_price: None,
            trigger_price: None,
            tif: TimeInForce::Ioc,
            reduce_only: false,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.tif = tif;
        self
    }

    /// Structural validation performed before any tracking or network call.
    pub fn validate(&self) -> Result<(), ZqError> {
        if self.qty <= Decimal::ZERO {
            return Err(ZqError::Business(BusinessError::InvalidQuantity(self.qty)));
        }
        match self.order_type {
            OrderType::Limit | OrderType::StopLimit => {
                if self.price.is_none() {
                    return Err(ZqError::Business(BusinessError::LimitOrderRequiresPrice));
                }
            }
            _ => {}
        }
        if self.order_type.is_stop_variant()
            && self.stop_price.is_none()
            && self.trigger_price.is_none()
        {
            return Err(ZqError::Data(DataError::MissingField(
                "stop_price or trigger_price".into(),
            )));
        }
        if let Some(price) = self.price {
            if price <= Decimal::ZERO {
                return Err(ZqError::Data(DataError::ValidationFailed(format!(
                    "price must be positive, got {price}"
                ))));
            }
        }
        Ok(())
    }
}

/// The authoritative order entity, owned by the execution engine while
/// pending and by the cache once the exchange has seen it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: OrderId,
    pub exchange_order_id: Option<String>,
    pub pair: TradingPair,
    pub side: Side,
    pub order_type: OrderType,
    pub tif: TimeInForce,
    pub qty: Decimal,
    pub filled_qty: Decimal,
    pub remaining_qty: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub reduce_only: bool,
    pub status: OrderStatus,
    pub avg_fill_price: Option<Decimal>,
    pub total_fee: Decimal,
    pub created_at: Timestamp,
    pub submitted_at: Option<Timestamp>,
    pub updated_at: Timestamp,
    pub filled_at: Option<Timestamp>,
    pub error: Option<String>,
}

impl Order {
    /// Create a pending order from a validated request.
    pub fn from_request(req: &OrderRequest, client_order_id: OrderId) -> Self {
        let now = Timestamp::now();
        Self {
            client_order_id,
            exchange_order_id: None,
            pair: req.pair.clone(),
            side: req.side,
            order_type: req.order_type,
            tif: req.tif,
            qty: req.qty,
            filled_qty: Decimal::ZERO,
            remaining_qty: req.qty,
            price: req.price,
            stop_price: req.stop_price,
            trigger_price: req.trigger_price,
            reduce_only: req.reduce_only,
            status: OrderStatus::Pending,
            avg_fill_price: None,
            total_fee: Decimal::ZERO,
            created_at: now,
            submitted_at: None,
            updated_at: now,
            filled_at: None,
            error: None,
        }
    }

    /// `qty == filled + remaining` with `remaining >= 0`.
    pub fn check_invariants(&self) -> Result<(), ZqError> {
        if self.remaining_qty < Decimal::ZERO {
            return Err(ZqError::Data(DataError::ValidationFailed(format!(
                "order {}: negative remaining_qty {}",
                self.client_order_id, self.remaining_qty
            ))));
        }
        if self.filled_qty + self.remaining_qty != self.qty {
            return Err(ZqError::Data(DataError::ValidationFailed(format!(
                "order {}: qty {} != filled {} + remaining {}",
                self.client_order_id, self.qty, self.filled_qty, self.remaining_qty
            ))));
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Partial fill in the canonical representation: open with progress.
    pub fn is_partially_filled(&self) -> bool {
        matches!(self.status, OrderStatus::Open | OrderStatus::PartiallyFilled)
            && self.filled_qty > Decimal::ZERO
            && self.remaining_qty > Decimal::ZERO
    }

    /// Apply one fill, clamping overfills and recomputing the weighted
    /// average fill price. Returns the quantity actually booked.
    pub fn apply_fill(&mut self, qty: Decimal, price: Decimal, fee: Decimal) -> Decimal {
        let booked = qty.min(self.remaining_qty);
        if booked < qty {
            tracing::warn!(
                order = %self.client_order_id,
                fill = %qty,
                booked = %booked,
                "overfill clamped to order quantity"
            );
        }
        if booked <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let prev_notional = self.avg_fill_price.unwrap_or(Decimal::ZERO) * self.filled_qty;
        self.filled_qty += booked;
        self.remaining_qty = self.qty - self.filled_qty;
        self.total_fee += fee;
        self.avg_fill_price = (prev_notional + price * booked).checked_div(self.filled_qty);

        let now = Timestamp::now();
        self.updated_at = now;
        if self.remaining_qty == Decimal::ZERO {
            self.status = OrderStatus::Filled;
            self.filled_at = Some(now);
        } else {
            self.status = OrderStatus::Open;
        }
        booked
    }
}

/// Requested amendments to a resting order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderChanges {
    pub price: Option<Decimal>,
    pub qty: Option<Decimal>,
    pub tif: Option<TimeInForce>,
}

/// Filter for bulk cancellation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelFilter {
    pub pair: Option<TradingPair>,
    pub side: Option<Side>,
    pub status: Option<OrderStatus>,
}

impl CancelFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.pair.as_ref().map_or(true, |p| *p == order.pair)
            && self.side.map_or(true, |s| s == order.side)
            && self.status.map_or(true, |s| s == order.status)
    }
}

/// One execution against an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub client_order_id: OrderId,
    pub pair: TradingPair,
    pub side: Side,
    pub qty: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub ts: Timestamp,
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Top-of-book snapshot; treated as immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub pair: TradingPair,
    pub bid: Decimal,
    pub ask: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub ts: Timestamp,
}

impl Quote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    pub fn validate(&self) -> Result<(), ZqError> {
        if self.bid <= Decimal::ZERO || self.ask <= Decimal::ZERO {
            return Err(ZqError::Data(DataError::ValidationFailed(format!(
                "{}: quote prices must be positive (bid {}, ask {})",
                self.pair, self.bid, self.ask
            ))));
        }
        if self.bid > self.ask {
            return Err(ZqError::Data(DataError::ValidationFailed(format!(
                "{}: crossed quote (bid {} > ask {})",
                self.pair, self.bid, self.ask
            ))));
        }
        Ok(())
    }
}

/// An OHLCV bar aligned to its timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub pair: TradingPair,
    pub timeframe: Timeframe,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub open_ts: Timestamp,
}

impl Candle {
    pub fn validate(&self) -> Result<(), ZqError> {
        let ok = self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.low > Decimal::ZERO;
        if !ok {
            return Err(ZqError::Data(DataError::ValidationFailed(format!(
                "{} {}: OHLC invariant violated (o {} h {} l {} c {})",
                self.pair, self.timeframe, self.open, self.high, self.low, self.close
            ))));
        }
        if self.volume < Decimal::ZERO {
            return Err(ZqError::Data(DataError::ValidationFailed(format!(
                "{} {}: negative volume {}",
                self.pair, self.timeframe, self.volume
            ))));
        }
        if self.open_ts.as_ns() % self.timeframe.duration_ns() != 0 {
            return Err(ZqError::Data(DataError::ValidationFailed(format!(
                "{} {}: open timestamp {} not aligned to timeframe",
                self.pair,
                self.timeframe,
                self.open_ts.as_ns()
            ))));
        }
        Ok(())
    }

    /// Close-of-bar timestamp.
    pub fn close_ts(&self) -> Timestamp {
        self.open_ts.offset_ns(self.timeframe.duration_ns())
    }
}

/// A public trade print used by the queue model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTrade {
    pub pair: TradingPair,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub ts: Timestamp,
}

// ---------------------------------------------------------------------------
// Account state
// ---------------------------------------------------------------------------

/// Asset balance; `total == available + locked` is re-validated on every
/// cache write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub total: Decimal,
    pub available: Decimal,
    pub locked: Decimal,
    pub ts: Timestamp,
}

impl Balance {
    pub fn validate(&self) -> Result<(), ZqError> {
        if self.total != self.available + self.locked {
            return Err(ZqError::Data(DataError::ValidationFailed(format!(
                "{}: total {} != available {} + locked {}",
                self.asset, self.total, self.available, self.locked
            ))));
        }
        if self.available < Decimal::ZERO || self.locked < Decimal::ZERO {
            return Err(ZqError::Data(DataError::ValidationFailed(format!(
                "{}: negative balance component",
                self.asset
            ))));
        }
        Ok(())
    }
}

/// An open position as reported by the exchange or the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub pair: TradingPair,
    pub side: Side,
    /// Absolute position size, always positive.
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Option<Decimal>,
    pub liquidation_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub leverage: Decimal,
    pub margin_used: Decimal,
    pub opened_at: Timestamp,
}

impl Position {
    pub fn validate(&self) -> Result<(), ZqError> {
        if self.size <= Decimal::ZERO {
            return Err(ZqError::Data(DataError::ValidationFailed(format!(
                "{}: position size must be positive, got {}",
                self.pair, self.size
            ))));
        }
        Ok(())
    }

    /// Signed size: positive long, negative short.
    pub fn signed_size(&self) -> Decimal {
        match self.side {
            Side::Buy => self.size,
            Side::Sell => -self.size,
        }
    }

    /// Notional exposure at the mark (or entry when no mark is known).
    pub fn notional(&self) -> Decimal {
        self.size * self.mark_price.unwrap_or(self.entry_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair() -> TradingPair {
        TradingPair::new("BTC", "USDC")
    }

    #[test]
    fn test_pair_round_trip() {
        let p: TradingPair = "BTC-USDC".parse().unwrap();
        assert_eq!(p, pair());
        assert_eq!(p.to_string(), "BTC-USDC");
        assert!("BTCUSDC".parse::<TradingPair>().is_err());
        assert!("-USDC".parse::<TradingPair>().is_err());
    }

    #[test]
    fn test_timeframe_durations() {
        assert_eq!(Timeframe::M1.minutes(), 1);
        assert_eq!(Timeframe::H4.minutes(), 240);
        assert_eq!(Timeframe::W1.minutes(), 10_080);
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert!("2h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_order_id_unique() {
        let a = OrderId::generate();
        let b = OrderId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_request_validation() {
        let ok = OrderRequest::limit(pair(), Side::Buy, dec!(0.1), dec!(50000));
        assert!(ok.validate().is_ok());

        let zero = OrderRequest::market(pair(), Side::Buy, Decimal::ZERO);
        assert!(matches!(
            zero.validate(),
            Err(ZqError::Business(BusinessError::InvalidQuantity(_)))
        ));

        let mut no_price = OrderRequest::limit(pair(), Side::Buy, dec!(0.1), dec!(50000));
        no_price.price = None;
        assert!(matches!(
            no_price.validate(),
            Err(ZqError::Business(BusinessError::LimitOrderRequiresPrice))
        ));
    }

    #[test]
    fn test_fill_accounting() {
        let req = OrderRequest::limit(pair(), Side::Buy, dec!(1.0), dec!(50000));
        let mut order = Order::from_request(&req, OrderId::generate());

        order.apply_fill(dec!(0.4), dec!(50000), dec!(1));
        assert_eq!(order.status, OrderStatus::Open);
        assert!(order.is_partially_filled());
        assert_eq!(order.filled_qty, dec!(0.4));
        assert_eq!(order.avg_fill_price, Some(dec!(50000)));
        order.check_invariants().unwrap();

        order.apply_fill(dec!(0.6), dec!(50100), dec!(1.5));
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.remaining_qty, Decimal::ZERO);
        assert_eq!(order.total_fee, dec!(2.5));
        // weighted average: (0.4 * 50000 + 0.6 * 50100) / 1.0
        assert_eq!(order.avg_fill_price, Some(dec!(50060)));
        order.check_invariants().unwrap();
    }

    #[test]
    fn test_overfill_clamped() {
        let req = OrderRequest::limit(pair(), Side::Buy, dec!(0.5), dec!(100));
        let mut order = Order::from_request(&req, OrderId::generate());

        let booked = order.apply_fill(dec!(0.9), dec!(100), Decimal::ZERO);
        assert_eq!(booked, dec!(0.5));
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_qty, dec!(0.5));
        order.check_invariants().unwrap();
    }

    #[test]
    fn test_status_terminality_and_rank() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::MarginCanceled.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(OrderStatus::Filled.rank() > OrderStatus::Open.rank());
        assert!(OrderStatus::Open.rank() > OrderStatus::Pending.rank());
    }

    #[test]
    fn test_quote_validation() {
        let ts = Timestamp::now();
        let good = Quote {
            pair: pair(),
            bid: dec!(49999),
            ask: dec!(50001),
            bid_size: dec!(1),
            ask_size: dec!(2),
            ts,
        };
        good.validate().unwrap();
        assert_eq!(good.mid(), dec!(50000));
        assert_eq!(good.spread(), dec!(2));

        let crossed = Quote {
            bid: dec!(50002),
            ..good.clone()
        };
        assert!(crossed.validate().is_err());

        let negative = Quote {
            bid: dec!(-1),
            ..good
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_candle_validation() {
        let candle = Candle {
            pair: pair(),
            timeframe: Timeframe::M1,
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close: dec!(105),
            volume: dec!(12.5),
            open_ts: Timestamp::from_ns(Timeframe::M1.duration_ns() * 1_000),
        };
        candle.validate().unwrap();

        let bad_high = Candle {
            high: dec!(99),
            ..candle.clone()
        };
        assert!(bad_high.validate().is_err());

        let misaligned = Candle {
            open_ts: Timestamp::from_ns(123),
            ..candle
        };
        assert!(misaligned.validate().is_err());
    }

    #[test]
    fn test_balance_invariant() {
        let ok = Balance {
            asset: "USDC".into(),
            total: dec!(1000),
            available: dec!(700),
            locked: dec!(300),
            ts: Timestamp::now(),
        };
        ok.validate().unwrap();

        let broken = Balance {
            locked: dec!(200),
            ..ok
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_cancel_filter() {
        let req = OrderRequest::limit(pair(), Side::Buy, dec!(1), dec!(100));
        let order = Order::from_request(&req, OrderId::generate());

        assert!(CancelFilter::default().matches(&order));
        assert!(CancelFilter {
            pair: Some(pair()),
            side: Some(Side::Buy),
            ..Default::default()
        }
        .matches(&order));
        assert!(!CancelFilter {
            side: Some(Side::Sell),
            ..Default::default()
        }
        .matches(&order));
    }
}
