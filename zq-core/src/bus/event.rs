//! Event payloads carried by the message bus
//!
//! One closed enum instead of type-erased payloads: every producer and
//! consumer in the runtime speaks [`Event`], so handlers match on variants
//! without downcasting. External transports (the API facade) wrap these in
//! their own envelope; that surface lives outside this crate.

use crate::core::errors::RiskError;
use crate::core::time::Timestamp;
use crate::core::types::{
    Balance, Candle, CancelFilter, Fill, MarketTrade, Order, OrderChanges, OrderId, OrderRequest,
    OrderStatus, Position, Quote,
};
use rust_decimal::Decimal;

/// Exchange-reported change to one order, keyed by client order id.
///
/// Both the synchronous submit ack and the streaming order-update path
/// reduce to this shape, which is what makes reconciliation idempotent.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub client_order_id: OrderId,
    pub exchange_order_id: Option<String>,
    pub status: OrderStatus,
    pub filled_qty: Option<Decimal>,
    pub avg_fill_price: Option<Decimal>,
    pub ts: Timestamp,
}

/// Point-in-time risk metrics published on `system.metrics.update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsUpdate {
    pub equity: Option<f64>,
    pub var: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub sharpe: Option<f64>,
    pub sortino: Option<f64>,
    pub ts: Timestamp,
}

/// Everything that can travel over the bus.
#[derive(Debug, Clone)]
pub enum Event {
    // Market data (published by the data engine on `market_data.*`).
    Quote(Quote),
    Candle(Candle),
    Trade(MarketTrade),

    // Cache change notifications (`cache.<kind>.<key>`), previous and new.
    CacheQuote {
        prev: Option<Quote>,
        new: Quote,
    },
    CacheCandle {
        prev: Option<Candle>,
        new: Candle,
    },
    CacheOrder {
        prev: Option<Box<Order>>,
        new: Box<Order>,
    },
    CachePosition {
        prev: Option<Position>,
        new: Position,
    },
    CacheBalance {
        prev: Option<Balance>,
        new: Balance,
    },

    // Order lifecycle (`order.*`) and adapter stream items (`adapter.*`).
    Order(Box<Order>),
    OrderUpdate(OrderUpdate),
    Fill(Fill),
    PositionUpdate(Position),
    BalanceUpdate(Balance),

    // Risk and system events.
    RiskRejection {
        client_order_id: OrderId,
        error: RiskError,
    },
    KillSwitch {
        active: bool,
        reason: String,
    },
    ProviderStatus {
        provider: String,
        connected: bool,
    },
    ComponentCrashed {
        component: String,
        message: String,
    },
    Tick {
        seq: u64,
        at: Timestamp,
    },
    Metrics(MetricsUpdate),

    // Command payloads for `request` round trips.
    SubmitRequest(OrderRequest),
    CancelRequest {
        client_order_id: OrderId,
    },
    ModifyRequest {
        client_order_id: OrderId,
        changes: OrderChanges,
    },
    CancelAllRequest(CancelFilter),
    CancelAllReport {
        cancelled: u32,
        failed: u32,
    },
    GetOrderRequest {
        client_order_id: OrderId,
    },
    KillSwitchReset {
        token: String,
    },
    KillSwitchActivate {
        reason: String,
    },
    OrderIdAck(OrderId),
    Ack,
}

impl Event {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Quote(_) => "quote",
            Event::Candle(_) => "candle",
            Event::Trade(_) => "trade",
            Event::CacheQuote { .. } => "cache_quote",
            Event::CacheCandle { .. } => "cache_candle",
            Event::CacheOrder { .. } => "cache_order",
            Event::CachePosition { .. } => "cache_position",
            Event::CacheBalance { .. } => "cache_balance",
            Event::Order(_) => "order",
            Event::OrderUpdate(_) => "order_update",
            Event::Fill(_) => "fill",
            Event::PositionUpdate(_) => "position_update",
            Event::BalanceUpdate(_) => "balance_update",
            Event::RiskRejection { .. } => "risk_rejection",
            Event::KillSwitch { .. } => "kill_switch",
            Event::ProviderStatus { .. } => "provider_status",
            Event::ComponentCrashed { .. } => "component_crashed",
            Event::Tick { .. } => "tick",
            Event::Metrics(_) => "metrics",
            Event::SubmitRequest(_) => "submit_request",
            Event::CancelRequest { .. } => "cancel_request",
            Event::ModifyRequest { .. } => "modify_request",
            Event::CancelAllRequest(_) => "cancel_all_request",
            Event::CancelAllReport { .. } => "cancel_all_report",
            Event::GetOrderRequest { .. } => "get_order_request",
            Event::KillSwitchReset { .. } => "kill_switch_reset",
            Event::KillSwitchActivate { .. } => "kill_switch_activate",
            Event::OrderIdAck(_) => "order_id_ack",
            Event::Ack => "ack",
        }
    }
}
