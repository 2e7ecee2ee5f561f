//! Core primitives: decimals, timestamps, domain types, and the error
//! taxonomy shared by every subsystem.

pub mod decimal;
pub mod errors;
pub mod time;
pub mod types;

pub use errors::{
    AdapterError, BusinessError, DataError, NetworkError, Result, RiskError, SystemError, ZqError,
};
pub use time::Timestamp;
pub use types::{
    Balance, Candle, CancelFilter, Fill, MarketTrade, Order, OrderChanges, OrderId, OrderRequest,
    OrderStatus, OrderType, Position, Quote, Side, TimeInForce, Timeframe, TradingPair,
};
