//! zq - event-driven trading runtime for crypto derivatives
//!
//! The core that turns market data into orders while staying correct
//! under concurrency and failure: a wildcard message bus, a central
//! cache, a validating data engine, a pre-tracked execution engine, a
//! risk engine with a kill switch, stop/trailing-stop management,
//! checkpoint-based crash recovery, and an event-driven + vectorized
//! backtester with latency and queue-position simulation. Hyperliquid
//! perpetuals are the reference venue.
//!
//! ## Architecture
//!
//! ```text
//! DataProvider ──> DataEngine ──> Cache ──> subscribers (strategies,
//!      (WS)         validate      │  └─ market_data.* / cache.* events
//!                   backpressure  │
//!                                 v
//! Strategy ──> ExecutionEngine ──> RiskEngine ──> ExchangeAdapter
//!               pre-tracking        kill switch        (HTTP)
//!                    │                                   │
//!                    └──── order update stream <─────────┘
//!
//! RecoveryManager checkpoints Cache + pending orders alongside.
//! ```
//!
//! Threading: bounded crossbeam channels between subsystems, one worker
//! per bus subscription, parking_lot locks on shared maps, atomics for
//! the kill switch. Adapter I/O is confined to a tokio runtime owned by
//! the adapter.

pub mod adapter;
pub mod analytics;
pub mod backtest;
pub mod bus;
pub mod cache;
pub mod config;
pub mod core;
pub mod data;
pub mod engine;
pub mod execution;
pub mod recovery;
pub mod resilience;
pub mod risk;
pub mod strategy;
pub mod testing;
pub mod utils;

pub use crate::core::{Result, ZqError};

/// Convenient imports for binaries and strategy crates.
pub mod prelude {
    pub use crate::adapter::{DataProvider, ExecutionClient};
    pub use crate::backtest::{BacktestConfig, BacktestEngine, HistoricalData};
    pub use crate::bus::{Event, MessageBus};
    pub use crate::cache::{Cache, CacheConfig};
    pub use crate::config::Config;
    pub use crate::core::{
        Balance, Candle, Order, OrderId, OrderRequest, OrderStatus, OrderType, Position, Quote,
        Result, Side, TimeInForce, Timeframe, Timestamp, TradingPair, ZqError,
    };
    pub use crate::data::DataEngine;
    pub use crate::engine::{EngineConfig, EngineMode, LiveTradingEngine};
    pub use crate::execution::ExecutionEngine;
    pub use crate::risk::{RiskConfig, RiskEngine};
    pub use crate::strategy::{Strategy, StrategyContext};
}
