//! Error taxonomy for the trading runtime
//!
//! Every error returned by the framework falls into one of six kinds:
//! network, adapter, data, business, risk, or system. Risk rejections carry
//! structured detail (limit / actual / required / available) so alerting and
//! tests can inspect them without parsing messages.

use rust_decimal::Decimal;
use thiserror::Error;

/// Transport-level failures talking to an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("request timed out after {0}ms")]
    Timeout(u64),
    #[error("DNS resolution failed for {0}")]
    DnsResolutionFailed(String),
    #[error("SSL error: {0}")]
    SslError(String),
}

/// Failures reported by (or about) an exchange adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("exchange server error: {0}")]
    ServerError(String),
    #[error("time-in-force {0} not supported by this venue")]
    UnsupportedTimeInForce(String),
    #[error("order type {0} not supported by this venue")]
    UnsupportedOrderType(String),
    #[error("adapter is disconnected")]
    Disconnected,
}

/// Malformed or invalid incoming data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

/// Domain-rule violations raised by the core itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusinessError {
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },
    #[error("order {0} not found")]
    OrderNotFound(String),
    #[error("order {id} is {status}; operation not allowed")]
    InvalidOrderStatus { id: String, status: String },
    #[error("no position for {0}")]
    PositionNotFound(String),
    #[error("invalid quantity: {0}")]
    InvalidQuantity(Decimal),
    #[error("limit order requires a price")]
    LimitOrderRequiresPrice,
    #[error("market is closed")]
    MarketClosed,
    #[error("division by zero")]
    DivisionByZero,
}

/// Pre-trade rejections from the risk engine.
///
/// Each variant carries the limit that was checked and the value that
/// violated it, suitable for structured alerts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    #[error("order notional {actual} exceeds limit {limit}")]
    PositionSizeExceeded { limit: Decimal, actual: Decimal },
    #[error("projected leverage {actual} exceeds limit {limit}")]
    LeverageExceeded { limit: Decimal, actual: Decimal },
    #[error("daily loss {actual} breaches limit {limit}")]
    DailyLossExceeded { limit: Decimal, actual: Decimal },
    #[error("order rate limit exhausted ({limit} orders/min)")]
    OrderRateExceeded { limit: u32 },
    #[error("insufficient margin: required {required}, available {available}")]
    InsufficientMargin {
        required: Decimal,
        available: Decimal,
    },
    #[error("kill switch is active")]
    KillSwitchActive,
}

impl RiskError {
    /// Stable code string for alerting and per-reason counters.
    pub fn code(&self) -> &'static str {
        match self {
            RiskError::PositionSizeExceeded { .. } => "position_size_exceeded",
            RiskError::LeverageExceeded { .. } => "leverage_exceeded",
            RiskError::DailyLossExceeded { .. } => "daily_loss_exceeded",
            RiskError::OrderRateExceeded { .. } => "order_rate_exceeded",
            RiskError::InsufficientMargin { .. } => "insufficient_margin",
            RiskError::KillSwitchActive => "kill_switch_active",
        }
    }
}

/// Process-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SystemError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

/// Top-level error type unifying the taxonomy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ZqError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Business(#[from] BusinessError),
    #[error(transparent)]
    Risk(#[from] RiskError),
    #[error(transparent)]
    System(#[from] SystemError),
    #[error("bus: no handler registered for {0}")]
    NoHandler(String),
    #[error("bus: handler for {0} already registered")]
    AlreadyRegistered(String),
    #[error("bus: request on {topic} timed out after {timeout_ms}ms")]
    RequestTimeout { topic: String, timeout_ms: u64 },
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the library crate.
pub type Result<T> = std::result::Result<T, ZqError>;

impl ZqError {
    /// Whether the execution engine should retry the failed adapter call.
    ///
    /// Only transient network failures and exchange rate limiting qualify;
    /// everything else propagates immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ZqError::Network(NetworkError::Timeout(_))
                | ZqError::Network(NetworkError::ConnectionFailed(_))
                | ZqError::Adapter(AdapterError::RateLimitExceeded)
        )
    }

    /// Stable code string accompanying user-visible failures.
    pub fn code(&self) -> &'static str {
        match self {
            ZqError::Network(NetworkError::ConnectionFailed(_)) => "connection_failed",
            ZqError::Network(NetworkError::Timeout(_)) => "timeout",
            ZqError::Network(NetworkError::DnsResolutionFailed(_)) => "dns_resolution_failed",
            ZqError::Network(NetworkError::SslError(_)) => "ssl_error",
            ZqError::Adapter(AdapterError::Unauthorized(_)) => "unauthorized",
            ZqError::Adapter(AdapterError::RateLimitExceeded) => "rate_limit_exceeded",
            ZqError::Adapter(AdapterError::InvalidRequest(_)) => "invalid_request",
            ZqError::Adapter(AdapterError::ServerError(_)) => "server_error",
            ZqError::Adapter(AdapterError::UnsupportedTimeInForce(_)) => {
                "unsupported_time_in_force"
            }
            ZqError::Adapter(AdapterError::UnsupportedOrderType(_)) => "unsupported_order_type",
            ZqError::Adapter(AdapterError::Disconnected) => "disconnected",
            ZqError::Data(DataError::InvalidFormat(_)) => "invalid_format",
            ZqError::Data(DataError::ValidationFailed(_)) => "validation_failed",
            ZqError::Data(DataError::MissingField(_)) => "missing_field",
            ZqError::Data(DataError::ChecksumMismatch) => "checksum_mismatch",
            ZqError::Business(BusinessError::InsufficientBalance { .. }) => "insufficient_balance",
            ZqError::Business(BusinessError::OrderNotFound(_)) => "order_not_found",
            ZqError::Business(BusinessError::InvalidOrderStatus { .. }) => "invalid_order_status",
            ZqError::Business(BusinessError::PositionNotFound(_)) => "position_not_found",
            ZqError::Business(BusinessError::InvalidQuantity(_)) => "invalid_quantity",
            ZqError::Business(BusinessError::LimitOrderRequiresPrice) => {
                "limit_order_requires_price"
            }
            ZqError::Business(BusinessError::MarketClosed) => "market_closed",
            ZqError::Business(BusinessError::DivisionByZero) => "division_by_zero",
            ZqError::Risk(e) => e.code(),
            ZqError::System(SystemError::OutOfMemory) => "out_of_memory",
            ZqError::System(SystemError::FileNotFound(_)) => "file_not_found",
            ZqError::System(SystemError::PermissionDenied(_)) => "permission_denied",
            ZqError::System(SystemError::ResourceExhausted(_)) => "resource_exhausted",
            ZqError::NoHandler(_) => "no_handler",
            ZqError::AlreadyRegistered(_) => "already_registered",
            ZqError::RequestTimeout { .. } => "request_timeout",
            ZqError::Other(_) => "other",
        }
    }
}

impl From<std::io::Error> for ZqError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => {
                ZqError::System(SystemError::FileNotFound(err.to_string()))
            }
            std::io::ErrorKind::PermissionDenied => {
                ZqError::System(SystemError::PermissionDenied(err.to_string()))
            }
            _ => ZqError::System(SystemError::ResourceExhausted(err.to_string())),
        }
    }
}
