//! Equity-stream risk metrics and performance summaries.

pub mod performance;
pub mod risk_metrics;

pub use performance::{ClosedTrade, PerformanceAnalyzer, PerformanceReport};
pub use risk_metrics::{DrawdownReport, EquityPoint, RiskMetrics, RiskMetricsConfig};
