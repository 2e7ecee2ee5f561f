//! Runtime configuration
//!
//! One TOML file configures the whole runtime; every section has full
//! defaults so a partial (or absent) file is valid. Secrets never live
//! in the file: exchange credentials come from adapter-specific
//! environment variables, and `CHECKPOINT_DIR` / `KILL_SWITCH_RESET_TOKEN`
//! are environment-only as well.
//!
//! ```toml
//! [engine]
//! mode = "event"            # or "tick"
//! tick_interval_ms = 100
//!
//! [data]
//! pairs = ["BTC-USDC"]
//! candle_timeframe = "1m"
//!
//! [risk]
//! max_daily_loss = "5000"
//! orders_per_minute = 120
//! ```
//!
//! Decimals are written as strings to keep them exact.

use crate::backtest::{BacktestConfig, BarPath, QueueKernel};
use crate::cache::CacheConfig;
use crate::core::errors::{DataError, Result, ZqError};
use crate::core::types::{Timeframe, TradingPair};
use crate::data::DataEngineConfig;
use crate::engine::{EngineConfig, EngineMode};
use crate::execution::ExecutionConfig;
use crate::recovery::RecoveryConfig;
use crate::risk::RiskConfig;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logging: LoggingSection,
    pub engine: EngineSection,
    pub data: DataSection,
    pub cache: CacheSection,
    pub execution: ExecutionSection,
    pub risk: RiskSection,
    pub recovery: RecoverySection,
    pub backtest: BacktestSection,
    pub hyperliquid: HyperliquidSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub mode: String,
    pub tick_interval_ms: u64,
    pub cancel_orders_on_stop: bool,
    pub run_recovery: bool,
    pub metrics_interval_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            mode: "event".to_string(),
            tick_interval_ms: 100,
            cancel_orders_on_stop: true,
            run_recovery: true,
            metrics_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSection {
    pub pairs: Vec<String>,
    pub candle_timeframe: Option<String>,
    pub ingest_capacity: usize,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            pairs: vec!["BTC-USDC".to_string()],
            candle_timeframe: Some("1m".to_string()),
            ingest_capacity: crate::data::DEFAULT_INGEST_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    pub enable_notifications: bool,
    pub candle_capacity: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enable_notifications: true,
            candle_capacity: crate::cache::DEFAULT_CANDLE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionSection {
    pub max_retries: usize,
    pub retry_base_ms: u64,
    pub max_open_orders: usize,
    pub max_open_orders_per_pair: usize,
    pub journal_path: Option<String>,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        let defaults = ExecutionConfig::default();
        Self {
            max_retries: defaults.max_retries,
            retry_base_ms: defaults.retry_base.as_millis() as u64,
            max_open_orders: defaults.max_open_orders,
            max_open_orders_per_pair: defaults.max_open_orders_per_pair,
            journal_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskSection {
    pub equity_asset: String,
    pub max_order_notional: Decimal,
    pub max_position_size: Decimal,
    pub max_position_per_symbol: Decimal,
    pub max_leverage: Decimal,
    pub max_daily_loss: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub kill_switch_threshold: Decimal,
    pub orders_per_minute: u32,
    pub close_positions_on_kill: bool,
}

impl Default for RiskSection {
    fn default() -> Self {
        let defaults = RiskConfig::default();
        Self {
            equity_asset: defaults.equity_asset,
            max_order_notional: defaults.max_order_notional,
            max_position_size: defaults.max_position_size,
            max_position_per_symbol: defaults.max_position_per_symbol,
            max_leverage: defaults.max_leverage,
            max_daily_loss: defaults.max_daily_loss,
            max_daily_loss_pct: defaults.max_daily_loss_pct,
            kill_switch_threshold: defaults.kill_switch_threshold,
            orders_per_minute: defaults.orders_per_minute,
            close_positions_on_kill: defaults.close_positions_on_kill,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoverySection {
    /// Overridden by `CHECKPOINT_DIR` when set.
    pub dir: Option<String>,
    pub interval_secs: u64,
    pub checkpoint_on_terminal: bool,
    pub keep: usize,
    pub max_age_hours: u64,
    pub sync_with_exchange: bool,
    pub cancel_orphan_orders: bool,
    pub resubmit_stale: bool,
    pub max_reconcile_issues: u32,
}

impl Default for RecoverySection {
    fn default() -> Self {
        let defaults = RecoveryConfig::default();
        Self {
            dir: None,
            interval_secs: defaults.interval.as_secs(),
            checkpoint_on_terminal: defaults.checkpoint_on_terminal,
            keep: defaults.keep,
            max_age_hours: defaults.max_age_hours,
            sync_with_exchange: defaults.sync_with_exchange,
            cancel_orphan_orders: defaults.cancel_orphan_orders,
            resubmit_stale: defaults.resubmit_stale,
            max_reconcile_issues: defaults.max_reconcile_issues,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BacktestSection {
    pub initial_balance: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub slippage: Decimal,
    pub half_spread: Decimal,
    /// "auto" | "ohlc" | "olhc" | "close"
    pub bar_path: String,
    pub seed: u64,
    /// "fifo" | "uniform" | "exponential" | "power_law"
    pub queue_kernel: String,
    pub queue_decay: f64,
    pub queue_exponent: f64,
}

impl Default for BacktestSection {
    fn default() -> Self {
        let defaults = BacktestConfig::default();
        Self {
            initial_balance: defaults.initial_balance,
            maker_fee: defaults.maker_fee,
            taker_fee: defaults.taker_fee,
            slippage: defaults.slippage,
            half_spread: defaults.half_spread,
            bar_path: "auto".to_string(),
            seed: defaults.seed,
            queue_kernel: "fifo".to_string(),
            queue_decay: 0.9,
            queue_exponent: 1.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HyperliquidSection {
    pub api_url: String,
    pub ws_url: String,
    pub slippage_bound: Decimal,
    pub buffer_limit: usize,
    pub lot_size: Decimal,
}

impl Default for HyperliquidSection {
    fn default() -> Self {
        Self {
            api_url: "https://api.hyperliquid.xyz".to_string(),
            ws_url: "wss://api.hyperliquid.xyz/ws".to_string(),
            slippage_bound: Decimal::new(1, 2),
            buffer_limit: 16,
            lot_size: Decimal::new(1, 3),
        }
    }
}

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| ZqError::Data(DataError::InvalidFormat(e.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine_mode()?;
        self.bar_path()?;
        self.queue_kernel()?;
        for pair in &self.data.pairs {
            TradingPair::from_str(pair)?;
        }
        if let Some(tf) = &self.data.candle_timeframe {
            Timeframe::from_str(tf)?;
        }
        if self.risk.max_daily_loss_pct < Decimal::ZERO
            || self.risk.max_daily_loss_pct > Decimal::ONE
        {
            return Err(ZqError::Data(DataError::ValidationFailed(
                "risk.max_daily_loss_pct must be within [0, 1]".into(),
            )));
        }
        if self.backtest.queue_decay <= 0.0 || self.backtest.queue_decay >= 1.0 {
            return Err(ZqError::Data(DataError::ValidationFailed(
                "backtest.queue_decay must be in (0, 1)".into(),
            )));
        }
        Ok(())
    }

    pub fn engine_mode(&self) -> Result<EngineMode> {
        match self.engine.mode.as_str() {
            "event" => Ok(EngineMode::Event),
            "tick" => Ok(EngineMode::Tick),
            other => Err(ZqError::Data(DataError::InvalidFormat(format!(
                "engine.mode must be \"event\" or \"tick\", got {other:?}"
            )))),
        }
    }

    pub fn bar_path(&self) -> Result<BarPath> {
        match self.backtest.bar_path.as_str() {
            "auto" => Ok(BarPath::Auto),
            "ohlc" => Ok(BarPath::OpenHighLowClose),
            "olhc" => Ok(BarPath::OpenLowHighClose),
            "close" => Ok(BarPath::CloseOnly),
            other => Err(ZqError::Data(DataError::InvalidFormat(format!(
                "backtest.bar_path {other:?} unknown"
            )))),
        }
    }

    pub fn queue_kernel(&self) -> Result<QueueKernel> {
        match self.backtest.queue_kernel.as_str() {
            "fifo" => Ok(QueueKernel::PositionFifo),
            "uniform" => Ok(QueueKernel::Uniform),
            "exponential" => Ok(QueueKernel::Exponential {
                decay: self.backtest.queue_decay,
            }),
            "power_law" => Ok(QueueKernel::PowerLaw {
                exponent: self.backtest.queue_exponent,
            }),
            other => Err(ZqError::Data(DataError::InvalidFormat(format!(
                "backtest.queue_kernel {other:?} unknown"
            )))),
        }
    }

    pub fn subscribed_pairs(&self) -> Result<Vec<TradingPair>> {
        self.data.pairs.iter().map(|p| p.parse()).collect()
    }

    pub fn candle_timeframe(&self) -> Result<Option<Timeframe>> {
        self.data
            .candle_timeframe
            .as_deref()
            .map(Timeframe::from_str)
            .transpose()
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            mode: self.engine_mode()?,
            tick_interval: Duration::from_millis(self.engine.tick_interval_ms),
            cancel_orders_on_stop: self.engine.cancel_orders_on_stop,
            stop_grace: Duration::from_secs(5),
            run_recovery: self.engine.run_recovery,
            metrics_interval: Duration::from_secs(self.engine.metrics_interval_secs),
        })
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            enable_notifications: self.cache.enable_notifications,
            candle_capacity: self.cache.candle_capacity,
        }
    }

    pub fn data_config(&self) -> DataEngineConfig {
        DataEngineConfig {
            ingest_capacity: self.data.ingest_capacity,
            ..Default::default()
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            max_retries: self.execution.max_retries,
            retry_base: Duration::from_millis(self.execution.retry_base_ms),
            max_open_orders: self.execution.max_open_orders,
            max_open_orders_per_pair: self.execution.max_open_orders_per_pair,
            journal_path: self.execution.journal_path.as_ref().map(PathBuf::from),
        }
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            equity_asset: self.risk.equity_asset.clone(),
            max_order_notional: self.risk.max_order_notional,
            max_position_size: self.risk.max_position_size,
            max_position_per_symbol: self.risk.max_position_per_symbol,
            max_leverage: self.risk.max_leverage,
            max_daily_loss: self.risk.max_daily_loss,
            max_daily_loss_pct: self.risk.max_daily_loss_pct,
            kill_switch_threshold: self.risk.kill_switch_threshold,
            orders_per_minute: self.risk.orders_per_minute,
            close_positions_on_kill: self.risk.close_positions_on_kill,
        }
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        let defaults = RecoveryConfig::default();
        RecoveryConfig {
            // Environment wins, then the file, then the default.
            dir: std::env::var("CHECKPOINT_DIR")
                .ok()
                .or_else(|| self.recovery.dir.clone())
                .map(PathBuf::from)
                .unwrap_or(defaults.dir),
            interval: Duration::from_secs(self.recovery.interval_secs),
            checkpoint_on_terminal: self.recovery.checkpoint_on_terminal,
            keep: self.recovery.keep,
            max_age_hours: self.recovery.max_age_hours,
            sync_with_exchange: self.recovery.sync_with_exchange,
            cancel_orphan_orders: self.recovery.cancel_orphan_orders,
            resubmit_stale: self.recovery.resubmit_stale,
            max_reconcile_issues: self.recovery.max_reconcile_issues,
            equity_asset: self.risk.equity_asset.clone(),
        }
    }

    pub fn backtest_config(&self) -> Result<BacktestConfig> {
        Ok(BacktestConfig {
            initial_balance: self.backtest.initial_balance,
            maker_fee: self.backtest.maker_fee,
            taker_fee: self.backtest.taker_fee,
            slippage: self.backtest.slippage,
            half_spread: self.backtest.half_spread,
            bar_path: self.bar_path()?,
            latency: Default::default(),
            queue_kernel: self.queue_kernel()?,
            seed: self.backtest.seed,
            risk: BacktestConfig::default().risk,
            equity_asset: self.risk.equity_asset.clone(),
        })
    }

    pub fn hyperliquid_config(&self) -> crate::adapter::hyperliquid::HyperliquidConfig {
        crate::adapter::hyperliquid::HyperliquidConfig {
            rest: crate::adapter::hyperliquid::RestConfig {
                api_url: self.hyperliquid.api_url.clone(),
                ..Default::default()
            },
            ws: crate::adapter::hyperliquid::WsConfig {
                ws_url: self.hyperliquid.ws_url.clone(),
                ..Default::default()
            },
            slippage_bound: self.hyperliquid.slippage_bound,
            buffer_limit: self.hyperliquid.buffer_limit,
            lot_size: self.hyperliquid.lot_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_config_is_valid() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.engine_mode().unwrap(), EngineMode::Event);
        assert_eq!(config.risk.orders_per_minute, 120);
    }

    #[test]
    fn test_partial_override() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            mode = "tick"
            tick_interval_ms = 250

            [risk]
            max_daily_loss = "1234.5"

            [backtest]
            queue_kernel = "exponential"
            queue_decay = 0.8
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.engine_mode().unwrap(), EngineMode::Tick);
        assert_eq!(
            config.engine_config().unwrap().tick_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.risk.max_daily_loss, dec!(1234.5));
        assert!(matches!(
            config.queue_kernel().unwrap(),
            QueueKernel::Exponential { decay } if (decay - 0.8).abs() < 1e-9
        ));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let config: Config = toml::from_str("[engine]\nmode = \"warp\"").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: std::result::Result<Config, _> = toml::from_str("[engine]\nspeed = 9000");
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_pair_rejected() {
        let config: Config = toml::from_str("[data]\npairs = [\"BTCUSDC\"]").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_decay_bounds() {
        let config: Config =
            toml::from_str("[backtest]\nqueue_kernel = \"exponential\"\nqueue_decay = 1.5")
                .unwrap();
        assert!(config.validate().is_err());
    }
}
