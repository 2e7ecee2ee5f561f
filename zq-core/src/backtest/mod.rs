//! Event-driven backtester
//!
//! Replays historical candles as synthetic top-of-book ticks, drives the
//! strategy through the same [`Strategy`] trait the live engine uses, and
//! routes its orders through the real [`ExecutionEngine`] backed by the
//! [`SimulatedExchange`]. Latency and queue-position simulation live in
//! the venue; this module owns the replay clock, the account, and the
//! final report.
//!
//! Bar expansion: by default a bar replays open-high-low-close when it
//! closed up and open-low-high-close when it closed down (the pessimistic
//! ordering for longs), each tick carrying a quarter of the bar volume.

pub mod latency;
pub mod queue;
pub mod sim;
pub mod vectorized;

pub use latency::{LatencyConfig, LatencyModel};
pub use queue::{QueueKernel, QueueSimulator, QueueState};
pub use sim::{SimConfig, SimEvent, SimulatedExchange};

use crate::analytics::{
    ClosedTrade, PerformanceAnalyzer, PerformanceReport, RiskMetrics, RiskMetricsConfig,
};
use crate::bus::MessageBus;
use crate::cache::{Cache, CacheConfig};
use crate::core::errors::{DataError, Result, ZqError};
use crate::core::types::{
    Balance, Candle, Fill, Position, Quote, Side, Timeframe, TradingPair,
};
use crate::core::Timestamp;
use crate::execution::{ExecutionConfig, ExecutionEngine};
use crate::risk::{RiskConfig, RiskEngine};
use crate::strategy::{Strategy, StrategyContext};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

/// Output shape of the historical loader (the loader itself lives
/// outside this crate).
#[derive(Debug, Clone)]
pub struct HistoricalData {
    pub pair: TradingPair,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
}

impl HistoricalData {
    pub fn validate(&self) -> Result<()> {
        if self.candles.is_empty() {
            return Err(ZqError::Data(DataError::ValidationFailed(
                "no candles in historical data".into(),
            )));
        }
        let mut last_ts = None;
        for candle in &self.candles {
            candle.validate()?;
            if let Some(last) = last_ts {
                if candle.open_ts <= last {
                    return Err(ZqError::Data(DataError::ValidationFailed(
                        "candles out of order".into(),
                    )));
                }
            }
            last_ts = Some(candle.open_ts);
        }
        Ok(())
    }
}

/// Order in which a bar's prices are replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarPath {
    /// O-H-L-C for up bars, O-L-H-C for down bars (pessimistic).
    #[default]
    Auto,
    OpenHighLowClose,
    OpenLowHighClose,
    /// Close only; one tick per bar.
    CloseOnly,
}

impl BarPath {
    fn prices(&self, candle: &Candle) -> Vec<Decimal> {
        match self {
            BarPath::OpenHighLowClose => {
                vec![candle.open, candle.high, candle.low, candle.close]
            }
            BarPath::OpenLowHighClose => {
                vec![candle.open, candle.low, candle.high, candle.close]
            }
            BarPath::Auto => {
                if candle.close >= candle.open {
                    vec![candle.open, candle.high, candle.low, candle.close]
                } else {
                    vec![candle.open, candle.low, candle.high, candle.close]
                }
            }
            BarPath::CloseOnly => vec![candle.close],
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub initial_balance: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    /// Additive slippage on aggressive fills.
    pub slippage: Decimal,
    /// Half-spread applied around each synthetic tick price.
    pub half_spread: Decimal,
    pub bar_path: BarPath,
    pub latency: LatencyConfig,
    pub queue_kernel: QueueKernel,
    pub seed: u64,
    pub risk: RiskConfig,
    pub equity_asset: String,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::from(100_000),
            maker_fee: Decimal::new(2, 4),
            taker_fee: Decimal::new(5, 4),
            slippage: Decimal::ZERO,
            half_spread: Decimal::ZERO,
            bar_path: BarPath::default(),
            latency: LatencyConfig::default(),
            queue_kernel: QueueKernel::PositionFifo,
            seed: 42,
            // Backtests default to permissive risk; a zero limit disables
            // the corresponding check.
            risk: RiskConfig {
                max_order_notional: Decimal::ZERO,
                max_position_size: Decimal::ZERO,
                max_position_per_symbol: Decimal::ZERO,
                max_leverage: Decimal::ZERO,
                max_daily_loss: Decimal::ZERO,
                max_daily_loss_pct: Decimal::ZERO,
                kill_switch_threshold: Decimal::ZERO,
                orders_per_minute: u32::MAX,
                ..Default::default()
            },
            equity_asset: "USDC".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct BacktestReport {
    pub performance: PerformanceReport,
    pub trades: Vec<ClosedTrade>,
    pub final_equity: Decimal,
    pub orders_submitted: u64,
    pub fills: u64,
}

/// Signed-position account with average-entry bookkeeping.
struct SimAccount {
    pair: TradingPair,
    equity_asset: String,
    balance: Decimal,
    position: Decimal,
    avg_entry: Decimal,
    open_since: Timestamp,
    fills: u64,
    trades: Vec<ClosedTrade>,
    equity: RiskMetrics,
}

impl SimAccount {
    fn new(pair: TradingPair, equity_asset: String, initial_balance: Decimal) -> Self {
        Self {
            pair,
            equity_asset,
            balance: initial_balance,
            position: Decimal::ZERO,
            avg_entry: Decimal::ZERO,
            open_since: Timestamp::from_ns(0),
            fills: 0,
            trades: Vec::new(),
            equity: RiskMetrics::new(RiskMetricsConfig::default()),
        }
    }

    fn on_fill(&mut self, fill: &Fill) {
        self.fills += 1;
        self.balance -= fill.fee;

        let signed = match fill.side {
            Side::Buy => fill.qty,
            Side::Sell => -fill.qty,
        };

        if self.position == Decimal::ZERO || self.position.signum() == signed.signum() {
            // Opening or adding: new weighted average entry.
            let prev_abs = self.position.abs();
            if prev_abs == Decimal::ZERO {
                self.open_since = fill.ts;
                self.avg_entry = fill.price;
            } else {
                self.avg_entry = (self.avg_entry * prev_abs + fill.price * fill.qty)
                    / (prev_abs + fill.qty);
            }
            self.position += signed;
            return;
        }

        // Reducing (possibly flipping).
        let close_qty = fill.qty.min(self.position.abs());
        let direction = self.position.signum();
        let pnl = (fill.price - self.avg_entry) * close_qty * direction;
        self.balance += pnl;
        self.trades.push(ClosedTrade {
            pair: self.pair.clone(),
            side: if direction > Decimal::ZERO {
                Side::Buy
            } else {
                Side::Sell
            },
            qty: close_qty,
            entry_price: self.avg_entry,
            exit_price: fill.price,
            fees: fill.fee,
            opened_at: self.open_since,
            closed_at: fill.ts,
        });

        self.position += signed;
        if self.position != Decimal::ZERO && self.position.signum() != direction {
            // Flipped through zero: remainder opens a fresh position.
            self.avg_entry = fill.price;
            self.open_since = fill.ts;
        } else if self.position == Decimal::ZERO {
            self.avg_entry = Decimal::ZERO;
        }
    }

    fn unrealized(&self, mark: Decimal) -> Decimal {
        if self.position == Decimal::ZERO {
            Decimal::ZERO
        } else {
            (mark - self.avg_entry) * self.position
        }
    }

    fn equity_at(&self, mark: Decimal) -> Decimal {
        self.balance + self.unrealized(mark)
    }

    /// Record an equity observation at the mark.
    fn mark(&mut self, mark: Decimal, ts: Timestamp) {
        let equity = self.equity_at(mark);
        self.equity.push_equity(ts, equity);
    }

    /// Mirror the account into the cache so risk checks see live
    /// positions and balances.
    fn mirror(&self, cache: &Cache, mark: Decimal, ts: Timestamp) {
        let equity = self.equity_at(mark);
        let _ = cache.update_balance(Balance {
            asset: self.equity_asset.clone(),
            total: equity,
            available: equity,
            locked: Decimal::ZERO,
            ts,
        });
        if self.position == Decimal::ZERO {
            cache.remove_position(&self.pair);
        } else {
            let _ = cache.update_position(Position {
                pair: self.pair.clone(),
                side: if self.position > Decimal::ZERO {
                    Side::Buy
                } else {
                    Side::Sell
                },
                size: self.position.abs(),
                entry_price: self.avg_entry,
                mark_price: Some(mark),
                liquidation_price: None,
                unrealized_pnl: self.unrealized(mark),
                leverage: Decimal::ONE,
                margin_used: Decimal::ZERO,
                opened_at: self.open_since,
            });
        }
    }
}

/// The event-driven backtester.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn run(
        &self,
        data: &HistoricalData,
        strategy: &mut dyn Strategy,
    ) -> Result<BacktestReport> {
        data.validate()?;

        let bus = MessageBus::new();
        let cache = Arc::new(Cache::new(
            bus.clone(),
            CacheConfig {
                enable_notifications: false,
                ..Default::default()
            },
        ));
        let venue = Arc::new(SimulatedExchange::new(SimConfig {
            maker_fee: self.config.maker_fee,
            taker_fee: self.config.taker_fee,
            slippage: self.config.slippage,
            latency: self.config.latency.clone(),
            queue_kernel: self.config.queue_kernel.clone(),
            seed: self.config.seed,
        }));
        let risk = RiskEngine::new(bus.clone(), Arc::clone(&cache), self.config.risk.clone());
        let execution = ExecutionEngine::new(
            bus.clone(),
            Arc::clone(&cache),
            Arc::clone(&risk),
            Arc::clone(&venue) as Arc<dyn crate::adapter::ExecutionClient>,
            ExecutionConfig {
                max_retries: 0,
                max_open_orders: usize::MAX,
                max_open_orders_per_pair: usize::MAX,
                journal_path: None,
                ..Default::default()
            },
        );

        let mut account = SimAccount::new(
            data.pair.clone(),
            self.config.equity_asset.clone(),
            self.config.initial_balance,
        );
        let mut feed_rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(1));

        // Seed the cache with the starting balance.
        let start_ts = data.candles[0].open_ts;
        account.mark(data.candles[0].open, start_ts);
        account.mirror(&cache, data.candles[0].open, start_ts);

        for candle in &data.candles {
            let prices = self.config.bar_path.prices(candle);
            let step = candle.timeframe.duration_ns() / prices.len() as i64;
            let volume_per_tick = candle.volume / Decimal::from(prices.len() as u64);

            for (i, price) in prices.iter().enumerate() {
                let t_exchange = candle.open_ts.offset_ns(step * (i as i64 + 1));
                venue.set_now(t_exchange);

                let quote = Quote {
                    pair: data.pair.clone(),
                    bid: price - self.config.half_spread,
                    ask: price + self.config.half_spread,
                    bid_size: volume_per_tick,
                    ask_size: volume_per_tick,
                    ts: t_exchange,
                };
                venue.on_quote(quote.clone());
                let _ = cache.update_quote(quote.clone());
                venue.on_trade(*price, volume_per_tick);

                // The strategy sees the tick after the feed latency; the
                // venue clock travels with it so submissions are stamped
                // at strategy time.
                let feed_delay = self.config.latency.feed.sample(&mut feed_rng);
                let t_strategy = t_exchange.offset_ns(feed_delay);
                self.deliver_due(&venue, &execution, &mut account, t_strategy);
                venue.set_now(t_strategy);

                let ctx = StrategyContext::new(
                    Arc::clone(&cache),
                    Arc::clone(&execution),
                    t_strategy,
                );
                strategy.on_quote(&ctx, &quote);
                self.deliver_due(&venue, &execution, &mut account, t_strategy);
            }

            // Bar close: candle callback, then mark to market.
            let close_ts = candle.close_ts();
            venue.set_now(close_ts);
            let _ = cache.update_candle(candle.clone());
            let ctx = StrategyContext::new(Arc::clone(&cache), Arc::clone(&execution), close_ts);
            strategy.on_candle(&ctx, candle);
            self.deliver_due(&venue, &execution, &mut account, close_ts);
            account.mark(candle.close, close_ts);
            account.mirror(&cache, candle.close, close_ts);
        }

        // Drain whatever latency left in flight past the last bar.
        let end = data
            .candles
            .last()
            .map(|c| c.close_ts().offset_ns(60_000_000_000))
            .unwrap_or_else(Timestamp::now);
        venue.set_now(end);
        self.deliver_due(&venue, &execution, &mut account, end);
        if let Some(last) = data.candles.last() {
            account.mark(last.close, end);
        }

        let performance = PerformanceAnalyzer::analyze(&account.trades, &account.equity);
        let report = BacktestReport {
            final_equity: account
                .equity
                .points()
                .last()
                .map(|p| Decimal::try_from(p.equity).unwrap_or_default())
                .unwrap_or(self.config.initial_balance),
            orders_submitted: execution.stats().submitted.load(Ordering::Relaxed),
            fills: account.fills,
            trades: account.trades,
            performance,
        };
        info!(
            orders = report.orders_submitted,
            fills = report.fills,
            trades = report.trades.len(),
            final_equity = %report.final_equity,
            "backtest finished"
        );
        bus.close(std::time::Duration::from_secs(1));
        Ok(report)
    }

    fn deliver_due(
        &self,
        venue: &SimulatedExchange,
        execution: &ExecutionEngine,
        account: &mut SimAccount,
        now: Timestamp,
    ) {
        for event in venue.take_due(now) {
            match event {
                SimEvent::OrderUpdate(update) => execution.on_order_update(&update),
                SimEvent::Fill(fill) => {
                    execution.on_fill(&fill);
                    account.on_fill(&fill);
                }
            }
        }
    }
}

impl std::fmt::Debug for BacktestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktestEngine").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(i: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            pair: TradingPair::new("BTC", "USDC"),
            timeframe: Timeframe::M1,
            open,
            high,
            low,
            close,
            volume: dec!(8),
            open_ts: Timestamp::from_ns(i * Timeframe::M1.duration_ns()),
        }
    }

    #[test]
    fn test_bar_path_pessimistic_ordering() {
        let up = candle(1, dec!(100), dec!(110), dec!(95), dec!(105));
        assert_eq!(
            BarPath::Auto.prices(&up),
            vec![dec!(100), dec!(110), dec!(95), dec!(105)]
        );
        let down = candle(1, dec!(105), dec!(110), dec!(95), dec!(100));
        assert_eq!(
            BarPath::Auto.prices(&down),
            vec![dec!(105), dec!(95), dec!(110), dec!(100)]
        );
        assert_eq!(BarPath::CloseOnly.prices(&up), vec![dec!(105)]);
    }

    #[test]
    fn test_historical_data_validation() {
        let data = HistoricalData {
            pair: TradingPair::new("BTC", "USDC"),
            timeframe: Timeframe::M1,
            candles: vec![
                candle(2, dec!(100), dec!(101), dec!(99), dec!(100)),
                candle(1, dec!(100), dec!(101), dec!(99), dec!(100)),
            ],
        };
        assert!(data.validate().is_err(), "out-of-order candles rejected");

        let empty = HistoricalData {
            pair: TradingPair::new("BTC", "USDC"),
            timeframe: Timeframe::M1,
            candles: vec![],
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_sim_account_round_trip() {
        let mut account = SimAccount::new(
            TradingPair::new("BTC", "USDC"),
            "USDC".into(),
            dec!(10_000),
        );
        let fill = |side, qty, price, ts| Fill {
            client_order_id: crate::core::types::OrderId::new("x"),
            pair: TradingPair::new("BTC", "USDC"),
            side,
            qty,
            price,
            fee: dec!(1),
            ts: Timestamp::from_ns(ts),
        };

        account.on_fill(&fill(Side::Buy, dec!(1), dec!(100), 1));
        assert_eq!(account.position, dec!(1));
        assert_eq!(account.avg_entry, dec!(100));

        account.on_fill(&fill(Side::Buy, dec!(1), dec!(110), 2));
        assert_eq!(account.avg_entry, dec!(105));

        account.on_fill(&fill(Side::Sell, dec!(2), dec!(120), 3));
        assert_eq!(account.position, Decimal::ZERO);
        assert_eq!(account.trades.len(), 1);
        let trade = &account.trades[0];
        assert_eq!(trade.qty, dec!(2));
        assert_eq!(trade.entry_price, dec!(105));
        assert_eq!(trade.exit_price, dec!(120));
        // 10_000 - 3 fees + 30 realized.
        assert_eq!(account.balance, dec!(10_027));
    }

    #[test]
    fn test_sim_account_flip() {
        let mut account = SimAccount::new(
            TradingPair::new("BTC", "USDC"),
            "USDC".into(),
            dec!(10_000),
        );
        let fill = |side, qty, price, ts| Fill {
            client_order_id: crate::core::types::OrderId::new("x"),
            pair: TradingPair::new("BTC", "USDC"),
            side,
            qty,
            price,
            fee: Decimal::ZERO,
            ts: Timestamp::from_ns(ts),
        };

        account.on_fill(&fill(Side::Buy, dec!(1), dec!(100), 1));
        account.on_fill(&fill(Side::Sell, dec!(3), dec!(90), 2));
        // Closed the 1 long at -10, now short 2 from 90.
        assert_eq!(account.position, dec!(-2));
        assert_eq!(account.avg_entry, dec!(90));
        assert_eq!(account.trades.len(), 1);
        assert_eq!(account.balance, dec!(9_990));
    }
}
