//! Vectorized backtester
//!
//! For strategies expressible as column-wise operations over price
//! arrays: the signal function maps the full close series to a target
//! position per bar (-1 short, 0 flat, +1 long), and a scalar pass turns
//! target changes into trades at each bar close.
//!
//! The scalar pass shares the event-driven path's fill arithmetic (same
//! Decimal fee and slippage expressions, same account bookkeeping), so on
//! strategies in this supported subset the two backtesters agree to the
//! last decimal digit. The signal function receives the entire series at
//! once; not introducing lookahead is the caller's contract.

use crate::analytics::PerformanceAnalyzer;
use crate::backtest::{BacktestConfig, BacktestReport, HistoricalData, SimAccount};
use crate::core::errors::{DataError, Result, ZqError};
use crate::core::types::{Fill, OrderId, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Target position per bar.
pub type SignalColumn = Vec<i8>;

/// Column-wise signal generator.
pub trait VectorSignal {
    fn signals(&self, closes: &[f64]) -> SignalColumn;
}

impl<F> VectorSignal for F
where
    F: Fn(&[f64]) -> SignalColumn,
{
    fn signals(&self, closes: &[f64]) -> SignalColumn {
        self(closes)
    }
}

/// Threshold signal: long above `upper`, flat below `lower`, hold
/// in between. The column twin of the event-driven threshold strategy.
#[derive(Debug, Clone)]
pub struct ThresholdSignal {
    pub upper: f64,
    pub lower: f64,
}

impl VectorSignal for ThresholdSignal {
    fn signals(&self, closes: &[f64]) -> SignalColumn {
        let mut out = Vec::with_capacity(closes.len());
        let mut state = 0i8;
        for &close in closes {
            if close > self.upper {
                state = 1;
            } else if close < self.lower {
                state = 0;
            }
            out.push(state);
        }
        out
    }
}

pub struct VectorizedBacktest {
    config: BacktestConfig,
    /// Fixed trade size for entries.
    qty: Decimal,
}

impl VectorizedBacktest {
    pub fn new(config: BacktestConfig, qty: Decimal) -> Self {
        Self { config, qty }
    }

    pub fn run(&self, data: &HistoricalData, signal: &dyn VectorSignal) -> Result<BacktestReport> {
        data.validate()?;

        let closes: Vec<f64> = data
            .candles
            .iter()
            .map(|c| c.close.to_f64().unwrap_or(0.0))
            .collect();
        let signals = signal.signals(&closes);
        if signals.len() != data.candles.len() {
            return Err(ZqError::Data(DataError::ValidationFailed(format!(
                "signal column length {} != candle count {}",
                signals.len(),
                data.candles.len()
            ))));
        }

        let mut account = SimAccount::new(
            data.pair.clone(),
            self.config.equity_asset.clone(),
            self.config.initial_balance,
        );
        let mut orders = 0u64;

        account.mark(data.candles[0].open, data.candles[0].open_ts);

        for (candle, &target) in data.candles.iter().zip(&signals) {
            let close_ts = candle.close_ts();
            let current: i8 = if account.position > Decimal::ZERO {
                1
            } else if account.position < Decimal::ZERO {
                -1
            } else {
                0
            };

            if target != current {
                // Close the standing position first, then open the target.
                if current != 0 {
                    let side = if current > 0 { Side::Sell } else { Side::Buy };
                    let qty = account.position.abs();
                    account.on_fill(&self.taker(data, side, qty, candle.close, close_ts));
                    orders += 1;
                }
                if target != 0 {
                    let side = if target > 0 { Side::Buy } else { Side::Sell };
                    account.on_fill(&self.taker(data, side, self.qty, candle.close, close_ts));
                    orders += 1;
                }
            }

            account.mark(candle.close, close_ts);
        }

        // Match the event path's trailing mark-to-market point.
        if let Some(last) = data.candles.last() {
            account.mark(last.close, last.close_ts().offset_ns(60_000_000_000));
        }

        let performance = PerformanceAnalyzer::analyze(&account.trades, &account.equity);
        Ok(BacktestReport {
            final_equity: account
                .equity
                .points()
                .last()
                .map(|p| Decimal::try_from(p.equity).unwrap_or_default())
                .unwrap_or(self.config.initial_balance),
            orders_submitted: orders,
            fills: account.fills,
            trades: account.trades,
            performance,
        })
    }

    /// Same fill expression as the simulated venue's taker path.
    fn taker(
        &self,
        data: &HistoricalData,
        side: Side,
        qty: Decimal,
        close: Decimal,
        ts: crate::core::Timestamp,
    ) -> Fill {
        let price = match side {
            Side::Buy => close + self.config.half_spread + self.config.slippage,
            Side::Sell => close - self.config.half_spread - self.config.slippage,
        };
        Fill {
            client_order_id: OrderId::new("vectorized"),
            pair: data.pair.clone(),
            side,
            qty,
            price,
            fee: self.config.taker_fee * price * qty,
            ts,
        }
    }
}

impl std::fmt::Debug for VectorizedBacktest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorizedBacktest")
            .field("qty", &self.qty)
            .finish()
    }
}
