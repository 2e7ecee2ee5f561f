//! Backtest and live performance summary
//!
//! Consumes the closed-trade list and the equity curve, producing the
//! headline numbers: total and annualized return, profit factor, win
//! rate, average trade duration, plus the rolling risk metrics.

use crate::analytics::risk_metrics::RiskMetrics;
use crate::core::time::Timestamp;
use crate::core::types::{Side, TradingPair};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// One round trip: entry to exit.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub pair: TradingPair,
    pub side: Side,
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub fees: Decimal,
    pub opened_at: Timestamp,
    pub closed_at: Timestamp,
}

impl ClosedTrade {
    /// Net PnL including fees.
    pub fn pnl(&self) -> Decimal {
        let gross = match self.side {
            Side::Buy => (self.exit_price - self.entry_price) * self.qty,
            Side::Sell => (self.entry_price - self.exit_price) * self.qty,
        };
        gross - self.fees
    }

    pub fn duration_secs(&self) -> f64 {
        self.closed_at.elapsed_ns_since(self.opened_at) as f64 / 1e9
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceReport {
    pub trade_count: usize,
    pub total_return: Option<f64>,
    pub annualized_return: Option<f64>,
    pub profit_factor: Option<f64>,
    pub win_rate: Option<f64>,
    pub avg_trade_duration_secs: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub sharpe: Option<f64>,
    pub sortino: Option<f64>,
}

/// Thin collaborator over the trade list and equity curve.
#[derive(Debug, Default)]
pub struct PerformanceAnalyzer;

impl PerformanceAnalyzer {
    pub fn analyze(trades: &[ClosedTrade], equity: &RiskMetrics) -> PerformanceReport {
        let mut report = PerformanceReport {
            trade_count: trades.len(),
            max_drawdown: equity.max_drawdown().map(|d| d.drawdown),
            sharpe: equity.sharpe(),
            sortino: equity.sortino(),
            ..Default::default()
        };

        let points = equity.points();
        if let (Some(first), Some(last)) = (points.first(), points.last()) {
            if first.equity > 0.0 {
                let total = last.equity / first.equity - 1.0;
                report.total_return = Some(total);

                let elapsed_secs = last.ts.elapsed_ns_since(first.ts) as f64 / 1e9;
                if elapsed_secs > 0.0 && last.equity > 0.0 {
                    let years = elapsed_secs / (365.25 * 86_400.0);
                    if years > 0.0 {
                        report.annualized_return =
                            Some((last.equity / first.equity).powf(1.0 / years) - 1.0);
                    }
                }
            }
        }

        if !trades.is_empty() {
            let mut gross_profit = Decimal::ZERO;
            let mut gross_loss = Decimal::ZERO;
            let mut wins = 0usize;
            let mut duration_sum = 0.0;
            for trade in trades {
                let pnl = trade.pnl();
                if pnl > Decimal::ZERO {
                    wins += 1;
                    gross_profit += pnl;
                } else {
                    gross_loss += -pnl;
                }
                duration_sum += trade.duration_secs();
            }
            report.win_rate = Some(wins as f64 / trades.len() as f64);
            report.avg_trade_duration_secs = Some(duration_sum / trades.len() as f64);
            report.profit_factor = if gross_loss > Decimal::ZERO {
                Some(
                    (gross_profit / gross_loss)
                        .to_f64()
                        .unwrap_or(f64::INFINITY),
                )
            } else if gross_profit > Decimal::ZERO {
                Some(f64::INFINITY)
            } else {
                None
            };
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::risk_metrics::RiskMetricsConfig;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    fn pair() -> TradingPair {
        TradingPair::new("BTC", "USDC")
    }

    fn trade(entry: Decimal, exit: Decimal, opened_s: i64, closed_s: i64) -> ClosedTrade {
        ClosedTrade {
            pair: pair(),
            side: Side::Buy,
            qty: dec!(1),
            entry_price: entry,
            exit_price: exit,
            fees: dec!(10),
            opened_at: Timestamp::from_ns(opened_s * 1_000_000_000),
            closed_at: Timestamp::from_ns(closed_s * 1_000_000_000),
        }
    }

    #[test]
    fn test_trade_pnl_includes_fees() {
        let t = trade(dec!(100), dec!(110), 0, 60);
        assert_eq!(t.pnl(), dec!(0)); // 10 gross - 10 fees

        let short = ClosedTrade {
            side: Side::Sell,
            ..trade(dec!(110), dec!(100), 0, 60)
        };
        assert_eq!(short.pnl(), dec!(0));
    }

    #[test]
    fn test_report_headline_numbers() {
        let trades = vec![
            trade(dec!(100), dec!(150), 0, 100),   // +40 net
            trade(dec!(100), dec!(80), 100, 300),  // -30 net
            trade(dec!(100), dec!(130), 300, 400), // +20 net
        ];
        let mut equity = RiskMetrics::new(RiskMetricsConfig::default());
        equity.push_equity(Timestamp::from_ns(0), dec!(1000));
        equity.push_equity(Timestamp::from_ns(86_400_000_000_000), dec!(1030));

        let report = PerformanceAnalyzer::analyze(&trades, &equity);
        assert_eq!(report.trade_count, 3);
        assert_relative_eq!(report.total_return.unwrap(), 0.03, epsilon = 1e-9);
        assert_relative_eq!(report.win_rate.unwrap(), 2.0 / 3.0, epsilon = 1e-9);
        // gross profit 60, gross loss 30.
        assert_relative_eq!(report.profit_factor.unwrap(), 2.0, epsilon = 1e-9);
        // durations 100 + 200 + 100 over 3.
        assert_relative_eq!(
            report.avg_trade_duration_secs.unwrap(),
            400.0 / 3.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_no_trades_no_divisions() {
        let equity = RiskMetrics::new(RiskMetricsConfig::default());
        let report = PerformanceAnalyzer::analyze(&[], &equity);
        assert_eq!(report.trade_count, 0);
        assert!(report.win_rate.is_none());
        assert!(report.profit_factor.is_none());
        assert!(report.total_return.is_none());
    }

    #[test]
    fn test_all_wins_profit_factor_infinite() {
        let trades = vec![trade(dec!(100), dec!(150), 0, 10)];
        let equity = RiskMetrics::new(RiskMetricsConfig::default());
        let report = PerformanceAnalyzer::analyze(&trades, &equity);
        assert!(report.profit_factor.unwrap().is_infinite());
    }
}
