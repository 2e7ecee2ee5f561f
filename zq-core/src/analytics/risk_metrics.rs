//! Rolling risk metrics over the account equity stream
//!
//! Keeps an append-only equity series and a parallel log-return series,
//! fed from balance updates. Floats are fine here: values are converted
//! from Decimal once, after the exact accounting is done.
//!
//! Every metric degrades gracefully: a series too short to be meaningful
//! yields `None` instead of an error.

use crate::bus::MetricsUpdate;
use crate::core::Timestamp;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct RiskMetricsConfig {
    /// VaR confidence, e.g. 0.95.
    pub var_confidence: f64,
    /// Return observations in the VaR window.
    pub var_window: usize,
    /// Return observations in the Sharpe/Sortino window.
    pub ratio_window: usize,
    /// Daily risk-free rate.
    pub risk_free_rate: f64,
    /// Periods per year for annualization (252 trading days).
    pub annualization: f64,
}

impl Default for RiskMetricsConfig {
    fn default() -> Self {
        Self {
            var_confidence: 0.95,
            var_window: 30,
            ratio_window: 30,
            risk_free_rate: 0.0,
            annualization: 252.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    pub ts: Timestamp,
    pub equity: f64,
}

/// Peak-to-trough drawdown with the indices bounding it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawdownReport {
    /// Fraction of the peak lost, 0..1.
    pub drawdown: f64,
    pub peak_index: usize,
    pub trough_index: usize,
}

#[derive(Debug)]
pub struct RiskMetrics {
    config: RiskMetricsConfig,
    points: Vec<EquityPoint>,
    /// Log returns between consecutive equity points.
    returns: Vec<f64>,
}

impl RiskMetrics {
    pub fn new(config: RiskMetricsConfig) -> Self {
        Self {
            config,
            points: Vec::new(),
            returns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    /// Append one equity observation.
    pub fn push_equity(&mut self, ts: Timestamp, equity: Decimal) {
        let equity = equity.to_f64().unwrap_or(0.0);
        if let Some(last) = self.points.last() {
            if last.equity > 0.0 && equity > 0.0 {
                self.returns.push((equity / last.equity).ln());
            }
        }
        self.points.push(EquityPoint { ts, equity });
    }

    /// Historical VaR: the (1 - confidence) quantile of the sorted return
    /// window, reported as a positive loss fraction.
    pub fn var(&self) -> Option<f64> {
        let window = self.tail(self.config.var_window);
        if window.len() < 2 {
            return None;
        }
        let mut sorted = window.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((1.0 - self.config.var_confidence) * sorted.len() as f64) as usize;
        Some(-sorted[index.min(sorted.len() - 1)])
    }

    /// Maximum drawdown over the whole equity series.
    pub fn max_drawdown(&self) -> Option<DrawdownReport> {
        if self.points.len() < 2 {
            return None;
        }
        let mut peak = self.points[0].equity;
        let mut peak_index = 0;
        let mut best = DrawdownReport {
            drawdown: 0.0,
            peak_index: 0,
            trough_index: 0,
        };
        for (i, point) in self.points.iter().enumerate() {
            if point.equity > peak {
                peak = point.equity;
                peak_index = i;
            } else if peak > 0.0 {
                let drawdown = (peak - point.equity) / peak;
                if drawdown > best.drawdown {
                    best = DrawdownReport {
                        drawdown,
                        peak_index,
                        trough_index: i,
                    };
                }
            }
        }
        Some(best)
    }

    /// Rolling Sharpe: `(mean - rf) / stdev * sqrt(annualization)`.
    pub fn sharpe(&self) -> Option<f64> {
        let window = self.tail(self.config.ratio_window);
        if window.len() < 2 {
            return None;
        }
        let mean = mean(window);
        let stdev = stdev(window, mean);
        if stdev == 0.0 {
            return None;
        }
        Some((mean - self.config.risk_free_rate) / stdev * self.config.annualization.sqrt())
    }

    /// Sortino: like Sharpe but over downside deviation only.
    pub fn sortino(&self) -> Option<f64> {
        let window = self.tail(self.config.ratio_window);
        if window.len() < 2 {
            return None;
        }
        let mean_return = mean(window);
        let downside: Vec<f64> = window
            .iter()
            .filter(|r| **r < self.config.risk_free_rate)
            .map(|r| (r - self.config.risk_free_rate).powi(2))
            .collect();
        if downside.is_empty() {
            return None;
        }
        let downside_dev = (downside.iter().sum::<f64>() / window.len() as f64).sqrt();
        if downside_dev == 0.0 {
            return None;
        }
        Some(
            (mean_return - self.config.risk_free_rate) / downside_dev
                * self.config.annualization.sqrt(),
        )
    }

    /// Snapshot for `system.metrics.update`.
    pub fn report(&self) -> MetricsUpdate {
        MetricsUpdate {
            equity: self.points.last().map(|p| p.equity),
            var: self.var(),
            max_drawdown: self.max_drawdown().map(|d| d.drawdown),
            sharpe: self.sharpe(),
            sortino: self.sortino(),
            ts: Timestamp::now(),
        }
    }

    fn tail(&self, window: usize) -> &[f64] {
        let start = self.returns.len().saturating_sub(window);
        &self.returns[start..]
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn stdev(values: &[f64], mean: f64) -> f64 {
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    fn metrics_with_equity(values: &[f64]) -> RiskMetrics {
        let mut metrics = RiskMetrics::new(RiskMetricsConfig::default());
        for (i, v) in values.iter().enumerate() {
            metrics.push_equity(
                Timestamp::from_ns(i as i64 * 86_400_000_000_000),
                Decimal::try_from(*v).unwrap(),
            );
        }
        metrics
    }

    #[test]
    fn test_short_series_returns_none() {
        let metrics = metrics_with_equity(&[100.0]);
        assert!(metrics.var().is_none());
        assert!(metrics.max_drawdown().is_none());
        assert!(metrics.sharpe().is_none());
        assert!(metrics.sortino().is_none());

        let report = metrics.report();
        assert_eq!(report.equity, Some(100.0));
        assert!(report.var.is_none());
    }

    #[test]
    fn test_max_drawdown_with_indices() {
        // Peak 120 at index 2, trough 90 at index 4: 25% drawdown.
        let metrics = metrics_with_equity(&[100.0, 110.0, 120.0, 100.0, 90.0, 115.0]);
        let dd = metrics.max_drawdown().unwrap();
        assert_relative_eq!(dd.drawdown, 0.25, epsilon = 1e-9);
        assert_eq!(dd.peak_index, 2);
        assert_eq!(dd.trough_index, 4);
    }

    #[test]
    fn test_var_is_loss_quantile() {
        // Mostly small gains with one sharp loss; VaR must be positive.
        let mut values = vec![100.0];
        for i in 1..=30 {
            let step = if i == 15 { 0.90 } else { 1.002 };
            values.push(values[i - 1] * step);
        }
        let metrics = metrics_with_equity(&values);
        let var = metrics.var().unwrap();
        assert!(var > 0.0, "VaR should report a loss, got {var}");
    }

    #[test]
    fn test_sharpe_zero_vol_guarded() {
        // Identical returns: stdev 0 => None rather than a division blowup.
        let mut values = Vec::new();
        let mut v = 100.0;
        for _ in 0..10 {
            values.push(v);
            v *= 1.01;
        }
        let metrics = metrics_with_equity(&values);
        assert!(metrics.sharpe().is_none());
        // All-positive returns also means no downside deviation.
        assert!(metrics.sortino().is_none());
    }

    #[test]
    fn test_sharpe_sign_follows_mean() {
        let up = metrics_with_equity(&[100.0, 101.0, 103.0, 102.0, 105.0, 107.0]);
        assert!(up.sharpe().unwrap() > 0.0);

        let down = metrics_with_equity(&[100.0, 98.0, 99.0, 95.0, 94.0, 92.0]);
        assert!(down.sharpe().unwrap() < 0.0);
    }

    #[test]
    fn test_push_equity_decimal_conversion() {
        let mut metrics = RiskMetrics::new(RiskMetricsConfig::default());
        metrics.push_equity(Timestamp::from_ns(0), dec!(100000.50));
        assert_relative_eq!(metrics.points()[0].equity, 100000.50, epsilon = 1e-9);
    }
}
