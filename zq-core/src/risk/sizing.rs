//! Position sizing
//!
//! Stateless given account equity and a signal: fixed-fraction, fractional
//! Kelly, and risk-parity sizing. Every output is floored to the venue lot
//! size; a non-positive size means "no position".

use crate::core::decimal::floor_to_lot;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Fraction of equity risked per trade (fixed-fraction method).
    pub risk_per_trade: Decimal,
    /// Scale applied to the raw Kelly fraction; 0.5 = half-Kelly.
    pub kelly_fraction: Decimal,
    /// Upper clamp on any sizing fraction, 0..1.
    pub max_position_pct: Decimal,
    /// Target annualized volatility for risk-parity sizing.
    pub target_volatility: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: Decimal::new(1, 2),     // 1%
            kelly_fraction: Decimal::new(5, 1),     // half-Kelly
            max_position_pct: Decimal::new(25, 2),  // 25%
            target_volatility: Decimal::new(15, 2), // 15%
        }
    }
}

/// Sizing calculator; `lot_size` comes from the venue capabilities.
#[derive(Debug, Clone)]
pub struct MoneyManager {
    config: SizingConfig,
    lot_size: Decimal,
}

impl MoneyManager {
    pub fn new(config: SizingConfig, lot_size: Decimal) -> Self {
        Self { config, lot_size }
    }

    /// Fixed fraction: `equity * risk_per_trade / stop_distance`.
    ///
    /// `stop_distance` is the per-unit loss if the stop is hit.
    pub fn fixed_fraction(&self, equity: Decimal, stop_distance: Decimal) -> Option<Decimal> {
        if equity <= Decimal::ZERO || stop_distance <= Decimal::ZERO {
            return None;
        }
        let qty = equity * self.config.risk_per_trade / stop_distance;
        self.finish(qty)
    }

    /// Fractional Kelly: `f* = w - (1 - w) / R`, scaled by `kelly_fraction`
    /// and clamped to `[0, max_position_pct]` of equity.
    pub fn kelly(
        &self,
        equity: Decimal,
        win_rate: Decimal,
        win_loss_ratio: Decimal,
        price: Decimal,
    ) -> Option<Decimal> {
        if equity <= Decimal::ZERO || price <= Decimal::ZERO || win_loss_ratio <= Decimal::ZERO {
            return None;
        }
        let raw = win_rate - (Decimal::ONE - win_rate) / win_loss_ratio;
        let fraction = (raw * self.config.kelly_fraction)
            .max(Decimal::ZERO)
            .min(self.config.max_position_pct);
        let qty = equity * fraction / price;
        self.finish(qty)
    }

    /// Risk parity: size so the position's volatility matches the target.
    pub fn risk_parity(
        &self,
        equity: Decimal,
        asset_volatility: Decimal,
        price: Decimal,
    ) -> Option<Decimal> {
        if equity <= Decimal::ZERO || asset_volatility <= Decimal::ZERO || price <= Decimal::ZERO {
            return None;
        }
        let fraction = (self.config.target_volatility / asset_volatility)
            .max(Decimal::ZERO)
            .min(self.config.max_position_pct);
        let qty = equity * fraction / price;
        self.finish(qty)
    }

    fn finish(&self, qty: Decimal) -> Option<Decimal> {
        let floored = floor_to_lot(qty, self.lot_size);
        (floored > Decimal::ZERO).then_some(floored)
    }
}
