//! Market data validation
//!
//! One validation point for everything a provider pushes, applied before
//! anything reaches the cache:
//!
//! - quotes: positive prices, bid <= ask
//! - candles: OHLC invariants, timeframe-aligned timestamps
//! - per-stream timestamps must be non-decreasing
//!
//! Invalid items never enter the cache; they are counted and dropped by
//! the engine with a warning.

use crate::core::errors::{DataError, Result, ZqError};
use crate::core::time::Timestamp;
use crate::core::types::{Candle, MarketTrade, Quote, Timeframe, TradingPair};
use std::collections::HashMap;

/// Stateful validator tracking last-seen timestamps per stream.
#[derive(Debug, Default)]
pub struct MarketValidator {
    last_quote: HashMap<TradingPair, Timestamp>,
    last_candle: HashMap<(TradingPair, Timeframe), Timestamp>,
}

impl MarketValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate_quote(&mut self, quote: &Quote) -> Result<()> {
        quote.validate()?;
        if let Some(last) = self.last_quote.get(&quote.pair) {
            if quote.ts.ns < last.ns {
                return Err(ZqError::Data(DataError::ValidationFailed(format!(
                    "{}: quote timestamp {} behind last seen {}",
                    quote.pair,
                    quote.ts.as_ns(),
                    last.as_ns()
                ))));
            }
        }
        self.last_quote.insert(quote.pair.clone(), quote.ts);
        Ok(())
    }

    pub fn validate_candle(&mut self, candle: &Candle) -> Result<()> {
        candle.validate()?;
        let key = (candle.pair.clone(), candle.timeframe);
        if let Some(last) = self.last_candle.get(&key) {
            if candle.open_ts.ns < last.ns {
                return Err(ZqError::Data(DataError::ValidationFailed(format!(
                    "{} {}: candle open {} behind last seen {}",
                    candle.pair,
                    candle.timeframe,
                    candle.open_ts.as_ns(),
                    last.as_ns()
                ))));
            }
        }
        self.last_candle.insert(key, candle.open_ts);
        Ok(())
    }

    pub fn validate_trade(&self, trade: &MarketTrade) -> Result<()> {
        if trade.price <= rust_decimal::Decimal::ZERO || trade.qty <= rust_decimal::Decimal::ZERO {
            return Err(ZqError::Data(DataError::ValidationFailed(format!(
                "{}: trade price/qty must be positive",
                trade.pair
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pair() -> TradingPair {
        TradingPair::new("BTC", "USDC")
    }

    fn quote_at(ns: i64) -> Quote {
        Quote {
            pair: pair(),
            bid: dec!(100),
            ask: dec!(101),
            bid_size: dec!(1),
            ask_size: dec!(1),
            ts: Timestamp::from_ns(ns),
        }
    }

    #[test]
    fn test_monotonic_quotes() {
        let mut v = MarketValidator::new();
        v.validate_quote(&quote_at(100)).unwrap();
        v.validate_quote(&quote_at(100)).unwrap();
        v.validate_quote(&quote_at(200)).unwrap();
        assert!(v.validate_quote(&quote_at(150)).is_err());
    }

    #[test]
    fn test_crossed_quote_rejected() {
        let mut v = MarketValidator::new();
        let mut q = quote_at(100);
        q.bid = dec!(102);
        assert!(v.validate_quote(&q).is_err());
    }

    #[test]
    fn test_candle_regression_rejected() {
        let mut v = MarketValidator::new();
        let step = Timeframe::M1.duration_ns();
        let make = |i: i64| Candle {
            pair: pair(),
            timeframe: Timeframe::M1,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100),
            volume: dec!(1),
            open_ts: Timestamp::from_ns(i * step),
        };
        v.validate_candle(&make(5)).unwrap();
        v.validate_candle(&make(6)).unwrap();
        assert!(v.validate_candle(&make(4)).is_err());
    }

    #[test]
    fn test_trade_validation() {
        let v = MarketValidator::new();
        let trade = MarketTrade {
            pair: pair(),
            side: crate::core::types::Side::Buy,
            price: dec!(0),
            qty: dec!(1),
            ts: Timestamp::now(),
        };
        assert!(v.validate_trade(&trade).is_err());
    }
}
