//! Hyperliquid symbol mapping
//!
//! Hyperliquid is a fixed-quote venue: every perp is quoted in USDC and
//! addressed by its coin name (`BTC`) plus a numeric asset index used in
//! order payloads. The canonical `BASE-USDC` pair maps bijectively onto
//! the coin name; any other quote is rejected.

use crate::adapter::SymbolMapper;
use crate::core::errors::{AdapterError, Result, ZqError};
use crate::core::types::TradingPair;
use parking_lot::RwLock;
use std::collections::HashMap;

pub const QUOTE_ASSET: &str = "USDC";

#[derive(Debug, Default)]
pub struct HyperliquidSymbols {
    /// coin name -> asset index, from the venue's meta endpoint.
    asset_index: RwLock<HashMap<String, u32>>,
}

impl HyperliquidSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the coin universe (from the `meta` info request).
    pub fn set_universe(&self, coins: impl IntoIterator<Item = (String, u32)>) {
        let mut map = self.asset_index.write();
        map.clear();
        map.extend(coins);
    }

    pub fn asset_index(&self, coin: &str) -> Option<u32> {
        self.asset_index.read().get(coin).copied()
    }
}

impl SymbolMapper for HyperliquidSymbols {
    fn to_exchange(&self, pair: &TradingPair) -> Result<String> {
        if pair.quote != QUOTE_ASSET {
            return Err(ZqError::Adapter(AdapterError::InvalidRequest(format!(
                "hyperliquid only quotes in {QUOTE_ASSET}, got {}",
                pair.quote
            ))));
        }
        Ok(pair.base.clone())
    }

    fn from_exchange(&self, symbol: &str) -> Result<TradingPair> {
        if symbol.is_empty() {
            return Err(ZqError::Adapter(AdapterError::InvalidRequest(
                "empty coin symbol".into(),
            )));
        }
        Ok(TradingPair::new(symbol, QUOTE_ASSET))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_for_usdc_pairs() {
        let symbols = HyperliquidSymbols::new();
        let pair = TradingPair::new("BTC", "USDC");
        let coin = symbols.to_exchange(&pair).unwrap();
        assert_eq!(coin, "BTC");
        assert_eq!(symbols.from_exchange(&coin).unwrap(), pair);
    }

    #[test]
    fn test_non_usdc_quote_rejected() {
        let symbols = HyperliquidSymbols::new();
        let pair = TradingPair::new("BTC", "USDT");
        assert!(matches!(
            symbols.to_exchange(&pair),
            Err(ZqError::Adapter(AdapterError::InvalidRequest(_)))
        ));
    }

    #[test]
    fn test_asset_index_lookup() {
        let symbols = HyperliquidSymbols::new();
        symbols.set_universe([("BTC".to_string(), 0), ("ETH".to_string(), 1)]);
        assert_eq!(symbols.asset_index("BTC"), Some(0));
        assert_eq!(symbols.asset_index("SOL"), None);
    }
}
