//! Stop-loss / take-profit / trailing-stop manager
//!
//! Holds a `StopConfig` per position and reacts to every quote for a pair
//! with active stops:
//!
//! - long positions: stop fires at `bid <= stop`, take-profit at
//!   `bid >= tp`; the trailing anchor ratchets up with the bid and the
//!   stop is recomputed as `anchor * (1 - trailing_pct)`
//! - short positions mirror on the ask with `min` and `(1 + trailing_pct)`
//!
//! A trigger submits one reduce-only close through the execution engine;
//! the per-position `triggered` flag guarantees at-most-once and resets
//! only when the position is closed. Quote jitter is handled by an
//! optional confirmation window (N consecutive quotes or a hold time).

use crate::core::types::{OrderRequest, Quote, Side, TimeInForce, TradingPair};
use crate::core::Timestamp;
use crate::execution::ExecutionEngine;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How long a breach must persist before the close fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Confirmation {
    /// Fire on the first breaching quote.
    #[default]
    Immediate,
    /// Fire after this many consecutive breaching quotes.
    ConsecutiveQuotes(u32),
    /// Fire once the breach has held for this many milliseconds.
    HoldMillis(u64),
}

/// How the close order is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CloseStyle {
    /// Reduce-only market order.
    #[default]
    Market,
    /// Reduce-only IOC limit at the touch, padded by this fraction.
    IocLimit { slippage_pct: Decimal },
}

/// Per-position stop configuration.
#[derive(Debug, Clone, Default)]
pub struct StopConfig {
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Trailing distance as a fraction of the anchor (0.10 = 10%).
    pub trailing_pct: Option<Decimal>,
    pub confirmation: Confirmation,
    pub close_style: CloseStyle,
}

#[derive(Debug)]
struct StopState {
    config: StopConfig,
    position_side: Side,
    /// Best price seen in the position's favour; trailing stops hang off it.
    trailing_anchor: Option<Decimal>,
    triggered: bool,
    consecutive_breaches: u32,
    breach_since: Option<Timestamp>,
}

impl StopState {
    /// Current effective stop level, trailing taking precedence.
    fn effective_stop(&self) -> Option<Decimal> {
        match (self.config.trailing_pct, self.trailing_anchor) {
            (Some(pct), Some(anchor)) => {
                let stop = match self.position_side {
                    Side::Buy => anchor * (Decimal::ONE - pct),
                    Side::Sell => anchor * (Decimal::ONE + pct),
                };
                Some(stop)
            }
            _ => self.config.stop_loss,
        }
    }
}

/// What fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerKind {
    StopLoss,
    TakeProfit,
}

pub struct StopLossManager {
    execution: Arc<ExecutionEngine>,
    stops: Mutex<HashMap<TradingPair, StopState>>,
}

impl StopLossManager {
    pub fn new(execution: Arc<ExecutionEngine>) -> Arc<Self> {
        Arc::new(Self {
            execution,
            stops: Mutex::new(HashMap::new()),
        })
    }

    /// Attach (or replace) stops for a position.
    pub fn set_stops(&self, pair: TradingPair, position_side: Side, config: StopConfig) {
        info!(%pair, side = %position_side, ?config, "stops attached");
        self.stops.lock().insert(
            pair,
            StopState {
                config,
                position_side,
                trailing_anchor: None,
                triggered: false,
                consecutive_breaches: 0,
                breach_since: None,
            },
        );
    }

    /// Remove stops; called when the position closes. Also resets the
    /// at-most-once trigger latch.
    pub fn clear(&self, pair: &TradingPair) {
        self.stops.lock().remove(pair);
    }

    pub fn has_stops(&self, pair: &TradingPair) -> bool {
        self.stops.lock().contains_key(pair)
    }

    /// Feed one quote; fires the close when a stop condition confirms.
    pub fn on_quote(&self, quote: &Quote) {
        let trigger = {
            let mut stops = self.stops.lock();
            let Some(state) = stops.get_mut(&quote.pair) else {
                return;
            };
            if state.triggered {
                return;
            }
            Self::evaluate(state, quote)
        };

        if let Some((kind, close_style, position_side)) = trigger {
            self.fire(quote, kind, close_style, position_side);
        }
    }

    /// Pure trigger evaluation; updates anchors and confirmation state.
    fn evaluate(state: &mut StopState, quote: &Quote) -> Option<(TriggerKind, CloseStyle, Side)> {
        // The stop tested against this quote hangs off the anchor from
        // prior quotes; the anchor ratchets afterwards.
        let reference = match state.position_side {
            Side::Buy => quote.bid,
            Side::Sell => quote.ask,
        };

        let stop = state.effective_stop();
        let tp = state.config.take_profit;

        if state.config.trailing_pct.is_some() {
            state.trailing_anchor = Some(match (state.trailing_anchor, state.position_side) {
                (Some(anchor), Side::Buy) => anchor.max(reference),
                (Some(anchor), Side::Sell) => anchor.min(reference),
                (None, _) => reference,
            });
        }

        let breach = match state.position_side {
            Side::Buy => {
                if let Some(stop) = stop {
                    if reference <= stop {
                        Some(TriggerKind::StopLoss)
                    } else {
                        None
                    }
                } else {
                    None
                }
                .or_else(|| match tp {
                    Some(tp) if reference >= tp => Some(TriggerKind::TakeProfit),
                    _ => None,
                })
            }
            Side::Sell => {
                if let Some(stop) = stop {
                    if reference >= stop {
                        Some(TriggerKind::StopLoss)
                    } else {
                        None
                    }
                } else {
                    None
                }
                .or_else(|| match tp {
                    Some(tp) if reference <= tp => Some(TriggerKind::TakeProfit),
                    _ => None,
                })
            }
        };

        let Some(kind) = breach else {
            state.consecutive_breaches = 0;
            state.breach_since = None;
            return None;
        };

        let confirmed = match state.config.confirmation {
            Confirmation::Immediate => true,
            Confirmation::ConsecutiveQuotes(n) => {
                state.consecutive_breaches += 1;
                state.consecutive_breaches >= n
            }
            Confirmation::HoldMillis(ms) => {
                let since = *state.breach_since.get_or_insert(quote.ts);
                quote.ts.elapsed_ns_since(since) >= ms as i64 * 1_000_000
            }
        };
        if !confirmed {
            debug!(
                pair = %quote.pair,
                breaches = state.consecutive_breaches,
                "stop breach awaiting confirmation"
            );
            return None;
        }

        state.triggered = true;
        Some((kind, state.config.close_style, state.position_side))
    }

    fn fire(&self, quote: &Quote, kind: TriggerKind, style: CloseStyle, position_side: Side) {
        let Some(position) = self.execution_cache_position(&quote.pair) else {
            warn!(pair = %quote.pair, "stop fired but no position in cache");
            self.clear(&quote.pair);
            return;
        };

        let close_side = position_side.opposite();
        let request = match style {
            CloseStyle::Market => {
                OrderRequest::market(quote.pair.clone(), close_side, position.size).reduce_only()
            }
            CloseStyle::IocLimit { slippage_pct } => {
                let touch = match close_side {
                    Side::Sell => quote.bid * (Decimal::ONE - slippage_pct),
                    Side::Buy => quote.ask * (Decimal::ONE + slippage_pct),
                };
                OrderRequest::limit(quote.pair.clone(), close_side, position.size, touch)
                    .with_tif(TimeInForce::Ioc)
                    .reduce_only()
            }
        };

        info!(
            pair = %quote.pair,
            ?kind,
            size = %position.size,
            "stop trigger submitting close"
        );
        if let Err(err) = self.execution.submit(request) {
            warn!(pair = %quote.pair, %err, "stop close submission failed");
            // Leave the latch set; re-arming on failure would spam the
            // venue on every subsequent quote.
        }
    }

    fn execution_cache_position(
        &self,
        pair: &TradingPair,
    ) -> Option<crate::core::types::Position> {
        self.execution.cache().position(pair)
    }

    /// Wire quote and position-change subscriptions on the bus.
    pub fn start(self: &Arc<Self>, bus: &crate::bus::MessageBus) {
        let manager = Arc::clone(self);
        bus.subscribe(
            "cache.quotes.**",
            Box::new(move |_, event| {
                if let crate::bus::Event::CacheQuote { new, .. } = event {
                    manager.on_quote(new);
                }
                Ok(())
            }),
        );
    }
}

impl std::fmt::Debug for StopLossManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopLossManager")
            .field("active", &self.stops.lock().len())
            .finish()
    }
}
