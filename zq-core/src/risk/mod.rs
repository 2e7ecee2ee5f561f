//! Risk engine: pre-trade checks and the kill switch
//!
//! Every submission passes `check` before the adapter is called. The
//! checks run in a fixed order: kill switch, order notional, position
//! projection (per pair and aggregate), leverage projection, daily loss,
//! submission rate, margin. Each rejection is a typed [`RiskError`] whose
//! fields carry the limit and the violating value.
//!
//! The evaluation itself is a pure function of the order, an account
//! snapshot, the configuration and the kill-switch flag; the only state
//! consumed on success is one rate-limiter token.
//!
//! Kill switch behaviour: activation publishes
//! `system.kill_switch.activated`, cancels all open orders through the
//! execution engine (via the bus command, so no component cycle), and
//! optionally closes positions with reduce-only market orders. While the
//! switch is active only reduce-only orders pass the gate, which is what
//! lets the close-out itself run. Reset requires the
//! `KILL_SWITCH_RESET_TOKEN` value and preserves the audit record.

pub mod kill_switch;
pub mod rate_limiter;
pub mod sizing;
pub mod stops;

pub use kill_switch::{KillSwitch, KillSwitchRecord};
pub use rate_limiter::RateLimiter;

use crate::bus::{Event, MessageBus};
use crate::cache::Cache;
use crate::core::errors::{RiskError, ZqError};
use crate::core::types::{Order, OrderRequest, Side, TradingPair};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Risk limits. A zero limit disables that particular check.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Asset whose balance defines account equity.
    pub equity_asset: String,
    pub max_order_notional: Decimal,
    /// Aggregate position notional across all pairs.
    pub max_position_size: Decimal,
    /// Position notional per pair.
    pub max_position_per_symbol: Decimal,
    pub max_leverage: Decimal,
    pub max_daily_loss: Decimal,
    /// Fraction of start-of-day equity, 0..1.
    pub max_daily_loss_pct: Decimal,
    /// Daily loss beyond this trips the kill switch automatically.
    pub kill_switch_threshold: Decimal,
    pub orders_per_minute: u32,
    pub close_positions_on_kill: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            equity_asset: "USDC".to_string(),
            max_order_notional: Decimal::from(100_000),
            max_position_size: Decimal::from(500_000),
            max_position_per_symbol: Decimal::from(250_000),
            max_leverage: Decimal::from(10),
            max_daily_loss: Decimal::from(5_000),
            max_daily_loss_pct: Decimal::new(20, 2), // 20%
            kill_switch_threshold: Decimal::from(10_000),
            orders_per_minute: 120,
            close_positions_on_kill: false,
        }
    }
}

/// Account snapshot the evaluation runs against.
#[derive(Debug, Clone, Default)]
pub struct AccountView {
    pub equity: Decimal,
    pub available: Decimal,
    /// Realized + unrealized loss today; positive means losing.
    pub daily_loss: Decimal,
    pub start_of_day_equity: Decimal,
    /// Signed base quantity currently held in the order's pair.
    pub position_signed_qty: Decimal,
    /// Mark or mid price for the order's pair; zero when unknown.
    pub pair_ref_price: Decimal,
    /// Notional held in all other pairs.
    pub aggregate_notional_other: Decimal,
}

/// Pure pre-trade evaluation. Identical inputs always yield identical
/// outputs; no counters or tokens are touched here.
pub fn evaluate(
    order: &Order,
    view: &AccountView,
    config: &RiskConfig,
    kill_switch_active: bool,
    rate_ok: bool,
) -> Result<(), RiskError> {
    // 1. Kill switch. Reduce-only orders pass so the close-out path works.
    if kill_switch_active && !order.reduce_only {
        return Err(RiskError::KillSwitchActive);
    }

    let ref_price = order.price.unwrap_or(view.pair_ref_price);
    let notional = order.qty * ref_price;

    // 2. Order notional.
    if config.max_order_notional > Decimal::ZERO && notional > config.max_order_notional {
        return Err(RiskError::PositionSizeExceeded {
            limit: config.max_order_notional,
            actual: notional,
        });
    }

    // 3. Position projection, per pair and aggregate.
    let signed_qty = match order.side {
        Side::Buy => order.qty,
        Side::Sell => -order.qty,
    };
    let mut projected = view.position_signed_qty + signed_qty;
    if order.reduce_only && projected.abs() > view.position_signed_qty.abs() {
        // A reduce-only order cannot grow exposure; the venue clamps it.
        projected = view.position_signed_qty;
    }
    let projected_notional = projected.abs() * ref_price;
    if config.max_position_per_symbol > Decimal::ZERO
        && projected_notional > config.max_position_per_symbol
    {
        return Err(RiskError::PositionSizeExceeded {
            limit: config.max_position_per_symbol,
            actual: projected_notional,
        });
    }
    let aggregate = view.aggregate_notional_other + projected_notional;
    if config.max_position_size > Decimal::ZERO && aggregate > config.max_position_size {
        return Err(RiskError::PositionSizeExceeded {
            limit: config.max_position_size,
            actual: aggregate,
        });
    }

    // 4. Leverage projection.
    if config.max_leverage > Decimal::ZERO && aggregate > Decimal::ZERO {
        if view.equity <= Decimal::ZERO {
            return Err(RiskError::InsufficientMargin {
                required: aggregate / config.max_leverage,
                available: view.available.max(Decimal::ZERO),
            });
        }
        let leverage = aggregate / view.equity;
        if leverage > config.max_leverage {
            return Err(RiskError::LeverageExceeded {
                limit: config.max_leverage,
                actual: leverage,
            });
        }
    }

    // 5. Daily loss, absolute and relative to start-of-day equity.
    if config.max_daily_loss > Decimal::ZERO && view.daily_loss > config.max_daily_loss {
        return Err(RiskError::DailyLossExceeded {
            limit: config.max_daily_loss,
            actual: view.daily_loss,
        });
    }
    if config.max_daily_loss_pct > Decimal::ZERO && view.start_of_day_equity > Decimal::ZERO {
        let pct = view.daily_loss / view.start_of_day_equity;
        if pct > config.max_daily_loss_pct {
            return Err(RiskError::DailyLossExceeded {
                limit: config.max_daily_loss_pct * view.start_of_day_equity,
                actual: view.daily_loss,
            });
        }
    }

    // 6. Submission rate.
    if !rate_ok {
        return Err(RiskError::OrderRateExceeded {
            limit: config.orders_per_minute,
        });
    }

    // 7. Margin for the increase; reduce-only frees margin instead.
    if !order.reduce_only && config.max_leverage > Decimal::ZERO {
        let required = notional / config.max_leverage;
        if required > view.available {
            return Err(RiskError::InsufficientMargin {
                required,
                available: view.available,
            });
        }
    }

    Ok(())
}

#[derive(Debug)]
struct DailyState {
    day_start_ns: i64,
    realized_pnl: Decimal,
    start_of_day_equity: Option<Decimal>,
}

const DAY_NS: i64 = 86_400 * 1_000_000_000;

/// Point-in-time counters exposed by `status`.
#[derive(Debug, Clone, Default)]
pub struct RiskStatus {
    pub total_checks: u64,
    pub rejected_orders: u64,
    pub rejections_by_reason: HashMap<String, u64>,
    pub kill_switch_active: bool,
    pub daily_realized_pnl: Decimal,
}

/// The risk engine: owns the kill switch and the submission rate limiter.
pub struct RiskEngine {
    bus: MessageBus,
    cache: Arc<Cache>,
    config: RiskConfig,
    kill_switch: KillSwitch,
    rate_limiter: RateLimiter,
    daily: Mutex<DailyState>,
    total_checks: AtomicU64,
    rejected_orders: AtomicU64,
    rejections_by_reason: Mutex<HashMap<&'static str, u64>>,
}

impl RiskEngine {
    pub fn new(bus: MessageBus, cache: Arc<Cache>, config: RiskConfig) -> Arc<Self> {
        let rate_limiter = RateLimiter::new(config.orders_per_minute);
        Arc::new(Self {
            bus,
            cache,
            config,
            kill_switch: KillSwitch::new(),
            rate_limiter,
            daily: Mutex::new(DailyState {
                day_start_ns: day_start(crate::core::Timestamp::now().as_ns()),
                realized_pnl: Decimal::ZERO,
                start_of_day_equity: None,
            }),
            total_checks: AtomicU64::new(0),
            rejected_orders: AtomicU64::new(0),
            rejections_by_reason: Mutex::new(HashMap::new()),
        })
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Build the account snapshot for a pair from current cache state.
    pub fn account_view(&self, pair: &TradingPair) -> AccountView {
        let balance = self.cache.balance(&self.config.equity_asset);
        let positions = self.cache.positions();

        let unrealized: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
        let equity = balance
            .as_ref()
            .map(|b| b.total + unrealized)
            .unwrap_or(unrealized);
        let available = balance.as_ref().map(|b| b.available).unwrap_or_default();

        let position_signed_qty = positions
            .iter()
            .find(|p| &p.pair == pair)
            .map(|p| p.signed_size())
            .unwrap_or_default();
        let aggregate_notional_other: Decimal = positions
            .iter()
            .filter(|p| &p.pair != pair)
            .map(|p| p.notional())
            .sum();
        let pair_ref_price = self
            .cache
            .quote(pair)
            .map(|q| q.mid())
            .or_else(|| {
                positions
                    .iter()
                    .find(|p| &p.pair == pair)
                    .map(|p| p.mark_price.unwrap_or(p.entry_price))
            })
            .unwrap_or_default();

        let (realized_pnl, start_of_day_equity) = {
            let mut daily = self.daily.lock();
            self.roll_day(&mut daily);
            if daily.start_of_day_equity.is_none() && equity > Decimal::ZERO {
                daily.start_of_day_equity = Some(equity);
            }
            (
                daily.realized_pnl,
                daily.start_of_day_equity.unwrap_or_default(),
            )
        };
        let daily_pnl = realized_pnl + unrealized;
        let daily_loss = (-daily_pnl).max(Decimal::ZERO);

        AccountView {
            equity,
            available,
            daily_loss,
            start_of_day_equity,
            position_signed_qty,
            pair_ref_price,
            aggregate_notional_other,
        }
    }

    /// Pre-trade check for one order. Consumes a rate-limiter token only
    /// when every check passes.
    pub fn check(&self, order: &Order) -> Result<(), RiskError> {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        let view = self.account_view(&order.pair);

        let result = evaluate(
            order,
            &view,
            &self.config,
            self.kill_switch.is_active(),
            self.rate_limiter.would_allow(),
        );

        match result {
            Ok(()) => {
                self.rate_limiter.allow();
                self.maybe_trip(view.daily_loss);
                Ok(())
            }
            Err(err) => {
                self.rejected_orders.fetch_add(1, Ordering::Relaxed);
                *self
                    .rejections_by_reason
                    .lock()
                    .entry(err.code())
                    .or_insert(0) += 1;
                self.maybe_trip(view.daily_loss);
                Err(err)
            }
        }
    }

    /// Record realized PnL from a fill; drives the daily-loss accounting
    /// and the automatic kill-switch trigger.
    pub fn note_realized_pnl(&self, delta: Decimal) {
        let daily_loss = {
            let mut daily = self.daily.lock();
            self.roll_day(&mut daily);
            daily.realized_pnl += delta;
            (-daily.realized_pnl).max(Decimal::ZERO)
        };
        self.maybe_trip(daily_loss);
    }

    fn roll_day(&self, daily: &mut DailyState) {
        let now = crate::core::Timestamp::now().as_ns();
        let today = day_start(now);
        if today > daily.day_start_ns {
            info!(
                previous_realized = %daily.realized_pnl,
                "new trading day, resetting daily PnL"
            );
            daily.day_start_ns = today;
            daily.realized_pnl = Decimal::ZERO;
            daily.start_of_day_equity = None;
        }
    }

    fn maybe_trip(&self, daily_loss: Decimal) {
        if self.config.kill_switch_threshold > Decimal::ZERO
            && daily_loss > self.config.kill_switch_threshold
        {
            self.trip(&format!(
                "daily loss {daily_loss} breached kill switch threshold {}",
                self.config.kill_switch_threshold
            ));
        }
    }

    /// Activate the kill switch: publish the event, cancel all open orders
    /// through the execution engine, optionally close positions.
    pub fn trip(&self, reason: &str) {
        if !self.kill_switch.activate(reason) {
            return;
        }
        self.bus.publish(
            "system.kill_switch.activated",
            Event::KillSwitch {
                active: true,
                reason: reason.to_string(),
            },
        );

        match self.bus.request_with_timeout(
            "execution.cancel_all",
            Event::CancelAllRequest(Default::default()),
            Duration::from_secs(5),
        ) {
            Ok(Event::CancelAllReport { cancelled, failed }) => {
                info!(cancelled, failed, "kill switch cancelled open orders");
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "kill switch cancel-all failed"),
        }

        if self.config.close_positions_on_kill {
            for position in self.cache.positions() {
                let request = OrderRequest::market(
                    position.pair.clone(),
                    position.side.opposite(),
                    position.size,
                )
                .reduce_only();
                if let Err(err) = self.bus.request_with_timeout(
                    "execution.submit",
                    Event::SubmitRequest(request),
                    Duration::from_secs(5),
                ) {
                    warn!(pair = %position.pair, %err, "kill switch close-out failed");
                }
            }
        }
    }

    /// Reset via the `system.kill_switch.reset` command; the caller must
    /// present the `KILL_SWITCH_RESET_TOKEN` value.
    pub fn reset_kill_switch(&self, token: &str) -> Result<(), ZqError> {
        let expected = std::env::var("KILL_SWITCH_RESET_TOKEN").map_err(|_| {
            ZqError::Adapter(crate::core::errors::AdapterError::Unauthorized(
                "KILL_SWITCH_RESET_TOKEN not configured".into(),
            ))
        })?;
        if token != expected {
            return Err(ZqError::Adapter(
                crate::core::errors::AdapterError::Unauthorized("invalid reset token".into()),
            ));
        }
        self.kill_switch.reset();
        self.bus.publish(
            "system.kill_switch.reset",
            Event::KillSwitch {
                active: false,
                reason: "reset".to_string(),
            },
        );
        Ok(())
    }

    /// Register the kill-switch bus commands.
    pub fn register_commands(self: &Arc<Self>) -> Result<(), ZqError> {
        let engine = Arc::clone(self);
        self.bus.register(
            "system.kill_switch.activate",
            Box::new(move |payload| {
                let reason = match payload {
                    Event::KillSwitchActivate { reason } => reason,
                    _ => "external activate command".to_string(),
                };
                engine.trip(&reason);
                Ok(Event::Ack)
            }),
        )?;

        let engine = Arc::clone(self);
        self.bus.register(
            "system.kill_switch.reset",
            Box::new(move |payload| {
                let token = match payload {
                    Event::KillSwitchReset { token } => token,
                    _ => String::new(),
                };
                engine.reset_kill_switch(&token)?;
                Ok(Event::Ack)
            }),
        )?;
        Ok(())
    }

    pub fn status(&self) -> RiskStatus {
        RiskStatus {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            rejected_orders: self.rejected_orders.load(Ordering::Relaxed),
            rejections_by_reason: self
                .rejections_by_reason
                .lock()
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            kill_switch_active: self.kill_switch.is_active(),
            daily_realized_pnl: self.daily.lock().realized_pnl,
        }
    }
}

fn day_start(ns: i64) -> i64 {
    (ns / DAY_NS) * DAY_NS
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("kill_switch", &self.kill_switch.is_active())
            .field("total_checks", &self.total_checks.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::core::types::{OrderId, OrderRequest};
    use rust_decimal_macros::dec;

    fn pair() -> TradingPair {
        TradingPair::new("BTC", "USDC")
    }

    fn order(qty: Decimal, price: Decimal) -> Order {
        let req = OrderRequest::limit(pair(), Side::Buy, qty, price);
        Order::from_request(&req, OrderId::generate())
    }

    fn view() -> AccountView {
        AccountView {
            equity: dec!(100_000),
            available: dec!(100_000),
            daily_loss: Decimal::ZERO,
            start_of_day_equity: dec!(100_000),
            position_signed_qty: Decimal::ZERO,
            pair_ref_price: dec!(50_000),
            aggregate_notional_other: Decimal::ZERO,
        }
    }

    #[test]
    fn test_evaluate_is_pure() {
        let config = RiskConfig::default();
        let order = order(dec!(0.5), dec!(50_000));
        let view = view();
        let first = evaluate(&order, &view, &config, false, true);
        let second = evaluate(&order, &view, &config, false, true);
        assert_eq!(first, second);
        assert!(first.is_ok());
    }

    #[test]
    fn test_kill_switch_rejects_everything_but_reduce_only() {
        let config = RiskConfig::default();
        let normal = order(dec!(0.1), dec!(50_000));
        assert_eq!(
            evaluate(&normal, &view(), &config, true, true),
            Err(RiskError::KillSwitchActive)
        );

        let mut closing = order(dec!(0.1), dec!(50_000));
        closing.reduce_only = true;
        let mut v = view();
        v.position_signed_qty = dec!(-0.5);
        assert!(evaluate(&closing, &v, &config, true, true).is_ok());
    }

    #[test]
    fn test_order_notional_limit() {
        let config = RiskConfig {
            max_order_notional: dec!(10_000),
            ..Default::default()
        };
        let too_big = order(dec!(1), dec!(50_000));
        match evaluate(&too_big, &view(), &config, false, true) {
            Err(RiskError::PositionSizeExceeded { limit, actual }) => {
                assert_eq!(limit, dec!(10_000));
                assert_eq!(actual, dec!(50_000));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_position_projection_respects_side() {
        let config = RiskConfig {
            max_position_per_symbol: dec!(30_000),
            ..Default::default()
        };
        // Short 1 BTC at 50k; buying 0.5 reduces exposure and must pass.
        let mut v = view();
        v.position_signed_qty = dec!(-1);
        let reducing = order(dec!(0.5), dec!(50_000));
        assert!(evaluate(&reducing, &v, &config, false, true).is_ok());

        // Buying 2 flips to +1 long = 50k notional, over the 30k cap.
        let flipping = order(dec!(2), dec!(50_000));
        assert!(matches!(
            evaluate(&flipping, &v, &config, false, true),
            Err(RiskError::PositionSizeExceeded { .. })
        ));
    }

    #[test]
    fn test_leverage_projection() {
        let config = RiskConfig {
            max_leverage: dec!(2),
            max_order_notional: Decimal::ZERO,
            max_position_size: Decimal::ZERO,
            max_position_per_symbol: Decimal::ZERO,
            ..Default::default()
        };
        let mut v = view();
        v.equity = dec!(10_000);
        v.available = dec!(100_000);
        // 1 BTC * 50k = 5x leverage on 10k equity.
        let levered = order(dec!(1), dec!(50_000));
        match evaluate(&levered, &v, &config, false, true) {
            Err(RiskError::LeverageExceeded { limit, actual }) => {
                assert_eq!(limit, dec!(2));
                assert_eq!(actual, dec!(5));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_daily_loss_detail() {
        let config = RiskConfig {
            max_daily_loss: dec!(1_000),
            ..Default::default()
        };
        let mut v = view();
        v.daily_loss = dec!(1_100);
        match evaluate(&order(dec!(0.01), dec!(50_000)), &v, &config, false, true) {
            Err(RiskError::DailyLossExceeded { limit, actual }) => {
                assert_eq!(limit, dec!(1_000));
                assert_eq!(actual, dec!(1_100));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rate_limit_rejection() {
        let config = RiskConfig::default();
        assert_eq!(
            evaluate(&order(dec!(0.01), dec!(50_000)), &view(), &config, false, false),
            Err(RiskError::OrderRateExceeded { limit: 120 })
        );
    }

    #[test]
    fn test_margin_check() {
        let config = RiskConfig {
            max_leverage: dec!(10),
            ..Default::default()
        };
        let mut v = view();
        v.available = dec!(100);
        // 0.5 BTC * 50k / 10x = 2500 required margin, only 100 available.
        match evaluate(&order(dec!(0.5), dec!(50_000)), &v, &config, false, true) {
            Err(RiskError::InsufficientMargin {
                required,
                available,
            }) => {
                assert_eq!(required, dec!(2500));
                assert_eq!(available, dec!(100));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_engine_counters() {
        let bus = MessageBus::new();
        let cache = Arc::new(Cache::new(
            bus.clone(),
            CacheConfig {
                enable_notifications: false,
                ..Default::default()
            },
        ));
        let engine = RiskEngine::new(
            bus,
            cache,
            RiskConfig {
                max_daily_loss: dec!(1_000),
                kill_switch_threshold: Decimal::ZERO,
                ..Default::default()
            },
        );
        engine.note_realized_pnl(dec!(-1_100));

        let result = engine.check(&order(dec!(0.01), dec!(50_000)));
        assert!(matches!(result, Err(RiskError::DailyLossExceeded { .. })));

        let status = engine.status();
        assert_eq!(status.total_checks, 1);
        assert_eq!(status.rejected_orders, 1);
        assert_eq!(
            status.rejections_by_reason.get("daily_loss_exceeded"),
            Some(&1)
        );
    }

    #[test]
    fn test_auto_trip_on_threshold() {
        let bus = MessageBus::new();
        let cache = Arc::new(Cache::new(
            bus.clone(),
            CacheConfig {
                enable_notifications: false,
                ..Default::default()
            },
        ));
        let engine = RiskEngine::new(
            bus,
            cache,
            RiskConfig {
                kill_switch_threshold: dec!(500),
                ..Default::default()
            },
        );
        assert!(!engine.kill_switch().is_active());
        engine.note_realized_pnl(dec!(-600));
        assert!(engine.kill_switch().is_active());
    }
}
