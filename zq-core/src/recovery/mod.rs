//! Recovery manager: periodic checkpoints and restart reconciliation
//!
//! Writes CRC-protected binary snapshots (`checkpoint_<ts>.bin`) of the
//! account, open positions, and every order that is pending or was live
//! within the last checkpoint cycle. On restart the newest valid snapshot
//! restores the cache, then (by default) local state is reconciled with
//! the exchange:
//!
//! - local-only orders absent at the venue are marked expired (or
//!   resubmitted when configured)
//! - venue-only orders are cancelled (`cancel_orphan_orders`) or adopted
//!   under a fresh client order id with `order.adopted`
//! - position size mismatches are overwritten from the venue with
//!   `position.reconciled`
//!
//! If the reconciliation issue count exceeds the configured bound the kill
//! switch trips: trading on unreconcilable state is worse than halting.

pub mod checkpoint;

pub use checkpoint::{AccountState, Checkpoint, OrderState, PositionState, CHECKPOINT_VERSION};

use crate::adapter::ExecutionClient;
use crate::bus::{Event, MessageBus};
use crate::cache::Cache;
use crate::core::errors::Result;
use crate::core::types::{
    Balance, Order, OrderId, OrderStatus, Position, TimeInForce, TradingPair,
};
use crate::core::Timestamp;
use crate::execution::ExecutionEngine;
use crate::resilience::ShutdownToken;
use crate::risk::RiskEngine;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Checkpoint directory; `CHECKPOINT_DIR` overrides the default.
    pub dir: PathBuf,
    pub interval: Duration,
    /// Also checkpoint soon after an order reaches a terminal state.
    pub checkpoint_on_terminal: bool,
    /// Retention: keep the newest N ...
    pub keep: usize,
    /// ... plus anything younger than this.
    pub max_age_hours: u64,
    pub sync_with_exchange: bool,
    pub cancel_orphan_orders: bool,
    /// Resubmit local-only orders instead of expiring them.
    pub resubmit_stale: bool,
    /// Reconciliation issues beyond this trip the kill switch.
    pub max_reconcile_issues: u32,
    /// Asset whose balance backs the AccountState.
    pub equity_asset: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        let dir = std::env::var("CHECKPOINT_DIR").unwrap_or_else(|_| "./checkpoints".to_string());
        Self {
            dir: PathBuf::from(dir),
            interval: Duration::from_secs(60),
            checkpoint_on_terminal: true,
            keep: 10,
            max_age_hours: 24,
            sync_with_exchange: true,
            cancel_orphan_orders: true,
            resubmit_stale: false,
            max_reconcile_issues: 5,
            equity_asset: "USDC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStatus {
    Success,
    NoCheckpoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub orphan: u32,
    pub stale: u32,
    pub mismatches: u32,
}

impl SyncReport {
    pub fn issues(&self) -> u32 {
        self.orphan + self.stale + self.mismatches
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub status: RecoveryStatus,
    pub positions_restored: u32,
    pub orders_restored: u32,
    pub sync: Option<SyncReport>,
}

pub struct RecoveryManager {
    bus: MessageBus,
    cache: Arc<Cache>,
    execution: Arc<ExecutionEngine>,
    client: Arc<dyn ExecutionClient>,
    risk: Arc<RiskEngine>,
    config: RecoveryConfig,
    dirty: AtomicBool,
    shutdown: ShutdownToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RecoveryManager {
    pub fn new(
        bus: MessageBus,
        cache: Arc<Cache>,
        execution: Arc<ExecutionEngine>,
        client: Arc<dyn ExecutionClient>,
        risk: Arc<RiskEngine>,
        config: RecoveryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            cache,
            execution,
            client,
            risk,
            config,
            dirty: AtomicBool::new(false),
            shutdown: ShutdownToken::new(),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    // -- snapshotting -------------------------------------------------------

    /// Build the current snapshot from cache + pending orders.
    pub fn snapshot(&self) -> Checkpoint {
        let balances = self.cache.balances();
        let positions = self.cache.positions();
        let unrealized: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
        let margin_used: Decimal = positions.iter().map(|p| p.margin_used).sum();
        let equity_balance = balances
            .iter()
            .find(|b| b.asset == self.config.equity_asset);

        let account = AccountState {
            equity: equity_balance
                .map(|b| b.total + unrealized)
                .unwrap_or(unrealized),
            balance: equity_balance.map(|b| b.total).unwrap_or_default(),
            available: equity_balance.map(|b| b.available).unwrap_or_default(),
            margin_used,
            unrealized_pnl: unrealized,
        };

        let position_states = positions.iter().map(position_to_state).collect();

        // Orders: everything still live, plus terminal orders younger than
        // one checkpoint cycle (they are destroyed only after surviving a
        // full cycle in terminal state).
        let cutoff_ns =
            Timestamp::now().as_ns() - self.config.interval.as_nanos() as i64;
        let order_states = self
            .cache
            .orders()
            .iter()
            .filter(|o| !o.status.is_terminal() || o.updated_at.as_ns() >= cutoff_ns)
            .map(order_to_state)
            .collect();

        Checkpoint::new(account, position_states, order_states)
    }

    /// Write one checkpoint file, prune retention, and drop terminal
    /// orders that have now survived a full cycle.
    pub fn checkpoint(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.config.dir)?;
        let snapshot = self.snapshot();
        let path = self
            .config
            .dir
            .join(format!("checkpoint_{}.bin", snapshot.timestamp_ns));
        std::fs::write(&path, snapshot.encode())?;
        debug!(path = %path.display(), orders = snapshot.orders.len(), "checkpoint written");

        self.prune()?;
        self.sweep_terminal_orders(snapshot.timestamp_ns);
        Ok(path)
    }

    fn sweep_terminal_orders(&self, now_ns: i64) {
        let cutoff = now_ns - self.config.interval.as_nanos() as i64;
        for order in self.cache.orders() {
            if order.status.is_terminal() && order.updated_at.as_ns() < cutoff {
                self.cache.remove_order(&order.client_order_id);
            }
        }
    }

    fn prune(&self) -> Result<()> {
        let mut files = self.list_checkpoints()?;
        // Newest first.
        files.sort_by(|a, b| b.1.cmp(&a.1));
        let min_ts =
            Timestamp::now().as_ns() - self.config.max_age_hours as i64 * 3_600_000_000_000;
        for (index, (path, ts)) in files.iter().enumerate() {
            if index < self.config.keep || *ts >= min_ts {
                continue;
            }
            if let Err(err) = std::fs::remove_file(path) {
                warn!(path = %path.display(), %err, "failed to prune checkpoint");
            }
        }
        Ok(())
    }

    fn list_checkpoints(&self) -> Result<Vec<(PathBuf, i64)>> {
        let mut files = Vec::new();
        let entries = match std::fs::read_dir(&self.config.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if let Some(ts) = parse_checkpoint_ts(&path) {
                files.push((path, ts));
            }
        }
        Ok(files)
    }

    /// Newest checkpoint whose CRC validates; corrupt files are skipped.
    pub fn load_latest(&self) -> Result<Option<Checkpoint>> {
        let mut files = self.list_checkpoints()?;
        files.sort_by(|a, b| b.1.cmp(&a.1));
        for (path, _) in files {
            let data = std::fs::read(&path)?;
            match Checkpoint::decode(&data) {
                Ok(checkpoint) => {
                    info!(path = %path.display(), "loaded checkpoint");
                    return Ok(Some(checkpoint));
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "ignoring invalid checkpoint");
                }
            }
        }
        Ok(None)
    }

    // -- recovery -----------------------------------------------------------

    /// Restore from the newest valid checkpoint and reconcile with the
    /// exchange.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let Some(checkpoint) = self.load_latest()? else {
            info!("no checkpoint found, starting clean");
            return Ok(RecoveryReport {
                status: RecoveryStatus::NoCheckpoint,
                positions_restored: 0,
                orders_restored: 0,
                sync: None,
            });
        };

        // Restore balances, positions, orders.
        let locked = (checkpoint.account.balance - checkpoint.account.available)
            .max(Decimal::ZERO);
        let balance = Balance {
            asset: self.config.equity_asset.clone(),
            total: checkpoint.account.balance,
            available: checkpoint.account.balance - locked,
            locked,
            ts: Timestamp::from_ns(checkpoint.timestamp_ns),
        };
        if balance.total > Decimal::ZERO {
            self.cache.update_balance(balance)?;
        }

        let mut positions_restored = 0;
        for state in &checkpoint.positions {
            match state_to_position(state) {
                Ok(position) => {
                    self.cache.update_position(position)?;
                    positions_restored += 1;
                }
                Err(err) => warn!(%err, "skipping unrestorable position"),
            }
        }

        let mut orders_restored = 0;
        for state in &checkpoint.orders {
            match state_to_order(state) {
                Ok(order) => {
                    self.cache.update_order(order)?;
                    orders_restored += 1;
                }
                Err(err) => warn!(%err, "skipping unrestorable order"),
            }
        }
        info!(positions_restored, orders_restored, "checkpoint state restored");

        let sync = if self.config.sync_with_exchange {
            let report = self.sync_with_exchange()?;
            if report.issues() > self.config.max_reconcile_issues {
                self.risk.trip(&format!(
                    "recovery reconciliation found {} issues (max {})",
                    report.issues(),
                    self.config.max_reconcile_issues
                ));
            }
            Some(report)
        } else {
            None
        };

        Ok(RecoveryReport {
            status: RecoveryStatus::Success,
            positions_restored,
            orders_restored,
            sync,
        })
    }

    fn sync_with_exchange(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let exchange_orders = self.client.fetch_open_orders()?;
        let exchange_positions = self.client.fetch_positions()?;

        // Local active orders the exchange does not know.
        for local in self.cache.active_orders() {
            let known = exchange_orders
                .iter()
                .any(|remote| remote.client_order_id == local.client_order_id);
            if known {
                continue;
            }
            report.stale += 1;
            if self.config.resubmit_stale && !local.status.is_terminal() {
                info!(order = %local.client_order_id, "resubmitting stale order");
                let request = crate::core::types::OrderRequest {
                    pair: local.pair.clone(),
                    side: local.side,
                    order_type: local.order_type,
                    qty: local.remaining_qty,
                    price: local.price,
                    stop_price: local.stop_price,
                    trigger_price: local.trigger_price,
                    tif: local.tif,
                    reduce_only: local.reduce_only,
                };
                if let Err(err) = self.execution.submit(request) {
                    warn!(order = %local.client_order_id, %err, "stale resubmit failed");
                }
            }
            let mut expired = local.clone();
            expired.status = OrderStatus::Expired;
            expired.updated_at = Timestamp::now();
            self.cache.update_order(expired.clone())?;
            self.bus
                .publish("order.expired", Event::Order(Box::new(expired)));
        }

        // Exchange orders with no local record.
        for remote in &exchange_orders {
            let known = self.cache.order(&remote.client_order_id).is_some();
            if known {
                continue;
            }
            report.orphan += 1;
            if self.config.cancel_orphan_orders {
                info!(order = %remote.client_order_id, "cancelling orphan exchange order");
                if let Err(err) = self.client.cancel(remote) {
                    warn!(order = %remote.client_order_id, %err, "orphan cancel failed");
                }
            } else {
                let mut adopted = remote.clone();
                adopted.client_order_id = OrderId::generate();
                info!(
                    exchange_order = ?remote.exchange_order_id,
                    adopted_as = %adopted.client_order_id,
                    "adopting orphan exchange order"
                );
                self.cache.update_order(adopted.clone())?;
                self.bus
                    .publish("order.adopted", Event::Order(Box::new(adopted)));
            }
        }

        // Position sizes: the exchange wins.
        for remote in &exchange_positions {
            match self.cache.position(&remote.pair) {
                Some(local) if local.size == remote.size && local.side == remote.side => {}
                _ => {
                    report.mismatches += 1;
                    self.cache.update_position(remote.clone())?;
                    self.bus.publish(
                        &format!("position.reconciled.{}", remote.pair),
                        Event::PositionUpdate(remote.clone()),
                    );
                }
            }
        }
        for local in self.cache.positions() {
            let known = exchange_positions.iter().any(|p| p.pair == local.pair);
            if !known {
                report.mismatches += 1;
                self.cache.remove_position(&local.pair);
                self.bus.publish(
                    &format!("position.reconciled.{}", local.pair),
                    Event::PositionUpdate(local),
                );
            }
        }

        info!(
            orphan = report.orphan,
            stale = report.stale,
            mismatches = report.mismatches,
            "exchange reconciliation finished"
        );
        Ok(report)
    }

    // -- background cadence -------------------------------------------------

    /// Start periodic checkpointing; also reacts to `order.snapshot`
    /// events so terminal transitions coalesce into an early checkpoint.
    pub fn start(self: &Arc<Self>) {
        if self.config.checkpoint_on_terminal {
            let manager = Arc::clone(self);
            self.bus.subscribe(
                "order.snapshot",
                Box::new(move |_, event| {
                    if let Event::Order(order) = event {
                        if order.status.is_terminal() {
                            manager.dirty.store(true, Ordering::Release);
                        }
                    }
                    Ok(())
                }),
            );
        }

        let manager = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("recovery-checkpointer".into())
            .spawn(move || {
                let tick = Duration::from_millis(500);
                let mut elapsed = Duration::ZERO;
                loop {
                    if manager.shutdown.wait_timeout(tick) {
                        break;
                    }
                    elapsed += tick;
                    let due = elapsed >= manager.config.interval
                        || manager.dirty.swap(false, Ordering::AcqRel);
                    if due {
                        elapsed = Duration::ZERO;
                        if let Err(err) = manager.checkpoint() {
                            warn!(%err, "periodic checkpoint failed");
                        }
                    }
                }
                debug!("recovery checkpointer stopped");
            })
            .expect("failed to spawn recovery thread");
        *self.worker.lock() = Some(handle);
    }

    /// Stop the cadence and flush one final checkpoint.
    pub fn stop(&self) {
        self.shutdown.stop();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        if let Err(err) = self.checkpoint() {
            warn!(%err, "final checkpoint failed");
        }
    }
}

impl std::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("dir", &self.config.dir)
            .finish()
    }
}

fn parse_checkpoint_ts(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    let ts = name.strip_prefix("checkpoint_")?.strip_suffix(".bin")?;
    ts.parse().ok()
}

fn position_to_state(position: &Position) -> PositionState {
    PositionState {
        id: format!("pos-{}", position.pair),
        symbol: position.pair.to_string(),
        side: position.side,
        qty: position.size,
        entry_price: position.entry_price,
        unrealized_pnl: position.unrealized_pnl,
        opened_at_ns: position.opened_at.as_ns(),
    }
}

fn state_to_position(state: &PositionState) -> Result<Position> {
    Ok(Position {
        pair: TradingPair::from_str(&state.symbol)?,
        side: state.side,
        size: state.qty,
        entry_price: state.entry_price,
        mark_price: None,
        liquidation_price: None,
        unrealized_pnl: state.unrealized_pnl,
        leverage: Decimal::ONE,
        margin_used: Decimal::ZERO,
        opened_at: Timestamp::from_ns(state.opened_at_ns),
    })
}

fn order_to_state(order: &Order) -> OrderState {
    OrderState {
        client_order_id: order.client_order_id.to_string(),
        symbol: order.pair.to_string(),
        side: order.side,
        order_type: order.order_type,
        qty: order.qty,
        filled_qty: order.filled_qty,
        price: order.price,
        status: order.status,
        created_at_ns: order.created_at.as_ns(),
    }
}

fn state_to_order(state: &OrderState) -> Result<Order> {
    let restored_at = Timestamp::now();
    Ok(Order {
        client_order_id: OrderId::new(state.client_order_id.clone()),
        exchange_order_id: None,
        pair: TradingPair::from_str(&state.symbol)?,
        side: state.side,
        order_type: state.order_type,
        tif: TimeInForce::Gtc,
        qty: state.qty,
        filled_qty: state.filled_qty,
        remaining_qty: state.qty - state.filled_qty,
        price: state.price,
        stop_price: None,
        trigger_price: None,
        reduce_only: false,
        status: state.status,
        avg_fill_price: None,
        total_fee: Decimal::ZERO,
        created_at: Timestamp::from_ns(state.created_at_ns),
        submitted_at: None,
        updated_at: restored_at,
        filled_at: None,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_checkpoint_ts() {
        assert_eq!(
            parse_checkpoint_ts(Path::new("/tmp/checkpoint_1700000000.bin")),
            Some(1_700_000_000)
        );
        assert_eq!(parse_checkpoint_ts(Path::new("/tmp/other.bin")), None);
        assert_eq!(parse_checkpoint_ts(Path::new("/tmp/checkpoint_x.bin")), None);
    }

    #[test]
    fn test_state_conversions_round_trip() {
        use crate::core::types::{OrderRequest, Side};
        use rust_decimal_macros::dec;

        let req = OrderRequest::limit(
            TradingPair::new("BTC", "USDC"),
            Side::Buy,
            dec!(0.5),
            dec!(50_000),
        );
        let order = Order::from_request(&req, OrderId::new("abc"));
        let state = order_to_state(&order);
        let restored = state_to_order(&state).unwrap();
        assert_eq!(restored.client_order_id, order.client_order_id);
        assert_eq!(restored.pair, order.pair);
        assert_eq!(restored.qty, order.qty);
        assert_eq!(restored.price, order.price);
        assert_eq!(restored.status, order.status);
        restored.check_invariants().unwrap();
    }
}
