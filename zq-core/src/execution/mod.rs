//! Execution engine: pre-tracked order submission with an audit trail
//!
//! The defining behaviour is pre-tracking: an order is inserted into the
//! local pending map, journalled, written to the cache and announced on
//! `order.pending` before any network call. A submission-path crash can
//! then never lose an order.
//!
//! Submit pipeline:
//!
//! ```text
//! validate -> local limits -> pre-track -> risk check -> adapter submit
//!                                           |               |
//!                                     order.rejected    retry on Timeout /
//!                                     risk.rejection    RateLimit (1s, 2s, ...)
//! ```
//!
//! Reconciliation: the adapter's order-update stream (`adapter.*` topics)
//! and the synchronous ack both commit through the same per-id path, so
//! whichever arrives first wins and the other becomes a no-op. Status
//! regression (filled back to open) is refused at commit time, which also
//! makes duplicate stream deliveries harmless.
//!
//! Locking: `pending_orders` sits behind a single mutex; every transition
//! happens under it, and adapter calls are made outside it with cloned
//! order data (double-check on commit for concurrent cancellation).

pub mod journal;

pub use journal::{AsyncJournal, JournalEvent};

use crate::adapter::{ExchangeAck, ExecutionClient};
use crate::bus::{Event, MessageBus, OrderUpdate};
use crate::cache::Cache;
use crate::core::errors::{BusinessError, Result, RiskError, ZqError};
use crate::core::types::{
    CancelFilter, Fill, Order, OrderChanges, OrderId, OrderRequest, OrderStatus,
};
use crate::core::Timestamp;
use crate::resilience::{BackoffConfig, ExponentialBackoff, ShutdownToken};
use crate::risk::RiskEngine;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Retries after the initial attempt for retryable adapter failures.
    pub max_retries: usize,
    /// First retry delay; doubles each attempt.
    pub retry_base: Duration,
    pub max_open_orders: usize,
    pub max_open_orders_per_pair: usize,
    /// JSONL audit journal; disabled when `None`.
    pub journal_path: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base: Duration::from_secs(1),
            max_open_orders: 100,
            max_open_orders_per_pair: 20,
            journal_path: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ExecutionStats {
    pub submitted: AtomicU64,
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub cancelled: AtomicU64,
    pub filled: AtomicU64,
    pub retries: AtomicU64,
    pub overfills: AtomicU64,
}

/// Outcome of `cancel_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelAllReport {
    pub cancelled: u32,
    pub failed: u32,
}

/// Outcome of `recover`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingRecoveryReport {
    pub promoted: u32,
    pub expired: u32,
}

pub struct ExecutionEngine {
    bus: MessageBus,
    cache: Arc<Cache>,
    risk: Arc<RiskEngine>,
    client: Arc<dyn ExecutionClient>,
    pending: Mutex<HashMap<OrderId, Order>>,
    config: ExecutionConfig,
    stats: ExecutionStats,
    journal: Option<AsyncJournal>,
    shutdown: ShutdownToken,
}

impl ExecutionEngine {
    pub fn new(
        bus: MessageBus,
        cache: Arc<Cache>,
        risk: Arc<RiskEngine>,
        client: Arc<dyn ExecutionClient>,
        config: ExecutionConfig,
    ) -> Arc<Self> {
        let journal = config.journal_path.as_ref().and_then(|path| {
            match AsyncJournal::new(path.clone()) {
                Ok(journal) => Some(journal),
                Err(err) => {
                    warn!(%err, "order journal disabled");
                    None
                }
            }
        });
        Arc::new(Self {
            bus,
            cache,
            risk,
            client,
            pending: Mutex::new(HashMap::new()),
            config,
            stats: ExecutionStats::default(),
            journal,
            shutdown: ShutdownToken::new(),
        })
    }

    pub fn stats(&self) -> &ExecutionStats {
        &self.stats
    }

    pub fn cache(&self) -> Arc<Cache> {
        Arc::clone(&self.cache)
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn journal(&self, event: JournalEvent) {
        if let Some(journal) = &self.journal {
            journal.record(event);
        }
    }

    fn lifecycle_topic(status: OrderStatus) -> &'static str {
        match status {
            OrderStatus::Pending => "order.pending",
            OrderStatus::Submitted => "order.submitted",
            OrderStatus::Open | OrderStatus::PartiallyFilled => "order.accepted",
            OrderStatus::Filled => "order.filled",
            OrderStatus::Canceled => "order.canceled",
            OrderStatus::Rejected => "order.rejected",
            OrderStatus::Triggered => "order.triggered",
            OrderStatus::Expired => "order.expired",
            OrderStatus::MarginCanceled => "order.margin_canceled",
        }
    }

    fn publish_lifecycle(&self, order: &Order, topic: &str) {
        self.bus.publish(topic, Event::Order(Box::new(order.clone())));
        // Coalesced checkpointing listens on this single topic.
        self.bus
            .publish("order.snapshot", Event::Order(Box::new(order.clone())));
    }

    /// Incoming adapter statuses use the canonical partial-fill form.
    fn normalize_status(status: OrderStatus, remaining: rust_decimal::Decimal) -> OrderStatus {
        match status {
            OrderStatus::PartiallyFilled if remaining > rust_decimal::Decimal::ZERO => {
                OrderStatus::Open
            }
            OrderStatus::PartiallyFilled => OrderStatus::Filled,
            other => other,
        }
    }

    // -- submit ------------------------------------------------------------

    /// Submit an order. Returns the client order id once the venue has
    /// acknowledged it (or the stream promoted it first); risk rejections
    /// and non-retryable adapter failures surface as errors with the order
    /// left terminal-rejected in the cache.
    pub fn submit(&self, request: OrderRequest) -> Result<OrderId> {
        request.validate()?;
        self.check_local_limits(&request)?;

        let client_order_id = OrderId::generate();
        let order = Order::from_request(&request, client_order_id.clone());

        // Pre-track before any network call.
        {
            let mut pending = self.pending.lock();
            pending.insert(client_order_id.clone(), order.clone());
        }
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.journal(JournalEvent::OrderSubmit(Box::new(order.clone())));
        self.cache.update_order(order.clone())?;
        self.publish_lifecycle(&order, "order.pending");

        // Risk gate.
        if let Err(risk_err) = self.risk.check(&order) {
            self.reject(&client_order_id, &risk_err.to_string());
            self.bus.publish(
                "risk.rejection",
                Event::RiskRejection {
                    client_order_id: client_order_id.clone(),
                    error: risk_err.clone(),
                },
            );
            return Err(ZqError::Risk(risk_err));
        }

        // Adapter call with retry; the order stays pending throughout and
        // the strategy is not re-notified between attempts.
        let mut backoff = ExponentialBackoff::new(BackoffConfig::submit_retry(
            self.config.max_retries,
            self.config.retry_base,
        ));
        loop {
            match self.client.submit(&order) {
                Ok(ack) => {
                    self.commit_ack(&client_order_id, ack);
                    return Ok(client_order_id);
                }
                Err(err) if err.is_retryable() => {
                    // The stream may have resolved the order meanwhile.
                    if !self.pending.lock().contains_key(&client_order_id) {
                        debug!(order = %client_order_id, "order resolved by stream during retry");
                        return Ok(client_order_id);
                    }
                    match backoff.next_delay() {
                        Some(delay) => {
                            self.stats.retries.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                order = %client_order_id,
                                attempt = backoff.attempt(),
                                delay_ms = delay.as_millis() as u64,
                                %err,
                                "retrying submit"
                            );
                            if self.shutdown.wait_timeout(delay) {
                                self.reject(&client_order_id, "shutdown during submit retry");
                                return Err(err);
                            }
                        }
                        None => {
                            self.reject(&client_order_id, &err.to_string());
                            return Err(err);
                        }
                    }
                }
                Err(err) => {
                    self.reject(&client_order_id, &err.to_string());
                    return Err(err);
                }
            }
        }
    }

    fn check_local_limits(&self, request: &OrderRequest) -> Result<()> {
        let active = self.cache.active_orders();
        if active.len() >= self.config.max_open_orders {
            return Err(ZqError::Risk(RiskError::OrderRateExceeded {
                limit: self.config.max_open_orders as u32,
            }));
        }
        let per_pair = active.iter().filter(|o| o.pair == request.pair).count();
        if per_pair >= self.config.max_open_orders_per_pair {
            return Err(ZqError::Risk(RiskError::OrderRateExceeded {
                limit: self.config.max_open_orders_per_pair as u32,
            }));
        }
        Ok(())
    }

    /// Commit a synchronous ack. Idempotent: if the streaming path already
    /// promoted the order this only backfills the exchange id.
    fn commit_ack(&self, client_order_id: &OrderId, ack: ExchangeAck) {
        let committed = {
            let mut pending = self.pending.lock();
            match pending.remove(client_order_id) {
                Some(mut order) => {
                    let now = Timestamp::now();
                    order.exchange_order_id = Some(ack.exchange_order_id.clone());
                    order.submitted_at = Some(now);
                    order.updated_at = now;
                    let status = Self::normalize_status(ack.status, order.remaining_qty);
                    order.status = if status.rank() < OrderStatus::Submitted.rank() {
                        OrderStatus::Submitted
                    } else {
                        status
                    };
                    Some(order)
                }
                None => None,
            }
        };

        match committed {
            Some(order) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                self.journal(JournalEvent::OrderAck {
                    client_order_id: client_order_id.clone(),
                    exchange_order_id: ack.exchange_order_id,
                });
                if let Err(err) = self.cache.update_order(order.clone()) {
                    warn!(order = %client_order_id, %err, "ack commit rejected by cache");
                    return;
                }
                self.publish_lifecycle(&order, "order.submitted");
                if matches!(order.status, OrderStatus::Open) {
                    self.publish_lifecycle(&order, "order.accepted");
                }
            }
            None => {
                // Promoted (or cancelled) while the call was in flight; make
                // sure the exchange id is recorded, nothing else.
                if let Some(mut order) = self.cache.order(client_order_id) {
                    if order.exchange_order_id.is_none() {
                        order.exchange_order_id = Some(ack.exchange_order_id);
                        let _ = self.cache.update_order(order);
                    }
                }
            }
        }
    }

    fn reject(&self, client_order_id: &OrderId, reason: &str) {
        let rejected = {
            let mut pending = self.pending.lock();
            pending.remove(client_order_id).map(|mut order| {
                order.status = OrderStatus::Rejected;
                order.error = Some(reason.to_string());
                order.updated_at = Timestamp::now();
                order
            })
        };
        if let Some(order) = rejected {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            self.journal(JournalEvent::OrderReject {
                client_order_id: client_order_id.clone(),
                reason: reason.to_string(),
            });
            if let Err(err) = self.cache.update_order(order.clone()) {
                warn!(order = %client_order_id, %err, "reject commit rejected by cache");
            }
            self.publish_lifecycle(&order, "order.rejected");
        }
    }

    // -- cancel / modify / query -------------------------------------------

    pub fn cancel(&self, client_order_id: &OrderId) -> Result<()> {
        // Still pending locally: call the venue outside the lock with a
        // clone, then commit the removal under it. A cancel failure leaves
        // the order pending; a concurrent stream resolution wins the race.
        let pending_order = self.pending.lock().get(client_order_id).cloned();
        if let Some(mut order) = pending_order {
            if order.exchange_order_id.is_some() {
                self.client.cancel(&order)?;
            }
            let still_pending = self.pending.lock().remove(client_order_id).is_some();
            if !still_pending {
                // Resolved by the stream while we were cancelling.
                return Ok(());
            }
            order.status = OrderStatus::Canceled;
            order.updated_at = Timestamp::now();
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            self.journal(JournalEvent::OrderCancel(client_order_id.clone()));
            self.cache.update_order(order.clone())?;
            self.publish_lifecycle(&order, "order.canceled");
            return Ok(());
        }

        let mut order = self
            .cache
            .order(client_order_id)
            .ok_or_else(|| {
                ZqError::Business(BusinessError::OrderNotFound(client_order_id.to_string()))
            })?;
        if order.status.is_terminal() {
            return Err(ZqError::Business(BusinessError::InvalidOrderStatus {
                id: client_order_id.to_string(),
                status: order.status.to_string(),
            }));
        }

        self.client.cancel(&order)?;
        order.status = OrderStatus::Canceled;
        order.updated_at = Timestamp::now();
        self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        self.journal(JournalEvent::OrderCancel(client_order_id.clone()));
        self.cache.update_order(order.clone())?;
        self.publish_lifecycle(&order, "order.canceled");
        Ok(())
    }

    /// Cancel all active orders, optionally filtered by pair/side/status.
    pub fn cancel_all(&self, filter: &CancelFilter) -> CancelAllReport {
        let targets: Vec<OrderId> = {
            let pending = self.pending.lock();
            let mut ids: Vec<OrderId> = pending
                .values()
                .filter(|o| filter.matches(o))
                .map(|o| o.client_order_id.clone())
                .collect();
            for order in self.cache.active_orders() {
                if filter.matches(&order) && !ids.contains(&order.client_order_id) {
                    ids.push(order.client_order_id.clone());
                }
            }
            ids
        };

        let mut report = CancelAllReport {
            cancelled: 0,
            failed: 0,
        };
        for id in targets {
            match self.cancel(&id) {
                Ok(()) => report.cancelled += 1,
                Err(err) => {
                    warn!(order = %id, %err, "cancel-all: cancel failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            cancelled = report.cancelled,
            failed = report.failed,
            "cancel-all finished"
        );
        report
    }

    pub fn modify(&self, client_order_id: &OrderId, changes: &OrderChanges) -> Result<()> {
        let mut order = self
            .get(client_order_id)
            .ok_or_else(|| {
                ZqError::Business(BusinessError::OrderNotFound(client_order_id.to_string()))
            })?;
        if order.status.is_terminal() {
            return Err(ZqError::Business(BusinessError::InvalidOrderStatus {
                id: client_order_id.to_string(),
                status: order.status.to_string(),
            }));
        }
        if let Some(new_qty) = changes.qty {
            if new_qty <= order.filled_qty {
                return Err(ZqError::Business(BusinessError::InvalidQuantity(new_qty)));
            }
        }

        let ack = self.client.modify(&order, changes)?;
        if let Some(price) = changes.price {
            order.price = Some(price);
        }
        if let Some(qty) = changes.qty {
            order.qty = qty;
            order.remaining_qty = qty - order.filled_qty;
        }
        if let Some(tif) = changes.tif {
            order.tif = tif;
        }
        order.exchange_order_id = Some(ack.exchange_order_id);
        order.updated_at = Timestamp::now();

        {
            let mut pending = self.pending.lock();
            if let Some(entry) = pending.get_mut(client_order_id) {
                *entry = order.clone();
            }
        }
        self.cache.update_order(order.clone())?;
        self.publish_lifecycle(&order, "order.modified");
        Ok(())
    }

    /// Pending map first, then the cache.
    pub fn get(&self, client_order_id: &OrderId) -> Option<Order> {
        if let Some(order) = self.pending.lock().get(client_order_id) {
            return Some(order.clone());
        }
        self.cache.order(client_order_id)
    }

    /// Re-sync locally pending orders against the venue's open orders:
    /// present there gets promoted, absent gets expired.
    pub fn recover(&self) -> Result<PendingRecoveryReport> {
        let open = self.client.fetch_open_orders()?;
        let mut report = PendingRecoveryReport::default();

        let stuck: Vec<Order> = self.pending.lock().values().cloned().collect();
        for order in stuck {
            match open
                .iter()
                .find(|o| o.client_order_id == order.client_order_id)
            {
                Some(remote) => {
                    self.commit_ack(
                        &order.client_order_id,
                        ExchangeAck {
                            exchange_order_id: remote
                                .exchange_order_id
                                .clone()
                                .unwrap_or_default(),
                            status: remote.status,
                        },
                    );
                    report.promoted += 1;
                }
                None => {
                    let expired = {
                        let mut pending = self.pending.lock();
                        pending.remove(&order.client_order_id).map(|mut o| {
                            o.status = OrderStatus::Expired;
                            o.updated_at = Timestamp::now();
                            o
                        })
                    };
                    if let Some(order) = expired {
                        self.cache.update_order(order.clone())?;
                        self.publish_lifecycle(&order, "order.expired");
                        report.expired += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    // -- stream reconciliation ---------------------------------------------

    /// Apply one exchange-reported order update. Safe to call with
    /// duplicates and regardless of whether the synchronous ack arrived.
    pub fn on_order_update(&self, update: &OrderUpdate) {
        let promoted = {
            let mut pending = self.pending.lock();
            match pending.remove(&update.client_order_id) {
                Some(mut order) => {
                    order.exchange_order_id = update
                        .exchange_order_id
                        .clone()
                        .or(order.exchange_order_id);
                    if let Some(filled) = update.filled_qty {
                        order.filled_qty = filled.min(order.qty);
                        order.remaining_qty = order.qty - order.filled_qty;
                    }
                    if update.avg_fill_price.is_some() {
                        order.avg_fill_price = update.avg_fill_price;
                    }
                    let status = Self::normalize_status(update.status, order.remaining_qty);
                    order.status = status;
                    order.updated_at = update.ts;
                    if matches!(status, OrderStatus::Filled) {
                        order.filled_at = Some(update.ts);
                    }
                    Some(order)
                }
                None => None,
            }
        };

        if let Some(order) = promoted {
            debug!(order = %order.client_order_id, status = %order.status, "pending order promoted by stream");
            if self.cache.update_order(order.clone()).is_ok() {
                self.publish_lifecycle(&order, Self::lifecycle_topic(order.status));
            }
            return;
        }

        let Some(mut order) = self.cache.order(&update.client_order_id) else {
            debug!(order = %update.client_order_id, "update for unknown order ignored");
            return;
        };

        let status = Self::normalize_status(update.status, order.remaining_qty);
        if order.status.is_terminal() || status.rank() < order.status.rank() {
            // Duplicate or regressing delivery; the dedup law says no-op.
            return;
        }
        order.exchange_order_id = update
            .exchange_order_id
            .clone()
            .or(order.exchange_order_id);
        if let Some(filled) = update.filled_qty {
            order.filled_qty = filled.min(order.qty);
            order.remaining_qty = order.qty - order.filled_qty;
        }
        if update.avg_fill_price.is_some() {
            order.avg_fill_price = update.avg_fill_price;
        }
        let changed = order.status != status || update.filled_qty.is_some();
        order.status = status;
        order.updated_at = update.ts;
        if matches!(status, OrderStatus::Filled) {
            order.filled_at = Some(update.ts);
        }
        if changed && self.cache.update_order(order.clone()).is_ok() {
            self.publish_lifecycle(&order, Self::lifecycle_topic(order.status));
        }
    }

    /// Apply one fill from the adapter stream.
    pub fn on_fill(&self, fill: &Fill) {
        let updated = {
            let mut pending = self.pending.lock();
            if let Some(order) = pending.get_mut(&fill.client_order_id) {
                let booked = order.apply_fill(fill.qty, fill.price, fill.fee);
                if booked < fill.qty {
                    self.stats.overfills.fetch_add(1, Ordering::Relaxed);
                }
                let order = order.clone();
                if order.status.is_terminal() {
                    pending.remove(&fill.client_order_id);
                }
                Some(order)
            } else {
                None
            }
        };

        let order = match updated {
            Some(order) => order,
            None => {
                let Some(mut order) = self.cache.order(&fill.client_order_id) else {
                    debug!(order = %fill.client_order_id, "fill for unknown order ignored");
                    return;
                };
                if order.status.is_terminal() {
                    // Duplicate fill replay; no-op.
                    return;
                }
                let booked = order.apply_fill(fill.qty, fill.price, fill.fee);
                if booked < fill.qty {
                    self.stats.overfills.fetch_add(1, Ordering::Relaxed);
                }
                if booked == rust_decimal::Decimal::ZERO {
                    return;
                }
                order
            }
        };

        self.journal(JournalEvent::Fill(fill.clone()));
        // Fees reduce the daily PnL budget immediately.
        if fill.fee > rust_decimal::Decimal::ZERO {
            self.risk.note_realized_pnl(-fill.fee);
        }
        if self.cache.update_order(order.clone()).is_err() {
            return;
        }
        if matches!(order.status, OrderStatus::Filled) {
            self.stats.filled.fetch_add(1, Ordering::Relaxed);
            self.publish_lifecycle(&order, "order.filled");
        } else {
            self.publish_lifecycle(&order, "order.partial_fill");
        }
    }

    // -- wiring ------------------------------------------------------------

    /// Subscribe to the adapter stream topics and start reconciling.
    pub fn start(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        self.bus.subscribe(
            "adapter.order_update",
            Box::new(move |_, event| {
                if let Event::OrderUpdate(update) = event {
                    engine.on_order_update(update);
                }
                Ok(())
            }),
        );

        let engine = Arc::clone(self);
        self.bus.subscribe(
            "adapter.fill",
            Box::new(move |_, event| {
                if let Event::Fill(fill) = event {
                    engine.on_fill(fill);
                }
                Ok(())
            }),
        );

        let engine = Arc::clone(self);
        self.bus.subscribe(
            "adapter.position",
            Box::new(move |_, event| {
                if let Event::PositionUpdate(position) = event {
                    engine.cache.update_position(position.clone())?;
                }
                Ok(())
            }),
        );

        let engine = Arc::clone(self);
        self.bus.subscribe(
            "adapter.balance",
            Box::new(move |_, event| {
                if let Event::BalanceUpdate(balance) = event {
                    engine.cache.update_balance(balance.clone())?;
                }
                Ok(())
            }),
        );
    }

    /// Expose the engine operations as bus commands.
    pub fn register_commands(self: &Arc<Self>) -> Result<()> {
        let engine = Arc::clone(self);
        self.bus.register(
            "execution.submit",
            Box::new(move |payload| match payload {
                Event::SubmitRequest(request) => {
                    engine.submit(request).map(Event::OrderIdAck)
                }
                other => Err(ZqError::Other(format!(
                    "execution.submit expects SubmitRequest, got {}",
                    other.kind()
                ))),
            }),
        )?;

        let engine = Arc::clone(self);
        self.bus.register(
            "execution.cancel",
            Box::new(move |payload| match payload {
                Event::CancelRequest { client_order_id } => {
                    engine.cancel(&client_order_id)?;
                    Ok(Event::Ack)
                }
                other => Err(ZqError::Other(format!(
                    "execution.cancel expects CancelRequest, got {}",
                    other.kind()
                ))),
            }),
        )?;

        let engine = Arc::clone(self);
        self.bus.register(
            "execution.cancel_all",
            Box::new(move |payload| {
                let filter = match payload {
                    Event::CancelAllRequest(filter) => filter,
                    _ => CancelFilter::default(),
                };
                let report = engine.cancel_all(&filter);
                Ok(Event::CancelAllReport {
                    cancelled: report.cancelled,
                    failed: report.failed,
                })
            }),
        )?;

        let engine = Arc::clone(self);
        self.bus.register(
            "execution.modify",
            Box::new(move |payload| match payload {
                Event::ModifyRequest {
                    client_order_id,
                    changes,
                } => {
                    engine.modify(&client_order_id, &changes)?;
                    Ok(Event::Ack)
                }
                other => Err(ZqError::Other(format!(
                    "execution.modify expects ModifyRequest, got {}",
                    other.kind()
                ))),
            }),
        )?;

        let engine = Arc::clone(self);
        self.bus.register(
            "execution.get",
            Box::new(move |payload| match payload {
                Event::GetOrderRequest { client_order_id } => engine
                    .get(&client_order_id)
                    .map(|order| Event::Order(Box::new(order)))
                    .ok_or_else(|| {
                        ZqError::Business(BusinessError::OrderNotFound(
                            client_order_id.to_string(),
                        ))
                    }),
                other => Err(ZqError::Other(format!(
                    "execution.get expects GetOrderRequest, got {}",
                    other.kind()
                ))),
            }),
        )?;

        let engine = Arc::clone(self);
        self.bus.register(
            "execution.recover",
            Box::new(move |_| {
                engine.recover()?;
                Ok(Event::Ack)
            }),
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("pending", &self.pending.lock().len())
            .field(
                "submitted",
                &self.stats.submitted.load(Ordering::Relaxed),
            )
            .finish()
    }
}
