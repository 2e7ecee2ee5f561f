//! Simulated exchange
//!
//! Implements the same [`ExecutionClient`] trait as the live adapter, so
//! backtests exercise the real execution engine end to end: pre-tracking,
//! risk checks, fill accounting and reconciliation all run against this
//! venue instead of a parallel code path.
//!
//! Mechanics:
//!
//! - market orders (and crossing limits) fill immediately at the touch
//!   plus slippage, paying the taker fee
//! - passive limits rest with a queue position seeded from the displayed
//!   size at the touch; trades at their level consume the queue through
//!   the configured kernel and fill at the maker fee
//! - every ack/fill/cancel report is delayed by the order entry/response
//!   latency models and delivered when the replay clock reaches it

use crate::adapter::{Capabilities, ExchangeAck, ExecutionClient};
use crate::backtest::latency::LatencyConfig;
use crate::backtest::queue::{QueueKernel, QueueSimulator, QueueState};
use crate::bus::OrderUpdate;
use crate::core::errors::{AdapterError, BusinessError, Result, ZqError};
use crate::core::types::{
    Balance, Fill, Order, OrderChanges, OrderStatus, OrderType, Position, Quote, Side,
    TimeInForce, Timeframe, TradingPair,
};
use crate::core::Timestamp;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Fee rates on notional.
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    /// Additive price slippage on aggressive fills.
    pub slippage: Decimal,
    pub latency: LatencyConfig,
    pub queue_kernel: QueueKernel,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            maker_fee: Decimal::new(2, 4),  // 2 bps
            taker_fee: Decimal::new(5, 4),  // 5 bps
            slippage: Decimal::ZERO,
            latency: LatencyConfig::default(),
            queue_kernel: QueueKernel::PositionFifo,
            seed: 42,
        }
    }
}

/// An event travelling back from the venue, due at `deliver_at`.
#[derive(Debug, Clone)]
pub enum SimEvent {
    OrderUpdate(OrderUpdate),
    Fill(Fill),
}

#[derive(Debug)]
struct RestingOrder {
    order: Order,
    queue: QueueState,
    /// Entry latency: the order only participates from this time on.
    active_from: Timestamp,
}

struct SimInner {
    rng: StdRng,
    now: Timestamp,
    quote: Option<Quote>,
    /// Keyed and iterated in order: replay determinism depends on a stable
    /// RNG consumption sequence.
    resting: BTreeMap<crate::core::types::OrderId, RestingOrder>,
    outbox: Vec<(Timestamp, u64, SimEvent)>,
    outbox_seq: u64,
}

/// The venue. Shared as `Arc<SimulatedExchange>`; the backtest loop owns
/// the clock and drains the outbox.
pub struct SimulatedExchange {
    config: SimConfig,
    queue_sim: QueueSimulator,
    inner: Mutex<SimInner>,
    next_exchange_id: AtomicU64,
}

impl SimulatedExchange {
    pub fn new(config: SimConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let queue_sim = QueueSimulator::new(config.queue_kernel.clone());
        Self {
            config,
            queue_sim,
            inner: Mutex::new(SimInner {
                rng,
                now: Timestamp::from_ns(0),
                quote: None,
                resting: BTreeMap::new(),
                outbox: Vec::new(),
                outbox_seq: 0,
            }),
            next_exchange_id: AtomicU64::new(1),
        }
    }

    /// Advance the venue clock.
    pub fn set_now(&self, now: Timestamp) {
        self.inner.lock().now = now;
    }

    /// New top of book.
    pub fn on_quote(&self, quote: Quote) {
        self.inner.lock().quote = Some(quote);
    }

    /// A trade of `qty` printed at `price`: feed it through every resting
    /// order whose level it reaches.
    pub fn on_trade(&self, price: Decimal, qty: Decimal) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let now = inner.now;
        let mut scheduled: Vec<(i64, SimEvent)> = Vec::new();
        let mut done_ids = Vec::new();

        for (id, resting) in inner.resting.iter_mut() {
            if now < resting.active_from {
                continue;
            }
            let limit = match resting.order.price {
                Some(p) => p,
                None => continue,
            };
            let reached = match resting.order.side {
                Side::Buy => price <= limit,
                Side::Sell => price >= limit,
            };
            if !reached {
                continue;
            }

            let remaining = resting.order.remaining_qty;
            let filled = self
                .queue_sim
                .on_trade(&mut resting.queue, qty, remaining, &mut inner.rng);
            if filled <= Decimal::ZERO {
                continue;
            }

            resting.order.filled_qty += filled;
            resting.order.remaining_qty -= filled;
            if resting.order.remaining_qty <= Decimal::ZERO {
                done_ids.push(id.clone());
            }
            let fill = Fill {
                client_order_id: resting.order.client_order_id.clone(),
                pair: resting.order.pair.clone(),
                side: resting.order.side,
                qty: filled,
                price: limit,
                fee: self.config.maker_fee * limit * filled,
                ts: now,
            };
            let delay = self.config.latency.order_response.sample(&mut inner.rng);
            scheduled.push((delay, SimEvent::Fill(fill)));
        }

        for id in done_ids {
            inner.resting.remove(&id);
        }
        for (delay, event) in scheduled {
            push_event(inner, now.offset_ns(delay), event);
        }
    }

    /// Events whose delivery time has been reached, in order.
    pub fn take_due(&self, now: Timestamp) -> Vec<SimEvent> {
        let mut inner = self.inner.lock();
        inner
            .outbox
            .sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        let split = inner.outbox.partition_point(|(at, _, _)| *at <= now);
        inner.outbox.drain(..split).map(|(_, _, e)| e).collect()
    }

    pub fn open_resting(&self) -> usize {
        self.inner.lock().resting.len()
    }

    fn next_id(&self) -> String {
        format!("sim-{}", self.next_exchange_id.fetch_add(1, Ordering::Relaxed))
    }

    fn taker_fill(&self, inner: &mut SimInner, order: &Order) -> Result<()> {
        let Some(quote) = inner.quote.clone() else {
            return Err(ZqError::Adapter(AdapterError::InvalidRequest(
                "no market data for fill".into(),
            )));
        };
        let price = match order.side {
            Side::Buy => quote.ask + self.config.slippage,
            Side::Sell => quote.bid - self.config.slippage,
        };
        let fill = Fill {
            client_order_id: order.client_order_id.clone(),
            pair: order.pair.clone(),
            side: order.side,
            qty: order.remaining_qty,
            price,
            fee: self.config.taker_fee * price * order.remaining_qty,
            ts: inner.now,
        };
        let entry = self.config.latency.order_entry.sample(&mut inner.rng);
        let response = self.config.latency.order_response.sample(&mut inner.rng);
        let now = inner.now;
        push_event(inner, now.offset_ns(entry + response), SimEvent::Fill(fill));
        Ok(())
    }
}

fn push_event(inner: &mut SimInner, at: Timestamp, event: SimEvent) {
    let seq = inner.outbox_seq;
    inner.outbox_seq += 1;
    inner.outbox.push((at, seq, event));
}

impl ExecutionClient for SimulatedExchange {
    fn name(&self) -> &str {
        "simulated"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pairs: vec![],
            timeframes: Timeframe::ALL.to_vec(),
            streaming: true,
            lot_size: Decimal::new(1, 6),
            min_notional: Decimal::ZERO,
            supports_market_orders: true,
            supported_tifs: vec![
                TimeInForce::Gtc,
                TimeInForce::Ioc,
                TimeInForce::Alo,
                TimeInForce::Fok,
            ],
        }
    }

    fn submit(&self, order: &Order) -> Result<ExchangeAck> {
        let mut inner = self.inner.lock();
        let exchange_id = self.next_id();

        let crossing = match (order.order_type, order.price, inner.quote.as_ref()) {
            (OrderType::Market, _, _) => true,
            (_, Some(limit), Some(quote)) => match order.side {
                Side::Buy => limit >= quote.ask,
                Side::Sell => limit <= quote.bid,
            },
            _ => false,
        };

        if crossing {
            if order.tif == TimeInForce::Alo {
                return Err(ZqError::Adapter(AdapterError::InvalidRequest(
                    "post-only order would cross the book".into(),
                )));
            }
            self.taker_fill(&mut inner, order)?;
            return Ok(ExchangeAck {
                exchange_order_id: exchange_id,
                status: OrderStatus::Open,
            });
        }

        if order.order_type == OrderType::Market {
            return Err(ZqError::Adapter(AdapterError::InvalidRequest(
                "market order with no book".into(),
            )));
        }
        if order.tif == TimeInForce::Fok {
            // Cannot fill in full immediately, so kill it.
            let now = inner.now;
            let update = OrderUpdate {
                client_order_id: order.client_order_id.clone(),
                exchange_order_id: Some(exchange_id.clone()),
                status: OrderStatus::Canceled,
                filled_qty: None,
                avg_fill_price: None,
                ts: now,
            };
            let delay = self.config.latency.order_response.sample(&mut inner.rng);
            push_event(&mut inner, now.offset_ns(delay), SimEvent::OrderUpdate(update));
            return Ok(ExchangeAck {
                exchange_order_id: exchange_id,
                status: OrderStatus::Submitted,
            });
        }

        // Rest in the book behind whatever is displayed at the touch.
        let queue_ahead = match (&inner.quote, order.price) {
            (Some(quote), Some(limit)) => match order.side {
                Side::Buy if limit == quote.bid => quote.bid_size,
                Side::Sell if limit == quote.ask => quote.ask_size,
                _ => Decimal::ZERO,
            },
            _ => Decimal::ZERO,
        };
        let entry_delay = self.config.latency.order_entry.sample(&mut inner.rng);
        let now = inner.now;
        let mut resting = order.clone();
        resting.exchange_order_id = Some(exchange_id.clone());
        if order.tif == TimeInForce::Ioc {
            // A non-crossing IOC cancels on arrival.
            let response = self.config.latency.order_response.sample(&mut inner.rng);
            let update = OrderUpdate {
                client_order_id: order.client_order_id.clone(),
                exchange_order_id: Some(exchange_id.clone()),
                status: OrderStatus::Canceled,
                filled_qty: None,
                avg_fill_price: None,
                ts: now,
            };
            push_event(
                &mut inner,
                now.offset_ns(entry_delay + response),
                SimEvent::OrderUpdate(update),
            );
        } else {
            inner.resting.insert(
                order.client_order_id.clone(),
                RestingOrder {
                    order: resting,
                    queue: QueueState::new(queue_ahead),
                    active_from: now.offset_ns(entry_delay),
                },
            );
        }

        Ok(ExchangeAck {
            exchange_order_id: exchange_id,
            status: OrderStatus::Open,
        })
    }

    fn cancel(&self, order: &Order) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.resting.remove(&order.client_order_id).is_none() {
            return Err(ZqError::Business(BusinessError::OrderNotFound(
                order.client_order_id.to_string(),
            )));
        }
        let now = inner.now;
        let delay = self.config.latency.order_response.sample(&mut inner.rng);
        let update = OrderUpdate {
            client_order_id: order.client_order_id.clone(),
            exchange_order_id: order.exchange_order_id.clone(),
            status: OrderStatus::Canceled,
            filled_qty: None,
            avg_fill_price: None,
            ts: now,
        };
        push_event(&mut inner, now.offset_ns(delay), SimEvent::OrderUpdate(update));
        Ok(())
    }

    fn modify(&self, order: &Order, changes: &OrderChanges) -> Result<ExchangeAck> {
        let mut inner = self.inner.lock();
        let exchange_id = order
            .exchange_order_id
            .clone()
            .unwrap_or_else(|| self.next_id());
        let quote = inner.quote.clone();
        let Some(resting) = inner.resting.get_mut(&order.client_order_id) else {
            return Err(ZqError::Business(BusinessError::OrderNotFound(
                order.client_order_id.to_string(),
            )));
        };
        if let Some(price) = changes.price {
            resting.order.price = Some(price);
            // Price change loses queue priority.
            let ahead = match (&quote, resting.order.side) {
                (Some(q), Side::Buy) if price == q.bid => q.bid_size,
                (Some(q), Side::Sell) if price == q.ask => q.ask_size,
                _ => Decimal::ZERO,
            };
            resting.queue = QueueState::new(ahead);
        }
        if let Some(qty) = changes.qty {
            resting.order.qty = qty;
            resting.order.remaining_qty = qty - resting.order.filled_qty;
        }
        Ok(ExchangeAck {
            exchange_order_id: exchange_id,
            status: OrderStatus::Open,
        })
    }

    fn fetch_open_orders(&self) -> Result<Vec<Order>> {
        Ok(self
            .inner
            .lock()
            .resting
            .values()
            .map(|r| r.order.clone())
            .collect())
    }

    fn fetch_positions(&self) -> Result<Vec<Position>> {
        // The replay engine owns position accounting.
        Ok(vec![])
    }

    fn fetch_balances(&self) -> Result<Vec<Balance>> {
        Ok(vec![])
    }

    fn set_leverage(&self, _pair: &TradingPair, _leverage: u32) -> Result<()> {
        Ok(())
    }

    fn stream_order_updates(&self) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for SimulatedExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedExchange")
            .field("resting", &self.open_resting())
            .finish()
    }
}
