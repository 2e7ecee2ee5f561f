//! In-process message bus
//!
//! Many-producer / many-consumer event distribution plus synchronous
//! request-response. Three surfaces:
//!
//! - `publish(topic, event)`: non-blocking fan-out to every subscription
//!   whose pattern matches the topic
//! - `subscribe(pattern, handler)`: wildcard patterns (`*` one segment,
//!   `**` any suffix), each subscription served by its own worker thread
//!   fed from a bounded channel
//! - `register(topic, handler)` / `request(topic, payload)`: at most one
//!   command handler per topic, callers block for the reply with a timeout
//!
//! Delivery guarantees: events from a single publishing thread reach any
//! one subscriber in publish order; no ordering across subscribers. A
//! handler that fails (or panics) is logged and skipped, it never affects
//! other subscribers or the publisher. A subscriber whose queue is full
//! loses the event and the drop is counted.

pub mod event;
pub mod pattern;

pub use event::{Event, MetricsUpdate, OrderUpdate};
pub use pattern::TopicPattern;

use crate::core::errors::{Result, ZqError};
use crossbeam::channel::{bounded, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default `request` timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Soft budget for one handler invocation; exceeding it logs a warning.
const HANDLER_WATCHDOG: Duration = Duration::from_secs(30);

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Event handler: receives the concrete topic and a shared event.
pub type EventHandler = Box<dyn Fn(&str, &Event) -> Result<()> + Send + 'static>;

/// Command handler for `register`/`request`.
pub type CommandHandler = Box<dyn Fn(Event) -> Result<Event> + Send + 'static>;

type Delivery = (Arc<String>, Arc<Event>);
type CommandCall = (Event, Sender<Result<Event>>);

struct Subscriber {
    id: SubscriptionId,
    pattern: TopicPattern,
    tx: Sender<Delivery>,
    dropped: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

struct CommandSlot {
    tx: Sender<CommandCall>,
    handle: Option<JoinHandle<()>>,
}

/// Bus statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub subscriptions: usize,
}

struct BusInner {
    subscribers: RwLock<Vec<Subscriber>>,
    commands: Mutex<HashMap<String, CommandSlot>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Cheaply cloneable handle to the shared bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    /// Create a bus with the default per-subscriber queue capacity (1024).
    pub fn new() -> Self {
        Self::with_queue_capacity(1024)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                commands: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_capacity,
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an event to all matching subscriptions. Never blocks: a
    /// subscriber with a full queue loses this event (counted and logged).
    pub fn publish(&self, topic: &str, event: Event) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let topic_arc = Arc::new(topic.to_string());
        let event_arc = Arc::new(event);

        let subscribers = self.inner.subscribers.read();
        for sub in subscribers.iter() {
            if !sub.pattern.matches(topic) {
                continue;
            }
            match sub.tx.try_send((Arc::clone(&topic_arc), Arc::clone(&event_arc))) {
                Ok(()) => {
                    self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    sub.dropped.fetch_add(1, Ordering::Relaxed);
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic,
                        pattern = sub.pattern.as_str(),
                        "subscriber queue full, event dropped"
                    );
                }
                Err(TrySendError::Disconnected(_)) => {
                    // Worker already gone; entry is removed on unsubscribe/close.
                }
            }
        }
    }

    /// Subscribe a handler to a topic pattern. Duplicate subscriptions are
    /// independent: each gets its own queue and worker.
    pub fn subscribe(&self, pattern: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let compiled = TopicPattern::compile(pattern);
        let (tx, rx) = bounded::<Delivery>(self.inner.queue_capacity);
        let pattern_owned = pattern.to_string();

        let handle = std::thread::Builder::new()
            .name(format!("bus-sub-{}", id.0))
            .spawn(move || {
                for (topic, event) in rx.iter() {
                    let started = Instant::now();
                    let outcome =
                        catch_unwind(AssertUnwindSafe(|| handler(topic.as_str(), &event)));
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            warn!(topic = %topic, pattern = %pattern_owned, %err, "handler failed, event skipped");
                        }
                        Err(_) => {
                            error!(topic = %topic, pattern = %pattern_owned, "handler panicked, event skipped");
                        }
                    }
                    let elapsed = started.elapsed();
                    if elapsed > HANDLER_WATCHDOG {
                        warn!(
                            topic = %topic,
                            pattern = %pattern_owned,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "handler exceeded watchdog budget"
                        );
                    }
                }
                debug!(pattern = %pattern_owned, "subscriber worker stopped");
            })
            .expect("failed to spawn bus subscriber thread");

        self.inner.subscribers.write().push(Subscriber {
            id,
            pattern: compiled,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            handle: Some(handle),
        });
        id
    }

    /// Remove a subscription. Idempotent: unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let removed = {
            let mut subs = self.inner.subscribers.write();
            match subs.iter().position(|s| s.id == id) {
                Some(idx) => Some(subs.remove(idx)),
                None => None,
            }
        };
        // Dropping the sender outside the lock lets the worker drain and exit.
        drop(removed);
    }

    /// Register the unique command handler for a topic.
    pub fn register(&self, command_topic: &str, handler: CommandHandler) -> Result<()> {
        let mut commands = self.inner.commands.lock();
        if commands.contains_key(command_topic) {
            return Err(ZqError::AlreadyRegistered(command_topic.to_string()));
        }

        let (tx, rx) = bounded::<CommandCall>(self.inner.queue_capacity);
        let topic_owned = command_topic.to_string();
        let handle = std::thread::Builder::new()
            .name(format!("bus-cmd-{command_topic}"))
            .spawn(move || {
                for (payload, reply_tx) in rx.iter() {
                    let outcome = catch_unwind(AssertUnwindSafe(|| handler(payload)));
                    let reply = match outcome {
                        Ok(result) => result,
                        Err(_) => {
                            error!(topic = %topic_owned, "command handler panicked");
                            Err(ZqError::Other(format!(
                                "command handler for {topic_owned} panicked"
                            )))
                        }
                    };
                    // Caller may have timed out and dropped the receiver.
                    let _ = reply_tx.send(reply);
                }
                debug!(topic = %topic_owned, "command worker stopped");
            })
            .expect("failed to spawn bus command thread");

        commands.insert(
            command_topic.to_string(),
            CommandSlot {
                tx,
                handle: Some(handle),
            },
        );
        Ok(())
    }

    /// Synchronous request with the default 30s timeout.
    pub fn request(&self, command_topic: &str, payload: Event) -> Result<Event> {
        self.request_with_timeout(command_topic, payload, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Synchronous request; fails with `NoHandler`, `RequestTimeout`, or the
    /// handler's own error.
    pub fn request_with_timeout(
        &self,
        command_topic: &str,
        payload: Event,
        timeout: Duration,
    ) -> Result<Event> {
        let tx = {
            let commands = self.inner.commands.lock();
            match commands.get(command_topic) {
                Some(slot) => slot.tx.clone(),
                None => return Err(ZqError::NoHandler(command_topic.to_string())),
            }
        };

        let (reply_tx, reply_rx) = bounded::<Result<Event>>(1);
        let deadline = Instant::now() + timeout;
        if tx.send_timeout((payload, reply_tx), timeout).is_err() {
            return Err(ZqError::RequestTimeout {
                topic: command_topic.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match reply_rx.recv_timeout(remaining) {
            Ok(result) => result,
            Err(_) => Err(ZqError::RequestTimeout {
                topic: command_topic.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            subscriptions: self.inner.subscribers.read().len(),
        }
    }

    /// Drop all subscriptions and command handlers, then wait up to
    /// `grace` for the workers to drain. Workers still running after the
    /// grace period are detached and reported.
    pub fn close(&self, grace: Duration) {
        let mut handles: Vec<(String, JoinHandle<()>)> = Vec::new();

        {
            let mut subs = self.inner.subscribers.write();
            for mut sub in subs.drain(..) {
                if let Some(handle) = sub.handle.take() {
                    handles.push((format!("sub:{}", sub.pattern.as_str()), handle));
                }
                // Sender drops here, signalling the worker to finish.
            }
        }
        {
            let mut commands = self.inner.commands.lock();
            for (topic, mut slot) in commands.drain() {
                if let Some(handle) = slot.handle.take() {
                    handles.push((format!("cmd:{topic}"), handle));
                }
            }
        }

        let deadline = Instant::now() + grace;
        for (name, handle) in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!(worker = %name, "bus worker did not drain in time, detaching");
            }
        }
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("MessageBus")
            .field("subscriptions", &stats.subscriptions)
            .field("published", &stats.published)
            .field("dropped", &stats.dropped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Quote, TradingPair};
    use crate::core::Timestamp;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    fn quote() -> Quote {
        Quote {
            pair: TradingPair::new("BTC", "USDC"),
            bid: dec!(49999),
            ask: dec!(50001),
            bid_size: dec!(1),
            ask_size: dec!(1),
            ts: Timestamp::now(),
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(cond(), "condition not met within deadline");
    }

    #[test]
    fn test_publish_reaches_matching_subscribers_once() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let misses = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        bus.subscribe(
            "market_data.*.BTC-USDC",
            Box::new(move |_, _| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let m = Arc::clone(&misses);
        bus.subscribe(
            "order.**",
            Box::new(move |_, _| {
                m.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.publish("market_data.quote.BTC-USDC", Event::Quote(quote()));
        wait_for(|| hits.load(Ordering::SeqCst) == 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(hits.load(Ordering::SeqCst), 1, "delivered exactly once");
        assert_eq!(misses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_per_subscriber_fifo_ordering() {
        let bus = MessageBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe(
            "seq.*",
            Box::new(move |topic, _| {
                s.lock().unwrap().push(topic.to_string());
                Ok(())
            }),
        );

        for i in 0..100 {
            bus.publish(&format!("seq.{i}"), Event::Ack);
        }
        wait_for(|| seen.lock().unwrap().len() == 100);
        let seen = seen.lock().unwrap();
        for (i, topic) in seen.iter().enumerate() {
            assert_eq!(topic, &format!("seq.{i}"));
        }
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let bus = MessageBus::new();
        let good = Arc::new(AtomicUsize::new(0));

        bus.subscribe(
            "x.*",
            Box::new(|_, _| Err(ZqError::Other("handler error".into()))),
        );
        bus.subscribe("x.*", Box::new(|_, _| panic!("handler panic")));
        let g = Arc::clone(&good);
        bus.subscribe(
            "x.*",
            Box::new(move |_, _| {
                g.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.publish("x.1", Event::Ack);
        bus.publish("x.2", Event::Ack);
        wait_for(|| good.load(Ordering::SeqCst) == 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = bus.subscribe(
            "t",
            Box::new(move |_, _| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.publish("t", Event::Ack);
        wait_for(|| hits.load(Ordering::SeqCst) == 1);

        bus.unsubscribe(id);
        bus.unsubscribe(id);
        bus.publish("t", Event::Ack);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_response() {
        let bus = MessageBus::new();
        bus.register(
            "echo",
            Box::new(|payload| match payload {
                Event::Ack => Ok(Event::Ack),
                other => Ok(other),
            }),
        )
        .unwrap();

        let reply = bus.request("echo", Event::Ack).unwrap();
        assert!(matches!(reply, Event::Ack));
    }

    #[test]
    fn test_request_no_handler() {
        let bus = MessageBus::new();
        assert!(matches!(
            bus.request("missing", Event::Ack),
            Err(ZqError::NoHandler(_))
        ));
    }

    #[test]
    fn test_register_twice_fails() {
        let bus = MessageBus::new();
        bus.register("cmd", Box::new(|_| Ok(Event::Ack))).unwrap();
        assert!(matches!(
            bus.register("cmd", Box::new(|_| Ok(Event::Ack))),
            Err(ZqError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_request_timeout() {
        let bus = MessageBus::new();
        bus.register(
            "slow",
            Box::new(|_| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(Event::Ack)
            }),
        )
        .unwrap();

        let result = bus.request_with_timeout("slow", Event::Ack, Duration::from_millis(30));
        assert!(matches!(result, Err(ZqError::RequestTimeout { .. })));
    }

    #[test]
    fn test_request_propagates_handler_error() {
        let bus = MessageBus::new();
        bus.register(
            "fail",
            Box::new(|_| Err(ZqError::Other("handler said no".into()))),
        )
        .unwrap();

        match bus.request("fail", Event::Ack) {
            Err(ZqError::Other(msg)) => assert_eq!(msg, "handler said no"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let bus = MessageBus::with_queue_capacity(4);
        // Handler that never finishes the first event quickly.
        bus.subscribe(
            "slow.*",
            Box::new(|_, _| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            }),
        );

        for i in 0..50 {
            bus.publish(&format!("slow.{i}"), Event::Ack);
        }
        assert!(bus.stats().dropped > 0);
    }

    #[test]
    fn test_close_drains() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.subscribe(
            "d",
            Box::new(move |_, _| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        for _ in 0..10 {
            bus.publish("d", Event::Ack);
        }
        bus.close(Duration::from_secs(1));
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(bus.stats().subscriptions, 0);
    }
}
