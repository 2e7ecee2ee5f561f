//! Test support: scriptable venue mocks and bus helpers
//!
//! Used by the integration suites in `tests/`; compiled into the crate so
//! downstream consumers can drive the runtime against a fake venue too.

pub mod mock_exchange;

pub use mock_exchange::{MockDataProvider, MockExecutionClient, SubmitOutcome};

use crate::bus::{Event, MessageBus, SubscriptionId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Records every event delivered for a pattern, with its topic.
pub struct EventCollector {
    seen: Arc<Mutex<Vec<(String, Event)>>>,
    id: SubscriptionId,
    bus: MessageBus,
}

impl EventCollector {
    pub fn subscribe(bus: &MessageBus, pattern: &str) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = bus.subscribe(
            pattern,
            Box::new(move |topic, event| {
                sink.lock().push((topic.to_string(), event.clone()));
                Ok(())
            }),
        );
        Self {
            seen,
            id,
            bus: bus.clone(),
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.seen.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn events(&self) -> Vec<(String, Event)> {
        self.seen.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until at least `count` events arrived or the deadline passes.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.len() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.len() >= count
    }

    /// Block until an event arrives on `topic`.
    pub fn wait_for_topic(&self, topic: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.seen.lock().iter().any(|(t, _)| t == topic) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl Drop for EventCollector {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}
