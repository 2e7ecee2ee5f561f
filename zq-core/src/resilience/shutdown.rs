//! Cooperative shutdown token
//!
//! Long-running workers poll the token at every blocking point; `stop`
//! propagates instantly through clones. `wait_timeout` doubles as an
//! interruptible sleep for tick loops and backoff waits.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
    gate: Arc<(Mutex<()>, Condvar)>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown and wake every waiter.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
        let (lock, cvar) = &*self.gate;
        let _guard = lock.lock();
        cvar.notify_all();
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep up to `timeout`, returning early (true) if shutdown fires.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        let (lock, cvar) = &*self.gate;
        let mut guard = lock.lock();
        if self.is_stopped() {
            return true;
        }
        cvar.wait_for(&mut guard, timeout);
        self.is_stopped()
    }
}

impl std::fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_stop_propagates_to_clones() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(!clone.is_stopped());
        token.stop();
        assert!(clone.is_stopped());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let token = ShutdownToken::new();
        let start = Instant::now();
        assert!(!token.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_wait_interrupted_by_stop() {
        let token = ShutdownToken::new();
        let waiter = token.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let stopped = waiter.wait_timeout(Duration::from_secs(5));
            (stopped, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(30));
        token.stop();
        let (stopped, elapsed) = handle.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(1));
    }
}
