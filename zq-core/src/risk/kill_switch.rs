//! Emergency kill switch
//!
//! One atomic flag, readable without locks from every pre-trade path.
//! While active, every new submission is rejected; activation also drives
//! an engine-wide cancel of open orders (wired in the risk engine, which
//! owns this flag). Reset clears the flag but keeps the audit trail.

use crate::core::time::Timestamp;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// One activation episode.
#[derive(Debug, Clone, PartialEq)]
pub struct KillSwitchRecord {
    pub reason: String,
    pub activated_at: Timestamp,
    pub reset_at: Option<Timestamp>,
}

/// Shared kill switch handle.
#[derive(Clone, Default)]
pub struct KillSwitch {
    active: Arc<AtomicBool>,
    audit: Arc<Mutex<Vec<KillSwitchRecord>>>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check without taking any lock; safe on the hot path.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Activate. Returns false when already active (no duplicate record).
    pub fn activate(&self, reason: &str) -> bool {
        if self.active.swap(true, Ordering::AcqRel) {
            return false;
        }
        error!(reason, "KILL SWITCH ACTIVATED");
        self.audit.lock().push(KillSwitchRecord {
            reason: reason.to_string(),
            activated_at: Timestamp::now(),
            reset_at: None,
        });
        true
    }

    /// Clear the flag; the audit record is preserved and stamped.
    pub fn reset(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        info!("kill switch reset");
        if let Some(record) = self.audit.lock().last_mut() {
            record.reset_at = Some(Timestamp::now());
        }
        true
    }

    pub fn audit(&self) -> Vec<KillSwitchRecord> {
        self.audit.lock().clone()
    }
}

impl std::fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KillSwitch")
            .field("active", &self.is_active())
            .field("episodes", &self.audit.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activate_and_reset() {
        let ks = KillSwitch::new();
        assert!(!ks.is_active());

        assert!(ks.activate("daily loss breached"));
        assert!(ks.is_active());
        assert!(!ks.activate("duplicate"), "second activation is a no-op");

        assert!(ks.reset());
        assert!(!ks.is_active());
        assert!(!ks.reset(), "reset when inactive is a no-op");
    }

    #[test]
    fn test_audit_survives_reset() {
        let ks = KillSwitch::new();
        ks.activate("first");
        ks.reset();
        ks.activate("second");

        let audit = ks.audit();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].reason, "first");
        assert!(audit[0].reset_at.is_some());
        assert!(audit[1].reset_at.is_none());
    }

    #[test]
    fn test_shared_across_clones() {
        let ks = KillSwitch::new();
        let clone = ks.clone();
        ks.activate("shared");
        assert!(clone.is_active());
    }
}
