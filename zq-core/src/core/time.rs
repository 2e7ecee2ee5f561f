//! Wall-clock timestamps with a monotonic tie-breaker
//!
//! A [`Timestamp`] is nanoseconds since the Unix epoch plus a process-wide
//! monotonic sequence number. Two timestamps taken in the same nanosecond
//! still order deterministically by sequence, which the cache and the
//! backtester rely on when sorting events.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static MONOTONIC_SEQ: AtomicU64 = AtomicU64::new(0);

/// Nanosecond wall-clock timestamp with monotonic ordering for ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Nanoseconds since the Unix epoch.
    pub ns: i64,
    /// Process-wide monotonic sequence, breaks ordering ties within one ns.
    pub seq: u64,
}

impl Timestamp {
    /// Capture the current wall-clock time.
    pub fn now() -> Self {
        let ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        Self {
            ns,
            seq: MONOTONIC_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Build a timestamp from raw epoch nanoseconds (sequence 0).
    ///
    /// Used for deserialized and simulated times where ordering ties are
    /// resolved by the caller.
    pub const fn from_ns(ns: i64) -> Self {
        Self { ns, seq: 0 }
    }

    /// Build from epoch milliseconds, the granularity most venues report.
    pub const fn from_millis(ms: i64) -> Self {
        Self::from_ns(ms * 1_000_000)
    }

    pub const fn as_ns(&self) -> i64 {
        self.ns
    }

    pub const fn as_millis(&self) -> i64 {
        self.ns / 1_000_000
    }

    /// Elapsed nanoseconds since `earlier`; zero if `earlier` is later.
    pub fn elapsed_ns_since(&self, earlier: Timestamp) -> i64 {
        (self.ns - earlier.ns).max(0)
    }

    /// Shift by a signed nanosecond delta, keeping the sequence.
    pub const fn offset_ns(&self, delta: i64) -> Self {
        Self {
            ns: self.ns + delta,
            seq: self.seq,
        }
    }

    /// ISO-8601 / RFC 3339 rendering for external I/O.
    pub fn to_rfc3339(&self) -> String {
        match Utc.timestamp_opt(self.ns / 1_000_000_000, (self.ns % 1_000_000_000) as u32) {
            chrono::LocalResult::Single(dt) => dt.to_rfc3339(),
            _ => format!("invalid({})", self.ns),
        }
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match Utc.timestamp_opt(self.ns / 1_000_000_000, (self.ns % 1_000_000_000) as u32) {
            chrono::LocalResult::Single(dt) => Some(dt),
            _ => None,
        }
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.ns, self.seq).cmp(&(other.ns, other.seq))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotonic() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(b > a, "sequence must break ties: {a:?} vs {b:?}");
    }

    #[test]
    fn test_ordering_by_ns_then_seq() {
        let a = Timestamp { ns: 100, seq: 5 };
        let b = Timestamp { ns: 100, seq: 6 };
        let c = Timestamp { ns: 101, seq: 0 };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_rfc3339_round_numbers() {
        let ts = Timestamp::from_ns(1_700_000_000_000_000_000);
        assert!(ts.to_rfc3339().starts_with("2023-11-14T"));
    }

    #[test]
    fn test_offset_and_elapsed() {
        let ts = Timestamp::from_ns(1_000);
        let later = ts.offset_ns(500);
        assert_eq!(later.as_ns(), 1_500);
        assert_eq!(later.elapsed_ns_since(ts), 500);
        assert_eq!(ts.elapsed_ns_since(later), 0);
    }
}
