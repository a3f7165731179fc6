use crate::config::ThrottleConfig;
use crate::error::PersistenceError;
use crate::events::Timestamp;
use crate::storage;
use chrono::Duration;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;

/// Limits enforced by the throttle ledger
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottlePolicy {
    /// Maximum notifications within the retention window
    pub max_per_window: usize,
    /// Minimum spacing between notifications
    pub min_interval: Duration,
    /// Records older than this are discarded
    pub retention_window: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_per_window: 10,
            min_interval: Duration::minutes(1),
            retention_window: Duration::hours(24),
        }
    }
}

impl From<&ThrottleConfig> for ThrottlePolicy {
    fn from(config: &ThrottleConfig) -> Self {
        Self {
            max_per_window: config.max_per_window,
            min_interval: Duration::seconds(config.min_interval_seconds as i64),
            retention_window: Duration::hours(config.retention_hours as i64),
        }
    }
}

/// A notification that was sent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleRecord {
    #[serde(rename = "Timestamp")]
    pub sent_at: Timestamp,
}

/// Why an admission was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The retention window already holds the maximum number of sends
    WindowCapReached,
    /// The previous send is more recent than the minimum interval
    IntervalNotElapsed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::WindowCapReached => write!(f, "notification cap for the window reached"),
            RejectReason::IntervalNotElapsed => write!(f, "minimum interval since last notification not elapsed"),
        }
    }
}

/// Outcome of an admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Durable log of sent notifications
///
/// The ledger is a JSON array of `{"Timestamp": ...}` objects rewritten in
/// full on every change. Each admission loads, prunes, decides and persists
/// under a mutex, so concurrent events can never exceed the configured quota.
#[derive(Debug)]
pub struct ThrottleLedger {
    path: PathBuf,
    policy: ThrottlePolicy,
    lock: Mutex<()>,
}

impl ThrottleLedger {
    /// Create a ledger stored at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the JSON ledger file
    /// * `policy` - Limits to enforce
    pub fn new(path: PathBuf, policy: ThrottlePolicy) -> Self {
        Self {
            path,
            policy,
            lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    /// Decide whether a notification may be sent at `now`, recording it if so
    ///
    /// Records older than the retention window are pruned first. A rejection
    /// persists the prune but never records the rejected attempt.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError` if the updated ledger cannot be written.
    /// A corrupt or unreadable ledger is not an error: it is logged and
    /// treated as empty.
    pub fn try_admit(&self, now: Timestamp) -> Result<Admission, PersistenceError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let (mut records, mut dirty) = self.load();
        let before = records.len();
        self.prune(&mut records, now);
        if records.len() != before {
            debug!("Pruned {} expired ledger records", before - records.len());
            dirty = true;
        }

        let decision = if records.len() >= self.policy.max_per_window {
            Admission::Rejected(RejectReason::WindowCapReached)
        } else if records
            .iter()
            .any(|record| now - record.sent_at < self.policy.min_interval)
        {
            Admission::Rejected(RejectReason::IntervalNotElapsed)
        } else {
            records.push(ThrottleRecord { sent_at: now });
            dirty = true;
            Admission::Admitted
        };

        if dirty {
            storage::write_json(&self.path, &records)?;
        }

        Ok(decision)
    }

    /// Records within the retention window at `now`, without modifying storage
    pub fn records(&self, now: Timestamp) -> Vec<ThrottleRecord> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let (mut records, _) = self.load();
        self.prune(&mut records, now);
        records
    }

    /// Load the stored records; the flag is set when storage needs rewriting
    fn load(&self) -> (Vec<ThrottleRecord>, bool) {
        match storage::read_json::<Vec<ThrottleRecord>>(&self.path) {
            Ok(Some(records)) => (records, false),
            Ok(None) => (Vec::new(), true),
            Err(e) => {
                warn!("Resetting unreadable notification ledger: {}", e);
                (Vec::new(), true)
            }
        }
    }

    fn prune(&self, records: &mut Vec<ThrottleRecord>, now: Timestamp) {
        let retention = self.policy.retention_window;
        records.retain(|record| now - record.sent_at <= retention);
    }
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use quickcheck_macros::quickcheck;
    use tempfile::TempDir;

    /// Replay attempts separated by `gaps` seconds and return the admitted times
    fn replay(gaps: &[u16]) -> (ThrottlePolicy, Vec<Timestamp>) {
        let dir = TempDir::new().unwrap();
        let policy = ThrottlePolicy::default();
        let ledger = ThrottleLedger::new(dir.path().join("ledger.json"), policy);

        let mut now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut admitted = Vec::new();
        for &gap in gaps {
            // Scale gaps up so runs cover several retention windows
            now += Duration::seconds(gap as i64 * 10);
            if ledger.try_admit(now).unwrap().is_admitted() {
                admitted.push(now);
            }
            assert!(ledger.records(now).len() <= policy.max_per_window);
        }
        (policy, admitted)
    }

    #[quickcheck]
    fn prop_admissions_respect_minimum_interval(gaps: Vec<u16>) -> bool {
        let (policy, admitted) = replay(&gaps);
        admitted
            .windows(2)
            .all(|pair| pair[1] - pair[0] >= policy.min_interval)
    }

    #[quickcheck]
    fn prop_window_never_exceeds_cap(gaps: Vec<u16>) -> bool {
        let (policy, admitted) = replay(&gaps);
        admitted.iter().all(|&end| {
            admitted
                .iter()
                .filter(|&&t| t <= end && end - t <= policy.retention_window)
                .count()
                <= policy.max_per_window
        })
    }
}
