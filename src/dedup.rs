//! Component C10: suppresses duplicate firing notifications for the same
//! fingerprint within a short window. Resolved alerts are never dropped —
//! a resolution must always reach downstream even if it arrives seconds
//! after the firing alert it closes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::model::Alert;

pub struct Deduplicator {
    window: Duration,
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `alert` should be processed, `false` if it's a
    /// duplicate within the dedup window and should be dropped.
    pub fn should_process(&self, alert: &Alert) -> bool {
        if !alert.is_firing() {
            return true;
        }

        let now = Instant::now();
        let mut last_seen = self.last_seen.lock();

        match last_seen.get(&alert.fingerprint) {
            Some(seen_at) if now.duration_since(*seen_at) < self.window => false,
            _ => {
                last_seen.insert(alert.fingerprint.clone(), now);
                true
            }
        }
    }

    /// Periodic cleanup so the map doesn't grow unbounded across long
    /// uptimes once alerts stop re-firing.
    pub fn evict_stale(&self, max_age: Duration) {
        let now = Instant::now();
        self.last_seen.lock().retain(|_, seen_at| now.duration_since(*seen_at) < max_age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertStatus;
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;

    fn alert(fp: &str, status: AlertStatus) -> Alert {
        Alert {
            fingerprint: fp.into(),
            alert_name: "x".into(),
            namespace: None,
            status,
            labels: StdHashMap::new(),
            annotations: StdHashMap::new(),
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: None,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn second_firing_within_window_is_dropped() {
        let dedup = Deduplicator::new(Duration::from_secs(60));
        assert!(dedup.should_process(&alert("fp1", AlertStatus::Firing)));
        assert!(!dedup.should_process(&alert("fp1", AlertStatus::Firing)));
    }

    #[test]
    fn firing_outside_window_is_processed() {
        let dedup = Deduplicator::new(Duration::from_millis(1));
        assert!(dedup.should_process(&alert("fp1", AlertStatus::Firing)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(dedup.should_process(&alert("fp1", AlertStatus::Firing)));
    }

    #[test]
    fn resolved_alerts_are_never_dropped() {
        let dedup = Deduplicator::new(Duration::from_secs(60));
        assert!(dedup.should_process(&alert("fp1", AlertStatus::Firing)));
        assert!(dedup.should_process(&alert("fp1", AlertStatus::Resolved)));
        assert!(dedup.should_process(&alert("fp1", AlertStatus::Resolved)));
    }
}
