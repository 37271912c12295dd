//! Component C8: suppresses target alerts while a matching source alert is
//! firing, per Alertmanager's inhibition semantics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::AppResult;
use crate::matcher::{matches_all, RegexCache};
use crate::model::{Alert, InhibitionRule};

/// Tracks which alerts are currently firing so inhibition rules can check
/// for a matching source without touching the durable store on every call.
#[derive(Default)]
pub struct ActiveAlertCache {
    firing: RwLock<HashMap<String, Alert>>,
}

impl ActiveAlertCache {
    pub fn mark_firing(&self, alert: Alert) {
        self.firing.write().insert(alert.fingerprint.clone(), alert);
    }

    pub fn mark_resolved(&self, fingerprint: &str) {
        self.firing.write().remove(fingerprint);
    }
}

/// `equal` label values pulled off a candidate source/target alert, in rule
/// order. Two alerts "equal-match" a rule when their tuples are identical —
/// this is the index key, so a missing label on one side (`None`) only
/// collides with another alert missing that same label.
type EqualKey = Vec<Option<String>>;

/// Per-rule index of currently-firing alerts that match that rule's
/// `source_matchers`, bucketed by their `equal` label values. Lets
/// [`InhibitionEngine::is_inhibited`] do an O(1) lookup per rule instead of
/// rescanning every firing alert (spec §4.8).
#[derive(Default)]
struct RuleIndex {
    by_key: HashMap<EqualKey, HashSet<String>>,
    key_by_fingerprint: HashMap<String, EqualKey>,
}

impl RuleIndex {
    fn insert(&mut self, fingerprint: &str, key: EqualKey) {
        self.remove(fingerprint);
        self.by_key.entry(key.clone()).or_default().insert(fingerprint.to_string());
        self.key_by_fingerprint.insert(fingerprint.to_string(), key);
    }

    fn remove(&mut self, fingerprint: &str) {
        if let Some(key) = self.key_by_fingerprint.remove(fingerprint) {
            if let Some(set) = self.by_key.get_mut(&key) {
                set.remove(fingerprint);
                if set.is_empty() {
                    self.by_key.remove(&key);
                }
            }
        }
    }
}

pub struct InhibitionEngine {
    rules: Vec<InhibitionRule>,
    active: Arc<ActiveAlertCache>,
    regex_cache: Arc<RegexCache>,
    indices: RwLock<Vec<RuleIndex>>,
}

impl InhibitionEngine {
    pub fn new(rules: Vec<InhibitionRule>, active: Arc<ActiveAlertCache>, regex_cache: Arc<RegexCache>) -> Self {
        let indices = RwLock::new(rules.iter().map(|_| RuleIndex::default()).collect());
        Self {
            rules,
            active,
            regex_cache,
            indices,
        }
    }

    fn equal_key(equal: &[String], alert: &Alert) -> EqualKey {
        equal.iter().map(|label| alert.labels.get(label).cloned()).collect()
    }

    /// Marks `alert` firing in the shared [`ActiveAlertCache`] and refreshes
    /// every rule index it matches as a source. A matcher error (e.g. a bad
    /// regex) is logged and leaves that rule's index untouched rather than
    /// failing the caller — the same degrade-rather-than-block posture as
    /// the silence check.
    pub fn mark_firing(&self, alert: Alert) {
        self.active.mark_firing(alert.clone());

        let mut indices = self.indices.write();
        for (rule, index) in self.rules.iter().zip(indices.iter_mut()) {
            match matches_all(&rule.source_matchers, &alert.labels, &self.regex_cache) {
                Ok(true) => index.insert(&alert.fingerprint, Self::equal_key(&rule.equal, &alert)),
                Ok(false) => index.remove(&alert.fingerprint),
                Err(err) => {
                    tracing::warn!(fingerprint = %alert.fingerprint, error = %err, "inhibition source match failed, leaving index unchanged");
                }
            }
        }
    }

    pub fn mark_resolved(&self, fingerprint: &str) {
        self.active.mark_resolved(fingerprint);
        let mut indices = self.indices.write();
        for index in indices.iter_mut() {
            index.remove(fingerprint);
        }
    }

    /// Whether `alert` is currently inhibited by any rule. A rule never
    /// inhibits an alert against itself: if the candidate source is the
    /// same fingerprint as `alert`, it's skipped.
    pub fn is_inhibited(&self, alert: &Alert) -> AppResult<bool> {
        let indices = self.indices.read();
        for (rule, index) in self.rules.iter().zip(indices.iter()) {
            if !matches_all(&rule.target_matchers, &alert.labels, &self.regex_cache)? {
                continue;
            }

            let key = Self::equal_key(&rule.equal, alert);
            let Some(sources) = index.by_key.get(&key) else {
                continue;
            };
            if sources.iter().any(|fp| fp != &alert.fingerprint) {
                return Ok(true);
            }
        }

        Ok(false)
    }
}
