//! Component C9: user-created, time-bounded suppressions. The active set is
//! kept in memory and refreshed on every CRUD operation plus a periodic
//! sweep, so `is_silenced` never touches the store on the hot path.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::AppResult;
use crate::matcher::{matches_all, RegexCache};
use crate::model::{Alert, Silence, SilenceStatus};

#[derive(Default)]
struct SilenceSet {
    by_id: HashMap<Uuid, Silence>,
}

pub struct SilenceEngine {
    set: RwLock<SilenceSet>,
    regex_cache: Arc<RegexCache>,
}

impl SilenceEngine {
    pub fn new(regex_cache: Arc<RegexCache>) -> Self {
        Self {
            set: RwLock::new(SilenceSet::default()),
            regex_cache,
        }
    }

    /// Seeds the in-memory set from durable storage at startup.
    pub fn load(&self, silences: Vec<Silence>) {
        let mut set = self.set.write();
        set.by_id = silences.into_iter().map(|s| (s.id, s)).collect();
    }

    pub fn upsert(&self, silence: Silence) {
        self.set.write().by_id.insert(silence.id, silence);
    }

    pub fn remove(&self, id: Uuid) {
        self.set.write().by_id.remove(&id);
    }

    pub fn get(&self, id: Uuid) -> Option<Silence> {
        self.set.read().by_id.get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Silence> {
        self.set.read().by_id.values().cloned().collect()
    }

    /// Whether `alert` matches at least one currently-active silence, and
    /// the ids of every silence that matched (spec §4.9: "all matching ids
    /// are reported for audit", not just the first one found).
    pub fn is_silenced(&self, alert: &Alert) -> AppResult<(bool, Vec<Uuid>)> {
        let now = Utc::now();
        let mut matched = Vec::new();
        for silence in self.set.read().by_id.values() {
            if silence.status_at(now) != SilenceStatus::Active {
                continue;
            }
            if matches_all(&silence.matchers, &alert.labels, &self.regex_cache)? {
                matched.push(silence.id);
            }
        }
        Ok((!matched.is_empty(), matched))
    }

    /// Drops silences whose `ends_at` is older than `retention`, called
    /// periodically by the same sweep that refreshes the active set.
    pub fn sweep_expired(&self, retention: chrono::Duration) {
        let cutoff = Utc::now() - retention;
        self.set.write().by_id.retain(|_, s| s.ends_at >= cutoff);
    }
}

pub type SharedSilenceEngine = Arc<SilenceEngine>;
