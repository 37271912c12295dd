//! In-process L1 tier: a bounded LRU behind a read-preferring lock, mirroring
//! the donor cache's "many readers, occasional writer" access pattern.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::RwLock;

use crate::model::Classification;

pub struct L1Cache {
    inner: RwLock<LruCache<String, Classification>>,
}

impl L1Cache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap())),
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<Classification> {
        self.inner.write().get(fingerprint).cloned()
    }

    pub fn put(&self, fingerprint: &str, classification: Classification) {
        self.inner.write().put(fingerprint.to_string(), classification);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassificationSource, Severity};
    use chrono::Utc;

    fn sample(fingerprint: &str) -> Classification {
        Classification {
            fingerprint: fingerprint.to_string(),
            severity: Severity::Critical,
            confidence: 0.9,
            reasoning: "test".into(),
            recommendations: vec![],
            source: ClassificationSource::RuleBased,
            produced_at: Utc::now(),
        }
    }

    #[test]
    fn stores_and_retrieves() {
        let cache = L1Cache::new(2);
        cache.put("fp1", sample("fp1"));
        assert!(cache.get("fp1").is_some());
        assert!(cache.get("fp2").is_none());
    }

    #[test]
    fn evicts_least_recently_used_beyond_capacity() {
        let cache = L1Cache::new(1);
        cache.put("fp1", sample("fp1"));
        cache.put("fp2", sample("fp2"));
        assert!(cache.get("fp1").is_none());
        assert!(cache.get("fp2").is_some());
    }
}
