//! Component C3: two-tier classification cache. L1 is an in-process bounded
//! LRU; L2 is a shared Redis-backed tier with a TTL so multiple processes
//! reuse classifications. L2 failures degrade to L1-only rather than failing
//! the request, the same "cache errors never fail the caller" posture the
//! donor's DNS cache uses for lookups.

mod l1;
mod l2;

use std::sync::Arc;
use std::time::Duration;

use crate::model::Classification;

pub use l1::L1Cache;
pub use l2::L2Cache;

/// Facade the classifier talks to. Reads check L1 then L2 (promoting L2
/// hits back into L1); writes go to both tiers.
pub struct ClassificationCache {
    l1: L1Cache,
    l2: Option<L2Cache>,
}

impl ClassificationCache {
    pub fn new(l1_capacity: usize, l2: Option<L2Cache>) -> Self {
        Self {
            l1: L1Cache::new(l1_capacity),
            l2,
        }
    }

    pub async fn get(&self, fingerprint: &str) -> Option<Classification> {
        if let Some(hit) = self.l1.get(fingerprint) {
            return Some(hit);
        }

        let l2 = self.l2.as_ref()?;
        match l2.get(fingerprint).await {
            Ok(Some(hit)) => {
                self.l1.put(fingerprint, hit.clone());
                Some(hit)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "l2 classification cache read failed, degrading to l1 only");
                None
            }
        }
    }

    /// Writes both tiers. L2 write failures are logged but never surfaced:
    /// a cache miss on the next read just costs a re-classification.
    pub async fn put(&self, fingerprint: &str, classification: Classification, ttl: Duration) {
        self.l1.put(fingerprint, classification.clone());
        if let Some(l2) = &self.l2 {
            if let Err(err) = l2.put(fingerprint, &classification, ttl).await {
                tracing::warn!(error = %err, "l2 classification cache write failed");
            }
        }
    }

    /// Rebuilds L1 from L2's membership set at startup (spec §4.3/§6), so a
    /// freshly-restarted process doesn't re-classify everything L2 already
    /// knows about. A no-op without an L2 tier. Best-effort: a failed load
    /// for one fingerprint is logged and skipped rather than aborting the
    /// whole rebuild.
    pub async fn rebuild_l1(&self) {
        let Some(l2) = &self.l2 else {
            return;
        };

        let members = match l2.members().await {
            Ok(members) => members,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list l2 cache membership, skipping l1 rebuild");
                return;
            }
        };

        let mut rebuilt = 0usize;
        for fingerprint in &members {
            match l2.get(fingerprint).await {
                Ok(Some(classification)) => {
                    self.l1.put(fingerprint, classification);
                    rebuilt += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(fingerprint, error = %err, "failed to load l2 entry during l1 rebuild");
                }
            }
        }

        tracing::info!(candidates = members.len(), rebuilt, "rebuilt l1 cache from l2 membership set");
    }
}

pub type SharedClassificationCache = Arc<ClassificationCache>;
