//! Component C5: orchestrates cache lookup, LLM classification, and the
//! rule-based fallback, with a single-flight guard so concurrent requests
//! for the same fingerprint never issue duplicate LLM calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;

use crate::cache::ClassificationCache;
use crate::llm::LlmClient;
use crate::model::{Alert, Classification, ClassificationSource, Severity};

/// Coalesces concurrent classification requests for the same fingerprint:
/// the first caller runs the work, later callers await its result instead
/// of issuing a second LLM call.
#[derive(Default)]
struct SingleFlight {
    inflight: AsyncMutex<HashMap<String, Arc<tokio::sync::Notify>>>,
}

impl SingleFlight {
    /// Returns `true` if this caller won the race and must perform the
    /// work (then call [`Self::complete`]); `false` if it should wait on
    /// the returned notifier for the winner to finish.
    async fn enter(&self, key: &str) -> (bool, Arc<tokio::sync::Notify>) {
        let mut inflight = self.inflight.lock().await;
        if let Some(notify) = inflight.get(key) {
            return (false, notify.clone());
        }
        let notify = Arc::new(tokio::sync::Notify::new());
        inflight.insert(key.to_string(), notify.clone());
        (true, notify)
    }

    async fn complete(&self, key: &str, notify: &tokio::sync::Notify) {
        self.inflight.lock().await.remove(key);
        notify.notify_waiters();
    }
}

pub struct Classifier {
    cache: Arc<ClassificationCache>,
    llm: Arc<LlmClient>,
    cache_ttl: Duration,
    single_flight: SingleFlight,
}

impl Classifier {
    pub fn new(cache: Arc<ClassificationCache>, llm: Arc<LlmClient>, cache_ttl: Duration) -> Self {
        Self {
            cache,
            llm,
            cache_ttl,
            single_flight: SingleFlight::default(),
        }
    }

    /// Returns the classification for `alert`, preferring cache, then the
    /// LLM, and finally the rule-based heuristic. Idempotent: re-classifying
    /// identical content never bumps `produced_at` in the stored cache entry.
    pub async fn classify(&self, alert: &Alert) -> Classification {
        if let Some(cached) = self.cache.get(&alert.fingerprint).await {
            return Classification {
                source: ClassificationSource::Cached,
                ..cached
            };
        }

        let (is_leader, notify) = self.single_flight.enter(&alert.fingerprint).await;
        if !is_leader {
            notify.notified().await;
            if let Some(cached) = self.cache.get(&alert.fingerprint).await {
                return Classification {
                    source: ClassificationSource::Cached,
                    ..cached
                };
            }
            return rule_based(alert);
        }

        let classification = match self.llm.classify(alert).await {
            Ok(result) => Classification {
                fingerprint: alert.fingerprint.clone(),
                severity: result.severity,
                confidence: result.confidence,
                reasoning: result.reasoning,
                recommendations: result.recommendations,
                source: ClassificationSource::Llm,
                produced_at: Utc::now(),
            },
            Err(err) => {
                tracing::warn!(
                    fingerprint = %alert.fingerprint,
                    error = %err,
                    "llm classification failed, falling back to rule-based"
                );
                rule_based(alert)
            }
        };

        self.store_idempotently(alert, &classification).await;
        self.single_flight.complete(&alert.fingerprint, &notify).await;

        classification
    }

    async fn store_idempotently(&self, alert: &Alert, classification: &Classification) {
        if let Some(existing) = self.cache.get(&alert.fingerprint).await {
            if existing.content_equals(classification) {
                return;
            }
        }
        self.cache
            .put(&alert.fingerprint, classification.clone(), self.cache_ttl)
            .await;
    }
}

/// Rule-based fallback (spec §4.5): severity is read straight off the
/// `severity` label with no LLM involvement, used both when the LLM is
/// unavailable and as the always-on baseline for unclassifiable alerts.
fn rule_based(alert: &Alert) -> Classification {
    let raw_severity = alert.labels.get("severity").map(String::as_str).unwrap_or("");
    let severity = Severity::normalize(raw_severity);

    Classification {
        fingerprint: alert.fingerprint.clone(),
        severity,
        confidence: 0.5,
        reasoning: "derived from severity label via rule-based fallback".to_string(),
        recommendations: Vec::new(),
        source: ClassificationSource::RuleBased,
        produced_at: Utc::now(),
    }
}
