//! Component C12: the async worker pool that drives an ingested alert
//! through the full pipeline — dedup, store, inhibition, silence,
//! classify, route, group, publish. Alerts are hashed onto a fixed set of
//! workers by fingerprint so per-fingerprint ordering is preserved (two
//! updates to the same alert are never reordered by the pool).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::classifier::Classifier;
use crate::config::ProcessorConfig;
use crate::dedup::Deduplicator;
use crate::error::{AppError, AppResult};
use crate::fingerprint::keyed_fingerprint;
use crate::grouping::SharedGroupManager;
use crate::inhibition::InhibitionEngine;
use crate::matcher::RegexCache;
use crate::model::Alert;
use crate::publisher::Publisher;
use crate::routing::{GroupBy, RouteEvaluator};
use crate::routing::RoutingConfig;
use crate::silence::SharedSilenceEngine;
use crate::store::AlertStore;

pub struct AsyncProcessor {
    senders: Vec<mpsc::Sender<Alert>>,
    config: ProcessorConfig,
}

struct WorkerContext {
    store: Arc<AlertStore>,
    dedup: Arc<Deduplicator>,
    classifier: Arc<Classifier>,
    routing: Arc<RoutingConfig>,
    regex_cache: Arc<RegexCache>,
    groups: SharedGroupManager,
    silences: SharedSilenceEngine,
    inhibition: Arc<InhibitionEngine>,
    job_deadline: Duration,
}

impl AsyncProcessor {
    /// Spawns `config.workers` workers, each draining its own bounded
    /// channel. Returns a handle whose `submit` hashes the alert to the
    /// right worker by fingerprint.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        config: ProcessorConfig,
        store: Arc<AlertStore>,
        classifier: Arc<Classifier>,
        routing: Arc<RoutingConfig>,
        regex_cache: Arc<RegexCache>,
        groups: SharedGroupManager,
        silences: SharedSilenceEngine,
        inhibition: Arc<InhibitionEngine>,
    ) -> Arc<Self> {
        let dedup = Arc::new(Deduplicator::new(config.dedup_window.into()));
        let mut senders = Vec::with_capacity(config.workers);

        for _ in 0..config.workers {
            let (tx, mut rx) = mpsc::channel::<Alert>(config.queue_depth);
            let ctx = WorkerContext {
                store: store.clone(),
                dedup: dedup.clone(),
                classifier: classifier.clone(),
                routing: routing.clone(),
                regex_cache: regex_cache.clone(),
                groups: groups.clone(),
                silences: silences.clone(),
                inhibition: inhibition.clone(),
                job_deadline: config.job_deadline.into(),
            };

            tokio::spawn(async move {
                while let Some(alert) = rx.recv().await {
                    let deadline = ctx.job_deadline;
                    if let Err(err) = timeout(deadline, process_one(&ctx, alert)).await {
                        tracing::error!(error = %err, "alert processing exceeded job deadline");
                    }
                }
            });

            senders.push(tx);
        }

        Arc::new(Self { senders, config })
    }

    /// Submits `alert` for processing, back-pressuring the caller if the
    /// assigned worker's queue is full rather than dropping silently.
    pub async fn submit(&self, alert: Alert) -> AppResult<()> {
        let worker_idx = worker_index(&alert.fingerprint, self.senders.len());
        self.senders[worker_idx]
            .send(alert)
            .await
            .map_err(|_| AppError::internal("submit_alert", "worker channel closed"))
    }

    pub fn worker_count(&self) -> usize {
        self.config.workers
    }
}

/// Group key per spec §4.6/§3: `receiver` plus a hash of the sorted
/// `group_by` label values, not the alert's own identity — two distinct
/// alerts sharing the same `group_by` values must land in the same group.
fn group_key(receiver: &str, group_by: &GroupBy, alert: &Alert) -> String {
    let hash = match group_by {
        GroupBy::None => keyed_fingerprint(&[], |_| None),
        GroupBy::All => {
            let names: Vec<&str> = alert.labels.keys().map(String::as_str).collect();
            keyed_fingerprint(&names, |n| alert.labels.get(n).cloned())
        }
        GroupBy::Labels(names) => {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            keyed_fingerprint(&names, |n| alert.labels.get(n).cloned())
        }
    };
    format!("{receiver}:{hash}")
}

fn worker_index(fingerprint: &str, worker_count: usize) -> usize {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    fingerprint.hash(&mut hasher);
    (hasher.finish() as usize) % worker_count.max(1)
}

/// The nine-step pipeline for a single alert.
async fn process_one(ctx: &WorkerContext, mut alert: Alert) {
    alert.denormalize();

    // 1. Persist the raw alert so it's durable even if later steps fail.
    if let Err(err) = ctx.store.upsert_alert(&alert).await {
        tracing::error!(fingerprint = %alert.fingerprint, error = %err, "failed to persist alert");
        return;
    }

    // 2. Track firing state for inhibition.
    if alert.is_firing() {
        ctx.inhibition.mark_firing(alert.clone());
    } else {
        ctx.inhibition.mark_resolved(&alert.fingerprint);
    }

    // 3. Deduplicate repeat firings within the window.
    if !ctx.dedup.should_process(&alert) {
        tracing::debug!(fingerprint = %alert.fingerprint, "dropped duplicate alert");
        return;
    }

    // 4. Silence check.
    match ctx.silences.is_silenced(&alert) {
        Ok((true, silence_ids)) => {
            tracing::debug!(fingerprint = %alert.fingerprint, ?silence_ids, "alert is silenced");
            return;
        }
        Ok((false, _)) => {}
        Err(err) => tracing::warn!(error = %err, "silence check failed, proceeding unsilenced"),
    }

    // 5. Inhibition check.
    match ctx.inhibition.is_inhibited(&alert) {
        Ok(true) => {
            tracing::debug!(fingerprint = %alert.fingerprint, "alert is inhibited");
            return;
        }
        Ok(false) => {}
        Err(err) => tracing::warn!(error = %err, "inhibition check failed, proceeding uninhibited"),
    }

    // 6. Classification (cache -> LLM -> rule-based fallback).
    let classification = ctx.classifier.classify(&alert).await;
    if let Err(err) = ctx.store.upsert_classification(&classification).await {
        tracing::warn!(fingerprint = %alert.fingerprint, error = %err, "failed to persist classification");
    }

    // 7. Routing: resolve receiver(s) and grouping params.
    let evaluator = RouteEvaluator::new(&ctx.routing, &ctx.regex_cache);
    let emissions = match evaluator.evaluate(&alert) {
        Ok(e) => e,
        Err(err) => {
            tracing::error!(error = %err, "route evaluation failed");
            return;
        }
    };

    for emission in emissions {
        // 8. Group the alert, deferring actual publish to the group's
        // flush timer (drained by the caller's background sweep).
        let group_key = group_key(&emission.receiver, &emission.params.group_by, &alert);
        ctx.groups.ingest(group_key, emission.receiver.clone(), emission.params, alert.clone());
    }
}

/// Background loop (step 9 of the pipeline): periodically drains every
/// group whose flush timer has elapsed and publishes it. Runs for the
/// lifetime of the process; `interval` should be well under the smallest
/// configured `group_wait` so flushes aren't delayed by more than a tick.
pub async fn run_group_flush_loop(
    groups: SharedGroupManager,
    store: Arc<AlertStore>,
    publisher: Arc<Publisher>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        for flush in groups.drain_due() {
            let mut classifications = Vec::with_capacity(flush.alerts.len());
            for alert in &flush.alerts {
                match store.get_classification(&alert.fingerprint).await {
                    Ok(Some(c)) => classifications.push(c),
                    Ok(None) => {}
                    Err(err) => tracing::warn!(error = %err, "failed to load classification for publish"),
                }
            }

            let results = publisher.publish(&flush.receiver, &flush.alerts, &classifications).await;
            for result in &results {
                if let Err(err) = store.record_publish_result(result).await {
                    tracing::warn!(error = %err, "failed to record publish result");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_index_is_deterministic_for_same_fingerprint() {
        assert_eq!(worker_index("fp1", 10), worker_index("fp1", 10));
    }

    #[test]
    fn worker_index_stays_in_bounds() {
        for i in 0..100 {
            let fp = format!("fp{i}");
            assert!(worker_index(&fp, 7) < 7);
        }
    }

    fn alert(fp: &str, pairs: &[(&str, &str)]) -> Alert {
        Alert {
            fingerprint: fp.into(),
            alert_name: "HighCPU".into(),
            namespace: None,
            status: crate::model::AlertStatus::Firing,
            labels: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            annotations: Default::default(),
            starts_at: chrono::Utc::now(),
            ends_at: None,
            generator_url: None,
            received_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn group_key_is_shared_across_alerts_with_same_group_by_values() {
        let group_by = GroupBy::Labels(vec!["alertname".into()]);
        let a = alert("fp1", &[("alertname", "HighCPU"), ("instance", "web-01")]);
        let b = alert("fp2", &[("alertname", "HighCPU"), ("instance", "web-02")]);
        assert_eq!(group_key("default", &group_by, &a), group_key("default", &group_by, &b));
    }

    #[test]
    fn group_key_differs_across_group_by_values() {
        let group_by = GroupBy::Labels(vec!["alertname".into()]);
        let a = alert("fp1", &[("alertname", "HighCPU")]);
        let b = alert("fp2", &[("alertname", "HighMemory")]);
        assert_ne!(group_key("default", &group_by, &a), group_key("default", &group_by, &b));
    }

    #[test]
    fn group_key_none_collapses_every_alert_to_one_group_per_receiver() {
        let a = alert("fp1", &[("alertname", "HighCPU")]);
        let b = alert("fp2", &[("alertname", "HighMemory")]);
        assert_eq!(group_key("default", &GroupBy::None, &a), group_key("default", &GroupBy::None, &b));
    }
}
