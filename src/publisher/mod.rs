//! Component C13: parallel per-target fanout with per-target retry,
//! circuit breaker, and timeout. Each target's formatter is a pure
//! function (`formatters`); delivery itself follows the donor webhook
//! delivery's retry-then-give-up shape.

mod formatters;
mod registry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;

use crate::config::PublisherConfig;
use crate::error::AppError;
use crate::model::{Alert, Classification, PublishOutcome, PublishingResult, PublishingTarget, Severity};
use crate::resilience::{backoff_delay, CircuitBreaker, CircuitBreakerConfig};

pub use registry::{TargetRegistry, DEFAULT_HEALTH_CHECK_INTERVAL};

/// Parses the `Retry-After` header per spec §4.13. Only the delay-seconds
/// form is honored; an HTTP-date value falls back to the caller's own
/// exponential backoff rather than failing the delivery attempt.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    let seconds: u64 = raw.trim().parse().ok()?;
    Some(Duration::from_secs(seconds))
}

fn severity_rank(s: Severity) -> u8 {
    match s {
        Severity::Info => 0,
        Severity::Warning => 1,
        Severity::Critical => 2,
    }
}

pub struct Publisher {
    http: reqwest::Client,
    config: PublisherConfig,
    registry: Arc<TargetRegistry>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Publisher {
    pub fn new(config: PublisherConfig, registry: Arc<TargetRegistry>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout.into())
            .build()
            .expect("reqwest client builder never fails with these options");

        Self {
            http,
            config,
            registry,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn breaker_for(&self, target_name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .entry(target_name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
                    failure_threshold: self.config.breaker_failure_threshold,
                    cooldown: self.config.breaker_cooldown.into(),
                }))
            })
            .clone()
    }

    /// Applies `target.filter_config` to decide whether this bundle should
    /// even be sent to `target` (spec §4.13: targets can opt out of
    /// low-severity or low-confidence alerts).
    fn passes_filter(target: &PublishingTarget, classifications: &[Classification]) -> bool {
        if let Some(min_severity) = target.filter_config.min_severity {
            let threshold = severity_rank(min_severity);
            if !classifications.iter().any(|c| severity_rank(c.severity) >= threshold) {
                return false;
            }
        }
        if let Some(min_confidence) = target.filter_config.min_confidence {
            if !classifications.iter().any(|c| c.confidence >= min_confidence) {
                return false;
            }
        }
        true
    }

    /// Fans `alerts` out to every eligible, filter-matching target
    /// concurrently, returning one [`PublishingResult`] per attempted
    /// target. A target the filter excludes, or that's currently marked
    /// unhealthy, is reported as `Skipped` without an HTTP attempt — it
    /// stays in the fanout list so its outcome keeps being recorded
    /// instead of just vanishing from view (spec §4.14).
    pub async fn publish(
        &self,
        receiver: &str,
        alerts: &[Alert],
        classifications: &[Classification],
    ) -> Vec<PublishingResult> {
        let targets = self.registry.eligible_targets_for(receiver);

        let futures = targets.into_iter().map(|target| {
            let alerts = alerts.to_vec();
            let classifications = classifications.to_vec();
            async move {
                let fingerprint = alerts.first().map(|a| a.fingerprint.clone()).unwrap_or_default();

                if !self.registry.is_healthy(&target.name) {
                    return PublishingResult {
                        fingerprint,
                        target_name: target.name.clone(),
                        outcome: PublishOutcome::Skipped,
                        http_status: None,
                        duration_ms: 0,
                        attempt: 0,
                        error_kind: Some("target_unhealthy".to_string()),
                        emitted_at: Utc::now(),
                    };
                }

                if !Self::passes_filter(&target, &classifications) {
                    return PublishingResult {
                        fingerprint,
                        target_name: target.name.clone(),
                        outcome: PublishOutcome::Skipped,
                        http_status: None,
                        duration_ms: 0,
                        attempt: 0,
                        error_kind: None,
                        emitted_at: Utc::now(),
                    };
                }
                self.deliver_with_retry(receiver, &target, &alerts, &classifications).await
            }
        });

        futures::future::join_all(futures).await
    }

    async fn deliver_with_retry(
        &self,
        receiver: &str,
        target: &PublishingTarget,
        alerts: &[Alert],
        classifications: &[Classification],
    ) -> PublishingResult {
        let breaker = self.breaker_for(&target.name);
        let fingerprint = alerts.first().map(|a| a.fingerprint.clone()).unwrap_or_default();

        if !breaker.allow_request() {
            return PublishingResult {
                fingerprint,
                target_name: target.name.clone(),
                outcome: PublishOutcome::Skipped,
                http_status: None,
                duration_ms: 0,
                attempt: 0,
                error_kind: Some("circuit_open".to_string()),
                emitted_at: Utc::now(),
            };
        }

        let payload = formatters::format_payload(target.target_type, receiver, alerts, classifications);
        let mut last_result = None;
        let mut retry_after: Option<Duration> = None;

        for attempt in 1..=self.config.max_retries.max(1) {
            let started = Instant::now();
            let outcome = self.http.post(&target.endpoint).json(&payload).send().await;
            let duration_ms = started.elapsed().as_millis() as i64;
            retry_after = None;

            match outcome {
                Ok(response) if response.status().is_success() => {
                    breaker.record_success();
                    return PublishingResult {
                        fingerprint,
                        target_name: target.name.clone(),
                        outcome: PublishOutcome::Success,
                        http_status: Some(response.status().as_u16()),
                        duration_ms,
                        attempt,
                        error_kind: None,
                        emitted_at: Utc::now(),
                    };
                }
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 {
                        retry_after = parse_retry_after(response.headers());
                    }
                    breaker.record_failure();
                    last_result = Some(PublishingResult {
                        fingerprint: fingerprint.clone(),
                        target_name: target.name.clone(),
                        outcome: PublishOutcome::Failure,
                        http_status: Some(status.as_u16()),
                        duration_ms,
                        attempt,
                        error_kind: Some(format!("http_{}", status.as_u16())),
                        emitted_at: Utc::now(),
                    });
                    let retryable = status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 408;
                    if !retryable {
                        break;
                    }
                }
                Err(err) => {
                    breaker.record_failure();
                    let app_err: AppError = err.into();
                    last_result = Some(PublishingResult {
                        fingerprint: fingerprint.clone(),
                        target_name: target.name.clone(),
                        outcome: PublishOutcome::Failure,
                        http_status: None,
                        duration_ms,
                        attempt,
                        error_kind: Some(app_err.kind.to_string()),
                        emitted_at: Utc::now(),
                    });
                    if !app_err.retryable {
                        break;
                    }
                }
            }

            if attempt < self.config.max_retries {
                let delay = retry_after
                    .unwrap_or_else(|| backoff_delay(attempt, Duration::from_millis(200), Duration::from_secs(10)));
                tokio::time::sleep(delay).await;
            }
        }

        last_result.expect("at least one delivery attempt always runs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TargetFilterConfig, TargetType};

    #[test]
    fn filter_excludes_below_min_confidence() {
        use crate::model::{ClassificationSource, Severity};
        let target = PublishingTarget {
            name: "t1".into(),
            receiver: "default".into(),
            target_type: TargetType::Webhook,
            endpoint: "https://example.com".into(),
            credentials_ref: None,
            filter_config: TargetFilterConfig {
                min_severity: None,
                min_confidence: Some(0.8),
                excluded_labels: vec![],
            },
            enabled: true,
        };
        let low_confidence = Classification {
            fingerprint: "fp1".into(),
            severity: Severity::Critical,
            confidence: 0.2,
            reasoning: "x".into(),
            recommendations: vec![],
            source: ClassificationSource::RuleBased,
            produced_at: Utc::now(),
        };
        assert!(!Publisher::passes_filter(&target, &[low_confidence]));
    }

    fn target(name: &str) -> PublishingTarget {
        PublishingTarget {
            name: name.into(),
            receiver: "default".into(),
            target_type: TargetType::Webhook,
            endpoint: "https://127.0.0.1:1/unreachable".into(),
            credentials_ref: None,
            filter_config: TargetFilterConfig::default(),
            enabled: true,
        }
    }

    #[test]
    fn parse_retry_after_reads_delay_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "30".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(30)));
    }

    #[test]
    fn parse_retry_after_ignores_non_numeric_values() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn open_circuit_skips_without_an_http_attempt() {
        let registry = Arc::new(TargetRegistry::new(vec![target("t1")]));
        let publisher = Publisher::new(
            crate::config::PublisherConfig {
                max_retries: 1,
                ..Default::default()
            },
            registry,
        );

        let breaker = publisher.breaker_for("t1");
        for _ in 0..10 {
            breaker.record_failure();
        }
        assert!(!breaker.allow_request());

        let results = publisher.publish("default", &[], &[]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, PublishOutcome::Skipped);
        assert_eq!(results[0].error_kind.as_deref(), Some("circuit_open"));
    }

    #[tokio::test]
    async fn unhealthy_target_skips_without_an_http_attempt() {
        let registry = Arc::new(TargetRegistry::new(vec![target("t1")]));
        registry.set_health("t1", false);
        let publisher = Publisher::new(crate::config::PublisherConfig::default(), registry);

        let results = publisher.publish("default", &[], &[]).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, PublishOutcome::Skipped);
        assert_eq!(results[0].error_kind.as_deref(), Some("target_unhealthy"));
    }
}
