//! Component C4: the LLM classification client. Wraps an HTTP call to a
//! configured classification endpoint with retry, jithttered backoff, and a
//! circuit breaker so a struggling LLM backend degrades the pipeline to its
//! rule-based fallback instead of stalling it.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{AppError, AppResult};
use crate::model::{Alert, Severity};
use crate::resilience::{backoff_delay, CircuitBreaker, CircuitBreakerConfig};

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    alert_name: &'a str,
    labels: &'a std::collections::HashMap<String, String>,
    annotations: &'a std::collections::HashMap<String, String>,
}

/// The strict response schema the endpoint must return. A malformed or
/// partial response is treated as a failure, not a partial success — the
/// classifier falls back to rule-based classification rather than trust an
/// incomplete severity/confidence pair.
#[derive(Debug, Deserialize)]
pub struct ClassifyResponse {
    pub severity: String,
    pub confidence: f32,
    pub reasoning: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

pub struct LlmClassification {
    pub severity: Severity,
    pub confidence: f32,
    pub reasoning: String,
    pub recommendations: Vec<String>,
}

pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
    breaker: CircuitBreaker,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.time_budget.into())
            .build()
            .expect("reqwest client builder never fails with these options");

        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.breaker_failure_threshold,
            cooldown: config.breaker_cooldown.into(),
        });

        Self {
            http,
            config,
            breaker,
        }
    }

    /// Classifies `alert`, retrying transient failures up to
    /// `config.max_retries` times within the overall `time_budget`. Returns
    /// `Err(ErrorKind::CircuitOpen)` immediately if the breaker is open so
    /// the caller can fall back without waiting.
    pub async fn classify(&self, alert: &Alert) -> AppResult<LlmClassification> {
        if !self.breaker.allow_request() {
            return Err(AppError::circuit_open("llm_classify"));
        }

        let deadline = Instant::now() + Duration::from(self.config.time_budget);
        let body = ClassifyRequest {
            alert_name: &alert.alert_name,
            labels: &alert.labels,
            annotations: &alert.annotations,
        };

        let mut last_err = None;
        for attempt in 1..=self.config.max_retries.max(1) {
            if Instant::now() >= deadline {
                break;
            }

            match self.attempt(&body).await {
                Ok(response) => {
                    self.breaker.record_success();
                    return Ok(parse_response(response));
                }
                Err(err) => {
                    let retryable = err.retryable;
                    self.breaker.record_failure();
                    last_err = Some(err);
                    if !retryable {
                        break;
                    }
                    if attempt < self.config.max_retries {
                        let delay = backoff_delay(
                            attempt,
                            Duration::from_millis(200),
                            Duration::from_secs(5),
                        );
                        tokio::time::sleep(delay.min(deadline.saturating_duration_since(Instant::now())))
                            .await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| AppError::deadline_exceeded("llm_classify")))
    }

    async fn attempt(&self, body: &ClassifyRequest<'_>) -> AppResult<ClassifyResponse> {
        let response = self
            .http
            .post(&self.config.endpoint)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let retryable = status.is_server_error() || status.as_u16() == 429 || status.as_u16() == 408;
            let cause = format!("llm endpoint returned {status}");
            return Err(if retryable {
                AppError::transient_io("llm_classify", cause)
            } else {
                AppError::permanent_io("llm_classify", cause)
            });
        }

        Ok(response.json::<ClassifyResponse>().await?)
    }
}

fn parse_response(response: ClassifyResponse) -> LlmClassification {
    LlmClassification {
        severity: Severity::normalize(&response.severity),
        confidence: response.confidence.clamp(0.0, 1.0),
        reasoning: response.reasoning,
        recommendations: response.recommendations,
    }
}
