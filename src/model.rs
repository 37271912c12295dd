//! Core data model shared across the pipeline.
//!
//! These types are the canonical representation of an alert and everything
//! derived from it. They are intentionally storage-agnostic: [`crate::store`]
//! maps them onto SQLite rows, [`crate::ingress`] maps inbound JSON onto
//! them, and the Alertmanager-compatible `/api/v2/silences` routes map them
//! onto the upstream JSON shapes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Firing/resolved status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Firing => "firing",
            AlertStatus::Resolved => "resolved",
        }
    }
}

/// The canonical unit after parsing a webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub fingerprint: String,
    pub alert_name: String,
    pub namespace: Option<String>,
    pub status: AlertStatus,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub generator_url: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl Alert {
    /// `namespace`/`alert_name` are denormalized from labels for indexing;
    /// recompute them whenever labels change.
    pub fn denormalize(&mut self) {
        self.alert_name = self
            .labels
            .get("alertname")
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        self.namespace = self.labels.get("namespace").cloned();
    }

    pub fn is_firing(&self) -> bool {
        matches!(self.status, AlertStatus::Firing)
    }

    /// Value used for group-key construction when a label is absent.
    pub fn label_or_missing(&self, name: &str) -> String {
        self.labels
            .get(name)
            .cloned()
            .unwrap_or_else(|| "<missing>".to_string())
    }
}

/// Where a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Llm,
    RuleBased,
    Cached,
}

/// Alert severity as assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    /// Normalizes a raw `severity` label value per spec §4.5: variants of
    /// critical/warning collapse, anything else defaults to info.
    pub fn normalize(raw: &str) -> Severity {
        match raw.to_ascii_lowercase().as_str() {
            "critical" | "crit" | "fatal" => Severity::Critical,
            "warn" | "warning" => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// Enrichment produced by the classifier for a fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub fingerprint: String,
    pub severity: Severity,
    pub confidence: f32,
    pub reasoning: String,
    pub recommendations: Vec<String>,
    pub source: ClassificationSource,
    pub produced_at: DateTime<Utc>,
}

impl Classification {
    /// Identical-content writes must not bump `produced_at` (spec §3
    /// invariant). Compares everything except the timestamp.
    pub fn content_equals(&self, other: &Classification) -> bool {
        self.severity == other.severity
            && (self.confidence - other.confidence).abs() < f32::EPSILON
            && self.reasoning == other.reasoning
            && self.recommendations == other.recommendations
            && self.source == other.source
    }
}

/// Matcher operator, per the Alertmanager string grammar `label<op>value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "=~")]
    Regex,
    #[serde(rename = "!~")]
    NotRegex,
}

/// A single label predicate. Regex variants carry a compiled pattern that is
/// populated lazily by [`crate::matcher::CompiledMatcher`]; the raw form here
/// is what's parsed from YAML/webhook input and stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

/// A rule suppressing target alerts while a matching source alert fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InhibitionRule {
    pub source_matchers: Vec<Matcher>,
    pub target_matchers: Vec<Matcher>,
    pub equal: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceStatus {
    Pending,
    Active,
    Expired,
}

/// A user-created, time-bounded suppression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Silence {
    pub id: Uuid,
    pub created_by: String,
    pub comment: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub matchers: Vec<Matcher>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Silence {
    /// `status` is derived from the clock, never stored as ground truth.
    pub fn status_at(&self, now: DateTime<Utc>) -> SilenceStatus {
        if now < self.starts_at {
            SilenceStatus::Pending
        } else if now < self.ends_at {
            SilenceStatus::Active
        } else {
            SilenceStatus::Expired
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.ends_at <= self.starts_at {
            return Err("ends_at must be after starts_at");
        }
        if self.comment.len() < 3 {
            return Err("comment must be at least 3 characters");
        }
        if self.matchers.is_empty() || self.matchers.len() > 100 {
            return Err("matchers must contain between 1 and 100 entries");
        }
        Ok(())
    }
}

/// Runtime aggregation state for a routing-tree emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    Collecting,
    Flushing,
    Idle,
}

/// A named external destination a receiver fans out to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishingTarget {
    pub name: String,
    /// Name of the [`crate::routing::ReceiverConfig`] this target belongs
    /// to; a receiver fans out to every enabled target bound to it.
    pub receiver: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub endpoint: String,
    pub credentials_ref: Option<String>,
    pub filter_config: TargetFilterConfig,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Slack,
    Pagerduty,
    Rootly,
    Webhook,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetFilterConfig {
    pub min_severity: Option<Severity>,
    pub min_confidence: Option<f32>,
    #[serde(default)]
    pub excluded_labels: Vec<Matcher>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    Success,
    Failure,
    Skipped,
}

/// One attempt at delivering a bundle to one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishingResult {
    pub fingerprint: String,
    pub target_name: String,
    pub outcome: PublishOutcome,
    pub http_status: Option<u16>,
    pub duration_ms: i64,
    pub attempt: u32,
    pub error_kind: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_normalizes_aliases() {
        assert_eq!(Severity::normalize("crit"), Severity::Critical);
        assert_eq!(Severity::normalize("FATAL"), Severity::Critical);
        assert_eq!(Severity::normalize("warn"), Severity::Warning);
        assert_eq!(Severity::normalize("banana"), Severity::Info);
    }

    #[test]
    fn silence_status_transitions_with_clock() {
        let now = Utc::now();
        let silence = Silence {
            id: Uuid::new_v4(),
            created_by: "alice".into(),
            comment: "maintenance".into(),
            starts_at: now + chrono::Duration::minutes(1),
            ends_at: now + chrono::Duration::minutes(10),
            matchers: vec![Matcher {
                name: "alertname".into(),
                op: MatchOp::Eq,
                value: "HighCPU".into(),
            }],
            created_at: now,
            updated_at: now,
        };

        assert_eq!(silence.status_at(now), SilenceStatus::Pending);
        assert_eq!(
            silence.status_at(now + chrono::Duration::minutes(2)),
            SilenceStatus::Active
        );
        assert_eq!(
            silence.status_at(now + chrono::Duration::minutes(11)),
            SilenceStatus::Expired
        );
    }

    #[test]
    fn silence_validation_rejects_short_comment() {
        let now = Utc::now();
        let silence = Silence {
            id: Uuid::new_v4(),
            created_by: "alice".into(),
            comment: "hi".into(),
            starts_at: now,
            ends_at: now + chrono::Duration::minutes(1),
            matchers: vec![Matcher {
                name: "alertname".into(),
                op: MatchOp::Eq,
                value: "HighCPU".into(),
            }],
            created_at: now,
            updated_at: now,
        };
        assert!(silence.validate().is_err());
    }
}
