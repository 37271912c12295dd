//! Component C11: turns an inbound webhook payload into a batch of
//! [`Alert`]s. Two payload schemas are accepted — Alertmanager's own
//! `v0.25+` webhook body, and a generic `{alerts: [...]}` shape — detected
//! by the presence of Alertmanager-specific top-level fields.

use std::collections::HashMap;

use chrono::Utc;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::fingerprint::fingerprint;
use crate::model::{Alert, AlertStatus};

/// Payload size cap (spec §4.11): anything larger is rejected before JSON
/// parsing even begins.
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct AlertmanagerWebhook {
    #[allow(dead_code)]
    version: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    group_key: Option<String>,
    alerts: Vec<AlertmanagerAlert>,
}

#[derive(Debug, Deserialize)]
struct AlertmanagerAlert {
    status: String,
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
    #[serde(rename = "startsAt")]
    starts_at: chrono::DateTime<Utc>,
    #[serde(rename = "endsAt", default)]
    ends_at: Option<chrono::DateTime<Utc>>,
    #[serde(rename = "generatorURL", default)]
    generator_url: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GenericWebhook {
    alerts: Vec<GenericAlert>,
}

#[derive(Debug, Deserialize)]
struct GenericAlert {
    status: Option<String>,
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
    starts_at: Option<chrono::DateTime<Utc>>,
    ends_at: Option<chrono::DateTime<Utc>>,
    generator_url: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

/// Parses `body` into a batch of alerts. Unknown fields on each alert
/// object are preserved in `annotations` under an `_ext.` prefix rather
/// than dropped, so a classifier or publisher downstream can still see
/// them even though this crate doesn't model them explicitly.
pub fn parse_webhook(body: &[u8]) -> AppResult<Vec<Alert>> {
    if body.len() > MAX_PAYLOAD_BYTES {
        return Err(AppError::validation(
            "parse_webhook",
            format!("payload exceeds {MAX_PAYLOAD_BYTES} bytes"),
        ));
    }

    let raw: serde_json::Value = serde_json::from_slice(body)?;

    if raw.get("version").is_some() || raw.get("groupKey").is_some() || raw.get("receiver").is_some() {
        let parsed: AlertmanagerWebhook = serde_json::from_value(raw)?;
        return parsed.alerts.into_iter().map(from_alertmanager_alert).collect();
    }

    let parsed: GenericWebhook = serde_json::from_value(raw)?;
    parsed.alerts.into_iter().map(from_generic_alert).collect()
}

/// Merges unrecognized top-level alert fields into `annotations` under an
/// `_ext.` prefix so a classifier or publisher downstream can still see
/// them even though this crate doesn't model them explicitly.
fn capture_extra_fields(annotations: &mut HashMap<String, String>, extra: HashMap<String, serde_json::Value>) {
    for (key, value) in extra {
        let rendered = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        annotations.insert(format!("_ext.{key}"), rendered);
    }
}

fn from_alertmanager_alert(raw: AlertmanagerAlert) -> AppResult<Alert> {
    let status = parse_status(&raw.status)?;
    let alert_name = raw
        .labels
        .get("alertname")
        .cloned()
        .ok_or_else(|| AppError::validation("parse_webhook", "alert missing required 'alertname' label"))?;

    let mut annotations = raw.annotations;
    capture_extra_fields(&mut annotations, raw.extra);

    Ok(Alert {
        fingerprint: fingerprint(&raw.labels),
        alert_name,
        namespace: raw.labels.get("namespace").cloned(),
        status,
        labels: raw.labels,
        annotations,
        starts_at: raw.starts_at,
        ends_at: raw.ends_at,
        generator_url: raw.generator_url,
        received_at: Utc::now(),
    })
}

fn from_generic_alert(raw: GenericAlert) -> AppResult<Alert> {
    let status = raw
        .status
        .as_deref()
        .map(parse_status)
        .transpose()?
        .unwrap_or(AlertStatus::Firing);

    let alert_name = raw
        .labels
        .get("alertname")
        .cloned()
        .ok_or_else(|| AppError::validation("parse_webhook", "alert missing required 'alertname' label"))?;

    let mut annotations = raw.annotations;
    capture_extra_fields(&mut annotations, raw.extra);

    Ok(Alert {
        fingerprint: fingerprint(&raw.labels),
        alert_name,
        namespace: raw.labels.get("namespace").cloned(),
        status,
        labels: raw.labels,
        annotations,
        starts_at: raw.starts_at.unwrap_or_else(Utc::now),
        ends_at: raw.ends_at,
        generator_url: raw.generator_url,
        received_at: Utc::now(),
    })
}

fn parse_status(raw: &str) -> AppResult<AlertStatus> {
    match raw {
        "firing" => Ok(AlertStatus::Firing),
        "resolved" => Ok(AlertStatus::Resolved),
        other => Err(AppError::validation(
            "parse_webhook",
            format!("unknown alert status '{other}'"),
        )),
    }
}

/// Bearer/API-key check against the configured ingress token. `None`
/// disables auth entirely (spec §4.11 default for local/dev deployments).
pub fn check_auth(configured_token: Option<&str>, header_value: Option<&str>) -> AppResult<()> {
    let Some(expected) = configured_token else {
        return Ok(());
    };

    let presented = header_value
        .and_then(|v| v.strip_prefix("Bearer "))
        .or(header_value);

    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(AppError::auth("check_auth", "missing or invalid credential")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alertmanager_schema() {
        let body = br#"{
            "version": "4",
            "groupKey": "g1",
            "receiver": "default",
            "status": "firing",
            "alerts": [{
                "status": "firing",
                "labels": {"alertname": "HighCPU", "severity": "critical"},
                "annotations": {"summary": "cpu hot"},
                "startsAt": "2026-01-01T00:00:00Z",
                "endsAt": "0001-01-01T00:00:00Z"
            }]
        }"#;
        let alerts = parse_webhook(body).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_name, "HighCPU");
        assert!(alerts[0].is_firing());
    }

    #[test]
    fn parses_generic_schema() {
        let body = br#"{"alerts": [{"labels": {"alertname": "Disk"}, "status": "firing"}]}"#;
        let alerts = parse_webhook(body).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_name, "Disk");
    }

    #[test]
    fn rejects_alert_without_alertname() {
        let body = br#"{"alerts": [{"labels": {"severity": "critical"}, "status": "firing"}]}"#;
        assert!(parse_webhook(body).is_err());
    }

    #[test]
    fn unknown_alert_fields_are_captured_under_ext_prefix() {
        let body = br#"{"alerts": [{
            "labels": {"alertname": "Disk"},
            "status": "firing",
            "fingerprint": "upstream-fp-123"
        }]}"#;
        let alerts = parse_webhook(body).unwrap();
        assert_eq!(alerts[0].annotations.get("_ext.fingerprint").map(String::as_str), Some("upstream-fp-123"));
    }

    #[test]
    fn oversized_payload_rejected() {
        let body = vec![b'a'; MAX_PAYLOAD_BYTES + 1];
        assert!(parse_webhook(&body).is_err());
    }

    #[test]
    fn auth_disabled_when_no_token_configured() {
        assert!(check_auth(None, None).is_ok());
    }

    #[test]
    fn auth_rejects_wrong_token() {
        assert!(check_auth(Some("secret"), Some("Bearer wrong")).is_err());
    }

    #[test]
    fn auth_accepts_matching_bearer_token() {
        assert!(check_auth(Some("secret"), Some("Bearer secret")).is_ok());
    }
}
