//! Pure functions turning a group flush into a target-type-specific body.
//! Kept side-effect free so they're trivial to unit test without a server.

use serde_json::{json, Value};

use crate::model::{Alert, Classification, TargetType};

pub fn format_payload(target_type: TargetType, receiver: &str, alerts: &[Alert], classifications: &[Classification]) -> Value {
    match target_type {
        TargetType::Slack => format_slack(receiver, alerts, classifications),
        TargetType::Pagerduty => format_pagerduty(receiver, alerts, classifications),
        TargetType::Rootly => format_rootly(receiver, alerts, classifications),
        TargetType::Webhook => format_generic(receiver, alerts, classifications),
    }
}

fn worst_severity(classifications: &[Classification]) -> &'static str {
    use crate::model::Severity;
    if classifications.iter().any(|c| c.severity == Severity::Critical) {
        "critical"
    } else if classifications.iter().any(|c| c.severity == Severity::Warning) {
        "warning"
    } else {
        "info"
    }
}

fn format_slack(receiver: &str, alerts: &[Alert], classifications: &[Classification]) -> Value {
    let severity = worst_severity(classifications);
    let names: Vec<&str> = alerts.iter().map(|a| a.alert_name.as_str()).collect();
    json!({
        "text": format!("[{severity}] {receiver}: {} alert(s) — {}", alerts.len(), names.join(", ")),
        "attachments": alerts.iter().map(|a| json!({
            "title": a.alert_name,
            "text": a.annotations.get("summary").cloned().unwrap_or_default(),
            "fields": a.labels,
        })).collect::<Vec<_>>(),
    })
}

fn format_pagerduty(receiver: &str, alerts: &[Alert], classifications: &[Classification]) -> Value {
    let severity = worst_severity(classifications);
    json!({
        "routing_key": receiver,
        "event_action": if alerts.iter().all(|a| !a.is_firing()) { "resolve" } else { "trigger" },
        "payload": {
            "summary": format!("{} alert(s) routed to {receiver}", alerts.len()),
            "severity": severity,
            "source": "sentrymux",
            "custom_details": {
                "fingerprints": alerts.iter().map(|a| a.fingerprint.clone()).collect::<Vec<_>>(),
            },
        },
    })
}

fn format_rootly(receiver: &str, alerts: &[Alert], classifications: &[Classification]) -> Value {
    json!({
        "incident": {
            "title": format!("{receiver}: {} alert(s)", alerts.len()),
            "severity": worst_severity(classifications),
            "alerts": alerts.iter().map(|a| json!({
                "fingerprint": a.fingerprint,
                "name": a.alert_name,
                "status": a.status.as_str(),
                "labels": a.labels,
            })).collect::<Vec<_>>(),
        }
    })
}

fn format_generic(receiver: &str, alerts: &[Alert], classifications: &[Classification]) -> Value {
    json!({
        "receiver": receiver,
        "alerts": alerts,
        "classifications": classifications,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertStatus, ClassificationSource, Severity};
    use chrono::Utc;
    use std::collections::HashMap;

    fn alert() -> Alert {
        Alert {
            fingerprint: "fp1".into(),
            alert_name: "HighCPU".into(),
            namespace: None,
            status: AlertStatus::Firing,
            labels: HashMap::new(),
            annotations: HashMap::new(),
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: None,
            received_at: Utc::now(),
        }
    }

    fn classification() -> Classification {
        Classification {
            fingerprint: "fp1".into(),
            severity: Severity::Critical,
            confidence: 0.9,
            reasoning: "x".into(),
            recommendations: vec![],
            source: ClassificationSource::RuleBased,
            produced_at: Utc::now(),
        }
    }

    #[test]
    fn slack_payload_includes_severity_and_count() {
        let payload = format_payload(TargetType::Slack, "default", &[alert()], &[classification()]);
        let text = payload["text"].as_str().unwrap();
        assert!(text.contains("critical"));
        assert!(text.contains('1'));
    }

    #[test]
    fn pagerduty_resolve_action_when_all_resolved() {
        let mut a = alert();
        a.status = AlertStatus::Resolved;
        let payload = format_payload(TargetType::Pagerduty, "default", &[a], &[classification()]);
        assert_eq!(payload["event_action"], "resolve");
    }
}
