//! Routing tree parsing (component C6 input), the Alertmanager-subset
//! grammar described in spec §6.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::HumanDuration;
use crate::error::{AppError, AppResult};
use crate::matcher::parse_matcher_string;
use crate::model::Matcher;

/// `group_by` can name specific labels, request "all labels present on the
/// alert" via `...`, or collapse to one group via `[]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GroupBy {
    Labels(Vec<String>),
    All,
    None,
}

impl<'de> Deserialize<'de> for GroupBy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw: Vec<String> = Vec::deserialize(deserializer)?;
        Ok(if raw.is_empty() {
            GroupBy::None
        } else if raw.len() == 1 && raw[0] == "..." {
            GroupBy::All
        } else {
            GroupBy::Labels(raw)
        })
    }
}

/// A single node of the routing tree. Matches the `route:` YAML object from
/// spec §6; string matchers are parsed into [`Matcher`] at load time.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RouteNode {
    pub receiver: Option<String>,
    pub group_by: Option<GroupBy>,
    pub group_wait: Option<HumanDuration>,
    pub group_interval: Option<HumanDuration>,
    pub repeat_interval: Option<HumanDuration>,
    #[serde(default, deserialize_with = "deserialize_matcher_strings")]
    pub matchers: Vec<Matcher>,
    #[serde(default, rename = "continue")]
    pub continue_: bool,
    #[serde(default)]
    pub mute_time_intervals: Vec<String>,
    #[serde(default)]
    pub active_time_intervals: Vec<String>,
    #[serde(default)]
    pub routes: Vec<RouteNode>,
}

fn deserialize_matcher_strings<'de, D>(deserializer: D) -> Result<Vec<Matcher>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Vec<String> = Vec::deserialize(deserializer)?;
    raw.iter()
        .map(|s| parse_matcher_string(s).map_err(serde::de::Error::custom))
        .collect()
}

/// Resolved grouping parameters a route emission carries, after inheriting
/// any field a child node omitted from its parent (spec §4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingParameters {
    pub group_by: GroupBy,
    pub group_wait: std::time::Duration,
    pub group_interval: std::time::Duration,
    pub repeat_interval: std::time::Duration,
    pub mute_time_intervals: Vec<String>,
    pub active_time_intervals: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReceiverConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InhibitRuleConfig {
    #[serde(deserialize_with = "deserialize_matcher_strings")]
    pub source_matchers: Vec<Matcher>,
    #[serde(deserialize_with = "deserialize_matcher_strings")]
    pub target_matchers: Vec<Matcher>,
    #[serde(default)]
    pub equal: Vec<String>,
}

/// The parsed routing tree plus receivers and inhibition rules (spec §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    pub route: RouteNode,
    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,
    #[serde(default)]
    pub inhibit_rules: Vec<InhibitRuleConfig>,
}

impl RoutingConfig {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let config: RoutingConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks receiver references resolve and every node with children
    /// eventually reaches a receiver — the invariants from spec §3.
    fn validate(&self) -> AppResult<()> {
        let known: HashSet<&str> = self.receivers.iter().map(|r| r.name.as_str()).collect();

        fn walk<'a>(node: &'a RouteNode, known: &HashSet<&str>) -> AppResult<()> {
            if let Some(receiver) = &node.receiver {
                if !known.contains(receiver.as_str()) {
                    return Err(AppError::config(
                        "validate_routing_config",
                        format!("route references unknown receiver '{receiver}'"),
                    ));
                }
            }
            for child in &node.routes {
                walk(child, known)?;
            }
            Ok(())
        }

        if self.route.receiver.is_none() && self.route.routes.is_empty() {
            return Err(AppError::config(
                "validate_routing_config",
                "root route has no receiver and no child routes",
            ));
        }

        walk(&self.route, &known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
route:
  receiver: default
  group_by: [alertname]
  group_wait: 5s
  group_interval: 30s
  repeat_interval: 1h
  routes:
    - receiver: paging
      matchers:
        - "severity=critical"
      continue: false
receivers:
  - name: default
  - name: paging
inhibit_rules:
  - source_matchers:
      - "alertname=NodeDown"
    target_matchers:
      - "alertname=InstanceDown"
    equal:
      - instance
"#;

    #[test]
    fn parses_sample_routing_config() {
        let cfg = RoutingConfig::parse(SAMPLE).unwrap();
        assert_eq!(cfg.route.receiver.as_deref(), Some("default"));
        assert_eq!(cfg.route.routes.len(), 1);
        assert_eq!(cfg.inhibit_rules.len(), 1);
        assert!(matches!(
            cfg.route.group_by,
            Some(GroupBy::Labels(ref labels)) if labels == &vec!["alertname".to_string()]
        ));
    }

    #[test]
    fn rejects_unknown_receiver_reference() {
        let bad = r#"
route:
  receiver: default
  routes:
    - receiver: paging
      matchers:
        - "severity=critical"
receivers:
  - name: default
"#;
        let err = RoutingConfig::parse(bad).unwrap_err();
        assert!(err.to_string().contains("paging"));
    }

    #[test]
    fn group_by_ellipsis_parses_to_all() {
        let yaml = r#"
route:
  receiver: default
  group_by: ["..."]
receivers:
  - name: default
"#;
        let cfg = RoutingConfig::parse(yaml).unwrap();
        assert_eq!(cfg.route.group_by, Some(GroupBy::All));
    }

    #[test]
    fn group_by_empty_list_parses_to_none() {
        let yaml = r#"
route:
  receiver: default
  group_by: []
receivers:
  - name: default
"#;
        let cfg = RoutingConfig::parse(yaml).unwrap();
        assert_eq!(cfg.route.group_by, Some(GroupBy::None));
    }

    #[test]
    fn round_trips_through_yaml() {
        let cfg = RoutingConfig::parse(SAMPLE).unwrap();
        let rendered = serde_yaml::to_string(&cfg).unwrap();
        let reparsed = RoutingConfig::parse(&rendered).unwrap();
        assert_eq!(cfg.route.receiver, reparsed.route.receiver);
        assert_eq!(cfg.receivers.len(), reparsed.receivers.len());
        assert_eq!(cfg.inhibit_rules.len(), reparsed.inhibit_rules.len());
    }
}
