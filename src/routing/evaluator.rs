//! RouteEvaluator (component C6): depth-first matching against the
//! routing tree, producing one or more `(receiver, GroupingParameters)`
//! emissions with inherited grouping parameters.

use std::time::Duration;

use crate::error::AppResult;
use crate::matcher::{matches_all, RegexCache};
use crate::model::Alert;

use super::config::{GroupBy, GroupingParameters, RouteNode, RoutingConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct RouteEmission {
    pub receiver: String,
    pub params: GroupingParameters,
}

/// Inherited state threaded down the tree; each field falls back to the
/// parent's resolved value when a child node leaves it unset.
#[derive(Clone)]
struct Inherited {
    group_by: GroupBy,
    group_wait: Duration,
    group_interval: Duration,
    repeat_interval: Duration,
    mute_time_intervals: Vec<String>,
    active_time_intervals: Vec<String>,
}

impl Inherited {
    fn root(node: &RouteNode) -> Self {
        Self {
            group_by: node.group_by.clone().unwrap_or(GroupBy::None),
            group_wait: node
                .group_wait
                .map(Into::into)
                .unwrap_or(Duration::from_secs(30)),
            group_interval: node
                .group_interval
                .map(Into::into)
                .unwrap_or(Duration::from_secs(300)),
            repeat_interval: node
                .repeat_interval
                .map(Into::into)
                .unwrap_or(Duration::from_secs(14400)),
            mute_time_intervals: node.mute_time_intervals.clone(),
            active_time_intervals: node.active_time_intervals.clone(),
        }
    }

    fn overlay(&self, node: &RouteNode) -> Self {
        Self {
            group_by: node.group_by.clone().unwrap_or_else(|| self.group_by.clone()),
            group_wait: node.group_wait.map(Into::into).unwrap_or(self.group_wait),
            group_interval: node
                .group_interval
                .map(Into::into)
                .unwrap_or(self.group_interval),
            repeat_interval: node
                .repeat_interval
                .map(Into::into)
                .unwrap_or(self.repeat_interval),
            mute_time_intervals: if node.mute_time_intervals.is_empty() {
                self.mute_time_intervals.clone()
            } else {
                node.mute_time_intervals.clone()
            },
            active_time_intervals: if node.active_time_intervals.is_empty() {
                self.active_time_intervals.clone()
            } else {
                node.active_time_intervals.clone()
            },
        }
    }

    fn into_params(self) -> GroupingParameters {
        GroupingParameters {
            group_by: self.group_by,
            group_wait: self.group_wait,
            group_interval: self.group_interval,
            repeat_interval: self.repeat_interval,
            mute_time_intervals: self.mute_time_intervals,
            active_time_intervals: self.active_time_intervals,
        }
    }
}

pub struct RouteEvaluator<'a> {
    config: &'a RoutingConfig,
    regex_cache: &'a RegexCache,
}

impl<'a> RouteEvaluator<'a> {
    pub fn new(config: &'a RoutingConfig, regex_cache: &'a RegexCache) -> Self {
        Self {
            config,
            regex_cache,
        }
    }

    /// Evaluates the tree for `alert`. Always returns at least one emission:
    /// if the full traversal produces zero matches, the root receiver (when
    /// present) is used as a fallback.
    pub fn evaluate(&self, alert: &Alert) -> AppResult<Vec<RouteEmission>> {
        let mut emissions = Vec::new();
        let root_inherited = Inherited::root(&self.config.route);
        self.visit(&self.config.route, alert, &root_inherited, true, &mut emissions)?;

        if emissions.is_empty() {
            if let Some(receiver) = &self.config.route.receiver {
                emissions.push(RouteEmission {
                    receiver: receiver.clone(),
                    params: root_inherited.into_params(),
                });
            }
        }

        Ok(emissions)
    }

    /// Visits `node`, returning whether it (or a descendant) emitted.
    fn visit(
        &self,
        node: &RouteNode,
        alert: &Alert,
        parent: &Inherited,
        is_root: bool,
        emissions: &mut Vec<RouteEmission>,
    ) -> AppResult<bool> {
        if !is_root && !matches_all(&node.matchers, &alert.labels, self.regex_cache)? {
            return Ok(false);
        }

        let inherited = parent.overlay(node);

        let mut child_matched = false;
        for child in &node.routes {
            let matched = self.visit(child, alert, &inherited, false, emissions)?;
            if matched {
                child_matched = true;
                if !child.continue_ {
                    break;
                }
            }
        }

        if child_matched {
            return Ok(true);
        }

        if let Some(receiver) = &node.receiver {
            emissions.push(RouteEmission {
                receiver: receiver.clone(),
                params: inherited.into_params(),
            });
            return Ok(true);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertStatus;
    use chrono::Utc;
    use std::collections::HashMap;

    fn alert(labels: &[(&str, &str)]) -> Alert {
        Alert {
            fingerprint: "abc".into(),
            alert_name: labels
                .iter()
                .find(|(k, _)| *k == "alertname")
                .map(|(_, v)| v.to_string())
                .unwrap_or_default(),
            namespace: None,
            status: AlertStatus::Firing,
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            annotations: HashMap::new(),
            starts_at: Utc::now(),
            ends_at: None,
            generator_url: None,
            received_at: Utc::now(),
        }
    }

    fn sample_config() -> RoutingConfig {
        super::super::config::RoutingConfig::parse(
            r#"
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
    - receiver: warnings
      matchers:
        - "severity=warning"
receivers:
  - name: default
  - name: paging
  - name: warnings
"#,
        )
        .unwrap()
    }

    #[test]
    fn matching_child_wins_over_fallback() {
        let cfg = sample_config();
        let cache = RegexCache::default();
        let eval = RouteEvaluator::new(&cfg, &cache);
        let a = alert(&[("alertname", "HighCPU"), ("severity", "critical")]);
        let emissions = eval.evaluate(&a).unwrap();
        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0].receiver, "paging");
    }

    #[test]
    fn falls_back_to_root_receiver_when_nothing_matches() {
        let cfg = sample_config();
        let cache = RegexCache::default();
        let eval = RouteEvaluator::new(&cfg, &cache);
        let a = alert(&[("alertname", "HighCPU"), ("severity", "info")]);
        let emissions = eval.evaluate(&a).unwrap();
        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0].receiver, "default");
    }

    #[test]
    fn continue_true_allows_multiple_receivers() {
        let cfg = RoutingConfig::parse(
            r#"
route:
  receiver: default
  routes:
    - receiver: paging
      matchers: ["severity=critical"]
      continue: true
    - receiver: audit
      matchers: ["severity=critical"]
receivers:
  - name: default
  - name: paging
  - name: audit
"#,
        )
        .unwrap();
        let cache = RegexCache::default();
        let eval = RouteEvaluator::new(&cfg, &cache);
        let a = alert(&[("severity", "critical")]);
        let emissions = eval.evaluate(&a).unwrap();
        let receivers: Vec<_> = emissions.iter().map(|e| e.receiver.as_str()).collect();
        assert_eq!(receivers, vec!["paging", "audit"]);
    }

    #[test]
    fn grouping_parameters_inherit_from_parent() {
        let cfg = sample_config();
        let cache = RegexCache::default();
        let eval = RouteEvaluator::new(&cfg, &cache);
        let a = alert(&[("alertname", "HighCPU"), ("severity", "critical")]);
        let emissions = eval.evaluate(&a).unwrap();
        assert_eq!(emissions[0].params.group_wait, Duration::from_secs(5));
        assert_eq!(emissions[0].params.group_interval, Duration::from_secs(30));
    }
}
