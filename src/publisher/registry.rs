//! Component C14: declarative target discovery with a copy-on-write
//! snapshot pointer, so publishing never blocks on a config reload.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::model::PublishingTarget;

pub struct TargetRegistry {
    snapshot: RwLock<Arc<Vec<PublishingTarget>>>,
    health: RwLock<Arc<std::collections::HashMap<String, bool>>>,
}

impl TargetRegistry {
    pub fn new(targets: Vec<PublishingTarget>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(targets)),
            health: RwLock::new(Arc::new(std::collections::HashMap::new())),
        }
    }

    pub fn targets(&self) -> Arc<Vec<PublishingTarget>> {
        self.snapshot.read().clone()
    }

    pub fn reload(&self, targets: Vec<PublishingTarget>) {
        *self.snapshot.write() = Arc::new(targets);
    }

    pub fn is_healthy(&self, name: &str) -> bool {
        self.health.read().get(name).copied().unwrap_or(true)
    }

    pub fn set_health(&self, name: &str, healthy: bool) {
        let mut updated = (**self.health.read()).clone();
        updated.insert(name.to_string(), healthy);
        *self.health.write() = Arc::new(updated);
    }

    /// Enabled targets bound to `receiver`, healthy or not — an unhealthy
    /// target is never removed from the fanout list (spec §4.14), only
    /// marked, so the publisher can fast-fail it and still record an
    /// outcome rather than silently dropping it.
    pub fn eligible_targets_for(&self, receiver: &str) -> Vec<PublishingTarget> {
        self.targets()
            .iter()
            .filter(|t| t.enabled && t.receiver == receiver)
            .cloned()
            .collect()
    }

    /// Probes every enabled target and records the result via
    /// [`Self::set_health`] (spec §4.14: "on a schedule and on boot"). A
    /// target is considered healthy if it answers at all, even with a
    /// non-2xx status — reachability is what matters here, not the
    /// endpoint's own opinion of the request we happened to send it.
    pub async fn health_check_all(&self, http: &reqwest::Client) {
        for target in self.targets().iter().filter(|t| t.enabled) {
            let healthy = http.head(&target.endpoint).send().await.is_ok();
            self.set_health(&target.name, healthy);
        }
    }
}

/// Default interval between health probes, matched against
/// `target_health_check_interval` in config.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TargetFilterConfig, TargetType};

    fn target(name: &str) -> PublishingTarget {
        PublishingTarget {
            name: name.into(),
            receiver: "default".into(),
            target_type: TargetType::Webhook,
            endpoint: "https://example.com".into(),
            credentials_ref: None,
            filter_config: TargetFilterConfig::default(),
            enabled: true,
        }
    }

    #[test]
    fn unhealthy_targets_stay_eligible_but_marked() {
        let registry = TargetRegistry::new(vec![target("a"), target("b")]);
        registry.set_health("a", false);
        let eligible = registry.eligible_targets_for("default");
        assert_eq!(eligible.len(), 2);
        assert!(!registry.is_healthy("a"));
        assert!(registry.is_healthy("b"));
    }

    #[test]
    fn reload_replaces_snapshot() {
        let registry = TargetRegistry::new(vec![target("a")]);
        registry.reload(vec![target("a"), target("b")]);
        assert_eq!(registry.targets().len(), 2);
    }
}
