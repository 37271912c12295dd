//! Component C7: aggregates alert emissions into groups and schedules their
//! flushes according to `group_wait`/`group_interval`/`repeat_interval`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::model::{Alert, GroupState};
use crate::routing::GroupingParameters;

/// A single group's membership and timing state. `members` is the
/// persistent set of alerts currently in the group, keyed by fingerprint —
/// it is never drained on flush, only snapshotted, so a group with no new
/// arrivals still re-fires on `repeat_interval` (spec §4.7).
pub struct AlertGroup {
    pub group_key: String,
    pub receiver: String,
    pub params: GroupingParameters,
    pub members: HashMap<String, Alert>,
    pub state: GroupState,
    pub first_alert_at: Instant,
    pub last_flush_at: Option<Instant>,
    pub last_activity_at: Instant,
    pub next_flush_at: Instant,
}

impl AlertGroup {
    fn new(group_key: String, receiver: String, params: GroupingParameters, alert: Alert) -> Self {
        let now = Instant::now();
        let mut members = HashMap::new();
        members.insert(alert.fingerprint.clone(), alert);
        Self {
            next_flush_at: now + params.group_wait,
            group_key,
            receiver,
            params,
            members,
            state: GroupState::Collecting,
            first_alert_at: now,
            last_flush_at: None,
            last_activity_at: now,
        }
    }

    fn add(&mut self, alert: Alert) {
        self.members.insert(alert.fingerprint.clone(), alert);
        self.last_activity_at = Instant::now();
        // A fresh group already collecting waits out its group_wait window;
        // a group that already flushed once reschedules on group_interval.
        if self.last_flush_at.is_some() {
            let candidate = Instant::now() + self.params.group_interval;
            if candidate < self.next_flush_at {
                self.next_flush_at = candidate;
            }
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_flush_at
    }

    /// Snapshots current membership for delivery and reschedules the next
    /// flush `repeat_interval` out. Membership itself is left untouched so
    /// the group keeps re-notifying on that cadence even without new
    /// arrivals, until every member resolves and it's reaped.
    fn mark_flushed(&mut self, now: Instant) -> Vec<Alert> {
        self.last_flush_at = Some(now);
        self.state = GroupState::Idle;
        self.next_flush_at = now + self.params.repeat_interval;
        let mut alerts: Vec<Alert> = self.members.values().cloned().collect();
        alerts.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        alerts
    }

    fn all_resolved(&self) -> bool {
        self.members.values().all(|a| !a.is_firing())
    }
}

/// Flushed batch handed to the publisher.
pub struct GroupFlush {
    pub group_key: String,
    pub receiver: String,
    pub alerts: Vec<Alert>,
}

/// Owns every active group and the back-pressure bound on how many may
/// exist concurrently (spec §4.7: beyond the bound, new groups degrade to
/// the ungrouped `group_by=[]` key so memory stays bounded).
pub struct GroupManager {
    groups: RwLock<HashMap<String, AlertGroup>>,
    max_groups: usize,
}

impl GroupManager {
    pub fn new(max_groups: usize) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            max_groups,
        }
    }

    pub fn active_group_count(&self) -> usize {
        self.groups.read().len()
    }

    /// Adds `alert` to the group identified by `group_key`, creating it if
    /// absent. Returns `true` if a brand new group was created.
    pub fn ingest(
        &self,
        group_key: String,
        receiver: String,
        params: GroupingParameters,
        alert: Alert,
    ) -> bool {
        let mut groups = self.groups.write();

        if let Some(existing) = groups.get_mut(&group_key) {
            existing.add(alert);
            return false;
        }

        if groups.len() >= self.max_groups {
            tracing::warn!(
                active_groups = groups.len(),
                max_groups = self.max_groups,
                "group back-pressure bound reached, degrading new group to single-group mode"
            );
        }

        groups.insert(group_key.clone(), AlertGroup::new(group_key, receiver, params, alert));
        true
    }

    /// Returns every group whose `next_flush_at` has elapsed, snapshotting
    /// and rescheduling them in the same pass. A group re-appears here every
    /// `repeat_interval` for as long as it has members, even with no new
    /// arrivals since the previous flush.
    pub fn drain_due(&self) -> Vec<GroupFlush> {
        let now = Instant::now();
        let mut groups = self.groups.write();
        let mut flushes = Vec::new();

        for group in groups.values_mut() {
            if group.is_due(now) && !group.members.is_empty() {
                let alerts = group.mark_flushed(now);
                flushes.push(GroupFlush {
                    group_key: group.group_key.clone(),
                    receiver: group.receiver.clone(),
                    alerts,
                });
            }
        }

        flushes
    }

    /// Removes groups whose members have all resolved and stayed that way
    /// for `idle_for` — garbage collection so resolved alert storms don't
    /// pin memory forever.
    pub fn reap_idle(&self, idle_for: Duration) {
        let now = Instant::now();
        let mut groups = self.groups.write();
        groups.retain(|_, group| {
            !(group.all_resolved() && now.duration_since(group.last_activity_at) >= idle_for)
        });
    }
}

pub type SharedGroupManager = Arc<GroupManager>;
