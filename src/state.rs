use crate::diff;
use crate::snapshot::{Category, Health, HealthSummary, Snapshot};
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, UNIX_EPOCH};

/// Identifies a node across polls. Ids are only unique within a category, so
/// the alerted set is keyed by both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub category: Category,
    pub id: i64,
}

/// One timestamped line of the bounded change log.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChangeEntry {
    pub at_unix: i64,
    pub message: String,
}

/// A critical-state alert to be handed to the notifier. Produced by the
/// deduplicator; dispatch is the poll loop's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRequest {
    pub subject: String,
    pub body: String,
}

/// All reconciliation state of one monitor. Owned by the poll loop; readers
/// go through the shared lock and see either the pre- or post-poll state.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub started_at_unix: i64,
    pub last_poll_unix: i64,
    pub poll_cycles: u64,
    pub last_error: Option<String>,
    pub topology: Option<Snapshot>,
    pub summary: HealthSummary,
    pub recent_changes: VecDeque<ChangeEntry>,
    change_log_capacity: usize,
    alerted: HashSet<NodeKey>,
}

impl EngineState {
    pub fn new(now_unix: i64, change_log_capacity: usize) -> Self {
        Self {
            started_at_unix: now_unix,
            last_poll_unix: 0,
            poll_cycles: 0,
            last_error: None,
            topology: None,
            summary: HealthSummary::default(),
            recent_changes: VecDeque::new(),
            change_log_capacity: change_log_capacity.max(1),
            alerted: HashSet::new(),
        }
    }

    /// One reconcile step: detect changes against the previous snapshot, log
    /// them, update the alerted set, recompute the summary and swap the new
    /// snapshot in. Returns the alerts this cycle produced.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot, now_unix: i64) -> Vec<AlertRequest> {
        let events = diff::detect_changes(self.topology.as_ref(), &snapshot);
        for event in &events {
            self.push_change(now_unix, event.to_string());
        }

        let alerts = self.collect_critical_alerts(&snapshot, now_unix);
        self.summary = HealthSummary::from_snapshot(&snapshot);
        self.topology = Some(snapshot);
        self.last_poll_unix = now_unix;
        self.poll_cycles += 1;
        self.last_error = None;
        alerts
    }

    /// A failed fetch skips the cycle: the previous snapshot, change log and
    /// alerted set stay untouched.
    pub fn record_source_failure(&mut self, message: String) {
        self.last_error = Some(message);
    }

    pub fn active_alert_count(&self) -> usize {
        self.alerted.len()
    }

    pub fn is_alerted(&self, category: Category, id: i64) -> bool {
        self.alerted.contains(&NodeKey { category, id })
    }

    fn push_change(&mut self, at_unix: i64, message: String) {
        while self.recent_changes.len() >= self.change_log_capacity {
            self.recent_changes.pop_back();
        }
        self.recent_changes.push_front(ChangeEntry { at_unix, message });
    }

    /// Walks every node of the new snapshot. A critical node alerts once and
    /// enters the set; any non-critical observation removes it, so a node
    /// flapping critical -> healthy -> critical alerts again. Keys of nodes
    /// absent from the snapshot are dropped as well: a re-added node with the
    /// same id counts as new.
    fn collect_critical_alerts(&mut self, snapshot: &Snapshot, now_unix: i64) -> Vec<AlertRequest> {
        let mut alerts = Vec::new();
        let mut present = HashSet::new();

        for (category, entity) in snapshot.all_entities() {
            let key = NodeKey {
                category,
                id: entity.id,
            };
            present.insert(key);

            if entity.health == Health::Critical {
                if self.alerted.insert(key) {
                    alerts.push(critical_alert(entity.name, entity.id, now_unix));
                }
            } else {
                self.alerted.remove(&key);
            }
        }

        self.alerted.retain(|key| present.contains(key));
        alerts
    }
}

fn critical_alert(name: &str, id: i64, now_unix: i64) -> AlertRequest {
    AlertRequest {
        subject: format!("Critical Alert: {name}"),
        body: format!(
            "Critical Component Alert\nTime: {}\n{} (ID {}) is CRITICAL\n",
            format_unix(now_unix),
            name,
            id
        ),
    }
}

pub fn format_unix(ts: i64) -> String {
    let st = UNIX_EPOCH + Duration::from_secs(ts.max(0) as u64);
    humantime::format_rfc3339_seconds(st).to_string()
}
