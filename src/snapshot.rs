use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Health of a single topology node as reported by the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Degraded,
    Critical,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Health {
    pub const ALL: [Health; 4] = [
        Health::Healthy,
        Health::Degraded,
        Health::Critical,
        Health::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Degraded => "degraded",
            Health::Critical => "critical",
            Health::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four node collections of a snapshot. Node ids are only unique within
/// one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Servers,
    Storage,
    Backup,
    Switches,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Servers,
        Category::Storage,
        Category::Backup,
        Category::Switches,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Servers => "servers",
            Category::Storage => "storage",
            Category::Backup => "backup",
            Category::Switches => "switches",
        }
    }

    /// Singular form used in change-log messages.
    pub fn singular(&self) -> &'static str {
        match self {
            Category::Servers => "server",
            Category::Storage => "storage",
            Category::Backup => "backup",
            Category::Switches => "switch",
        }
    }
}

/// One edge from a server/storage/backup node to a switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchLink {
    pub switch_id: i64,
    pub port: String,
}

/// A server, storage or backup node with its embedded switch connections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub kind: Option<String>,
    pub role: Option<String>,
    pub health: Health,
    pub connections: Vec<SwitchLink>,
}

/// A network switch with its port-to-component map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Switch {
    pub id: i64,
    pub name: String,
    pub kind: Option<String>,
    pub role: Option<String>,
    pub health: Health,
    pub connected_components: BTreeMap<String, i64>,
}

/// Uniform read view over nodes and switches, used by the change detector
/// and the alert deduplicator.
#[derive(Debug, Clone, Copy)]
pub struct EntityRef<'a> {
    pub id: i64,
    pub name: &'a str,
    pub health: Health,
}

impl Node {
    fn entity_ref(&self) -> EntityRef<'_> {
        EntityRef {
            id: self.id,
            name: &self.name,
            health: self.health,
        }
    }
}

impl Switch {
    fn entity_ref(&self) -> EntityRef<'_> {
        EntityRef {
            id: self.id,
            name: &self.name,
            health: self.health,
        }
    }
}

/// One fully materialized point-in-time view of the topology. Built once per
/// poll and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub cloud_name: Option<String>,
    pub servers: Vec<Node>,
    pub storage: Vec<Node>,
    pub backup: Vec<Node>,
    pub switches: Vec<Switch>,
}

impl Snapshot {
    pub fn category(&self, category: Category) -> Vec<EntityRef<'_>> {
        match category {
            Category::Servers => self.servers.iter().map(Node::entity_ref).collect(),
            Category::Storage => self.storage.iter().map(Node::entity_ref).collect(),
            Category::Backup => self.backup.iter().map(Node::entity_ref).collect(),
            Category::Switches => self.switches.iter().map(Switch::entity_ref).collect(),
        }
    }

    /// Every node of every category, in category order.
    pub fn all_entities(&self) -> Vec<(Category, EntityRef<'_>)> {
        let mut out = Vec::with_capacity(self.total_nodes());
        for category in Category::ALL {
            for entity in self.category(category) {
                out.push((category, entity));
            }
        }
        out
    }

    pub fn total_nodes(&self) -> usize {
        self.servers.len() + self.storage.len() + self.backup.len() + self.switches.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthBucket {
    pub count: usize,
    pub percent: u8,
}

/// Per-health counts and integer percentages over one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: HealthBucket,
    pub degraded: HealthBucket,
    pub critical: HealthBucket,
    pub unknown: HealthBucket,
}

impl HealthSummary {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let total = snapshot.total_nodes();
        let mut counts = [0_usize; 4];
        for (_, entity) in snapshot.all_entities() {
            match entity.health {
                Health::Healthy => counts[0] += 1,
                Health::Degraded => counts[1] += 1,
                Health::Critical => counts[2] += 1,
                Health::Unknown => counts[3] += 1,
            }
        }

        Self {
            total,
            healthy: bucket(counts[0], total),
            degraded: bucket(counts[1], total),
            critical: bucket(counts[2], total),
            unknown: bucket(counts[3], total),
        }
    }

    pub fn bucket(&self, health: Health) -> HealthBucket {
        match health {
            Health::Healthy => self.healthy,
            Health::Degraded => self.degraded,
            Health::Critical => self.critical,
            Health::Unknown => self.unknown,
        }
    }
}

fn bucket(count: usize, total: usize) -> HealthBucket {
    let percent = if total > 0 {
        (count * 100 / total) as u8
    } else {
        0
    };
    HealthBucket { count, percent }
}
