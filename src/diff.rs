use crate::snapshot::{Category, Health, Snapshot};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One human-readable difference between two successive snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    InitialLoad,
    NoChanges,
    Added { category: Category, name: String },
    Removed { category: Category, name: String },
    HealthChanged { name: String, from: Health, to: Health },
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeEvent::InitialLoad => f.write_str("Initial load"),
            ChangeEvent::NoChanges => f.write_str("No changes"),
            ChangeEvent::Added { category, name } => {
                write!(f, "Added {}: {}", category.singular(), name)
            }
            ChangeEvent::Removed { category, name } => {
                write!(f, "Removed {}: {}", category.singular(), name)
            }
            ChangeEvent::HealthChanged { name, from, to } => {
                write!(f, "{} health: {} → {}", name, from, to)
            }
        }
    }
}

/// Compares two snapshots category by category. Event order is part of the
/// contract: categories in `Category::ALL` order; within a category additions
/// first (new-snapshot order), then removals (old-snapshot order), then
/// health transitions (new-snapshot order). Never returns an empty vector.
pub fn detect_changes(old: Option<&Snapshot>, new: &Snapshot) -> Vec<ChangeEvent> {
    let Some(old) = old else {
        return vec![ChangeEvent::InitialLoad];
    };

    let mut events = Vec::new();
    for category in Category::ALL {
        let old_entities = old.category(category);
        let new_entities = new.category(category);
        let old_by_id: HashMap<i64, Health> =
            old_entities.iter().map(|e| (e.id, e.health)).collect();
        let new_ids: HashSet<i64> = new_entities.iter().map(|e| e.id).collect();

        for entity in &new_entities {
            if !old_by_id.contains_key(&entity.id) {
                events.push(ChangeEvent::Added {
                    category,
                    name: entity.name.to_string(),
                });
            }
        }

        for entity in &old_entities {
            if !new_ids.contains(&entity.id) {
                events.push(ChangeEvent::Removed {
                    category,
                    name: entity.name.to_string(),
                });
            }
        }

        for entity in &new_entities {
            if let Some(previous) = old_by_id.get(&entity.id) {
                if *previous != entity.health {
                    events.push(ChangeEvent::HealthChanged {
                        name: entity.name.to_string(),
                        from: *previous,
                        to: entity.health,
                    });
                }
            }
        }
    }

    if events.is_empty() {
        events.push(ChangeEvent::NoChanges);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Node, Switch};
    use std::collections::BTreeMap;

    fn node(id: i64, name: &str, health: Health) -> Node {
        Node {
            id,
            name: name.to_string(),
            kind: None,
            role: None,
            health,
            connections: Vec::new(),
        }
    }

    fn switch(id: i64, name: &str, health: Health) -> Switch {
        Switch {
            id,
            name: name.to_string(),
            kind: None,
            role: None,
            health,
            connected_components: BTreeMap::new(),
        }
    }

    fn three_servers() -> Snapshot {
        Snapshot {
            servers: vec![
                node(1, "srv-1", Health::Healthy),
                node(2, "srv-2", Health::Healthy),
                node(3, "srv-3", Health::Healthy),
            ],
            ..Snapshot::default()
        }
    }

    #[test]
    fn first_poll_yields_initial_load() {
        let events = detect_changes(None, &three_servers());
        assert_eq!(events, vec![ChangeEvent::InitialLoad]);
        assert_eq!(events[0].to_string(), "Initial load");
    }

    #[test]
    fn identical_snapshots_yield_single_no_changes() {
        let snapshot = three_servers();
        let events = detect_changes(Some(&snapshot), &snapshot);
        assert_eq!(events, vec![ChangeEvent::NoChanges]);
        assert_eq!(events[0].to_string(), "No changes");
    }

    #[test]
    fn single_added_server_yields_exactly_one_event() {
        let old = three_servers();
        let mut new = old.clone();
        new.servers.push(node(4, "srv-4", Health::Healthy));

        let events = detect_changes(Some(&old), &new);
        assert_eq!(
            events,
            vec![ChangeEvent::Added {
                category: Category::Servers,
                name: "srv-4".to_string()
            }]
        );
        assert_eq!(events[0].to_string(), "Added server: srv-4");
    }

    #[test]
    fn add_remove_symmetry_under_snapshot_swap() {
        let old = three_servers();
        let mut new = old.clone();
        new.servers.remove(1);
        new.storage.push(node(1, "ceph-1", Health::Healthy));

        let forward = detect_changes(Some(&old), &new);
        assert_eq!(
            forward,
            vec![
                ChangeEvent::Removed {
                    category: Category::Servers,
                    name: "srv-2".to_string()
                },
                ChangeEvent::Added {
                    category: Category::Storage,
                    name: "ceph-1".to_string()
                },
            ]
        );

        let backward = detect_changes(Some(&new), &old);
        assert_eq!(
            backward,
            vec![
                ChangeEvent::Added {
                    category: Category::Servers,
                    name: "srv-2".to_string()
                },
                ChangeEvent::Removed {
                    category: Category::Storage,
                    name: "ceph-1".to_string()
                },
            ]
        );
    }

    #[test]
    fn health_transition_states_old_and_new() {
        let old = three_servers();
        let mut new = old.clone();
        new.servers[1].health = Health::Critical;

        let events = detect_changes(Some(&old), &new);
        assert_eq!(
            events,
            vec![ChangeEvent::HealthChanged {
                name: "srv-2".to_string(),
                from: Health::Healthy,
                to: Health::Critical,
            }]
        );
        assert_eq!(events[0].to_string(), "srv-2 health: healthy → critical");

        let inverted = detect_changes(Some(&new), &old);
        assert_eq!(
            inverted,
            vec![ChangeEvent::HealthChanged {
                name: "srv-2".to_string(),
                from: Health::Critical,
                to: Health::Healthy,
            }]
        );
    }

    #[test]
    fn events_follow_category_and_kind_order() {
        let old = Snapshot {
            servers: vec![
                node(1, "srv-1", Health::Healthy),
                node(2, "srv-2", Health::Healthy),
            ],
            storage: vec![node(1, "ceph-1", Health::Healthy)],
            switches: vec![switch(1, "sw-1", Health::Healthy)],
            ..Snapshot::default()
        };
        let new = Snapshot {
            servers: vec![
                node(1, "srv-1", Health::Degraded),
                node(3, "srv-3", Health::Healthy),
            ],
            storage: vec![node(1, "ceph-1", Health::Healthy)],
            switches: vec![switch(1, "sw-1", Health::Critical)],
            ..Snapshot::default()
        };

        let lines: Vec<String> = detect_changes(Some(&old), &new)
            .iter()
            .map(ChangeEvent::to_string)
            .collect();
        assert_eq!(
            lines,
            vec![
                "Added server: srv-3",
                "Removed server: srv-2",
                "srv-1 health: healthy → degraded",
                "sw-1 health: healthy → critical",
            ]
        );
    }

    #[test]
    fn same_id_in_different_categories_does_not_collide() {
        let old = Snapshot {
            servers: vec![node(1, "srv-1", Health::Healthy)],
            ..Snapshot::default()
        };
        let new = Snapshot {
            servers: vec![node(1, "srv-1", Health::Healthy)],
            backup: vec![node(1, "nas-1", Health::Healthy)],
            ..Snapshot::default()
        };

        let events = detect_changes(Some(&old), &new);
        assert_eq!(
            events,
            vec![ChangeEvent::Added {
                category: Category::Backup,
                name: "nas-1".to_string()
            }]
        );
    }
}
