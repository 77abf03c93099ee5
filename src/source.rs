use crate::config::SourceConfig;
use crate::snapshot::{Health, Node, Snapshot, Switch, SwitchLink};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request for table '{table}' failed: {source}")]
    Request {
        table: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("table '{table}' returned HTTP {status}")]
    Status { table: &'static str, status: u16 },
    #[error("failed to decode table '{table}': {source}")]
    Decode {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
pub struct RawCloudRow {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawNodeRow {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub health: Option<Health>,
}

#[derive(Debug, Deserialize)]
pub struct RawSwitchRow {
    pub id: i64,
    pub name: String,
    #[serde(rename = "switch_type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub health: Option<Health>,
}

/// Edge row from one of the three `*_connected_switches` tables. The
/// foreign-key column is named after the owning table, hence the aliases.
#[derive(Debug, Deserialize)]
pub struct RawLinkRow {
    #[serde(alias = "server_id", alias = "storage_id", alias = "backup_id")]
    pub source_id: i64,
    pub switch_id: i64,
    pub port: String,
}

#[derive(Debug, Deserialize)]
pub struct RawPortRow {
    pub switch_id: i64,
    pub port: String,
    pub component_id: i64,
}

/// All raw tables of one poll, fetched before any joining happens. Either
/// every table is present or the whole poll failed.
#[derive(Debug)]
pub struct RawTopology {
    pub cloud: Vec<RawCloudRow>,
    pub servers: Vec<RawNodeRow>,
    pub storage: Vec<RawNodeRow>,
    pub backup: Vec<RawNodeRow>,
    pub switches: Vec<RawSwitchRow>,
    pub server_links: Vec<RawLinkRow>,
    pub storage_links: Vec<RawLinkRow>,
    pub backup_links: Vec<RawLinkRow>,
    pub switch_ports: Vec<RawPortRow>,
}

/// Client for the Supabase-style topology REST API.
pub struct TopologySource {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl TopologySource {
    pub fn new(client: Client, cfg: &SourceConfig, api_key: String) -> Self {
        Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout: Duration::from_millis(cfg.request_timeout_ms),
        }
    }

    /// Fetches every table and assembles one normalized snapshot. A failure
    /// on any table aborts the whole fetch; no partial snapshot is produced.
    pub async fn fetch_snapshot(&self) -> Result<Snapshot, SourceError> {
        let raw = RawTopology {
            cloud: self.fetch_table("private_cloud").await?,
            servers: self.fetch_table("servers").await?,
            storage: self.fetch_table("storage").await?,
            backup: self.fetch_table("backup").await?,
            switches: self.fetch_table("network_switches").await?,
            server_links: self.fetch_table("server_connected_switches").await?,
            storage_links: self.fetch_table("storage_connected_switches").await?,
            backup_links: self.fetch_table("backup_connected_switches").await?,
            switch_ports: self.fetch_table("network_connected_components").await?,
        };

        Ok(assemble_snapshot(raw))
    }

    async fn fetch_table<T: DeserializeOwned>(
        &self,
        table: &'static str,
    ) -> Result<Vec<T>, SourceError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self
            .client
            .get(&url)
            .query(&[("select", "*")])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| SourceError::Request { table, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                table,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| SourceError::Request { table, source })?;
        serde_json::from_slice(&body).map_err(|source| SourceError::Decode { table, source })
    }
}

/// Joins raw entity and edge rows into a snapshot. Connection lists keep the
/// input order of the edge rows; entities without edges get empty lists.
pub fn assemble_snapshot(raw: RawTopology) -> Snapshot {
    Snapshot {
        cloud_name: raw.cloud.into_iter().next().and_then(|row| row.name),
        servers: join_nodes(raw.servers, &raw.server_links),
        storage: join_nodes(raw.storage, &raw.storage_links),
        backup: join_nodes(raw.backup, &raw.backup_links),
        switches: join_switches(raw.switches, &raw.switch_ports),
    }
}

fn join_nodes(rows: Vec<RawNodeRow>, links: &[RawLinkRow]) -> Vec<Node> {
    rows.into_iter()
        .map(|row| {
            let connections = links
                .iter()
                .filter(|link| link.source_id == row.id)
                .map(|link| SwitchLink {
                    switch_id: link.switch_id,
                    port: link.port.clone(),
                })
                .collect();
            Node {
                id: row.id,
                name: row.name,
                kind: row.kind,
                role: row.role,
                health: row.health.unwrap_or_default(),
                connections,
            }
        })
        .collect()
}

fn join_switches(rows: Vec<RawSwitchRow>, ports: &[RawPortRow]) -> Vec<Switch> {
    rows.into_iter()
        .map(|row| {
            let connected_components: BTreeMap<String, i64> = ports
                .iter()
                .filter(|port| port.switch_id == row.id)
                .map(|port| (port.port.clone(), port.component_id))
                .collect();
            Switch {
                id: row.id,
                name: row.name,
                kind: row.kind,
                role: row.role,
                health: row.health.unwrap_or_default(),
                connected_components,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_raw() -> RawTopology {
        RawTopology {
            cloud: Vec::new(),
            servers: Vec::new(),
            storage: Vec::new(),
            backup: Vec::new(),
            switches: Vec::new(),
            server_links: Vec::new(),
            storage_links: Vec::new(),
            backup_links: Vec::new(),
            switch_ports: Vec::new(),
        }
    }

    fn node_row(id: i64, name: &str, health: Option<Health>) -> RawNodeRow {
        RawNodeRow {
            id,
            name: name.to_string(),
            kind: None,
            role: None,
            health,
        }
    }

    #[test]
    fn joins_edges_in_input_order() {
        let mut raw = empty_raw();
        raw.servers = vec![node_row(1, "srv-1", Some(Health::Healthy))];
        raw.server_links = vec![
            RawLinkRow {
                source_id: 1,
                switch_id: 20,
                port: "eth1".to_string(),
            },
            RawLinkRow {
                source_id: 1,
                switch_id: 10,
                port: "eth0".to_string(),
            },
            RawLinkRow {
                source_id: 99,
                switch_id: 10,
                port: "eth7".to_string(),
            },
        ];

        let snapshot = assemble_snapshot(raw);
        assert_eq!(
            snapshot.servers[0].connections,
            vec![
                SwitchLink {
                    switch_id: 20,
                    port: "eth1".to_string()
                },
                SwitchLink {
                    switch_id: 10,
                    port: "eth0".to_string()
                },
            ]
        );
    }

    #[test]
    fn node_without_edges_gets_empty_connection_list() {
        let mut raw = empty_raw();
        raw.storage = vec![node_row(5, "ceph-1", Some(Health::Degraded))];

        let snapshot = assemble_snapshot(raw);
        assert!(snapshot.storage[0].connections.is_empty());
    }

    #[test]
    fn switch_gets_port_to_component_map() {
        let mut raw = empty_raw();
        raw.switches = vec![RawSwitchRow {
            id: 10,
            name: "sw-1".to_string(),
            kind: Some("ToR".to_string()),
            role: None,
            health: Some(Health::Healthy),
        }];
        raw.switch_ports = vec![
            RawPortRow {
                switch_id: 10,
                port: "eth0".to_string(),
                component_id: 1,
            },
            RawPortRow {
                switch_id: 10,
                port: "eth1".to_string(),
                component_id: 2,
            },
            RawPortRow {
                switch_id: 11,
                port: "eth0".to_string(),
                component_id: 3,
            },
        ];

        let snapshot = assemble_snapshot(raw);
        let ports = &snapshot.switches[0].connected_components;
        assert_eq!(ports.len(), 2);
        assert_eq!(ports.get("eth0"), Some(&1));
        assert_eq!(ports.get("eth1"), Some(&2));
    }

    #[test]
    fn missing_health_defaults_to_unknown() {
        let mut raw = empty_raw();
        raw.backup = vec![node_row(1, "nas-1", None)];

        let snapshot = assemble_snapshot(raw);
        assert_eq!(snapshot.backup[0].health, Health::Unknown);
    }

    #[test]
    fn cloud_name_comes_from_first_row() {
        let mut raw = empty_raw();
        raw.cloud = vec![
            RawCloudRow {
                name: Some("lab-cloud".to_string()),
            },
            RawCloudRow {
                name: Some("ignored".to_string()),
            },
        ];

        let snapshot = assemble_snapshot(raw);
        assert_eq!(snapshot.cloud_name.as_deref(), Some("lab-cloud"));
    }

    #[test]
    fn link_rows_accept_any_owner_column() {
        let server: RawLinkRow =
            serde_json::from_str(r#"{"server_id": 1, "switch_id": 2, "port": "eth0"}"#).unwrap();
        assert_eq!(server.source_id, 1);

        let storage: RawLinkRow =
            serde_json::from_str(r#"{"storage_id": 3, "switch_id": 2, "port": "eth1"}"#).unwrap();
        assert_eq!(storage.source_id, 3);

        let backup: RawLinkRow =
            serde_json::from_str(r#"{"backup_id": 4, "switch_id": 2, "port": "eth2"}"#).unwrap();
        assert_eq!(backup.source_id, 4);
    }

    #[test]
    fn node_row_decodes_source_columns() {
        let row: RawNodeRow = serde_json::from_str(
            r#"{"id": 7, "name": "kvm-7", "type": "KVM", "role": "compute", "health": "critical", "cpu_utilization": 93}"#,
        )
        .unwrap();
        assert_eq!(row.kind.as_deref(), Some("KVM"));
        assert_eq!(row.health, Some(Health::Critical));
    }
}
