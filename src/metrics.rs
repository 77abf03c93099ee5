use crate::snapshot::{Category, Health};
use crate::state::EngineState;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub topology_nodes_total: Gauge,
    pub topology_nodes: GaugeVec,
    pub topology_health_percent: GaugeVec,
    pub topology_category_nodes: GaugeVec,
    pub topology_active_critical_alerts: Gauge,
    pub topology_poll_cycles_total: Gauge,
    pub topology_last_poll_timestamp_seconds: Gauge,
    pub topology_uptime_seconds: Gauge,
    pub topology_scrape_count_total: Counter,
    pub topology_source_errors_total: Counter,
    pub topology_alerts_sent_total: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let topology_nodes_total = Gauge::with_opts(opts!(
            "topology_nodes_total",
            "Total nodes across all categories in the latest snapshot"
        ))?;
        let topology_nodes = GaugeVec::new(
            opts!("topology_nodes", "Node count by health state"),
            &["health"],
        )?;
        let topology_health_percent = GaugeVec::new(
            opts!(
                "topology_health_percent",
                "Integer percentage of nodes by health state (floor)"
            ),
            &["health"],
        )?;
        let topology_category_nodes = GaugeVec::new(
            opts!("topology_category_nodes", "Node count by category"),
            &["category"],
        )?;
        let topology_active_critical_alerts = Gauge::with_opts(opts!(
            "topology_active_critical_alerts",
            "Nodes currently in the alerted set"
        ))?;
        let topology_poll_cycles_total = Gauge::with_opts(opts!(
            "topology_poll_cycles_total",
            "Successful poll cycles since start"
        ))?;
        let topology_last_poll_timestamp_seconds = Gauge::with_opts(opts!(
            "topology_last_poll_timestamp_seconds",
            "Unix timestamp of the last successful poll"
        ))?;
        let topology_uptime_seconds = Gauge::with_opts(opts!(
            "topology_uptime_seconds",
            "Seconds since the daemon started"
        ))?;
        let topology_scrape_count_total = Counter::with_opts(opts!(
            "topology_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let topology_source_errors_total = Counter::with_opts(opts!(
            "topology_source_errors_total",
            "Poll cycles skipped because the snapshot source was unavailable"
        ))?;
        let topology_alerts_sent_total = CounterVec::new(
            opts!(
                "topology_alerts_sent_total",
                "Alerts delivered to the notifier, by kind"
            ),
            &["kind"],
        )?;

        register(&registry, &topology_nodes_total)?;
        register(&registry, &topology_nodes)?;
        register(&registry, &topology_health_percent)?;
        register(&registry, &topology_category_nodes)?;
        register(&registry, &topology_active_critical_alerts)?;
        register(&registry, &topology_poll_cycles_total)?;
        register(&registry, &topology_last_poll_timestamp_seconds)?;
        register(&registry, &topology_uptime_seconds)?;
        register(&registry, &topology_scrape_count_total)?;
        register(&registry, &topology_source_errors_total)?;
        register(&registry, &topology_alerts_sent_total)?;

        Ok(Arc::new(Self {
            registry,
            topology_nodes_total,
            topology_nodes,
            topology_health_percent,
            topology_category_nodes,
            topology_active_critical_alerts,
            topology_poll_cycles_total,
            topology_last_poll_timestamp_seconds,
            topology_uptime_seconds,
            topology_scrape_count_total,
            topology_source_errors_total,
            topology_alerts_sent_total,
        }))
    }

    pub fn update_from_state(&self, state: &EngineState) {
        self.topology_nodes_total.set(state.summary.total as f64);

        for health in Health::ALL {
            let bucket = state.summary.bucket(health);
            self.topology_nodes
                .with_label_values(&[health.as_str()])
                .set(bucket.count as f64);
            self.topology_health_percent
                .with_label_values(&[health.as_str()])
                .set(bucket.percent as f64);
        }

        let (servers, storage, backup, switches) = match &state.topology {
            Some(t) => (
                t.servers.len(),
                t.storage.len(),
                t.backup.len(),
                t.switches.len(),
            ),
            None => (0, 0, 0, 0),
        };
        self.topology_category_nodes
            .with_label_values(&[Category::Servers.as_str()])
            .set(servers as f64);
        self.topology_category_nodes
            .with_label_values(&[Category::Storage.as_str()])
            .set(storage as f64);
        self.topology_category_nodes
            .with_label_values(&[Category::Backup.as_str()])
            .set(backup as f64);
        self.topology_category_nodes
            .with_label_values(&[Category::Switches.as_str()])
            .set(switches as f64);

        self.topology_active_critical_alerts
            .set(state.active_alert_count() as f64);
        self.topology_poll_cycles_total.set(state.poll_cycles as f64);
        self.topology_last_poll_timestamp_seconds
            .set(state.last_poll_unix as f64);

        let now = now_unix();
        let uptime = now.saturating_sub(state.started_at_unix) as f64;
        self.topology_uptime_seconds.set(uptime);
    }

    pub fn inc_scrape_count(&self) {
        self.topology_scrape_count_total.inc();
    }

    pub fn inc_source_error(&self) {
        self.topology_source_errors_total.inc();
    }

    pub fn inc_alert_sent(&self, kind: &str) {
        self.topology_alerts_sent_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Node, Snapshot};

    #[test]
    fn update_from_state_reflects_summary() {
        let metrics = Metrics::new().expect("metrics init");
        let mut state = EngineState::new(0, 10);
        let snapshot = Snapshot {
            servers: vec![
                Node {
                    id: 1,
                    name: "srv-1".to_string(),
                    kind: None,
                    role: None,
                    health: Health::Healthy,
                    connections: Vec::new(),
                },
                Node {
                    id: 2,
                    name: "srv-2".to_string(),
                    kind: None,
                    role: None,
                    health: Health::Critical,
                    connections: Vec::new(),
                },
            ],
            ..Snapshot::default()
        };
        state.apply_snapshot(snapshot, 100);
        metrics.update_from_state(&state);

        assert_eq!(metrics.topology_nodes_total.get(), 2.0);
        assert_eq!(
            metrics
                .topology_nodes
                .with_label_values(&["critical"])
                .get(),
            1.0
        );
        assert_eq!(metrics.topology_active_critical_alerts.get(), 1.0);

        let text = String::from_utf8(metrics.encode_metrics().expect("encode")).unwrap();
        assert!(text.contains("topology_nodes_total"));
        assert!(text.contains("topology_uptime_seconds"));
    }
}
