//! Prometheus metrics for failoverd

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector shared by the controller, the flow installer and the
/// fault injection endpoint. Cloning shares the underlying series.
#[derive(Clone)]
pub struct FailoverMetrics {
    // Counters
    pub path_applies_total: IntCounter,
    pub flow_mods_sent_total: IntCounter,
    pub flow_mod_send_failures_total: IntCounter,
    pub hops_skipped_total: IntCounter,
    pub failovers_total: IntCounter,
    pub reversions_total: IntCounter,
    pub fault_requests_total: IntCounterVec,

    // Gauges
    pub using_backup: IntGauge,
    pub failed_links: IntGauge,
    pub connected_switches: IntGauge,

    pub registry: Arc<Registry>,
}

impl FailoverMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let path_applies_total = IntCounter::with_opts(Opts::new(
            "failoverd_path_applies_total",
            "Number of times a path was (re)installed",
        ))?;
        registry.register(Box::new(path_applies_total.clone()))?;

        let flow_mods_sent_total = IntCounter::with_opts(Opts::new(
            "failoverd_flow_mods_sent_total",
            "Flow-mod messages handed to switch control channels",
        ))?;
        registry.register(Box::new(flow_mods_sent_total.clone()))?;

        let flow_mod_send_failures_total = IntCounter::with_opts(Opts::new(
            "failoverd_flow_mod_send_failures_total",
            "Flow-mod messages the control channel refused",
        ))?;
        registry.register(Box::new(flow_mod_send_failures_total.clone()))?;

        let hops_skipped_total = IntCounter::with_opts(Opts::new(
            "failoverd_hops_skipped_total",
            "Path hops skipped for lack of adjacency or control channel",
        ))?;
        registry.register(Box::new(hops_skipped_total.clone()))?;

        let failovers_total = IntCounter::with_opts(Opts::new(
            "failoverd_failovers_total",
            "Transitions from the primary to the backup path",
        ))?;
        registry.register(Box::new(failovers_total.clone()))?;

        let reversions_total = IntCounter::with_opts(Opts::new(
            "failoverd_reversions_total",
            "Transitions from the backup back to the primary path",
        ))?;
        registry.register(Box::new(reversions_total.clone()))?;

        let fault_requests_total = IntCounterVec::new(
            Opts::new(
                "failoverd_fault_requests_total",
                "Fault injection requests by kind and HTTP status",
            ),
            &["kind", "status"],
        )?;
        registry.register(Box::new(fault_requests_total.clone()))?;

        let using_backup = IntGauge::with_opts(Opts::new(
            "failoverd_using_backup",
            "1 while traffic is steered onto the backup path",
        ))?;
        registry.register(Box::new(using_backup.clone()))?;

        let failed_links = IntGauge::with_opts(Opts::new(
            "failoverd_failed_links",
            "Links currently considered down",
        ))?;
        registry.register(Box::new(failed_links.clone()))?;

        let connected_switches = IntGauge::with_opts(Opts::new(
            "failoverd_connected_switches",
            "Switches with a registered control channel",
        ))?;
        registry.register(Box::new(connected_switches.clone()))?;

        Ok(Self {
            path_applies_total,
            flow_mods_sent_total,
            flow_mod_send_failures_total,
            hops_skipped_total,
            failovers_total,
            reversions_total,
            fault_requests_total,
            using_backup,
            failed_links,
            connected_switches,
            registry: Arc::new(registry),
        })
    }

    /// Renders all series in Prometheus text exposition format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
