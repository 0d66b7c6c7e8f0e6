//! Flow Installer - turns an ordered path into forwarding rules.
//!
//! Installation is best-effort and partial: every hop that can be resolved
//! is programmed even when others cannot. Re-applying a path sends `ADD`
//! messages with identical matches, which the switch treats as a replace, so
//! repeated installs converge to the same flow table.

use crate::adjacency::AdjacencyStore;
use crate::metrics::FailoverMetrics;
use crate::openflow::{ConnectionTable, FlowMod, OFP_DEFAULT_PRIORITY};
use crate::types::{Dpid, HostPair, Path, PortNo};
use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::{info, instrument, warn};

/// Default idle timeout for installed rules (seconds)
pub const DEFAULT_IDLE_TIMEOUT_SECS: u16 = 30;

/// A hop that received its pair of rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstalledHop {
    pub dpid: Dpid,
    pub next: Dpid,
    pub out_port: PortNo,
}

/// Why a hop was left unprogrammed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No adjacency entry from the switch to the next hop.
    NoAdjacency,
    /// The switch has no registered control channel.
    NoChannel,
    /// Every rule for the hop failed to send.
    SendFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SkippedHop {
    pub dpid: Dpid,
    pub next: Dpid,
    pub reason: SkipReason,
}

/// One directed rule resolved for a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResolvedRule {
    pub dpid: Dpid,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub out_port: PortNo,
}

/// Outcome of one [`FlowInstaller::apply_path`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub path: Path,
    pub installed: Vec<InstalledHop>,
    pub skipped: Vec<SkippedHop>,
    pub rules: Vec<ResolvedRule>,
    pub send_failures: usize,
}

impl InstallReport {
    fn new(path: &Path) -> Self {
        Self {
            path: path.clone(),
            installed: Vec::new(),
            skipped: Vec::new(),
            rules: Vec::new(),
            send_failures: 0,
        }
    }

    /// `(switch, next switch)` pairs that were programmed.
    pub fn installed_hops(&self) -> Vec<(Dpid, Dpid)> {
        self.installed.iter().map(|h| (h.dpid, h.next)).collect()
    }

    /// True if every hop of the path was resolved and sent without error.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.send_failures == 0
    }
}

/// Builds and pushes the flow rules for a path.
#[derive(Clone)]
pub struct FlowInstaller {
    idle_timeout: u16,
    priority: u16,
    metrics: FailoverMetrics,
}

impl FlowInstaller {
    pub fn new(metrics: FailoverMetrics) -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT_SECS,
            priority: OFP_DEFAULT_PRIORITY,
            metrics,
        }
    }

    pub fn with_idle_timeout(mut self, secs: u16) -> Self {
        self.idle_timeout = secs;
        self
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn idle_timeout(&self) -> u16 {
        self.idle_timeout
    }

    /// The install message for `src -> dst` out of `out_port`.
    pub fn flow_mod(&self, src: Ipv4Addr, dst: Ipv4Addr, out_port: PortNo) -> FlowMod {
        FlowMod::add(src, dst, out_port)
            .with_idle_timeout(self.idle_timeout)
            .with_priority(self.priority)
    }

    /// Installs `path` for traffic between `hosts`.
    ///
    /// For each consecutive pair the outport toward the next switch is
    /// resolved from `adjacency`; the switch then gets one rule per direction
    /// (`a -> b` and `b -> a`), both forwarding out of that port. Hops without
    /// an adjacency or a control channel are skipped with a warning. Send
    /// failures are logged and counted, never retried.
    #[instrument(skip_all, fields(path = %path))]
    pub fn apply_path(
        &self,
        path: &Path,
        hosts: &HostPair,
        adjacency: &AdjacencyStore,
        connections: &ConnectionTable,
    ) -> InstallReport {
        info!("Installing flows for path: {}", path);
        self.metrics.path_applies_total.inc();
        let mut report = InstallReport::new(path);

        for (dpid, next) in path.hops() {
            let Some(out_port) = adjacency.lookup_port(dpid, next) else {
                warn!(dpid, next, "No adjacency {} -> {}, skipping hop", dpid, next);
                self.skip(&mut report, dpid, next, SkipReason::NoAdjacency);
                continue;
            };
            let Some(channel) = connections.get(dpid) else {
                warn!(dpid, "Switch {} has no control channel, skipping hop", dpid);
                self.skip(&mut report, dpid, next, SkipReason::NoChannel);
                continue;
            };

            let mut sent = 0;
            for (src, dst) in hosts.directions() {
                let flow_mod = self.flow_mod(src, dst, out_port);
                match channel.send_flow_mod(&flow_mod) {
                    Ok(()) => {
                        self.metrics.flow_mods_sent_total.inc();
                        sent += 1;
                        report.rules.push(ResolvedRule {
                            dpid,
                            src,
                            dst,
                            out_port,
                        });
                    }
                    Err(e) => {
                        warn!(dpid, %src, %dst, error = %e, "Flow-mod send failed, not retrying");
                        self.metrics.flow_mod_send_failures_total.inc();
                        report.send_failures += 1;
                    }
                }
            }

            if sent == 0 {
                self.skip(&mut report, dpid, next, SkipReason::SendFailed);
                continue;
            }
            info!(dpid, out_port, "Flow installed on switch {} -> port {}", dpid, out_port);
            report.installed.push(InstalledHop {
                dpid,
                next,
                out_port,
            });
        }

        info!(
            installed = report.installed.len(),
            skipped = report.skipped.len(),
            "Flow installation complete"
        );
        report
    }

    fn skip(&self, report: &mut InstallReport, dpid: Dpid, next: Dpid, reason: SkipReason) {
        self.metrics.hops_skipped_total.inc();
        report.skipped.push(SkippedHop { dpid, next, reason });
    }
}
