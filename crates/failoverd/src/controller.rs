//! FailoverController - single owner of the shared control-plane state.
//!
//! Topology events arrive from the switch transport's dispatch task while
//! fault injections arrive from the HTTP thread. Both reach the Adjacency
//! Store, the Connection Table and the Path Selector only through this type,
//! which holds them behind one mutex. A state transition and the install it
//! triggers happen under the same lock, so a genuine link-down racing an
//! injected restore can never interleave their installs.

use crate::adjacency::{AdjacencyEntry, AdjacencyStore};
use crate::config::FailoverConfig;
use crate::error::{FailoverError, Result};
use crate::flow_installer::{FlowInstaller, InstallReport};
use crate::metrics::FailoverMetrics;
use crate::openflow::{ConnectionTable, ControlChannel};
use crate::path_selector::{PathSelector, Transition};
use crate::types::{Dpid, FaultKind, HostPair, Link, LinkKey, Path, PathState, PortNo};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

struct ControllerState {
    adjacency: AdjacencyStore,
    connections: ConnectionTable,
    selector: PathSelector,
}

/// Point-in-time view of the controller, served on `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerSnapshot {
    pub state: PathState,
    pub active_path: Path,
    pub primary_path: Path,
    pub backup_path: Path,
    pub failed_links: Vec<LinkKey>,
    pub adjacency: Vec<AdjacencyEntry>,
    pub switches: Vec<Dpid>,
    pub hosts: HostPair,
}

pub struct FailoverController {
    state: Mutex<ControllerState>,
    installer: FlowInstaller,
    hosts: HostPair,
    metrics: FailoverMetrics,
}

impl FailoverController {
    /// Builds a controller from a validated configuration.
    pub fn new(config: &FailoverConfig, metrics: FailoverMetrics) -> Result<Self> {
        config.validate()?;

        let installer = FlowInstaller::new(metrics.clone())
            .with_idle_timeout(config.flows.idle_timeout_secs)
            .with_priority(config.flows.priority);

        Ok(Self {
            state: Mutex::new(ControllerState {
                adjacency: AdjacencyStore::new(),
                connections: ConnectionTable::new(),
                selector: PathSelector::new(config.primary_path(), config.backup_path()),
            }),
            installer,
            hosts: config.host_pair(),
            metrics,
        })
    }

    /// Convenience constructor wrapping the controller in an `Arc`.
    pub fn shared(config: &FailoverConfig) -> Result<Arc<Self>> {
        Ok(Arc::new(Self::new(config, FailoverMetrics::new()?)?))
    }

    pub fn hosts(&self) -> HostPair {
        self.hosts
    }

    pub fn metrics(&self) -> &FailoverMetrics {
        &self.metrics
    }

    /// Applies the primary path eagerly, before topology has arrived, so the
    /// first tracked packet already has whatever hops can be resolved.
    #[instrument(skip(self))]
    pub fn start(&self) -> InstallReport {
        let state = self.state.lock();
        info!(
            primary = %state.selector.primary(),
            backup = %state.selector.backup(),
            "Failover controller starting on {}",
            state.selector.state()
        );
        self.apply_active(&state)
    }

    /// Registers the control channel of a newly connected switch.
    #[instrument(skip(self, channel))]
    pub fn switch_connected(&self, dpid: Dpid, channel: Arc<dyn ControlChannel>) {
        let mut state = self.state.lock();
        let reconnect = state.connections.register(dpid, channel);
        self.metrics
            .connected_switches
            .set(state.connections.len() as i64);
        info!(dpid, reconnect, "Switch {} connected", dpid);
    }

    /// A genuine link-up or link-down from topology discovery.
    ///
    /// Returns the install report if any path was (re)installed. Events for
    /// switches that have not connected yet are still applied, since
    /// discovery and the switch transport race at startup.
    #[instrument(skip(self))]
    pub fn link_changed(&self, link: Link, up: bool) -> Option<InstallReport> {
        let mut state = self.state.lock();
        let key = link.key();

        if !state.connections.contains(link.dpid1) && !state.connections.contains(link.dpid2) {
            warn!(%link, up, "Link event for unregistered switches");
        }

        if up {
            if let Err(e) = state
                .adjacency
                .add_link(link.dpid1, link.dpid2, link.port1, link.port2)
            {
                warn!(error = %e, "Ignoring link-up");
                return None;
            }
            let transition = state.selector.on_link_up(key);
            match transition {
                Some(transition) => Some(self.transition(&state, transition)),
                // newly resolvable hop on the active path
                None if state.selector.on_active_span(key) => Some(self.apply_active(&state)),
                None => None,
            }
        } else {
            state.adjacency.remove_link(link.dpid1, link.dpid2);
            let transition = state.selector.on_link_down(key);
            self.record_failed_links(&state);
            transition.map(|t| self.transition(&state, t))
        }
    }

    /// A packet-in carrying an IPv4 header. Tracked traffic re-asserts the
    /// active path; everything else is ignored.
    #[instrument(skip(self))]
    pub fn packet_arrived(&self, src: Ipv4Addr, dst: Ipv4Addr, dpid: Dpid) -> Option<InstallReport> {
        if !self.hosts.matches(src, dst) {
            debug!(%src, %dst, dpid, "Untracked packet");
            return None;
        }
        debug!(%src, %dst, dpid, "PacketIn {} -> {} on switch {}", src, dst, dpid);

        let state = self.state.lock();
        if !state.connections.contains(dpid) {
            warn!(dpid, "PacketIn from unknown switch {}, dropping", dpid);
            return None;
        }
        Some(self.apply_active(&state))
    }

    /// An externally injected fail or restore for the link `a`-`b`.
    ///
    /// Does not touch the Adjacency Store. Installs the newly active path only
    /// if the state changed.
    #[instrument(skip(self))]
    pub fn external_fault(&self, a: Dpid, b: Dpid, kind: FaultKind) -> Result<Option<InstallReport>> {
        let key = LinkKey::new(a, b);
        if key.is_self_loop() {
            return Err(FailoverError::SelfLoop(a, b));
        }

        let mut state = self.state.lock();
        match kind {
            FaultKind::Fail => warn!("External FAILURE reported on link {}-{}", a, b),
            FaultKind::Restore => info!("External RESTORE reported on link {}-{}", a, b),
        }
        let transition = state.selector.on_fault(key, kind);
        self.record_failed_links(&state);
        Ok(transition.map(|t| self.transition(&state, t)))
    }

    pub fn state(&self) -> PathState {
        self.state.lock().selector.state()
    }

    pub fn active_path(&self) -> Path {
        self.state.lock().selector.active_path().clone()
    }

    pub fn failed_links(&self) -> Vec<LinkKey> {
        self.state
            .lock()
            .selector
            .failed_links()
            .iter()
            .copied()
            .collect()
    }

    pub fn lookup_port(&self, a: Dpid, b: Dpid) -> Option<PortNo> {
        self.state.lock().adjacency.lookup_port(a, b)
    }

    pub fn is_connected(&self, dpid: Dpid) -> bool {
        self.state.lock().connections.contains(dpid)
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let state = self.state.lock();
        ControllerSnapshot {
            state: state.selector.state(),
            active_path: state.selector.active_path().clone(),
            primary_path: state.selector.primary().clone(),
            backup_path: state.selector.backup().clone(),
            failed_links: state.selector.failed_links().iter().copied().collect(),
            adjacency: state.adjacency.entries(),
            switches: state.connections.dpids(),
            hosts: self.hosts,
        }
    }

    fn apply_active(&self, state: &ControllerState) -> InstallReport {
        self.installer.apply_path(
            state.selector.active_path(),
            &self.hosts,
            &state.adjacency,
            &state.connections,
        )
    }

    fn transition(&self, state: &ControllerState, transition: Transition) -> InstallReport {
        if transition.is_failover() {
            self.metrics.failovers_total.inc();
            self.metrics.using_backup.set(1);
        } else {
            self.metrics.reversions_total.inc();
            self.metrics.using_backup.set(0);
        }
        info!(from = %transition.from, to = %transition.to, "Path state changed");
        self.record_failed_links(state);
        self.apply_active(state)
    }

    fn record_failed_links(&self, state: &ControllerState) {
        self.metrics
            .failed_links
            .set(state.selector.failed_links().len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openflow::MemoryChannel;

    const H1: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const H2: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn controller() -> FailoverController {
        FailoverController::new(&FailoverConfig::default(), FailoverMetrics::new().unwrap())
            .unwrap()
    }

    fn connect_all(ctl: &FailoverController) -> Vec<(Dpid, Arc<MemoryChannel>)> {
        [2, 3, 4, 5]
            .into_iter()
            .map(|dpid| {
                let channel = Arc::new(MemoryChannel::new());
                ctl.switch_connected(dpid, channel.clone());
                (dpid, channel)
            })
            .collect()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = FailoverConfig::default();
        config.paths.primary = vec![];
        assert!(FailoverController::new(&config, FailoverMetrics::new().unwrap()).is_err());
    }

    #[test]
    fn test_start_without_topology_installs_nothing() {
        let ctl = controller();
        let report = ctl.start();
        assert!(report.installed.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(ctl.metrics().path_applies_total.get(), 1);
    }

    #[test]
    fn test_link_up_on_active_span_reasserts_path() {
        let ctl = controller();
        connect_all(&ctl);

        let report = ctl.link_changed(Link::new(3, 2, 2, 1), true).unwrap();
        assert_eq!(report.installed_hops(), vec![(3, 2)]);

        assert!(ctl.link_changed(Link::new(3, 3, 5, 1), true).is_none());
        assert_eq!(ctl.lookup_port(5, 3), Some(1));
    }

    #[test]
    fn test_self_loop_link_up_is_ignored() {
        let ctl = controller();
        assert!(ctl.link_changed(Link::new(3, 1, 3, 2), true).is_none());
        assert!(ctl.snapshot().adjacency.is_empty());
    }

    #[test]
    fn test_link_down_off_span_only_updates_adjacency() {
        let ctl = controller();
        ctl.link_changed(Link::new(3, 3, 5, 1), true);

        assert!(ctl.link_changed(Link::new(3, 3, 5, 1), false).is_none());
        assert_eq!(ctl.state(), PathState::UsingPrimary);
        assert_eq!(ctl.lookup_port(3, 5), None);
        assert!(ctl.failed_links().is_empty());
    }

    #[test]
    fn test_link_events_before_switches_connect_are_kept() {
        let ctl = controller();

        assert!(ctl.link_changed(Link::new(2, 2, 4, 1), true).is_none());
        assert_eq!(ctl.lookup_port(4, 2), Some(1));

        let report = ctl.link_changed(Link::new(2, 2, 4, 1), false).unwrap();
        assert!(report.installed.is_empty());
        assert_eq!(ctl.state(), PathState::UsingBackup);
        assert_eq!(ctl.failed_links(), vec![LinkKey::new(2, 4)]);
        assert_eq!(ctl.lookup_port(2, 4), None);
    }

    #[test]
    fn test_external_fault_self_loop_rejected() {
        let ctl = controller();
        assert!(matches!(
            ctl.external_fault(4, 4, FaultKind::Fail),
            Err(FailoverError::SelfLoop(4, 4))
        ));
        assert!(ctl.failed_links().is_empty());
    }

    #[test]
    fn test_packet_from_unknown_switch_dropped() {
        let ctl = controller();
        assert!(ctl.packet_arrived(H1, H2, 3).is_none());
        assert_eq!(ctl.metrics().path_applies_total.get(), 0);
    }

    #[test]
    fn test_metrics_follow_transitions() {
        let ctl = controller();
        connect_all(&ctl);

        ctl.external_fault(2, 4, FaultKind::Fail).unwrap();
        assert_eq!(ctl.metrics().using_backup.get(), 1);
        assert_eq!(ctl.metrics().failed_links.get(), 1);
        assert_eq!(ctl.metrics().connected_switches.get(), 4);

        ctl.external_fault(2, 4, FaultKind::Restore).unwrap();
        assert_eq!(ctl.metrics().using_backup.get(), 0);
        assert_eq!(ctl.metrics().failed_links.get(), 0);
        assert_eq!(ctl.metrics().failovers_total.get(), 1);
        assert_eq!(ctl.metrics().reversions_total.get(), 1);
    }

    #[test]
    fn test_snapshot_reports_state() {
        let ctl = controller();
        connect_all(&ctl);
        ctl.link_changed(Link::new(2, 2, 4, 1), true);
        ctl.link_changed(Link::new(2, 2, 4, 1), false);

        let snap = ctl.snapshot();
        assert_eq!(snap.state, PathState::UsingBackup);
        assert_eq!(snap.active_path, Path::new(vec![3, 5, 4]));
        assert_eq!(snap.failed_links, vec![LinkKey::new(2, 4)]);
        assert_eq!(snap.switches, vec![2, 3, 4, 5]);
        assert!(snap.adjacency.is_empty());
    }
}
