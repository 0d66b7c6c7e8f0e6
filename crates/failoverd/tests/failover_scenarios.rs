//! End-to-end failover behaviour on the five-switch demo topology.
//!
//! ```text
//!             s2
//!         2 /    \ 2
//!        1 /      \ 1
//! h1 ─1─ s3        s4 ─2─ h2
//!        3 \      / 3
//!         1 \    / 2
//!             s5
//! ```

use failoverd::{
    FailoverConfig, FailoverController, FaultKind, Link, LinkKey, MemoryChannel, Path, PathState,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

const H1: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const H2: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const UNTRACKED: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);

const S3_S2: Link = Link {
    dpid1: 3,
    port1: 2,
    dpid2: 2,
    port2: 1,
};
const S2_S4: Link = Link {
    dpid1: 2,
    port1: 2,
    dpid2: 4,
    port2: 1,
};
const S3_S5: Link = Link {
    dpid1: 3,
    port1: 3,
    dpid2: 5,
    port2: 1,
};
const S5_S4: Link = Link {
    dpid1: 5,
    port1: 2,
    dpid2: 4,
    port2: 3,
};

struct Fabric {
    controller: Arc<FailoverController>,
    switches: BTreeMap<u64, Arc<MemoryChannel>>,
}

impl Fabric {
    fn switch(&self, dpid: u64) -> &MemoryChannel {
        &self.switches[&dpid]
    }
}

/// Controller with every switch connected and every link discovered.
fn demo_fabric() -> Fabric {
    let controller = FailoverController::shared(&FailoverConfig::default()).unwrap();
    controller.start();

    let mut switches = BTreeMap::new();
    for dpid in [2, 3, 4, 5] {
        let channel = Arc::new(MemoryChannel::new());
        controller.switch_connected(dpid, channel.clone());
        switches.insert(dpid, channel);
    }
    for link in [S3_S2, S2_S4, S3_S5, S5_S4] {
        controller.link_changed(link, true);
    }
    Fabric {
        controller,
        switches,
    }
}

#[test]
fn test_startup_installs_primary_hops() {
    let fabric = demo_fabric();
    let report = fabric.controller.packet_arrived(H1, H2, 3).unwrap();

    assert_eq!(report.path, Path::new(vec![3, 2, 4]));
    assert_eq!(report.installed_hops(), vec![(3, 2), (2, 4)]);
    assert!(report.is_complete());
    assert_eq!(fabric.switch(3).output_for(H1, H2), Some(2));
    assert_eq!(fabric.switch(3).output_for(H2, H1), Some(2));
    assert_eq!(fabric.switch(2).output_for(H1, H2), Some(2));
    assert_eq!(fabric.switch(5).sent_count(), 0);
}

#[test]
fn test_eager_start_installs_resolvable_hops_only() {
    let controller = FailoverController::shared(&FailoverConfig::default()).unwrap();
    let s3 = Arc::new(MemoryChannel::new());
    controller.switch_connected(3, s3.clone());
    controller.link_changed(S3_S2, true);

    let report = controller.start();
    assert_eq!(report.installed_hops(), vec![(3, 2)]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(s3.output_for(H1, H2), Some(2));
}

#[test]
fn test_primary_link_down_fails_over() {
    let fabric = demo_fabric();

    let report = fabric.controller.link_changed(S2_S4, false).unwrap();

    assert_eq!(fabric.controller.failed_links(), vec![LinkKey::new(2, 4)]);
    assert_eq!(fabric.controller.state(), PathState::UsingBackup);
    assert_eq!(report.path, Path::new(vec![3, 5, 4]));
    assert_eq!(report.installed_hops(), vec![(3, 5), (5, 4)]);
    assert_eq!(fabric.switch(3).output_for(H1, H2), Some(3));
    assert_eq!(fabric.switch(5).output_for(H2, H1), Some(2));
    assert_eq!(fabric.controller.lookup_port(2, 4), None);
    assert_eq!(fabric.controller.lookup_port(4, 2), None);
}

#[test]
fn test_unrelated_restore_keeps_backup() {
    let fabric = demo_fabric();
    fabric.controller.link_changed(S2_S4, false);

    let report = fabric
        .controller
        .external_fault(3, 5, FaultKind::Restore)
        .unwrap();

    assert!(report.is_none());
    assert_eq!(fabric.controller.failed_links(), vec![LinkKey::new(2, 4)]);
    assert_eq!(fabric.controller.state(), PathState::UsingBackup);
}

#[test]
fn test_link_recovery_reverts_to_primary() {
    let fabric = demo_fabric();
    fabric.controller.link_changed(S2_S4, false);

    let report = fabric.controller.link_changed(S2_S4, true).unwrap();

    assert_eq!(fabric.controller.state(), PathState::UsingPrimary);
    assert!(fabric.controller.failed_links().is_empty());
    assert_eq!(report.installed_hops(), vec![(3, 2), (2, 4)]);
    assert_eq!(fabric.switch(3).output_for(H1, H2), Some(2));
    assert_eq!(fabric.controller.metrics().failovers_total.get(), 1);
    assert_eq!(fabric.controller.metrics().reversions_total.get(), 1);
}

#[test]
fn test_primary_link_lost_on_backup_blocks_reversion() {
    let fabric = demo_fabric();
    fabric.controller.link_changed(S2_S4, false);
    assert!(fabric.controller.link_changed(S3_S2, false).is_none());

    assert!(fabric.controller.link_changed(S2_S4, true).is_none());

    assert_eq!(fabric.controller.state(), PathState::UsingBackup);
    assert_eq!(fabric.controller.failed_links(), vec![LinkKey::new(2, 3)]);
    assert_eq!(fabric.switch(3).output_for(H1, H2), Some(3));

    let report = fabric.controller.link_changed(S3_S2, true).unwrap();
    assert_eq!(report.path, Path::new(vec![3, 2, 4]));
    assert!(report.is_complete());
    assert_eq!(fabric.switch(3).output_for(H1, H2), Some(2));
}

#[test]
fn test_injected_fail_and_restore() {
    let fabric = demo_fabric();

    let failed = fabric
        .controller
        .external_fault(4, 2, FaultKind::Fail)
        .unwrap()
        .unwrap();
    assert_eq!(failed.path, Path::new(vec![3, 5, 4]));
    // an injected fault leaves topology alone
    assert_eq!(fabric.controller.lookup_port(2, 4), Some(2));

    let restored = fabric
        .controller
        .external_fault(2, 4, FaultKind::Restore)
        .unwrap()
        .unwrap();
    assert_eq!(restored.path, Path::new(vec![3, 2, 4]));
    assert_eq!(fabric.controller.state(), PathState::UsingPrimary);
}

#[test]
fn test_reapplying_primary_is_idempotent() {
    let fabric = demo_fabric();

    let first = fabric.controller.packet_arrived(H1, H2, 3).unwrap();
    let tables_once: Vec<_> = fabric
        .switches
        .values()
        .map(|s| s.flow_table())
        .collect();
    let second = fabric.controller.packet_arrived(H2, H1, 4).unwrap();
    let tables_twice: Vec<_> = fabric
        .switches
        .values()
        .map(|s| s.flow_table())
        .collect();

    assert_eq!(first.rules, second.rules);
    assert_eq!(tables_once, tables_twice);
}

#[test]
fn test_untracked_packet_never_installs() {
    let fabric = demo_fabric();
    let applies = fabric.controller.metrics().path_applies_total.get();
    let sent = fabric.switch(3).sent_count();

    assert!(fabric.controller.packet_arrived(H1, UNTRACKED, 3).is_none());
    assert!(fabric.controller.packet_arrived(UNTRACKED, H2, 3).is_none());

    assert_eq!(fabric.controller.metrics().path_applies_total.get(), applies);
    assert_eq!(fabric.switch(3).sent_count(), sent);
}

#[test]
fn test_backup_state_tracks_failed_set() {
    let fabric = demo_fabric();
    let ctl = &fabric.controller;

    let steps: Vec<Box<dyn Fn() + '_>> = vec![
        Box::new(|| {
            ctl.link_changed(S3_S2, false);
        }),
        Box::new(|| {
            ctl.external_fault(5, 4, FaultKind::Fail).unwrap();
        }),
        Box::new(|| {
            ctl.link_changed(S3_S2, true);
        }),
        Box::new(|| {
            ctl.link_changed(S3_S5, false);
        }),
        Box::new(|| {
            ctl.external_fault(4, 5, FaultKind::Restore).unwrap();
        }),
        Box::new(|| {
            ctl.external_fault(2, 4, FaultKind::Fail).unwrap();
        }),
        Box::new(|| {
            ctl.external_fault(2, 4, FaultKind::Restore).unwrap();
        }),
        Box::new(|| {
            ctl.link_changed(S3_S5, true);
        }),
    ];

    for (i, step) in steps.iter().enumerate() {
        step();
        let backup = ctl.state() == PathState::UsingBackup;
        assert_eq!(backup, !ctl.failed_links().is_empty(), "after step {}", i);
    }
    assert_eq!(ctl.state(), PathState::UsingPrimary);
}
