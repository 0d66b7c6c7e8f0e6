//! Event ingress: readiness gating, dispatch and scripted replay.

use failoverd::{
    event_channels, replay, ControllerEvent, EventIngress, FailoverConfig, FailoverController,
    FaultKind, Link, LinkEvent, LinkKey, MemoryChannel, PathState,
};
use pretty_assertions::assert_eq;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

const H1: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const H2: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_link_events_wait_for_discovery_ready() {
    let ctl = FailoverController::shared(&FailoverConfig::default()).unwrap();
    let (mut sinks, openflow, discovery) = event_channels(16);
    let ingress = tokio::spawn(
        EventIngress::new(ctl.clone(), Duration::from_secs(60)).run(openflow, discovery),
    );

    sinks
        .links
        .send(LinkEvent {
            link: Link::new(3, 2, 2, 1),
            up: true,
        })
        .await
        .unwrap();
    sinks
        .openflow
        .send(ControllerEvent::SwitchConnected {
            dpid: 3,
            channel: Arc::new(MemoryChannel::new()),
        })
        .await
        .unwrap();

    // transport events flow before discovery is ready
    wait_until(|| ctl.is_connected(3)).await;
    assert_eq!(ctl.lookup_port(3, 2), None);

    assert!(sinks.signal_discovery_ready());
    wait_until(|| ctl.lookup_port(3, 2).is_some()).await;

    drop(sinks);
    let stats = ingress.await.unwrap();
    assert!(stats.link_events_registered);
    assert_eq!(stats.link_events, 1);
    assert_eq!(stats.dispatched, 2);
}

#[tokio::test]
async fn test_dropped_readiness_sender_registers_links() {
    let ctl = FailoverController::shared(&FailoverConfig::default()).unwrap();
    let (mut sinks, openflow, discovery) = event_channels(4);
    drop(sinks.discovery_ready.take());

    sinks
        .links
        .send(LinkEvent {
            link: Link::new(5, 2, 4, 3),
            up: true,
        })
        .await
        .unwrap();
    drop(sinks);

    let stats = EventIngress::new(ctl.clone(), Duration::from_secs(60))
        .run(openflow, discovery)
        .await;
    assert_eq!(stats.link_events, 1);
    assert_eq!(ctl.lookup_port(4, 5), Some(3));
}

#[tokio::test]
async fn test_events_drive_failover() {
    let ctl = FailoverController::shared(&FailoverConfig::default()).unwrap();
    let (mut sinks, openflow, discovery) = event_channels(32);
    sinks.signal_discovery_ready();

    let s3 = Arc::new(MemoryChannel::new());
    for dpid in [2, 3, 4, 5] {
        let channel = if dpid == 3 {
            s3.clone()
        } else {
            Arc::new(MemoryChannel::new())
        };
        sinks
            .openflow
            .send(ControllerEvent::SwitchConnected { dpid, channel })
            .await
            .unwrap();
    }
    sinks
        .openflow
        .send(ControllerEvent::PacketArrived {
            src: H1,
            dst: H2,
            dpid: 3,
        })
        .await
        .unwrap();
    sinks
        .openflow
        .send(ControllerEvent::ExternalFault {
            a: 3,
            b: 2,
            kind: FaultKind::Fail,
        })
        .await
        .unwrap();
    for link in [
        Link::new(3, 2, 2, 1),
        Link::new(2, 2, 4, 1),
        Link::new(3, 3, 5, 1),
        Link::new(5, 2, 4, 3),
    ] {
        sinks.links.send(LinkEvent { link, up: true }).await.unwrap();
    }
    drop(sinks);

    let stats = EventIngress::new(ctl.clone(), Duration::from_secs(60))
        .run(openflow, discovery)
        .await;

    assert_eq!(stats.dispatched, 10);
    assert_eq!(ctl.state(), PathState::UsingBackup);
    assert_eq!(ctl.failed_links(), vec![LinkKey::new(2, 3)]);
    assert_eq!(s3.output_for(H1, H2), Some(3));
}

#[tokio::test]
async fn test_replayed_script_reaches_controller() {
    let ctl = FailoverController::shared(&FailoverConfig::default()).unwrap();
    let (mut sinks, openflow, discovery) = event_channels(64);
    let ingress = tokio::spawn(
        EventIngress::new(ctl.clone(), Duration::from_secs(60)).run(openflow, discovery),
    );

    let script = r#"
{"event":"switch_connected","dpid":3}
{"event":"switch_connected","dpid":2}
{"event":"discovery_ready"}
{"event":"link","dpid1":3,"port1":2,"dpid2":2,"port2":1,"up":true}
{"event":"link","dpid1":2,"port1":2,"dpid2":4,"port2":1,"up":true}
{"event":"packet","src":"10.0.0.1","dst":"10.0.0.2","dpid":3}
{"event":"link","dpid1":2,"port1":2,"dpid2":4,"port2":1,"up":false}
"#;
    let replayed = replay(script.as_bytes(), &mut sinks).await.unwrap();
    assert_eq!(replayed.events, 7);
    drop(sinks);

    let stats = ingress.await.unwrap();
    assert_eq!(stats.link_events, 3);
    assert_eq!(ctl.state(), PathState::UsingBackup);
    assert_eq!(ctl.snapshot().switches, vec![2, 3]);
    assert_eq!(ctl.lookup_port(3, 2), Some(2));
    assert_eq!(ctl.lookup_port(2, 4), None);
}
