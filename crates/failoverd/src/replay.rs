//! Event replay from a JSON-lines script.
//!
//! Each non-empty line is one [`ScriptedEvent`]; lines starting with `#` are
//! comments. Events are pushed into the same channels a live switch transport
//! and topology discovery would use, so the ingress cannot tell them apart.
//!
//! ```text
//! {"event":"switch_connected","dpid":3}
//! {"event":"link","dpid1":3,"port1":2,"dpid2":2,"port2":1,"up":true}
//! {"event":"discovery_ready"}
//! {"event":"packet","src":"10.0.0.1","dst":"10.0.0.2","dpid":3}
//! {"event":"fault","a":2,"b":4,"kind":"fail"}
//! {"event":"sleep","millis":500}
//! ```

use crate::error::{FailoverError, Result};
use crate::events::{ControllerEvent, EventSinks, LinkEvent};
use crate::openflow::LogChannel;
use crate::types::{Dpid, FaultKind, Link, PortNo};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptedEvent {
    SwitchConnected {
        dpid: Dpid,
    },
    Link {
        dpid1: Dpid,
        port1: PortNo,
        dpid2: Dpid,
        port2: PortNo,
        up: bool,
    },
    Packet {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        dpid: Dpid,
    },
    Fault {
        a: Dpid,
        b: Dpid,
        kind: FaultKind,
    },
    DiscoveryReady,
    Sleep {
        millis: u64,
    },
}

impl ScriptedEvent {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line)
            .map_err(|e| FailoverError::Config(format!("Invalid scripted event: {}", e)))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub events: usize,
    pub invalid_lines: usize,
}

/// Feeds every event of `reader` into `sinks`.
///
/// Unparseable lines are logged and skipped. Returns early without error if
/// the ingress has gone away.
pub async fn replay<R>(reader: R, sinks: &mut EventSinks) -> Result<ReplayStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = ReplayStats::default();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event = match ScriptedEvent::parse(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping script line");
                stats.invalid_lines += 1;
                continue;
            }
        };
        debug!(line = line_no, ?event, "Replaying");
        stats.events += 1;

        if !feed(event, sinks).await {
            warn!(line = line_no, "Ingress closed, stopping replay");
            break;
        }
    }

    info!(
        events = stats.events,
        invalid = stats.invalid_lines,
        "Replay finished"
    );
    Ok(stats)
}

async fn feed(event: ScriptedEvent, sinks: &mut EventSinks) -> bool {
    let controller_event = match event {
        ScriptedEvent::SwitchConnected { dpid } => ControllerEvent::SwitchConnected {
            dpid,
            channel: Arc::new(LogChannel::new(dpid)),
        },
        ScriptedEvent::Link {
            dpid1,
            port1,
            dpid2,
            port2,
            up,
        } => {
            let link = LinkEvent {
                link: Link::new(dpid1, port1, dpid2, port2),
                up,
            };
            return sinks.links.send(link).await.is_ok();
        }
        ScriptedEvent::Packet { src, dst, dpid } => {
            ControllerEvent::PacketArrived { src, dst, dpid }
        }
        ScriptedEvent::Fault { a, b, kind } => ControllerEvent::ExternalFault { a, b, kind },
        ScriptedEvent::DiscoveryReady => {
            if !sinks.signal_discovery_ready() {
                debug!("Discovery readiness already published");
            }
            return true;
        }
        ScriptedEvent::Sleep { millis } => {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            return true;
        }
    };
    sinks.openflow.send(controller_event).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channels;

    #[test]
    fn test_parse_link_event() {
        let event =
            ScriptedEvent::parse(r#"{"event":"link","dpid1":3,"port1":2,"dpid2":2,"port2":1,"up":false}"#)
                .unwrap();
        assert_eq!(
            event,
            ScriptedEvent::Link {
                dpid1: 3,
                port1: 2,
                dpid2: 2,
                port2: 1,
                up: false
            }
        );
    }

    #[test]
    fn test_parse_fault_accepts_lowercase_kind() {
        let event = ScriptedEvent::parse(r#"{"event":"fault","a":2,"b":4,"kind":"restore"}"#).unwrap();
        assert_eq!(
            event,
            ScriptedEvent::Fault {
                a: 2,
                b: 4,
                kind: FaultKind::Restore
            }
        );
    }

    #[test]
    fn test_parse_unknown_event_fails() {
        assert!(ScriptedEvent::parse(r#"{"event":"reboot"}"#).is_err());
    }

    #[tokio::test]
    async fn test_replay_routes_events() {
        let (mut sinks, mut openflow, mut discovery) = event_channels(16);
        let script = "\
# demo
{\"event\":\"switch_connected\",\"dpid\":3}

{\"event\":\"link\",\"dpid1\":3,\"port1\":2,\"dpid2\":2,\"port2\":1,\"up\":true}
not json
{\"event\":\"discovery_ready\"}
{\"event\":\"fault\",\"a\":2,\"b\":4,\"kind\":\"fail\"}
";
        let stats = replay(script.as_bytes(), &mut sinks).await.unwrap();
        assert_eq!(
            stats,
            ReplayStats {
                events: 4,
                invalid_lines: 1
            }
        );

        assert!(matches!(
            openflow.recv().await,
            Some(ControllerEvent::SwitchConnected { dpid: 3, .. })
        ));
        assert!(matches!(
            openflow.recv().await,
            Some(ControllerEvent::ExternalFault {
                a: 2,
                b: 4,
                kind: FaultKind::Fail
            })
        ));
        assert_eq!(
            discovery.links.recv().await,
            Some(LinkEvent {
                link: Link::new(3, 2, 2, 1),
                up: true
            })
        );
        assert!(discovery.ready.await.is_ok());
    }

    #[tokio::test]
    async fn test_replay_stops_when_ingress_gone() {
        let (mut sinks, openflow, _discovery) = event_channels(1);
        drop(openflow);
        let script = "{\"event\":\"packet\",\"src\":\"10.0.0.1\",\"dst\":\"10.0.0.2\",\"dpid\":3}\n\
                      {\"event\":\"packet\",\"src\":\"10.0.0.2\",\"dst\":\"10.0.0.1\",\"dpid\":4}\n";
        let stats = replay(script.as_bytes(), &mut sinks).await.unwrap();
        assert_eq!(stats.events, 1);
    }
}
