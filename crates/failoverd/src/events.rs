//! Event Ingress - normalizes transport, discovery and fault events.
//!
//! ```text
//!  switch transport ──(mpsc: ControllerEvent)──┐
//!                                              ├──> EventIngress ──> dispatch ──> FailoverController
//!  topology discovery ──(oneshot: ready)───────┤
//!                     ──(mpsc: LinkEvent)──────┘   (registered once ready)
//! ```
//!
//! Switch-connect and packet-in events are consumed from the start. Link
//! events are only consumed once discovery has published its readiness
//! signal, which is awaited exactly once with an upper bound.

use crate::controller::FailoverController;
use crate::flow_installer::InstallReport;
use crate::openflow::ControlChannel;
use crate::types::{Dpid, FaultKind, Link};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Default event channel depth
pub const DEFAULT_EVENT_QUEUE: usize = 1024;

/// Tagged controller event.
pub enum ControllerEvent {
    SwitchConnected {
        dpid: Dpid,
        channel: Arc<dyn ControlChannel>,
    },
    LinkChanged {
        link: Link,
        up: bool,
    },
    PacketArrived {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        dpid: Dpid,
    },
    ExternalFault {
        a: Dpid,
        b: Dpid,
        kind: FaultKind,
    },
}

impl ControllerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SwitchConnected { .. } => "switch_connected",
            Self::LinkChanged { .. } => "link_changed",
            Self::PacketArrived { .. } => "packet_arrived",
            Self::ExternalFault { .. } => "external_fault",
        }
    }
}

impl fmt::Debug for ControllerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SwitchConnected { dpid, .. } => f
                .debug_struct("SwitchConnected")
                .field("dpid", dpid)
                .finish_non_exhaustive(),
            Self::LinkChanged { link, up } => f
                .debug_struct("LinkChanged")
                .field("link", link)
                .field("up", up)
                .finish(),
            Self::PacketArrived { src, dst, dpid } => f
                .debug_struct("PacketArrived")
                .field("src", src)
                .field("dst", dst)
                .field("dpid", dpid)
                .finish(),
            Self::ExternalFault { a, b, kind } => f
                .debug_struct("ExternalFault")
                .field("a", a)
                .field("b", b)
                .field("kind", kind)
                .finish(),
        }
    }
}

/// Link notification published by topology discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEvent {
    pub link: Link,
    pub up: bool,
}

impl From<LinkEvent> for ControllerEvent {
    fn from(event: LinkEvent) -> Self {
        Self::LinkChanged {
            link: event.link,
            up: event.up,
        }
    }
}

/// Routes one event to the controller. Never fails; errors are logged.
///
/// Returns the install report when the event caused a path install.
pub fn dispatch(controller: &FailoverController, event: ControllerEvent) -> Option<InstallReport> {
    match event {
        ControllerEvent::SwitchConnected { dpid, channel } => {
            controller.switch_connected(dpid, channel);
            None
        }
        ControllerEvent::LinkChanged { link, up } => controller.link_changed(link, up),
        ControllerEvent::PacketArrived { src, dst, dpid } => {
            controller.packet_arrived(src, dst, dpid)
        }
        ControllerEvent::ExternalFault { a, b, kind } => {
            match controller.external_fault(a, b, kind) {
                Ok(report) => report,
                Err(e) => {
                    warn!(a, b, %kind, error = %e, "Dropping fault signal");
                    None
                }
            }
        }
    }
}

/// Discovery side of the ingress: readiness signal plus link stream.
pub struct DiscoveryHandle {
    pub ready: oneshot::Receiver<()>,
    pub links: mpsc::Receiver<LinkEvent>,
}

/// Producer half handed to whatever drives the controller: the switch
/// transport, topology discovery, or the event replayer.
#[derive(Debug)]
pub struct EventSinks {
    pub openflow: mpsc::Sender<ControllerEvent>,
    pub links: mpsc::Sender<LinkEvent>,
    pub discovery_ready: Option<oneshot::Sender<()>>,
}

impl EventSinks {
    /// Publishes the discovery readiness signal. Only the first call has an
    /// effect.
    pub fn signal_discovery_ready(&mut self) -> bool {
        match self.discovery_ready.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Creates connected sinks and their consuming ends.
pub fn event_channels(
    capacity: usize,
) -> (EventSinks, mpsc::Receiver<ControllerEvent>, DiscoveryHandle) {
    let (openflow_tx, openflow_rx) = mpsc::channel(capacity);
    let (links_tx, links_rx) = mpsc::channel(capacity);
    let (ready_tx, ready_rx) = oneshot::channel();

    let sinks = EventSinks {
        openflow: openflow_tx,
        links: links_tx,
        discovery_ready: Some(ready_tx),
    };
    let discovery = DiscoveryHandle {
        ready: ready_rx,
        links: links_rx,
    };
    (sinks, openflow_rx, discovery)
}

/// Counters returned when the ingress loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngressStats {
    pub dispatched: usize,
    pub link_events: usize,
    pub installs: usize,
    pub link_events_registered: bool,
}

pub struct EventIngress {
    controller: Arc<FailoverController>,
    ready_timeout: Duration,
}

impl EventIngress {
    pub fn new(controller: Arc<FailoverController>, ready_timeout: Duration) -> Self {
        Self {
            controller,
            ready_timeout,
        }
    }

    /// Runs until both event streams have closed.
    pub async fn run(
        self,
        mut openflow: mpsc::Receiver<ControllerEvent>,
        discovery: DiscoveryHandle,
    ) -> IngressStats {
        let DiscoveryHandle {
            ready,
            links: mut link_rx,
        } = discovery;
        let readiness = tokio::time::timeout(self.ready_timeout, ready);
        tokio::pin!(readiness);

        let mut stats = IngressStats::default();
        let mut openflow_open = true;
        let mut links_open = true;

        loop {
            tokio::select! {
                outcome = &mut readiness, if !stats.link_events_registered => {
                    match outcome {
                        Ok(Ok(())) => info!("Discovery ready"),
                        Ok(Err(_)) => warn!("Discovery dropped its readiness signal"),
                        Err(_) => warn!(
                            timeout_secs = self.ready_timeout.as_secs(),
                            "Timed out waiting for discovery readiness"
                        ),
                    }
                    stats.link_events_registered = true;
                    info!("LinkEvent listener registered");
                }
                event = openflow.recv(), if openflow_open => match event {
                    Some(event) => {
                        debug!(kind = event.kind(), "Dispatching event");
                        self.dispatch_counted(event, &mut stats);
                    }
                    None => {
                        debug!("Transport event stream closed");
                        openflow_open = false;
                    }
                },
                event = link_rx.recv(), if links_open && stats.link_events_registered => match event {
                    Some(event) => {
                        stats.link_events += 1;
                        self.dispatch_counted(event.into(), &mut stats);
                    }
                    None => {
                        debug!("Discovery link stream closed");
                        links_open = false;
                    }
                },
                else => break,
            }
        }

        info!(
            dispatched = stats.dispatched,
            installs = stats.installs,
            "Event ingress stopped"
        );
        stats
    }

    fn dispatch_counted(&self, event: ControllerEvent, stats: &mut IngressStats) {
        stats.dispatched += 1;
        if dispatch(&self.controller, event).is_some() {
            stats.installs += 1;
        }
    }
}
