//! Primary/backup path failover controller for a two-host OpenFlow network.
//!
//! failoverd pins traffic between two hosts onto one of two pre-provisioned
//! switch paths. While every known link is healthy the primary path carries
//! the traffic; as soon as any link is reported failed, either by topology
//! discovery or through the fault injection endpoint, the backup path is
//! programmed instead. Once the failed set empties the primary is restored.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────────┐  ControllerEvent   ┌──────────────┐
//!  │ switch        │───────────────────▶│              │
//!  │ transport     │                    │ EventIngress │──┐
//!  └───────────────┘                    │              │  │ dispatch
//!  ┌───────────────┐  ready + LinkEvent │              │  │
//!  │ discovery     │───────────────────▶│              │  │
//!  └───────────────┘                    └──────────────┘  ▼
//!  ┌───────────────┐  external_fault       ┌──────────────────────────┐
//!  │ fault API     │──────────────────────▶│ FailoverController       │
//!  │ (own thread)  │                       │  AdjacencyStore          │
//!  └───────────────┘                       │  ConnectionTable         │
//!                                          │  PathSelector            │
//!                                          │  FlowInstaller ──────────┼──▶ flow-mods
//!                                          └──────────────────────────┘
//! ```

pub mod adjacency;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod fault_api;
pub mod flow_installer;
pub mod metrics;
pub mod openflow;
pub mod path_selector;
pub mod replay;
pub mod types;

pub use adjacency::{AdjacencyEntry, AdjacencyStore};
pub use config::{FailoverConfig, DEFAULT_CONFIG_PATH};
pub use controller::{ControllerSnapshot, FailoverController};
pub use error::{FailoverError, Result};
pub use events::{
    dispatch, event_channels, ControllerEvent, DiscoveryHandle, EventIngress, EventSinks,
    IngressStats, LinkEvent, DEFAULT_EVENT_QUEUE,
};
pub use fault_api::{spawn_fault_api, FaultApiHandle};
pub use flow_installer::{FlowInstaller, InstallReport, SkipReason};
pub use metrics::FailoverMetrics;
pub use openflow::{ConnectionTable, ControlChannel, FlowMod, LogChannel, MemoryChannel, WriterChannel};
pub use path_selector::{PathSelector, Transition};
pub use replay::{replay, ReplayStats, ScriptedEvent};
pub use types::{Dpid, FaultKind, HostPair, Link, LinkKey, Path, PathState, PortNo};
