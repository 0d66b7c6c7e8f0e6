//! Core topology types shared by the failover engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// OpenFlow datapath identifier of a switch.
pub type Dpid = u64;

/// Physical port number on a switch.
pub type PortNo = u16;

/// Unordered switch pair identifying a link.
///
/// The constructor normalizes endpoint order, so `LinkKey::new(4, 2)` and
/// `LinkKey::new(2, 4)` compare equal. Used as the Failed-Link Set element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    low: Dpid,
    high: Dpid,
}

impl LinkKey {
    /// Creates a normalized link key.
    pub fn new(a: Dpid, b: Dpid) -> Self {
        Self {
            low: a.min(b),
            high: a.max(b),
        }
    }

    /// Returns the endpoints, lower dpid first.
    pub fn endpoints(&self) -> (Dpid, Dpid) {
        (self.low, self.high)
    }

    /// Returns true if both endpoints are the same switch.
    pub fn is_self_loop(&self) -> bool {
        self.low == self.high
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.low, self.high)
    }
}

/// A discovered link between two switch ports.
///
/// Direction carries no meaning beyond which port belongs to which switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub dpid1: Dpid,
    pub port1: PortNo,
    pub dpid2: Dpid,
    pub port2: PortNo,
}

impl Link {
    pub fn new(dpid1: Dpid, port1: PortNo, dpid2: Dpid, port2: PortNo) -> Self {
        Self {
            dpid1,
            port1,
            dpid2,
            port2,
        }
    }

    /// Unordered key for this link.
    pub fn key(&self) -> LinkKey {
        LinkKey::new(self.dpid1, self.dpid2)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} <-> {}.{}",
            self.dpid1, self.port1, self.dpid2, self.port2
        )
    }
}

/// The two tracked hosts. Traffic between them in either direction is
/// steered onto the active path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPair {
    pub a: Ipv4Addr,
    pub b: Ipv4Addr,
}

impl HostPair {
    pub fn new(a: Ipv4Addr, b: Ipv4Addr) -> Self {
        Self { a, b }
    }

    /// Returns true if `src -> dst` is traffic between the tracked hosts,
    /// in either direction.
    pub fn matches(&self, src: Ipv4Addr, dst: Ipv4Addr) -> bool {
        (src == self.a && dst == self.b) || (src == self.b && dst == self.a)
    }

    /// Both directed (source, destination) pairs, `a -> b` first.
    pub fn directions(&self) -> [(Ipv4Addr, Ipv4Addr); 2] {
        [(self.a, self.b), (self.b, self.a)]
    }
}

/// Ordered sequence of switches between the two hosts' attachment points.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<Dpid>);

impl Path {
    pub fn new(switches: Vec<Dpid>) -> Self {
        Self(switches)
    }

    pub fn switches(&self) -> &[Dpid] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<Dpid> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<Dpid> {
        self.0.last().copied()
    }

    /// Consecutive `(switch, next switch)` pairs in forwarding order.
    pub fn hops(&self) -> impl Iterator<Item = (Dpid, Dpid)> + '_ {
        self.0.windows(2).map(|w| (w[0], w[1]))
    }

    /// Returns true if the link joins two consecutive switches of this path.
    pub fn contains_link(&self, link: LinkKey) -> bool {
        self.hops().any(|(a, b)| LinkKey::new(a, b) == link)
    }
}

impl From<Vec<Dpid>> for Path {
    fn from(switches: Vec<Dpid>) -> Self {
        Self(switches)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, dpid) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dpid)?;
        }
        write!(f, "]")
    }
}

/// Kind of an externally injected fault signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    Fail,
    Restore,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Restore => "restore",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail" | "failure" => Ok(Self::Fail),
            "restore" => Ok(Self::Restore),
            other => Err(format!("unknown fault kind: {}", other)),
        }
    }
}

/// Failover state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PathState {
    UsingPrimary,
    UsingBackup,
}

impl fmt::Display for PathState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsingPrimary => f.write_str("USING_PRIMARY"),
            Self::UsingBackup => f.write_str("USING_BACKUP"),
        }
    }
}
