//! Adjacency Store - per-switch neighbor to outport table.
//!
//! The only source of truth for "which local port on switch X reaches
//! neighbor Y". Entries always come and go in directional pairs: if X knows Y
//! then Y knows X, although the two ports are independent.

use crate::error::{FailoverError, Result};
use crate::types::{Dpid, PortNo};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// One directed adjacency: `from` reaches `to` through `port`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdjacencyEntry {
    pub from: Dpid,
    pub to: Dpid,
    pub port: PortNo,
}

/// Switch -> (neighbor -> local outport).
#[derive(Debug, Default, Clone)]
pub struct AdjacencyStore {
    table: BTreeMap<Dpid, BTreeMap<Dpid, PortNo>>,
}

impl AdjacencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts both directions of the link `a.port_a <-> b.port_b`.
    ///
    /// Re-adding an existing link overwrites its ports.
    pub fn add_link(&mut self, a: Dpid, b: Dpid, port_a: PortNo, port_b: PortNo) -> Result<()> {
        if a == b {
            return Err(FailoverError::SelfLoop(a, b));
        }

        let previous = self.table.entry(a).or_default().insert(b, port_a);
        self.table.entry(b).or_default().insert(a, port_b);

        match previous {
            Some(old) if old == port_a => {
                debug!(a, b, port_a, port_b, "Adjacency already known");
            }
            _ => {
                info!(a, b, port_a, port_b, "ADDED adjacency: {}-{}", a, b);
            }
        }
        Ok(())
    }

    /// Removes both directions of the link between `a` and `b`.
    ///
    /// Returns true if anything was removed. Absence is not an error.
    pub fn remove_link(&mut self, a: Dpid, b: Dpid) -> bool {
        let forward = self.remove_directed(a, b);
        let reverse = self.remove_directed(b, a);
        let removed = forward || reverse;

        if removed {
            warn!(a, b, "REMOVED adjacency: {}-{}", a, b);
        } else {
            debug!(a, b, "No adjacency to remove");
        }
        removed
    }

    fn remove_directed(&mut self, from: Dpid, to: Dpid) -> bool {
        let Some(neighbors) = self.table.get_mut(&from) else {
            return false;
        };
        let removed = neighbors.remove(&to).is_some();
        if neighbors.is_empty() {
            self.table.remove(&from);
        }
        removed
    }

    /// Local port on `a` that reaches neighbor `b`, or `None` if no route.
    pub fn lookup_port(&self, a: Dpid, b: Dpid) -> Option<PortNo> {
        self.table.get(&a).and_then(|neighbors| neighbors.get(&b)).copied()
    }

    /// Neighbors of `dpid` in ascending order.
    pub fn neighbors(&self, dpid: Dpid) -> Vec<Dpid> {
        self.table
            .get(&dpid)
            .map(|n| n.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of directed entries.
    pub fn len(&self) -> usize {
        self.table.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// All directed entries ordered by `(from, to)`.
    pub fn entries(&self) -> Vec<AdjacencyEntry> {
        self.table
            .iter()
            .flat_map(|(&from, neighbors)| {
                neighbors
                    .iter()
                    .map(move |(&to, &port)| AdjacencyEntry { from, to, port })
            })
            .collect()
    }
}
