//! Path Selector - binary primary/backup failover state machine.
//!
//! Policy: an empty Failed-Link Set selects the primary path, anything else
//! selects the backup. The backup's own links are never re-validated and no
//! path is ever computed; both candidates are provisioned up front.

use crate::types::{FaultKind, LinkKey, Path, PathState};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// A state change produced by re-evaluating the Failed-Link Set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PathState,
    pub to: PathState,
}

impl Transition {
    pub fn is_failover(&self) -> bool {
        self.to == PathState::UsingBackup
    }

    pub fn is_reversion(&self) -> bool {
        self.to == PathState::UsingPrimary
    }
}

#[derive(Debug, Clone)]
pub struct PathSelector {
    primary: Path,
    backup: Path,
    failed: BTreeSet<LinkKey>,
    state: PathState,
}

impl PathSelector {
    /// Starts in `USING_PRIMARY` with no failed links.
    pub fn new(primary: Path, backup: Path) -> Self {
        Self {
            primary,
            backup,
            failed: BTreeSet::new(),
            state: PathState::UsingPrimary,
        }
    }

    pub fn state(&self) -> PathState {
        self.state
    }

    pub fn primary(&self) -> &Path {
        &self.primary
    }

    pub fn backup(&self) -> &Path {
        &self.backup
    }

    /// The path matching the current state.
    pub fn active_path(&self) -> &Path {
        match self.state {
            PathState::UsingPrimary => &self.primary,
            PathState::UsingBackup => &self.backup,
        }
    }

    pub fn failed_links(&self) -> &BTreeSet<LinkKey> {
        &self.failed
    }

    pub fn is_failed(&self, link: LinkKey) -> bool {
        self.failed.contains(&link)
    }

    /// True if `link` lies on the active path.
    pub fn on_active_span(&self, link: LinkKey) -> bool {
        self.active_path().contains_link(link)
    }

    /// A genuine link-down. Links on the primary's span or the active path's
    /// span are recorded as failed; anything else leaves the selector
    /// untouched. A primary link lost while on the backup must still block
    /// reversion.
    pub fn on_link_down(&mut self, link: LinkKey) -> Option<Transition> {
        if !self.primary.contains_link(link) && !self.on_active_span(link) {
            debug!(%link, "Link down off the primary and active paths, ignoring");
            return None;
        }
        warn!(%link, "Link failed: {}", link);
        self.failed.insert(link);
        self.evaluate()
    }

    /// A genuine link-up clears any recorded failure of that link.
    pub fn on_link_up(&mut self, link: LinkKey) -> Option<Transition> {
        if self.failed.remove(&link) {
            info!(%link, "Link recovered: {}", link);
        }
        self.evaluate()
    }

    /// An injected fault signal. `Fail` records the link regardless of span;
    /// `Restore` clears only that link.
    pub fn on_fault(&mut self, link: LinkKey, kind: FaultKind) -> Option<Transition> {
        match kind {
            FaultKind::Fail => {
                self.failed.insert(link);
            }
            FaultKind::Restore => {
                if !self.failed.remove(&link) {
                    debug!(%link, "Restore for a link that was not failed");
                }
            }
        }
        self.evaluate()
    }

    /// Re-derives the state from the Failed-Link Set.
    fn evaluate(&mut self) -> Option<Transition> {
        let desired = if self.failed.is_empty() {
            PathState::UsingPrimary
        } else {
            PathState::UsingBackup
        };

        if desired == self.state {
            return None;
        }

        let transition = Transition {
            from: self.state,
            to: desired,
        };
        self.state = desired;
        match desired {
            PathState::UsingBackup => {
                info!(failed = ?self.failed, "Using backup path: {}", self.backup)
            }
            PathState::UsingPrimary => info!("Reverting to primary path: {}", self.primary),
        }
        Some(transition)
    }

    /// `USING_BACKUP` holds exactly when the Failed-Link Set is non-empty.
    pub fn is_consistent(&self) -> bool {
        (self.state == PathState::UsingBackup) == !self.failed.is_empty()
    }
}
