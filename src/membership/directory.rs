//! Membership Directory
//!
//! Holds the latest peer→rank map published by the rank authority and
//! derives who coordinates the group.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// A node as listed by the rank authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub rank: u64,
}

impl Peer {
    pub fn new(name: impl Into<String>, rank: u64) -> Self {
        Self {
            name: name.into(),
            rank,
        }
    }
}

/// This node's identity. The rank is assigned at most once.
#[derive(Debug)]
pub struct NodeIdentity {
    name: String,
    rank: OnceLock<u64>,
}

impl NodeIdentity {
    /// Create an identity with no rank yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rank: OnceLock::new(),
        }
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assigned rank, if registration succeeded
    pub fn rank(&self) -> Option<u64> {
        self.rank.get().copied()
    }

    /// Record the rank handed out by the authority.
    ///
    /// Re-assigning the same rank is accepted; a different one is refused.
    pub fn assign_rank(&self, rank: u64) -> Result<()> {
        let assigned = *self.rank.get_or_init(|| rank);
        if assigned != rank {
            return Err(Error::Authority(format!(
                "{} already holds rank {}, refusing {}",
                self.name, assigned, rank
            )));
        }
        Ok(())
    }
}

/// Immutable snapshot of the group as seen by this node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipView {
    ranks: BTreeMap<String, u64>,
    coordinator: Option<String>,
    is_primary: bool,
    backups: Vec<String>,
}

impl MembershipView {
    /// Derive a view from the authority's list.
    ///
    /// The coordinator is the node with the lowest rank; equal ranks are
    /// broken by the lexicographically smallest name so that every node
    /// observing the same list elects the same coordinator.
    pub fn build(self_name: &str, self_rank: Option<u64>, peers: &[Peer]) -> Self {
        let mut ranks: BTreeMap<String, u64> = peers
            .iter()
            .map(|p| (p.name.clone(), p.rank))
            .collect();
        if let Some(rank) = self_rank {
            ranks.insert(self_name.to_string(), rank);
        }

        let coordinator = ranks
            .iter()
            .min_by(|(a_name, a_rank), (b_name, b_rank)| {
                a_rank.cmp(b_rank).then_with(|| a_name.cmp(b_name))
            })
            .map(|(name, _)| name.clone());

        let is_primary = coordinator.as_deref() == Some(self_name);
        let backups = if is_primary {
            ranks.keys().filter(|name| *name != self_name).cloned().collect()
        } else {
            Vec::new()
        };

        Self {
            ranks,
            coordinator,
            is_primary,
            backups,
        }
    }

    /// Current coordinator, if any node is known
    pub fn coordinator(&self) -> Option<&str> {
        self.coordinator.as_deref()
    }

    /// Whether this node is the coordinator (primary)
    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// Replication targets; empty unless this node is primary
    pub fn backups(&self) -> &[String] {
        &self.backups
    }

    /// All known nodes including self
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

/// Owner of the current membership view
pub struct MembershipDirectory {
    /// This node
    identity: NodeIdentity,
    /// Latest view; replaced wholesale on refresh
    view: RwLock<Arc<MembershipView>>,
}

impl MembershipDirectory {
    /// Create a directory with an empty view
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            identity: NodeIdentity::new(name),
            view: RwLock::new(Arc::new(MembershipView::default())),
        }
    }

    /// This node's identity
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// This node's name
    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// Replace the view from a fresh authority list.
    ///
    /// Snapshots handed out earlier are unaffected.
    pub async fn refresh(&self, peers: &[Peer]) -> Arc<MembershipView> {
        let view = Arc::new(MembershipView::build(
            self.identity.name(),
            self.identity.rank(),
            peers,
        ));

        let previous = {
            let mut current = self.view.write().await;
            std::mem::replace(&mut *current, Arc::clone(&view))
        };

        if previous.coordinator() != view.coordinator() || previous.is_primary() != view.is_primary() {
            tracing::info!(
                "Membership updated: {} nodes, coordinator {:?}, primary: {}",
                view.len(),
                view.coordinator(),
                view.is_primary()
            );
        } else {
            tracing::debug!("Membership refreshed: {} nodes", view.len());
        }

        view
    }

    /// Current view
    pub async fn snapshot(&self) -> Arc<MembershipView> {
        Arc::clone(&*self.view.read().await)
    }

    /// Whether this node is currently primary
    pub async fn is_primary(&self) -> bool {
        self.view.read().await.is_primary()
    }
}
