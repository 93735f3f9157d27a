//! Replication Module
//!
//! Primary-to-backup fan-out of state mutations and the peer endpoint
//! that backups serve.

pub mod protocol;
mod coordinator;
mod handler;

pub use protocol::{
    required, AuthorityKind, Envelope, FrameHeader, OpKind, Operation, Payload, PeerKind,
    RequestKind, Status, ERROR_SERVICE, INTERNAL_ERROR,
};
pub use coordinator::{ReplicationCoordinator, ReplicationJob, ReplicationOutcome, ReplicationReport};
pub use handler::PeerHandler;

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// How the primary waits on its backups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Wait for every backup to answer or time out; failures are logged only
    #[default]
    Synchronous,
    /// Wait for every backup; fail the client operation below `min_acks`
    Quorum,
    /// Fire and forget
    Async,
}

impl std::fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationMode::Synchronous => write!(f, "synchronous"),
            ReplicationMode::Quorum => write!(f, "quorum"),
            ReplicationMode::Async => write!(f, "async"),
        }
    }
}

/// Configuration for replication
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Wait policy
    pub mode: ReplicationMode,
    /// Acknowledgements required in quorum mode
    pub min_acks: usize,
    /// Timeout of each backup RPC
    pub timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            mode: ReplicationMode::Synchronous,
            min_acks: 1,
            timeout: Duration::from_secs(2),
        }
    }
}
