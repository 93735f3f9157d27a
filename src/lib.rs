//! WolfChat - Replicated Chat Server Node
//!
//! A chat server node (logins, channels, channel publications and private
//! messages) that runs as one member of a group of replicas.
//!
//! # Architecture
//!
//! An external rank authority hands every node a rank; the node with the
//! lowest rank coordinates the group as primary and pushes each state
//! mutation to the other nodes (backups). Every message carries a Lamport
//! logical clock, and the coordinator keeps physical clocks aligned with
//! Berkeley-style averaging.
//!
//! # Features
//!
//! - Request-reply client endpoint with exactly one reply per request
//! - Topic broadcasts for channel publications and private messages
//! - Primary/backup replication with configurable wait policy
//! - Lamport logical clock and Berkeley physical clock synchronization
//! - JSON snapshot persistence with debounced, serialized writes
//! - HTTP status API

pub mod config;
pub mod error;
pub mod clock;
pub mod membership;
pub mod network;
pub mod replication;
pub mod state;
pub mod router;
pub mod node;
pub mod api;

pub use config::WolfChatConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfChatConfig;
    pub use crate::error::{Error, Result};
    pub use crate::clock::{LogicalClock, PhysicalClock};
    pub use crate::membership::{MembershipDirectory, Peer};
    pub use crate::network::{RpcClient, RpcServer, Subscription};
    pub use crate::replication::{Envelope, Operation, Payload, ReplicationMode};
    pub use crate::state::StateStore;
    pub use crate::router::RequestRouter;
    pub use crate::node::ChatNode;
}
