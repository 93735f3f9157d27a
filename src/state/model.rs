//! Chat Domain Model

use std::collections::{BTreeMap, BTreeSet};
use serde::{Deserialize, Serialize};

/// A user record, overwritten on every login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user: String,
    pub login_time: i64,
    pub last_seen: i64,
    pub created_at: i64,
}

/// A private message between two users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub src: String,
    pub dst: String,
    pub message: String,
    pub timestamp: i64,
    pub clock: u64,
}

/// A message published to a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub user: String,
    pub channel: String,
    pub message: String,
    pub timestamp: i64,
    pub clock: u64,
}

/// All mutable chat state of a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    /// Users keyed by name
    pub users: BTreeMap<String, User>,
    /// Channel names
    pub channels: BTreeSet<String>,
    /// Private messages in arrival order
    pub messages: Vec<ChatMessage>,
    /// Channel publications in arrival order
    pub publications: Vec<Publication>,
}

impl ChatState {
    /// Collection sizes
    pub fn counts(&self) -> StateCounts {
        StateCounts {
            users: self.users.len(),
            channels: self.channels.len(),
            messages: self.messages.len(),
            publications: self.publications.len(),
        }
    }
}

/// Collection sizes, for logging and status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub users: usize,
    pub channels: usize,
    pub messages: usize,
    pub publications: usize,
}

impl std::fmt::Display for StateCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} users, {} channels, {} messages, {} publications",
            self.users, self.channels, self.messages, self.publications
        )
    }
}
