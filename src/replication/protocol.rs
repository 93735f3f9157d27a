//! Wire Protocol
//!
//! Every exchange on every channel (client requests, peer replication,
//! rank authority, topic broadcasts) carries an [`Envelope`]: a service
//! tag plus a flat [`Payload`] that always includes the sender's wall
//! clock `timestamp` and its logical `clock`.
//!
//! Service tags are plain strings on the wire and parsed into the
//! exhaustive kind enums below at the edge, so dispatch is checked at
//! compile time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::now_millis;
use crate::error::{Error, Result};
use crate::membership::Peer;

/// Service tag used for generic error replies
pub const ERROR_SERVICE: &str = "error";

/// Description used for generic internal-error replies
pub const INTERNAL_ERROR: &str = "Internal server error";

/// Request or response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id; a reply carries the id of its request
    pub id: Uuid,
    /// Service tag (`login`, `replicate_channel`, `rank`, ...)
    pub service: String,
    /// Service data
    pub data: Payload,
}

/// Outcome status carried by replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    Error,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Error => write!(f, "erro"),
        }
    }
}

/// Flat payload shared by all services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Sender wall clock in milliseconds (informational)
    pub timestamp: i64,
    /// Sender logical clock (authoritative for ordering)
    pub clock: u64,
    pub status: Option<Status>,
    pub description: Option<String>,
    pub user: Option<String>,
    pub channel: Option<String>,
    pub message: Option<String>,
    pub src: Option<String>,
    pub dst: Option<String>,
    pub users: Option<Vec<String>>,
    pub channels: Option<Vec<String>>,
    pub rank: Option<u64>,
    pub list: Option<Vec<Peer>>,
    /// Physical clock reading (clock service)
    pub time: Option<i64>,
    /// Physical clock correction in milliseconds (clock_adjust service)
    pub offset: Option<i64>,
    /// Topic list (subscribe service)
    pub topics: Option<Vec<String>>,
    pub election: Option<String>,
}

impl Payload {
    /// Payload stamped with the current wall clock and the given logical clock
    pub fn stamped(clock: u64) -> Self {
        Self {
            timestamp: now_millis(),
            clock,
            ..Default::default()
        }
    }

    /// Successful reply payload
    pub fn ok(clock: u64) -> Self {
        Self {
            status: Some(Status::Ok),
            ..Self::stamped(clock)
        }
    }

    /// Error reply payload
    pub fn error(clock: u64, description: impl Into<String>) -> Self {
        Self {
            status: Some(Status::Error),
            description: Some(description.into()),
            ..Self::stamped(clock)
        }
    }
}

impl Envelope {
    /// Create a request with a fresh correlation id
    pub fn new(service: impl Into<String>, data: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.into(),
            data,
        }
    }

    /// Build the reply to this request
    pub fn reply(&self, data: Payload) -> Self {
        Self {
            id: self.id,
            service: self.service.clone(),
            data,
        }
    }

    /// Check whether this reply reports success
    pub fn is_ok(&self) -> bool {
        self.data.status == Some(Status::Ok)
    }

    /// Check whether this reply reports an error
    pub fn is_error(&self) -> bool {
        self.data.status == Some(Status::Error)
    }

    /// Serialize envelope to bytes
    pub fn serialize(&self) -> std::result::Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize envelope from bytes
    pub fn deserialize(bytes: &[u8]) -> std::result::Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

// ========== Service kinds ==========

/// Client-facing request kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Login,
    Users,
    Channel,
    Channels,
    Publish,
    Message,
    Clock,
    Election,
}

impl RequestKind {
    /// Parse a service tag
    pub fn parse(service: &str) -> Option<Self> {
        match service {
            "login" => Some(RequestKind::Login),
            "users" => Some(RequestKind::Users),
            "channel" => Some(RequestKind::Channel),
            "channels" => Some(RequestKind::Channels),
            "publish" => Some(RequestKind::Publish),
            "message" => Some(RequestKind::Message),
            "clock" => Some(RequestKind::Clock),
            "election" => Some(RequestKind::Election),
            _ => None,
        }
    }

    /// Wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Login => "login",
            RequestKind::Users => "users",
            RequestKind::Channel => "channel",
            RequestKind::Channels => "channels",
            RequestKind::Publish => "publish",
            RequestKind::Message => "message",
            RequestKind::Clock => "clock",
            RequestKind::Election => "election",
        }
    }
}

/// State-mutating operation kinds (the ones that get replicated)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Login,
    Channel,
    Publish,
    Message,
}

impl OpKind {
    /// Wire tag of the client request
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Login => "login",
            OpKind::Channel => "channel",
            OpKind::Publish => "publish",
            OpKind::Message => "message",
        }
    }

    /// Wire tag of the replication request
    pub fn replicate_service(&self) -> String {
        format!("replicate_{}", self.as_str())
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds served on the peer (replication) endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    Replicate(OpKind),
    Clock,
    ClockAdjust,
}

impl PeerKind {
    /// Parse a service tag
    pub fn parse(service: &str) -> Option<Self> {
        match service {
            "replicate_login" => Some(PeerKind::Replicate(OpKind::Login)),
            "replicate_channel" => Some(PeerKind::Replicate(OpKind::Channel)),
            "replicate_publish" => Some(PeerKind::Replicate(OpKind::Publish)),
            "replicate_message" => Some(PeerKind::Replicate(OpKind::Message)),
            "clock" => Some(PeerKind::Clock),
            "clock_adjust" => Some(PeerKind::ClockAdjust),
            _ => None,
        }
    }

    /// Wire tag
    pub fn as_service(&self) -> String {
        match self {
            PeerKind::Replicate(op) => op.replicate_service(),
            PeerKind::Clock => "clock".to_string(),
            PeerKind::ClockAdjust => "clock_adjust".to_string(),
        }
    }
}

/// Kinds understood by the external rank authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityKind {
    Rank,
    List,
    Heartbeat,
}

impl AuthorityKind {
    /// Wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorityKind::Rank => "rank",
            AuthorityKind::List => "list",
            AuthorityKind::Heartbeat => "heartbeat",
        }
    }
}

// ========== Typed operations ==========

/// A state-mutating operation decoded from a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Login {
        user: String,
        timestamp: i64,
    },
    CreateChannel {
        channel: String,
        timestamp: i64,
    },
    Publish {
        user: String,
        channel: String,
        message: String,
        timestamp: i64,
    },
    SendMessage {
        src: String,
        dst: String,
        message: String,
        timestamp: i64,
    },
}

impl Operation {
    /// Decode an operation of the given kind.
    ///
    /// Missing string fields decode as empty strings so that the store's
    /// validation reports them like any other bad input.
    pub fn from_payload(kind: OpKind, payload: &Payload) -> Self {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        let timestamp = payload.timestamp;

        match kind {
            OpKind::Login => Operation::Login {
                user: field(&payload.user),
                timestamp,
            },
            OpKind::Channel => Operation::CreateChannel {
                channel: field(&payload.channel),
                timestamp,
            },
            OpKind::Publish => Operation::Publish {
                user: field(&payload.user),
                channel: field(&payload.channel),
                message: field(&payload.message),
                timestamp,
            },
            OpKind::Message => Operation::SendMessage {
                src: field(&payload.src),
                dst: field(&payload.dst),
                message: field(&payload.message),
                timestamp,
            },
        }
    }

    /// Operation kind
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Login { .. } => OpKind::Login,
            Operation::CreateChannel { .. } => OpKind::Channel,
            Operation::Publish { .. } => OpKind::Publish,
            Operation::SendMessage { .. } => OpKind::Message,
        }
    }

    /// Encode into a payload carrying the given logical clock
    pub fn to_payload(&self, clock: u64) -> Payload {
        let mut payload = Payload::stamped(clock);
        match self {
            Operation::Login { user, timestamp } => {
                payload.user = Some(user.clone());
                payload.timestamp = *timestamp;
            }
            Operation::CreateChannel { channel, timestamp } => {
                payload.channel = Some(channel.clone());
                payload.timestamp = *timestamp;
            }
            Operation::Publish { user, channel, message, timestamp } => {
                payload.user = Some(user.clone());
                payload.channel = Some(channel.clone());
                payload.message = Some(message.clone());
                payload.timestamp = *timestamp;
            }
            Operation::SendMessage { src, dst, message, timestamp } => {
                payload.src = Some(src.clone());
                payload.dst = Some(dst.clone());
                payload.message = Some(message.clone());
                payload.timestamp = *timestamp;
            }
        }
        payload
    }
}

/// Require a field in a reply, naming it in the error
pub fn required<T: Clone>(value: &Option<T>, field: &str, service: &str) -> Result<T> {
    value
        .clone()
        .ok_or_else(|| Error::Network(format!("{} reply is missing '{}'", service, field)))
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Body length
    pub length: u32,
    /// Body checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a header for the given body
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }
}
