//! Membership Module
//!
//! Coordinator tracking driven by ranks from the external rank authority.

mod directory;
mod client;

pub use directory::{MembershipDirectory, MembershipView, NodeIdentity, Peer};
pub use client::{MembershipClient, MembershipConfig};
