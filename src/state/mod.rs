//! State Management Module
//!
//! Domain state of the chat (users, channels, messages, publications),
//! the store that applies operations to it, and snapshot persistence.

mod model;
mod store;
mod snapshot;

pub use model::{ChatMessage, ChatState, Publication, StateCounts, User};
pub use store::{StateStore, PRIVATE_MESSAGE_SERVICE, PUBLICATION_SERVICE};
pub use snapshot::{PersistenceConfig, Persister, SnapshotStore};

#[cfg(test)]
pub(crate) use store::tests::RecordingBroadcaster;
