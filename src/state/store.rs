//! State Store
//!
//! Sole owner of the chat collections. Every validate-then-mutate span
//! runs under one lock, so two concurrent requests can never both pass
//! validation for the same change (e.g. creating the same channel).

use std::sync::Arc;
use tokio::sync::Mutex;

use super::{ChatMessage, ChatState, Publication, StateCounts, User};
use crate::clock::{now_millis, LogicalClock};
use crate::network::Broadcaster;
use crate::replication::{Envelope, Operation, Payload};
use crate::error::{Error, Result};

/// Service tag of channel publication broadcasts
pub const PUBLICATION_SERVICE: &str = "publication";

/// Service tag of private message broadcasts
pub const PRIVATE_MESSAGE_SERVICE: &str = "private_message";

/// Owner of users, channels, messages and publications
pub struct StateStore {
    /// Chat state
    state: Mutex<ChatState>,
    /// Node logical clock
    clock: Arc<LogicalClock>,
    /// Topic broadcaster for publications and private messages
    broadcaster: Arc<dyn Broadcaster>,
}

impl StateStore {
    /// Create an empty store
    pub fn new(clock: Arc<LogicalClock>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self::with_state(ChatState::default(), clock, broadcaster)
    }

    /// Create a store from previously persisted state
    pub fn with_state(state: ChatState, clock: Arc<LogicalClock>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            state: Mutex::new(state),
            clock,
            broadcaster,
        }
    }

    /// Register or refresh a user
    pub async fn login(&self, user: &str, timestamp: i64) -> Result<()> {
        if user.trim().is_empty() {
            return Err(Error::validation("Invalid user name"));
        }

        let mut state = self.state.lock().await;
        state.users.insert(
            user.to_string(),
            User {
                user: user.to_string(),
                login_time: timestamp,
                last_seen: now_millis(),
                created_at: timestamp,
            },
        );

        tracing::debug!("User '{}' logged in", user);
        Ok(())
    }

    /// Create a new channel
    pub async fn create_channel(&self, channel: &str, _timestamp: i64) -> Result<()> {
        if channel.trim().is_empty() {
            return Err(Error::validation("Invalid channel name"));
        }

        let mut state = self.state.lock().await;
        if state.channels.contains(channel) {
            return Err(Error::validation("Channel already exists"));
        }
        state.channels.insert(channel.to_string());

        tracing::debug!("Channel '{}' created", channel);
        Ok(())
    }

    /// Publish to an existing channel and broadcast on the channel topic
    pub async fn publish(&self, user: &str, channel: &str, message: &str, timestamp: i64) -> Result<Publication> {
        let publication = {
            let mut state = self.state.lock().await;
            if !state.channels.contains(channel) {
                return Err(Error::validation("Channel does not exist"));
            }

            let publication = Publication {
                user: user.to_string(),
                channel: channel.to_string(),
                message: message.to_string(),
                timestamp,
                clock: self.clock.tick(),
            };
            state.publications.push(publication.clone());
            publication
        };

        let mut payload = Payload::stamped(self.clock.tick());
        payload.user = Some(publication.user.clone());
        payload.channel = Some(publication.channel.clone());
        payload.message = Some(publication.message.clone());
        payload.timestamp = publication.timestamp;
        self.broadcaster
            .broadcast(channel, Envelope::new(PUBLICATION_SERVICE, payload));

        Ok(publication)
    }

    /// Store a private message and broadcast on the recipient's topic
    pub async fn send_message(&self, src: &str, dst: &str, message: &str, timestamp: i64) -> Result<ChatMessage> {
        let chat_message = {
            let mut state = self.state.lock().await;
            if !state.users.contains_key(dst) {
                return Err(Error::validation("Destination user does not exist"));
            }

            let chat_message = ChatMessage {
                src: src.to_string(),
                dst: dst.to_string(),
                message: message.to_string(),
                timestamp,
                clock: self.clock.tick(),
            };
            state.messages.push(chat_message.clone());
            chat_message
        };

        let mut payload = Payload::stamped(self.clock.tick());
        payload.src = Some(chat_message.src.clone());
        payload.dst = Some(chat_message.dst.clone());
        payload.message = Some(chat_message.message.clone());
        payload.timestamp = chat_message.timestamp;
        self.broadcaster
            .broadcast(dst, Envelope::new(PRIVATE_MESSAGE_SERVICE, payload));

        Ok(chat_message)
    }

    /// Validate and apply a client operation
    pub async fn apply(&self, op: &Operation) -> Result<()> {
        match op {
            Operation::Login { user, timestamp } => self.login(user, *timestamp).await,
            Operation::CreateChannel { channel, timestamp } => {
                self.create_channel(channel, *timestamp).await
            }
            Operation::Publish { user, channel, message, timestamp } => {
                self.publish(user, channel, message, *timestamp).await.map(|_| ())
            }
            Operation::SendMessage { src, dst, message, timestamp } => {
                self.send_message(src, dst, message, *timestamp).await.map(|_| ())
            }
        }
    }

    /// Apply an operation replicated from the primary.
    ///
    /// Preconditions are not re-checked and nothing is broadcast: the
    /// primary already validated and announced the change.
    pub async fn apply_replicated(&self, op: &Operation) {
        let mut state = self.state.lock().await;
        match op {
            Operation::Login { user, timestamp } => {
                state.users.insert(
                    user.clone(),
                    User {
                        user: user.clone(),
                        login_time: *timestamp,
                        last_seen: now_millis(),
                        created_at: *timestamp,
                    },
                );
            }
            Operation::CreateChannel { channel, .. } => {
                state.channels.insert(channel.clone());
            }
            Operation::Publish { user, channel, message, timestamp } => {
                state.publications.push(Publication {
                    user: user.clone(),
                    channel: channel.clone(),
                    message: message.clone(),
                    timestamp: *timestamp,
                    clock: self.clock.tick(),
                });
            }
            Operation::SendMessage { src, dst, message, timestamp } => {
                state.messages.push(ChatMessage {
                    src: src.clone(),
                    dst: dst.clone(),
                    message: message.clone(),
                    timestamp: *timestamp,
                    clock: self.clock.tick(),
                });
            }
        }

        tracing::debug!("Applied replicated {}", op.kind());
    }

    /// Known user names
    pub async fn list_users(&self) -> Vec<String> {
        self.state.lock().await.users.keys().cloned().collect()
    }

    /// Known channel names
    pub async fn list_channels(&self) -> Vec<String> {
        self.state.lock().await.channels.iter().cloned().collect()
    }

    /// Copy of the full state (for persistence)
    pub async fn snapshot(&self) -> ChatState {
        self.state.lock().await.clone()
    }

    /// Collection sizes
    pub async fn counts(&self) -> StateCounts {
        self.state.lock().await.counts()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Broadcaster that records every broadcast
    #[derive(Default)]
    pub(crate) struct RecordingBroadcaster {
        pub sent: StdMutex<Vec<(String, Envelope)>>,
    }

    impl RecordingBroadcaster {
        pub(crate) fn topics(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    impl Broadcaster for RecordingBroadcaster {
        fn broadcast(&self, topic: &str, envelope: Envelope) {
            self.sent.lock().unwrap().push((topic.to_string(), envelope));
        }
    }

    fn store() -> (StateStore, Arc<RecordingBroadcaster>) {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let store = StateStore::new(Arc::new(LogicalClock::new()), broadcaster.clone());
        (store, broadcaster)
    }

    #[tokio::test]
    async fn test_login_rejects_blank_names() {
        let (store, _) = store();

        assert!(store.login("   ", 1).await.unwrap_err().is_validation());
        assert!(store.login("", 1).await.is_err());
        assert!(store.list_users().await.is_empty());
    }

    #[tokio::test]
    async fn test_login_overwrites_user() {
        let (store, _) = store();
        store.login("alice", 100).await.unwrap();
        store.login("alice", 200).await.unwrap();

        let state = store.snapshot().await;
        assert_eq!(state.users.len(), 1);
        assert_eq!(state.users["alice"].login_time, 200);
        assert_eq!(state.users["alice"].created_at, 200);
    }

    #[tokio::test]
    async fn test_duplicate_channel_rejected() {
        let (store, _) = store();

        store.create_channel("general", 1).await.unwrap();
        let err = store.create_channel("general", 2).await.unwrap_err();

        assert!(err.is_validation());
        assert_eq!(store.list_channels().await, vec!["general".to_string()]);
        assert!(store.create_channel(" ", 3).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_channel_creation_has_one_winner() {
        let (store, _) = store();
        let store = Arc::new(store);

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.create_channel("general", 1).await.is_ok() })
            })
            .collect();

        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(store.counts().await.channels, 1);
    }

    #[tokio::test]
    async fn test_publish_to_missing_channel() {
        let (store, broadcaster) = store();

        let err = store.publish("alice", "nope", "hi", 1).await.unwrap_err();

        assert!(err.is_validation());
        assert_eq!(store.counts().await.publications, 0);
        assert!(broadcaster.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_broadcasts_on_channel() {
        let (store, broadcaster) = store();
        store.create_channel("general", 1).await.unwrap();

        let publication = store.publish("alice", "general", "hi", 5).await.unwrap();

        assert_eq!(publication.channel, "general");
        assert_eq!(store.counts().await.publications, 1);
        assert_eq!(broadcaster.topics(), vec!["general".to_string()]);

        let sent = broadcaster.sent.lock().unwrap();
        assert_eq!(sent[0].1.service, PUBLICATION_SERVICE);
        assert!(sent[0].1.data.clock > publication.clock);
    }

    #[tokio::test]
    async fn test_message_to_unknown_user() {
        let (store, broadcaster) = store();
        store.login("alice", 1).await.unwrap();

        let err = store.send_message("alice", "ghost", "hi", 2).await.unwrap_err();

        assert!(err.is_validation());
        assert_eq!(store.counts().await.messages, 0);
        assert!(broadcaster.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_broadcasts_on_recipient() {
        let (store, broadcaster) = store();
        store.login("bob", 1).await.unwrap();

        store.send_message("alice", "bob", "hey", 2).await.unwrap();

        assert_eq!(store.counts().await.messages, 1);
        assert_eq!(broadcaster.topics(), vec!["bob".to_string()]);
        assert_eq!(broadcaster.sent.lock().unwrap()[0].1.service, PRIVATE_MESSAGE_SERVICE);
    }

    #[tokio::test]
    async fn test_replicated_ops_skip_validation_and_broadcast() {
        let (store, broadcaster) = store();

        // Channel unknown locally, still applied
        store
            .apply_replicated(&Operation::Publish {
                user: "alice".into(),
                channel: "elsewhere".into(),
                message: "hi".into(),
                timestamp: 1,
            })
            .await;
        store
            .apply_replicated(&Operation::SendMessage {
                src: "alice".into(),
                dst: "ghost".into(),
                message: "boo".into(),
                timestamp: 2,
            })
            .await;
        store
            .apply_replicated(&Operation::CreateChannel {
                channel: "general".into(),
                timestamp: 3,
            })
            .await;

        let counts = store.counts().await;
        assert_eq!(counts.publications, 1);
        assert_eq!(counts.messages, 1);
        assert_eq!(counts.channels, 1);
        assert!(broadcaster.sent.lock().unwrap().is_empty());
    }
}
