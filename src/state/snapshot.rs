//! Snapshot Persistence
//!
//! Full rewrites of the four chat collections as JSON documents. Writes
//! go to a temp file first and are renamed into place, so a crash mid
//! write leaves the previous document intact.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};

use super::{ChatMessage, ChatState, Publication, StateStore, User};
use crate::error::Result;

const USERS_FILE: &str = "users.json";
const CHANNELS_FILE: &str = "channels.json";
const MESSAGES_FILE: &str = "messages.json";
const PUBLICATIONS_FILE: &str = "publications.json";

/// Reads and writes the snapshot documents in a data directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Create a store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write all four documents
    pub async fn save(&self, state: &ChatState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let users: Vec<&User> = state.users.values().collect();
        let channels: Vec<&String> = state.channels.iter().collect();

        self.write_document(USERS_FILE, &users).await?;
        self.write_document(CHANNELS_FILE, &channels).await?;
        self.write_document(MESSAGES_FILE, &state.messages).await?;
        self.write_document(PUBLICATIONS_FILE, &state.publications).await?;

        tracing::debug!("Snapshot written to {}", self.dir.display());
        Ok(())
    }

    /// Load all four documents. Missing documents load as empty.
    pub async fn load(&self) -> Result<ChatState> {
        let users: Vec<User> = self.read_document(USERS_FILE).await?;
        let channels: Vec<String> = self.read_document(CHANNELS_FILE).await?;
        let messages: Vec<ChatMessage> = self.read_document(MESSAGES_FILE).await?;
        let publications: Vec<Publication> = self.read_document(PUBLICATIONS_FILE).await?;

        let state = ChatState {
            users: users.into_iter().map(|u| (u.user.clone(), u)).collect(),
            channels: channels.into_iter().collect(),
            messages,
            publications,
        };

        tracing::info!("Loaded snapshot from {}: {}", self.dir.display(), state.counts());
        Ok(state)
    }

    async fn write_document<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{}.tmp", file));

        let body = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read_document<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T> {
        let path = self.dir.join(file);
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(serde_json::from_slice(&body)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No {} found, starting empty", path.display());
                Ok(T::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Whether snapshots are written at all
    pub enabled: bool,
    /// Unconditional save interval
    pub autosave_interval: Duration,
    /// Quiet period that coalesces flush requests
    pub debounce: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            autosave_interval: Duration::from_secs(30),
            debounce: Duration::from_millis(200),
        }
    }
}

/// Single writer for the snapshot documents.
///
/// Mutations call [`Persister::request_flush`]; the background task
/// coalesces requests within the debounce window into one write. All
/// writes (debounced, autosave, shutdown) go through one mutex so the
/// documents are never written concurrently.
pub struct Persister {
    snapshots: SnapshotStore,
    store: Arc<StateStore>,
    config: PersistenceConfig,
    write_lock: Mutex<()>,
    dirty: AtomicBool,
    notify: Notify,
}

impl Persister {
    /// Create a persister for a store
    pub fn new(snapshots: SnapshotStore, store: Arc<StateStore>, config: PersistenceConfig) -> Self {
        Self {
            snapshots,
            store,
            config,
            write_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Mark state dirty and wake the writer
    pub fn request_flush(&self) {
        if !self.config.enabled {
            return;
        }
        self.dirty.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Whether a flush has been requested and not yet written
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write a snapshot now
    pub async fn flush(&self) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        // Cleared before reading state: a mutation landing after the read
        // sets it again and gets its own write.
        self.dirty.store(false, Ordering::Release);
        let state = self.store.snapshot().await;
        self.snapshots.save(&state).await
    }

    /// Run the debounced writer and autosave timer until shutdown,
    /// then write one final snapshot.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::info!("Persistence disabled");
            return;
        }

        let mut autosave = tokio::time::interval(self.config.autosave_interval);
        autosave.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        autosave.tick().await;

        loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.debounce) => {}
                        _ = shutdown.changed() => {}
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                    if self.is_dirty() {
                        self.flush_logged("debounced").await;
                    }
                }
                _ = autosave.tick() => self.flush_logged("autosave").await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.flush_logged("shutdown").await;
        tracing::info!("Persister stopped");
    }

    async fn flush_logged(&self, reason: &str) {
        match self.flush().await {
            Ok(()) => tracing::debug!("Snapshot saved ({})", reason),
            Err(e) => tracing::error!("Failed to save snapshot ({}): {}", reason, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::LogicalClock;
    use crate::state::RecordingBroadcaster;

    fn sample_state() -> ChatState {
        let mut state = ChatState::default();
        state.users.insert(
            "alice".into(),
            User {
                user: "alice".into(),
                login_time: 10,
                last_seen: 20,
                created_at: 10,
            },
        );
        state.channels.insert("general".into());
        state.channels.insert("random".into());
        state.messages.push(ChatMessage {
            src: "bob".into(),
            dst: "alice".into(),
            message: "hey".into(),
            timestamp: 30,
            clock: 4,
        });
        state.publications.push(Publication {
            user: "alice".into(),
            channel: "general".into(),
            message: "hello all".into(),
            timestamp: 40,
            clock: 7,
        });
        state
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotStore::new(dir.path());
        let state = sample_state();

        snapshots.save(&state).await.unwrap();
        let restored = SnapshotStore::new(dir.path()).load().await.unwrap();

        assert_eq!(restored, state);
        assert!(!dir.path().join("users.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_users_document_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        SnapshotStore::new(dir.path()).save(&sample_state()).await.unwrap();

        let body = std::fs::read_to_string(dir.path().join("users.json")).unwrap();
        assert!(body.contains("\"loginTime\""));
        assert!(body.contains("\"lastSeen\""));
    }

    #[tokio::test]
    async fn test_missing_documents_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = SnapshotStore::new(dir.path().join("missing")).load().await.unwrap();

        assert_eq!(state, ChatState::default());
    }

    #[tokio::test]
    async fn test_corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("channels.json"), b"{not json").unwrap();

        assert!(SnapshotStore::new(dir.path()).load().await.is_err());
    }

    #[tokio::test]
    async fn test_persister_flushes_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::new(
            Arc::new(LogicalClock::new()),
            Arc::new(RecordingBroadcaster::default()),
        ));
        let persister = Arc::new(Persister::new(
            SnapshotStore::new(dir.path()),
            Arc::clone(&store),
            PersistenceConfig {
                autosave_interval: Duration::from_secs(3600),
                debounce: Duration::from_secs(3600),
                ..Default::default()
            },
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&persister).run(shutdown_rx));

        store.create_channel("general", 1).await.unwrap();
        persister.request_flush();
        assert!(persister.is_dirty());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        let restored = SnapshotStore::new(dir.path()).load().await.unwrap();
        assert!(restored.channels.contains("general"));
        assert!(!persister.is_dirty());
    }

    #[tokio::test]
    async fn test_disabled_persister_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::new(
            Arc::new(LogicalClock::new()),
            Arc::new(RecordingBroadcaster::default()),
        ));
        let persister = Persister::new(
            SnapshotStore::new(dir.path()),
            store,
            PersistenceConfig {
                enabled: false,
                ..Default::default()
            },
        );

        persister.request_flush();
        persister.flush().await.unwrap();

        assert!(!persister.is_dirty());
        assert!(!dir.path().join("users.json").exists());
    }
}
