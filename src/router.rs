//! Request Router
//!
//! Single dispatch point for client requests. Mutating requests run
//! observe, apply, replicate, persist, reply in that order; reads reply
//! straight from the store.

use std::sync::Arc;

use crate::clock::{ClockSynchronizer, LogicalClock, PhysicalClock};
use crate::network::RequestHandler;
use crate::replication::{
    Envelope, OpKind, Operation, Payload, ReplicationCoordinator, RequestKind, Status,
};
use crate::state::{Persister, StateStore};
use crate::error::{Error, Result};

/// Client request handler
pub struct RequestRouter {
    store: Arc<StateStore>,
    replication: Arc<ReplicationCoordinator>,
    persister: Arc<Persister>,
    sync: Arc<ClockSynchronizer>,
    clock: Arc<LogicalClock>,
    physical: Arc<PhysicalClock>,
}

impl RequestRouter {
    pub fn new(
        store: Arc<StateStore>,
        replication: Arc<ReplicationCoordinator>,
        persister: Arc<Persister>,
        sync: Arc<ClockSynchronizer>,
        clock: Arc<LogicalClock>,
        physical: Arc<PhysicalClock>,
    ) -> Self {
        Self {
            store,
            replication,
            persister,
            sync,
            clock,
            physical,
        }
    }

    /// Dispatch one request. Only unexpected failures return `Err`;
    /// validation problems become `erro` replies.
    pub async fn route(&self, request: &Envelope) -> Result<Envelope> {
        self.clock.observe(request.data.clock);

        let result = match RequestKind::parse(&request.service) {
            Some(kind) => self.dispatch(kind, request).await,
            None => Err(Error::ServiceNotFound(request.service.clone())),
        };
        self.sync.record_request();

        match result {
            Ok(data) => Ok(request.reply(data)),
            Err(Error::ServiceNotFound(service)) => {
                tracing::warn!("Unknown service requested: {}", service);
                Ok(request.reply(Payload::error(self.clock.tick(), "Service not found")))
            }
            Err(e) if e.is_validation() => {
                tracing::debug!("Rejected {}: {}", request.service, e);
                Ok(request.reply(Payload::error(self.clock.tick(), e.to_string())))
            }
            Err(e) => Err(e),
        }
    }

    async fn dispatch(&self, kind: RequestKind, request: &Envelope) -> Result<Payload> {
        match kind {
            RequestKind::Login => self.mutate(OpKind::Login, request).await,
            RequestKind::Channel => self.mutate(OpKind::Channel, request).await,
            RequestKind::Publish => self.mutate(OpKind::Publish, request).await,
            RequestKind::Message => self.mutate(OpKind::Message, request).await,
            RequestKind::Users => {
                let users = self.store.list_users().await;
                let mut data = Payload::ok(self.clock.tick());
                data.users = Some(users);
                Ok(data)
            }
            RequestKind::Channels => {
                let channels = self.store.list_channels().await;
                let mut data = Payload::ok(self.clock.tick());
                data.channels = Some(channels);
                Ok(data)
            }
            RequestKind::Clock => {
                let mut data = Payload::ok(self.clock.tick());
                data.time = Some(self.physical.now_ms());
                Ok(data)
            }
            RequestKind::Election => {
                let mut data = Payload::ok(self.clock.tick());
                data.election = Some(Status::Ok.to_string());
                Ok(data)
            }
        }
    }

    async fn mutate(&self, kind: OpKind, request: &Envelope) -> Result<Payload> {
        let op = Operation::from_payload(kind, &request.data);
        self.store.apply(&op).await?;

        let replicated = self.replication.replicate(&op).await;
        // Applied locally either way, so always persisted
        self.persister.request_flush();
        replicated?;

        Ok(Payload::ok(self.clock.tick()))
    }
}

#[async_trait::async_trait]
impl RequestHandler for RequestRouter {
    async fn handle(&self, request: Envelope) -> Result<Envelope> {
        self.route(&request).await
    }

    fn clock(&self) -> &LogicalClock {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use crate::clock::ClockSyncConfig;
    use crate::membership::{MembershipDirectory, Peer};
    use crate::network::PeerTransport;
    use crate::replication::{ReplicationConfig, ReplicationMode};
    use crate::state::{PersistenceConfig, RecordingBroadcaster, SnapshotStore};

    /// Backups that acknowledge unless listed as timing out
    struct Backups {
        timing_out: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl PeerTransport for Backups {
        async fn request(&self, target: &str, request: Envelope, timeout: Duration) -> Result<Envelope> {
            self.calls.lock().unwrap().push(format!("{}:{}", target, request.service));
            if self.timing_out.iter().any(|t| *t == target) {
                tokio::time::sleep(timeout).await;
                return Err(Error::ConnectionTimeout(target.to_string()));
            }
            Ok(request.reply(Payload::ok(request.data.clock + 1)))
        }
    }

    struct Fixture {
        router: RequestRouter,
        store: Arc<StateStore>,
        persister: Arc<Persister>,
        backups: Arc<Backups>,
        broadcaster: Arc<RecordingBroadcaster>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(primary: bool, timing_out: &[&'static str], mode: ReplicationMode) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(LogicalClock::new());
        let physical = Arc::new(PhysicalClock::new());
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let store = Arc::new(StateStore::new(Arc::clone(&clock), broadcaster.clone()));

        let directory = Arc::new(MembershipDirectory::new("A"));
        if primary {
            directory.identity().assign_rank(1).unwrap();
        } else {
            directory.identity().assign_rank(5).unwrap();
        }
        directory.refresh(&[Peer::new("B", 2), Peer::new("C", 3)]).await;

        let backups = Arc::new(Backups {
            timing_out: timing_out.to_vec(),
            calls: Mutex::new(Vec::new()),
        });
        let replication = Arc::new(ReplicationCoordinator::new(
            Arc::clone(&directory),
            backups.clone(),
            Arc::clone(&clock),
            ReplicationConfig {
                mode,
                min_acks: 1,
                timeout: Duration::from_millis(50),
            },
        ));
        let persister = Arc::new(Persister::new(
            SnapshotStore::new(dir.path()),
            Arc::clone(&store),
            PersistenceConfig::default(),
        ));
        let sync = Arc::new(ClockSynchronizer::new(
            directory,
            backups.clone(),
            Arc::clone(&clock),
            Arc::clone(&physical),
            ClockSyncConfig {
                enabled: false,
                ..Default::default()
            },
        ));

        Fixture {
            router: RequestRouter::new(
                Arc::clone(&store),
                replication,
                Arc::clone(&persister),
                sync,
                clock,
                physical,
            ),
            store,
            persister,
            backups,
            broadcaster,
            _dir: dir,
        }
    }

    fn request(service: &str, fill: impl FnOnce(&mut Payload)) -> Envelope {
        let mut data = Payload::stamped(1);
        fill(&mut data);
        Envelope::new(service, data)
    }

    #[tokio::test]
    async fn test_primary_applies_replicates_and_persists() {
        let f = fixture(true, &[], ReplicationMode::Synchronous).await;

        let reply = f
            .router
            .route(&request("channel", |d| d.channel = Some("general".into())))
            .await
            .unwrap();

        assert!(reply.is_ok());
        assert_eq!(f.store.list_channels().await, vec!["general".to_string()]);
        assert!(f.persister.is_dirty());
        let calls = f.backups.calls.lock().unwrap();
        assert_eq!(*calls, vec!["B:replicate_channel", "C:replicate_channel"]);
    }

    #[tokio::test]
    async fn test_half_acknowledged_replication_still_succeeds() {
        let f = fixture(true, &["C"], ReplicationMode::Synchronous).await;

        let reply = f
            .router
            .route(&request("channel", |d| d.channel = Some("general".into())))
            .await
            .unwrap();

        assert!(reply.is_ok());
        assert_eq!(f.store.list_channels().await, vec!["general".to_string()]);
        let calls = f.backups.calls.lock().unwrap();
        assert_eq!(*calls, vec!["B:replicate_channel", "C:replicate_channel"]);
    }

    #[tokio::test]
    async fn test_unreachable_backups_do_not_fail_request() {
        let f = fixture(true, &["B", "C"], ReplicationMode::Synchronous).await;

        let reply = f
            .router
            .route(&request("login", |d| d.user = Some("alice".into())))
            .await
            .unwrap();

        assert!(reply.is_ok());
        assert_eq!(f.store.list_users().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_quorum_failure_is_reported_but_state_kept() {
        let f = fixture(true, &["B", "C"], ReplicationMode::Quorum).await;

        let reply = f
            .router
            .route(&request("channel", |d| d.channel = Some("general".into())))
            .await
            .unwrap();

        assert!(reply.is_error());
        assert_eq!(f.store.counts().await.channels, 1);
        assert!(f.persister.is_dirty());
    }

    #[tokio::test]
    async fn test_backup_serves_clients_without_replicating() {
        let f = fixture(false, &[], ReplicationMode::Synchronous).await;

        let reply = f
            .router
            .route(&request("login", |d| d.user = Some("bob".into())))
            .await
            .unwrap();

        assert!(reply.is_ok());
        assert!(f.backups.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_errors_become_error_replies() {
        let f = fixture(true, &[], ReplicationMode::Synchronous).await;

        let reply = f
            .router
            .route(&request("publish", |d| {
                d.user = Some("alice".into());
                d.channel = Some("nope".into());
                d.message = Some("hi".into());
            }))
            .await
            .unwrap();

        assert!(reply.is_error());
        assert_eq!(reply.data.description.as_deref(), Some("Channel does not exist"));
        assert_eq!(f.store.counts().await.publications, 0);
        assert!(f.broadcaster.sent.lock().unwrap().is_empty());
        assert!(f.backups.calls.lock().unwrap().is_empty());
        assert!(!f.persister.is_dirty());
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let f = fixture(true, &[], ReplicationMode::Synchronous).await;

        let reply = f.router.route(&request("teleport", |_| {})).await.unwrap();

        assert_eq!(reply.service, "teleport");
        assert!(reply.is_error());
        assert_eq!(reply.data.description.as_deref(), Some("Service not found"));
    }

    #[tokio::test]
    async fn test_reads_and_probes() {
        let f = fixture(true, &[], ReplicationMode::Synchronous).await;
        f.router
            .route(&request("login", |d| d.user = Some("alice".into())))
            .await
            .unwrap();
        f.router
            .route(&request("channel", |d| d.channel = Some("general".into())))
            .await
            .unwrap();

        let users = f.router.route(&request("users", |_| {})).await.unwrap();
        assert_eq!(users.data.users, Some(vec!["alice".to_string()]));

        let channels = f.router.route(&request("channels", |_| {})).await.unwrap();
        assert_eq!(channels.data.channels, Some(vec!["general".to_string()]));

        let clock = f.router.route(&request("clock", |_| {})).await.unwrap();
        assert!(clock.data.time.is_some());

        let election = f.router.route(&request("election", |_| {})).await.unwrap();
        assert_eq!(election.data.election.as_deref(), Some("OK"));
    }

    #[tokio::test]
    async fn test_reply_clock_exceeds_request_clock() {
        let f = fixture(false, &[], ReplicationMode::Synchronous).await;

        let mut envelope = request("users", |_| {});
        envelope.data.clock = 500;
        let reply = f.router.route(&envelope).await.unwrap();

        assert!(reply.data.clock > 500);
    }
}
