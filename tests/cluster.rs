//! End-to-end tests: a primary and a backup talking over loopback TCP
//! with an in-process rank authority.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use wolfchat::clock::{ClockSyncConfig, ClockSynchronizer, LogicalClock, PhysicalClock};
use wolfchat::membership::{MembershipClient, MembershipConfig, MembershipDirectory, Peer};
use wolfchat::network::{RequestHandler, RpcClient, RpcServer, Subscription, TopicBroadcaster};
use wolfchat::replication::{
    Envelope, Payload, PeerHandler, ReplicationConfig, ReplicationCoordinator,
};
use wolfchat::router::RequestRouter;
use wolfchat::state::{PersistenceConfig, Persister, SnapshotStore, StateStore};
use wolfchat::Result;

const TIMEOUT: Duration = Duration::from_secs(2);

/// Rank authority handing out increasing ranks
struct Authority {
    clock: LogicalClock,
    nodes: Mutex<Vec<Peer>>,
}

#[async_trait::async_trait]
impl RequestHandler for Authority {
    async fn handle(&self, request: Envelope) -> Result<Envelope> {
        self.clock.observe(request.data.clock);
        let mut data = Payload::ok(self.clock.tick());

        match request.service.as_str() {
            "rank" => {
                let name = request.data.user.clone().unwrap_or_default();
                let mut nodes = self.nodes.lock().unwrap();
                let rank = nodes.len() as u64 + 1;
                nodes.push(Peer::new(name, rank));
                data.rank = Some(rank);
            }
            "list" => data.list = Some(self.nodes.lock().unwrap().clone()),
            "heartbeat" => {}
            _ => data = Payload::error(self.clock.tick(), "Service not found"),
        }

        Ok(request.reply(data))
    }

    fn clock(&self) -> &LogicalClock {
        &self.clock
    }
}

async fn spawn_server<H: RequestHandler>(handler: Arc<H>) -> (String, Arc<RpcServer<H>>, JoinHandle<()>) {
    let server = Arc::new(RpcServer::new("127.0.0.1:0".to_string(), handler));
    let listener = server.bind().await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let serving = Arc::clone(&server);
    let task = tokio::spawn(async move {
        serving.serve(listener).await.unwrap();
    });
    (address, server, task)
}

fn membership(
    authority: &str,
    directory: &Arc<MembershipDirectory>,
    clock: &Arc<LogicalClock>,
) -> MembershipClient {
    MembershipClient::new(
        MembershipConfig {
            authority_address: authority.to_string(),
            heartbeat_interval: Duration::from_secs(60),
            request_timeout: TIMEOUT,
        },
        Arc::new(RpcClient::new(TIMEOUT)),
        Arc::clone(directory),
        Arc::clone(clock),
    )
}

struct Backup {
    store: Arc<StateStore>,
    server: Arc<RpcServer<PeerHandler>>,
    task: JoinHandle<()>,
}

/// A backup node; its name is its replication address
async fn start_backup(authority: &str) -> Backup {
    let clock = Arc::new(LogicalClock::new());
    let broadcaster = Arc::new(TopicBroadcaster::new("127.0.0.1:0".to_string()));
    let store = Arc::new(StateStore::new(Arc::clone(&clock), broadcaster));
    let handler = Arc::new(PeerHandler::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        Arc::new(PhysicalClock::new()),
    ));

    let (address, server, task) = spawn_server(handler).await;
    let directory = Arc::new(MembershipDirectory::new(address));
    membership(authority, &directory, &clock).bootstrap().await;

    Backup { store, server, task }
}

struct Primary {
    address: String,
    pubsub: String,
    store: Arc<StateStore>,
    membership: MembershipClient,
    directory: Arc<MembershipDirectory>,
    _dir: tempfile::TempDir,
}

async fn start_primary(authority: &str) -> Primary {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(LogicalClock::new());
    let physical = Arc::new(PhysicalClock::new());
    let transport = Arc::new(RpcClient::new(TIMEOUT));
    let directory = Arc::new(MembershipDirectory::new("primary"));

    let broadcaster = Arc::new(TopicBroadcaster::new("127.0.0.1:0".to_string()));
    let listener = broadcaster.bind().await.unwrap();
    let pubsub = listener.local_addr().unwrap().to_string();
    let serving = Arc::clone(&broadcaster);
    tokio::spawn(async move { serving.serve(listener).await });

    let store = Arc::new(StateStore::new(Arc::clone(&clock), broadcaster));
    let persister = Arc::new(Persister::new(
        SnapshotStore::new(dir.path()),
        Arc::clone(&store),
        PersistenceConfig::default(),
    ));
    let replication = Arc::new(ReplicationCoordinator::new(
        Arc::clone(&directory),
        transport.clone(),
        Arc::clone(&clock),
        ReplicationConfig {
            timeout: Duration::from_millis(500),
            ..Default::default()
        },
    ));
    let sync = Arc::new(ClockSynchronizer::new(
        Arc::clone(&directory),
        transport,
        Arc::clone(&clock),
        Arc::clone(&physical),
        ClockSyncConfig {
            enabled: false,
            ..Default::default()
        },
    ));
    let router = Arc::new(RequestRouter::new(
        Arc::clone(&store),
        replication,
        persister,
        sync,
        Arc::clone(&clock),
        physical,
    ));
    let (address, _, _) = spawn_server(router).await;

    let membership = membership(authority, &directory, &clock);
    membership.bootstrap().await;

    Primary {
        address,
        pubsub,
        store,
        membership,
        directory,
        _dir: dir,
    }
}

async fn start_authority() -> String {
    let authority = Arc::new(Authority {
        clock: LogicalClock::new(),
        nodes: Mutex::new(Vec::new()),
    });
    spawn_server(authority).await.0
}

async fn call(client: &RpcClient, address: &str, service: &str, fill: impl FnOnce(&mut Payload)) -> Envelope {
    let mut data = Payload::stamped(1);
    fill(&mut data);
    client.send(address, Envelope::new(service, data), TIMEOUT).await.unwrap()
}

#[tokio::test]
async fn test_primary_replicates_client_mutations() {
    let authority = start_authority().await;
    let primary = start_primary(&authority).await;
    let backup = start_backup(&authority).await;

    // Pick up the backup registered after the primary
    primary.membership.refresh().await.unwrap();
    let view = primary.directory.snapshot().await;
    assert!(view.is_primary());
    assert_eq!(view.backups().len(), 1);

    let client = RpcClient::new(TIMEOUT);
    for user in ["alice", "bob"] {
        let reply = call(&client, &primary.address, "login", |d| d.user = Some(user.into())).await;
        assert!(reply.is_ok());
    }
    let reply = call(&client, &primary.address, "channel", |d| d.channel = Some("general".into())).await;
    assert!(reply.is_ok());

    let mut subscription = Subscription::connect(&primary.pubsub, vec!["general".into()], TIMEOUT)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reply = call(&client, &primary.address, "publish", |d| {
        d.user = Some("alice".into());
        d.channel = Some("general".into());
        d.message = Some("hello".into());
    })
    .await;
    assert!(reply.is_ok());

    let published = tokio::time::timeout(TIMEOUT, subscription.next()).await.unwrap().unwrap();
    assert_eq!(published.topic, "general");
    assert_eq!(published.envelope.service, "publication");
    assert_eq!(published.envelope.data.message.as_deref(), Some("hello"));

    let reply = call(&client, &primary.address, "message", |d| {
        d.src = Some("alice".into());
        d.dst = Some("bob".into());
        d.message = Some("psst".into());
    })
    .await;
    assert!(reply.is_ok());

    let counts = backup.store.counts().await;
    assert_eq!(counts.users, 2);
    assert_eq!(counts.channels, 1);
    assert_eq!(counts.publications, 1);
    assert_eq!(counts.messages, 1);
    assert_eq!(counts, primary.store.counts().await);
}

#[tokio::test]
async fn test_rejected_requests_are_not_replicated() {
    let authority = start_authority().await;
    let primary = start_primary(&authority).await;
    let backup = start_backup(&authority).await;
    primary.membership.refresh().await.unwrap();

    let client = RpcClient::new(TIMEOUT);
    call(&client, &primary.address, "channel", |d| d.channel = Some("general".into())).await;
    let duplicate = call(&client, &primary.address, "channel", |d| d.channel = Some("general".into())).await;
    let ghost = call(&client, &primary.address, "message", |d| {
        d.src = Some("alice".into());
        d.dst = Some("ghost".into());
        d.message = Some("boo".into());
    })
    .await;
    let unknown = call(&client, &primary.address, "teleport", |_| {}).await;

    assert!(duplicate.is_error());
    assert!(ghost.is_error());
    assert_eq!(unknown.data.description.as_deref(), Some("Service not found"));

    let counts = backup.store.counts().await;
    assert_eq!(counts.channels, 1);
    assert_eq!(counts.messages, 0);
}

#[tokio::test]
async fn test_backup_outage_does_not_fail_clients() {
    let authority = start_authority().await;
    let primary = start_primary(&authority).await;
    let backup = start_backup(&authority).await;
    primary.membership.refresh().await.unwrap();

    backup.server.stop();
    backup.task.await.unwrap();

    let client = RpcClient::new(TIMEOUT);
    let mut request = Payload::stamped(900);
    request.user = Some("carol".into());
    let reply = client
        .send(&primary.address, Envelope::new("login", request), TIMEOUT)
        .await
        .unwrap();

    assert!(reply.is_ok());
    assert!(reply.data.clock > 900);
    assert_eq!(primary.store.list_users().await, vec!["carol".to_string()]);
    assert_eq!(backup.store.counts().await.users, 0);
}
