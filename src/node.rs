//! Chat Node
//!
//! Wires the components of one node together and runs them until a
//! shutdown signal arrives. Only startup failures (bad snapshot, an
//! endpoint that cannot be bound) end [`ChatNode::run`] with an error.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

use crate::api::{AppState, HttpServer};
use crate::clock::{ClockSynchronizer, LogicalClock, PhysicalClock};
use crate::config::WolfChatConfig;
use crate::membership::{MembershipClient, MembershipDirectory};
use crate::network::{PeerTransport, RpcClient, RpcServer, TopicBroadcaster};
use crate::replication::{PeerHandler, ReplicationCoordinator};
use crate::router::RequestRouter;
use crate::state::{ChatState, Persister, SnapshotStore, StateStore};
use crate::error::Result;

/// A fully wired node, ready to run
pub struct ChatNode {
    name: String,
    directory: Arc<MembershipDirectory>,
    store: Arc<StateStore>,
    persister: Arc<Persister>,
    sync: Arc<ClockSynchronizer>,
    membership: Arc<MembershipClient>,
    broadcaster: Arc<TopicBroadcaster>,
    client_server: Arc<RpcServer<RequestRouter>>,
    peer_server: Arc<RpcServer<PeerHandler>>,
    http: Option<Arc<HttpServer>>,
}

impl ChatNode {
    /// Build a node from configuration, loading the persisted snapshot
    pub async fn build(config: &WolfChatConfig) -> Result<Self> {
        let name = config.node.name.clone();
        tracing::info!("Building node '{}'", name);

        let logical = Arc::new(LogicalClock::new());
        let physical = Arc::new(PhysicalClock::new());
        let transport: Arc<dyn PeerTransport> = Arc::new(
            RpcClient::new(config.replication().timeout).with_default_port(config.node.replication_port),
        );
        let directory = Arc::new(MembershipDirectory::new(name.clone()));
        let broadcaster = Arc::new(TopicBroadcaster::new(config.pubsub.bind_address.clone()));

        let snapshots = SnapshotStore::new(config.data_dir());
        let state = if config.persistence.enabled {
            snapshots.load().await?
        } else {
            ChatState::default()
        };
        let store = Arc::new(StateStore::with_state(state, Arc::clone(&logical), broadcaster.clone()));
        let persister = Arc::new(Persister::new(snapshots, Arc::clone(&store), config.persistence()));

        let replication = Arc::new(ReplicationCoordinator::new(
            Arc::clone(&directory),
            Arc::clone(&transport),
            Arc::clone(&logical),
            config.replication(),
        ));
        let sync = Arc::new(ClockSynchronizer::new(
            Arc::clone(&directory),
            Arc::clone(&transport),
            Arc::clone(&logical),
            Arc::clone(&physical),
            config.clock_sync(),
        ));
        let membership = Arc::new(MembershipClient::new(
            config.membership(),
            Arc::clone(&transport),
            Arc::clone(&directory),
            Arc::clone(&logical),
        ));

        let router = Arc::new(RequestRouter::new(
            Arc::clone(&store),
            replication,
            Arc::clone(&persister),
            Arc::clone(&sync),
            Arc::clone(&logical),
            Arc::clone(&physical),
        ));
        let client_server = Arc::new(RpcServer::new(config.node.bind_address.clone(), router));

        let flush_target = Arc::clone(&persister);
        let peer_handler = Arc::new(
            PeerHandler::new(Arc::clone(&store), Arc::clone(&logical), Arc::clone(&physical))
                .on_applied(move || flush_target.request_flush()),
        );
        let peer_server = Arc::new(RpcServer::new(config.replication_bind_address(), peer_handler));

        let http = config.api.enabled.then(|| {
            Arc::new(HttpServer::new(
                config.api.clone(),
                AppState {
                    directory: Arc::clone(&directory),
                    store: Arc::clone(&store),
                    clock: Arc::clone(&logical),
                    physical: Arc::clone(&physical),
                    sync: Arc::clone(&sync),
                    replication_mode: config.replication.mode,
                },
            ))
        });

        Ok(Self {
            name,
            directory,
            store,
            persister,
            sync,
            membership,
            broadcaster,
            client_server,
            peer_server,
            http,
        })
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Membership directory of this node
    pub fn directory(&self) -> &Arc<MembershipDirectory> {
        &self.directory
    }

    /// State store of this node
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Bind every endpoint, register with the rank authority and serve
    /// until `shutdown_signal` completes. A final snapshot is written on
    /// the way out.
    pub async fn run(self, shutdown_signal: impl Future<Output = ()>) -> Result<()> {
        let client_listener = self.client_server.bind().await?;
        let peer_listener = self.peer_server.bind().await?;
        let pubsub_listener = self.broadcaster.bind().await?;
        let api_listener = match &self.http {
            Some(http) => Some(http.bind().await?),
            None => None,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let server = Arc::clone(&self.client_server);
        tokio::spawn(async move {
            if let Err(e) = server.serve(client_listener).await {
                tracing::error!("Request server failed: {}", e);
            }
        });
        let server = Arc::clone(&self.peer_server);
        tokio::spawn(async move {
            if let Err(e) = server.serve(peer_listener).await {
                tracing::error!("Replication server failed: {}", e);
            }
        });
        let broadcaster = Arc::clone(&self.broadcaster);
        tokio::spawn(async move {
            if let Err(e) = broadcaster.serve(pubsub_listener).await {
                tracing::error!("Broadcaster failed: {}", e);
            }
        });
        if let (Some(http), Some(listener)) = (self.http.clone(), api_listener) {
            let rx = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = http.serve(listener, rx).await {
                    tracing::error!("HTTP API failed: {}", e);
                }
            });
        }

        self.membership.bootstrap().await;

        tokio::spawn(Arc::clone(&self.membership).run(shutdown_rx.clone()));
        tokio::spawn(Arc::clone(&self.sync).run(shutdown_rx.clone()));
        let persister_task = tokio::spawn(Arc::clone(&self.persister).run(shutdown_rx));

        tracing::info!("Node '{}' running ({})", self.name, self.store.counts().await);

        shutdown_signal.await;
        tracing::info!("Shutting down node '{}'", self.name);

        let _ = shutdown_tx.send(true);
        self.client_server.stop();
        self.peer_server.stop();
        self.broadcaster.stop();

        if let Err(e) = persister_task.await {
            tracing::error!("Persister task failed: {}", e);
        }

        tracing::info!("Node '{}' stopped", self.name);
        Ok(())
    }
}
