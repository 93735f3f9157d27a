//! Rank Authority Client
//!
//! Registers this node with the external rank authority, keeps it
//! visible with heartbeats and feeds the authority's list into the
//! [`MembershipDirectory`]. Failures are logged; the previous view stays
//! in effect until the next successful refresh.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::{MembershipDirectory, MembershipView, Peer};
use crate::clock::LogicalClock;
use crate::network::PeerTransport;
use crate::replication::{required, AuthorityKind, Envelope, Payload};
use crate::error::{Error, Result};

/// Rank authority settings
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    /// Authority address (host:port)
    pub authority_address: String,
    /// Interval between heartbeat/list cycles
    pub heartbeat_interval: Duration,
    /// Timeout for each authority exchange
    pub request_timeout: Duration,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            authority_address: "reference:5559".to_string(),
            heartbeat_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Client for the rank authority
pub struct MembershipClient {
    config: MembershipConfig,
    transport: Arc<dyn PeerTransport>,
    directory: Arc<MembershipDirectory>,
    clock: Arc<LogicalClock>,
}

impl MembershipClient {
    /// Create a new client
    pub fn new(
        config: MembershipConfig,
        transport: Arc<dyn PeerTransport>,
        directory: Arc<MembershipDirectory>,
        clock: Arc<LogicalClock>,
    ) -> Self {
        Self {
            config,
            transport,
            directory,
            clock,
        }
    }

    /// One request/reply exchange with the authority
    async fn exchange(&self, kind: AuthorityKind, mut payload: Payload) -> Result<Envelope> {
        payload.clock = self.clock.tick();
        let request = Envelope::new(kind.as_str(), payload);

        let reply = self
            .transport
            .request(&self.config.authority_address, request, self.config.request_timeout)
            .await?;
        self.clock.observe(reply.data.clock);

        if reply.is_error() {
            return Err(Error::Authority(
                reply.data.description.unwrap_or_else(|| format!("{} rejected", kind.as_str())),
            ));
        }
        if reply.service != kind.as_str() {
            return Err(Error::Authority(format!(
                "expected {} reply, got {}",
                kind.as_str(),
                reply.service
            )));
        }

        Ok(reply)
    }

    /// Register this node and record the assigned rank
    pub async fn register(&self) -> Result<u64> {
        let mut payload = Payload::stamped(0);
        payload.user = Some(self.directory.name().to_string());

        let reply = self.exchange(AuthorityKind::Rank, payload).await?;
        let rank = required(&reply.data.rank, "rank", "rank")?;
        self.directory.identity().assign_rank(rank)?;

        tracing::info!("Node '{}' registered with rank {}", self.directory.name(), rank);
        Ok(rank)
    }

    /// Fetch the authority's current node list
    pub async fn fetch_list(&self) -> Result<Vec<Peer>> {
        let reply = self.exchange(AuthorityKind::List, Payload::stamped(0)).await?;
        required(&reply.data.list, "list", "list")
    }

    /// Tell the authority this node is alive
    pub async fn heartbeat(&self) -> Result<()> {
        let mut payload = Payload::stamped(0);
        payload.user = Some(self.directory.name().to_string());

        self.exchange(AuthorityKind::Heartbeat, payload).await?;
        tracing::trace!("Heartbeat acknowledged by rank authority");
        Ok(())
    }

    /// Fetch the list and refresh the directory
    pub async fn refresh(&self) -> Result<Arc<MembershipView>> {
        let peers = self.fetch_list().await?;
        Ok(self.directory.refresh(&peers).await)
    }

    /// Startup sequence: register, then load the first view
    pub async fn bootstrap(&self) {
        if let Err(e) = self.register().await {
            if e.is_retryable() {
                tracing::warn!("Rank authority unreachable, retrying next cycle: {}", e);
            } else {
                tracing::error!("Registration with rank authority failed: {}", e);
            }
            return;
        }
        if let Err(e) = self.refresh().await {
            tracing::warn!("Initial membership refresh failed: {}", e);
        }
    }

    /// One periodic cycle: (re-)register if needed, heartbeat, refresh
    pub async fn cycle(&self) {
        if self.directory.identity().rank().is_none() {
            if let Err(e) = self.register().await {
                tracing::warn!("Registration retry failed: {}", e);
            }
        }

        if let Err(e) = self.heartbeat().await {
            tracing::warn!("Heartbeat to rank authority failed: {}", e);
        }

        if let Err(e) = self.refresh().await {
            tracing::warn!("Membership refresh failed, keeping previous view: {}", e);
        }
    }

    /// Run heartbeat cycles until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; bootstrap already covered it
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.cycle().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Membership client stopped");
    }
}
