//! Topic Broadcaster
//!
//! Outbound publish-subscribe channel. Subscribers connect, send one
//! `subscribe` envelope listing their topics, then receive every
//! [`Published`] frame whose topic matches. Publishing never waits on
//! subscribers; slow ones lose the oldest frames.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use super::{read_envelope, read_frame, write_envelope, write_frame};
use crate::replication::{Envelope, Payload};
use crate::error::{Error, Result};

/// Service tag of the subscription request
pub const SUBSCRIBE_SERVICE: &str = "subscribe";

/// Frames buffered per subscriber before it starts lagging
const CHANNEL_CAPACITY: usize = 1024;

/// Sink for topic broadcasts
pub trait Broadcaster: Send + Sync {
    /// Broadcast an envelope to every subscriber of `topic`
    fn broadcast(&self, topic: &str, envelope: Envelope);
}

/// A broadcast frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Published {
    pub topic: String,
    pub envelope: Envelope,
}

/// TCP topic broadcaster
pub struct TopicBroadcaster {
    /// Bind address for subscribers
    bind_address: String,
    /// Fan-out channel
    sender: broadcast::Sender<Arc<Published>>,
    /// Shutdown signal
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl TopicBroadcaster {
    /// Create a new broadcaster
    pub fn new(bind_address: String) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);

        Self {
            bind_address,
            sender,
            shutdown: shutdown_tx,
        }
    }

    /// Bind the subscriber listener
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.bind_address).await.map_err(|e| Error::ConnectionFailed {
            address: self.bind_address.clone(),
            reason: format!("bind failed: {}", e),
        })
    }

    /// Accept subscribers until stopped
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("Broadcaster listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let receiver = self.sender.subscribe();
                            let peer_addr = addr.to_string();
                            tokio::spawn(async move {
                                if let Err(e) = serve_subscriber(socket, receiver).await {
                                    tracing::debug!("Subscriber {} disconnected: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => tracing::error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Stop accepting subscribers
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Number of connected subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Broadcaster for TopicBroadcaster {
    fn broadcast(&self, topic: &str, envelope: Envelope) {
        tracing::trace!("Broadcasting {} on topic '{}'", envelope.service, topic);
        // No subscribers is not an error
        let _ = self.sender.send(Arc::new(Published {
            topic: topic.to_string(),
            envelope,
        }));
    }
}

/// Stream matching frames to one subscriber
async fn serve_subscriber(
    socket: TcpStream,
    mut receiver: broadcast::Receiver<Arc<Published>>,
) -> Result<()> {
    let (mut reader, mut writer) = socket.into_split();

    let request = read_envelope(&mut reader).await?;
    if request.service != SUBSCRIBE_SERVICE {
        return Err(Error::Network(format!("expected subscribe, got {}", request.service)));
    }
    let topics: HashSet<String> = request.data.topics.clone().unwrap_or_default().into_iter().collect();
    tracing::debug!("Subscriber registered for {} topics", topics.len());

    loop {
        match receiver.recv().await {
            Ok(published) if topics.contains(&published.topic) => {
                let body = bincode::serialize(published.as_ref())?;
                write_frame(&mut writer, &body).await?;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Subscriber lagging, skipped {} broadcasts", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    Ok(())
}

/// Client side of a subscription
pub struct Subscription {
    stream: TcpStream,
}

impl Subscription {
    /// Connect to a broadcaster and subscribe to the given topics
    pub async fn connect(address: &str, topics: Vec<String>, connect_timeout: Duration) -> Result<Self> {
        let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::ConnectionTimeout(address.to_string()))??;

        let mut payload = Payload::stamped(0);
        payload.topics = Some(topics);
        write_envelope(&mut stream, &Envelope::new(SUBSCRIBE_SERVICE, payload)).await?;

        Ok(Self { stream })
    }

    /// Wait for the next matching broadcast
    pub async fn next(&mut self) -> Result<Published> {
        let body = read_frame(&mut self.stream).await?;
        Ok(bincode::deserialize(&body)?)
    }
}
