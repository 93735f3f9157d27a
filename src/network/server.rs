//! Network Server
//!
//! Request-reply server. Each connection strictly alternates one request
//! and one reply; every frame that is read gets exactly one reply, even
//! when it cannot be decoded or the handler fails or panics.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use futures::FutureExt;
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use super::{read_frame, write_envelope};
use crate::clock::LogicalClock;
use crate::replication::{Envelope, Payload, ERROR_SERVICE, INTERNAL_ERROR};
use crate::error::{Error, Result};

/// Handler invoked for every decoded request
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one request and build its reply
    async fn handle(&self, request: Envelope) -> Result<Envelope>;

    /// Logical clock used to stamp failure replies
    fn clock(&self) -> &LogicalClock;

    /// Generic failure reply
    fn failure(&self, id: Uuid, description: &str) -> Envelope {
        Envelope {
            id,
            service: ERROR_SERVICE.to_string(),
            data: Payload::error(self.clock().tick(), description),
        }
    }
}

/// Request-reply server
pub struct RpcServer<H: RequestHandler> {
    /// Bind address
    bind_address: String,
    /// Request handler
    handler: Arc<H>,
    /// Shutdown signal
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl<H: RequestHandler> RpcServer<H> {
    /// Create a new server
    pub fn new(bind_address: String, handler: Arc<H>) -> Self {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);

        Self {
            bind_address,
            handler,
            shutdown: shutdown_tx,
        }
    }

    /// Bind the listener. Failing here is a startup failure.
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.bind_address).await.map_err(|e| Error::ConnectionFailed {
            address: self.bind_address.clone(),
            reason: format!("bind failed: {}", e),
        })
    }

    /// Serve connections on an already bound listener until stopped
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("Request server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let handler = Arc::clone(&self.handler);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, peer_addr.clone(), handler).await {
                                    tracing::warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Request server on {} stopped", self.bind_address);
        Ok(())
    }

    /// Stop the server
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Handle a single connection
async fn handle_connection<H: RequestHandler>(
    socket: TcpStream,
    peer_addr: String,
    handler: Arc<H>,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.into_split();

    loop {
        let response = match read_frame(&mut reader).await {
            Ok(body) => respond(handler.as_ref(), &body).await,
            Err(Error::FrameCorrupted(reason)) => {
                tracing::warn!("Corrupted frame from {}: {}", peer_addr, reason);
                handler.failure(Uuid::nil(), INTERNAL_ERROR)
            }
            Err(e @ Error::FrameTooLarge { .. }) => {
                // The body cannot be skipped; answer once and drop the connection
                tracing::warn!("Rejecting request from {}: {}", peer_addr, e);
                let failure = handler.failure(Uuid::nil(), INTERNAL_ERROR);
                write_envelope(&mut writer, &failure).await?;
                break;
            }
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Connection closed
                break;
            }
            Err(e) => {
                tracing::warn!("Error reading request from {}: {}", peer_addr, e);
                break;
            }
        };

        write_envelope(&mut writer, &response).await?;
    }

    Ok(())
}

/// Decode a request body and run the handler, always producing one reply
pub(crate) async fn respond<H: RequestHandler + ?Sized>(handler: &H, body: &[u8]) -> Envelope {
    let request = match Envelope::deserialize(body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Failed to decode request: {}", e);
            return handler.failure(Uuid::nil(), INTERNAL_ERROR);
        }
    };

    let id = request.id;
    let service = request.service.clone();

    match AssertUnwindSafe(handler.handle(request)).catch_unwind().await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::error!("Error handling {}: {}", service, e);
            handler.failure(id, INTERNAL_ERROR)
        }
        Err(_) => {
            tracing::error!("Handler panicked while processing {}", service);
            handler.failure(id, INTERNAL_ERROR)
        }
    }
}
