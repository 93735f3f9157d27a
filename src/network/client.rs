//! Network Client
//!
//! Request-reply client. Every call opens its own connection, and both the
//! connect and the full exchange are bounded by timeouts.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{read_envelope, write_envelope};
use crate::replication::{Envelope, INTERNAL_ERROR};
use crate::error::{Error, Result};

/// Anything that can deliver a request to a named target and return its reply.
///
/// Implementations must give up once `timeout` has elapsed.
#[async_trait::async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send a request to `target` and wait for the correlated reply
    async fn request(&self, target: &str, request: Envelope, timeout: Duration) -> Result<Envelope>;
}

/// TCP request-reply client
#[derive(Debug, Clone)]
pub struct RpcClient {
    /// Connection timeout
    connect_timeout: Duration,
    /// Port appended to targets given as bare host names
    default_port: Option<u16>,
}

impl RpcClient {
    /// Create a new client
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            default_port: None,
        }
    }

    /// Resolve bare host names (peer names) to `host:port`
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = Some(port);
        self
    }

    /// Turn a target into a connectable address
    pub fn resolve(&self, target: &str) -> String {
        match self.default_port {
            Some(port) if !target.contains(':') => format!("{}:{}", target, port),
            _ => target.to_string(),
        }
    }

    /// Send a request and wait for its reply, giving up after `timeout_duration`
    pub async fn send(
        &self,
        target: &str,
        request: Envelope,
        timeout_duration: Duration,
    ) -> Result<Envelope> {
        let address = self.resolve(target);
        let result = timeout(timeout_duration, self.send_inner(&address, &request)).await;

        match result {
            Ok(inner_result) => inner_result,
            Err(_) => Err(Error::ConnectionTimeout(address)),
        }
    }

    /// Send without timeout wrapper
    async fn send_inner(&self, address: &str, request: &Envelope) -> Result<Envelope> {
        let stream = self.connect(address).await?;
        let (mut reader, mut writer) = stream.into_split();

        write_envelope(&mut writer, request).await?;
        let response = read_envelope(&mut reader).await?;

        if response.id != request.id {
            if response.id.is_nil() {
                let description = response.data.description.as_deref().unwrap_or(INTERNAL_ERROR);
                return Err(Error::Network(format!(
                    "{} could not process {}: {}",
                    address, request.service, description
                )));
            }
            return Err(Error::Network(format!(
                "Reply from {} does not match request {}",
                address, request.id
            )));
        }

        Ok(response)
    }

    /// Connect to an address
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let result = timeout(self.connect_timeout, TcpStream::connect(address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl PeerTransport for RpcClient {
    async fn request(&self, target: &str, request: Envelope, timeout: Duration) -> Result<Envelope> {
        self.send(target, request, timeout).await
    }
}
