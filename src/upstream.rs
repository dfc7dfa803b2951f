//! Forwarding to upstream recursive resolvers.
//!
//! Servers are tried in order; a full pass over the list is one attempt, and
//! back-off sleeps happen between attempts, not between servers, so the first
//! pass is fast. NOERROR and NXDOMAIN are final answers; any other rcode is
//! treated as a server failure and the next server is tried.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::dns::{Message, ProtoError, Question, Rcode, MAX_PACKET_SIZE};

/// Upstream resolution failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("i/o error talking to {server}: {source}")]
    Io {
        server: SocketAddr,
        source: std::io::Error,
    },
    #[error("timed out waiting for {server}")]
    Timeout { server: SocketAddr },
    #[error("bad response from {server}: {source}")]
    Proto {
        server: SocketAddr,
        source: ProtoError,
    },
    #[error("response id mismatch from {server}")]
    IdMismatch { server: SocketAddr },
    #[error("{server} answered {rcode}")]
    ErrorRcode { server: SocketAddr, rcode: Rcode },
    #[error("all upstream servers failed")]
    AllServersFailed,
}

/// The upstream resolution seam the request handler consumes.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn resolve(&self, question: &Question) -> Result<Message, ResolveError>;
}

/// Retrying multi-server UDP forwarder.
pub struct UpstreamResolver {
    servers: RwLock<Vec<SocketAddr>>,
    timeout: Duration,
    retries: u32,
}

impl UpstreamResolver {
    pub fn new(servers: Vec<SocketAddr>, timeout: Duration, retries: u32) -> Self {
        Self {
            servers: RwLock::new(servers),
            timeout,
            retries,
        }
    }

    pub fn servers(&self) -> Vec<SocketAddr> {
        self.servers.read().clone()
    }

    /// Replaces the server list. An empty list is ignored.
    pub fn set_servers(&self, servers: Vec<SocketAddr>) {
        if servers.is_empty() {
            return;
        }
        *self.servers.write() = servers;
    }

    /// One query/response exchange over a fresh ephemeral socket.
    async fn exchange(&self, query: &[u8], server: SocketAddr) -> Result<Message, ResolveError> {
        let bind_addr = if server.is_ipv4() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        };
        let io_err = |source| ResolveError::Io { server, source };

        let socket = UdpSocket::bind(bind_addr).await.map_err(io_err)?;
        socket.connect(server).await.map_err(io_err)?;
        socket.send(query).await.map_err(io_err)?;

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let len = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ResolveError::Timeout { server })?
            .map_err(io_err)?;

        Message::from_wire(&buf[..len]).map_err(|source| ResolveError::Proto { server, source })
    }
}

#[async_trait]
impl Forwarder for UpstreamResolver {
    async fn resolve(&self, question: &Question) -> Result<Message, ResolveError> {
        let query = Message::query(rand::random(), question.clone());
        let wire = query.to_wire();
        let servers = self.servers();

        let mut last_error: Option<ResolveError> = None;

        for attempt in 0..=self.retries {
            for &server in &servers {
                match self.exchange(&wire, server).await {
                    Ok(response) => {
                        if response.id() != query.id() {
                            last_error = Some(ResolveError::IdMismatch { server });
                            continue;
                        }
                        match response.rcode() {
                            Rcode::NoError | Rcode::NxDomain => {
                                debug!(
                                    server = %server,
                                    question = %question.name,
                                    qtype = %question.rtype,
                                    rcode = %response.rcode(),
                                    "upstream query answered"
                                );
                                return Ok(response);
                            }
                            rcode => {
                                last_error = Some(ResolveError::ErrorRcode { server, rcode });
                            }
                        }
                    }
                    Err(error) => {
                        debug!(
                            server = %server,
                            attempt = attempt + 1,
                            error = %error,
                            "upstream query failed"
                        );
                        last_error = Some(error);
                    }
                }
            }

            if attempt < self.retries {
                tokio::time::sleep(Duration::from_millis(100) * (attempt + 1)).await;
            }
        }

        Err(last_error.unwrap_or(ResolveError::AllServersFailed))
    }
}
