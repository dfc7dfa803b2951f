//! UDP server lifecycle.
//!
//! One socket, one receive loop, one spawned task per datagram. Shutdown is
//! cooperative: the receive loop stops, in-flight handlers get a bounded
//! drain, the eviction sweeper is stopped and joined, and only then is the
//! cache snapshotted so the snapshot does not race eviction.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{self, LruResponseCache};
use crate::config::{Config, ConfigError};
use crate::dns::{Message, MAX_PACKET_SIZE};
use crate::handler::QueryHandler;
use crate::local::{LocalResolver, RecordTable};
use crate::stats::{Stats, StatsSnapshot};
use crate::upstream::UpstreamResolver;

/// Cache snapshot location, relative to the working directory.
pub const SNAPSHOT_FILE: &str = "dns-cache.bin";

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const READY_ATTEMPTS: usize = 10;
const READY_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The assembled resolution pipeline and its listening socket.
pub struct Server {
    config: Config,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    cache: Arc<LruResponseCache>,
    handler: Arc<QueryHandler>,
    stats: Arc<Stats>,
    snapshot_path: PathBuf,
}

impl Server {
    /// Validates the record tables, assembles the pipeline and binds the
    /// listening socket.
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        let records = RecordTable::from_config(&config.records)?;
        let cache = Arc::new(LruResponseCache::new(
            config.cache.max_entries,
            config.cache.default_ttl(),
        ));
        let upstream = Arc::new(UpstreamResolver::new(
            config.upstream.server_addrs()?,
            config.upstream.timeout(),
            config.upstream.retries,
        ));
        let stats = Arc::new(Stats::new());
        let handler = Arc::new(QueryHandler::new(
            cache.clone(),
            Arc::new(LocalResolver::new(records)),
            upstream,
            stats.clone(),
        ));

        let bind_ip: IpAddr = config
            .server
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(config.server.bind_address.clone()))?;
        let socket = Arc::new(UdpSocket::bind(SocketAddr::new(bind_ip, config.server.port)).await?);
        let local_addr = socket.local_addr()?;
        info!(address = %local_addr, "dns server listening");

        Ok(Self {
            config,
            socket,
            local_addr,
            cache,
            handler,
            stats,
            snapshot_path: PathBuf::from(SNAPSHOT_FILE),
        })
    }

    /// Overrides where the cache snapshot is read from and written to.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache(&self) -> Arc<LruResponseCache> {
        self.cache.clone()
    }

    /// Serves until `shutdown` fires. Fails early if the readiness probe
    /// never sees the socket accept traffic.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        match self.cache.load(&self.snapshot_path) {
            Ok(entries) => {
                info!(entries, path = %self.snapshot_path.display(), "cache restored from snapshot");
            }
            Err(error) => {
                debug!(error = %error, "starting with an empty cache");
            }
        }

        let sweeper = cache::spawn_sweeper(
            self.cache.clone(),
            self.config.cache.cleanup_interval(),
            shutdown.child_token(),
        );

        let receiver = tokio::spawn(receive_loop(
            self.socket.clone(),
            self.handler.clone(),
            self.config.server.write_timeout(),
            shutdown.clone(),
        ));

        self.wait_ready().await?;
        info!("dns server ready");

        shutdown.cancelled().await;
        info!("shutting down dns server");

        let _ = receiver.await;
        let _ = sweeper.await;

        let stats = self.stats.snapshot();
        info!(
            queries = stats.queries,
            cache_hits = stats.cache_hits,
            local_hits = stats.local_hits,
            forwarded = stats.forwarded,
            failures = stats.failures,
            rejected = stats.rejected,
            "query statistics"
        );

        match self.cache.dump(&self.snapshot_path) {
            Ok(entries) => {
                info!(entries, path = %self.snapshot_path.display(), "cache snapshot written");
            }
            Err(error) => {
                warn!(error = %error, "failed to write cache snapshot");
            }
        }
        Ok(())
    }

    /// Dials the bound address until it accepts, up to ten attempts 100 ms
    /// apart.
    async fn wait_ready(&self) -> io::Result<()> {
        let mut last_error = io::Error::new(io::ErrorKind::TimedOut, "readiness probe failed");
        for attempt in 0..READY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(READY_BACKOFF).await;
            }
            match probe(self.local_addr).await {
                Ok(()) => return Ok(()),
                Err(error) => last_error = error,
            }
        }
        Err(last_error)
    }
}

async fn probe(addr: SocketAddr) -> io::Result<()> {
    let bind: SocketAddr = if addr.is_ipv4() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    } else {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await?;
    Ok(())
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    handler: Arc<QueryHandler>,
    write_timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (len, client) = match result {
                    Ok(received) => received,
                    Err(error) => {
                        error!(error = %error, "udp receive failed");
                        continue;
                    }
                };
                let query = match Message::from_wire(&buf[..len]) {
                    Ok(message) => message,
                    Err(error) => {
                        debug!(client = %client, error = %error, "dropping unparseable datagram");
                        continue;
                    }
                };

                let socket = socket.clone();
                let handler = handler.clone();
                tasks.spawn(async move {
                    let reply = handler.handle(&query).await;
                    match timeout(write_timeout, socket.send_to(&reply.to_wire(), client)).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(error)) => debug!(client = %client, error = %error, "failed to send response"),
                        Err(_) => debug!(client = %client, "response write timed out"),
                    }
                });
                // Reap completed handlers without blocking the loop.
                while tasks.try_join_next().is_some() {}
            }
            _ = shutdown.cancelled() => break,
        }
    }

    let drain = async {
        while tasks.join_next().await.is_some() {}
    };
    if timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!("drain timed out, aborting in-flight queries");
    }
}
