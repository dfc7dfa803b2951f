//! Waypoint - a caching DNS forwarder with local authoritative records.
//!
//! Queries are answered from a TTL-bounded LRU cache, then from statically
//! configured records (wildcards included), and otherwise forwarded to
//! upstream recursive resolvers with retry and failover. The cache is
//! snapshotted to disk at shutdown and restored on the next start.

pub mod cache;
pub mod config;
pub mod dns;
pub mod handler;
pub mod local;
pub mod logging;
pub mod server;
pub mod stats;
pub mod upstream;
