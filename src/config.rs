//! TOML configuration.
//!
//! Every option has a default, applied per field during deserialization, so a
//! partial file only overrides what it names and a missing file yields a fully
//! defaulted configuration. Duration-valued options are integer seconds.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid server port: {0}")]
    InvalidPort(u16),
    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),
    #[error("cache max_entries must be positive")]
    InvalidCacheSize,
    #[error("at least one upstream server must be configured")]
    NoUpstreamServers,
    #[error("invalid upstream server {0:?}: expected ip:port")]
    InvalidUpstreamServer(String),
    #[error("invalid {rtype} record for {domain:?}: {reason}")]
    InvalidRecord {
        rtype: &'static str,
        domain: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
    pub records: RecordsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: String,
    pub read_timeout: u64,
    pub write_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 53,
            bind_address: "0.0.0.0".to_string(),
            read_timeout: 5,
            write_timeout: 5,
        }
    }
}

impl ServerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(nonzero_or(self.write_timeout, 5))
    }
}

/// Zero means unset for duration-valued options; the documented default
/// applies.
fn nonzero_or(value: u64, default: u64) -> u64 {
    if value == 0 {
        default
    } else {
        value
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub default_ttl: u64,
    pub cleanup_interval: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl: 300,
            cleanup_interval: 60,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(nonzero_or(self.default_ttl, 300))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(nonzero_or(self.cleanup_interval, 60))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub servers: Vec<String>,
    pub timeout: u64,
    pub retries: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            servers: vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()],
            timeout: 2,
            retries: 3,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(nonzero_or(self.timeout, 2))
    }

    /// The configured servers as socket addresses.
    pub fn server_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        self.servers
            .iter()
            .map(|s| {
                s.parse()
                    .map_err(|_| ConfigError::InvalidUpstreamServer(s.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Static records, one table per record type, keyed by domain.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    #[serde(rename = "A")]
    pub a: FxHashMap<String, String>,
    #[serde(rename = "AAAA")]
    pub aaaa: FxHashMap<String, String>,
    #[serde(rename = "CNAME")]
    pub cname: FxHashMap<String, String>,
    #[serde(rename = "MX")]
    pub mx: FxHashMap<String, MxValue>,
    #[serde(rename = "TXT")]
    pub txt: FxHashMap<String, String>,
    #[serde(rename = "HTTPS")]
    pub https: FxHashMap<String, SvcValue>,
    #[serde(rename = "SVCB")]
    pub svcb: FxHashMap<String, SvcValue>,
    #[serde(rename = "CAA")]
    pub caa: FxHashMap<String, CaaValue>,
    #[serde(rename = "SRV")]
    pub srv: FxHashMap<String, SrvValue>,
    #[serde(rename = "DS")]
    pub ds: FxHashMap<String, DsValue>,
    #[serde(rename = "DNSKEY")]
    pub dnskey: FxHashMap<String, DnskeyValue>,
    #[serde(rename = "URI")]
    pub uri: FxHashMap<String, UriValue>,
    #[serde(rename = "NAPTR")]
    pub naptr: FxHashMap<String, NaptrValue>,
    #[serde(rename = "SSHFP")]
    pub sshfp: FxHashMap<String, SshfpValue>,
    #[serde(rename = "TLSA")]
    pub tlsa: FxHashMap<String, TlsaValue>,
    #[serde(rename = "SMIMEA")]
    pub smimea: FxHashMap<String, TlsaValue>,
    #[serde(rename = "CERT")]
    pub cert: FxHashMap<String, CertValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MxValue {
    #[serde(default)]
    pub priority: u16,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SvcValue {
    #[serde(default)]
    pub priority: u16,
    pub target: String,
    #[serde(default)]
    pub params: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaaValue {
    #[serde(default)]
    pub flag: u8,
    pub tag: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SrvValue {
    #[serde(default)]
    pub priority: u16,
    #[serde(default)]
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DsValue {
    pub keytag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DnskeyValue {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UriValue {
    #[serde(default)]
    pub priority: u16,
    #[serde(default)]
    pub weight: u16,
    pub target: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NaptrValue {
    pub order: u16,
    pub preference: u16,
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub regexp: String,
    #[serde(default)]
    pub replacement: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshfpValue {
    pub algorithm: u8,
    #[serde(rename = "type")]
    pub fingerprint_type: u8,
    pub fingerprint: String,
}

/// Shared by TLSA and SMIMEA, which have identical fields.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsaValue {
    pub usage: u8,
    pub selector: u8,
    pub matching_type: u8,
    pub certificate: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertValue {
    #[serde(rename = "type")]
    pub cert_type: u16,
    pub keytag: u16,
    pub algorithm: u8,
    pub certificate: String,
}

impl Config {
    /// Loads configuration from `path`. A missing file is not an error and
    /// yields the defaults; a malformed file or invalid values are.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates everything outside the record tables; those are checked when
    /// the record store is built from them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }
        if self.server.bind_address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(
                self.server.bind_address.clone(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::InvalidCacheSize);
        }
        if self.upstream.servers.is_empty() {
            return Err(ConfigError::NoUpstreamServers);
        }
        self.upstream.server_addrs()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 53);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(300));
        assert_eq!(config.cache.cleanup_interval(), Duration::from_secs(60));
        assert_eq!(config.upstream.servers, vec!["8.8.8.8:53", "1.1.1.1:53"]);
        assert_eq!(config.upstream.timeout(), Duration::from_secs(2));
        assert_eq!(config.upstream.retries, 3);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults_elsewhere() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 5353

            [upstream]
            servers = ["9.9.9.9:53"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 5353);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.upstream.servers, vec!["9.9.9.9:53"]);
        assert_eq!(config.upstream.retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn records_tables_parse() {
        let config: Config = toml::from_str(
            r#"
            [records.A]
            "local.test" = "10.0.0.1"
            "*.example" = "192.0.2.7"

            [records.MX."example.com"]
            priority = 10
            target = "mail.example.com"

            [records.SRV."_sip._tcp.example.com"]
            priority = 0
            weight = 5
            port = 5060
            target = "sip.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.records.a["local.test"], "10.0.0.1");
        assert_eq!(config.records.a["*.example"], "192.0.2.7");
        assert_eq!(config.records.mx["example.com"].priority, 10);
        assert_eq!(config.records.srv["_sip._tcp.example.com"].port, 5060);
    }

    #[test]
    fn rejects_port_zero() {
        let config: Config = toml::from_str("[server]\nport = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPort(0))
        ));
    }

    #[test]
    fn rejects_empty_upstream_list() {
        let config: Config = toml::from_str("[upstream]\nservers = []\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoUpstreamServers)
        ));
    }

    #[test]
    fn rejects_unparseable_upstream() {
        let config: Config = toml::from_str("[upstream]\nservers = [\"dns.example\"]\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.server.port, 53);
    }

    #[test]
    fn malformed_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport=53").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
