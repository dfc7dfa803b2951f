//! TTL-bounded LRU cache for DNS responses.
//!
//! A single mutex guards the map and its recency order (lookups update
//! recency, so even reads mutate). Reads hand back owned clones of the stored
//! response; callers rewrite the id without disturbing cached state. The
//! cache can be written to and restored from a versioned binary snapshot in
//! which each response is stored in DNS wire format.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dns::{Message, ProtoError, Question};

const SNAPSHOT_VERSION: u32 = 1;

/// The canonical cache key for a question: `NAME:TYPE:CLASS`, with the name
/// keeping its trailing dot.
pub fn cache_key(question: &Question) -> String {
    format!(
        "{}:{}:{}",
        question.name, question.rtype, question.class
    )
}

/// Snapshot serialization failure.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("snapshot file is truncated")]
    Truncated,
    #[error("unsupported snapshot version {0}")]
    Version(u32),
    #[error("corrupt snapshot entry: {0}")]
    Proto(#[from] ProtoError),
    #[error("corrupt snapshot entry: key is not valid utf-8")]
    InvalidKey,
}

/// The cache operations the request handler needs.
pub trait ResponseCache: Send + Sync {
    /// Returns an owned copy of the stored response if present and not
    /// expired, refreshing its recency. An expired entry is removed.
    fn get(&self, key: &str) -> Option<Message>;

    /// Inserts or replaces an entry. A zero `ttl` means the configured
    /// default. Inserting a new key at capacity evicts the least recently
    /// used entry first; replacing an existing key never evicts.
    fn set(&self, key: &str, response: &Message, ttl: Duration);

    /// Removes an entry if present.
    fn delete(&self, key: &str);

    /// Drops every entry.
    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CacheEntry {
    response: Message,
    expires_at: SystemTime,
}

/// LRU-ordered response cache.
pub struct LruResponseCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    default_ttl: Duration,
}

impl LruResponseCache {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
        }
    }

    /// Removes every expired entry in one critical section. Returns how many
    /// were dropped.
    pub fn remove_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = SystemTime::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    /// Writes all non-expired entries to `path`. The cache lock is held for
    /// the duration; the cache itself is not modified.
    pub fn dump(&self, path: &Path) -> Result<usize, SnapshotError> {
        let entries = self.entries.lock();
        let now = SystemTime::now();

        let mut body = Vec::new();
        let mut count: u32 = 0;
        for (key, entry) in entries.iter() {
            if entry.expires_at <= now {
                continue;
            }
            let expires = entry
                .expires_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let wire = entry.response.to_wire();
            body.extend_from_slice(&(key.len() as u16).to_be_bytes());
            body.extend_from_slice(key.as_bytes());
            body.extend_from_slice(&expires.to_be_bytes());
            body.extend_from_slice(&(wire.len() as u32).to_be_bytes());
            body.extend_from_slice(&wire);
            count += 1;
        }

        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(&SNAPSHOT_VERSION.to_be_bytes());
        out.extend_from_slice(&count.to_be_bytes());
        out.extend_from_slice(&body);
        std::fs::write(path, &out)?;
        Ok(count as usize)
    }

    /// Loads a snapshot written by [`dump`](Self::dump). The whole file is
    /// decoded before the cache is touched, so a corrupt file leaves the
    /// cache as it was. Entries already past expiry are discarded; capacity
    /// is enforced by LRU eviction as entries are inserted. Returns how many
    /// entries were restored.
    pub fn load(&self, path: &Path) -> Result<usize, SnapshotError> {
        let data = std::fs::read(path)?;
        if data.len() < 8 {
            return Err(SnapshotError::Truncated);
        }
        let version = u32::from_be_bytes(data[0..4].try_into().unwrap());
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version(version));
        }
        let count = u32::from_be_bytes(data[4..8].try_into().unwrap());

        let mut pos = 8usize;
        let mut parsed = Vec::new();
        for _ in 0..count {
            let key_len = u16::from_be_bytes(take(&data, &mut pos, 2)?.try_into().unwrap());
            let key = String::from_utf8(take(&data, &mut pos, usize::from(key_len))?.to_vec())
                .map_err(|_| SnapshotError::InvalidKey)?;
            let expires = u64::from_be_bytes(take(&data, &mut pos, 8)?.try_into().unwrap());
            let expires_at = UNIX_EPOCH + Duration::from_secs(expires);
            let wire_len = u32::from_be_bytes(take(&data, &mut pos, 4)?.try_into().unwrap());
            let response = Message::from_wire(take(&data, &mut pos, wire_len as usize)?)?;
            parsed.push((key, response, expires_at));
        }

        let now = SystemTime::now();
        let mut entries = self.entries.lock();
        let mut loaded = 0;
        for (key, response, expires_at) in parsed {
            if expires_at <= now {
                continue;
            }
            entries.put(
                key,
                CacheEntry {
                    response,
                    expires_at,
                },
            );
            loaded += 1;
        }
        Ok(loaded)
    }
}

impl ResponseCache for LruResponseCache {
    fn get(&self, key: &str) -> Option<Message> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) => {
                if entry.expires_at > SystemTime::now() {
                    return Some(entry.response.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    fn set(&self, key: &str, response: &Message, ttl: Duration) {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        let entry = CacheEntry {
            response: response.clone(),
            expires_at: SystemTime::now() + ttl,
        };
        self.entries.lock().put(key.to_string(), entry);
    }

    fn delete(&self, key: &str) {
        self.entries.lock().pop(key);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], SnapshotError> {
    let end = pos.checked_add(len).ok_or(SnapshotError::Truncated)?;
    let slice = data.get(*pos..end).ok_or(SnapshotError::Truncated)?;
    *pos = end;
    Ok(slice)
}

/// Runs the eviction sweeper until the token is cancelled. The first sweep
/// happens one full interval after spawn.
pub fn spawn_sweeper(
    cache: Arc<LruResponseCache>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let period = if period.is_zero() {
        Duration::from_secs(60)
    } else {
        period
    };
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.remove_expired();
                    if removed > 0 {
                        debug!(removed, "removed expired cache entries");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    })
}
