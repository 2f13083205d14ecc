//! Routing cache
//!
//! ⚡ Remembers the resolution of a hostname for a fixed time so repeated
//! handshakes skip the store and certificate parsing. Entries are sharded, so
//! lookups of different hostnames never contend.

use crate::resolver::Resolution;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry {
    resolution: Arc<Resolution>,
    expires_at: Instant,
}

/// ⚡ Hostname to resolution cache with a fixed TTL
pub struct RoutingCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl RoutingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live resolution for `host`
    pub fn get(&self, host: &str) -> Option<Arc<Resolution>> {
        let now = Instant::now();
        let (resolution, expired) = {
            let entry = self.entries.get(host)?;
            (entry.resolution.clone(), entry.expires_at <= now)
        };

        if expired {
            // A fresh insert may have landed since the read above.
            self.entries.remove_if(host, |_, entry| entry.expires_at <= now);
            return None;
        }
        Some(resolution)
    }

    /// Store `resolution` for `host`, replacing any previous entry
    pub fn insert(&self, host: impl Into<String>, resolution: Arc<Resolution>) {
        let entry = CacheEntry {
            resolution,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.insert(host.into(), entry);
    }

    /// 🧹 Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);

        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!("🧹 Cleaned {} expired routing cache entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RoutingCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
