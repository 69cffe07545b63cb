//! Content-addressed on-disk cache.
//!
//! Entries are JSON files named by a hash of their inputs, grouped under a
//! namespace directory (`matrices/`, `routes/`). Writes go through a
//! temporary file and an atomic rename, so concurrent writers to the same
//! key are idempotent and readers never see a half-written entry. Entries
//! older than the TTL are evicted lazily on access.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::traits::LonLat;

/// Stable key for an ordered coordinate sequence plus profile name.
///
/// Coordinates are rounded to 6 decimal places (about 0.1 m) so that noise
/// below street precision still hits the cache; order is significant.
pub fn coords_key(points: &[LonLat], profile: &str) -> String {
    let mut hasher = Sha256::new();
    for p in points {
        // Round-then-format keeps -0.0 and 0.0 distinct inputs identical.
        let lat = (p.lat * 1e6).round() / 1e6;
        let lon = (p.lon * 1e6).round() / 1e6;
        hasher.update(format!("{:.6},{:.6};", lat, lon).as_bytes());
    }
    hasher.update(profile.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    created_at: u64,
    payload: T,
}

/// JSON file store rooted at a cache directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
    ttl_secs: u64,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>, ttl_secs: u64) -> Self {
        Self {
            root: root.into(),
            ttl_secs,
        }
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root.join(namespace).join(format!("{key}.json"))
    }

    /// Load an entry. Missing, expired, or unreadable entries are misses;
    /// expired entries are removed on the way out.
    pub fn load<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let path = self.entry_path(namespace, key);
        let raw = std::fs::read_to_string(&path).ok()?;
        let envelope: Envelope<T> = match serde_json::from_str(&raw) {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(?path, %err, "dropping unreadable cache entry");
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };

        if now_secs().saturating_sub(envelope.created_at) > self.ttl_secs {
            tracing::debug!(key, namespace, "cache entry expired");
            let _ = std::fs::remove_file(&path);
            return None;
        }

        tracing::debug!(key, namespace, "cache hit");
        Some(envelope.payload)
    }

    /// Store an entry. Failures are logged and swallowed: the cache is an
    /// optimization, never a correctness dependency.
    pub fn store<T: Serialize>(&self, namespace: &str, key: &str, payload: &T) {
        let envelope = Envelope {
            created_at: now_secs(),
            payload,
        };
        if let Err(err) = self.write_atomic(namespace, key, &envelope) {
            tracing::warn!(key, namespace, %err, "failed to write cache entry");
        }
    }

    fn write_atomic<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        envelope: &Envelope<&T>,
    ) -> std::io::Result<()> {
        let path = self.entry_path(namespace, key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec(envelope)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
