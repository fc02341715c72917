use crate::storage::Storage;
use crate::utils::now_millis;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Storage key prefix of every cache entry
pub const CACHE_KEY_PREFIX: &str = "llm_cache_";

/// Format version written into entries; older versions are treated as misses
pub const CACHE_VERSION: &str = "1";

/// What a cached request was for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Selection,
    Patch,
    Rewrite,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Selection => "selection",
            RequestKind::Patch => "patch",
            RequestKind::Rewrite => "rewrite",
        }
    }
}

/// Persisted cache record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Raw response payload
    pub data: serde_json::Value,
    /// Exact request text, compared on read
    pub prompt: String,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub version: String,
}

/// Hash-indexed response cache with prompt verification and lazy expiry
pub struct ResponseCache {
    storage: Arc<dyn Storage>,
    ttl: Duration,
    enabled: bool,
    key_salt: String,
}

impl ResponseCache {
    /// `api_key` is hashed into every storage key so that entries from
    /// different accounts never mix. The key itself is never stored.
    pub fn new(storage: Arc<dyn Storage>, ttl: Duration, api_key: Option<&str>) -> Self {
        Self {
            storage,
            ttl,
            enabled: true,
            key_salt: api_key
                .map(|k| format!("{:08x}", hash_key(k)))
                .unwrap_or_default(),
        }
    }

    /// Force every lookup to miss and every store to be dropped
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, kind: RequestKind, prompt: &str) -> Option<serde_json::Value> {
        self.get_at(kind, prompt, now_millis())
    }

    pub(crate) fn get_at(
        &self,
        kind: RequestKind,
        prompt: &str,
        now_ms: u64,
    ) -> Option<serde_json::Value> {
        if !self.enabled {
            return None;
        }
        let key = self.storage_key(kind, prompt);
        let raw = self.storage.get(&key)?;

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                ::log::warn!("Evicting malformed cache entry {}: {}", key, e);
                self.evict(&key);
                return None;
            }
        };

        if entry.version != CACHE_VERSION {
            ::log::debug!("Evicting cache entry {} with version {}", key, entry.version);
            self.evict(&key);
            return None;
        }

        if entry.kind != kind || entry.prompt != prompt {
            ::log::debug!("Cache key {} collided with a different prompt", key);
            return None;
        }

        let age_ms = now_ms.saturating_sub(entry.timestamp);
        if u128::from(age_ms) > self.ttl.as_millis() {
            ::log::debug!("Evicting expired cache entry {} ({} ms old)", key, age_ms);
            self.evict(&key);
            return None;
        }

        ::log::debug!("Cache hit for {} request", kind.as_str());
        Some(entry.data)
    }

    pub fn put(&self, kind: RequestKind, prompt: &str, data: serde_json::Value) {
        self.put_at(kind, prompt, data, now_millis());
    }

    pub(crate) fn put_at(
        &self,
        kind: RequestKind,
        prompt: &str,
        data: serde_json::Value,
        now_ms: u64,
    ) {
        if !self.enabled {
            return;
        }
        let entry = CacheEntry {
            data,
            prompt: prompt.to_string(),
            kind,
            timestamp: now_ms,
            version: CACHE_VERSION.to_string(),
        };
        let key = self.storage_key(kind, prompt);
        match serde_json::to_string(&entry) {
            Ok(json) => {
                if let Err(e) = self.storage.set(&key, json) {
                    ::log::warn!("Failed to store cache entry {}: {}", key, e);
                }
            }
            Err(e) => ::log::warn!("Failed to encode cache entry {}: {}", key, e),
        }
    }

    /// Drop the entry stored for this request, if any
    pub fn invalidate(&self, kind: RequestKind, prompt: &str) {
        if self.enabled {
            self.evict(&self.storage_key(kind, prompt));
        }
    }

    /// Remove every cache entry
    pub fn clear(&self) {
        let keys = self.storage.keys_with_prefix(CACHE_KEY_PREFIX);
        ::log::info!("Clearing {} cache entries", keys.len());
        for key in keys {
            self.evict(&key);
        }
    }

    fn storage_key(&self, kind: RequestKind, prompt: &str) -> String {
        let material = format!("{}|{}|{}", self.key_salt, kind.as_str(), prompt);
        format!("{}{:08x}", CACHE_KEY_PREFIX, hash_key(&material))
    }

    fn evict(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            ::log::warn!("Failed to evict cache entry {}: {}", key, e);
        }
    }
}

/// djb2 rolling hash XORed with a salt derived from the input length.
/// Only used to index storage; hits are verified against the full prompt.
pub fn hash_key(input: &str) -> u32 {
    let mut hash: u32 = 5381;
    for byte in input.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(u32::from(byte));
    }
    let salt = (input.len() as u32).wrapping_mul(0x9E37_79B9);
    hash ^ salt
}
