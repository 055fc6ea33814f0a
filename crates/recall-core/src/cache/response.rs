//! Deterministic two-tier response cache keyed by exact query shape.
//!
//! `l1` holds shallow `L0` answers with a short TTL, `l2` holds deeper answers
//! for longer and may be backed by a persistent `CacheStore`. Entries are kept
//! as serialized text; expiry is checked lazily on read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::codec::{deserialize_response, serialize_response};
use crate::cache::store::{CacheStore, StoredEntry};
use crate::config::CacheConfig;
use crate::errors::RecallResult;
use crate::models::{CachedResponse, Query, QueryDepth};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheTier {
    L1,
    L2,
}

impl CacheTier {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheTier::L1 => "l1",
            CacheTier::L2 => "l2",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "l1" => Some(CacheTier::L1),
            "l2" => Some(CacheTier::L2),
            _ => None,
        }
    }
}

/// `L0` → `l1`; `L1`, `L2`, or unspecified → `l2`.
pub fn tier_for_depth(depth: Option<QueryDepth>) -> CacheTier {
    match depth {
        Some(QueryDepth::L0) => CacheTier::L1,
        Some(QueryDepth::L1) | Some(QueryDepth::L2) | None => CacheTier::L2,
    }
}

/// TTL mirrors tier selection.
pub fn ttl_for_depth(depth: Option<QueryDepth>, config: &CacheConfig) -> Duration {
    match tier_for_depth(depth) {
        CacheTier::L1 => config.l1_ttl(),
        CacheTier::L2 => config.l2_ttl(),
    }
}

/// Exact cache key for a normalized query: `"<tier>:<version>:<sha256>"`.
///
/// Covers intent text, depth, path prefix, language, and task type.
pub fn cache_key(query: &Query, version_token: &str) -> String {
    let shape = serde_json::json!({
        "intent": query.intent.trim(),
        "depth": query.depth.map(QueryDepth::as_str),
        "pathPrefix": query.path_prefix(),
        "language": query.language(),
        "taskType": query.task_type.as_deref(),
    });
    let mut hasher = Sha256::new();
    hasher.update(shape.to_string().as_bytes());
    format!(
        "{}:{}:{:x}",
        tier_for_depth(query.depth).as_str(),
        version_token,
        hasher.finalize()
    )
}

struct CacheEntry {
    payload: String,
    expires_at: DateTime<Utc>,
}

struct TierState {
    tier: CacheTier,
    max_entries: usize,
    ttl: Duration,
    entries: Mutex<IndexMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TierState {
    fn new(tier: CacheTier, max_entries: usize, ttl: Duration) -> Self {
        Self {
            tier,
            max_entries: max_entries.max(1),
            ttl,
            entries: Mutex::new(IndexMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn insert(&self, key: String, entry: CacheEntry) {
        let mut entries = self.entries.lock();
        entries.shift_remove(&key);
        entries.insert(key, entry);
        while entries.len() > self.max_entries {
            if let Some((evicted, _)) = entries.shift_remove_index(0) {
                debug!(tier = self.tier.as_str(), key = %evicted, "evicted over-capacity entry");
            }
        }
    }
}

/// Per-tier counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TierStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResponseCacheStats {
    pub l1: TierStats,
    pub l2: TierStats,
}

pub struct ResponseCache {
    l1: TierState,
    l2: TierState,
    store: Option<Box<dyn CacheStore>>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            l1: TierState::new(CacheTier::L1, config.l1_max_entries, config.l1_ttl()),
            l2: TierState::new(CacheTier::L2, config.l2_max_entries, config.l2_ttl()),
            store: None,
        }
    }

    /// Persist the `l2` tier through `store`.
    pub fn with_store(mut self, store: Box<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn state(&self, tier: CacheTier) -> &TierState {
        match tier {
            CacheTier::L1 => &self.l1,
            CacheTier::L2 => &self.l2,
        }
    }

    fn persistent(&self, tier: CacheTier) -> Option<&dyn CacheStore> {
        match tier {
            CacheTier::L2 => self.store.as_deref(),
            CacheTier::L1 => None,
        }
    }

    fn forget(&self, tier: CacheTier, key: &str) {
        self.state(tier).entries.lock().shift_remove(key);
        if let Some(store) = self.persistent(tier) {
            if let Err(e) = store.delete(key) {
                warn!("Failed to delete cache entry {key}: {e}");
            }
        }
    }

    /// Look up `key` in `tier`. Expired and corrupted entries are dropped and
    /// reported as misses.
    pub fn get(&self, tier: CacheTier, key: &str, now: DateTime<Utc>) -> Option<CachedResponse> {
        let state = self.state(tier);
        let mut hit: Option<(String, DateTime<Utc>)> = None;
        {
            let mut entries = state.entries.lock();
            if let Some(entry) = entries.shift_remove(key) {
                if entry.expires_at > now {
                    hit = Some((entry.payload.clone(), entry.expires_at));
                    // Move to end for LRU
                    entries.insert(key.to_string(), entry);
                }
            }
        }

        if hit.is_none() {
            if let Some(store) = self.persistent(tier) {
                match store.load(key) {
                    Ok(Some(stored)) if stored.expires_at > now => {
                        hit = Some((stored.payload.clone(), stored.expires_at));
                        state.insert(
                            key.to_string(),
                            CacheEntry {
                                payload: stored.payload,
                                expires_at: stored.expires_at,
                            },
                        );
                    }
                    Ok(Some(_)) => self.forget(tier, key),
                    Ok(None) => {}
                    Err(e) => warn!("Cache store read failed for {key}: {e}"),
                }
            }
        }

        let Some((payload, _)) = hit else {
            state.misses.fetch_add(1, Ordering::Relaxed);
            debug!(tier = tier.as_str(), "response cache miss");
            return None;
        };
        match deserialize_response(&payload) {
            Some(response) => {
                state.hits.fetch_add(1, Ordering::Relaxed);
                debug!(tier = tier.as_str(), "response cache hit");
                Some(response)
            }
            None => {
                warn!(tier = tier.as_str(), "dropping corrupted cache entry {key}");
                self.forget(tier, key);
                state.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `response` under `key` with the tier's TTL from `now`.
    pub fn put(
        &self,
        tier: CacheTier,
        key: &str,
        response: &CachedResponse,
        now: DateTime<Utc>,
    ) -> RecallResult<()> {
        let expires_at = self.state(tier).expires_at(now);
        self.put_with_expiry(tier, key, serialize_response(response)?, expires_at)
    }

    /// Store raw payload text. Exposed for replaying persisted entries.
    pub fn put_raw(
        &self,
        tier: CacheTier,
        key: &str,
        payload: String,
        expires_at: DateTime<Utc>,
    ) -> RecallResult<()> {
        self.put_with_expiry(tier, key, payload, expires_at)
    }

    fn put_with_expiry(
        &self,
        tier: CacheTier,
        key: &str,
        payload: String,
        expires_at: DateTime<Utc>,
    ) -> RecallResult<()> {
        if let Some(store) = self.persistent(tier) {
            store.save(
                key,
                &StoredEntry {
                    tier,
                    payload: payload.clone(),
                    expires_at,
                },
            )?;
        }
        self.state(tier)
            .insert(key.to_string(), CacheEntry { payload, expires_at });
        Ok(())
    }

    /// Replace a live entry's payload without extending its expiry. Returns
    /// false when the entry is absent or expired.
    pub fn refresh(
        &self,
        tier: CacheTier,
        key: &str,
        response: &CachedResponse,
        now: DateTime<Utc>,
    ) -> RecallResult<bool> {
        let expires_at = {
            let entries = self.state(tier).entries.lock();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => entry.expires_at,
                _ => return Ok(false),
            }
        };
        self.put_with_expiry(tier, key, serialize_response(response)?, expires_at)?;
        Ok(true)
    }

    /// Rewrite every live entry in both tiers through `update`. Entries for
    /// which `update` returns true are re-stored. Returns the count rewritten.
    pub fn update_where<F>(&self, now: DateTime<Utc>, mut update: F) -> RecallResult<usize>
    where
        F: FnMut(&mut CachedResponse) -> bool,
    {
        self.load_persisted(now);
        let mut changed = 0;
        for tier in [CacheTier::L1, CacheTier::L2] {
            let snapshot: Vec<(String, String, DateTime<Utc>)> = self
                .state(tier)
                .entries
                .lock()
                .iter()
                .filter(|(_, e)| e.expires_at > now)
                .map(|(k, e)| (k.clone(), e.payload.clone(), e.expires_at))
                .collect();
            for (key, payload, expires_at) in snapshot {
                let Some(mut response) = deserialize_response(&payload) else {
                    self.forget(tier, &key);
                    continue;
                };
                if update(&mut response) {
                    self.put_with_expiry(tier, &key, serialize_response(&response)?, expires_at)?;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    /// Evict every entry for which `predicate` holds. Returns evicted count.
    pub fn evict_where<F>(&self, now: DateTime<Utc>, predicate: F) -> usize
    where
        F: Fn(&CachedResponse) -> bool,
    {
        self.load_persisted(now);
        let mut evicted = 0;
        for tier in [CacheTier::L1, CacheTier::L2] {
            let keys: Vec<String> = self
                .state(tier)
                .entries
                .lock()
                .iter()
                .filter(|(_, e)| match deserialize_response(&e.payload) {
                    Some(response) => predicate(&response),
                    None => true,
                })
                .map(|(k, _)| k.clone())
                .collect();
            for key in keys {
                self.forget(tier, &key);
                evicted += 1;
            }
        }
        evicted
    }

    /// Pull live persisted rows into memory so scans see them.
    fn load_persisted(&self, now: DateTime<Utc>) {
        let Some(store) = self.store.as_deref() else {
            return;
        };
        if let Err(e) = store.purge_expired(now) {
            warn!("Failed to purge expired cache rows: {e}");
        }
        match store.entries() {
            Ok(rows) => {
                let state = self.state(CacheTier::L2);
                let mut entries = state.entries.lock();
                for (key, row) in rows {
                    if row.tier == CacheTier::L2 && !entries.contains_key(&key) {
                        entries.insert(
                            key,
                            CacheEntry {
                                payload: row.payload,
                                expires_at: row.expires_at,
                            },
                        );
                    }
                }
                while entries.len() > state.max_entries {
                    entries.shift_remove_index(0);
                }
            }
            Err(e) => warn!("Failed to scan cache store: {e}"),
        }
    }

    pub fn clear(&self) -> RecallResult<()> {
        self.l1.entries.lock().clear();
        self.l2.entries.lock().clear();
        if let Some(store) = self.store.as_deref() {
            store.clear()?;
        }
        Ok(())
    }

    pub fn len(&self, tier: CacheTier) -> usize {
        self.state(tier).entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len(CacheTier::L1) == 0 && self.len(CacheTier::L2) == 0
    }

    pub fn ttl(&self, tier: CacheTier) -> Duration {
        self.state(tier).ttl
    }

    pub fn stats(&self) -> ResponseCacheStats {
        let tier_stats = |state: &TierState| TierStats {
            entries: state.entries.lock().len(),
            max_entries: state.max_entries,
            hits: state.hits.load(Ordering::Relaxed),
            misses: state.misses.load(Ordering::Relaxed),
        };
        ResponseCacheStats {
            l1: tier_stats(&self.l1),
            l2: tier_stats(&self.l2),
        }
    }
}
