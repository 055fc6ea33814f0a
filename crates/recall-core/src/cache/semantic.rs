//! Adaptive semantic cache for paraphrased intents.
//!
//! Entries are partitioned by scope signature. Within a partition, a query
//! reuses a cached response when its normalized intent has the same category
//! and a similarity at or above the configured threshold. Intents with no
//! extractable signal never match.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::codec::{deserialize_response, serialize_response};
use crate::cache::intent::{analyze_intent, build_scope_signature, NormalizedIntent};
use crate::config::SemanticConfig;
use crate::errors::RecallResult;
use crate::models::{CachedResponse, Query};

struct SemanticEntry {
    intent: NormalizedIntent,
    payload: String,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// A reused response and how closely its intent matched.
#[derive(Clone, Debug, PartialEq)]
pub struct SemanticMatch {
    pub response: CachedResponse,
    pub similarity: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SemanticCacheStats {
    pub partitions: usize,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct SemanticCache {
    enabled: bool,
    threshold: f64,
    ttl: chrono::Duration,
    max_per_partition: usize,
    partitions: Mutex<HashMap<String, Vec<SemanticEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SemanticCache {
    pub fn new(config: &SemanticConfig) -> Self {
        let ttl_secs = i64::try_from(config.ttl_secs.max(1)).unwrap_or(i64::MAX / 1000);
        Self {
            enabled: config.enabled,
            threshold: config.threshold.clamp(0.0, 1.0),
            ttl: chrono::Duration::try_seconds(ttl_secs)
                .unwrap_or_else(|| chrono::Duration::days(365)),
            max_per_partition: config.max_entries_per_partition.max(1),
            partitions: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn miss(&self) -> Option<SemanticMatch> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Find a reusable response for a paraphrase of `query`.
    pub fn lookup(&self, query: &Query, now: DateTime<Utc>) -> Option<SemanticMatch> {
        if !self.enabled {
            return None;
        }
        let intent = analyze_intent(&query.intent);
        if !intent.has_signal() {
            debug!("intent has no extractable signal; semantic cache skipped");
            return self.miss();
        }
        let signature = build_scope_signature(query);

        let mut found: Option<SemanticMatch> = None;
        let mut partition_empty = false;
        let mut partitions = self.partitions.lock();
        if let Some(entries) = partitions.get_mut(&signature) {
            entries.retain(|e| e.expires_at > now);
            while found.is_none() {
                let best = entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.intent.category == intent.category)
                    .map(|(i, e)| (i, e.intent.similarity(&intent), e.stored_at))
                    .filter(|(_, sim, _)| *sim >= self.threshold)
                    .max_by(|a, b| {
                        a.1.partial_cmp(&b.1)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(a.2.cmp(&b.2))
                    });
                let Some((index, similarity, _)) = best else {
                    break;
                };
                match deserialize_response(&entries[index].payload) {
                    Some(response) => {
                        found = Some(SemanticMatch {
                            response,
                            similarity,
                        })
                    }
                    None => {
                        warn!("dropping corrupted semantic cache entry in {signature}");
                        entries.remove(index);
                    }
                }
            }
            partition_empty = entries.is_empty();
        }
        if partition_empty {
            partitions.remove(&signature);
        }
        drop(partitions);

        match found {
            Some(hit) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    category = intent.category.as_str(),
                    similarity = hit.similarity,
                    "semantic cache hit"
                );
                Some(hit)
            }
            None => self.miss(),
        }
    }

    /// Store `response` for `query`. Returns false when the intent carries no
    /// signal and was therefore not cached.
    pub fn store(
        &self,
        query: &Query,
        response: &CachedResponse,
        now: DateTime<Utc>,
    ) -> RecallResult<bool> {
        if !self.enabled {
            return Ok(false);
        }
        let intent = analyze_intent(&query.intent);
        if !intent.has_signal() {
            return Ok(false);
        }
        let payload = serialize_response(response)?;
        let signature = build_scope_signature(query);
        let expires_at = now
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut partitions = self.partitions.lock();
        let entries = partitions.entry(signature).or_default();
        entries.retain(|e| e.expires_at > now && e.intent != intent);
        entries.push(SemanticEntry {
            intent,
            payload,
            stored_at: now,
            expires_at,
        });
        while entries.len() > self.max_per_partition {
            entries.remove(0);
        }
        Ok(true)
    }

    /// Rewrite every live entry through `update`; see `ResponseCache::update_where`.
    pub fn update_where<F>(&self, now: DateTime<Utc>, mut update: F) -> RecallResult<usize>
    where
        F: FnMut(&mut CachedResponse) -> bool,
    {
        let mut changed = 0;
        let mut partitions = self.partitions.lock();
        for entries in partitions.values_mut() {
            entries.retain(|e| e.expires_at > now);
            for entry in entries.iter_mut() {
                let Some(mut response) = deserialize_response(&entry.payload) else {
                    continue;
                };
                if update(&mut response) {
                    entry.payload = serialize_response(&response)?;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    /// Evict entries whose response satisfies `predicate`, plus corrupted ones.
    pub fn evict_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CachedResponse) -> bool,
    {
        let mut evicted = 0;
        let mut partitions = self.partitions.lock();
        for entries in partitions.values_mut() {
            let before = entries.len();
            entries.retain(|e| match deserialize_response(&e.payload) {
                Some(response) => !predicate(&response),
                None => false,
            });
            evicted += before - entries.len();
        }
        partitions.retain(|_, entries| !entries.is_empty());
        evicted
    }

    pub fn clear(&self) {
        self.partitions.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.partitions.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SemanticCacheStats {
        let partitions = self.partitions.lock();
        SemanticCacheStats {
            partitions: partitions.len(),
            entries: partitions.values().map(Vec::len).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
