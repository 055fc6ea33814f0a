//! In-memory [`IndexBackend`] for embedding hosts and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::errors::RecallResult;
use crate::index::bootstrap::BootstrapStatus;
use crate::index::symbols::SymbolTable;
use crate::index::{detect_language, locator_file, IndexBackend};
use crate::models::{
    split_entity_id, CentralityMetrics, ContextPack, EntityMeta, EntityType, Query,
    SimilarityResult, Version,
};

/// A fixed candidate set with optional metrics, metadata, and packs.
///
/// Retrieval returns every candidate inside the query's path prefix and
/// language, in insertion order. Entities without a stored pack get a pack
/// synthesized from their source text.
pub struct StaticIndex {
    version: RwLock<Version>,
    candidates: Vec<SimilarityResult>,
    metrics: HashMap<String, CentralityMetrics>,
    meta: HashMap<String, EntityMeta>,
    packs: HashMap<String, ContextPack>,
    symbols: Option<Arc<SymbolTable>>,
    status: RwLock<BootstrapStatus>,
    retrievals: AtomicUsize,
}

impl StaticIndex {
    pub fn new(version: Version) -> Self {
        Self {
            version: RwLock::new(version),
            candidates: Vec::new(),
            metrics: HashMap::new(),
            meta: HashMap::new(),
            packs: HashMap::new(),
            symbols: None,
            status: RwLock::new(BootstrapStatus::ready()),
            retrievals: AtomicUsize::new(0),
        }
    }

    pub fn with_candidate(mut self, candidate: SimilarityResult) -> Self {
        self.candidates.push(candidate);
        self
    }

    pub fn with_metrics(mut self, entity_id: &str, metrics: CentralityMetrics) -> Self {
        self.metrics.insert(entity_id.to_string(), metrics);
        self
    }

    pub fn with_meta(mut self, entity_id: &str, meta: EntityMeta) -> Self {
        self.meta.insert(entity_id.to_string(), meta);
        self
    }

    /// Register a pack, keyed by its `target_id`.
    pub fn with_pack(mut self, pack: ContextPack) -> Self {
        self.packs.insert(pack.target_id.clone(), pack);
        self
    }

    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self {
        self.symbols = Some(Arc::new(symbols));
        self
    }

    pub fn set_bootstrap_status(&self, status: BootstrapStatus) {
        *self.status.write() = status;
    }

    /// Swap the index version, as a reindex would.
    pub fn set_version(&self, version: Version) {
        *self.version.write() = version;
    }

    /// Number of `retrieve` calls served so far.
    pub fn retrieval_count(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }

    fn matches_filter(candidate: &SimilarityResult, query: &Query) -> bool {
        let (_, locator) = split_entity_id(&candidate.entity_id);
        if let Some(prefix) = query.path_prefix() {
            if !locator.starts_with(prefix) {
                return false;
            }
        }
        if let Some(language) = query.language() {
            match detect_language(locator_file(locator)) {
                Some(found) if found.eq_ignore_ascii_case(language) => {}
                _ => return false,
            }
        }
        true
    }

    fn default_pack(candidate: &SimilarityResult, now: DateTime<Utc>) -> ContextPack {
        let (_, locator) = split_entity_id(&candidate.entity_id);
        let file = locator_file(locator).to_string();
        let pack_type = match candidate.entity_type {
            EntityType::Document => "document",
            EntityType::Module => "module",
            _ => "symbol",
        };
        let mut pack = ContextPack::new(
            format!("pack:{}", candidate.entity_id),
            pack_type,
            candidate.entity_id.clone(),
            now,
        );
        pack.summary = if candidate.source_text.is_empty() {
            candidate.entity_id.clone()
        } else {
            candidate.source_text.clone()
        };
        pack.confidence = candidate.similarity;
        pack.related_files = vec![file.clone()];
        pack.invalidation_triggers = vec![file];
        pack
    }
}

impl IndexBackend for StaticIndex {
    fn bootstrap_status(&self) -> BootstrapStatus {
        self.status.read().clone()
    }

    fn version(&self) -> Version {
        self.version.read().clone()
    }

    fn retrieve(&self, query: &Query, limit: usize) -> RecallResult<Vec<SimilarityResult>> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .candidates
            .iter()
            .filter(|c| Self::matches_filter(c, query))
            .take(limit)
            .cloned()
            .collect())
    }

    fn centrality(
        &self,
        entity_ids: &[String],
    ) -> RecallResult<HashMap<String, CentralityMetrics>> {
        Ok(entity_ids
            .iter()
            .filter_map(|id| self.metrics.get(id).map(|m| (id.clone(), m.clone())))
            .collect())
    }

    fn entity_meta(&self, entity_ids: &[String]) -> RecallResult<HashMap<String, EntityMeta>> {
        Ok(entity_ids
            .iter()
            .filter_map(|id| self.meta.get(id).map(|m| (id.clone(), m.clone())))
            .collect())
    }

    fn symbols(&self) -> Option<Arc<SymbolTable>> {
        self.symbols.clone()
    }

    fn synthesize(
        &self,
        _query: &Query,
        ranked: &[SimilarityResult],
        now: DateTime<Utc>,
    ) -> RecallResult<Vec<ContextPack>> {
        Ok(ranked
            .iter()
            .map(|candidate| match self.packs.get(&candidate.entity_id) {
                Some(pack) => pack.clone(),
                None => Self::default_pack(candidate, now),
            })
            .collect())
    }
}
