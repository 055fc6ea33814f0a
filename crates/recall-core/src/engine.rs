//! Query answering pipeline.
//!
//! `answer` runs one query cycle: scope normalization, deterministic cache,
//! semantic cache, then on a miss retrieval, scoring, biasing, pack
//! synthesis, and assembly. Computed responses are stored into both caches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::response::ResponseCacheStats;
use crate::cache::semantic::SemanticCacheStats;
use crate::cache::{cache_key, tier_for_depth, CacheStore, CacheTier, ResponseCache, SemanticCache};
use crate::config::EngineConfig;
use crate::errors::{RecallError, RecallResult};
use crate::index::{
    bootstrap_with_fallback, BootstrapReport, Bootstrapper, IndexBackend, PatternSet,
    UNIVERSAL_PATTERNS,
};
use crate::models::{
    CachedResponse, ContextPack, PackOutcome, Query, QueryDepth, SimilarityResult, Version,
    DISCLOSURE_SCOPE_AUTO_DETECTED, DISCLOSURE_SEMANTIC_CACHE_MATCH,
};
use crate::query::bias::{apply_definition_bias, apply_document_bias};
use crate::query::guards::truncate_intent;
use crate::query::scope::{normalize_scope, relative_to_root, NormalizedScope};
use crate::query::scoring::{merge_candidates, score_candidates, RecencyPolicy};
use crate::workspace::WorkspaceLayout;

/// Source of "now" for TTLs, recency, and pack timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const DRILL_DOWN_HINT_LIMIT: usize = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub responses: ResponseCacheStats,
    pub semantic: SemanticCacheStats,
    pub in_flight: usize,
}

/// Ranked entities for one query, before pack synthesis.
struct Ranking {
    ranked: Vec<SimilarityResult>,
    candidate_count: usize,
    missing_metrics: usize,
}

pub struct QueryEngine {
    config: EngineConfig,
    workspace_root: PathBuf,
    layout: Option<WorkspaceLayout>,
    backend: Arc<dyn IndexBackend>,
    responses: ResponseCache,
    semantic: SemanticCache,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    fallback_patterns: PatternSet,
    clock: Clock,
}

impl QueryEngine {
    /// Build an engine over `backend`, detecting any monorepo manifest at
    /// `workspace_root`.
    pub fn new(
        config: EngineConfig,
        workspace_root: impl Into<PathBuf>,
        backend: Arc<dyn IndexBackend>,
    ) -> Self {
        let workspace_root = absolute_root(workspace_root.into());
        let layout = WorkspaceLayout::detect(&workspace_root);
        Self {
            responses: ResponseCache::new(&config.cache),
            semantic: SemanticCache::new(&config.semantic),
            config,
            workspace_root,
            layout,
            backend,
            in_flight: Mutex::new(HashMap::new()),
            fallback_patterns: UNIVERSAL_PATTERNS.to_pattern_set(),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Persist the `l2` tier through `store`. Call before the first query.
    pub fn with_store(mut self, store: Box<dyn CacheStore>) -> Self {
        self.responses = ResponseCache::new(&self.config.cache).with_store(store);
        self
    }

    /// Replace the pattern set used by the bootstrap retry.
    pub fn with_fallback_patterns(mut self, patterns: PatternSet) -> Self {
        self.fallback_patterns = patterns;
        self
    }

    pub fn with_layout(mut self, layout: Option<WorkspaceLayout>) -> Self {
        self.layout = layout;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // -----------------------------------------------------------------------
    // Query cycle
    // -----------------------------------------------------------------------

    /// Answer `query`, serving from cache when possible.
    pub fn answer(&self, query: Query) -> RecallResult<CachedResponse> {
        let started = Instant::now();
        let mut query = query;
        query.intent = truncate_intent(&query.intent);

        let status = self.backend.bootstrap_status();
        if status.required {
            return Err(RecallError::BootstrapRequired {
                reason: status
                    .reason
                    .unwrap_or_else(|| "index has not been bootstrapped".to_string()),
            });
        }

        let scope = normalize_scope(&query, &self.workspace_root, self.layout.as_ref())?;
        let version = self.backend.version();
        let tier = tier_for_depth(scope.query.depth);
        let key = cache_key(&scope.query, &version.cache_token());

        // Identical concurrent queries serialize on the key; later arrivals
        // find the first one's stored response.
        let gate = self.gate(&key);
        let result = {
            let _guard = gate.lock();
            match self.probe(tier, &key, &scope, &version, started) {
                Some(hit) => Ok(hit),
                None => self.compute_and_store(tier, &key, &scope, version, started),
            }
        };
        drop(gate);
        self.release(&key);
        result
    }

    /// Run bootstrap when the index reports it is required, then answer once.
    pub fn answer_with_bootstrap(
        &self,
        query: Query,
        bootstrapper: &dyn Bootstrapper,
        patterns: &PatternSet,
    ) -> RecallResult<CachedResponse> {
        match self.answer(query.clone()) {
            Err(RecallError::BootstrapRequired { reason }) => {
                info!(%reason, "index not ready; bootstrapping before answering");
                let report = self.bootstrap(bootstrapper, patterns)?;
                debug!(used_fallback = report.used_fallback, "bootstrap finished");
                self.answer(query)
            }
            other => other,
        }
    }

    /// Bootstrap with `patterns`, falling back once to the engine's default
    /// pattern set.
    pub fn bootstrap(
        &self,
        bootstrapper: &dyn Bootstrapper,
        patterns: &PatternSet,
    ) -> RecallResult<BootstrapReport> {
        bootstrap_with_fallback(bootstrapper, patterns, &self.fallback_patterns)
    }

    fn gate(&self, key: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, key: &str) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(key)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            in_flight.remove(key);
        }
    }

    fn probe(
        &self,
        tier: CacheTier,
        key: &str,
        scope: &NormalizedScope,
        version: &Version,
        started: Instant,
    ) -> Option<CachedResponse> {
        let now = self.now();
        if let Some(mut response) = self.responses.get(tier, key, now) {
            rebind_to_scope(&mut response, scope);
            self.mark_read(&mut response, started);
            if let Err(e) = self.responses.refresh(tier, key, &response, now) {
                warn!("Failed to write back cache access counts: {e}");
            }
            return Some(response);
        }

        let hit = self.semantic.lookup(&scope.query, now)?;
        if hit.response.version.cache_token() != version.cache_token() {
            debug!("semantic cache match is from a stale index version");
            return None;
        }
        let mut response = hit.response;
        rebind_to_scope(&mut response, scope);
        if !response
            .disclosures
            .iter()
            .any(|d| d == DISCLOSURE_SEMANTIC_CACHE_MATCH)
        {
            response
                .disclosures
                .push(DISCLOSURE_SEMANTIC_CACHE_MATCH.to_string());
        }
        self.mark_read(&mut response, started);
        if let Err(e) = self.responses.put(tier, key, &response, now) {
            warn!("Failed to store semantic match in {} tier: {e}", tier.as_str());
        }
        if let Err(e) = self.write_back_semantic_counts(&response, now) {
            warn!("Failed to write back semantic access counts: {e}");
        }
        Some(response)
    }

    /// Copy the pack access counts of `response` onto the semantic entry it
    /// was served from.
    fn write_back_semantic_counts(
        &self,
        response: &CachedResponse,
        now: DateTime<Utc>,
    ) -> RecallResult<usize> {
        self.semantic.update_where(now, |stored| {
            if stored.trace_id != response.trace_id {
                return false;
            }
            for pack in &mut stored.packs {
                if let Some(read) = response.packs.iter().find(|p| p.pack_id == pack.pack_id) {
                    pack.access_count = read.access_count;
                }
            }
            true
        })
    }

    fn mark_read(&self, response: &mut CachedResponse, started: Instant) {
        for pack in &mut response.packs {
            pack.access_count += 1;
        }
        response.cache_hit = true;
        response.latency_ms = elapsed_ms(started);
    }

    fn compute_and_store(
        &self,
        tier: CacheTier,
        key: &str,
        scope: &NormalizedScope,
        version: Version,
        started: Instant,
    ) -> RecallResult<CachedResponse> {
        let now = self.now();
        let query = &scope.query;
        let (packs, ranking, missing_packs) = match self.rank(query, now) {
            Ok(ranking) => {
                let (packs, missing) = self.synthesize(query, &ranking, now)?;
                (packs, Some(ranking), missing)
            }
            Err(RecallError::NoCandidates) => {
                debug!("retrieval returned no candidates");
                (Vec::new(), None, Vec::new())
            }
            Err(e) => return Err(e),
        };

        let mut response = assemble_response(scope, version, packs, ranking.as_ref(), &missing_packs);
        for pack in &mut response.packs {
            pack.access_count += 1;
        }
        response.latency_ms = elapsed_ms(started);

        if let Err(e) = self.responses.put(tier, key, &response, now) {
            warn!("Failed to cache response in {} tier: {e}", tier.as_str());
        }
        if ranking.is_some() {
            if let Err(e) = self.semantic.store(query, &response, now) {
                warn!("Failed to cache response semantically: {e}");
            }
        }
        debug!(
            trace_id = %response.trace_id,
            packs = response.packs.len(),
            latency_ms = response.latency_ms,
            "computed response"
        );
        Ok(response)
    }

    fn rank(&self, query: &Query, now: DateTime<Utc>) -> RecallResult<Ranking> {
        let raw = self
            .backend
            .retrieve(query, self.config.limits.candidate_limit())?;
        if raw.is_empty() {
            return Err(RecallError::NoCandidates);
        }

        let mut signals = merge_candidates(raw);
        let ids: Vec<String> = signals
            .iter()
            .map(|s| s.candidate.entity_id.clone())
            .collect();
        let metrics = self.backend.centrality(&ids)?;
        let meta = self.backend.entity_meta(&ids)?;
        let symbols = self.backend.symbols();

        let mut names = HashMap::new();
        let mut missing_metrics = 0;
        for entry in &mut signals {
            let id = &entry.candidate.entity_id;
            entry.metrics = metrics.get(id).cloned();
            if entry.metrics.is_none() {
                missing_metrics += 1;
            }
            let entity_meta = meta.get(id);
            if let Some(m) = entity_meta {
                entry.confidence = m.confidence.unwrap_or(0.0);
                entry.modified_at = m.modified_at;
                entry.cochange = m.cochange;
            }
            let name = entity_meta
                .and_then(|m| m.display_name.clone())
                .or_else(|| {
                    symbols
                        .as_deref()
                        .and_then(|table| table.display_name_for(id))
                        .map(str::to_string)
                });
            if let Some(name) = name {
                names.insert(id.clone(), name);
            }
        }

        let scoring = &self.config.scoring;
        let policy = RecencyPolicy {
            half_life_days: scoring.half_life_days,
            default_recency: scoring.default_recency,
        };
        let scored = score_candidates(&signals, &scoring.weights, policy, now);
        let projected: Vec<SimilarityResult> = scored
            .into_iter()
            .map(|s| {
                let mut candidate = s.candidate;
                candidate.similarity = s.score;
                candidate
            })
            .collect();

        let bias = &self.config.bias;
        let ranked = apply_document_bias(projected, bias.document_boost);
        let ranked = apply_definition_bias(ranked, bias.definition_boost, &names);

        Ok(Ranking {
            candidate_count: ranked.len(),
            ranked,
            missing_metrics,
        })
    }

    /// Packs for the top-ranked entities in rank order, plus the ids of
    /// top-ranked entities that got no pack.
    fn synthesize(
        &self,
        query: &Query,
        ranking: &Ranking,
        now: DateTime<Utc>,
    ) -> RecallResult<(Vec<ContextPack>, Vec<String>)> {
        let limit = self.config.limits.packs_for(query.depth);
        let top = &ranking.ranked[..ranking.ranked.len().min(limit)];
        let mut packs = self.backend.synthesize(query, top, now)?;
        let rank_of = |pack: &ContextPack| {
            top.iter()
                .position(|r| r.entity_id == pack.target_id)
                .unwrap_or(usize::MAX)
        };
        packs.sort_by_key(rank_of);
        packs.truncate(limit);
        let missing = top
            .iter()
            .filter(|r| !packs.iter().any(|p| p.target_id == r.entity_id))
            .map(|r| r.entity_id.clone())
            .collect();
        Ok((packs, missing))
    }

    // -----------------------------------------------------------------------
    // Feedback, invalidation, maintenance
    // -----------------------------------------------------------------------

    /// Record a caller-reported outcome for every pack of the response with
    /// `trace_id`. Returns the number of cache entries updated.
    pub fn record_outcome(&self, trace_id: &str, outcome: PackOutcome) -> RecallResult<usize> {
        let now = self.now();
        let apply = |response: &mut CachedResponse| {
            if response.trace_id != trace_id {
                return false;
            }
            for pack in &mut response.packs {
                pack.record_outcome(outcome);
            }
            true
        };
        let updated =
            self.responses.update_where(now, apply)? + self.semantic.update_where(now, apply)?;
        info!(trace_id, outcome = outcome.as_str(), updated, "recorded pack outcome");
        Ok(updated)
    }

    /// Evict every cached response whose packs depend on one of `paths`.
    pub fn invalidate_files(&self, paths: &[String]) -> usize {
        let changed: Vec<String> = paths
            .iter()
            .filter_map(|p| relative_to_root(p, &self.workspace_root))
            .filter(|p| !p.is_empty())
            .collect();
        if changed.is_empty() {
            return 0;
        }
        let affected = |response: &CachedResponse| {
            response
                .packs
                .iter()
                .any(|pack| changed.iter().any(|path| pack.is_triggered_by(path)))
        };
        let evicted =
            self.responses.evict_where(self.now(), affected) + self.semantic.evict_where(affected);
        info!(files = changed.len(), evicted, "invalidated cached responses");
        evicted
    }

    pub fn clear(&self) -> RecallResult<()> {
        self.responses.clear()?;
        self.semantic.clear();
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            responses: self.responses.stats(),
            semantic: self.semantic.stats(),
            in_flight: self.in_flight.lock().len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Response assembly
// ---------------------------------------------------------------------------

fn absolute_root(root: PathBuf) -> PathBuf {
    if root.is_absolute() {
        return root;
    }
    match std::path::absolute(&root) {
        Ok(absolute) => absolute,
        Err(e) => {
            warn!("Cannot resolve workspace root {}: {e}", root.display());
            root
        }
    }
}

/// Point a cached response at the query reading it. Scope disclosures follow
/// the reader; cache-origin markers stay.
fn rebind_to_scope(response: &mut CachedResponse, scope: &NormalizedScope) {
    response.query = scope.query.clone();
    let mut disclosures = scope.disclosures.clone();
    for disclosure in response.disclosures.drain(..) {
        if disclosure != DISCLOSURE_SCOPE_AUTO_DETECTED && !disclosures.contains(&disclosure) {
            disclosures.push(disclosure);
        }
    }
    response.disclosures = disclosures;
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn assemble_response(
    scope: &NormalizedScope,
    version: Version,
    packs: Vec<ContextPack>,
    ranking: Option<&Ranking>,
    missing_packs: &[String],
) -> CachedResponse {
    let total_confidence = if packs.is_empty() {
        0.0
    } else {
        packs.iter().map(|p| p.confidence).sum::<f64>() / packs.len() as f64
    };

    let depth = scope.query.depth.unwrap_or(QueryDepth::L1);
    let drill_down_hints = match depth.deeper() {
        Some(next) => packs
            .iter()
            .take(DRILL_DOWN_HINT_LIMIT)
            .map(|p| format!("{}: re-query at {} for more detail", p.target_id, next.as_str()))
            .collect(),
        None => Vec::new(),
    };

    let mut coverage_gaps = Vec::new();
    let explanation = match ranking {
        None => {
            coverage_gaps.push("no candidates retrieved for this intent and scope".to_string());
            "No indexed entities matched the query.".to_string()
        }
        Some(ranking) => {
            if ranking.missing_metrics > 0 {
                coverage_gaps.push(format!(
                    "graph metrics missing for {} of {} candidates",
                    ranking.missing_metrics, ranking.candidate_count
                ));
            }
            coverage_gaps.extend(
                missing_packs
                    .iter()
                    .map(|id| format!("no context pack for {id}")),
            );
            match ranking.ranked.first() {
                Some(best) => format!(
                    "Ranked {} candidates; top match {} (similarity {:.3}).",
                    ranking.candidate_count, best.entity_id, best.similarity
                ),
                None => "No indexed entities matched the query.".to_string(),
            }
        }
    };

    CachedResponse {
        query: scope.query.clone(),
        packs,
        disclosures: scope.disclosures.clone(),
        trace_id: uuid::Uuid::new_v4().to_string(),
        total_confidence,
        cache_hit: false,
        latency_ms: 0.0,
        version,
        drill_down_hints,
        explanation,
        coverage_gaps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{BootstrapStatus, StaticIndex};
    use crate::models::{CandidateSource, CentralityMetrics, EntityType};
    use chrono::TimeZone;

    fn version() -> Version {
        Version {
            major: 2,
            minor: 1,
            patch: 0,
            string: "2.1.0".into(),
            quality_tier: "full".into(),
            indexed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            indexer_version: "idx-7".into(),
            features: vec!["graph".into()],
        }
    }

    fn fixed_clock() -> Clock {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        Arc::new(move || now)
    }

    fn index() -> StaticIndex {
        StaticIndex::new(version())
            .with_candidate(
                SimilarityResult::new("func:src/auth/login.ts#login", EntityType::Function, 0.9, CandidateSource::Semantic)
                    .with_source_text("export function login()"),
            )
            .with_candidate(SimilarityResult::new(
                "type:AuthSession",
                EntityType::Type,
                0.6,
                CandidateSource::Graph,
            ))
            .with_metrics(
                "type:AuthSession",
                CentralityMetrics {
                    pagerank: 0.4,
                    ..CentralityMetrics::default()
                },
            )
    }

    fn engine(backend: StaticIndex) -> (QueryEngine, Arc<StaticIndex>) {
        let backend = Arc::new(backend);
        let engine = QueryEngine::new(EngineConfig::default(), "/work/repo", backend.clone())
            .with_clock(fixed_clock());
        (engine, backend)
    }

    #[test]
    fn test_miss_then_hit() {
        let (engine, backend) = engine(index());
        let first = engine.answer(Query::new("how does login work").with_depth(QueryDepth::L1)).unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.packs.len(), 2);
        assert_eq!(first.packs[0].access_count, 1);

        let second = engine.answer(Query::new("how does login work").with_depth(QueryDepth::L1)).unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.trace_id, first.trace_id);
        assert_eq!(second.packs[0].access_count, 2);
        assert_eq!(backend.retrieval_count(), 1);
    }

    #[test]
    fn test_no_candidates_yields_gap() {
        let (engine, _) = engine(StaticIndex::new(version()));
        let response = engine.answer(Query::new("billing")).unwrap();
        assert!(response.packs.is_empty());
        assert_eq!(response.total_confidence, 0.0);
        assert_eq!(response.coverage_gaps.len(), 1);
        assert_eq!(engine.stats().semantic.entries, 0);
    }

    #[test]
    fn test_bootstrap_required_is_surfaced() {
        let backend = index();
        backend.set_bootstrap_status(BootstrapStatus::required("no index on disk"));
        let (engine, _) = engine(backend);
        let err = engine.answer(Query::new("login")).unwrap_err();
        assert!(matches!(err, RecallError::BootstrapRequired { reason } if reason == "no index on disk"));
    }

    #[test]
    fn test_ranking_and_metric_gaps() {
        let (engine, _) = engine(index());
        let response = engine.answer(Query::new("session handling")).unwrap();
        assert_eq!(response.packs[0].target_id, "func:src/auth/login.ts#login");
        assert!(response
            .coverage_gaps
            .iter()
            .any(|g| g == "graph metrics missing for 1 of 2 candidates"));
        assert!(response.explanation.contains("Ranked 2 candidates"));
    }

    #[test]
    fn test_in_flight_map_is_pruned() {
        let (engine, _) = engine(index());
        engine.answer(Query::new("login")).unwrap();
        assert_eq!(engine.stats().in_flight, 0);
    }

    #[test]
    fn test_drill_down_hints_follow_depth() {
        let (engine, _) = engine(index());
        let shallow = engine.answer(Query::new("login").with_depth(QueryDepth::L0)).unwrap();
        assert!(shallow.drill_down_hints.iter().all(|h| h.contains("L1")));
        let deep = engine.answer(Query::new("login").with_depth(QueryDepth::L2)).unwrap();
        assert!(deep.drill_down_hints.is_empty());
    }
}
