//! Shared typed models used across scoping, scoring, and caching layers.

use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Contract constants
// ---------------------------------------------------------------------------

/// Disclosure appended when the scope was inferred from `working_file`.
pub const DISCLOSURE_SCOPE_AUTO_DETECTED: &str = "scope_auto_detected";

/// Disclosure appended when a paraphrased intent was served from the semantic cache.
pub const DISCLOSURE_SEMANTIC_CACHE_MATCH: &str = "semantic_cache_match";

// ---------------------------------------------------------------------------
// 1. Query
// ---------------------------------------------------------------------------

/// Query granularity tier. Drives cache tier, TTL, and retrieval breadth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryDepth {
    L0,
    L1,
    L2,
}

impl QueryDepth {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryDepth::L0 => "L0",
            QueryDepth::L1 => "L1",
            QueryDepth::L2 => "L2",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "L0" => Some(QueryDepth::L0),
            "L1" => Some(QueryDepth::L1),
            "L2" => Some(QueryDepth::L2),
            _ => None,
        }
    }

    /// The next deeper tier, if any.
    pub fn deeper(self) -> Option<Self> {
        match self {
            QueryDepth::L0 => Some(QueryDepth::L1),
            QueryDepth::L1 => Some(QueryDepth::L2),
            QueryDepth::L2 => None,
        }
    }
}

/// Optional narrowing filters attached to a query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub path_prefix: Option<String>,
    pub language: Option<String>,
}

/// A natural-language intent query. Treated as immutable once issued;
/// normalization produces a rewritten copy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    pub intent: String,
    pub depth: Option<QueryDepth>,
    pub task_type: Option<String>,
    pub working_file: Option<String>,
    pub affected_files: Option<Vec<String>>,
    pub filter: Option<QueryFilter>,
}

impl Query {
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            ..Self::default()
        }
    }

    pub fn with_depth(mut self, depth: QueryDepth) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_working_file(mut self, working_file: impl Into<String>) -> Self {
        self.working_file = Some(working_file.into());
        self
    }

    pub fn with_affected_files(mut self, files: Vec<String>) -> Self {
        self.affected_files = Some(files);
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filter.get_or_insert_with(QueryFilter::default).path_prefix = Some(prefix.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.filter.get_or_insert_with(QueryFilter::default).language = Some(language.into());
        self
    }

    pub fn path_prefix(&self) -> Option<&str> {
        self.filter.as_ref().and_then(|f| f.path_prefix.as_deref())
    }

    pub fn language(&self) -> Option<&str> {
        self.filter.as_ref().and_then(|f| f.language.as_deref())
    }
}

// ---------------------------------------------------------------------------
// 2. Candidates
// ---------------------------------------------------------------------------

/// Kind of indexed entity a candidate refers to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityType {
    Function,
    Type,
    Module,
    Document,
    Other(String),
}

impl EntityType {
    pub fn parse(value: &str) -> Self {
        match value {
            "function" => EntityType::Function,
            "type" => EntityType::Type,
            "module" => EntityType::Module,
            "document" => EntityType::Document,
            other => EntityType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Function => "function",
            EntityType::Type => "type",
            EntityType::Module => "module",
            EntityType::Document => "document",
            EntityType::Other(other) => other.as_str(),
        }
    }
}

/// The retrieval modality that produced a candidate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CandidateSource {
    Semantic,
    Graph,
    Other(String),
}

impl CandidateSource {
    pub fn parse(value: &str) -> Self {
        match value {
            "semantic" => CandidateSource::Semantic,
            "graph" => CandidateSource::Graph,
            other => CandidateSource::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CandidateSource::Semantic => "semantic",
            CandidateSource::Graph => "graph",
            CandidateSource::Other(other) => other.as_str(),
        }
    }
}

/// A retrieved candidate. `entity_id` has the form `<kind>:<locator>`.
#[derive(Clone, Debug, PartialEq)]
pub struct SimilarityResult {
    pub entity_id: String,
    pub entity_type: EntityType,
    /// Always within `[0, 1]`.
    pub similarity: f64,
    pub source_text: String,
    pub source: CandidateSource,
}

impl SimilarityResult {
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        similarity: f64,
        source: CandidateSource,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
            similarity: clamp_unit(similarity),
            source_text: String::new(),
            source,
        }
    }

    pub fn with_source_text(mut self, text: impl Into<String>) -> Self {
        self.source_text = text.into();
        self
    }
}

/// Split an entity id into its kind prefix and locator.
///
/// `"func:src/a.ts#run"` → `(Some("func"), "src/a.ts#run")`. Ids without a
/// recognizable prefix return `(None, id)`.
pub fn split_entity_id(entity_id: &str) -> (Option<&str>, &str) {
    match entity_id.split_once(':') {
        Some((kind, locator))
            if !kind.is_empty() && kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            (Some(kind), locator)
        }
        _ => (None, entity_id),
    }
}

/// Graph centrality metrics for one entity, read-only input to scoring.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CentralityMetrics {
    pub betweenness: f64,
    pub closeness: f64,
    pub eigenvector: f64,
    pub pagerank: f64,
    pub in_degree: u32,
    pub out_degree: u32,
    pub total_degree: u32,
    pub community_id: Option<u32>,
}

/// Per-entity metadata supplied by the index alongside candidates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityMeta {
    pub display_name: Option<String>,
    pub confidence: Option<f64>,
    pub modified_at: Option<DateTime<Utc>>,
    pub cochange: Option<f64>,
}

/// A candidate with its derived scoring signals. `score` is relative to the
/// batch it was computed in.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: SimilarityResult,
    pub combined_similarity: f64,
    pub pagerank: f64,
    pub centrality: f64,
    pub confidence: f64,
    pub recency: f64,
    pub cochange: f64,
    pub raw_score: f64,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// 3. Context packs and responses
// ---------------------------------------------------------------------------

/// A code fragment attached to a context pack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeSnippet {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
}

/// Outcome reported by a caller after using a pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackOutcome {
    Success,
    Failure,
}

impl PackOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PackOutcome::Success => "success",
            PackOutcome::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(PackOutcome::Success),
            "failure" => Some(PackOutcome::Failure),
            _ => None,
        }
    }
}

/// A cached, reusable knowledge artifact about a code entity.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextPack {
    pub pack_id: String,
    pub pack_type: String,
    pub target_id: String,
    pub summary: String,
    pub key_facts: Vec<String>,
    pub code_snippets: Vec<CodeSnippet>,
    pub related_files: Vec<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub access_count: u64,
    pub last_outcome: Option<PackOutcome>,
    pub success_count: u64,
    pub failure_count: u64,
    pub version: u32,
    pub invalidation_triggers: Vec<String>,
}

impl ContextPack {
    pub fn new(
        pack_id: impl Into<String>,
        pack_type: impl Into<String>,
        target_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pack_id: pack_id.into(),
            pack_type: pack_type.into(),
            target_id: target_id.into(),
            summary: String::new(),
            key_facts: Vec::new(),
            code_snippets: Vec::new(),
            related_files: Vec::new(),
            confidence: 0.0,
            created_at,
            access_count: 0,
            last_outcome: None,
            success_count: 0,
            failure_count: 0,
            version: 1,
            invalidation_triggers: Vec::new(),
        }
    }

    pub fn record_outcome(&mut self, outcome: PackOutcome) {
        match outcome {
            PackOutcome::Success => self.success_count += 1,
            PackOutcome::Failure => self.failure_count += 1,
        }
        self.last_outcome = Some(outcome);
    }

    /// True when a change to `path` should invalidate this pack.
    pub fn is_triggered_by(&self, path: &str) -> bool {
        let path = path.trim_start_matches("./");
        self.invalidation_triggers
            .iter()
            .chain(self.related_files.iter())
            .any(|trigger| {
                let trigger = trigger.trim_start_matches("./");
                trigger == path || (trigger.ends_with('/') && path.starts_with(trigger))
            })
    }
}

/// Index version stamped onto every response for staleness detection.
#[derive(Clone, Debug, PartialEq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub string: String,
    pub quality_tier: String,
    pub indexed_at: DateTime<Utc>,
    pub indexer_version: String,
    pub features: Vec<String>,
}

impl Version {
    /// Token used to partition cache keys by index generation.
    pub fn cache_token(&self) -> String {
        format!("{}@{}", self.string, self.indexed_at.timestamp_millis())
    }
}

/// A fully assembled answer to one query cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedResponse {
    pub query: Query,
    pub packs: Vec<ContextPack>,
    pub disclosures: Vec<String>,
    pub trace_id: String,
    pub total_confidence: f64,
    pub cache_hit: bool,
    pub latency_ms: f64,
    pub version: Version,
    pub drill_down_hints: Vec<String>,
    pub explanation: String,
    pub coverage_gaps: Vec<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Clamp a value into `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
