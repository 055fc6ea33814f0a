//! Engine configuration: TOML file with environment overrides.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{RecallError, RecallResult};
use crate::models::QueryDepth;
use crate::query::guards::{clamp_limit, MAX_CANDIDATES_PER_BATCH};
use crate::query::scoring::ScoringWeights;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub scoring: ScoringConfig,
    pub bias: BiasConfig,
    pub cache: CacheConfig,
    pub semantic: SemanticConfig,
    pub limits: LimitsConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    pub half_life_days: f64,
    pub default_recency: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            half_life_days: 30.0,
            default_recency: 0.5,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BiasConfig {
    pub document_boost: f64,
    pub definition_boost: f64,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            document_boost: 0.3,
            definition_boost: 0.25,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub l1_ttl_secs: u64,
    pub l2_ttl_secs: u64,
    pub l1_max_entries: usize,
    pub l2_max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_ttl_secs: 300,
            l2_ttl_secs: 3600,
            l1_max_entries: 256,
            l2_max_entries: 1024,
        }
    }
}

impl CacheConfig {
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_secs.max(1))
    }

    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_secs.max(1))
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SemanticConfig {
    pub enabled: bool,
    /// Minimum intent similarity for reusing a cached response.
    pub threshold: f64,
    pub ttl_secs: u64,
    pub max_entries_per_partition: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.8,
            ttl_secs: 1800,
            max_entries_per_partition: 64,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    pub l0_packs: usize,
    pub l1_packs: usize,
    pub l2_packs: usize,
    /// Candidates requested from retrieval per query.
    pub max_candidates: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            l0_packs: 3,
            l1_packs: 8,
            l2_packs: 16,
            max_candidates: 200,
        }
    }
}

impl LimitsConfig {
    pub fn packs_for(&self, depth: Option<QueryDepth>) -> usize {
        match depth {
            Some(QueryDepth::L0) => self.l0_packs,
            Some(QueryDepth::L1) | None => self.l1_packs,
            Some(QueryDepth::L2) => self.l2_packs,
        }
        .max(1)
    }

    /// Retrieval limit, clamped to the per-batch guard.
    pub fn candidate_limit(&self) -> usize {
        let requested = i64::try_from(self.max_candidates).unwrap_or(i64::MAX);
        clamp_limit(requested, MAX_CANDIDATES_PER_BATCH as i64) as usize
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> RecallResult<Self> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> RecallResult<Self> {
        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&raw)?.with_env_overrides())
    }

    /// Apply `RECALL_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `RECALL_*` overrides read through `lookup`. Unparseable values
    /// are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("RECALL_SEMANTIC_CACHE") {
            let v = val.trim().to_lowercase();
            self.semantic.enabled = !matches!(v.as_str(), "0" | "false" | "no" | "off");
        }
        if let Some(threshold) = parse_override::<f64>(&lookup, "RECALL_SEMANTIC_THRESHOLD") {
            if threshold.is_finite() {
                self.semantic.threshold = threshold.clamp(0.0, 1.0);
            }
        }
        if let Some(ttl) = parse_override::<u64>(&lookup, "RECALL_L1_TTL_SECS") {
            self.cache.l1_ttl_secs = ttl;
        }
        if let Some(ttl) = parse_override::<u64>(&lookup, "RECALL_L2_TTL_SECS") {
            self.cache.l2_ttl_secs = ttl;
        }
        self
    }

    pub fn validate(&self) -> RecallResult<()> {
        let w = &self.scoring.weights;
        let weights = [
            ("semantic", w.semantic),
            ("pagerank", w.pagerank),
            ("centrality", w.centrality),
            ("confidence", w.confidence),
            ("recency", w.recency),
            ("cochange", w.cochange),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(RecallError::Config(format!(
                    "scoring weight `{name}` must be a non-negative number, got {value}"
                )));
            }
        }
        let half_life = self.scoring.half_life_days;
        if !half_life.is_finite() || half_life <= 0.0 {
            return Err(RecallError::Config(
                "scoring.half_life_days must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("bias.document_boost", self.bias.document_boost),
            ("bias.definition_boost", self.bias.definition_boost),
            ("semantic.threshold", self.semantic.threshold),
            ("scoring.default_recency", self.scoring.default_recency),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RecallError::Config(format!(
                    "{name} must lie within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}
