//! Multi-signal candidate scoring with batch-relative normalization.
//!
//! Each candidate's raw score is a weighted sum of its retrieval similarity,
//! graph importance, confidence, recency, and co-change signals. Raw scores
//! are then min-max scaled across the batch, so a `score` only means
//! something relative to the other candidates it was computed with.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::Deserialize;

use crate::models::{
    clamp_unit, CandidateSource, CentralityMetrics, ScoredCandidate, SimilarityResult,
};
use crate::query::guards::PARALLEL_SCORING_THRESHOLD;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Non-negative weights for each scoring dimension. They need not sum to 1.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringWeights {
    /// Applied to `max(semantic, graph)` similarity.
    pub semantic: f64,
    pub pagerank: f64,
    pub centrality: f64,
    pub confidence: f64,
    pub recency: f64,
    pub cochange: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            pagerank: 0.1,
            centrality: 0.1,
            confidence: 0.15,
            recency: 0.1,
            cochange: 0.05,
        }
    }
}

impl ScoringWeights {
    /// Rank by combined similarity alone.
    pub fn semantic_only() -> Self {
        Self {
            semantic: 1.0,
            pagerank: 0.0,
            centrality: 0.0,
            confidence: 0.0,
            recency: 0.0,
            cochange: 0.0,
        }
    }

    fn sanitized(&self) -> Self {
        let clean = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        Self {
            semantic: clean(self.semantic),
            pagerank: clean(self.pagerank),
            centrality: clean(self.centrality),
            confidence: clean(self.confidence),
            recency: clean(self.recency),
            cochange: clean(self.cochange),
        }
    }
}

/// Recency decay parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecencyPolicy {
    pub half_life_days: f64,
    /// Returned unchanged when a candidate has no timestamp.
    pub default_recency: f64,
}

impl Default for RecencyPolicy {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            default_recency: 0.5,
        }
    }
}

/// Raw signals for one candidate, gathered before scoring.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateSignals {
    pub candidate: SimilarityResult,
    pub semantic_similarity: f64,
    pub graph_similarity: f64,
    pub metrics: Option<CentralityMetrics>,
    pub confidence: f64,
    pub modified_at: Option<DateTime<Utc>>,
    pub cochange: Option<f64>,
}

impl CandidateSignals {
    /// Seed signals from a single retrieval hit, filing its similarity under
    /// the modality that produced it.
    pub fn from_candidate(candidate: SimilarityResult) -> Self {
        let (semantic, graph) = match candidate.source {
            CandidateSource::Graph => (0.0, candidate.similarity),
            _ => (candidate.similarity, 0.0),
        };
        Self {
            candidate,
            semantic_similarity: semantic,
            graph_similarity: graph,
            metrics: None,
            confidence: 0.0,
            modified_at: None,
            cochange: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Signal helpers
// ---------------------------------------------------------------------------

/// The better of the two retrieval signals.
pub fn combined_similarity(semantic: f64, graph: f64) -> f64 {
    clamp_unit(semantic).max(clamp_unit(graph))
}

/// Mean of betweenness, closeness, and eigenvector centrality. PageRank is a
/// separate weighted dimension and is not part of this mean.
pub fn compute_centrality(metrics: &CentralityMetrics) -> f64 {
    let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
    (finite(metrics.betweenness) + finite(metrics.closeness) + finite(metrics.eigenvector)) / 3.0
}

/// Exponential recency decay: `exp(-age_days / half_life_days)`.
///
/// Missing timestamps yield `default_recency`. Timestamps in the future are
/// treated as age zero.
pub fn compute_recency(
    timestamp: Option<DateTime<Utc>>,
    default_recency: f64,
    half_life_days: f64,
    now: DateTime<Utc>,
) -> f64 {
    let Some(timestamp) = timestamp else {
        return default_recency;
    };
    if !half_life_days.is_finite() || half_life_days <= 0.0 {
        return default_recency;
    }
    let age_days = ((now - timestamp).num_milliseconds() as f64 / MILLIS_PER_DAY).max(0.0);
    (-age_days / half_life_days).exp()
}

fn score_one(
    signals: &CandidateSignals,
    weights: &ScoringWeights,
    policy: RecencyPolicy,
    now: DateTime<Utc>,
) -> ScoredCandidate {
    let combined = combined_similarity(signals.semantic_similarity, signals.graph_similarity);
    let (pagerank, centrality) = match &signals.metrics {
        Some(metrics) => {
            let pr = if metrics.pagerank.is_finite() {
                metrics.pagerank.max(0.0)
            } else {
                0.0
            };
            (pr, compute_centrality(metrics))
        }
        None => (0.0, 0.0),
    };
    let confidence = clamp_unit(signals.confidence);
    let recency = compute_recency(
        signals.modified_at,
        policy.default_recency,
        policy.half_life_days,
        now,
    );
    let cochange = signals.cochange.map(clamp_unit).unwrap_or(0.0);

    let raw_score = weights.semantic * combined
        + weights.pagerank * pagerank
        + weights.centrality * centrality
        + weights.confidence * confidence
        + weights.recency * recency
        + weights.cochange * cochange;

    ScoredCandidate {
        candidate: signals.candidate.clone(),
        combined_similarity: combined,
        pagerank,
        centrality,
        confidence,
        recency,
        cochange,
        raw_score,
        score: 0.0,
    }
}

// ---------------------------------------------------------------------------
// Candidate merging
// ---------------------------------------------------------------------------

/// Collapse a retrieval batch to one entry per entity id, in first-seen order.
///
/// Graph-sourced hits feed `graph_similarity`; every other source feeds
/// `semantic_similarity`. Each keeps the best value seen.
pub fn merge_candidates(batch: Vec<SimilarityResult>) -> Vec<CandidateSignals> {
    let mut merged: IndexMap<String, CandidateSignals> = IndexMap::with_capacity(batch.len());
    for candidate in batch {
        let Some(existing) = merged.get_mut(&candidate.entity_id) else {
            merged.insert(
                candidate.entity_id.clone(),
                CandidateSignals::from_candidate(candidate),
            );
            continue;
        };
        match candidate.source {
            CandidateSource::Graph => {
                existing.graph_similarity = existing.graph_similarity.max(candidate.similarity);
            }
            _ => {
                existing.semantic_similarity =
                    existing.semantic_similarity.max(candidate.similarity);
            }
        }
        if existing.candidate.source_text.is_empty() && !candidate.source_text.is_empty() {
            existing.candidate.source_text = candidate.source_text;
        }
        if candidate.similarity > existing.candidate.similarity {
            existing.candidate.similarity = candidate.similarity;
        }
    }
    merged.into_values().collect()
}

// ---------------------------------------------------------------------------
// Batch scoring
// ---------------------------------------------------------------------------

/// Score a batch and min-max normalize it.
///
/// When every raw score in the batch is equal the whole batch gets `1.0` if
/// that value is positive and `0.0` otherwise. Output is ordered by
/// descending score, ties keeping input order.
pub fn score_candidates(
    batch: &[CandidateSignals],
    weights: &ScoringWeights,
    policy: RecencyPolicy,
    now: DateTime<Utc>,
) -> Vec<ScoredCandidate> {
    if batch.is_empty() {
        return Vec::new();
    }
    let weights = weights.sanitized();

    let mut scored: Vec<ScoredCandidate> = if batch.len() >= PARALLEL_SCORING_THRESHOLD {
        batch
            .par_iter()
            .map(|signals| score_one(signals, &weights, policy, now))
            .collect()
    } else {
        batch
            .iter()
            .map(|signals| score_one(signals, &weights, policy, now))
            .collect()
    };

    let (min, max) = scored
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
            (lo.min(s.raw_score), hi.max(s.raw_score))
        });
    let span = max - min;
    for candidate in &mut scored {
        candidate.score = if span <= f64::EPSILON {
            if max > 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            clamp_unit((candidate.raw_score - min) / span)
        };
    }

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}
