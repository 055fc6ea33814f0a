use std::collections::HashMap;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use recall_core::models::{CandidateSource, CentralityMetrics, EntityType, SimilarityResult};
use recall_core::query::bias::{apply_definition_bias, apply_document_bias};
use recall_core::query::scoring::{
    compute_recency, score_candidates, CandidateSignals, RecencyPolicy, ScoringWeights,
};

fn entity_type(kind: u8) -> EntityType {
    match kind % 4 {
        0 => EntityType::Function,
        1 => EntityType::Type,
        2 => EntityType::Module,
        _ => EntityType::Document,
    }
}

fn prefix(kind: u8) -> &'static str {
    match kind % 4 {
        0 => "func",
        1 => "type",
        2 => "mod",
        _ => "doc",
    }
}

fn results(raw: &[(u8, f64)]) -> Vec<SimilarityResult> {
    raw.iter()
        .enumerate()
        .map(|(i, (kind, similarity))| {
            SimilarityResult::new(
                format!("{}:src/e{i}.ts", prefix(*kind)),
                entity_type(*kind),
                *similarity,
                CandidateSource::Semantic,
            )
        })
        .collect()
}

fn weights() -> impl Strategy<Value = ScoringWeights> {
    (0.0..3.0f64, 0.0..3.0f64, 0.0..3.0f64, 0.0..3.0f64, 0.0..3.0f64, 0.0..3.0f64).prop_map(
        |(semantic, pagerank, centrality, confidence, recency, cochange)| ScoringWeights {
            semantic,
            pagerank,
            centrality,
            confidence,
            recency,
            cochange,
        },
    )
}

proptest! {
    #[test]
    fn scores_stay_in_unit_range(
        raw in prop::collection::vec((0.0..=1.0f64, 0.0..=1.0f64, 0.0..=1.0f64, 0.0..=1.0f64), 0..40),
        weights in weights(),
        age_days in 0i64..400,
    ) {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let batch: Vec<CandidateSignals> = raw
            .iter()
            .enumerate()
            .map(|(i, (semantic, graph, pagerank, confidence))| {
                let mut signals = CandidateSignals::from_candidate(SimilarityResult::new(
                    format!("func:f{i}"),
                    EntityType::Function,
                    *semantic,
                    CandidateSource::Semantic,
                ));
                signals.graph_similarity = *graph;
                signals.confidence = *confidence;
                signals.modified_at = Some(now - Duration::days(age_days));
                signals.metrics = Some(CentralityMetrics {
                    pagerank: *pagerank,
                    betweenness: *graph,
                    ..CentralityMetrics::default()
                });
                signals
            })
            .collect();
        let scored = score_candidates(&batch, &weights, RecencyPolicy::default(), now);
        prop_assert_eq!(scored.len(), batch.len());
        for candidate in &scored {
            prop_assert!((0.0..=1.0).contains(&candidate.score));
            prop_assert!((0.0..=1.0).contains(&candidate.candidate.similarity));
        }
        prop_assert!(scored.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn scoring_leaves_similarity_untouched(
        raw in prop::collection::vec(0.0..=1.0f64, 1..20),
    ) {
        let batch: Vec<CandidateSignals> = raw
            .iter()
            .enumerate()
            .map(|(i, s)| {
                CandidateSignals::from_candidate(SimilarityResult::new(
                    format!("func:f{i}"),
                    EntityType::Function,
                    *s,
                    CandidateSource::Semantic,
                ))
            })
            .collect();
        let scored = score_candidates(&batch, &ScoringWeights::default(), RecencyPolicy::default(), Utc::now());
        for candidate in scored {
            let original = batch
                .iter()
                .find(|b| b.candidate.entity_id == candidate.candidate.entity_id)
                .unwrap();
            prop_assert_eq!(candidate.candidate.similarity, original.candidate.similarity);
        }
    }

    #[test]
    fn recency_is_bounded(age_days in 0i64..10_000, half_life in 0.5..365.0f64) {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let recency = compute_recency(Some(now - Duration::days(age_days)), 0.5, half_life, now);
        prop_assert!((0.0..=1.0).contains(&recency));
    }

    #[test]
    fn bias_passes_stay_sorted_and_bounded(
        raw in prop::collection::vec((0u8..8, 0.0..=1.0f64), 0..30),
        document_boost in 0.0..=1.0f64,
        definition_boost in 0.0..=1.0f64,
        named in prop::collection::vec(any::<bool>(), 30),
    ) {
        let input = results(&raw);
        let names: HashMap<String, String> = input
            .iter()
            .zip(named.iter())
            .filter(|(_, named)| **named)
            .map(|(r, _)| (r.entity_id.clone(), "handler".to_string()))
            .collect();
        let biased = apply_document_bias(input.clone(), document_boost);
        prop_assert!(biased.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        let biased = apply_definition_bias(biased, definition_boost, &names);
        prop_assert_eq!(biased.len(), input.len());
        for result in &biased {
            prop_assert!((0.0..=1.0).contains(&result.similarity));
        }
        prop_assert!(biased.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }
}
