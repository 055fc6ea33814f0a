//! Criterion benchmarks for recall-core.
//!
//! ## Benchmark groups
//!
//! 1. **scoring** — Batch scoring across sequential and parallel batch sizes.
//! 2. **bias** — Document and definition bias passes.
//! 3. **intent** — Classification, normalization, and similarity.
//! 4. **codec** — Cache payload encode/decode.
//! 5. **engine** — Full query cycles, cold and warm.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/recall-core/Cargo.toml
//! # Run only the engine group:
//! cargo bench --manifest-path crates/recall-core/Cargo.toml -- engine
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use recall_core::cache::{
    compute_intent_similarity, deserialize_response, normalize_intent, serialize_response,
};
use recall_core::cache::intent::classify_category;
use recall_core::models::{
    CandidateSource, CentralityMetrics, ContextPack, EntityType, SimilarityResult,
};
use recall_core::query::bias::{apply_definition_bias, apply_document_bias};
use recall_core::query::scoring::{
    score_candidates, CandidateSignals, RecencyPolicy, ScoringWeights,
};
use recall_core::{EngineConfig, Query, QueryDepth, QueryEngine, StaticIndex, Version};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn version() -> Version {
    Version {
        major: 1,
        minor: 4,
        patch: 2,
        string: "1.4.2".into(),
        quality_tier: "full".into(),
        indexed_at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
        indexer_version: "bench".into(),
        features: vec!["graph".into()],
    }
}

fn candidate(i: usize) -> SimilarityResult {
    let (prefix, kind) = match i % 4 {
        0 => ("func", EntityType::Function),
        1 => ("type", EntityType::Type),
        2 => ("mod", EntityType::Module),
        _ => ("doc", EntityType::Document),
    };
    let source = if i % 3 == 0 {
        CandidateSource::Graph
    } else {
        CandidateSource::Semantic
    };
    SimilarityResult::new(
        format!("{prefix}:src/pkg{}/file{i}.ts#sym{i}", i / 16),
        kind,
        ((i * 37) % 100) as f64 / 100.0,
        source,
    )
    .with_source_text(format!("export function sym{i}() {{}}"))
}

fn signals(n: usize) -> Vec<CandidateSignals> {
    let now = Utc::now();
    (0..n)
        .map(|i| {
            let mut s = CandidateSignals::from_candidate(candidate(i));
            s.confidence = (i % 10) as f64 / 10.0;
            s.modified_at = Some(now - chrono::Duration::days((i % 90) as i64));
            s.metrics = Some(CentralityMetrics {
                betweenness: (i % 7) as f64 / 7.0,
                closeness: (i % 5) as f64 / 5.0,
                eigenvector: (i % 3) as f64 / 3.0,
                pagerank: (i % 11) as f64 / 11.0,
                ..CentralityMetrics::default()
            });
            s
        })
        .collect()
}

fn bench_index(n: usize) -> StaticIndex {
    let mut index = StaticIndex::new(version());
    for i in 0..n {
        index = index.with_candidate(candidate(i));
    }
    index
}

// ---------------------------------------------------------------------------
// 1. Scoring
// ---------------------------------------------------------------------------

fn bench_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoring");
    let weights = ScoringWeights::default();
    let now = Utc::now();
    for size in [32usize, 256, 2000] {
        let batch = signals(size);
        group.bench_with_input(BenchmarkId::new("score_candidates", size), &batch, |b, batch| {
            b.iter(|| score_candidates(black_box(batch), &weights, RecencyPolicy::default(), now))
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// 2. Bias
// ---------------------------------------------------------------------------

fn bench_bias(c: &mut Criterion) {
    let mut group = c.benchmark_group("bias");
    let results: Vec<SimilarityResult> = (0..500).map(candidate).collect();
    let names: HashMap<String, String> = results
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 2 == 0)
        .map(|(i, r)| (r.entity_id.clone(), format!("sym{i}")))
        .collect();

    group.bench_function("document_bias_500", |b| {
        b.iter(|| apply_document_bias(black_box(results.clone()), 0.3))
    });
    group.bench_function("definition_bias_500", |b| {
        b.iter(|| apply_definition_bias(black_box(results.clone()), 0.25, &names))
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// 3. Intent
// ---------------------------------------------------------------------------

fn bench_intent(c: &mut Criterion) {
    let mut group = c.benchmark_group("intent");
    group.bench_function("classify_lookup", |b| {
        b.iter(|| classify_category(black_box("where is the getStorage function implemented")))
    });
    group.bench_function("normalize_conceptual", |b| {
        b.iter(|| normalize_intent(black_box("How does the AUTH flow work across services?")))
    });
    group.bench_function("similarity_paraphrase", |b| {
        b.iter(|| {
            compute_intent_similarity(
                black_box("how does auth work"),
                black_box("explain authentication flow"),
            )
        })
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// 4. Codec
// ---------------------------------------------------------------------------

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let index = Arc::new(bench_index(64));
    let dir = std::env::temp_dir();
    let engine = QueryEngine::new(EngineConfig::default(), dir, index);
    let mut response = engine
        .answer(Query::new("how does the session store work").with_depth(QueryDepth::L2))
        .unwrap();
    for i in 0..4 {
        let mut pack = ContextPack::new(format!("extra-{i}"), "symbol", format!("func:x{i}"), Utc::now());
        pack.key_facts = (0..8).map(|f| format!("fact {f}")).collect();
        response.packs.push(pack);
    }
    let payload = serialize_response(&response).unwrap();

    group.bench_function("serialize", |b| {
        b.iter(|| serialize_response(black_box(&response)).unwrap())
    });
    group.bench_function("deserialize", |b| {
        b.iter(|| deserialize_response(black_box(&payload)).unwrap())
    });
    group.bench_function("deserialize_garbage", |b| {
        b.iter(|| deserialize_response(black_box("{\"schema\":1,\"response\":{}}")))
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// 5. Engine
// ---------------------------------------------------------------------------

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    let dir = std::env::temp_dir();

    for size in [100usize, 1000] {
        let index = Arc::new(bench_index(size));
        group.bench_with_input(BenchmarkId::new("cold_answer", size), &size, |b, _| {
            let engine = QueryEngine::new(EngineConfig::default(), dir.clone(), index.clone());
            b.iter(|| {
                engine.clear().unwrap();
                engine.answer(black_box(Query::new("session store lifecycle"))).unwrap()
            })
        });
        group.bench_with_input(BenchmarkId::new("warm_answer", size), &size, |b, _| {
            let engine = QueryEngine::new(EngineConfig::default(), dir.clone(), index.clone());
            engine.answer(Query::new("session store lifecycle")).unwrap();
            b.iter(|| engine.answer(black_box(Query::new("session store lifecycle"))).unwrap())
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_scoring,
    bench_bias,
    bench_intent,
    bench_codec,
    bench_engine,
);
criterion_main!(benches);
