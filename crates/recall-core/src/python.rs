//! Python extension module `_recall_core`.

use chrono::{DateTime, Utc};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::wrap_pyfunction;

use crate::cache;
use crate::models::CentralityMetrics;
use crate::query::{bias, guards, scoring};

fn timestamp_from_millis(millis: i64) -> PyResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| PyValueError::new_err(format!("timestamp out of range: {millis}")))
}

#[pyfunction]
#[pyo3(signature = (modified_at_ms, default_recency, half_life_days, now_ms=None))]
fn compute_recency(
    modified_at_ms: Option<i64>,
    default_recency: f64,
    half_life_days: f64,
    now_ms: Option<i64>,
) -> PyResult<f64> {
    let timestamp = modified_at_ms.map(timestamp_from_millis).transpose()?;
    let now = match now_ms {
        Some(ms) => timestamp_from_millis(ms)?,
        None => Utc::now(),
    };
    Ok(scoring::compute_recency(
        timestamp,
        default_recency,
        half_life_days,
        now,
    ))
}

#[pyfunction]
fn compute_centrality(betweenness: f64, closeness: f64, eigenvector: f64) -> f64 {
    scoring::compute_centrality(&CentralityMetrics {
        betweenness,
        closeness,
        eigenvector,
        ..CentralityMetrics::default()
    })
}

#[pyfunction]
fn combined_similarity(semantic: f64, graph: f64) -> f64 {
    scoring::combined_similarity(semantic, graph)
}

#[pyfunction]
#[pyo3(signature = (entity_id, display_name=None))]
fn is_definition_entity(entity_id: &str, display_name: Option<&str>) -> bool {
    bias::is_definition_entity(entity_id, display_name)
}

#[pyfunction]
fn classify_intent(intent: &str) -> &'static str {
    cache::classify_category(intent).as_str()
}

#[pyfunction]
fn normalize_intent(intent: &str) -> String {
    cache::normalize_intent(intent)
}

#[pyfunction]
fn intent_similarity(a: &str, b: &str) -> f64 {
    cache::compute_intent_similarity(a, b)
}

/// True when `payload` decodes as a complete cached response.
#[pyfunction]
fn is_valid_cache_payload(payload: &str) -> bool {
    cache::deserialize_response(payload).is_some()
}

#[pyfunction]
fn truncate_intent(intent: &str) -> String {
    guards::truncate_intent(intent)
}

#[pyfunction]
fn clamp_limit(value: i64, maximum: i64) -> i64 {
    guards::clamp_limit(value, maximum)
}

#[pymodule]
#[pyo3(name = "_recall_core")]
fn recall_core_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("MAX_INTENT_LENGTH", guards::MAX_INTENT_LENGTH)?;
    m.add("MAX_CANDIDATES_PER_BATCH", guards::MAX_CANDIDATES_PER_BATCH)?;
    m.add("CACHE_SCHEMA_VERSION", cache::CACHE_SCHEMA_VERSION)?;
    m.add("DOCUMENT_BIAS_DAMPING", bias::DOCUMENT_BIAS_DAMPING)?;
    m.add("USAGE_PENALTY_FACTOR", bias::USAGE_PENALTY_FACTOR)?;

    // -- Scoring --------------------------------------------------------------
    m.add_function(wrap_pyfunction!(compute_recency, m)?)?;
    m.add_function(wrap_pyfunction!(compute_centrality, m)?)?;
    m.add_function(wrap_pyfunction!(combined_similarity, m)?)?;
    m.add_function(wrap_pyfunction!(is_definition_entity, m)?)?;

    // -- Intents and cache payloads --------------------------------------------
    m.add_function(wrap_pyfunction!(classify_intent, m)?)?;
    m.add_function(wrap_pyfunction!(normalize_intent, m)?)?;
    m.add_function(wrap_pyfunction!(intent_similarity, m)?)?;
    m.add_function(wrap_pyfunction!(is_valid_cache_payload, m)?)?;

    // -- Guards -----------------------------------------------------------------
    m.add_function(wrap_pyfunction!(truncate_intent, m)?)?;
    m.add_function(wrap_pyfunction!(clamp_limit, m)?)?;
    Ok(())
}
