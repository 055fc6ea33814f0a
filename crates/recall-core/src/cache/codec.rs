//! Versioned text encoding for cached responses.
//!
//! Responses are stored as a JSON envelope `{ "schema": N, "response": {...} }`
//! described by explicit wire structs. Decoding restores every timestamp and
//! rejects malformed or incomplete payloads by returning `None`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{RecallError, RecallResult};
use crate::models::{
    CachedResponse, CodeSnippet, ContextPack, PackOutcome, Query, QueryDepth, QueryFilter,
    Version,
};

/// Current cache payload schema version.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Wire schema (v1)
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct Envelope {
    schema: u32,
    response: WireResponse,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQuery {
    intent: String,
    #[serde(default)]
    depth: Option<String>,
    #[serde(default)]
    task_type: Option<String>,
    #[serde(default)]
    working_file: Option<String>,
    #[serde(default)]
    affected_files: Option<Vec<String>>,
    #[serde(default)]
    filter: Option<WireFilter>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSnippet {
    file_path: String,
    start_line: u32,
    end_line: u32,
    content: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePack {
    pack_id: String,
    pack_type: String,
    target_id: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    key_facts: Vec<String>,
    #[serde(default)]
    code_snippets: Vec<WireSnippet>,
    #[serde(default)]
    related_files: Vec<String>,
    confidence: f64,
    created_at: String,
    #[serde(default)]
    access_count: u64,
    #[serde(default)]
    last_outcome: Option<String>,
    #[serde(default)]
    success_count: u64,
    #[serde(default)]
    failure_count: u64,
    version: u32,
    #[serde(default)]
    invalidation_triggers: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVersion {
    major: u32,
    minor: u32,
    patch: u32,
    string: String,
    quality_tier: String,
    indexed_at: String,
    indexer_version: String,
    #[serde(default)]
    features: Vec<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    query: WireQuery,
    packs: Vec<WirePack>,
    #[serde(default)]
    disclosures: Vec<String>,
    trace_id: String,
    #[serde(default)]
    total_confidence: f64,
    #[serde(default)]
    cache_hit: bool,
    #[serde(default)]
    latency_ms: f64,
    version: WireVersion,
    #[serde(default)]
    drill_down_hints: Vec<String>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    coverage_gaps: Vec<String>,
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn encode_query(query: &Query) -> WireQuery {
    WireQuery {
        intent: query.intent.clone(),
        depth: query.depth.map(|d| d.as_str().to_string()),
        task_type: query.task_type.clone(),
        working_file: query.working_file.clone(),
        affected_files: query.affected_files.clone(),
        filter: query.filter.as_ref().map(|f| WireFilter {
            path_prefix: f.path_prefix.clone(),
            language: f.language.clone(),
        }),
    }
}

fn encode_pack(pack: &ContextPack) -> WirePack {
    WirePack {
        pack_id: pack.pack_id.clone(),
        pack_type: pack.pack_type.clone(),
        target_id: pack.target_id.clone(),
        summary: pack.summary.clone(),
        key_facts: pack.key_facts.clone(),
        code_snippets: pack
            .code_snippets
            .iter()
            .map(|s| WireSnippet {
                file_path: s.file_path.clone(),
                start_line: s.start_line,
                end_line: s.end_line,
                content: s.content.clone(),
            })
            .collect(),
        related_files: pack.related_files.clone(),
        confidence: finite(pack.confidence),
        created_at: encode_timestamp(&pack.created_at),
        access_count: pack.access_count,
        last_outcome: pack.last_outcome.map(|o| o.as_str().to_string()),
        success_count: pack.success_count,
        failure_count: pack.failure_count,
        version: pack.version,
        invalidation_triggers: pack.invalidation_triggers.clone(),
    }
}

/// Encode a response into its self-describing cache text.
pub fn serialize_response(response: &CachedResponse) -> RecallResult<String> {
    let version = &response.version;
    let envelope = Envelope {
        schema: CACHE_SCHEMA_VERSION,
        response: WireResponse {
            query: encode_query(&response.query),
            packs: response.packs.iter().map(encode_pack).collect(),
            disclosures: response.disclosures.clone(),
            trace_id: response.trace_id.clone(),
            total_confidence: finite(response.total_confidence),
            cache_hit: response.cache_hit,
            latency_ms: finite(response.latency_ms),
            version: WireVersion {
                major: version.major,
                minor: version.minor,
                patch: version.patch,
                string: version.string.clone(),
                quality_tier: version.quality_tier.clone(),
                indexed_at: encode_timestamp(&version.indexed_at),
                indexer_version: version.indexer_version.clone(),
                features: version.features.clone(),
            },
            drill_down_hints: response.drill_down_hints.clone(),
            explanation: response.explanation.clone(),
            coverage_gaps: response.coverage_gaps.clone(),
        },
    };
    Ok(serde_json::to_string(&envelope)?)
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

fn malformed(message: impl Into<String>) -> RecallError {
    RecallError::MalformedCacheEntry(message.into())
}

fn decode_timestamp(field: &str, raw: &str) -> RecallResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| malformed(format!("{field}: invalid timestamp {raw:?}: {e}")))
}

fn decode_query(wire: WireQuery) -> RecallResult<Query> {
    let depth = match wire.depth.as_deref() {
        Some(raw) => Some(
            QueryDepth::parse(raw).ok_or_else(|| malformed(format!("query.depth: {raw:?}")))?,
        ),
        None => None,
    };
    Ok(Query {
        intent: wire.intent,
        depth,
        task_type: wire.task_type,
        working_file: wire.working_file,
        affected_files: wire.affected_files,
        filter: wire.filter.map(|f| QueryFilter {
            path_prefix: f.path_prefix,
            language: f.language,
        }),
    })
}

fn decode_pack(wire: WirePack) -> RecallResult<ContextPack> {
    let last_outcome = match wire.last_outcome.as_deref() {
        Some(raw) => Some(
            PackOutcome::parse(raw)
                .ok_or_else(|| malformed(format!("pack.lastOutcome: {raw:?}")))?,
        ),
        None => None,
    };
    Ok(ContextPack {
        created_at: decode_timestamp("pack.createdAt", &wire.created_at)?,
        pack_id: wire.pack_id,
        pack_type: wire.pack_type,
        target_id: wire.target_id,
        summary: wire.summary,
        key_facts: wire.key_facts,
        code_snippets: wire
            .code_snippets
            .into_iter()
            .map(|s| CodeSnippet {
                file_path: s.file_path,
                start_line: s.start_line,
                end_line: s.end_line,
                content: s.content,
            })
            .collect(),
        related_files: wire.related_files,
        confidence: wire.confidence,
        access_count: wire.access_count,
        last_outcome,
        success_count: wire.success_count,
        failure_count: wire.failure_count,
        version: wire.version,
        invalidation_triggers: wire.invalidation_triggers,
    })
}

/// Decode cache text, reporting why a payload was rejected.
pub fn decode_response(text: &str) -> RecallResult<CachedResponse> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| malformed(format!("envelope: {e}")))?;
    if envelope.schema != CACHE_SCHEMA_VERSION {
        return Err(malformed(format!(
            "unsupported schema version {}",
            envelope.schema
        )));
    }
    let wire = envelope.response;
    let v = wire.version;
    let version = Version {
        indexed_at: decode_timestamp("version.indexedAt", &v.indexed_at)?,
        major: v.major,
        minor: v.minor,
        patch: v.patch,
        string: v.string,
        quality_tier: v.quality_tier,
        indexer_version: v.indexer_version,
        features: v.features,
    };
    let packs = wire
        .packs
        .into_iter()
        .map(decode_pack)
        .collect::<RecallResult<Vec<_>>>()?;
    Ok(CachedResponse {
        query: decode_query(wire.query)?,
        packs,
        disclosures: wire.disclosures,
        trace_id: wire.trace_id,
        total_confidence: wire.total_confidence,
        cache_hit: wire.cache_hit,
        latency_ms: wire.latency_ms,
        version,
        drill_down_hints: wire.drill_down_hints,
        explanation: wire.explanation,
        coverage_gaps: wire.coverage_gaps,
    })
}

/// Decode cache text. Any malformed or incomplete payload yields `None`.
pub fn deserialize_response(text: &str) -> Option<CachedResponse> {
    match decode_response(text) {
        Ok(response) => Some(response),
        Err(e) => {
            debug!("rejecting cache payload: {e}");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample_response() -> CachedResponse {
        let created = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
            + chrono::Duration::microseconds(589_793);
        let mut pack = ContextPack::new("pack-1", "symbol", "func:src/auth.ts#login", created);
        pack.summary = "Validates credentials and issues a session".to_string();
        pack.key_facts = vec!["uses bcrypt".to_string(), "emits audit event".to_string()];
        pack.code_snippets = vec![CodeSnippet {
            file_path: "src/auth.ts".to_string(),
            start_line: 10,
            end_line: 24,
            content: "export function login() {}".to_string(),
        }];
        pack.related_files = vec!["src/session.ts".to_string()];
        pack.confidence = 0.87;
        pack.access_count = 3;
        pack.record_outcome(PackOutcome::Success);
        pack.invalidation_triggers = vec!["src/auth.ts".to_string()];

        CachedResponse {
            query: Query::new("how does login work")
                .with_depth(QueryDepth::L1)
                .with_task_type("understand")
                .with_path_prefix("packages/api/")
                .with_affected_files(vec!["src/auth.ts".to_string()]),
            packs: vec![pack],
            disclosures: vec!["scope_auto_detected".to_string()],
            trace_id: "trace-123".to_string(),
            total_confidence: 0.87,
            cache_hit: false,
            latency_ms: 12.5,
            version: Version {
                major: 1,
                minor: 4,
                patch: 2,
                string: "1.4.2".to_string(),
                quality_tier: "full".to_string(),
                indexed_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
                indexer_version: "idx-7".to_string(),
                features: vec!["embeddings".to_string(), "graph".to_string()],
            },
            drill_down_hints: vec!["re-query at L2".to_string()],
            explanation: "1 candidate ranked".to_string(),
            coverage_gaps: Vec::new(),
        }
    }

    #[test]
    fn test_roundtrip_restores_every_field() {
        let response = sample_response();
        let text = serialize_response(&response).unwrap();
        let decoded = deserialize_response(&text).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.packs[0].created_at, response.packs[0].created_at);
        assert_eq!(decoded.version.indexed_at, response.version.indexed_at);
    }

    #[test]
    fn test_payload_is_self_describing() {
        let text = serialize_response(&sample_response()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["schema"], CACHE_SCHEMA_VERSION);
        assert!(value["response"]["version"]["indexedAt"].is_string());
        assert!(value["response"]["packs"][0]["createdAt"].is_string());
    }

    #[test]
    fn test_non_json_returns_none() {
        assert!(deserialize_response("not json at all").is_none());
        assert!(deserialize_response("").is_none());
    }

    #[test]
    fn test_incomplete_payload_returns_none() {
        assert!(deserialize_response(r#"{"schema":1,"response":{"traceId":"x"}}"#).is_none());
        assert!(deserialize_response(r#"{"query":{"intent":"x"},"packs":[]}"#).is_none());
    }

    #[test]
    fn test_missing_version_returns_none() {
        let text = serialize_response(&sample_response()).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&text).unwrap();
        value["response"].as_object_mut().unwrap().remove("version");
        assert!(deserialize_response(&value.to_string()).is_none());
    }

    #[test]
    fn test_bad_timestamp_returns_none() {
        let text = serialize_response(&sample_response()).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&text).unwrap();
        value["response"]["packs"][0]["createdAt"] = serde_json::json!("yesterday");
        assert!(deserialize_response(&value.to_string()).is_none());
    }

    #[test]
    fn test_unknown_schema_returns_none() {
        let text = serialize_response(&sample_response()).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&text).unwrap();
        value["schema"] = serde_json::json!(99);
        let err = decode_response(&value.to_string()).unwrap_err();
        assert!(matches!(err, RecallError::MalformedCacheEntry(_)));
    }
}
