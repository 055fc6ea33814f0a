//! Intent classification and canonicalization for paraphrase matching.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Query, QueryDepth};

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9_]+").unwrap());

// camelCase, PascalCase with two humps, snake_case, `backticked`, call(),
// and qualified a::b / a.b references.
static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        `[^`]+`
        | \b[a-z][a-z0-9]*[A-Z][A-Za-z0-9]*\b
        | \b[A-Z][a-z0-9]+[A-Z][A-Za-z0-9]*\b
        | \b[A-Za-z][A-Za-z0-9]*_[A-Za-z0-9_]+\b
        | \b[A-Za-z_][A-Za-z0-9_]*\(\)
        | \b[A-Za-z_][A-Za-z0-9_]*(?:::|\.)[A-Za-z_][A-Za-z0-9_]*\b
        ",
    )
    .unwrap()
});

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "could", "describe", "did",
    "do", "does", "explain", "find", "for", "from", "give", "here", "how", "i", "in", "into",
    "is", "it", "its", "me", "my", "of", "on", "or", "our", "please", "should", "show", "tell",
    "that", "the", "there", "these", "this", "those", "to", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "with", "would", "you", "your",
];

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("auth", "authentication"),
    ("authn", "authentication"),
    ("authz", "authorization"),
    ("cfg", "configuration"),
    ("conf", "configuration"),
    ("config", "configuration"),
    ("db", "database"),
    ("deps", "dependency"),
    ("dependencies", "dependency"),
    ("docs", "documentation"),
    ("env", "environment"),
    ("init", "initialization"),
    ("msg", "message"),
    ("perf", "performance"),
    ("repo", "repository"),
    ("req", "request"),
    ("resp", "response"),
];

/// Direct-reference keywords that make a symbol-naming intent a lookup.
const LOOKUP_KEYWORDS: &[&str] = &[
    "function", "functions", "method", "methods", "class", "implementation", "implemented",
    "definition", "defined", "def", "impl", "fn", "func", "struct", "interface", "enum", "trait",
];

/// Lookup suffix tokens that all mean "the thing this symbol refers to".
const LOOKUP_SYNONYMS: &[&str] = &[
    "function", "functions", "method", "methods", "implementation", "implementations",
    "implemented", "impl", "definition", "definitions", "defined", "def", "fn", "func",
];
const LOOKUP_CANONICAL: &str = "definition";

const FAILURE_SYNONYMS: &[&str] = &[
    "fail", "fails", "failed", "failing", "failure", "failures", "error", "errors", "err",
    "broken", "breaks", "crash", "crashes", "crashed", "crashing", "exception", "exceptions",
    "panic", "panics", "bug", "bugs",
];
const FAILURE_CANONICAL: &str = "failure";

const TIMEOUT_SYNONYMS: &[&str] = &[
    "timeout", "timeouts", "timed", "hang", "hangs", "hanging", "stall", "stalls",
];
const TIMEOUT_CANONICAL: &str = "timeout";

const FLOW_SYNONYMS: &[&str] = &[
    "work", "works", "working", "flow", "flows", "architecture", "design", "designed",
    "overview", "structure", "structured",
];
const FLOW_CANONICAL: &str = "flow";

/// Words that keep a "why" question conceptual rather than diagnostic.
const CONCEPTUAL_WHY_CUES: &[&str] = &["work", "works", "architecture", "design", "designed", "exist", "exists"];

const CATEGORY_CANONICALS: &[&str] = &[LOOKUP_CANONICAL, FAILURE_CANONICAL, TIMEOUT_CANONICAL, FLOW_CANONICAL];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntentCategory {
    Lookup,
    Conceptual,
    Diagnostic,
}

impl IntentCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentCategory::Lookup => "lookup",
            IntentCategory::Conceptual => "conceptual",
            IntentCategory::Diagnostic => "diagnostic",
        }
    }
}

/// Canonical token form of an intent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedIntent {
    pub category: IntentCategory,
    pub tokens: BTreeSet<String>,
}

impl NormalizedIntent {
    /// Space-joined sorted tokens.
    pub fn text(&self) -> String {
        self.tokens.iter().cloned().collect::<Vec<_>>().join(" ")
    }

    /// True when at least one token carries topic or symbol meaning beyond
    /// the category vocabulary.
    pub fn has_signal(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| !CATEGORY_CANONICALS.contains(&t.as_str()))
    }

    /// Jaccard overlap of the two token sets.
    pub fn similarity(&self, other: &NormalizedIntent) -> f64 {
        if self.tokens.is_empty() || other.tokens.is_empty() {
            return 0.0;
        }
        let shared = self.tokens.intersection(&other.tokens).count();
        let union = self.tokens.union(&other.tokens).count();
        shared as f64 / union as f64
    }
}

fn raw_tokens(intent: &str) -> Vec<String> {
    let lowered = intent.to_lowercase();
    WORD_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn expand_abbreviation(token: &str) -> &str {
    ABBREVIATIONS
        .iter()
        .find(|(short, _)| *short == token)
        .map(|(_, long)| *long)
        .unwrap_or(token)
}

/// Classify an intent. Failure vocabulary wins over lookup cues.
pub fn classify_category(intent: &str) -> IntentCategory {
    let tokens = raw_tokens(intent);
    let has = |set: &[&str]| tokens.iter().any(|t| set.contains(&t.as_str()));

    let failure = has(FAILURE_SYNONYMS) || has(TIMEOUT_SYNONYMS);
    let why = tokens.iter().any(|t| t == "why");
    if failure || (why && !has(CONCEPTUAL_WHY_CUES)) {
        return IntentCategory::Diagnostic;
    }
    if has(LOOKUP_KEYWORDS) && SYMBOL_RE.is_match(intent) {
        return IntentCategory::Lookup;
    }
    IntentCategory::Conceptual
}

fn canonical_for(category: IntentCategory, token: &str) -> Option<&'static str> {
    match category {
        IntentCategory::Lookup if LOOKUP_SYNONYMS.contains(&token) => Some(LOOKUP_CANONICAL),
        IntentCategory::Diagnostic if FAILURE_SYNONYMS.contains(&token) => Some(FAILURE_CANONICAL),
        IntentCategory::Diagnostic if TIMEOUT_SYNONYMS.contains(&token) => Some(TIMEOUT_CANONICAL),
        IntentCategory::Conceptual if FLOW_SYNONYMS.contains(&token) => Some(FLOW_CANONICAL),
        _ => None,
    }
}

/// Lowercase, drop punctuation and stopwords, expand abbreviations, and
/// collapse the category's synonym set.
pub fn analyze_intent(intent: &str) -> NormalizedIntent {
    let category = classify_category(intent);
    let tokens = raw_tokens(intent)
        .into_iter()
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(|t| {
            let expanded = expand_abbreviation(&t);
            canonical_for(category, expanded)
                .unwrap_or(expanded)
                .to_string()
        })
        .collect();
    NormalizedIntent { category, tokens }
}

pub fn normalize_intent(intent: &str) -> String {
    analyze_intent(intent).text()
}

/// Similarity of two raw intents in `[0, 1]`. Intents of different categories
/// never match.
pub fn compute_intent_similarity(a: &str, b: &str) -> f64 {
    let left = analyze_intent(a);
    let right = analyze_intent(b);
    if left.category != right.category {
        return 0.0;
    }
    left.similarity(&right)
}

/// Partition key from filters and depth only; the intent text is excluded.
pub fn build_scope_signature(query: &Query) -> String {
    let field = |value: Option<&str>| -> String {
        value
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "*".to_string())
    };
    format!(
        "prefix={}|lang={}|task={}|depth={}",
        query.path_prefix().map(str::trim).filter(|p| !p.is_empty()).unwrap_or("*"),
        field(query.language()),
        field(query.task_type.as_deref()),
        query.depth.map(QueryDepth::as_str).unwrap_or("*"),
    )
}
