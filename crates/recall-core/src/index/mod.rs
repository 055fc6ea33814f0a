//! Seams to the indexing, storage/graph, and pack-synthesis collaborators.
//!
//! The engine never talks to a database or embedding service directly; it
//! consumes candidates, centrality metrics, entity metadata, and context
//! packs through [`IndexBackend`].

pub mod bootstrap;
pub mod memory;
pub mod symbols;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::errors::RecallResult;
use crate::models::{
    CentralityMetrics, ContextPack, EntityMeta, Query, SimilarityResult, Version,
};

pub use bootstrap::{
    bootstrap_with_fallback, BootstrapFailure, BootstrapOutcome, BootstrapReport,
    BootstrapStatus, Bootstrapper, PatternSet, UNIVERSAL_PATTERNS,
};
pub use memory::StaticIndex;
pub use symbols::{SymbolEntry, SymbolTable};

pub trait IndexBackend: Send + Sync {
    /// Readiness of the index. Defaults to ready.
    fn bootstrap_status(&self) -> BootstrapStatus {
        BootstrapStatus::ready()
    }

    fn version(&self) -> Version;

    /// Raw candidates for `query`, at most `limit` of them.
    fn retrieve(&self, query: &Query, limit: usize) -> RecallResult<Vec<SimilarityResult>>;

    fn centrality(
        &self,
        entity_ids: &[String],
    ) -> RecallResult<HashMap<String, CentralityMetrics>>;

    fn entity_meta(&self, _entity_ids: &[String]) -> RecallResult<HashMap<String, EntityMeta>> {
        Ok(HashMap::new())
    }

    fn symbols(&self) -> Option<Arc<SymbolTable>> {
        None
    }

    /// Context packs for the ranked entities, in any order.
    fn synthesize(
        &self,
        query: &Query,
        ranked: &[SimilarityResult],
        now: DateTime<Utc>,
    ) -> RecallResult<Vec<ContextPack>>;
}

const LANGUAGE_BY_EXTENSION: &[(&str, &str)] = &[
    (".py", "python"),
    (".java", "java"),
    (".ts", "typescript"),
    (".tsx", "typescript"),
    (".js", "javascript"),
    (".jsx", "javascript"),
    (".go", "go"),
    (".rs", "rust"),
    (".md", "markdown"),
];

/// Language implied by a file path's extension.
pub fn detect_language(path: &str) -> Option<&'static str> {
    let ext = Path::new(path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))?;
    LANGUAGE_BY_EXTENSION
        .iter()
        .find(|(e, _)| *e == ext.as_str())
        .map(|(_, lang)| *lang)
}

/// File path portion of an entity locator (`src/a.ts#run` → `src/a.ts`).
pub fn locator_file(locator: &str) -> &str {
    locator.split_once('#').map_or(locator, |(file, _)| file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("src/app.TSX"), Some("typescript"));
        assert_eq!(detect_language("docs/README.md"), Some("markdown"));
        assert_eq!(detect_language("Makefile"), None);
    }

    #[test]
    fn test_locator_file() {
        assert_eq!(locator_file("src/a.ts#run"), "src/a.ts");
        assert_eq!(locator_file("src/a.ts"), "src/a.ts");
    }
}
