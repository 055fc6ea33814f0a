//! Index readiness and bootstrap orchestration.
//!
//! A first bootstrap attempt uses the configured include/exclude patterns.
//! When it reports that no files matched, exactly one retry runs with the
//! built-in universal pattern set before the failure is surfaced.

use tracing::{info, warn};

use crate::errors::{RecallError, RecallResult};

/// Readiness reported by the index (`isBootstrapRequired`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapStatus {
    pub required: bool,
    pub reason: Option<String>,
}

impl BootstrapStatus {
    pub fn ready() -> Self {
        Self::default()
    }

    pub fn required(reason: impl Into<String>) -> Self {
        Self {
            required: true,
            reason: Some(reason.into()),
        }
    }
}

/// Include/exclude glob patterns handed to the indexer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatternSet {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl PatternSet {
    pub fn new(include: &[&str], exclude: &[&str]) -> Self {
        Self {
            include: include.iter().map(|p| p.to_string()).collect(),
            exclude: exclude.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Immutable default pattern constants.
pub struct PatternConstants {
    pub include: &'static [&'static str],
    pub exclude: &'static [&'static str],
}

impl PatternConstants {
    pub fn to_pattern_set(&self) -> PatternSet {
        PatternSet::new(self.include, self.exclude)
    }
}

/// Built-in fallback used only by the bootstrap retry.
pub const UNIVERSAL_PATTERNS: PatternConstants = PatternConstants {
    include: &[
        "**/*.ts", "**/*.tsx", "**/*.js", "**/*.jsx", "**/*.mjs", "**/*.cjs", "**/*.py",
        "**/*.rs", "**/*.go", "**/*.java", "**/*.kt", "**/*.rb", "**/*.php", "**/*.cs",
        "**/*.c", "**/*.h", "**/*.cpp", "**/*.hpp", "**/*.swift", "**/*.md",
    ],
    exclude: &[
        "**/node_modules/**",
        "**/.git/**",
        "**/dist/**",
        "**/build/**",
        "**/target/**",
        "**/vendor/**",
        "**/.venv/**",
        "**/__pycache__/**",
        "**/*.min.js",
        "**/.env",
        "**/.env.*",
        "**/*.pem",
        "**/*.key",
        "**/*secret*",
        "**/*credential*",
    ],
};

/// Result of one successful bootstrap attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub files_indexed: usize,
    pub symbols_indexed: usize,
}

/// Why a bootstrap attempt failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootstrapFailure {
    NoFilesMatched,
    Other(String),
}

impl BootstrapFailure {
    /// Map a collaborator's failure message onto a failure kind.
    pub fn from_message(message: &str) -> Self {
        let lowered = message.to_lowercase();
        if lowered.contains("no files matched") {
            BootstrapFailure::NoFilesMatched
        } else {
            BootstrapFailure::Other(message.to_string())
        }
    }

    fn describe(&self) -> String {
        match self {
            BootstrapFailure::NoFilesMatched => {
                "no files matched the configured include patterns".to_string()
            }
            BootstrapFailure::Other(message) => message.clone(),
        }
    }
}

/// The indexing collaborator's bootstrap entry point.
pub trait Bootstrapper: Send + Sync {
    fn bootstrap(&self, patterns: &PatternSet) -> Result<BootstrapOutcome, BootstrapFailure>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapReport {
    pub outcome: BootstrapOutcome,
    pub patterns: PatternSet,
    pub used_fallback: bool,
}

/// Bootstrap with `configured`, retrying once with `fallback` when no files
/// matched.
pub fn bootstrap_with_fallback(
    bootstrapper: &dyn Bootstrapper,
    configured: &PatternSet,
    fallback: &PatternSet,
) -> RecallResult<BootstrapReport> {
    match bootstrapper.bootstrap(configured) {
        Ok(outcome) => {
            info!(
                files = outcome.files_indexed,
                symbols = outcome.symbols_indexed,
                "bootstrap completed"
            );
            Ok(BootstrapReport {
                outcome,
                patterns: configured.clone(),
                used_fallback: false,
            })
        }
        Err(BootstrapFailure::NoFilesMatched) if configured != fallback => {
            warn!("bootstrap matched no files; retrying with universal default patterns");
            match bootstrapper.bootstrap(fallback) {
                Ok(outcome) => {
                    info!(
                        files = outcome.files_indexed,
                        symbols = outcome.symbols_indexed,
                        "bootstrap completed with fallback patterns"
                    );
                    Ok(BootstrapReport {
                        outcome,
                        patterns: fallback.clone(),
                        used_fallback: true,
                    })
                }
                Err(failure) => Err(RecallError::Bootstrap(format!(
                    "fallback bootstrap failed: {}",
                    failure.describe()
                ))),
            }
        }
        Err(failure) => Err(RecallError::Bootstrap(failure.describe())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct ScriptedBootstrapper {
        results: Mutex<Vec<Result<BootstrapOutcome, BootstrapFailure>>>,
        seen: Mutex<Vec<PatternSet>>,
    }

    impl ScriptedBootstrapper {
        fn new(results: Vec<Result<BootstrapOutcome, BootstrapFailure>>) -> Self {
            Self {
                results: Mutex::new(results),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Bootstrapper for ScriptedBootstrapper {
        fn bootstrap(&self, patterns: &PatternSet) -> Result<BootstrapOutcome, BootstrapFailure> {
            self.seen.lock().push(patterns.clone());
            self.results.lock().remove(0)
        }
    }

    fn outcome() -> BootstrapOutcome {
        BootstrapOutcome {
            files_indexed: 12,
            symbols_indexed: 340,
        }
    }

    fn configured() -> PatternSet {
        PatternSet::new(&["src/**/*.elm"], &[])
    }

    #[test]
    fn test_first_attempt_success() {
        let b = ScriptedBootstrapper::new(vec![Ok(outcome())]);
        let report =
            bootstrap_with_fallback(&b, &configured(), &UNIVERSAL_PATTERNS.to_pattern_set()).unwrap();
        assert!(!report.used_fallback);
        assert_eq!(b.seen.lock().len(), 1);
    }

    #[test]
    fn test_retries_once_with_universal_patterns() {
        let b = ScriptedBootstrapper::new(vec![Err(BootstrapFailure::NoFilesMatched), Ok(outcome())]);
        let universal = UNIVERSAL_PATTERNS.to_pattern_set();
        let report = bootstrap_with_fallback(&b, &configured(), &universal).unwrap();
        assert!(report.used_fallback);
        assert_eq!(report.patterns, universal);
        assert_eq!(b.seen.lock().as_slice(), &[configured(), universal]);
    }

    #[test]
    fn test_no_second_retry() {
        let b = ScriptedBootstrapper::new(vec![
            Err(BootstrapFailure::NoFilesMatched),
            Err(BootstrapFailure::NoFilesMatched),
            Ok(outcome()),
        ]);
        let err = bootstrap_with_fallback(&b, &configured(), &UNIVERSAL_PATTERNS.to_pattern_set())
            .unwrap_err();
        assert!(matches!(err, RecallError::Bootstrap(_)));
        assert_eq!(b.seen.lock().len(), 2);
    }

    #[test]
    fn test_other_failures_do_not_retry() {
        let b = ScriptedBootstrapper::new(vec![Err(BootstrapFailure::Other("disk full".into()))]);
        let err = bootstrap_with_fallback(&b, &configured(), &UNIVERSAL_PATTERNS.to_pattern_set())
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(b.seen.lock().len(), 1);
    }

    #[test]
    fn test_failure_message_mapping() {
        assert_eq!(
            BootstrapFailure::from_message("Error: No files matched the configured include patterns"),
            BootstrapFailure::NoFilesMatched
        );
        assert!(matches!(
            BootstrapFailure::from_message("permission denied"),
            BootstrapFailure::Other(_)
        ));
    }
}
