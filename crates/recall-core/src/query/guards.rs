//! Shared guardrails for query payload bounds and batch limits.

// Core query guards
pub const MAX_INTENT_LENGTH: usize = 512;
pub const MAX_CANDIDATES_PER_BATCH: usize = 2000;

/// Batches at or above this size compute raw scores on the rayon pool.
pub const PARALLEL_SCORING_THRESHOLD: usize = 512;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

pub fn clamp_limit(value: i64, maximum: i64) -> i64 {
    clamp_int(value, 1, maximum)
}

/// Trim an intent and cut it to `MAX_INTENT_LENGTH` bytes on a char boundary.
pub fn truncate_intent(intent: &str) -> String {
    let stripped = intent.trim();
    if stripped.len() <= MAX_INTENT_LENGTH {
        return stripped.to_string();
    }
    let mut end = MAX_INTENT_LENGTH;
    while !stripped.is_char_boundary(end) {
        end -= 1;
    }
    stripped[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0, 10), 1);
        assert_eq!(clamp_limit(50, 10), 10);
        assert_eq!(clamp_limit(5, 10), 5);
    }

    #[test]
    fn test_truncate_intent_trims() {
        assert_eq!(truncate_intent("  how does auth work \n"), "how does auth work");
    }

    #[test]
    fn test_truncate_intent_respects_char_boundary() {
        let long = "é".repeat(MAX_INTENT_LENGTH);
        let cut = truncate_intent(&long);
        assert!(cut.len() <= MAX_INTENT_LENGTH);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
