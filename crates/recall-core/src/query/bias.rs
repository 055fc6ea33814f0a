//! Entity-kind re-ranking passes applied after scoring.
//!
//! Two independent passes: document bias pulls documentation entities toward
//! the top at a dampened strength, definition bias promotes declarations and
//! penalizes named usage sites. Each pass re-sorts by descending similarity.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{clamp_unit, split_entity_id, EntityType, SimilarityResult};

/// Fraction of the document boost actually applied. Documents are useful
/// context but should not outrank concrete definitions.
pub const DOCUMENT_BIAS_DAMPING: f64 = 1.0 / 3.0;

/// Fraction of the definition boost applied as a penalty to named usages.
pub const USAGE_PENALTY_FACTOR: f64 = 0.7;

const TYPE_KIND_PREFIXES: &[&str] = &["type", "interface", "iface"];
const MODULE_KIND_PREFIXES: &[&str] = &["mod", "module", "file"];

/// Basenames (without extension) of files that hold type declarations.
const DECLARATION_FILE_STEMS: &[&str] = &["types", "typings", "interfaces", "type", "interface"];

// Leading `I` then another capital: `IStorage`, `IUserRepository`, `IO`.
static INTERFACE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^I[A-Z]").unwrap());

/// Why an entity counts as a definition, or why it does not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityRole {
    TypeKind,
    InterfaceName,
    DeclarationModule,
    /// A named symbol that is not a definition: a call site or usage.
    Usage,
    /// No display name and no definition evidence.
    Unnamed,
}

impl EntityRole {
    pub fn is_definition(self) -> bool {
        matches!(
            self,
            EntityRole::TypeKind | EntityRole::InterfaceName | EntityRole::DeclarationModule
        )
    }
}

fn is_declaration_file(locator: &str) -> bool {
    let file_part = locator.split('#').next().unwrap_or(locator);
    let Some(file_name) = Path::new(file_part).file_name().and_then(|f| f.to_str()) else {
        return false;
    };
    if file_name.ends_with(".d.ts") {
        return true;
    }
    let stem = file_name.split('.').next().unwrap_or(file_name);
    DECLARATION_FILE_STEMS.contains(&stem.to_ascii_lowercase().as_str())
}

/// Classify an entity by id and optional display name.
pub fn classify_entity(entity_id: &str, display_name: Option<&str>) -> EntityRole {
    let (kind, locator) = split_entity_id(entity_id);
    let kind = kind.map(str::to_ascii_lowercase);
    if let Some(kind) = kind.as_deref() {
        if TYPE_KIND_PREFIXES.contains(&kind) {
            return EntityRole::TypeKind;
        }
    }
    let name = display_name.map(str::trim).filter(|n| !n.is_empty());
    if let Some(name) = name {
        if INTERFACE_NAME_RE.is_match(name) {
            return EntityRole::InterfaceName;
        }
    }
    if let Some(kind) = kind.as_deref() {
        if MODULE_KIND_PREFIXES.contains(&kind) && is_declaration_file(locator) {
            return EntityRole::DeclarationModule;
        }
    }
    if name.is_some() {
        EntityRole::Usage
    } else {
        EntityRole::Unnamed
    }
}

pub fn is_definition_entity(entity_id: &str, display_name: Option<&str>) -> bool {
    classify_entity(entity_id, display_name).is_definition()
}

fn sort_by_similarity(results: &mut [SimilarityResult]) {
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Pull document similarity toward 1 by a third of `boost_factor` of the gap.
pub fn apply_document_bias(
    mut results: Vec<SimilarityResult>,
    boost_factor: f64,
) -> Vec<SimilarityResult> {
    let boost = clamp_unit(boost_factor);
    for result in &mut results {
        if result.entity_type == EntityType::Document {
            let s = clamp_unit(result.similarity);
            result.similarity = clamp_unit(s + (1.0 - s) * boost * DOCUMENT_BIAS_DAMPING);
        }
    }
    sort_by_similarity(&mut results);
    results
}

/// Promote definitions at full strength, penalize named usages, and leave
/// unnamed non-definitions untouched.
pub fn apply_definition_bias(
    mut results: Vec<SimilarityResult>,
    boost_factor: f64,
    name_by_id: &HashMap<String, String>,
) -> Vec<SimilarityResult> {
    let boost = clamp_unit(boost_factor);
    for result in &mut results {
        let name = name_by_id.get(&result.entity_id).map(String::as_str);
        let s = clamp_unit(result.similarity);
        result.similarity = match classify_entity(&result.entity_id, name) {
            role if role.is_definition() => clamp_unit(s + (1.0 - s) * boost),
            EntityRole::Usage => clamp_unit(s * (1.0 - boost * USAGE_PENALTY_FACTOR)),
            _ => s,
        };
    }
    sort_by_similarity(&mut results);
    results
}
