//! Query scope normalization against the workspace root.
//!
//! Rewrites path filters into workspace-relative form and, for monorepos,
//! infers a sub-package scope from the caller's working file.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::errors::{RecallError, RecallResult};
use crate::models::{Query, QueryFilter, DISCLOSURE_SCOPE_AUTO_DETECTED};
use crate::workspace::WorkspaceLayout;

/// A rewritten query plus the disclosures produced while rewriting it.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedScope {
    pub query: Query,
    pub disclosures: Vec<String>,
}

/// Resolve `.` and `..` components without touching the filesystem.
/// Returns `None` when a relative path climbs above its starting point.
fn lexical_normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    if path.is_absolute() {
                        continue;
                    }
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn with_trailing_separator(relative: String) -> Option<String> {
    if relative.is_empty() {
        None
    } else {
        Some(format!("{relative}/"))
    }
}

fn invalid_scope(path: &str, root: &Path) -> RecallError {
    RecallError::InvalidScope {
        path: path.to_string(),
        root: root.to_path_buf(),
    }
}

/// Workspace-relative form of `path`, or `None` when it lies outside `root`.
/// An absolute path never resolves against a relative root.
pub(crate) fn relative_to_root(path: &str, root: &Path) -> Option<String> {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        if !root.is_absolute() {
            return None;
        }
        let normalized = lexical_normalize(candidate)?;
        let root = lexical_normalize(root)?;
        normalized.strip_prefix(&root).ok().map(to_slash)
    } else {
        let unified = path.replace('\\', "/");
        lexical_normalize(Path::new(&unified)).map(|p| to_slash(&p))
    }
}

/// Normalize a caller-supplied path prefix. An empty result means the prefix
/// covers the whole workspace.
fn normalize_prefix(prefix: &str, root: &Path) -> RecallResult<Option<String>> {
    let trimmed = prefix.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let relative = relative_to_root(trimmed, root).ok_or_else(|| invalid_scope(trimmed, root))?;
    Ok(with_trailing_separator(relative))
}

/// Rewrite a query's scope relative to `workspace_root`.
///
/// Rules, in order: an explicit prefix is made workspace-relative (escaping
/// the root is an error); otherwise a working file inside a declared
/// sub-package sets that package as the prefix and discloses
/// `scope_auto_detected`. `affected_files` are never touched, and no manifest
/// match leaves the scope unset.
pub fn normalize_scope(
    query: &Query,
    workspace_root: &Path,
    layout: Option<&WorkspaceLayout>,
) -> RecallResult<NormalizedScope> {
    let mut normalized = query.clone();
    let mut disclosures = Vec::new();

    let relative_working_file = query
        .working_file
        .as_deref()
        .and_then(|wf| relative_to_root(wf, workspace_root))
        .filter(|wf| !wf.is_empty());
    if let Some(rel) = &relative_working_file {
        normalized.working_file = Some(rel.clone());
    }

    if let Some(prefix) = query.path_prefix() {
        let resolved = normalize_prefix(prefix, workspace_root)?;
        let filter = normalized.filter.get_or_insert_with(QueryFilter::default);
        filter.path_prefix = resolved;
    } else if let (Some(rel), Some(layout)) = (&relative_working_file, layout) {
        if let Some(package) = layout.package_for(rel) {
            debug!(working_file = %rel, package = %package, "auto-detected query scope");
            let filter = normalized.filter.get_or_insert_with(QueryFilter::default);
            filter.path_prefix = with_trailing_separator(package);
            disclosures.push(DISCLOSURE_SCOPE_AUTO_DETECTED.to_string());
        }
    }

    if let Some(filter) = &normalized.filter {
        if filter.path_prefix.is_none() && filter.language.is_none() {
            normalized.filter = None;
        }
    }

    Ok(NormalizedScope {
        query: normalized,
        disclosures,
    })
}
