//! Monorepo workspace manifest detection.
//!
//! Reads the top-level manifest that declares sub-package globs
//! (`pnpm-workspace.yaml`, `package.json` workspaces, `lerna.json`, or a Cargo
//! `[workspace]`) and answers which sub-package a path belongs to.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::errors::{RecallError, RecallResult};

const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target", "dist", "build"];

/// Upper bound on directory depth walked when a glob contains `**`.
const MAX_PACKAGE_DEPTH: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestKind {
    Pnpm,
    PackageJson,
    Lerna,
    Cargo,
}

impl ManifestKind {
    pub fn file_name(self) -> &'static str {
        match self {
            ManifestKind::Pnpm => "pnpm-workspace.yaml",
            ManifestKind::PackageJson => "package.json",
            ManifestKind::Lerna => "lerna.json",
            ManifestKind::Cargo => "Cargo.toml",
        }
    }
}

const DETECTION_ORDER: &[ManifestKind] = &[
    ManifestKind::Pnpm,
    ManifestKind::PackageJson,
    ManifestKind::Lerna,
    ManifestKind::Cargo,
];

#[derive(Deserialize)]
struct PnpmWorkspace {
    #[serde(default)]
    packages: Vec<String>,
}

/// Sub-package layout of a monorepo.
#[derive(Clone, Debug)]
pub struct WorkspaceLayout {
    root: PathBuf,
    manifest: ManifestKind,
    patterns: Vec<String>,
    include: GlobSet,
    exclude: GlobSet,
}

// ---------------------------------------------------------------------------
// Manifest parsing
// ---------------------------------------------------------------------------

fn manifest_error(path: &Path, message: impl Into<String>) -> RecallError {
    RecallError::Manifest {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn strings_from_json(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Read package globs from one manifest. `Ok(None)` means the file exists but
/// declares no workspace.
fn read_patterns(kind: ManifestKind, path: &Path) -> RecallResult<Option<Vec<String>>> {
    let raw = std::fs::read_to_string(path)?;
    let patterns = match kind {
        ManifestKind::Pnpm => {
            let parsed: PnpmWorkspace = serde_yaml::from_str(&raw)
                .map_err(|e| manifest_error(path, e.to_string()))?;
            parsed.packages
        }
        ManifestKind::PackageJson => {
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            match value.get("workspaces") {
                Some(ws) if ws.is_array() => strings_from_json(ws),
                Some(ws) => ws.get("packages").map(strings_from_json).unwrap_or_default(),
                None => return Ok(None),
            }
        }
        ManifestKind::Lerna => {
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            match value.get("packages") {
                Some(pkgs) => strings_from_json(pkgs),
                None => return Ok(None),
            }
        }
        ManifestKind::Cargo => {
            let value: toml::Value = toml::from_str(&raw)?;
            let Some(workspace) = value.get("workspace") else {
                return Ok(None);
            };
            let list = |key: &str| -> Vec<String> {
                workspace
                    .get(key)
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default()
            };
            let mut patterns = list("members");
            patterns.extend(list("exclude").into_iter().map(|p| format!("!{p}")));
            patterns
        }
    };
    if patterns.is_empty() {
        return Ok(None);
    }
    Ok(Some(patterns))
}

fn clean_pattern(pattern: &str) -> String {
    let mut p = pattern.trim().replace('\\', "/");
    while let Some(stripped) = p.strip_prefix("./") {
        p = stripped.to_string();
    }
    while p.ends_with('/') {
        p.pop();
    }
    p
}

// ---------------------------------------------------------------------------
// WorkspaceLayout
// ---------------------------------------------------------------------------

impl WorkspaceLayout {
    /// Build a layout from raw manifest globs. Globs starting with `!` exclude.
    pub fn from_patterns(
        root: &Path,
        manifest: ManifestKind,
        patterns: &[String],
    ) -> RecallResult<Self> {
        let mut include = GlobSetBuilder::new();
        let mut exclude = GlobSetBuilder::new();
        let mut kept = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let (negated, body) = match raw.trim().strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw.as_str()),
            };
            let body = clean_pattern(body);
            if body.is_empty() {
                continue;
            }
            let glob = GlobBuilder::new(&body).literal_separator(true).build()?;
            if negated {
                exclude.add(glob);
                kept.push(format!("!{body}"));
            } else {
                include.add(glob);
                kept.push(body);
            }
        }
        Ok(Self {
            root: root.to_path_buf(),
            manifest,
            patterns: kept,
            include: include.build()?,
            exclude: exclude.build()?,
        })
    }

    /// Detect the workspace manifest at `root`. Missing or malformed manifests
    /// yield `None`.
    pub fn detect(root: &Path) -> Option<Self> {
        for &kind in DETECTION_ORDER {
            let path = root.join(kind.file_name());
            if !path.is_file() {
                continue;
            }
            let patterns = match read_patterns(kind, &path) {
                Ok(Some(patterns)) => patterns,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Ignoring unreadable workspace manifest {}: {e}", path.display());
                    continue;
                }
            };
            match Self::from_patterns(root, kind, &patterns) {
                Ok(layout) => {
                    debug!(
                        manifest = kind.file_name(),
                        patterns = layout.patterns.len(),
                        "detected workspace manifest"
                    );
                    return Some(layout);
                }
                Err(e) => {
                    warn!("Ignoring workspace manifest {} with bad globs: {e}", path.display());
                }
            }
        }
        None
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> ManifestKind {
        self.manifest
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether a workspace-relative directory is a declared sub-package.
    pub fn is_package_dir(&self, relative_dir: &str) -> bool {
        let dir = relative_dir.trim_end_matches('/');
        !dir.is_empty() && self.include.is_match(dir) && !self.exclude.is_match(dir)
    }

    /// Nearest declared sub-package containing `relative_file`, without a
    /// trailing separator.
    pub fn package_for(&self, relative_file: &str) -> Option<String> {
        let mut current = Path::new(relative_file).parent();
        while let Some(dir) = current {
            let dir_str = dir.to_string_lossy().replace('\\', "/");
            if dir_str.is_empty() {
                break;
            }
            if self.is_package_dir(&dir_str) {
                return Some(dir_str);
            }
            current = dir.parent();
        }
        None
    }

    /// Enumerate sub-package directories present on disk, sorted.
    pub fn packages(&self) -> Vec<String> {
        let max_depth = self
            .patterns
            .iter()
            .filter(|p| !p.starts_with('!'))
            .map(|p| {
                if p.contains("**") {
                    MAX_PACKAGE_DEPTH
                } else {
                    p.split('/').count()
                }
            })
            .max()
            .unwrap_or(0);
        if max_depth == 0 {
            return Vec::new();
        }

        let mut found: Vec<String> = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .filter_map(|entry| {
                let rel = entry.path().strip_prefix(&self.root).ok()?;
                let rel = rel.to_string_lossy().replace('\\', "/");
                self.is_package_dir(&rel).then_some(rel)
            })
            .collect();
        found.sort();
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_detect_package_json_array() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", r#"{"name":"root","workspaces":["packages/*"]}"#);
        let layout = WorkspaceLayout::detect(dir.path()).unwrap();
        assert_eq!(layout.manifest(), ManifestKind::PackageJson);
        assert!(layout.is_package_dir("packages/api"));
        assert!(!layout.is_package_dir("packages/api/src"));
        assert!(!layout.is_package_dir("apps/web"));
    }

    #[test]
    fn test_detect_package_json_object_form() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "package.json",
            r#"{"workspaces":{"packages":["apps/*","libs/*"]}}"#,
        );
        let layout = WorkspaceLayout::detect(dir.path()).unwrap();
        assert!(layout.is_package_dir("libs/core"));
    }

    #[test]
    fn test_detect_pnpm_with_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "pnpm-workspace.yaml",
            "packages:\n  - 'packages/*'\n  - '!packages/legacy'\n",
        );
        let layout = WorkspaceLayout::detect(dir.path()).unwrap();
        assert_eq!(layout.manifest(), ManifestKind::Pnpm);
        assert!(layout.is_package_dir("packages/api"));
        assert!(!layout.is_package_dir("packages/legacy"));
    }

    #[test]
    fn test_detect_cargo_workspace() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "Cargo.toml",
            "[workspace]\nmembers = [\"crates/*\"]\nexclude = [\"crates/scratch\"]\n",
        );
        let layout = WorkspaceLayout::detect(dir.path()).unwrap();
        assert_eq!(layout.manifest(), ManifestKind::Cargo);
        assert!(layout.is_package_dir("crates/core"));
        assert!(!layout.is_package_dir("crates/scratch"));
    }

    #[test]
    fn test_plain_package_json_is_not_workspace() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", r#"{"name":"app"}"#);
        assert!(WorkspaceLayout::detect(dir.path()).is_none());
    }

    #[test]
    fn test_malformed_manifest_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", "{not json");
        write(dir.path(), "lerna.json", r#"{"packages":["modules/*"]}"#);
        let layout = WorkspaceLayout::detect(dir.path()).unwrap();
        assert_eq!(layout.manifest(), ManifestKind::Lerna);
    }

    #[test]
    fn test_package_for_finds_nearest() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::from_patterns(
            dir.path(),
            ManifestKind::PackageJson,
            &["packages/*".to_string(), "./tools/".to_string()],
        )
        .unwrap();
        assert_eq!(
            layout.package_for("packages/api/src/routes/login.ts"),
            Some("packages/api".to_string())
        );
        assert_eq!(layout.package_for("tools/build.ts"), Some("tools".to_string()));
        assert_eq!(layout.package_for("README.md"), None);
    }

    #[test]
    fn test_packages_enumerates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", r#"{"workspaces":["packages/*"]}"#);
        write(dir.path(), "packages/api/package.json", "{}");
        write(dir.path(), "packages/web/package.json", "{}");
        write(dir.path(), "docs/readme.md", "");
        let layout = WorkspaceLayout::detect(dir.path()).unwrap();
        assert_eq!(layout.packages(), vec!["packages/api", "packages/web"]);
    }
}
