//! Vault path handling
//!
//! Converts between absolute paths reported by the watcher and the
//! vault-relative keys stored in the state store, and decides which paths
//! the pipeline cares about at all.

use core_runtime::SyncConfig;
use std::path::{Component, Path, PathBuf};

/// Decides which vault paths enter the pipeline
#[derive(Debug, Clone)]
pub struct PathFilter {
    vault_root: PathBuf,
    /// Canonical form of the root, when it differs from `vault_root`
    canonical_root: Option<PathBuf>,
    artifact_dir: PathBuf,
    extensions: Vec<String>,
    max_file_size: u64,
}

impl PathFilter {
    pub fn new(
        vault_root: impl Into<PathBuf>,
        artifact_dir: impl Into<PathBuf>,
        extensions: Vec<String>,
        max_file_size: u64,
    ) -> Self {
        let vault_root = vault_root.into();
        let canonical_root = std::fs::canonicalize(&vault_root)
            .ok()
            .filter(|canonical| *canonical != vault_root);
        Self {
            vault_root,
            canonical_root,
            artifact_dir: artifact_dir.into(),
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_file_size,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.vault_root.clone(),
            config.artifact_dir.clone(),
            config.extensions.clone(),
            config.max_file_size_bytes(),
        )
    }

    pub fn vault_root(&self) -> &Path {
        &self.vault_root
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Vault-relative key for `path`, with `/` separators
    ///
    /// Relative inputs are taken as already relative to the vault. Returns
    /// `None` for paths outside the vault or paths that climb out with `..`.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.vault_root)
                .ok()
                .or_else(|| {
                    self.canonical_root
                        .as_ref()
                        .and_then(|root| path.strip_prefix(root).ok())
                })?
        } else {
            path
        };

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str()?.to_string()),
                Component::CurDir => {}
                _ => return None,
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    /// Absolute location of a vault-relative key
    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.vault_root.clone(), |acc, part| acc.join(part))
    }

    /// Whether the artifact directory contains `path`
    pub fn is_artifact(&self, path: &Path) -> bool {
        if path.starts_with(&self.artifact_dir) {
            return true;
        }
        // Compare through the relative form to survive symlinked roots
        match (self.relative_path(path), self.relative_path(&self.artifact_dir)) {
            (Some(candidate), Some(artifacts)) => {
                candidate == artifacts || candidate.starts_with(&format!("{}/", artifacts))
            }
            _ => false,
        }
    }

    /// Whether a change to `path` should be acted on
    ///
    /// Rejects paths outside the vault, anything under a hidden directory or
    /// the artifact directory, editor temp files and unwatched extensions.
    /// Existence and size are not checked here.
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(relative) = self.relative_path(path) else {
            return false;
        };
        if self.is_artifact(path) {
            return false;
        }
        if relative.split('/').any(|part| part.starts_with('.')) {
            return false;
        }

        let file_name = relative.rsplit('/').next().unwrap_or_default();
        if file_name.starts_with('~') || file_name.to_ascii_lowercase().ends_with(".tmp") {
            return false;
        }

        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|watched| *watched == ext)
            })
            .unwrap_or(false)
    }

    /// Whether a directory should be descended into during a scan
    pub fn descends_into(&self, dir: &Path) -> bool {
        if self.is_artifact(dir) {
            return false;
        }
        match self.relative_path(dir) {
            Some(relative) => !relative.split('/').any(|part| part.starts_with('.')),
            // The root itself
            None => dir == self.vault_root || Some(dir) == self.canonical_root.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> PathFilter {
        PathFilter::new(
            "/vault",
            "/vault/.vault-sync/artifacts",
            vec!["md".into(), ".PDF".into()],
            1024,
        )
    }

    #[test]
    fn test_relative_path() {
        let f = filter();
        assert_eq!(
            f.relative_path(Path::new("/vault/notes/a.md")),
            Some("notes/a.md".to_string())
        );
        assert_eq!(f.relative_path(Path::new("notes/./b.md")), Some("notes/b.md".into()));
        assert_eq!(f.relative_path(Path::new("/elsewhere/a.md")), None);
        assert_eq!(f.relative_path(Path::new("../a.md")), None);
        assert_eq!(f.relative_path(Path::new("/vault")), None);
    }

    #[test]
    fn test_absolute_path() {
        let f = filter();
        assert_eq!(
            f.absolute_path("notes/a.md"),
            Path::new("/vault").join("notes").join("a.md")
        );
    }

    #[test]
    fn test_accepts_watched_extensions() {
        let f = filter();
        assert!(f.accepts(Path::new("/vault/a.md")));
        assert!(f.accepts(Path::new("/vault/Docs/Paper.pdf")));
        assert!(f.accepts(Path::new("/vault/UPPER.MD")));
        assert!(!f.accepts(Path::new("/vault/image.png")));
        assert!(!f.accepts(Path::new("/vault/no_extension")));
    }

    #[test]
    fn test_rejects_hidden_and_temporary() {
        let f = filter();
        assert!(!f.accepts(Path::new("/vault/.obsidian/workspace.md")));
        assert!(!f.accepts(Path::new("/vault/.hidden.md")));
        assert!(!f.accepts(Path::new("/vault/~lock.md")));
        assert!(!f.accepts(Path::new("/vault/draft.md.tmp")));
        assert!(!f.accepts(Path::new("/other/a.md")));
    }

    #[test]
    fn test_rejects_artifacts() {
        let f = PathFilter::new("/vault", "/vault/out", vec!["pdf".into()], 1024);
        assert!(f.is_artifact(Path::new("/vault/out/a.pdf")));
        assert!(!f.accepts(Path::new("/vault/out/a.pdf")));
        assert!(!f.is_artifact(Path::new("/vault/outline.pdf")));
        assert!(f.accepts(Path::new("/vault/outline.pdf")));
    }

    #[test]
    fn test_descends_into() {
        let f = PathFilter::new("/vault", "/vault/out", vec!["md".into()], 1024);
        assert!(f.descends_into(Path::new("/vault")));
        assert!(f.descends_into(Path::new("/vault/notes")));
        assert!(!f.descends_into(Path::new("/vault/.git")));
        assert!(!f.descends_into(Path::new("/vault/out")));
    }
}
