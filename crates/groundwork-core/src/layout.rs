use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Result};

pub const MANAGED_DIR: &str = ".groundwork";
pub const PIN_PATH: &str = ".groundwork/VERSION";
pub const CONFIG_PATH: &str = ".groundwork/config.toml";
pub const DOCS_DIR: &str = ".groundwork/docs";
pub const ALLOWLIST_PATH: &str = ".groundwork/commands.allow";
pub const SKILLS_DIR: &str = ".groundwork/skills";
pub const LAUNCHERS_DIR: &str = ".groundwork/bin";
pub const STATE_DIR: &str = ".groundwork/state";
pub const BASELINE_PATH: &str = ".groundwork/state/baseline.json";
pub const SNAPSHOTS_DIR: &str = ".groundwork/state/upgrades";
pub const LEGACY_DOCS_DIR: &str = ".groundwork/state/legacy/docs";
pub const MEMORY_DOC_PATH: &str = "AGENTS.md";
pub const GITIGNORE_PATH: &str = ".gitignore";

/// Repository-relative view of the managed surface. Relative paths always use
/// `/` separators and never escape the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    root: PathBuf,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, rel_path: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in rel_path.split('/').filter(|segment| !segment.is_empty()) {
            path.push(segment);
        }
        path
    }

    pub fn relative(&self, path: &Path) -> Option<String> {
        let stripped = path.strip_prefix(&self.root).ok()?;
        let mut segments = Vec::new();
        for component in stripped.components() {
            match component {
                Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(segments.join("/"))
    }

    pub fn pin_path(&self) -> PathBuf {
        self.resolve(PIN_PATH)
    }

    pub fn config_path(&self) -> PathBuf {
        self.resolve(CONFIG_PATH)
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.resolve(DOCS_DIR)
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.resolve(SKILLS_DIR)
    }

    pub fn launchers_dir(&self) -> PathBuf {
        self.resolve(LAUNCHERS_DIR)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.resolve(STATE_DIR)
    }

    pub fn baseline_path(&self) -> PathBuf {
        self.resolve(BASELINE_PATH)
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.resolve(SNAPSHOTS_DIR)
    }

    pub fn snapshot_path(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir().join(format!("{snapshot_id}.json"))
    }

    pub fn legacy_docs_dir(&self) -> PathBuf {
        self.resolve(LEGACY_DOCS_DIR)
    }
}

pub fn validate_rel_path(rel_path: &str) -> Result<()> {
    if rel_path.trim().is_empty() {
        return Err(anyhow!("path must not be empty"));
    }
    if rel_path.starts_with('/') || rel_path.contains('\\') || rel_path.contains(':') {
        return Err(anyhow!(
            "path must be repository-relative with '/' separators: '{rel_path}'"
        ));
    }
    for segment in rel_path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(anyhow!("path contains an invalid segment: '{rel_path}'"));
        }
    }
    Ok(())
}

pub fn join_rel(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

pub fn rel_parent(rel_path: &str) -> Option<&str> {
    rel_path.rsplit_once('/').map(|(parent, _)| parent)
}

pub fn rel_depth(rel_path: &str) -> usize {
    rel_path.split('/').filter(|segment| !segment.is_empty()).count()
}

/// `true` when `rel_path` equals `ancestor` or lives underneath it.
pub fn is_within(rel_path: &str, ancestor: &str) -> bool {
    rel_path == ancestor
        || rel_path
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

pub fn is_state_path(rel_path: &str) -> bool {
    is_within(rel_path, STATE_DIR)
}

pub fn is_docs_path(rel_path: &str) -> bool {
    rel_path != DOCS_DIR && is_within(rel_path, DOCS_DIR)
}

/// Location of the legacy raw copy captured for a documentation-tree path.
pub fn legacy_docs_path_for(rel_path: &str) -> Option<String> {
    if !is_docs_path(rel_path) {
        return None;
    }
    let rest = rel_path.strip_prefix(DOCS_DIR)?.trim_start_matches('/');
    Some(join_rel(LEGACY_DOCS_DIR, rest))
}
