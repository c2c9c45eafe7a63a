use anyhow::{anyhow, Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::manifest::{validate_file_entries, validate_release_version, ManifestFileEntry};

pub const BASELINE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineProvenance {
    WrittenByInit,
    WrittenByUpgrade,
    InferredFromPinManifest,
    MigratedFromLegacySnapshot,
}

impl BaselineProvenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WrittenByInit => "written_by_init",
            Self::WrittenByUpgrade => "written_by_upgrade",
            Self::InferredFromPinManifest => "inferred_from_pin_manifest",
            Self::MigratedFromLegacySnapshot => "migrated_from_legacy_snapshot",
        }
    }
}

/// Last known-consistent state of the managed surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedBaselineState {
    pub schema_version: u32,
    pub baseline_version: Version,
    pub provenance: BaselineProvenance,
    pub created_at_unix: u64,
    pub updated_at_unix: u64,
    #[serde(default)]
    pub files: Vec<ManifestFileEntry>,
}

impl ManagedBaselineState {
    pub fn from_json_str(input: &str) -> Result<Self> {
        let state: Self =
            serde_json::from_str(input).context("failed to parse managed baseline state")?;
        if state.schema_version != BASELINE_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported baseline schema_version {} (expected {})",
                state.schema_version,
                BASELINE_SCHEMA_VERSION
            ));
        }
        validate_release_version(&state.baseline_version)?;
        validate_file_entries(&state.files).context("invalid managed baseline state")?;
        Ok(state)
    }

    pub fn to_json_string(&self) -> Result<String> {
        let mut content =
            serde_json::to_string_pretty(self).context("failed to serialize baseline state")?;
        content.push('\n');
        Ok(content)
    }

    pub fn entry(&self, path: &str) -> Option<&ManifestFileEntry> {
        self.files.iter().find(|entry| entry.path == path)
    }
}
