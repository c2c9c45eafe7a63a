use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::content::normalized_hash;
use crate::layout::validate_rel_path;
use crate::policy::{
    comparable_from_recorded, payload_for, policy_for_path, validate_payload,
    OwnershipComparable, PolicyId, PolicyPayload,
};

pub const TEMPLATE_MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFileEntry {
    pub path: String,
    pub normalized_full_hash: String,
    pub policy_id: PolicyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_payload: Option<PolicyPayload>,
}

impl ManifestFileEntry {
    pub fn from_bytes(path: &str, bytes: &[u8]) -> Self {
        let policy_id = policy_for_path(path);
        Self {
            path: path.to_string(),
            normalized_full_hash: normalized_hash(bytes),
            policy_id,
            policy_payload: payload_for(policy_id, bytes),
        }
    }

    pub fn comparable(&self) -> Result<OwnershipComparable> {
        comparable_from_recorded(
            self.policy_id,
            &self.normalized_full_hash,
            self.policy_payload.as_ref(),
        )
        .with_context(|| format!("invalid manifest entry for '{}'", self.path))
    }
}

/// Per-release snapshot of every managed file's fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateManifest {
    pub schema_version: u32,
    pub version: Version,
    #[serde(default)]
    pub files: Vec<ManifestFileEntry>,
}

impl TemplateManifest {
    pub fn from_json_str(input: &str) -> Result<Self> {
        let manifest: Self =
            serde_json::from_str(input).context("failed to parse template manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != TEMPLATE_MANIFEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported template manifest schema_version {} (expected {})",
                self.schema_version,
                TEMPLATE_MANIFEST_SCHEMA_VERSION
            ));
        }
        validate_release_version(&self.version)?;
        validate_file_entries(&self.files)
            .with_context(|| format!("invalid template manifest {}", self.version))
    }

    pub fn entry(&self, path: &str) -> Option<&ManifestFileEntry> {
        self.files.iter().find(|entry| entry.path == path)
    }
}

pub fn validate_release_version(version: &Version) -> Result<()> {
    if !version.pre.is_empty() || !version.build.is_empty() {
        return Err(anyhow!(
            "version '{version}' must be plain X.Y.Z without pre-release or build metadata"
        ));
    }
    Ok(())
}

pub fn validate_file_entries(entries: &[ManifestFileEntry]) -> Result<()> {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        validate_rel_path(&entry.path)?;
        if !seen.insert(entry.path.as_str()) {
            return Err(anyhow!("duplicate file entry '{}'", entry.path));
        }
        if entry.normalized_full_hash.len() != 64
            || !entry
                .normalized_full_hash
                .chars()
                .all(|ch| ch.is_ascii_hexdigit())
        {
            return Err(anyhow!(
                "invalid normalized_full_hash for '{}': expected 64 hex characters",
                entry.path
            ));
        }
        validate_payload(entry.policy_id, entry.policy_payload.as_ref())
            .with_context(|| format!("invalid policy payload for '{}'", entry.path))?;
    }
    Ok(())
}
