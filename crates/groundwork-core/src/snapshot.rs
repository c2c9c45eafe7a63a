use std::fmt;

use anyhow::{anyhow, Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::baseline::ManagedBaselineState;
use crate::error::UpgradeError;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;
pub const SNAPSHOT_ID_PREFIX: &str = "up-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Pending,
    Applied,
    AutoRolledBack,
    RollbackFailed,
    ManuallyRolledBack,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::AutoRolledBack => "auto_rolled_back",
            Self::RollbackFailed => "rollback_failed",
            Self::ManuallyRolledBack => "manually_rolled_back",
        }
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotEntryKind {
    File,
    Dir,
    Symlink,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub path: String,
    pub kind: SnapshotEntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

/// Pre-mutation copy of every captured target plus the outcome of the
/// transaction that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeSnapshot {
    pub schema_version: u32,
    pub id: String,
    pub created_at_unix: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<Version>,
    pub to_version: Version,
    pub status: SnapshotStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<String>,
    /// Baseline state before the transaction; restored by a manual rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_baseline: Option<ManagedBaselineState>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub entries: Vec<SnapshotEntry>,
}

impl UpgradeSnapshot {
    pub fn from_json_str(input: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(input).context("failed to parse upgrade snapshot")?;
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported upgrade snapshot schema_version {} (expected {})",
                snapshot.schema_version,
                SNAPSHOT_SCHEMA_VERSION
            ));
        }
        validate_snapshot_id(&snapshot.id)?;
        Ok(snapshot)
    }

    pub fn to_json_string(&self) -> Result<String> {
        let mut content =
            serde_json::to_string_pretty(self).context("failed to serialize upgrade snapshot")?;
        content.push('\n');
        Ok(content)
    }

    pub fn entry(&self, path: &str) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }
}

pub fn is_valid_snapshot_id(snapshot_id: &str) -> bool {
    snapshot_id.len() > SNAPSHOT_ID_PREFIX.len()
        && snapshot_id.len() <= 128
        && snapshot_id.starts_with(SNAPSHOT_ID_PREFIX)
        && snapshot_id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

pub fn validate_snapshot_id(snapshot_id: &str) -> Result<()> {
    if is_valid_snapshot_id(snapshot_id) {
        Ok(())
    } else {
        Err(UpgradeError::InvalidSnapshotId(snapshot_id.to_string()).into())
    }
}
