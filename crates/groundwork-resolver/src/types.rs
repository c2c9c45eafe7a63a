use std::collections::BTreeSet;
use std::fmt;

use groundwork_core::MigrationOperation;
use semver::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    PinFile,
    BaselineState,
    UpgradeSnapshot,
    ManifestMatch,
    Unknown,
}

impl SourceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PinFile => "pin_file",
            Self::BaselineState => "baseline_state",
            Self::UpgradeSnapshot => "upgrade_snapshot",
            Self::ManifestMatch => "manifest_match",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SourceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best guess at the scaffold version a repository was last brought to, with
/// a note for every evidence source that could not answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub version: Option<Version>,
    pub origin: SourceOrigin,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedStatus {
    Planned,
    Applied,
    NoOp,
    SkippedUnknownSource,
    SkippedSourceTooOld,
}

impl PlannedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Applied => "applied",
            Self::NoOp => "no_op",
            Self::SkippedUnknownSource => "skipped_unknown_source",
            Self::SkippedSourceTooOld => "skipped_source_too_old",
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::SkippedUnknownSource | Self::SkippedSourceTooOld)
    }
}

impl fmt::Display for PlannedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOperation {
    pub manifest_version: Version,
    pub operation: MigrationOperation,
    pub status: PlannedStatus,
    pub reason: Option<String>,
    pub covered_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub source_version: Option<Version>,
    pub target_version: Version,
    pub chain: Vec<Version>,
    pub steps: Vec<PlannedOperation>,
}

impl MigrationPlan {
    pub fn planned(&self) -> impl Iterator<Item = &PlannedOperation> {
        self.steps
            .iter()
            .filter(|step| step.status == PlannedStatus::Planned)
    }

    pub fn covered_paths(&self) -> BTreeSet<String> {
        self.steps
            .iter()
            .flat_map(|step| step.covered_paths.iter().cloned())
            .collect()
    }

    pub fn has_work(&self) -> bool {
        self.planned().next().is_some()
    }
}
