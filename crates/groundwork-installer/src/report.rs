use groundwork_core::OperationKind;
use groundwork_resolver::{MigrationPlan, PlannedStatus, ResolvedSource};
use semver::Version;

use crate::ownership::OwnershipClassification;

/// Execution result of one planned migration operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOperation {
    pub id: String,
    pub kind: OperationKind,
    pub manifest_version: Version,
    pub status: PlannedStatus,
}

#[derive(Debug, Clone)]
pub struct UpgradeReport {
    pub target_version: Version,
    pub source: Option<ResolvedSource>,
    pub first_install: bool,
    pub plan: Option<MigrationPlan>,
    pub snapshot_id: Option<String>,
    pub operations: Vec<AppliedOperation>,
    pub written_files: Vec<String>,
    pub created_dirs: Vec<String>,
    /// Template files left alone because they carry local changes.
    pub pending: Vec<OwnershipClassification>,
    pub gitignore_updated: bool,
    pub launchers: Vec<String>,
    pub removed_stale: Vec<String>,
    pub unknown_paths: Vec<String>,
    pub blocking_diffs: usize,
    pub baseline_written: bool,
}

impl UpgradeReport {
    pub fn new(target_version: Version) -> Self {
        Self {
            target_version,
            source: None,
            first_install: false,
            plan: None,
            snapshot_id: None,
            operations: Vec::new(),
            written_files: Vec::new(),
            created_dirs: Vec::new(),
            pending: Vec::new(),
            gitignore_updated: false,
            launchers: Vec::new(),
            removed_stale: Vec::new(),
            unknown_paths: Vec::new(),
            blocking_diffs: 0,
            baseline_written: false,
        }
    }

    pub fn applied_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|operation| operation.status == PlannedStatus::Applied)
            .count()
    }
}
