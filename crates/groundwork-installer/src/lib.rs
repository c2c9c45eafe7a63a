mod config;
mod config_keys;
mod executor;
mod ownership;
mod prompt;
mod report;
mod snapshot;
mod steps;
mod transaction;

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

pub use config::{load_repo_config, validate_launcher_name, RepoConfig, DEFAULT_LAUNCHER};
pub use executor::MigrationExecutor;
pub use groundwork_core::{list_snapshots, load_snapshot, persist_snapshot};
pub use ownership::{
    BaselineSource, Confidence, OwnershipClassification, OwnershipLabel, OwnershipService,
    ReasonCode,
};
pub use prompt::{AssumeYes, Confirmer, NonInteractive, Prompter};
pub use report::{AppliedOperation, UpgradeReport};
pub use snapshot::{
    capture, new_snapshot_id, normalize_targets, restore, rollback_by_id, rollback_root,
};
pub use steps::{
    launcher_script, merge_gitignore, merge_memory_document, GitignoreStep, LaunchersStep,
    MigrationsStep, StepScope, TemplateDirsStep, TemplateFilesStep, UnknownPathsStep,
    UpgradeStep, VersionFileStep, GITIGNORE_BEGIN, GITIGNORE_END,
};
pub use transaction::{UpgradeOptions, UpgradeTransaction, Upgrader};

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}
