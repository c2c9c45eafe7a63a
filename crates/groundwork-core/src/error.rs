use std::fmt;

/// Failure categories callers may need to tell apart; everything else travels
/// as a plain `anyhow::Error` with context.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("validation-failed: {0}")]
    Validation(String),

    #[error("migration-conflict: {0}")]
    Conflict(String),

    #[error("confirmation-required: {0}")]
    Confirmation(String),

    #[error("upgrade step '{step}' failed: {message} ({rollback}, snapshot={snapshot_id})")]
    StepFailed {
        step: String,
        message: String,
        rollback: RollbackOutcome,
        snapshot_id: String,
    },

    #[error("rollback-failed: snapshot {snapshot_id}: {message}")]
    RollbackFailed { snapshot_id: String, message: String },

    #[error("snapshot {snapshot_id} cannot be rolled back from status '{status}'")]
    SnapshotNotApplied { snapshot_id: String, status: String },

    #[error("invalid snapshot id: '{0}'")]
    InvalidSnapshotId(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    RolledBack,
    Failed(String),
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RolledBack => f.write_str("changes rolled back"),
            Self::Failed(message) => write!(f, "rollback failed: {message}"),
        }
    }
}
