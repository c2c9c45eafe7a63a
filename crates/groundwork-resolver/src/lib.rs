mod plan;
mod source;
mod types;

pub use plan::plan_migrations;
pub use source::SourceVersionResolver;
pub use types::{
    MigrationPlan, PlannedOperation, PlannedStatus, ResolvedSource, SourceOrigin,
};

#[cfg(test)]
mod tests;
