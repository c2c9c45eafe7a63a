use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use groundwork_core::{
    decode_toml_literal, insert_config_key, is_within, join_rel, load_config_table,
    lookup_config_key, rel_parent, remove_config_key, EntryKind, MigrationOperation,
    OperationKind, RepoFs, RepoLayout, UpgradeMigrationManifest,
};
use groundwork_registry::MigrationManifestStore;
use semver::Version;
use toml::Table;

use crate::types::{MigrationPlan, PlannedOperation, PlannedStatus};

/// Builds the ordered, deduplicated list of migration operations that take a
/// repository from `source` to `target`.
pub fn plan_migrations(
    store: &MigrationManifestStore,
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    source: Option<&Version>,
    target: &Version,
) -> Result<MigrationPlan> {
    let manifests = match source {
        Some(source) => store.manifests_between(source, target)?,
        None => store.load_manifest(target)?.into_iter().collect(),
    };

    let mut view = VirtualTree::new(fs, layout);
    let mut seen_ids = HashSet::new();
    let mut steps = Vec::new();
    for manifest in &manifests {
        for operation in &manifest.operations {
            if !seen_ids.insert(operation.id.clone()) {
                tracing::debug!(
                    id = %operation.id,
                    manifest = %manifest.target_version,
                    "operation already planned by an earlier manifest"
                );
                continue;
            }
            let step = plan_operation(&mut view, manifest, operation, source)?;
            tracing::debug!(
                id = %operation.id,
                kind = operation.kind.as_str(),
                status = step.status.as_str(),
                "planned migration operation"
            );
            steps.push(step);
        }
    }

    let plan = MigrationPlan {
        source_version: source.cloned(),
        target_version: target.clone(),
        chain: manifests
            .iter()
            .map(|manifest| manifest.target_version.clone())
            .collect(),
        steps,
    };
    tracing::info!(
        source = source.map(ToString::to_string).unwrap_or_else(|| "unknown".to_string()),
        %target,
        manifests = plan.chain.len(),
        operations = plan.steps.len(),
        "migration plan built"
    );
    Ok(plan)
}

fn plan_operation(
    view: &mut VirtualTree<'_>,
    manifest: &UpgradeMigrationManifest,
    operation: &MigrationOperation,
    source: Option<&Version>,
) -> Result<PlannedOperation> {
    let skipped = |status: PlannedStatus, reason: String| PlannedOperation {
        manifest_version: manifest.target_version.clone(),
        operation: operation.clone(),
        status,
        reason: Some(reason),
        covered_paths: Vec::new(),
    };

    if !operation.source_agnostic {
        match source {
            None => {
                return Ok(skipped(
                    PlannedStatus::SkippedUnknownSource,
                    "source version is unknown and the operation depends on it".to_string(),
                ))
            }
            Some(source) if manifest.min_prior_version > *source => {
                return Ok(skipped(
                    PlannedStatus::SkippedSourceTooOld,
                    format!(
                        "source version {source} is older than {} required by the {} migrations",
                        manifest.min_prior_version, manifest.target_version
                    ),
                ))
            }
            Some(_) => {}
        }
    }

    let (status, covered_paths) = covered_by(view, operation)
        .with_context(|| format!("failed planning operation '{}'", operation.id))?;
    Ok(PlannedOperation {
        manifest_version: manifest.target_version.clone(),
        operation: operation.clone(),
        status,
        reason: None,
        covered_paths,
    })
}

/// Paths the executor would touch for `operation`, evaluated against the
/// virtual tree, which is then updated with the operation's effect.
fn covered_by(
    view: &mut VirtualTree<'_>,
    operation: &MigrationOperation,
) -> Result<(PlannedStatus, Vec<String>)> {
    match operation.kind {
        OperationKind::RenameFile | OperationKind::RenameDir | OperationKind::RenameGenerated => {
            let from = operation.from_field()?;
            let to = operation.to_field()?;
            if !view.present(from)? {
                return Ok((PlannedStatus::NoOp, Vec::new()));
            }
            let created_root = view.highest_absent_ancestor(to)?;
            view.record(Effect::Moved {
                from: from.to_string(),
                to: to.to_string(),
            });
            Ok((PlannedStatus::Planned, vec![from.to_string(), created_root]))
        }
        OperationKind::DeletePath => {
            let path = operation.path_field()?;
            if !view.present(path)? {
                return Ok((PlannedStatus::NoOp, Vec::new()));
            }
            view.record(Effect::Removed(path.to_string()));
            Ok((PlannedStatus::Planned, vec![path.to_string()]))
        }
        OperationKind::MigrateSkillsFormat => {
            let path = operation.path_field()?;
            if !view.present(path)? || !view.has_flat_skills(path)? {
                return Ok((PlannedStatus::NoOp, Vec::new()));
            }
            Ok((PlannedStatus::Planned, vec![path.to_string()]))
        }
        OperationKind::ConfigRenameKey => {
            let from = operation.from_field()?;
            let to = operation.to_field()?;
            let path = operation.config_path();
            let covered = vec![view.highest_absent_ancestor(path)?];
            match view.config(path)? {
                ConfigView::Absent => Ok((PlannedStatus::NoOp, Vec::new())),
                ConfigView::Unknown => Ok((PlannedStatus::Planned, covered)),
                ConfigView::Present(table) => {
                    let Some(value) = lookup_config_key(table, from).cloned() else {
                        return Ok((PlannedStatus::NoOp, Vec::new()));
                    };
                    match lookup_config_key(table, to) {
                        Some(existing) if *existing != value => {}
                        Some(_) => {
                            remove_config_key(table, from);
                        }
                        None => {
                            remove_config_key(table, from);
                            if let Err(err) = insert_config_key(table, to, value) {
                                tracing::debug!(id = %operation.id, "{err:#}");
                            }
                        }
                    }
                    Ok((PlannedStatus::Planned, covered))
                }
            }
        }
        OperationKind::ConfigSetDefault => {
            let key = operation.key_field()?;
            let value = decode_toml_literal(operation.value_field()?)?;
            let path = operation.config_path();
            let covered = vec![view.highest_absent_ancestor(path)?];
            match view.config(path)? {
                ConfigView::Unknown => {}
                ConfigView::Present(table) => {
                    if lookup_config_key(table, key).is_some() {
                        return Ok((PlannedStatus::NoOp, Vec::new()));
                    }
                    if let Err(err) = insert_config_key(table, key, value) {
                        tracing::debug!(id = %operation.id, "{err:#}");
                    }
                }
                ConfigView::Absent => {
                    let mut table = Table::new();
                    insert_config_key(&mut table, key, value)?;
                    view.configs.insert(path.to_string(), table);
                    view.record(Effect::Written(path.to_string()));
                }
            }
            Ok((PlannedStatus::Planned, covered))
        }
    }
}

enum Effect {
    Removed(String),
    Moved { from: String, to: String },
    Written(String),
}

enum ConfigView<'v> {
    Absent,
    Present(&'v mut Table),
    /// Unreadable now or reshaped by an earlier operation; left to the executor.
    Unknown,
}

/// Filesystem presence as it will look after the effects recorded so far.
struct VirtualTree<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
    effects: Vec<Effect>,
    configs: BTreeMap<String, Table>,
}

impl<'a> VirtualTree<'a> {
    fn new(fs: &'a dyn RepoFs, layout: &'a RepoLayout) -> Self {
        Self {
            fs,
            layout,
            effects: Vec::new(),
            configs: BTreeMap::new(),
        }
    }

    fn record(&mut self, effect: Effect) {
        let stale: Vec<&String> = match &effect {
            Effect::Removed(path) => vec![path],
            Effect::Moved { from, to } => vec![from, to],
            Effect::Written(_) => Vec::new(),
        };
        self.configs
            .retain(|config, _| !stale.iter().any(|root| is_within(config, root)));
        self.effects.push(effect);
    }

    /// Whether an earlier removal or move touches `path`, its contents or an
    /// ancestor.
    fn reshaped(&self, path: &str) -> bool {
        self.effects.iter().any(|effect| match effect {
            Effect::Removed(removed) => is_within(path, removed) || is_within(removed, path),
            Effect::Moved { from, to } => [from, to]
                .iter()
                .any(|moved| is_within(path, moved) || is_within(moved, path)),
            Effect::Written(_) => false,
        })
    }

    fn config(&mut self, path: &str) -> Result<ConfigView<'_>> {
        if !self.configs.contains_key(path) {
            if !self.present(path)? {
                return Ok(ConfigView::Absent);
            }
            if self.reshaped(path) {
                return Ok(ConfigView::Unknown);
            }
            match load_config_table(self.fs, self.layout, path) {
                Ok(Some(table)) => {
                    self.configs.insert(path.to_string(), table);
                }
                Ok(None) => return Ok(ConfigView::Absent),
                Err(err) => {
                    tracing::warn!(path, "config not planned ahead: {err:#}");
                    return Ok(ConfigView::Unknown);
                }
            }
        }
        Ok(self
            .configs
            .get_mut(path)
            .map_or(ConfigView::Unknown, ConfigView::Present))
    }

    /// Whether the migrate-skills executor would find any flat `<name>.md`
    /// file under `skills_dir`.
    fn has_flat_skills(&self, skills_dir: &str) -> Result<bool> {
        if self.reshaped(skills_dir) {
            return Ok(true);
        }
        let absolute = self.layout.resolve(skills_dir);
        match self.inspect(&absolute)? {
            Some(EntryKind::Dir) => {}
            _ => return Ok(false),
        }
        let names = self
            .fs
            .read_dir(&absolute)
            .with_context(|| format!("failed to read {}", absolute.display()))?;
        for name in names {
            let Some(stem) = name.strip_suffix(".md") else {
                continue;
            };
            if stem.is_empty() {
                continue;
            }
            let flat = self.layout.resolve(&join_rel(skills_dir, &name));
            if self.inspect(&flat)? == Some(EntryKind::File) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn inspect(&self, absolute: &Path) -> Result<Option<EntryKind>> {
        Ok(self
            .fs
            .metadata(absolute)
            .with_context(|| format!("failed to inspect {}", absolute.display()))?
            .map(|meta| meta.kind))
    }

    fn present(&self, path: &str) -> Result<bool> {
        self.present_before(path, self.effects.len())
    }

    fn present_before(&self, path: &str, limit: usize) -> Result<bool> {
        for index in (0..limit).rev() {
            match &self.effects[index] {
                Effect::Removed(removed) if is_within(path, removed) => return Ok(false),
                Effect::Moved { from, to } if is_within(path, to) => {
                    let moved_from = format!("{from}{}", &path[to.len()..]);
                    return Ok(self.present_before(&moved_from, index)?
                        || self.present_before(path, index)?);
                }
                Effect::Moved { to, .. } if is_within(to, path) => return Ok(true),
                Effect::Moved { from, .. } if is_within(path, from) => return Ok(false),
                Effect::Written(written) if is_within(written, path) => return Ok(true),
                _ => {}
            }
        }
        Ok(self.inspect(&self.layout.resolve(path))?.is_some())
    }

    /// `path` itself when its parent exists, otherwise the shallowest missing
    /// ancestor, so a rollback also removes directories created on the way.
    fn highest_absent_ancestor(&self, path: &str) -> Result<String> {
        let mut candidate = path;
        while let Some(parent) = rel_parent(candidate) {
            if self.present(parent)? {
                break;
            }
            candidate = parent;
        }
        Ok(candidate.to_string())
    }
}
