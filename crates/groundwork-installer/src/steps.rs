use std::collections::BTreeSet;

use anyhow::{Context, Result};
use groundwork_core::{
    comparable_from_bytes, content_equal, is_within, join_rel, memory_managed_section, memory_user_section,
    normalized_hash, policy_for_path, walk_rel_files, write_pin, EntryKind, ManagedBaselineState,
    ManifestFileEntry, PolicyId, RepoFs, RepoLayout, UpgradeError, CONFIG_PATH, DOCS_DIR,
    GITIGNORE_PATH, LAUNCHERS_DIR, MEMORY_DOC_PATH, PIN_PATH, SNAPSHOTS_DIR,
};
use groundwork_registry::{list_files, template_dirs, TemplateManifestStore, TemplateSource};
use groundwork_resolver::{MigrationPlan, PlannedStatus};
use semver::Version;

use crate::config::{load_repo_config, RepoConfig};
use crate::executor::MigrationExecutor;
use crate::ownership::OwnershipService;
use crate::prompt::Prompter;
use crate::report::{AppliedOperation, UpgradeReport};
use crate::snapshot::rollback_root;

pub const GITIGNORE_BEGIN: &str = "# >>> groundwork managed >>>";
pub const GITIGNORE_END: &str = "# <<< groundwork managed <<<";
const LAUNCHER_MODE: u32 = 0o755;

/// One unit of an upgrade transaction. Targets are computed before any step
/// runs and must cover everything `run` may change.
pub trait UpgradeStep {
    fn name(&self) -> &'static str;
    fn rollback_targets(&self) -> Result<Vec<String>>;
    fn run(&mut self, scope: &mut StepScope<'_>) -> Result<()>;
}

/// Per-step bookkeeping: the paths a step actually changed and the shared
/// report it adds to.
pub struct StepScope<'r> {
    touched: BTreeSet<String>,
    pub report: &'r mut UpgradeReport,
}

impl<'r> StepScope<'r> {
    pub fn new(report: &'r mut UpgradeReport) -> Self {
        Self {
            touched: BTreeSet::new(),
            report,
        }
    }

    pub fn touch(&mut self, rel_path: impl Into<String>) {
        self.touched.insert(rel_path.into());
    }

    /// Records the root a write to `rel_path` may create, before writing.
    pub fn touch_for_write(
        &mut self,
        fs: &dyn RepoFs,
        layout: &RepoLayout,
        rel_path: &str,
    ) -> Result<()> {
        let root = rollback_root(fs, layout, rel_path)?;
        self.touch(root);
        Ok(())
    }

    pub fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    pub fn into_touched(self) -> BTreeSet<String> {
        self.touched
    }
}

fn roots_for<'p>(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    paths: impl IntoIterator<Item = &'p str>,
) -> Result<Vec<String>> {
    paths
        .into_iter()
        .map(|path| rollback_root(fs, layout, path))
        .collect()
}

fn read_rel(fs: &dyn RepoFs, layout: &RepoLayout, rel_path: &str) -> Result<Option<Vec<u8>>> {
    let path = layout.resolve(rel_path);
    fs.read_optional(&path)
        .with_context(|| format!("failed to read {}", path.display()))
}

fn write_rel(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    rel_path: &str,
    bytes: &[u8],
    mode: Option<u32>,
) -> Result<()> {
    let path = layout.resolve(rel_path);
    fs.write_atomic(&path, bytes, mode)
        .with_context(|| format!("failed to write {}", path.display()))
}

pub struct MigrationsStep<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
    prompter: &'a dyn Prompter,
    plan: &'a MigrationPlan,
}

impl<'a> MigrationsStep<'a> {
    pub fn new(
        fs: &'a dyn RepoFs,
        layout: &'a RepoLayout,
        prompter: &'a dyn Prompter,
        plan: &'a MigrationPlan,
    ) -> Self {
        Self {
            fs,
            layout,
            prompter,
            plan,
        }
    }
}

impl UpgradeStep for MigrationsStep<'_> {
    fn name(&self) -> &'static str {
        "migrations"
    }

    fn rollback_targets(&self) -> Result<Vec<String>> {
        Ok(self.plan.covered_paths().into_iter().collect())
    }

    fn run(&mut self, scope: &mut StepScope<'_>) -> Result<()> {
        let mut executor = MigrationExecutor::new(self.fs, self.layout, self.prompter);
        for planned in self.plan.planned() {
            for path in &planned.covered_paths {
                scope.touch(path.clone());
            }
            let applied = executor.apply(&planned.operation).with_context(|| {
                format!(
                    "migration '{}' from {} failed",
                    planned.operation.id, planned.manifest_version
                )
            })?;
            scope.report.operations.push(AppliedOperation {
                id: planned.operation.id.clone(),
                kind: planned.operation.kind,
                manifest_version: planned.manifest_version.clone(),
                status: if applied {
                    PlannedStatus::Applied
                } else {
                    PlannedStatus::NoOp
                },
            });
        }
        Ok(())
    }
}

pub struct VersionFileStep<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
    version: Version,
}

impl<'a> VersionFileStep<'a> {
    pub fn new(fs: &'a dyn RepoFs, layout: &'a RepoLayout, version: Version) -> Self {
        Self {
            fs,
            layout,
            version,
        }
    }
}

impl UpgradeStep for VersionFileStep<'_> {
    fn name(&self) -> &'static str {
        "version-file"
    }

    fn rollback_targets(&self) -> Result<Vec<String>> {
        roots_for(self.fs, self.layout, [PIN_PATH])
    }

    fn run(&mut self, scope: &mut StepScope<'_>) -> Result<()> {
        scope.touch_for_write(self.fs, self.layout, PIN_PATH)?;
        write_pin(self.fs, self.layout, &self.version)
    }
}

pub struct TemplateFilesStep<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
    templates: &'a dyn TemplateSource,
    manifests: &'a TemplateManifestStore,
    baseline: Option<&'a ManagedBaselineState>,
    pinned: Option<&'a Version>,
    covered: &'a BTreeSet<String>,
    force: bool,
}

impl<'a> TemplateFilesStep<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fs: &'a dyn RepoFs,
        layout: &'a RepoLayout,
        templates: &'a dyn TemplateSource,
        manifests: &'a TemplateManifestStore,
        baseline: Option<&'a ManagedBaselineState>,
        pinned: Option<&'a Version>,
        covered: &'a BTreeSet<String>,
        force: bool,
    ) -> Self {
        Self {
            fs,
            layout,
            templates,
            manifests,
            baseline,
            pinned,
            covered,
            force,
        }
    }

    /// Local copy still matches what groundwork last wrote.
    fn is_pristine(&self, rel_path: &str, local: &[u8]) -> Result<bool> {
        let policy = policy_for_path(rel_path);
        let hash = normalized_hash(local);
        let matches = |entry: &ManifestFileEntry| -> Result<bool> {
            if policy == PolicyId::MemorySection {
                Ok(entry.comparable()? == comparable_from_bytes(policy, local))
            } else {
                Ok(entry.normalized_full_hash == hash)
            }
        };

        if let Some(entry) = self.baseline.and_then(|state| state.entry(rel_path)) {
            if matches(entry)? {
                return Ok(true);
            }
        }
        match self
            .pinned
            .and_then(|version| self.manifests.entry_for(version, rel_path))
        {
            Some(entry) => matches(entry),
            None => Ok(false),
        }
    }

    /// Whether a planned migration already owns `rel_path` or an ancestor.
    fn is_covered(&self, rel_path: &str) -> bool {
        self.covered.iter().any(|root| is_within(rel_path, root))
    }

    fn seed_config(&self, scope: &mut StepScope<'_>) -> Result<()> {
        if read_rel(self.fs, self.layout, CONFIG_PATH)?.is_some() {
            return Ok(());
        }
        let content = RepoConfig::default().to_toml_string()?;
        scope.touch_for_write(self.fs, self.layout, CONFIG_PATH)?;
        write_rel(self.fs, self.layout, CONFIG_PATH, content.as_bytes(), None)?;
        scope.report.written_files.push(CONFIG_PATH.to_string());
        Ok(())
    }
}

/// Template managed section followed by the local user section, if any.
pub fn merge_memory_document(template: &[u8], local: &[u8]) -> Vec<u8> {
    match memory_user_section(local) {
        Some(user_section) => {
            let mut merged = memory_managed_section(template);
            merged.extend_from_slice(&user_section);
            merged
        }
        None => template.to_vec(),
    }
}

impl UpgradeStep for TemplateFilesStep<'_> {
    fn name(&self) -> &'static str {
        "template-files"
    }

    fn rollback_targets(&self) -> Result<Vec<String>> {
        let mut paths = list_files(self.templates)?;
        paths.push(CONFIG_PATH.to_string());
        roots_for(self.fs, self.layout, paths.iter().map(String::as_str))
    }

    fn run(&mut self, scope: &mut StepScope<'_>) -> Result<()> {
        let ownership = OwnershipService::with_state(
            self.fs,
            self.layout,
            self.templates,
            self.manifests,
            self.baseline.cloned(),
            self.pinned.cloned(),
        );

        for rel_path in list_files(self.templates)? {
            let template = self.templates.read(&rel_path)?;
            let path = self.layout.resolve(&rel_path);
            let existing_mode = match self
                .fs
                .metadata(&path)
                .with_context(|| format!("failed to inspect {}", path.display()))?
            {
                Some(meta) if meta.kind == EntryKind::File => Some(meta.mode),
                Some(_) => {
                    return Err(UpgradeError::Conflict(format!(
                        "template file '{rel_path}' is occupied by a directory or symlink"
                    ))
                    .into());
                }
                None => None,
            };
            let local = read_rel(self.fs, self.layout, &rel_path)?;

            let content = match &local {
                Some(local) if content_equal(local, &template) => continue,
                Some(local) if rel_path == MEMORY_DOC_PATH => {
                    let merged = merge_memory_document(&template, local);
                    if content_equal(local, &merged) {
                        continue;
                    }
                    (self.force || self.is_pristine(&rel_path, local)?).then_some(merged)
                }
                Some(local) => (self.force || self.is_pristine(&rel_path, local)?)
                    .then(|| template.clone()),
                None => Some(template.clone()),
            };

            let Some(content) = content else {
                if self.is_covered(&rel_path) {
                    continue;
                }
                let classification = ownership.classify(&rel_path, &rel_path)?;
                tracing::info!(
                    path = %rel_path,
                    label = classification.label.as_str(),
                    "leaving locally changed template file"
                );
                scope.report.pending.push(classification);
                continue;
            };

            scope.touch_for_write(self.fs, self.layout, &rel_path)?;
            write_rel(self.fs, self.layout, &rel_path, &content, existing_mode)?;
            scope.report.written_files.push(rel_path);
        }

        self.seed_config(scope)
    }
}

pub struct TemplateDirsStep<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
    templates: &'a dyn TemplateSource,
}

impl<'a> TemplateDirsStep<'a> {
    pub fn new(
        fs: &'a dyn RepoFs,
        layout: &'a RepoLayout,
        templates: &'a dyn TemplateSource,
    ) -> Self {
        Self {
            fs,
            layout,
            templates,
        }
    }

    fn dirs(&self) -> Result<Vec<String>> {
        let mut dirs = template_dirs(self.templates)?;
        dirs.push(LAUNCHERS_DIR.to_string());
        Ok(dirs)
    }
}

impl UpgradeStep for TemplateDirsStep<'_> {
    fn name(&self) -> &'static str {
        "template-dirs"
    }

    fn rollback_targets(&self) -> Result<Vec<String>> {
        let dirs = self.dirs()?;
        roots_for(self.fs, self.layout, dirs.iter().map(String::as_str))
    }

    fn run(&mut self, scope: &mut StepScope<'_>) -> Result<()> {
        for dir in self.dirs()? {
            let path = self.layout.resolve(&dir);
            if self.fs.exists(&path)? {
                continue;
            }
            scope.touch_for_write(self.fs, self.layout, &dir)?;
            self.fs
                .create_dir_all(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            scope.report.created_dirs.push(dir);
        }
        Ok(())
    }
}

pub struct GitignoreStep<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
}

impl<'a> GitignoreStep<'a> {
    pub fn new(fs: &'a dyn RepoFs, layout: &'a RepoLayout) -> Self {
        Self { fs, layout }
    }
}

/// Replaces the managed block in `existing`, or appends one. A begin marker
/// without its end marker claims everything after it.
pub fn merge_gitignore(existing: &str, entries: &[&str]) -> String {
    let mut block = String::new();
    block.push_str(GITIGNORE_BEGIN);
    block.push('\n');
    for entry in entries {
        block.push_str(entry);
        block.push('\n');
    }
    block.push_str(GITIGNORE_END);
    block.push('\n');

    if let Some(start) = existing.find(GITIGNORE_BEGIN) {
        let end = match existing[start..].find(GITIGNORE_END) {
            Some(end_offset) => {
                let end = start + end_offset + GITIGNORE_END.len();
                if existing[end..].starts_with('\n') {
                    end + 1
                } else {
                    end
                }
            }
            None => existing.len(),
        };
        return format!("{}{}{}", &existing[..start], block, &existing[end..]);
    }

    let mut merged = existing.to_string();
    if !merged.is_empty() {
        if !merged.ends_with('\n') {
            merged.push('\n');
        }
        merged.push('\n');
    }
    merged.push_str(&block);
    merged
}

impl UpgradeStep for GitignoreStep<'_> {
    fn name(&self) -> &'static str {
        "gitignore"
    }

    fn rollback_targets(&self) -> Result<Vec<String>> {
        Ok(vec![GITIGNORE_PATH.to_string()])
    }

    fn run(&mut self, scope: &mut StepScope<'_>) -> Result<()> {
        let config = load_repo_config(self.fs, self.layout)?;
        if !config.manage_gitignore {
            tracing::debug!("gitignore management disabled");
            return Ok(());
        }
        let existing = read_rel(self.fs, self.layout, GITIGNORE_PATH)?.unwrap_or_default();
        let existing = String::from_utf8(existing).map_err(|_| {
            UpgradeError::Validation(format!(
                "{GITIGNORE_PATH} is not valid UTF-8; refusing to rewrite it (set manage_gitignore = false to skip)"
            ))
        })?;
        let snapshots_entry = format!("/{SNAPSHOTS_DIR}/");
        let merged = merge_gitignore(&existing, &[snapshots_entry.as_str()]);
        if merged == existing {
            return Ok(());
        }
        scope.touch(GITIGNORE_PATH);
        write_rel(self.fs, self.layout, GITIGNORE_PATH, merged.as_bytes(), None)?;
        scope.report.gitignore_updated = true;
        Ok(())
    }
}

pub struct LaunchersStep<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
}

impl<'a> LaunchersStep<'a> {
    pub fn new(fs: &'a dyn RepoFs, layout: &'a RepoLayout) -> Self {
        Self { fs, layout }
    }
}

pub fn launcher_script(name: &str) -> String {
    let command = name.strip_prefix("gw-").unwrap_or(name);
    format!(
        "#!/bin/sh\n# Generated by groundwork; rewritten on every upgrade.\nexec groundwork {command} \"$@\"\n"
    )
}

impl UpgradeStep for LaunchersStep<'_> {
    fn name(&self) -> &'static str {
        "launchers"
    }

    fn rollback_targets(&self) -> Result<Vec<String>> {
        roots_for(self.fs, self.layout, [LAUNCHERS_DIR])
    }

    fn run(&mut self, scope: &mut StepScope<'_>) -> Result<()> {
        let config = load_repo_config(self.fs, self.layout)?;
        for name in &config.launchers {
            let rel_path = join_rel(LAUNCHERS_DIR, name);
            let script = launcher_script(name);
            let path = self.layout.resolve(&rel_path);
            let current = self
                .fs
                .metadata(&path)
                .with_context(|| format!("failed to inspect {}", path.display()))?;
            let up_to_date = match current {
                Some(meta) if meta.kind == EntryKind::File && meta.mode == LAUNCHER_MODE => {
                    read_rel(self.fs, self.layout, &rel_path)?.as_deref() == Some(script.as_bytes())
                }
                _ => false,
            };
            if !up_to_date {
                scope.touch_for_write(self.fs, self.layout, &rel_path)?;
                if current.is_some_and(|meta| meta.kind != EntryKind::File) {
                    self.fs
                        .remove_all(&path)
                        .with_context(|| format!("failed to remove {}", path.display()))?;
                }
                write_rel(
                    self.fs,
                    self.layout,
                    &rel_path,
                    script.as_bytes(),
                    Some(LAUNCHER_MODE),
                )?;
            }
            scope.report.launchers.push(rel_path);
        }
        Ok(())
    }
}

pub struct UnknownPathsStep<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
    templates: &'a dyn TemplateSource,
    manifests: &'a TemplateManifestStore,
}

impl<'a> UnknownPathsStep<'a> {
    pub fn new(
        fs: &'a dyn RepoFs,
        layout: &'a RepoLayout,
        templates: &'a dyn TemplateSource,
        manifests: &'a TemplateManifestStore,
    ) -> Self {
        Self {
            fs,
            layout,
            templates,
            manifests,
        }
    }

    /// Some earlier release shipped exactly this content at this path.
    fn is_stale(&self, rel_path: &str, local: &[u8]) -> bool {
        let target = self.templates.version();
        let hash = normalized_hash(local);
        self.manifests
            .manifests()
            .filter(|manifest| manifest.version < *target)
            .filter_map(|manifest| manifest.entry(rel_path))
            .any(|entry| entry.normalized_full_hash == hash)
    }
}

impl UpgradeStep for UnknownPathsStep<'_> {
    fn name(&self) -> &'static str {
        "unknown-paths"
    }

    fn rollback_targets(&self) -> Result<Vec<String>> {
        roots_for(self.fs, self.layout, [DOCS_DIR])
    }

    fn run(&mut self, scope: &mut StepScope<'_>) -> Result<()> {
        let files = walk_rel_files(self.fs, self.layout, DOCS_DIR)
            .context("failed to scan documentation tree")?;
        for rel_path in files {
            if self.templates.contains(&rel_path) {
                continue;
            }
            let stale = match read_rel(self.fs, self.layout, &rel_path)? {
                Some(local) => self.is_stale(&rel_path, &local),
                None => false,
            };
            if stale {
                let path = self.layout.resolve(&rel_path);
                scope.touch(rel_path.clone());
                self.fs
                    .remove_all(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                tracing::info!(path = %rel_path, "removed stale managed file");
                scope.report.removed_stale.push(rel_path);
            } else {
                tracing::debug!(path = %rel_path, "leaving unknown documentation file");
                scope.report.unknown_paths.push(rel_path);
            }
        }
        Ok(())
    }
}
