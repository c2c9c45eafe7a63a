use std::collections::BTreeSet;

use anyhow::{Context, Result};
use groundwork_core::{
    comparable_from_bytes, load_baseline, persist_snapshot, read_pin, walk_rel_files,
    write_baseline, BaselineProvenance, ManagedBaselineState, ManifestFileEntry, RepoFs,
    RepoLayout, RollbackOutcome, SnapshotStatus, UpgradeError, UpgradeSnapshot,
    BASELINE_SCHEMA_VERSION, DOCS_DIR, LEGACY_DOCS_DIR, MANAGED_DIR,
};
use groundwork_registry::{
    build_template_manifest, MigrationManifestStore, TemplateManifestStore, TemplateSource,
};
use groundwork_resolver::{
    plan_migrations, MigrationPlan, ResolvedSource, SourceOrigin, SourceVersionResolver,
};
use semver::Version;

use crate::current_unix_timestamp;
use crate::ownership::OwnershipService;
use crate::prompt::Prompter;
use crate::report::UpgradeReport;
use crate::snapshot::{capture, restore};
use crate::steps::{
    GitignoreStep, LaunchersStep, MigrationsStep, StepScope, TemplateDirsStep, TemplateFilesStep,
    UnknownPathsStep, UpgradeStep, VersionFileStep,
};

/// Runs steps against one snapshot: everything is captured up front, and a
/// failing step rolls back what ran before it.
pub struct UpgradeTransaction<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
    from_version: Option<Version>,
    to_version: Version,
    prior_baseline: Option<ManagedBaselineState>,
}

impl<'a> UpgradeTransaction<'a> {
    pub fn new(
        fs: &'a dyn RepoFs,
        layout: &'a RepoLayout,
        from_version: Option<Version>,
        to_version: Version,
        prior_baseline: Option<ManagedBaselineState>,
    ) -> Self {
        Self {
            fs,
            layout,
            from_version,
            to_version,
            prior_baseline,
        }
    }

    pub fn run(
        &self,
        steps: &mut [Box<dyn UpgradeStep + '_>],
        extra_targets: &[String],
        report: &mut UpgradeReport,
    ) -> Result<UpgradeSnapshot> {
        let mut declared = Vec::with_capacity(steps.len());
        for step in steps.iter() {
            let targets = step
                .rollback_targets()
                .with_context(|| format!("failed to compute targets of step '{}'", step.name()))?;
            declared.push(targets);
        }
        let all_targets = extra_targets
            .iter()
            .cloned()
            .chain(declared.iter().flatten().cloned());

        let mut snapshot = capture(
            self.fs,
            self.layout,
            self.from_version.as_ref(),
            &self.to_version,
            all_targets,
        )?;
        snapshot.prior_baseline = self.prior_baseline.clone();
        persist_snapshot(self.fs, self.layout, &snapshot)?;
        report.snapshot_id = Some(snapshot.id.clone());

        let mut touched = BTreeSet::new();
        for (index, step) in steps.iter_mut().enumerate() {
            tracing::info!(step = step.name(), snapshot = %snapshot.id, "running upgrade step");
            let mut scope = StepScope::new(report);
            let result = step.run(&mut scope);
            touched.extend(scope.into_touched());
            if let Err(err) = result {
                let mut restore_targets: Vec<String> = touched.iter().cloned().collect();
                restore_targets.extend(declared[index].iter().cloned());
                return Err(self.fail(&mut snapshot, step.name(), err, &restore_targets));
            }
            tracing::debug!(step = step.name(), "upgrade step finished");
        }

        snapshot.status = SnapshotStatus::Applied;
        if let Err(err) = persist_snapshot(self.fs, self.layout, &snapshot) {
            snapshot.status = SnapshotStatus::Pending;
            let mut restore_targets: Vec<String> = touched.into_iter().collect();
            restore_targets.extend(extra_targets.iter().cloned());
            restore_targets.extend(declared.into_iter().flatten());
            let step = steps.last().map_or("record-snapshot", |step| step.name());
            let err = err.context("failed to record the applied upgrade");
            return Err(self.fail(&mut snapshot, step, err, &restore_targets));
        }
        tracing::info!(snapshot = %snapshot.id, to = %self.to_version, "upgrade applied");
        Ok(snapshot)
    }

    fn fail(
        &self,
        snapshot: &mut UpgradeSnapshot,
        step: &str,
        err: anyhow::Error,
        restore_targets: &[String],
    ) -> anyhow::Error {
        let message = format!("{err:#}");
        tracing::warn!(step, error = %message, "upgrade step failed; rolling back");

        let rollback = match restore(self.fs, self.layout, snapshot, Some(restore_targets)) {
            Ok(()) => {
                snapshot.status = SnapshotStatus::AutoRolledBack;
                RollbackOutcome::RolledBack
            }
            Err(rollback_err) => {
                let rollback_message = format!("{rollback_err:#}");
                tracing::error!(step, error = %rollback_message, "automatic rollback failed");
                snapshot.status = SnapshotStatus::RollbackFailed;
                snapshot.rollback_error = Some(rollback_message.clone());
                RollbackOutcome::Failed(rollback_message)
            }
        };
        snapshot.failed_step = Some(step.to_string());
        snapshot.error = Some(message.clone());
        if let Err(persist_err) = persist_snapshot(self.fs, self.layout, snapshot) {
            tracing::warn!(
                snapshot = %snapshot.id,
                error = %format!("{persist_err:#}"),
                "failed to record upgrade outcome"
            );
        }

        UpgradeError::StepFailed {
            step: step.to_string(),
            message,
            rollback,
            snapshot_id: snapshot.id.clone(),
        }
        .into()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpgradeOptions {
    pub force: bool,
}

/// Entry point for every mutating command: holds the repository view, the
/// release corpus and the prompter, and nothing else.
pub struct Upgrader<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
    templates: &'a dyn TemplateSource,
    migrations: &'a MigrationManifestStore,
    manifests: &'a TemplateManifestStore,
    prompter: &'a dyn Prompter,
}

impl<'a> Upgrader<'a> {
    pub fn new(
        fs: &'a dyn RepoFs,
        layout: &'a RepoLayout,
        templates: &'a dyn TemplateSource,
        migrations: &'a MigrationManifestStore,
        manifests: &'a TemplateManifestStore,
        prompter: &'a dyn Prompter,
    ) -> Self {
        Self {
            fs,
            layout,
            templates,
            migrations,
            manifests,
            prompter,
        }
    }

    pub fn target_version(&self) -> &Version {
        self.templates.version()
    }

    pub fn resolve_source(&self) -> ResolvedSource {
        SourceVersionResolver::new(self.fs, self.layout, self.manifests).resolve()
    }

    pub fn ownership(&self) -> Result<OwnershipService<'a>> {
        OwnershipService::load(self.fs, self.layout, self.templates, self.manifests)
    }

    pub fn plan(&self) -> Result<(ResolvedSource, MigrationPlan)> {
        let source = self.resolve_source();
        self.reject_downgrade(&source)?;
        let plan = plan_migrations(
            self.migrations,
            self.fs,
            self.layout,
            source.version.as_ref(),
            self.target_version(),
        )?;
        Ok((source, plan))
    }

    pub fn upgrade(&self, options: &UpgradeOptions) -> Result<UpgradeReport> {
        let baseline = load_baseline(self.fs, self.layout)?;
        let pinned = read_pin(self.fs, self.layout)?;
        let managed_dir = self.layout.resolve(MANAGED_DIR);
        let first_install = baseline.is_none()
            && pinned.is_none()
            && !self
                .fs
                .exists(&managed_dir)
                .with_context(|| format!("failed to inspect {}", managed_dir.display()))?;

        if first_install {
            return self.install(options);
        }
        let (source, plan) = self.plan()?;
        self.execute(source, plan, baseline, pinned, false, options)
    }

    /// First install into a repository without any groundwork state.
    pub fn init(&self, options: &UpgradeOptions) -> Result<UpgradeReport> {
        let initialized = load_baseline(self.fs, self.layout)?.is_some()
            || read_pin(self.fs, self.layout)?.is_some();
        if initialized {
            return Err(UpgradeError::Validation(
                "repository is already initialized; run `groundwork upgrade` instead".to_string(),
            )
            .into());
        }
        self.install(options)
    }

    fn install(&self, options: &UpgradeOptions) -> Result<UpgradeReport> {
        let source = ResolvedSource {
            version: None,
            origin: SourceOrigin::Unknown,
            notes: vec!["first install".to_string()],
        };
        let plan = MigrationPlan {
            source_version: None,
            target_version: self.target_version().clone(),
            chain: Vec::new(),
            steps: Vec::new(),
        };
        self.execute(source, plan, None, None, true, options)
    }

    fn reject_downgrade(&self, source: &ResolvedSource) -> Result<()> {
        match &source.version {
            Some(from) if from > self.target_version() => Err(UpgradeError::Validation(format!(
                "repository is at {from}, newer than this release ({}); downgrades are not supported",
                self.target_version()
            ))
            .into()),
            _ => Ok(()),
        }
    }

    fn execute(
        &self,
        source: ResolvedSource,
        plan: MigrationPlan,
        baseline: Option<ManagedBaselineState>,
        pinned: Option<Version>,
        first_install: bool,
        options: &UpgradeOptions,
    ) -> Result<UpgradeReport> {
        let target = self.target_version().clone();
        let mut report = UpgradeReport::new(target.clone());
        report.first_install = first_install;
        let covered = plan.covered_paths();

        let snapshot = {
            let mut steps: Vec<Box<dyn UpgradeStep + '_>> = vec![
                Box::new(MigrationsStep::new(
                    self.fs,
                    self.layout,
                    self.prompter,
                    &plan,
                )),
                Box::new(VersionFileStep::new(self.fs, self.layout, target.clone())),
                Box::new(TemplateFilesStep::new(
                    self.fs,
                    self.layout,
                    self.templates,
                    self.manifests,
                    baseline.as_ref(),
                    pinned.as_ref(),
                    &covered,
                    options.force,
                )),
                Box::new(TemplateDirsStep::new(self.fs, self.layout, self.templates)),
                Box::new(GitignoreStep::new(self.fs, self.layout)),
                Box::new(LaunchersStep::new(self.fs, self.layout)),
                Box::new(UnknownPathsStep::new(
                    self.fs,
                    self.layout,
                    self.templates,
                    self.manifests,
                )),
            ];
            let transaction = UpgradeTransaction::new(
                self.fs,
                self.layout,
                source.version.clone(),
                target.clone(),
                baseline.clone(),
            );
            transaction.run(&mut steps, &[], &mut report)?
        };
        report.source = Some(source);
        report.plan = Some(plan);

        let provenance = if first_install {
            BaselineProvenance::WrittenByInit
        } else {
            BaselineProvenance::WrittenByUpgrade
        };
        self.refresh_baseline(&mut report, baseline.as_ref(), provenance)?;
        tracing::info!(
            snapshot = %snapshot.id,
            written = report.written_files.len(),
            pending = report.pending.len(),
            baseline_written = report.baseline_written,
            "upgrade finished"
        );
        Ok(report)
    }

    /// Rewrites the baseline from the current templates when, measured
    /// against that new baseline, no managed path would still differ.
    fn refresh_baseline(
        &self,
        report: &mut UpgradeReport,
        previous: Option<&ManagedBaselineState>,
        provenance: BaselineProvenance,
    ) -> Result<()> {
        let manifest = build_template_manifest(self.templates)?;
        let now = current_unix_timestamp()?;
        let candidate = ManagedBaselineState {
            schema_version: BASELINE_SCHEMA_VERSION,
            baseline_version: manifest.version,
            provenance,
            created_at_unix: previous.map_or(now, |state| state.created_at_unix),
            updated_at_unix: now,
            files: manifest.files,
        };

        let ownership = OwnershipService::with_state(
            self.fs,
            self.layout,
            self.templates,
            self.manifests,
            Some(candidate.clone()),
            read_pin(self.fs, self.layout)?,
        );
        let blocking = ownership.blocking_diffs()?;
        report.blocking_diffs = blocking.len();
        if !blocking.is_empty() {
            tracing::info!(
                diffs = blocking.len(),
                "managed paths still differ; keeping the previous baseline"
            );
            return Ok(());
        }

        write_baseline(self.fs, self.layout, &candidate)?;
        report.baseline_written = true;
        Ok(())
    }

    /// Writes a baseline for a repository that predates baseline tracking.
    pub fn backfill_baseline(&self) -> Result<ManagedBaselineState> {
        if load_baseline(self.fs, self.layout)?.is_some() {
            return Err(UpgradeError::Validation(
                "a baseline already exists; refusing to overwrite it".to_string(),
            )
            .into());
        }
        let now = current_unix_timestamp()?;
        let pinned = read_pin(self.fs, self.layout)?;

        if let Some(version) = &pinned {
            if let Some(manifest) = self.manifests.load(version) {
                let mismatches = self.manifest_mismatches(&manifest.files)?;
                if mismatches.is_empty() {
                    let state = ManagedBaselineState {
                        schema_version: BASELINE_SCHEMA_VERSION,
                        baseline_version: version.clone(),
                        provenance: BaselineProvenance::InferredFromPinManifest,
                        created_at_unix: now,
                        updated_at_unix: now,
                        files: manifest.files.clone(),
                    };
                    write_baseline(self.fs, self.layout, &state)?;
                    tracing::info!(version = %version, "baseline inferred from pinned manifest");
                    return Ok(state);
                }
                tracing::info!(
                    version = %version,
                    mismatches = mismatches.len(),
                    "local files differ from the pinned manifest"
                );
            }
        }

        let legacy_files = walk_rel_files(self.fs, self.layout, LEGACY_DOCS_DIR)
            .context("failed to scan legacy documentation snapshot")?;
        if legacy_files.is_empty() {
            return Err(UpgradeError::Validation(
                "no evidence for a baseline: local files do not match the pinned release and no legacy snapshot exists"
                    .to_string(),
            )
            .into());
        }
        let version = match pinned.or(self.resolve_source().version) {
            Some(version) => version,
            None => {
                return Err(UpgradeError::Validation(
                    "cannot date the legacy snapshot: the source version is unknown".to_string(),
                )
                .into())
            }
        };

        let mut files = Vec::with_capacity(legacy_files.len());
        for legacy in &legacy_files {
            let Some(rest) = legacy.strip_prefix(LEGACY_DOCS_DIR) else {
                continue;
            };
            let rel_path = format!("{DOCS_DIR}{rest}");
            let path = self.layout.resolve(legacy);
            let Some(bytes) = self
                .fs
                .read_optional(&path)
                .with_context(|| format!("failed to read {}", path.display()))?
            else {
                continue;
            };
            files.push(ManifestFileEntry::from_bytes(&rel_path, &bytes));
        }
        let state = ManagedBaselineState {
            schema_version: BASELINE_SCHEMA_VERSION,
            baseline_version: version,
            provenance: BaselineProvenance::MigratedFromLegacySnapshot,
            created_at_unix: now,
            updated_at_unix: now,
            files,
        };
        write_baseline(self.fs, self.layout, &state)?;
        tracing::info!(files = state.files.len(), "baseline migrated from legacy snapshot");
        Ok(state)
    }

    fn manifest_mismatches(&self, entries: &[ManifestFileEntry]) -> Result<Vec<String>> {
        let mut mismatches = Vec::new();
        for entry in entries {
            let path = self.layout.resolve(&entry.path);
            let local = self
                .fs
                .read_optional(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let matches = match local {
                Some(bytes) => comparable_from_bytes(entry.policy_id, &bytes) == entry.comparable()?,
                None => false,
            };
            if !matches {
                mismatches.push(entry.path.clone());
            }
        }
        Ok(mismatches)
    }
}
