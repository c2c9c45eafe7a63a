use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use groundwork_core::{scan_snapshots, OsFs, RepoFs, RepoLayout};
use groundwork_installer::{rollback_by_id, UpgradeOptions, Upgrader};
use groundwork_registry::{
    EmbeddedTemplates, MigrationManifestStore, TemplateManifestStore, TemplateSource,
};

use crate::prompt::select_prompter;
use crate::render::{
    format_backfill_line, format_plan_lines, format_rollback_line, format_snapshot_lines,
    format_status_lines, format_upgrade_report, format_versions_lines, output_style, OutputStyle,
};
use crate::{BaselineCommands, Cli, Commands};

pub(crate) const ROOT_ENV: &str = "GROUNDWORK_ROOT";

/// Templates and manifests compiled into this binary.
pub(crate) struct Corpus {
    pub(crate) templates: EmbeddedTemplates,
    pub(crate) migrations: MigrationManifestStore,
    pub(crate) manifests: TemplateManifestStore,
}

impl Corpus {
    pub(crate) fn embedded() -> Result<Self> {
        Ok(Self {
            templates: EmbeddedTemplates::new().context("failed to load embedded templates")?,
            migrations: MigrationManifestStore::embedded()
                .context("failed to load embedded migration manifests")?,
            manifests: TemplateManifestStore::embedded()
                .context("failed to load embedded template manifests")?,
        })
    }
}

pub(crate) fn resolve_root(flag: Option<PathBuf>, env_value: Option<String>) -> Result<PathBuf> {
    if let Some(root) = flag {
        return Ok(root);
    }
    if let Some(value) = env_value.filter(|value| !value.trim().is_empty()) {
        return Ok(PathBuf::from(value));
    }
    std::env::current_dir().context("failed to resolve current directory")
}

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let fs = OsFs;
    let style = output_style(
        cli.plain,
        fs.lookup_env("NO_COLOR"),
        std::io::stdout().is_terminal(),
    );
    let root = resolve_root(cli.root, fs.lookup_env(ROOT_ENV))?;
    let layout = RepoLayout::new(root);
    let corpus = Corpus::embedded()?;
    let prompter = select_prompter(cli.yes);
    let upgrader = Upgrader::new(
        &fs,
        &layout,
        &corpus.templates,
        &corpus.migrations,
        &corpus.manifests,
        prompter.as_ref(),
    );
    tracing::debug!(root = %layout.root().display(), command = ?cli.command, "dispatching command");

    for line in run_command(cli.command, &upgrader, &fs, &layout, &corpus, style)? {
        println!("{line}");
    }
    Ok(())
}

pub(crate) fn run_command(
    command: Commands,
    upgrader: &Upgrader<'_>,
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    corpus: &Corpus,
    style: OutputStyle,
) -> Result<Vec<String>> {
    let lines = match command {
        Commands::Init { force } => {
            let report = upgrader.init(&UpgradeOptions { force })?;
            format_upgrade_report(&report, style)
        }
        Commands::Status => {
            let source = upgrader.resolve_source();
            let ownership = upgrader.ownership()?;
            let classifications = ownership.classify_all()?;
            format_status_lines(
                upgrader.target_version(),
                &source,
                ownership.baseline(),
                &classifications,
                style,
            )
        }
        Commands::Plan => {
            let (source, plan) = upgrader.plan()?;
            format_plan_lines(&source, &plan, style)
        }
        Commands::Upgrade { force } => {
            let report = upgrader.upgrade(&UpgradeOptions { force })?;
            format_upgrade_report(&report, style)
        }
        Commands::Rollback { snapshot_id } => {
            let snapshot = rollback_by_id(fs, layout, &snapshot_id)?;
            vec![format_rollback_line(&snapshot, style)]
        }
        Commands::Snapshots => {
            let scan = scan_snapshots(fs, layout)?;
            format_snapshot_lines(&scan, style)
        }
        Commands::Baseline {
            command: BaselineCommands::Backfill,
        } => {
            let state = upgrader.backfill_baseline()?;
            vec![format_backfill_line(&state, style)]
        }
        Commands::Versions => format_versions_lines(
            corpus.templates.version(),
            &corpus.migrations.list_versions(),
            &corpus.manifests.list_versions(),
            style,
        ),
    };
    Ok(lines)
}
