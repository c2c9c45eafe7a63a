use anstyle::{AnsiColor, Effects, Style};
use groundwork_core::{ManagedBaselineState, SnapshotScan, SnapshotStatus, UpgradeSnapshot};
use groundwork_installer::{OwnershipClassification, OwnershipLabel, UpgradeReport};
use groundwork_resolver::{MigrationPlan, PlannedOperation, PlannedStatus, ResolvedSource};
use semver::Version;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn output_style(plain: bool, no_color: Option<String>, is_terminal: bool) -> OutputStyle {
    let no_color = no_color.is_some_and(|value| !value.is_empty());
    if plain || no_color || !is_terminal {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "err" => "[ERR]",
        _ => "[..]",
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(colorize(section_style(), &format!("== {title} =="))),
    }
}

fn push_section(lines: &mut Vec<String>, style: OutputStyle, title: &str) {
    if let Some(header) = render_section_header(style, title) {
        lines.push(header);
    }
}

fn version_or_unknown(version: Option<&Version>) -> String {
    version.map_or_else(|| "unknown".to_string(), ToString::to_string)
}

pub(crate) fn format_classification(classification: &OwnershipClassification) -> String {
    let mut details = Vec::new();
    if let Some(confidence) = classification.confidence {
        details.push(format!("confidence={}", confidence.as_str()));
    }
    if let Some(source) = classification.baseline_source {
        details.push(format!("baseline={}", source.as_str()));
    }
    let reasons: Vec<&str> = classification
        .reasons
        .iter()
        .map(|reason| reason.as_str())
        .collect();
    if !reasons.is_empty() {
        details.push(format!("reasons={}", reasons.join(",")));
    }

    if details.is_empty() {
        format!("{}: {}", classification.path, classification.label)
    } else {
        format!(
            "{}: {} ({})",
            classification.path,
            classification.label,
            details.join(" ")
        )
    }
}

fn classification_status(classification: &OwnershipClassification) -> &'static str {
    if classification.is_user_section_only() {
        return "..";
    }
    match classification.label {
        OwnershipLabel::UpstreamTemplateDelta => "..",
        OwnershipLabel::LocalCustomization
        | OwnershipLabel::MixedUpstreamAndLocal
        | OwnershipLabel::UnknownNoBaseline => "warn",
    }
}

fn format_source(source: &ResolvedSource) -> String {
    format!(
        "source {} (from {})",
        version_or_unknown(source.version.as_ref()),
        source.origin
    )
}

pub(crate) fn format_status_lines(
    target: &Version,
    source: &ResolvedSource,
    baseline: Option<&ManagedBaselineState>,
    classifications: &[OwnershipClassification],
    style: OutputStyle,
) -> Vec<String> {
    let mut lines = Vec::new();
    push_section(&mut lines, style, "status");
    lines.push(render_status_line(style, "..", &format_source(source)));
    lines.push(render_status_line(style, "..", &format!("templates {target}")));
    match baseline {
        Some(state) => lines.push(render_status_line(
            style,
            "..",
            &format!(
                "baseline {} ({}, {} file(s))",
                state.baseline_version,
                state.provenance.as_str(),
                state.files.len()
            ),
        )),
        None => lines.push(render_status_line(
            style,
            "warn",
            "no baseline recorded; run `groundwork baseline backfill`",
        )),
    }

    if classifications.is_empty() {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("managed files match templates {target}"),
        ));
        return lines;
    }
    push_section(&mut lines, style, "differences");
    for classification in classifications {
        lines.push(render_status_line(
            style,
            classification_status(classification),
            &format_classification(classification),
        ));
    }
    lines
}

fn planned_status(status: PlannedStatus) -> &'static str {
    match status {
        PlannedStatus::Applied => "ok",
        PlannedStatus::SkippedUnknownSource | PlannedStatus::SkippedSourceTooOld => "warn",
        PlannedStatus::Planned | PlannedStatus::NoOp => "..",
    }
}

fn format_planned_operation(step: &PlannedOperation) -> String {
    let mut line = format!(
        "{} {} ({}): {}",
        step.manifest_version, step.operation.id, step.operation.kind, step.status
    );
    if let Some(reason) = &step.reason {
        line.push_str(&format!(" - {reason}"));
    }
    if !step.covered_paths.is_empty() {
        line.push_str(&format!(" [covers {}]", step.covered_paths.join(", ")));
    }
    line
}

pub(crate) fn format_plan_lines(
    source: &ResolvedSource,
    plan: &MigrationPlan,
    style: OutputStyle,
) -> Vec<String> {
    let mut lines = Vec::new();
    push_section(&mut lines, style, "plan");
    lines.push(render_status_line(style, "..", &format_source(source)));
    for note in &source.notes {
        lines.push(render_status_line(style, "..", &format!("note: {note}")));
    }
    lines.push(render_status_line(
        style,
        "..",
        &format!("target {}", plan.target_version),
    ));

    if plan.steps.is_empty() {
        lines.push(render_status_line(style, "ok", "no migrations to run"));
        return lines;
    }
    let chain: Vec<String> = plan.chain.iter().map(ToString::to_string).collect();
    lines.push(render_status_line(
        style,
        "..",
        &format!("chain {}", chain.join(" -> ")),
    ));
    for step in &plan.steps {
        lines.push(render_status_line(
            style,
            planned_status(step.status),
            &format_planned_operation(step),
        ));
    }
    lines
}

pub(crate) fn format_upgrade_report(report: &UpgradeReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    push_section(&mut lines, style, "upgrade");
    let headline = if report.first_install {
        format!("installed groundwork {}", report.target_version)
    } else {
        let from = report
            .source
            .as_ref()
            .and_then(|source| source.version.as_ref());
        format!(
            "upgraded {} -> {}",
            version_or_unknown(from),
            report.target_version
        )
    };
    lines.push(render_status_line(style, "ok", &headline));
    if let Some(snapshot_id) = &report.snapshot_id {
        lines.push(render_status_line(
            style,
            "..",
            &format!("snapshot {snapshot_id}"),
        ));
    }

    for operation in &report.operations {
        lines.push(render_status_line(
            style,
            planned_status(operation.status),
            &format!(
                "migration {} ({}, {}): {}",
                operation.id, operation.kind, operation.manifest_version, operation.status
            ),
        ));
    }
    if let Some(plan) = &report.plan {
        for step in plan.steps.iter().filter(|step| step.status.is_skipped()) {
            lines.push(render_status_line(
                style,
                "warn",
                &format_planned_operation(step),
            ));
        }
    }

    for path in &report.written_files {
        lines.push(render_status_line(style, "ok", &format!("wrote {path}")));
    }
    for dir in &report.created_dirs {
        lines.push(render_status_line(style, "ok", &format!("created {dir}/")));
    }
    for path in &report.launchers {
        lines.push(render_status_line(style, "..", &format!("launcher {path}")));
    }
    if report.gitignore_updated {
        lines.push(render_status_line(style, "ok", "updated .gitignore"));
    }
    for path in &report.removed_stale {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("removed stale {path}"),
        ));
    }
    for path in &report.unknown_paths {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("unknown file left in place: {path}"),
        ));
    }
    for classification in &report.pending {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("kept {}", format_classification(classification)),
        ));
    }

    if report.baseline_written {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("baseline recorded for {}", report.target_version),
        ));
    } else {
        lines.push(render_status_line(
            style,
            "warn",
            &format!(
                "baseline kept: {} managed path(s) still differ; see `groundwork status`",
                report.blocking_diffs
            ),
        ));
    }
    lines
}

fn snapshot_status(status: SnapshotStatus) -> &'static str {
    match status {
        SnapshotStatus::Applied => "ok",
        SnapshotStatus::RollbackFailed => "err",
        SnapshotStatus::Pending | SnapshotStatus::AutoRolledBack => "warn",
        SnapshotStatus::ManuallyRolledBack => "..",
    }
}

pub(crate) fn format_snapshot_lines(scan: &SnapshotScan, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    push_section(&mut lines, style, "snapshots");
    if scan.snapshots.is_empty() && scan.unreadable.is_empty() {
        lines.push(render_status_line(style, "..", "no upgrade snapshots recorded"));
        return lines;
    }
    for unreadable in &scan.unreadable {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("unreadable snapshot {}: {}", unreadable.id, unreadable.error),
        ));
    }
    for snapshot in &scan.snapshots {
        let mut line = format!(
            "{} {} {} -> {} targets={}",
            snapshot.id,
            snapshot.status,
            version_or_unknown(snapshot.from_version.as_ref()),
            snapshot.to_version,
            snapshot.targets.len()
        );
        if let Some(step) = &snapshot.failed_step {
            line.push_str(&format!(" failed_step={step}"));
        }
        if let Some(error) = &snapshot.rollback_error {
            line.push_str(&format!(" rollback_error={error}"));
        }
        lines.push(render_status_line(style, snapshot_status(snapshot.status), &line));
    }
    lines
}

pub(crate) fn format_rollback_line(snapshot: &UpgradeSnapshot, style: OutputStyle) -> String {
    render_status_line(
        style,
        "ok",
        &format!(
            "rolled back snapshot {} ({} -> {})",
            snapshot.id,
            snapshot.to_version,
            version_or_unknown(snapshot.from_version.as_ref())
        ),
    )
}

pub(crate) fn format_backfill_line(state: &ManagedBaselineState, style: OutputStyle) -> String {
    render_status_line(
        style,
        "ok",
        &format!(
            "baseline {} written ({}, {} file(s))",
            state.baseline_version,
            state.provenance.as_str(),
            state.files.len()
        ),
    )
}

pub(crate) fn format_versions_lines(
    current: &Version,
    migration_versions: &[Version],
    manifest_versions: &[Version],
    style: OutputStyle,
) -> Vec<String> {
    let join = |versions: &[Version]| -> String {
        if versions.is_empty() {
            return "none".to_string();
        }
        versions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut lines = Vec::new();
    push_section(&mut lines, style, "versions");
    lines.push(render_status_line(style, "..", &format!("templates {current}")));
    lines.push(render_status_line(
        style,
        "..",
        &format!("releases {}", join(manifest_versions)),
    ));
    lines.push(render_status_line(
        style,
        "..",
        &format!("migrations {}", join(migration_versions)),
    ));
    lines
}
