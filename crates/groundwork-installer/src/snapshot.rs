use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use groundwork_core::{
    is_state_path, is_within, join_rel, load_snapshot, persist_snapshot, rel_depth, rel_parent,
    validate_snapshot_id, write_baseline, EntryKind, ManagedBaselineState, RepoFs, RepoLayout,
    SnapshotEntry, SnapshotEntryKind, SnapshotStatus, UpgradeError, UpgradeSnapshot,
    SNAPSHOT_ID_PREFIX, SNAPSHOT_SCHEMA_VERSION, STATE_DIR,
};
use semver::Version;

use crate::current_unix_timestamp;

static SNAPSHOT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub fn new_snapshot_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!(
        "{SNAPSHOT_ID_PREFIX}{}-{:09}-{}-{}",
        now.as_secs(),
        now.subsec_nanos(),
        std::process::id(),
        SNAPSHOT_SEQUENCE.fetch_add(1, Ordering::SeqCst)
    )
}

/// Sorted capture roots: duplicates, targets nested in another target and
/// anything under the state directory are dropped.
pub fn normalize_targets(targets: impl IntoIterator<Item = String>) -> Vec<String> {
    let candidates: BTreeSet<String> = targets
        .into_iter()
        .map(|target| target.trim_matches('/').to_string())
        .filter(|target| !target.is_empty() && !is_state_path(target))
        .collect();
    let mut roots: Vec<String> = Vec::new();
    let mut by_depth: Vec<String> = candidates.into_iter().collect();
    by_depth.sort_by_key(|target| rel_depth(target));
    for target in by_depth {
        if roots.iter().any(|root| is_within(&target, root)) {
            continue;
        }
        roots.push(target);
    }
    roots.sort();
    roots
}

/// `rel_path` when its parent exists, otherwise its shallowest missing
/// ancestor.
pub fn rollback_root(fs: &dyn RepoFs, layout: &RepoLayout, rel_path: &str) -> Result<String> {
    let mut candidate = rel_path;
    while let Some(parent) = rel_parent(candidate) {
        let path = layout.resolve(parent);
        let exists = fs
            .exists(&path)
            .with_context(|| format!("failed to inspect {}", path.display()))?;
        if exists {
            break;
        }
        candidate = parent;
    }
    Ok(candidate.to_string())
}

pub fn capture(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    from_version: Option<&Version>,
    to_version: &Version,
    targets: impl IntoIterator<Item = String>,
) -> Result<UpgradeSnapshot> {
    let targets = normalize_targets(targets);
    let mut entries = Vec::new();
    for target in &targets {
        capture_tree(fs, layout, target, &mut entries)?;
    }

    let snapshot = UpgradeSnapshot {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        id: new_snapshot_id(),
        created_at_unix: current_unix_timestamp()?,
        from_version: from_version.cloned(),
        to_version: to_version.clone(),
        status: SnapshotStatus::Pending,
        failed_step: None,
        error: None,
        rollback_error: None,
        prior_baseline: None,
        targets,
        entries,
    };
    tracing::debug!(
        snapshot = %snapshot.id,
        targets = snapshot.targets.len(),
        entries = snapshot.entries.len(),
        "captured upgrade snapshot"
    );
    Ok(snapshot)
}

fn capture_tree(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    root: &str,
    entries: &mut Vec<SnapshotEntry>,
) -> Result<()> {
    let mut pending = vec![root.to_string()];
    while let Some(rel_path) = pending.pop() {
        if is_state_path(&rel_path) {
            continue;
        }
        let path = layout.resolve(&rel_path);
        let meta = fs
            .metadata(&path)
            .with_context(|| format!("failed to inspect {}", path.display()))?;

        let mut entry = SnapshotEntry {
            path: rel_path.clone(),
            kind: SnapshotEntryKind::Absent,
            content_base64: None,
            mode: None,
            link_target: None,
        };
        if let Some(meta) = meta {
            match meta.kind {
                EntryKind::Dir => {
                    entry.kind = SnapshotEntryKind::Dir;
                    entry.mode = Some(meta.mode);
                    let children = fs
                        .read_dir(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    for name in children.into_iter().rev() {
                        pending.push(join_rel(&rel_path, &name));
                    }
                }
                EntryKind::File => {
                    let bytes = fs
                        .read(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    entry.kind = SnapshotEntryKind::File;
                    entry.mode = Some(meta.mode);
                    entry.content_base64 = Some(STANDARD.encode(bytes));
                }
                EntryKind::Symlink => {
                    let target = fs
                        .read_link(&path)
                        .with_context(|| format!("failed to read link {}", path.display()))?;
                    entry.kind = SnapshotEntryKind::Symlink;
                    entry.link_target = Some(target.to_string_lossy().into_owned());
                }
            }
        }
        entries.push(entry);
    }
    Ok(())
}

/// Puts captured targets back the way they were. `only` restricts the
/// restore to targets at or below a captured root.
pub fn restore(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    snapshot: &UpgradeSnapshot,
    only: Option<&[String]>,
) -> Result<()> {
    let roots = match only {
        None => snapshot.targets.clone(),
        Some(requested) => {
            let mut roots = Vec::new();
            for target in normalize_targets(requested.iter().cloned()) {
                if snapshot
                    .targets
                    .iter()
                    .any(|captured| is_within(&target, captured))
                {
                    roots.push(target);
                } else {
                    tracing::warn!(
                        snapshot = %snapshot.id,
                        target = %target,
                        "target was not captured; leaving it as is"
                    );
                }
            }
            roots
        }
    };

    let mut removal_order = roots.clone();
    removal_order.sort_by_key(|root| Reverse(rel_depth(root)));
    for root in &removal_order {
        remove_preserving_state(fs, layout, root)?;
    }

    let mut entries: Vec<&SnapshotEntry> = snapshot
        .entries
        .iter()
        .filter(|entry| roots.iter().any(|root| is_within(&entry.path, root)))
        .collect();
    entries.sort_by(|left, right| {
        rel_depth(&left.path)
            .cmp(&rel_depth(&right.path))
            .then_with(|| left.path.cmp(&right.path))
    });

    for entry in entries.iter().filter(|entry| entry.kind == SnapshotEntryKind::Dir) {
        let path = layout.resolve(&entry.path);
        fs.create_dir_all(&path)
            .with_context(|| format!("failed to restore directory {}", path.display()))?;
    }
    for entry in entries.iter().filter(|entry| entry.kind == SnapshotEntryKind::File) {
        let path = layout.resolve(&entry.path);
        let encoded = entry
            .content_base64
            .as_deref()
            .ok_or_else(|| anyhow!("snapshot entry '{}' has no content", entry.path))?;
        let bytes = STANDARD
            .decode(encoded)
            .with_context(|| format!("snapshot entry '{}' has invalid content", entry.path))?;
        create_parent(fs, &path)?;
        fs.write_atomic(&path, &bytes, entry.mode)
            .with_context(|| format!("failed to restore file {}", path.display()))?;
    }
    for entry in entries.iter().filter(|entry| entry.kind == SnapshotEntryKind::Symlink) {
        let path = layout.resolve(&entry.path);
        let target = entry
            .link_target
            .as_deref()
            .ok_or_else(|| anyhow!("snapshot entry '{}' has no link target", entry.path))?;
        create_parent(fs, &path)?;
        fs.symlink(Path::new(target), &path)
            .with_context(|| format!("failed to restore symlink {}", path.display()))?;
    }
    // Modes last so read-only directories do not block their own contents.
    for entry in entries
        .iter()
        .rev()
        .filter(|entry| entry.kind == SnapshotEntryKind::Dir)
    {
        if let Some(mode) = entry.mode {
            let path = layout.resolve(&entry.path);
            fs.set_mode(&path, mode)
                .with_context(|| format!("failed to restore mode of {}", path.display()))?;
        }
    }

    tracing::info!(snapshot = %snapshot.id, roots = roots.len(), "restored snapshot targets");
    Ok(())
}

fn create_parent(fs: &dyn RepoFs, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Removes `root`, keeping the state directory when `root` contains it.
fn remove_preserving_state(fs: &dyn RepoFs, layout: &RepoLayout, root: &str) -> Result<()> {
    if is_state_path(root) {
        return Ok(());
    }
    let path = layout.resolve(root);
    if !is_within(STATE_DIR, root) {
        return fs
            .remove_all(&path)
            .with_context(|| format!("failed to remove {}", path.display()));
    }

    match fs
        .metadata(&path)
        .with_context(|| format!("failed to inspect {}", path.display()))?
    {
        Some(meta) if meta.kind == EntryKind::Dir => {
            let children = fs
                .read_dir(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            for name in children {
                remove_preserving_state(fs, layout, &join_rel(root, &name))?;
            }
            Ok(())
        }
        _ => fs
            .remove_all(&path)
            .with_context(|| format!("failed to remove {}", path.display())),
    }
}

/// Restores every target of an applied snapshot and the baseline it replaced.
pub fn rollback_by_id(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    snapshot_id: &str,
) -> Result<UpgradeSnapshot> {
    validate_snapshot_id(snapshot_id)?;
    let mut snapshot = load_snapshot(fs, layout, snapshot_id)?
        .ok_or_else(|| anyhow!("upgrade snapshot not found: {snapshot_id}"))?;
    if snapshot.status != SnapshotStatus::Applied {
        return Err(UpgradeError::SnapshotNotApplied {
            snapshot_id: snapshot.id.clone(),
            status: snapshot.status.to_string(),
        }
        .into());
    }

    let outcome = restore(fs, layout, &snapshot, None)
        .and_then(|()| restore_baseline(fs, layout, snapshot.prior_baseline.as_ref()));
    match outcome {
        Ok(()) => {
            snapshot.status = SnapshotStatus::ManuallyRolledBack;
            persist_snapshot(fs, layout, &snapshot)?;
            tracing::info!(snapshot = %snapshot.id, "rolled back upgrade");
            Ok(snapshot)
        }
        Err(err) => {
            let message = format!("{err:#}");
            snapshot.status = SnapshotStatus::RollbackFailed;
            snapshot.rollback_error = Some(message.clone());
            if let Err(persist_err) = persist_snapshot(fs, layout, &snapshot) {
                tracing::warn!(
                    snapshot = %snapshot.id,
                    error = %format!("{persist_err:#}"),
                    "failed to record rollback failure"
                );
            }
            Err(UpgradeError::RollbackFailed {
                snapshot_id: snapshot.id,
                message,
            }
            .into())
        }
    }
}

fn restore_baseline(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    prior: Option<&ManagedBaselineState>,
) -> Result<()> {
    match prior {
        Some(state) => write_baseline(fs, layout, state),
        None => {
            let path = layout.baseline_path();
            fs.remove_all(&path)
                .with_context(|| format!("failed to remove {}", path.display()))
        }
    }
}
