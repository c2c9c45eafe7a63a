use std::cmp::Reverse;

use anyhow::{Context, Result};
use semver::Version;

use crate::baseline::ManagedBaselineState;
use crate::fs::{EntryKind, RepoFs};
use crate::layout::RepoLayout;
use crate::snapshot::{is_valid_snapshot_id, validate_snapshot_id, UpgradeSnapshot};
use crate::version::parse_canonical_version;

pub fn read_pin(fs: &dyn RepoFs, layout: &RepoLayout) -> Result<Option<Version>> {
    let path = layout.pin_path();
    let Some(raw) = fs
        .read_optional(&path)
        .with_context(|| format!("failed to read pin: {}", path.display()))?
    else {
        return Ok(None);
    };

    let value = String::from_utf8_lossy(&raw);
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let version = parse_canonical_version(trimmed)
        .with_context(|| format!("invalid pin: {}", path.display()))?;
    Ok(Some(version))
}

pub fn write_pin(fs: &dyn RepoFs, layout: &RepoLayout, version: &Version) -> Result<()> {
    let path = layout.pin_path();
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent)
            .with_context(|| format!("failed to create pin dir: {}", parent.display()))?;
    }
    fs.write_atomic(&path, format!("{version}\n").as_bytes(), None)
        .with_context(|| format!("failed to write pin: {}", path.display()))
}

pub fn load_baseline(fs: &dyn RepoFs, layout: &RepoLayout) -> Result<Option<ManagedBaselineState>> {
    let path = layout.baseline_path();
    let Some(raw) = fs
        .read_optional(&path)
        .with_context(|| format!("failed to read baseline state: {}", path.display()))?
    else {
        return Ok(None);
    };
    let raw = String::from_utf8(raw)
        .with_context(|| format!("baseline state is not UTF-8: {}", path.display()))?;
    let state = ManagedBaselineState::from_json_str(&raw)
        .with_context(|| format!("failed parsing baseline state: {}", path.display()))?;
    Ok(Some(state))
}

pub fn write_baseline(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    state: &ManagedBaselineState,
) -> Result<()> {
    let path = layout.baseline_path();
    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let content = state.to_json_string()?;
    fs.write_atomic(&path, content.as_bytes(), None)
        .with_context(|| format!("failed to write baseline state: {}", path.display()))
}

pub fn persist_snapshot(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    snapshot: &UpgradeSnapshot,
) -> Result<()> {
    validate_snapshot_id(&snapshot.id)?;
    let dir = layout.snapshots_dir();
    fs.create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = layout.snapshot_path(&snapshot.id);
    let content = snapshot.to_json_string()?;
    fs.write_atomic(&path, content.as_bytes(), None)
        .with_context(|| format!("failed to write upgrade snapshot: {}", path.display()))
}

pub fn load_snapshot(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    snapshot_id: &str,
) -> Result<Option<UpgradeSnapshot>> {
    validate_snapshot_id(snapshot_id)?;
    let path = layout.snapshot_path(snapshot_id);
    let Some(raw) = fs
        .read_optional(&path)
        .with_context(|| format!("failed to read upgrade snapshot: {}", path.display()))?
    else {
        return Ok(None);
    };
    let raw = String::from_utf8(raw)
        .with_context(|| format!("upgrade snapshot is not UTF-8: {}", path.display()))?;
    let snapshot = UpgradeSnapshot::from_json_str(&raw)
        .with_context(|| format!("failed parsing upgrade snapshot: {}", path.display()))?;
    Ok(Some(snapshot))
}

/// A snapshot file that exists under a valid id but could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableSnapshot {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct SnapshotScan {
    /// Newest first.
    pub snapshots: Vec<UpgradeSnapshot>,
    pub unreadable: Vec<UnreadableSnapshot>,
}

/// Loads every persisted snapshot. Files whose names are not valid snapshot
/// ids are ignored; files that fail to load are set aside, not fatal.
pub fn scan_snapshots(fs: &dyn RepoFs, layout: &RepoLayout) -> Result<SnapshotScan> {
    let dir = layout.snapshots_dir();
    let mut scan = SnapshotScan::default();
    match fs.metadata(&dir)? {
        Some(meta) if meta.kind == EntryKind::Dir => {}
        _ => return Ok(scan),
    }

    for name in fs
        .read_dir(&dir)
        .with_context(|| format!("failed to read snapshot directory: {}", dir.display()))?
    {
        let Some(snapshot_id) = name.strip_suffix(".json") else {
            continue;
        };
        if !is_valid_snapshot_id(snapshot_id) {
            continue;
        }
        match load_snapshot(fs, layout, snapshot_id) {
            Ok(Some(snapshot)) => scan.snapshots.push(snapshot),
            Ok(None) => {}
            Err(err) => scan.unreadable.push(UnreadableSnapshot {
                id: snapshot_id.to_string(),
                error: format!("{err:#}"),
            }),
        }
    }
    scan.snapshots
        .sort_by_key(|snapshot| Reverse((snapshot.created_at_unix, snapshot.id.clone())));
    Ok(scan)
}

/// Every loadable snapshot, newest first.
pub fn list_snapshots(fs: &dyn RepoFs, layout: &RepoLayout) -> Result<Vec<UpgradeSnapshot>> {
    Ok(scan_snapshots(fs, layout)?.snapshots)
}
