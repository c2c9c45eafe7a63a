use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use groundwork_core::{
    is_docs_path, load_baseline, normalized_hash, parse_canonical_version, read_pin,
    scan_snapshots, walk_rel_files, RepoFs, RepoLayout, SnapshotEntryKind, DOCS_DIR, PIN_PATH,
};
use groundwork_registry::TemplateManifestStore;
use semver::Version;

use crate::types::{ResolvedSource, SourceOrigin};

pub struct SourceVersionResolver<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
    templates: &'a TemplateManifestStore,
}

impl<'a> SourceVersionResolver<'a> {
    pub fn new(
        fs: &'a dyn RepoFs,
        layout: &'a RepoLayout,
        templates: &'a TemplateManifestStore,
    ) -> Self {
        Self {
            fs,
            layout,
            templates,
        }
    }

    pub fn resolve(&self) -> ResolvedSource {
        let mut notes = Vec::new();

        match read_pin(self.fs, self.layout) {
            Ok(Some(version)) => return resolved(version, SourceOrigin::PinFile, notes),
            Ok(None) => notes.push(format!("pin file {PIN_PATH} is absent")),
            Err(err) => notes.push(format!("pin file unusable: {err:#}")),
        }

        match load_baseline(self.fs, self.layout) {
            Ok(Some(state)) => {
                return resolved(state.baseline_version, SourceOrigin::BaselineState, notes)
            }
            Ok(None) => notes.push("baseline state is absent".to_string()),
            Err(err) => notes.push(format!("baseline state unusable: {err:#}")),
        }

        match self.version_from_snapshots(&mut notes) {
            Ok(Some(version)) => {
                return resolved(version, SourceOrigin::UpgradeSnapshot, notes)
            }
            Ok(None) => notes.push("no upgrade snapshot captured a pin file".to_string()),
            Err(err) => notes.push(format!("upgrade snapshots unusable: {err:#}")),
        }

        match self.version_from_manifest_match() {
            Ok(Some(version)) => return resolved(version, SourceOrigin::ManifestMatch, notes),
            Ok(None) => {}
            Err(err) => notes.push(format!("documentation tree unusable: {err:#}")),
        }

        tracing::info!(notes = notes.len(), "source version could not be determined");
        ResolvedSource {
            version: None,
            origin: SourceOrigin::Unknown,
            notes,
        }
    }

    /// Pin captured by the newest snapshot that holds a usable one; snapshots
    /// that cannot be read or hold a broken pin are noted and passed over.
    fn version_from_snapshots(&self, notes: &mut Vec<String>) -> Result<Option<Version>> {
        let scan = scan_snapshots(self.fs, self.layout)?;
        for unreadable in &scan.unreadable {
            notes.push(format!(
                "upgrade snapshot {} skipped: {}",
                unreadable.id, unreadable.error
            ));
        }
        for snapshot in scan.snapshots {
            let Some(entry) = snapshot.entry(PIN_PATH) else {
                continue;
            };
            if entry.kind != SnapshotEntryKind::File {
                continue;
            }
            let Some(encoded) = entry.content_base64.as_deref() else {
                continue;
            };
            let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(bytes) => bytes,
                Err(err) => {
                    notes.push(format!(
                        "upgrade snapshot {} skipped: invalid base64: {err}",
                        snapshot.id
                    ));
                    continue;
                }
            };
            let raw = String::from_utf8_lossy(&bytes);
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            match parse_canonical_version(raw) {
                Ok(version) => {
                    tracing::debug!(
                        snapshot = %snapshot.id,
                        %version,
                        "source version from snapshot"
                    );
                    return Ok(Some(version));
                }
                Err(err) => notes.push(format!(
                    "upgrade snapshot {} skipped: invalid pin: {err:#}",
                    snapshot.id
                )),
            }
        }
        Ok(None)
    }

    /// Matches the local documentation tree against every release manifest's
    /// documentation entries; only a single exact match counts.
    fn version_from_manifest_match(&self) -> Result<Option<Version>> {
        let mut local = BTreeMap::new();
        for path in walk_rel_files(self.fs, self.layout, DOCS_DIR)? {
            let bytes = self
                .fs
                .read(&self.layout.resolve(&path))
                .with_context(|| format!("failed to read {path}"))?;
            local.insert(path, normalized_hash(&bytes));
        }
        if local.is_empty() {
            return Err(anyhow!("{DOCS_DIR} holds no files"));
        }

        let matches: Vec<&Version> = self
            .templates
            .manifests()
            .filter(|manifest| {
                let expected: BTreeMap<String, String> = manifest
                    .files
                    .iter()
                    .filter(|entry| is_docs_path(&entry.path))
                    .map(|entry| (entry.path.clone(), entry.normalized_full_hash.clone()))
                    .collect();
                expected == local
            })
            .map(|manifest| &manifest.version)
            .collect();

        match matches.as_slice() {
            [version] => Ok(Some((*version).clone())),
            [] => Err(anyhow!("no release manifest matches {DOCS_DIR}")),
            several => {
                let listed: Vec<String> = several.iter().map(|v| v.to_string()).collect();
                Err(anyhow!(
                    "{DOCS_DIR} matches several releases ({})",
                    listed.join(", ")
                ))
            }
        }
    }
}

fn resolved(version: Version, origin: SourceOrigin, notes: Vec<String>) -> ResolvedSource {
    tracing::debug!(%version, origin = origin.as_str(), "resolved source version");
    ResolvedSource {
        version: Some(version),
        origin,
        notes,
    }
}
