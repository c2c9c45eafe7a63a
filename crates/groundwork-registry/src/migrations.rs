use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use groundwork_core::UpgradeMigrationManifest;
use semver::Version;

use crate::embedded::embedded_corpus;

/// Read-only view over every release's migration manifest, keyed by target
/// version.
#[derive(Debug, Clone, Default)]
pub struct MigrationManifestStore {
    manifests: Arc<BTreeMap<Version, UpgradeMigrationManifest>>,
}

impl MigrationManifestStore {
    pub fn embedded() -> Result<Self> {
        Ok(embedded_corpus()?.migrations.clone())
    }

    /// Builds a store from `(file_name, json)` pairs, validating each one.
    pub fn from_sources(sources: &[(&str, &str)]) -> Result<Self> {
        let mut manifests = BTreeMap::new();
        for (file_name, input) in sources {
            let manifest = UpgradeMigrationManifest::from_named_json(file_name, input)?;
            let version = manifest.target_version.clone();
            if manifests.insert(version.clone(), manifest).is_some() {
                return Err(anyhow!(
                    "duplicate migration manifest for version {version}"
                ));
            }
        }
        Ok(Self {
            manifests: Arc::new(manifests),
        })
    }

    pub fn from_manifests(manifests: Vec<UpgradeMigrationManifest>) -> Result<Self> {
        let mut by_version = BTreeMap::new();
        for manifest in manifests {
            manifest.validate()?;
            let version = manifest.target_version.clone();
            if by_version.insert(version.clone(), manifest).is_some() {
                return Err(anyhow!(
                    "duplicate migration manifest for version {version}"
                ));
            }
        }
        Ok(Self {
            manifests: Arc::new(by_version),
        })
    }

    pub fn list_versions(&self) -> Vec<Version> {
        self.manifests.keys().cloned().collect()
    }

    /// Returns the manifest whose `target_version` is `version`, re-validated.
    pub fn load_manifest(&self, version: &Version) -> Result<Option<UpgradeMigrationManifest>> {
        let Some(manifest) = self.manifests.get(version) else {
            return Ok(None);
        };
        manifest
            .validate()
            .with_context(|| format!("migration manifest {version} failed validation"))?;
        Ok(Some(manifest.clone()))
    }

    /// Manifests with `after < target_version <= up_to`, ascending.
    pub fn manifests_between(
        &self,
        after: &Version,
        up_to: &Version,
    ) -> Result<Vec<UpgradeMigrationManifest>> {
        let mut selected = Vec::new();
        for (version, manifest) in self.manifests.iter() {
            if version > after && version <= up_to {
                manifest
                    .validate()
                    .with_context(|| format!("migration manifest {version} failed validation"))?;
                selected.push(manifest.clone());
            }
        }
        Ok(selected)
    }
}
