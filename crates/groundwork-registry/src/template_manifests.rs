use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use groundwork_core::{ManifestFileEntry, TemplateManifest};
use semver::Version;

use crate::embedded::embedded_corpus;

#[derive(Debug, Clone, Default)]
pub struct TemplateManifestStore {
    manifests: Arc<BTreeMap<Version, TemplateManifest>>,
}

impl TemplateManifestStore {
    pub fn embedded() -> Result<Self> {
        Ok(embedded_corpus()?.templates.clone())
    }

    pub fn from_sources(sources: &[(&str, &str)]) -> Result<Self> {
        let mut manifests = Vec::with_capacity(sources.len());
        for (file_name, input) in sources {
            let manifest = TemplateManifest::from_json_str(input)
                .with_context(|| format!("invalid template manifest {file_name}"))?;
            let expected = format!("{}.json", manifest.version);
            if *file_name != expected {
                return Err(anyhow!(
                    "template manifest {file_name} declares version {} (expected file name {expected})",
                    manifest.version
                ));
            }
            manifests.push(manifest);
        }
        Self::from_manifests(manifests)
    }

    pub fn from_manifests(manifests: Vec<TemplateManifest>) -> Result<Self> {
        let mut by_version = BTreeMap::new();
        for manifest in manifests {
            manifest.validate()?;
            let version = manifest.version.clone();
            if by_version.insert(version.clone(), manifest).is_some() {
                return Err(anyhow!("duplicate template manifest for version {version}"));
            }
        }
        Ok(Self {
            manifests: Arc::new(by_version),
        })
    }

    pub fn list_versions(&self) -> Vec<Version> {
        self.manifests.keys().cloned().collect()
    }

    pub fn load(&self, version: &Version) -> Option<&TemplateManifest> {
        self.manifests.get(version)
    }

    pub fn entry_for(&self, version: &Version, path: &str) -> Option<&ManifestFileEntry> {
        self.load(version).and_then(|manifest| manifest.entry(path))
    }

    /// All manifests, ascending by version.
    pub fn manifests(&self) -> impl Iterator<Item = &TemplateManifest> {
        self.manifests.values()
    }
}
