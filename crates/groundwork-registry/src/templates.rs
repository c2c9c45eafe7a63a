use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Result};
use groundwork_core::{
    is_within, parse_canonical_version, rel_depth, rel_parent, validate_rel_path, ManifestFileEntry,
    TemplateManifest, TEMPLATE_MANIFEST_SCHEMA_VERSION,
};
use semver::Version;

use crate::embedded::{CURRENT_VERSION, EMBEDDED_TEMPLATE_FILES};

/// Template content for one release. Logical names are repository-relative
/// paths.
pub trait TemplateSource {
    fn version(&self) -> &Version;

    fn read(&self, logical_name: &str) -> Result<Vec<u8>>;

    /// Visits every logical file at or below `root` (`""` for all) in
    /// lexicographic order.
    fn walk(&self, root: &str, visit: &mut dyn FnMut(&str) -> Result<()>) -> Result<()>;

    fn contains(&self, logical_name: &str) -> bool {
        self.read(logical_name).is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddedTemplates {
    version: Version,
}

impl EmbeddedTemplates {
    pub fn new() -> Result<Self> {
        Ok(Self {
            version: parse_canonical_version(CURRENT_VERSION)?,
        })
    }
}

impl TemplateSource for EmbeddedTemplates {
    fn version(&self) -> &Version {
        &self.version
    }

    fn read(&self, logical_name: &str) -> Result<Vec<u8>> {
        EMBEDDED_TEMPLATE_FILES
            .iter()
            .find(|(name, _)| *name == logical_name)
            .map(|(_, content)| content.as_bytes().to_vec())
            .ok_or_else(|| anyhow!("template-missing: no embedded template '{logical_name}'"))
    }

    fn walk(&self, root: &str, visit: &mut dyn FnMut(&str) -> Result<()>) -> Result<()> {
        let names: BTreeSet<&str> = EMBEDDED_TEMPLATE_FILES
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| root.is_empty() || is_within(name, root))
            .collect();
        for name in names {
            visit(name)?;
        }
        Ok(())
    }

    fn contains(&self, logical_name: &str) -> bool {
        EMBEDDED_TEMPLATE_FILES
            .iter()
            .any(|(name, _)| *name == logical_name)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryTemplates {
    version: Version,
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryTemplates {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            files: BTreeMap::new(),
        }
    }

    pub fn with_file(mut self, logical_name: &str, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(logical_name.to_string(), content.into());
        self
    }

    pub fn insert(&mut self, logical_name: &str, content: impl Into<Vec<u8>>) {
        self.files.insert(logical_name.to_string(), content.into());
    }
}

impl TemplateSource for MemoryTemplates {
    fn version(&self) -> &Version {
        &self.version
    }

    fn read(&self, logical_name: &str) -> Result<Vec<u8>> {
        self.files
            .get(logical_name)
            .cloned()
            .ok_or_else(|| anyhow!("template-missing: no template '{logical_name}'"))
    }

    fn walk(&self, root: &str, visit: &mut dyn FnMut(&str) -> Result<()>) -> Result<()> {
        for name in self.files.keys() {
            if root.is_empty() || is_within(name, root) {
                visit(name)?;
            }
        }
        Ok(())
    }

    fn contains(&self, logical_name: &str) -> bool {
        self.files.contains_key(logical_name)
    }
}

pub fn list_files(source: &dyn TemplateSource) -> Result<Vec<String>> {
    let mut files = Vec::new();
    source.walk("", &mut |name| {
        files.push(name.to_string());
        Ok(())
    })?;
    Ok(files)
}

/// Every directory implied by the template tree, shallowest first.
pub fn template_dirs(source: &dyn TemplateSource) -> Result<Vec<String>> {
    let mut dirs = BTreeSet::new();
    for file in list_files(source)? {
        let mut current = rel_parent(&file);
        while let Some(dir) = current {
            if !dirs.insert(dir.to_string()) {
                break;
            }
            current = rel_parent(dir);
        }
    }
    let mut dirs: Vec<String> = dirs.into_iter().collect();
    dirs.sort_by(|left, right| {
        rel_depth(left)
            .cmp(&rel_depth(right))
            .then_with(|| left.cmp(right))
    });
    Ok(dirs)
}

pub fn build_template_manifest(source: &dyn TemplateSource) -> Result<TemplateManifest> {
    let mut files = Vec::new();
    for name in list_files(source)? {
        validate_rel_path(&name)?;
        let bytes = source.read(&name)?;
        files.push(ManifestFileEntry::from_bytes(&name, &bytes));
    }
    let manifest = TemplateManifest {
        schema_version: TEMPLATE_MANIFEST_SCHEMA_VERSION,
        version: source.version().clone(),
        files,
    };
    manifest.validate()?;
    Ok(manifest)
}
