use std::collections::HashSet;
use std::fmt;

use anyhow::{anyhow, Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::layout::{is_within, validate_rel_path, CONFIG_PATH};
use crate::manifest::validate_release_version;

pub const MIGRATION_MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    RenameFile,
    RenameDir,
    RenameGenerated,
    DeletePath,
    ConfigRenameKey,
    ConfigSetDefault,
    MigrateSkillsFormat,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RenameFile => "rename_file",
            Self::RenameDir => "rename_dir",
            Self::RenameGenerated => "rename_generated",
            Self::DeletePath => "delete_path",
            Self::ConfigRenameKey => "config_rename_key",
            Self::ConfigSetDefault => "config_set_default",
            Self::MigrateSkillsFormat => "migrate_skills_format",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOperation {
    pub id: String,
    pub kind: OperationKind,
    pub rationale: String,
    #[serde(default)]
    pub source_agnostic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl MigrationOperation {
    pub fn required<'a>(&'a self, field: &str, value: &'a Option<String>) -> Result<&'a str> {
        match value.as_deref() {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(anyhow!(
                "operation '{}' ({}) requires field '{field}'",
                self.id,
                self.kind
            )),
        }
    }

    pub fn from_field(&self) -> Result<&str> {
        self.required("from", &self.from)
    }

    pub fn to_field(&self) -> Result<&str> {
        self.required("to", &self.to)
    }

    pub fn path_field(&self) -> Result<&str> {
        self.required("path", &self.path)
    }

    pub fn key_field(&self) -> Result<&str> {
        self.required("key", &self.key)
    }

    pub fn value_field(&self) -> Result<&str> {
        self.required("value", &self.value)
    }

    /// Config document targeted by `config_*` operations.
    pub fn config_path(&self) -> &str {
        self.path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .unwrap_or(CONFIG_PATH)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(anyhow!("operation id must not be empty"));
        }
        if self.rationale.trim().is_empty() {
            return Err(anyhow!("operation '{}' must carry a rationale", self.id));
        }

        match self.kind {
            OperationKind::RenameFile | OperationKind::RenameDir | OperationKind::RenameGenerated => {
                let from = self.from_field()?;
                let to = self.to_field()?;
                validate_rel_path(from).with_context(|| format!("operation '{}'", self.id))?;
                validate_rel_path(to).with_context(|| format!("operation '{}'", self.id))?;
                if from == to {
                    return Err(anyhow!(
                        "operation '{}' renames '{from}' onto itself",
                        self.id
                    ));
                }
                if is_within(to, from) || is_within(from, to) {
                    return Err(anyhow!(
                        "operation '{}' cannot move '{from}' to '{to}': one path contains the other",
                        self.id
                    ));
                }
            }
            OperationKind::DeletePath | OperationKind::MigrateSkillsFormat => {
                validate_rel_path(self.path_field()?)
                    .with_context(|| format!("operation '{}'", self.id))?;
            }
            OperationKind::ConfigRenameKey => {
                let from = self.from_field()?;
                let to = self.to_field()?;
                validate_config_key(from).with_context(|| format!("operation '{}'", self.id))?;
                validate_config_key(to).with_context(|| format!("operation '{}'", self.id))?;
                validate_rel_path(self.config_path())
                    .with_context(|| format!("operation '{}'", self.id))?;
                if from == to {
                    return Err(anyhow!("operation '{}' renames key '{from}' onto itself", self.id));
                }
            }
            OperationKind::ConfigSetDefault => {
                validate_config_key(self.key_field()?)
                    .with_context(|| format!("operation '{}'", self.id))?;
                decode_toml_literal(self.value_field()?)
                    .with_context(|| format!("operation '{}' has an invalid value", self.id))?;
                validate_rel_path(self.config_path())
                    .with_context(|| format!("operation '{}'", self.id))?;
            }
        }
        Ok(())
    }
}

/// Ordered migration operations that bring a repository up to `target_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeMigrationManifest {
    pub schema_version: u32,
    pub target_version: Version,
    pub min_prior_version: Version,
    #[serde(default)]
    pub operations: Vec<MigrationOperation>,
}

impl UpgradeMigrationManifest {
    pub fn from_json_str(input: &str) -> Result<Self> {
        let manifest: Self =
            serde_json::from_str(input).context("failed to parse migration manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parses a manifest stored as `<semver>.json` and checks the name agrees
    /// with its `target_version`.
    pub fn from_named_json(file_name: &str, input: &str) -> Result<Self> {
        let manifest = Self::from_json_str(input)
            .with_context(|| format!("invalid migration manifest {file_name}"))?;
        let expected = format!("{}.json", manifest.target_version);
        if file_name != expected {
            return Err(anyhow!(
                "migration manifest {file_name} declares target_version {} (expected file name {expected})",
                manifest.target_version
            ));
        }
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != MIGRATION_MANIFEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported migration manifest schema_version {} (expected {})",
                self.schema_version,
                MIGRATION_MANIFEST_SCHEMA_VERSION
            ));
        }
        validate_release_version(&self.target_version)?;
        validate_release_version(&self.min_prior_version)?;
        if self.min_prior_version > self.target_version {
            return Err(anyhow!(
                "min_prior_version {} is newer than target_version {}",
                self.min_prior_version,
                self.target_version
            ));
        }

        let mut seen_ids = HashSet::with_capacity(self.operations.len());
        for operation in &self.operations {
            operation.validate().with_context(|| {
                format!("invalid migration manifest {}", self.target_version)
            })?;
            if !seen_ids.insert(operation.id.as_str()) {
                return Err(anyhow!(
                    "duplicate operation id '{}' in migration manifest {}",
                    operation.id,
                    self.target_version
                ));
            }
        }
        Ok(())
    }
}

pub fn validate_config_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(anyhow!("config key must not be empty"));
    }
    for segment in key.split('.') {
        let valid = !segment.is_empty()
            && segment
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !valid {
            return Err(anyhow!("invalid config key: '{key}'"));
        }
    }
    Ok(())
}

/// Decodes a TOML literal such as `true`, `"text"` or `["a", "b"]`.
pub fn decode_toml_literal(literal: &str) -> Result<toml::Value> {
    let document = format!("value = {literal}\n");
    let mut table: toml::Table = toml::from_str(&document)
        .with_context(|| format!("invalid TOML literal: {literal}"))?;
    table
        .remove("value")
        .ok_or_else(|| anyhow!("invalid TOML literal: {literal}"))
}
