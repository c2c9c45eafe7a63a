use anyhow::{Context, Result};
use groundwork_core::{RepoFs, RepoLayout};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LAUNCHER: &str = "gw-status";

/// Repository-level settings read from `.groundwork/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    #[serde(default = "default_launchers")]
    pub launchers: Vec<String>,
    #[serde(default = "manage_gitignore_default")]
    pub manage_gitignore: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            launchers: default_launchers(),
            manage_gitignore: manage_gitignore_default(),
        }
    }
}

impl RepoConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse repository config")?;
        for launcher in &config.launchers {
            validate_launcher_name(launcher)?;
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).context("failed to serialize repository config")
    }
}

fn default_launchers() -> Vec<String> {
    vec![DEFAULT_LAUNCHER.to_string()]
}

fn manage_gitignore_default() -> bool {
    true
}

pub fn load_repo_config(fs: &dyn RepoFs, layout: &RepoLayout) -> Result<RepoConfig> {
    let path = layout.config_path();
    let Some(raw) = fs
        .read_optional(&path)
        .with_context(|| format!("failed to read config: {}", path.display()))?
    else {
        return Ok(RepoConfig::default());
    };
    let raw = String::from_utf8(raw)
        .with_context(|| format!("config is not UTF-8: {}", path.display()))?;
    RepoConfig::from_toml_str(&raw)
        .with_context(|| format!("invalid config: {}", path.display()))
}

pub fn validate_launcher_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .next()
            .is_some_and(|first| first.is_ascii_alphanumeric())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        anyhow::bail!("invalid launcher name: '{name}'")
    }
}
