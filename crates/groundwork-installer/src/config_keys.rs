use anyhow::{Context, Result};
use groundwork_core::{
    decode_toml_literal, insert_config_key, load_config_table, lookup_config_key,
    remove_config_key, MigrationOperation, RepoFs, RepoLayout, UpgradeError,
};
use toml::Table;

use crate::prompt::Prompter;

pub(crate) fn rename_key(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    operation: &MigrationOperation,
) -> Result<bool> {
    let from = operation.from_field()?;
    let to = operation.to_field()?;
    let rel_path = operation.config_path();
    let Some(mut table) = load_config_table(fs, layout, rel_path)? else {
        return Ok(false);
    };
    let Some(value) = lookup_config_key(&table, from).cloned() else {
        return Ok(false);
    };

    match lookup_config_key(&table, to) {
        Some(existing) if *existing == value => {
            remove_config_key(&mut table, from);
            tracing::info!(from, to, "dropped duplicate config key");
        }
        Some(_) => {
            return Err(UpgradeError::Conflict(format!(
                "operation '{}' cannot move '{from}' to '{to}' in {rel_path}: destination key holds a different value",
                operation.id
            ))
            .into());
        }
        None => {
            remove_config_key(&mut table, from);
            insert_config_key(&mut table, to, value).with_context(|| {
                format!("operation '{}' cannot set '{to}' in {rel_path}", operation.id)
            })?;
        }
    }
    write_table(fs, layout, rel_path, &table)?;
    Ok(true)
}

pub(crate) fn set_default(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    prompter: &dyn Prompter,
    operation: &MigrationOperation,
) -> Result<bool> {
    let key = operation.key_field()?;
    let literal = operation.value_field()?;
    let rel_path = operation.config_path();
    let mut table = load_config_table(fs, layout, rel_path)?.unwrap_or_default();
    if lookup_config_key(&table, key).is_some() {
        return Ok(false);
    }

    let value = decode_toml_literal(literal)?;
    if let Some(confirmer) = prompter.as_confirmer() {
        let question = format!("Set {key} = {literal} in {rel_path}?");
        if !confirmer.confirm(&question)? {
            tracing::info!(key, "config default declined");
            return Ok(false);
        }
    }
    insert_config_key(&mut table, key, value)
        .with_context(|| format!("operation '{}' cannot set '{key}' in {rel_path}", operation.id))?;
    write_table(fs, layout, rel_path, &table)?;
    Ok(true)
}

fn write_table(fs: &dyn RepoFs, layout: &RepoLayout, rel_path: &str, table: &Table) -> Result<()> {
    let path = layout.resolve(rel_path);
    let content = toml::to_string(table)
        .with_context(|| format!("failed to serialize config: {}", path.display()))?;
    let mode = fs.metadata(&path)?.map(|meta| meta.mode);
    fs.write_atomic(&path, content.as_bytes(), mode)
        .with_context(|| format!("failed to write config: {}", path.display()))
}
