use anyhow::{Context, Result};
use toml::{Table, Value};

use crate::error::UpgradeError;
use crate::fs::RepoFs;
use crate::layout::RepoLayout;

/// Parsed TOML document at `rel_path`; `None` when the file is absent.
pub fn load_config_table(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    rel_path: &str,
) -> Result<Option<Table>> {
    let path = layout.resolve(rel_path);
    let Some(raw) = fs
        .read_optional(&path)
        .with_context(|| format!("failed to read config: {}", path.display()))?
    else {
        return Ok(None);
    };
    let raw = String::from_utf8(raw)
        .with_context(|| format!("config is not UTF-8: {}", path.display()))?;
    let table: Table =
        toml::from_str(&raw).with_context(|| format!("failed to parse config: {}", path.display()))?;
    Ok(Some(table))
}

pub fn lookup_config_key<'t>(table: &'t Table, key: &str) -> Option<&'t Value> {
    let mut segments = key.split('.');
    let mut current = table.get(segments.next()?)?;
    for segment in segments {
        current = current.as_table()?.get(segment)?;
    }
    Some(current)
}

/// Removes a dotted key and prunes the parent tables it leaves empty.
pub fn remove_config_key(table: &mut Table, key: &str) -> Option<Value> {
    match key.split_once('.') {
        None => table.remove(key),
        Some((head, rest)) => {
            let child = table.get_mut(head)?.as_table_mut()?;
            let removed = remove_config_key(child, rest);
            if removed.is_some() && child.is_empty() {
                table.remove(head);
            }
            removed
        }
    }
}

pub fn insert_config_key(table: &mut Table, key: &str, value: Value) -> Result<()> {
    match key.split_once('.') {
        None => {
            table.insert(key.to_string(), value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = table
                .entry(head.to_string())
                .or_insert_with(|| Value::Table(Table::new()));
            match child.as_table_mut() {
                Some(child) => insert_config_key(child, rest, value),
                None => Err(UpgradeError::Conflict(format!(
                    "config key '{head}' is not a table"
                ))
                .into()),
            }
        }
    }
}
