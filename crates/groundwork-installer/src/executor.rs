use anyhow::{Context, Result};
use groundwork_core::{
    content_equal, join_rel, EntryKind, EntryMetadata, MigrationOperation, OperationKind, RepoFs,
    RepoLayout, UpgradeError,
};

use crate::config_keys;
use crate::prompt::Prompter;

/// Applies single migration operations against the working tree. Every kind
/// reports `Ok(false)` when there is nothing left to do, so re-running a
/// finished migration is harmless.
pub struct MigrationExecutor<'a> {
    fs: &'a dyn RepoFs,
    layout: &'a RepoLayout,
    prompter: &'a dyn Prompter,
    skills_confirmed: bool,
}

enum SkillMove {
    Relocate { flat: String, dir: String, file: String },
    DropDuplicate { flat: String },
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(fs: &'a dyn RepoFs, layout: &'a RepoLayout, prompter: &'a dyn Prompter) -> Self {
        Self {
            fs,
            layout,
            prompter,
            skills_confirmed: false,
        }
    }

    pub fn apply(&mut self, operation: &MigrationOperation) -> Result<bool> {
        let applied = match operation.kind {
            OperationKind::RenameFile => self.rename(operation, EntryKind::File)?,
            OperationKind::RenameDir => self.rename(operation, EntryKind::Dir)?,
            OperationKind::RenameGenerated => self.rename_generated(operation)?,
            OperationKind::DeletePath => self.delete_path(operation)?,
            OperationKind::ConfigRenameKey => {
                config_keys::rename_key(self.fs, self.layout, operation)?
            }
            OperationKind::ConfigSetDefault => {
                config_keys::set_default(self.fs, self.layout, self.prompter, operation)?
            }
            OperationKind::MigrateSkillsFormat => self.migrate_skills(operation)?,
        };
        tracing::info!(
            id = %operation.id,
            kind = operation.kind.as_str(),
            applied,
            "executed migration operation"
        );
        Ok(applied)
    }

    fn rename(&self, operation: &MigrationOperation, expected: EntryKind) -> Result<bool> {
        let from = operation.from_field()?;
        let to = operation.to_field()?;
        let Some(source) = self.inspect(from)? else {
            return Ok(false);
        };
        if source.kind != expected {
            return Err(UpgradeError::Conflict(format!(
                "operation '{}' expects a {} at '{from}' but found a {}",
                operation.id,
                kind_name(expected),
                kind_name(source.kind)
            ))
            .into());
        }

        let destination = self.inspect(to)?;
        match destination.map(|meta| meta.kind) {
            None => self.move_path(from, to)?,
            Some(EntryKind::Dir) if expected == EntryKind::Dir => {
                let to_path = self.layout.resolve(to);
                let children = self
                    .fs
                    .read_dir(&to_path)
                    .with_context(|| format!("failed to read {}", to_path.display()))?;
                if !children.is_empty() {
                    return Err(UpgradeError::Conflict(format!(
                        "operation '{}' cannot rename '{from}': destination directory '{to}' is not empty",
                        operation.id
                    ))
                    .into());
                }
                self.remove(to)?;
                self.move_path(from, to)?;
            }
            Some(EntryKind::File) if expected == EntryKind::File => {
                let source_bytes = self.read(from)?;
                let destination_bytes = self.read(to)?;
                if !content_equal(&source_bytes, &destination_bytes) {
                    return Err(UpgradeError::Conflict(format!(
                        "operation '{}' cannot rename '{from}': '{to}' already exists with different content",
                        operation.id
                    ))
                    .into());
                }
                tracing::info!(from, to, "removing duplicate of an already renamed file");
                self.remove(from)?;
            }
            Some(kind) => {
                return Err(UpgradeError::Conflict(format!(
                    "operation '{}' cannot rename '{from}': '{to}' already exists as a {}",
                    operation.id,
                    kind_name(kind)
                ))
                .into());
            }
        }
        Ok(true)
    }

    fn rename_generated(&self, operation: &MigrationOperation) -> Result<bool> {
        let from = operation.from_field()?;
        let to = operation.to_field()?;
        if self.inspect(from)?.is_none() {
            return Ok(false);
        }
        if self.inspect(to)?.is_some() {
            tracing::info!(from, to, "generated destination exists; dropping old artifact");
            self.remove(from)?;
        } else {
            self.move_path(from, to)?;
        }
        Ok(true)
    }

    fn delete_path(&self, operation: &MigrationOperation) -> Result<bool> {
        let path = operation.path_field()?;
        if self.inspect(path)?.is_none() {
            return Ok(false);
        }
        self.remove(path)?;
        Ok(true)
    }

    fn migrate_skills(&mut self, operation: &MigrationOperation) -> Result<bool> {
        let skills_dir = operation.path_field()?;
        match self.inspect(skills_dir)? {
            Some(meta) if meta.kind == EntryKind::Dir => {}
            _ => return Ok(false),
        }

        let moves = self.scan_skills(operation, skills_dir)?;
        if moves.is_empty() {
            return Ok(false);
        }
        self.confirm_skills(skills_dir, moves.len())?;

        for skill in &moves {
            match skill {
                SkillMove::Relocate { flat, dir, file } => {
                    let dir_path = self.layout.resolve(dir);
                    self.fs
                        .create_dir_all(&dir_path)
                        .with_context(|| format!("failed to create {}", dir_path.display()))?;
                    self.move_path(flat, file)?;
                }
                SkillMove::DropDuplicate { flat } => self.remove(flat)?,
            }
        }
        tracing::info!(skills_dir, skills = moves.len(), "migrated skills to directory form");
        Ok(true)
    }

    /// Dry run over the flat `<name>.md` skills; any conflict aborts before
    /// anything is touched.
    fn scan_skills(
        &self,
        operation: &MigrationOperation,
        skills_dir: &str,
    ) -> Result<Vec<SkillMove>> {
        let dir_path = self.layout.resolve(skills_dir);
        let names = self
            .fs
            .read_dir(&dir_path)
            .with_context(|| format!("failed to read {}", dir_path.display()))?;

        let mut moves = Vec::new();
        let mut conflicts = Vec::new();
        for name in names {
            let Some(stem) = name.strip_suffix(".md") else {
                continue;
            };
            if stem.is_empty() {
                continue;
            }
            let flat = join_rel(skills_dir, &name);
            match self.inspect(&flat)? {
                Some(meta) if meta.kind == EntryKind::File => {}
                _ => continue,
            }
            let dir = join_rel(skills_dir, stem);
            let file = join_rel(&dir, "SKILL.md");

            match self.inspect(&dir)?.map(|meta| meta.kind) {
                None => moves.push(SkillMove::Relocate { flat, dir, file }),
                Some(EntryKind::Dir) => match self.inspect(&file)?.map(|meta| meta.kind) {
                    None => moves.push(SkillMove::Relocate { flat, dir, file }),
                    Some(EntryKind::File) => {
                        if content_equal(&self.read(&flat)?, &self.read(&file)?) {
                            moves.push(SkillMove::DropDuplicate { flat });
                        } else {
                            conflicts.push(format!("'{flat}' differs from '{file}'"));
                        }
                    }
                    Some(kind) => {
                        conflicts.push(format!("'{file}' is a {}, not a file", kind_name(kind)))
                    }
                },
                Some(kind) => conflicts.push(format!(
                    "'{dir}' is a {} and blocks the directory form of '{flat}'",
                    kind_name(kind)
                )),
            }
        }

        if !conflicts.is_empty() {
            tracing::warn!(skills_dir, conflicts = conflicts.len(), "skills migration blocked");
            return Err(UpgradeError::Conflict(format!(
                "operation '{}' cannot migrate skills in '{skills_dir}': {}",
                operation.id,
                conflicts.join("; ")
            ))
            .into());
        }
        Ok(moves)
    }

    fn confirm_skills(&mut self, skills_dir: &str, count: usize) -> Result<()> {
        if self.skills_confirmed {
            return Ok(());
        }
        let Some(confirmer) = self.prompter.as_confirmer() else {
            return Err(UpgradeError::Confirmation(format!(
                "moving {count} skill(s) in '{skills_dir}' to directory form needs confirmation; rerun with --yes"
            ))
            .into());
        };
        let question = format!("Move {count} skill(s) in {skills_dir} to <name>/SKILL.md?");
        if !confirmer.confirm(&question)? {
            return Err(UpgradeError::Confirmation(format!(
                "skills migration in '{skills_dir}' was declined"
            ))
            .into());
        }
        self.skills_confirmed = true;
        Ok(())
    }

    fn inspect(&self, rel_path: &str) -> Result<Option<EntryMetadata>> {
        let path = self.layout.resolve(rel_path);
        self.fs
            .metadata(&path)
            .with_context(|| format!("failed to inspect {}", path.display()))
    }

    fn read(&self, rel_path: &str) -> Result<Vec<u8>> {
        let path = self.layout.resolve(rel_path);
        self.fs
            .read(&path)
            .with_context(|| format!("failed to read {}", path.display()))
    }

    fn remove(&self, rel_path: &str) -> Result<()> {
        let path = self.layout.resolve(rel_path);
        self.fs
            .remove_all(&path)
            .with_context(|| format!("failed to remove {}", path.display()))
    }

    fn move_path(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.layout.resolve(from);
        let to_path = self.layout.resolve(to);
        if let Some(parent) = to_path.parent() {
            self.fs
                .create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        self.fs.rename(&from_path, &to_path).with_context(|| {
            format!(
                "failed to rename {} to {}",
                from_path.display(),
                to_path.display()
            )
        })
    }
}

fn kind_name(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::File => "file",
        EntryKind::Dir => "directory",
        EntryKind::Symlink => "symlink",
    }
}
