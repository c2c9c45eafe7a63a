use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::layout::{join_rel, RepoLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    pub kind: EntryKind,
    pub mode: u32,
}

/// Narrow filesystem surface used by every mutating component.
///
/// `metadata` does not follow symlinks and reports a missing path as `Ok(None)`;
/// `remove_all` treats a missing path as success.
pub trait RepoFs {
    fn metadata(&self, path: &Path) -> io::Result<Option<EntryMetadata>>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    /// Entry names of a directory, sorted.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>>;
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
    fn write_atomic(&self, path: &Path, bytes: &[u8], mode: Option<u32>) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn remove_all(&self, path: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;
    fn lookup_env(&self, key: &str) -> Option<String>;

    fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.metadata(path)?.is_some())
    }

    fn read_optional(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        match self.metadata(path)? {
            Some(meta) if meta.kind == EntryKind::File => self.read(path).map(Some),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl RepoFs for OsFs {
    fn metadata(&self, path: &Path) -> io::Result<Option<EntryMetadata>> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        Ok(Some(EntryMetadata {
            kind,
            mode: permission_bits(&meta),
        }))
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8], mode: Option<u32>) -> io::Result<()> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path has no parent: {}", path.display()),
            )
        })?;
        fs::create_dir_all(parent)?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = parent.join(format!(
            ".{file_name}.tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::SeqCst)
        ));

        let result = (|| -> io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            drop(file);
            if let Some(mode) = mode {
                set_permission_bits(&tmp_path, mode)?;
            }
            fs::rename(&tmp_path, path)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        match self.metadata(path)? {
            None => Ok(()),
            Some(meta) if meta.kind == EntryKind::Dir => fs::remove_dir_all(path),
            Some(_) => fs::remove_file(path),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        create_symlink(target, link)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        set_permission_bits(path, mode)
    }

    fn lookup_env(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Repository-relative paths of every regular file at or below `rel_root`,
/// sorted. Symlinks are reported but never followed.
pub fn walk_rel_files(
    fs: &dyn RepoFs,
    layout: &RepoLayout,
    rel_root: &str,
) -> io::Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![rel_root.to_string()];
    while let Some(current) = pending.pop() {
        match fs.metadata(&layout.resolve(&current))? {
            Some(meta) if meta.kind == EntryKind::Dir => {
                for name in fs.read_dir(&layout.resolve(&current))? {
                    pending.push(join_rel(&current, &name));
                }
            }
            Some(_) => files.push(current),
            None => {}
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

#[cfg(unix)]
fn set_permission_bits(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permission_bits(path: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, permissions)
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn create_symlink(_target: &Path, link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("symlinks are not supported on this platform: {}", link.display()),
    ))
}
