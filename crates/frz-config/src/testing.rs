//! Temp-tree helpers for filesystem-heavy tests.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary directory tree with convenience builders. Everything is
/// removed when the value is dropped.
pub struct TempTree {
    dir: TempDir,
}

impl TempTree {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create (or overwrite) a file, creating parent directories as needed.
    pub fn file(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    /// Create a directory (and any missing parents).
    pub fn dir(&self, rel: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(&path).expect("create dir");
        path
    }

    /// Create a symlink with the given (possibly relative) target.
    pub fn symlink(&self, rel: &str, target: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::os::unix::fs::symlink(target, &path).expect("create symlink");
        path
    }

    /// Remove a file, symlink, or directory tree.
    pub fn remove(&self, rel: &str) {
        let path = self.dir.path().join(rel);
        let meta = fs::symlink_metadata(&path).expect("stat path");
        if meta.is_dir() {
            fs::remove_dir_all(&path).expect("remove dir");
        } else {
            fs::remove_file(&path).expect("remove file");
        }
    }

    /// Follow a chain of symlinks, returning every path along the way,
    /// starting with `rel` itself and ending with the first non-symlink.
    pub fn follow_symlinks(&self, rel: &str) -> Vec<PathBuf> {
        let mut chain = vec![self.dir.path().join(rel)];
        loop {
            let current = chain.last().unwrap();
            let meta = match fs::symlink_metadata(current) {
                Ok(meta) => meta,
                Err(_) => break,
            };
            if !meta.file_type().is_symlink() {
                break;
            }
            let target = fs::read_link(current).expect("read symlink");
            let next = if target.is_absolute() {
                target
            } else {
                current.parent().expect("symlink has a parent").join(target)
            };
            chain.push(next);
        }
        chain
    }
}

impl Default for TempTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Give the owner write permission on `path`.
pub fn add_write_permission(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path).expect("stat path").permissions();
    perms.set_mode(perms.mode() | 0o200);
    fs::set_permissions(path, perms).expect("set permissions");
}

/// All regular files (not symlinks) below `dir`, sorted.
pub fn recursive_list(dir: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if meta.is_dir() {
                walk(&path, out);
            } else if meta.is_file() {
                out.push(path);
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, &mut out);
    out.sort();
    out
}
