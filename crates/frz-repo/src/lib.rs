//! # frz-repo
//!
//! The repository engine: discovers the repository root that owns a path,
//! and applies the add/fill/repair workflows against its content store and
//! hash index.
//!
//! A repository root is any directory with a non-symlink `.frz` child
//! directory. A [`Top`] caches per-root state, so one session spanning
//! several roots touches each only once.

mod root;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use frz_cas::CasError;
use frz_config::progress::Progress;
use frz_hash::HasherFactory;
use frz_stream::{StreamError, Streamer};
use thiserror::Error;

use root::{is_repo_root, RepoRoot};

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("found no .frz directory for {}", path.display())]
    NoRepository { path: PathBuf },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: {reason}", path.display())]
    Structural { path: PathBuf, reason: String },
    #[error(transparent)]
    Cas(#[from] CasError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl RepoError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RepoError::Io {
            path: path.into(),
            source,
        }
    }

    fn structural(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RepoError::Structural {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RepoError>;

/// What adding one file did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The file's content was new; it is now in the content store.
    NewFile,
    /// The content was already present; the copy went to unused-content.
    DuplicateFile,
    /// The path was already a symlink; nothing was done.
    Symlink,
}

/// A user-specified content source directory.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub path: PathBuf,
    /// Matching files are copied when true, moved into the store otherwise.
    pub read_only: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FillStats {
    pub num_fetched: i64,
    pub num_still_missing: i64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RepairStats {
    pub num_good_index_links: i64,
    pub num_bad_index_links: i64,
    pub num_missing_index_links: i64,
    pub num_duplicate_content_files: i64,
    pub num_fetched: i64,
    pub num_still_missing: i64,
}

#[derive(Clone)]
struct CachedDir {
    root: Rc<RepoRoot>,
    /// How many levels down from the repository root this directory is.
    level: usize,
}

/// Entry point into the repository engine. Caches per-root state across
/// calls; not for concurrent use.
pub struct Top {
    streamer: Streamer,
    create_hasher: HasherFactory,
    hash_name: String,
    dirs: HashMap<PathBuf, CachedDir>,
}

impl Top {
    pub fn new(
        streamer: Streamer,
        create_hasher: HasherFactory,
        hash_name: impl Into<String>,
    ) -> Self {
        Self {
            streamer,
            create_hasher,
            hash_name: hash_name.into(),
            dirs: HashMap::new(),
        }
    }

    /// Add one file: hash it, move its content into the store, and replace
    /// the original path with a symlink encoding the hash.
    pub fn add_file(&mut self, file: &Path) -> Result<AddOutcome> {
        let cached = self.find_dir(file)?;
        cached.root.add_file(file, cached.level)
    }

    /// Restore missing content referenced by user symlinks, consulting
    /// `sources` in the given order.
    pub fn fill(
        &mut self,
        progress: &Progress,
        path: &Path,
        sources: Vec<SourceSpec>,
    ) -> Result<FillStats> {
        let cached = self.find_dir(path)?;
        cached.root.fill(progress, sources)
    }

    /// Full repair: scrub the index, reconcile orphaned content files, then
    /// restore missing content.
    pub fn repair(
        &mut self,
        progress: &Progress,
        path: &Path,
        verify_all_hashes: bool,
        sources: Vec<SourceSpec>,
    ) -> Result<RepairStats> {
        let cached = self.find_dir(path)?;
        cached.root.repair(progress, verify_all_hashes, sources)
    }

    /// Resolve the repository root owning `path`, and how far below it
    /// `path`'s directory sits.
    fn find_dir(&mut self, path: &Path) -> Result<CachedDir> {
        let canonical = non_leaf_canonical(path)
            .map_err(|_| RepoError::NoRepository {
                path: path.to_path_buf(),
            })?;
        let dir = if canonical.is_dir() {
            canonical
        } else {
            match canonical.parent() {
                Some(parent) => parent.to_path_buf(),
                None => {
                    return Err(RepoError::NoRepository {
                        path: path.to_path_buf(),
                    })
                }
            }
        };
        self.lookup_dir(&dir, path)
    }

    fn lookup_dir(&mut self, canonical_dir: &Path, original: &Path) -> Result<CachedDir> {
        if let Some(cached) = self.dirs.get(canonical_dir) {
            return Ok(cached.clone());
        }
        let cached = if is_repo_root(canonical_dir) {
            CachedDir {
                root: Rc::new(RepoRoot::new(
                    canonical_dir,
                    self.streamer.clone(),
                    self.create_hasher,
                    self.hash_name.clone(),
                )),
                level: 0,
            }
        } else {
            // Walk one level up; at the filesystem root there is no parent
            // left and the search has failed.
            let parent = canonical_dir.parent().ok_or_else(|| RepoError::NoRepository {
                path: original.to_path_buf(),
            })?;
            let up = self.lookup_dir(parent, original)?;
            CachedDir {
                root: up.root,
                level: up.level + 1,
            }
        };
        self.dirs
            .insert(canonical_dir.to_path_buf(), cached.clone());
        Ok(cached)
    }
}

/// Canonicalise all components of `path` except the last, so that a symlink
/// in the leaf position is preserved rather than followed.
fn non_leaf_canonical(path: &Path) -> io::Result<PathBuf> {
    match path.parent() {
        None => path.canonicalize(),
        Some(parent) if parent.as_os_str().is_empty() => {
            let dir = std::env::current_dir()?;
            Ok(dir.join(path))
        }
        Some(parent) => {
            let parent = parent.canonicalize()?;
            match path.file_name() {
                Some(name) => Ok(parent.join(name)),
                // Trailing `.` or `..`: nothing in leaf position to preserve.
                None => path.canonicalize(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frz_config::testing::TempTree;
    use frz_hash::blake3_hasher;
    use frz_stream::MultiThreadedOptions;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn new_top() -> Top {
        Top::new(
            Streamer::multi_threaded(MultiThreadedOptions {
                num_buffers: 2,
                bytes_per_buffer: 16,
                num_buffers_secondary: 2,
            }),
            blake3_hasher,
            "blake3",
        )
    }

    #[test]
    fn add_file_replaces_the_file_with_a_symlink() {
        let tree = TempTree::new();
        tree.dir(".frz");
        let file = tree.file("foo", "bar");

        let mut top = new_top();
        assert_eq!(top.add_file(&file).unwrap(), AddOutcome::NewFile);

        let meta = fs::symlink_metadata(&file).unwrap();
        assert!(meta.file_type().is_symlink());
        let target = fs::read_link(&file).unwrap();
        assert!(target.starts_with(".frz/blake3"));
        assert_eq!(fs::read(&file).unwrap(), b"bar");

        // The content file is write-protected.
        let content = tree.follow_symlinks("foo").pop().unwrap();
        assert_eq!(
            fs::metadata(&content).unwrap().permissions().mode() & 0o222,
            0
        );
    }

    #[test]
    fn add_file_in_subdir_maintains_the_upward_symlink() {
        let tree = TempTree::new();
        tree.dir(".frz");
        let file = tree.file("sub/dir/foo", "gg");

        let mut top = new_top();
        assert_eq!(top.add_file(&file).unwrap(), AddOutcome::NewFile);

        assert_eq!(
            fs::read_link(tree.path().join("sub/dir/.frz")).unwrap(),
            PathBuf::from("../../.frz")
        );
        assert_eq!(fs::read(&file).unwrap(), b"gg");
    }

    #[test]
    fn add_file_detects_duplicates() {
        let tree = TempTree::new();
        tree.dir(".frz");
        let a = tree.file("a", "12");
        let b = tree.file("b", "12");

        let mut top = new_top();
        assert_eq!(top.add_file(&a).unwrap(), AddOutcome::NewFile);
        assert_eq!(top.add_file(&b).unwrap(), AddOutcome::DuplicateFile);
        // Re-adding a symlink is a no-op.
        assert_eq!(top.add_file(&a).unwrap(), AddOutcome::Symlink);

        assert_eq!(fs::read(&a).unwrap(), b"12");
        assert_eq!(fs::read(&b).unwrap(), b"12");
    }

    #[test]
    fn add_file_without_a_repository_fails() {
        let tree = TempTree::new();
        let file = tree.file("foo", "bar");
        let mut top = new_top();
        assert!(matches!(
            top.add_file(&file),
            Err(RepoError::NoRepository { .. })
        ));
        assert_eq!(fs::read(&file).unwrap(), b"bar");
    }

    #[test]
    fn fill_restores_content_from_unused_content() {
        let tree = TempTree::new();
        tree.dir(".frz");
        let file = tree.file("foo", "123");

        let mut top = new_top();
        top.add_file(&file).unwrap();

        // Lose the content, keep the user symlink.
        tree.remove(".frz/content");
        tree.remove(".frz/blake3");
        tree.file(".frz/unused-content/staged", "123");

        let progress = Progress::hidden();
        let stats = top.fill(&progress, tree.path(), Vec::new()).unwrap();
        assert_eq!(stats.num_fetched, 1);
        assert_eq!(stats.num_still_missing, 0);
        assert_eq!(fs::read(&file).unwrap(), b"123");
    }

    #[test]
    fn repair_is_idempotent() {
        let tree = TempTree::new();
        tree.dir(".frz");
        let a = tree.file("a", "same");
        let b = tree.file("b", "same");
        let c = tree.file("c", "other");

        let mut top = new_top();
        assert_eq!(top.add_file(&a).unwrap(), AddOutcome::NewFile);
        assert_eq!(top.add_file(&b).unwrap(), AddOutcome::DuplicateFile);
        assert_eq!(top.add_file(&c).unwrap(), AddOutcome::NewFile);

        let progress = Progress::hidden();
        for _ in 0..2 {
            let stats = top
                .repair(&progress, tree.path(), true, Vec::new())
                .unwrap();
            assert_eq!(stats.num_good_index_links, 2);
            assert_eq!(stats.num_bad_index_links, 0);
            assert_eq!(stats.num_missing_index_links, 0);
            assert_eq!(stats.num_duplicate_content_files, 0);
            assert_eq!(stats.num_fetched, 0);
            assert_eq!(stats.num_still_missing, 0);
        }
    }

    #[test]
    fn repair_detects_a_bitflip_only_when_thorough() {
        let tree = TempTree::new();
        tree.dir(".frz");
        let file = tree.file("x", "123");

        let mut top = new_top();
        top.add_file(&file).unwrap();

        let content = tree.follow_symlinks("x").pop().unwrap();
        frz_config::testing::add_write_permission(&content);
        fs::write(&content, "1x3").unwrap();

        let progress = Progress::hidden();
        let fast = top
            .repair(&progress, tree.path(), false, Vec::new())
            .unwrap();
        assert_eq!(fast.num_bad_index_links, 0);

        let thorough = top
            .repair(&progress, tree.path(), true, Vec::new())
            .unwrap();
        assert_eq!(thorough.num_bad_index_links, 1);
        assert_eq!(thorough.num_still_missing, 1);
    }
}
