//! Per-repository-root state and the add/fill/repair workflows.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use frz_cas::{
    is_readonly, remove_write_permissions, ContentSource, ContentStore, DirectoryContentSource,
    DiskHashIndex, HashIndex,
};
use frz_config::progress::{Counter, Progress};
use frz_hash::{parse_symlink_target, symlink_path, HashAndSize256, HasherFactory, SizeHasher};
use frz_stream::{fill_buffer, FileSource, Streamer};
use tracing::info;

use crate::{AddOutcome, FillStats, RepairStats, RepoError, Result, SourceSpec};

/// Is `dir` a repository root, i.e. does it have a non-symlink `.frz` child
/// directory?
pub(crate) fn is_repo_root(dir: &Path) -> bool {
    let Ok(dir_meta) = fs::symlink_metadata(dir) else {
        return false;
    };
    if !dir_meta.is_dir() {
        return false;
    }
    fs::symlink_metadata(dir.join(".frz"))
        .map(|meta| meta.is_dir() && !meta.file_type().is_symlink())
        .unwrap_or(false)
}

/// One repository root: its hash index, content pools, and the workflows
/// that operate on them.
pub(crate) struct RepoRoot {
    path: PathBuf,
    index: RefCell<DiskHashIndex>,
    store: ContentStore,
    unused_store: ContentStore,
    streamer: Streamer,
    create_hasher: HasherFactory,
    hash_name: String,
}

struct CheckIndexResult {
    num_good: i64,
    num_bad: i64,
    /// Canonical paths of content files with good index links.
    indexed: HashSet<PathBuf>,
}

#[derive(Default)]
struct CheckContentResult {
    num_missing_index: i64,
    num_duplicates: i64,
}

impl RepoRoot {
    pub fn new(
        path: &Path,
        streamer: Streamer,
        create_hasher: HasherFactory,
        hash_name: String,
    ) -> Self {
        let frz = path.join(".frz");
        Self {
            path: path.to_path_buf(),
            index: RefCell::new(DiskHashIndex::new(frz.join(&hash_name))),
            store: ContentStore::new(frz.join("content")),
            unused_store: ContentStore::new(frz.join("unused-content")),
            streamer,
            create_hasher,
            hash_name,
        }
    }

    pub fn add_file(&self, file: &Path, subdir_levels: usize) -> Result<AddOutcome> {
        let dir = file.parent().ok_or_else(|| {
            RepoError::structural(file, "cannot add a path with no containing directory")
        })?;
        self.create_hashdir_symlink(dir, subdir_levels)?;
        let metadata = fs::symlink_metadata(file).map_err(|e| RepoError::io(file, e))?;
        if metadata.file_type().is_symlink() {
            return Ok(AddOutcome::Symlink);
        }
        if !metadata.is_file() {
            return Err(RepoError::structural(file, "not a regular file"));
        }

        let mut source = FileSource::open(file)?;
        let mut hasher = SizeHasher::new((self.create_hasher)());
        self.streamer.stream(&mut source, &mut hasher)?;
        drop(source);
        let hs = hasher.finish();
        let token = hs.to_base32();

        // Rename aside, plant the symlink, then move the content into the
        // store. At no point is the original data both writable and
        // unreferenced; a crash in between leaves a temp file that a later
        // repair rehashes.
        let temp = temp_filename(file, &self.hash_name, &token);
        fs::rename(file, &temp).map_err(|e| RepoError::io(file, e))?;
        let link_target = Path::new(".frz").join(&self.hash_name).join(symlink_path(&token));
        std::os::unix::fs::symlink(&link_target, file).map_err(|e| RepoError::io(file, e))?;
        let content_path = self.store.move_insert(&temp)?;

        let inserted = self.index.borrow_mut().insert(&hs, &content_path)?;
        if inserted {
            Ok(AddOutcome::NewFile)
        } else {
            self.unused_store.move_insert(&content_path)?;
            Ok(AddOutcome::DuplicateFile)
        }
    }

    pub fn fill(&self, progress: &Progress, sources: Vec<SourceSpec>) -> Result<FillStats> {
        self.fetch_missing_content(progress, sources)
    }

    pub fn repair(
        &self,
        progress: &Progress,
        verify_all_hashes: bool,
        sources: Vec<SourceSpec>,
    ) -> Result<RepairStats> {
        let r1 = self.check_index_symlinks(progress, verify_all_hashes)?;
        let r2 = self.check_content_files(progress, &r1.indexed)?;
        let r3 = self.fetch_missing_content(progress, sources)?;
        Ok(RepairStats {
            num_good_index_links: r1.num_good,
            num_bad_index_links: r1.num_bad,
            num_missing_index_links: r2.num_missing_index,
            num_duplicate_content_files: r2.num_duplicates,
            num_fetched: r3.num_fetched,
            num_still_missing: r3.num_still_missing,
        })
    }

    /// Ensure the `.frz` upward symlink exists in `dir`, pointing
    /// `subdir_levels` levels up to the repository's `.frz` directory.
    fn create_hashdir_symlink(&self, dir: &Path, subdir_levels: usize) -> Result<()> {
        let link = dir.join(".frz");
        if subdir_levels == 0 {
            // At the top level the real .frz directory lives here.
            let ok = fs::symlink_metadata(&link)
                .map(|m| m.is_dir() && !m.file_type().is_symlink())
                .unwrap_or(false);
            return if ok {
                Ok(())
            } else {
                Err(RepoError::structural(&link, "repository .frz is not a directory"))
            };
        }
        let mut target = PathBuf::from(".frz");
        for _ in 0..subdir_levels {
            target = Path::new("..").join(target);
        }
        match fs::symlink_metadata(&link) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                if fs::read_link(&link).map_err(|e| RepoError::io(&link, e))? == target {
                    return Ok(()); // the desired symlink already exists
                }
                fs::remove_file(&link).map_err(|e| RepoError::io(&link, e))?;
            }
            Ok(_) => {
                return Err(RepoError::structural(
                    &link,
                    "could not create symlink, because something with that name already exists",
                ));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(RepoError::io(&link, e)),
        }
        std::os::unix::fs::symlink(&target, &link).map_err(|e| RepoError::io(&link, e))?;
        Ok(())
    }

    /// Pass 1: keep index links that point to good content, remove the rest.
    fn check_index_symlinks(
        &self,
        progress: &Progress,
        verify_all_hashes: bool,
    ) -> Result<CheckIndexResult> {
        let mut result = CheckIndexResult {
            num_good: 0,
            num_bad: 0,
            indexed: HashSet::new(),
        };
        let task = progress.task("Checking index links and content files");
        let link_counter = task.counter("links");
        let file_counter = task.counter("files");
        self.index.borrow_mut().scrub(&mut |hs, content_path| {
            link_counter.increment(1);
            match self.check_index_entry(hs, content_path, verify_all_hashes, &file_counter) {
                Ok(canonical) => {
                    result.num_good += 1;
                    result.indexed.insert(canonical);
                    true
                }
                Err(reason) => {
                    info!(
                        "removing {} from the index because {}",
                        hs.to_base32(),
                        reason
                    );
                    result.num_bad += 1;
                    false
                }
            }
        })?;
        Ok(result)
    }

    /// Decide whether one index entry points to good content. Returns the
    /// content file's canonical path on success, the removal reason on
    /// failure.
    fn check_index_entry(
        &self,
        hs: &HashAndSize256,
        content_path: &Path,
        verify_all_hashes: bool,
        file_counter: &Counter,
    ) -> std::result::Result<PathBuf, String> {
        let canonical = self.store.canonical_path(content_path).ok_or_else(|| {
            format!(
                "it points to {}, which is outside the content directory",
                content_path.display()
            )
        })?;
        let metadata = match fs::metadata(content_path) {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                return Err(format!(
                    "it points to {}, which doesn't exist or isn't a regular file",
                    canonical.display()
                ))
            }
        };
        if metadata.len() != hs.size() {
            return Err(format!(
                "it points to {}, which has the wrong size (expected {}, actual {})",
                canonical.display(),
                hs.size(),
                metadata.len()
            ));
        }
        let mut source = FileSource::open(content_path)
            .map_err(|e| format!("we got an error verifying it: {e}"))?;
        file_counter.increment(1);
        if verify_all_hashes {
            let mut hasher = SizeHasher::new((self.create_hasher)());
            self.streamer
                .stream(&mut source, &mut hasher)
                .map_err(|e| format!("we got an error verifying it: {e}"))?;
            let actual = hasher.finish();
            if actual != *hs {
                return Err(format!(
                    "it points to {}, which has the wrong hash ({})",
                    canonical.display(),
                    actual.to_base32()
                ));
            }
        } else {
            // Cheap plausibility probe: empty and non-empty files must not
            // have swapped places since the size check.
            let mut first_byte = [0u8; 1];
            let fill = fill_buffer(&mut source, &mut first_byte)
                .map_err(|e| format!("we got an error verifying it: {e}"))?;
            if fill.num_bytes == 0 && hs.size() >= 1 {
                return Err(format!(
                    "reading the first byte of {} immediately hit end-of-file",
                    canonical.display()
                ));
            }
            if fill.num_bytes == 1 && hs.size() < 1 {
                return Err(format!(
                    "{} is supposed to be an empty file, but reading the first byte succeeded",
                    canonical.display()
                ));
            }
        }
        Ok(canonical)
    }

    /// Pass 2: index content files that lost their links; move duplicates to
    /// unused-content; restore the readonly bit everywhere.
    fn check_content_files(
        &self,
        progress: &Progress,
        indexed: &HashSet<PathBuf>,
    ) -> Result<CheckContentResult> {
        let mut result = CheckContentResult::default();
        let task = progress.task("Checking orphaned content files");
        let file_counter = task.counter("files");
        let byte_counter = task.counter("bytes");
        self.store.for_each(|path, canonical| {
            let metadata = fs::metadata(path).map_err(|e| frz_cas::CasError::io(path, e))?;
            if !is_readonly(&metadata) {
                info!("removing write permissions from {}", canonical.display());
                remove_write_permissions(path).map_err(|e| frz_cas::CasError::io(path, e))?;
            }
            if indexed.contains(canonical) {
                // Trusted to be properly indexed already.
                return Ok(());
            }
            let mut source = FileSource::open(path)?;
            let mut hasher = SizeHasher::new((self.create_hasher)());
            self.streamer
                .stream_with_progress(&mut source, &mut hasher, &mut |n| {
                    byte_counter.increment(n as i64)
                })?;
            let hs = hasher.finish();
            let inserted = self.index.borrow_mut().insert(&hs, path)?;
            if inserted {
                info!(
                    "adding {} to the index, pointing to {} (content was already present, but not indexed)",
                    hs.to_base32(),
                    canonical.display()
                );
                result.num_missing_index += 1;
            } else {
                self.unused_store.move_insert(path)?;
                info!(
                    "moving duplicate content file {} to unused-content (hash {})",
                    canonical.display(),
                    hs.to_base32()
                );
                result.num_duplicates += 1;
            }
            file_counter.increment(1);
            Ok(())
        })?;
        Ok(result)
    }

    /// Pass 3: walk the worktree and fetch content for user symlinks whose
    /// hash is not in the index.
    fn fetch_missing_content(
        &self,
        progress: &Progress,
        sources: Vec<SourceSpec>,
    ) -> Result<FillStats> {
        let mut result = FillStats::default();
        let task = progress.task("Checking that referenced content is present");
        let link_counter = task.counter("links");

        // Prefer .frz/unused-content to any sources specified by the user.
        let mut specs = sources;
        let unused = self.path.join(".frz").join("unused-content");
        if unused.exists() {
            specs.insert(
                0,
                SourceSpec {
                    path: unused,
                    read_only: false,
                },
            );
        }
        let mut sources: Vec<DirectoryContentSource> = specs
            .into_iter()
            .map(|spec| {
                DirectoryContentSource::new(
                    spec.path,
                    spec.read_only,
                    self.streamer.clone(),
                    self.create_hasher,
                )
            })
            .collect();
        self.fetch_missing_in_dir(
            &mut result,
            progress,
            &link_counter,
            &mut sources,
            &self.path,
            0,
        )?;
        Ok(result)
    }

    fn fetch_missing_in_dir(
        &self,
        result: &mut FillStats,
        progress: &Progress,
        link_counter: &Counter,
        sources: &mut [DirectoryContentSource],
        dir: &Path,
        subdir_levels: usize,
    ) -> Result<()> {
        if subdir_levels > 0 && is_repo_root(dir) {
            // Nested repositories are independent; leave them alone.
            return Ok(());
        }
        let mut good_hashdir_symlink = false;
        let entries = fs::read_dir(dir).map_err(|e| RepoError::io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| RepoError::io(dir, e))?;
            if entry.file_name() == *".frz" {
                // Our own .frz directory, or a .frz upward symlink.
                continue;
            }
            let path = entry.path();
            let metadata = fs::symlink_metadata(&path).map_err(|e| RepoError::io(&path, e))?;
            if metadata.is_dir() {
                self.fetch_missing_in_dir(
                    result,
                    progress,
                    link_counter,
                    sources,
                    &path,
                    subdir_levels + 1,
                )?;
            } else if metadata.file_type().is_symlink() {
                // Try parsing the target as a content token; anything else
                // is not one of our symlinks.
                let target = fs::read_link(&path).map_err(|e| RepoError::io(&path, e))?;
                let Some(token) = parse_symlink_target(&self.hash_name, &target) else {
                    continue;
                };
                let Some(hs) = HashAndSize256::from_base32(&token) else {
                    continue;
                };

                link_counter.increment(1);
                if !good_hashdir_symlink {
                    self.create_hashdir_symlink(dir, subdir_levels)?;
                    good_hashdir_symlink = true;
                }

                if !self.index.borrow().contains(&hs)? {
                    let mut fetched = false;
                    for source in sources.iter_mut() {
                        if let Some(content_path) = source.fetch(progress, &hs, &self.store) {
                            let inserted = self.index.borrow_mut().insert(&hs, &content_path)?;
                            assert!(inserted, "fetched content was already indexed");
                            fetched = true;
                            break;
                        }
                    }
                    if fetched {
                        result.num_fetched += 1;
                    } else {
                        result.num_still_missing += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

/// The sibling temp name used while a file's content moves into the store.
fn temp_filename(file: &Path, hash_name: &str, token: &str) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(format!(".frz-{hash_name}-{token}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_filename_appends_the_token() {
        assert_eq!(
            temp_filename(Path::new("/r/sub/foo"), "blake3", "abc"),
            PathBuf::from("/r/sub/foo.frz-blake3-abc")
        );
    }

    #[test]
    fn is_repo_root_requires_a_real_frz_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_repo_root(dir.path()));

        fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink("real", dir.path().join("linked")).unwrap();

        let root_a = dir.path().join("a");
        fs::create_dir_all(root_a.join(".frz")).unwrap();
        assert!(is_repo_root(&root_a));

        let root_b = dir.path().join("b");
        fs::create_dir(&root_b).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), root_b.join(".frz")).unwrap();
        assert!(!is_repo_root(&root_b));
    }
}
