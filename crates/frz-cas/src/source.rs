//! Lazy search for content in external directory trees.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use frz_config::progress::{Counter, Progress};
use frz_hash::{HashAndSize256, HasherFactory, SizeHasher};
use frz_stream::{FileSource, ForkedStream, SecondaryStreamDecision, Streamer};
use tracing::warn;
use walkdir::WalkDir;

use crate::store::ContentStore;
use crate::Result;

/// Somewhere missing content may be fetched from during fill/repair.
pub trait ContentSource {
    /// Fetch a file with the given hash from the source and put it in the
    /// given content store. Returns the path of the inserted file, or `None`
    /// if no such file was available.
    fn fetch(
        &mut self,
        progress: &Progress,
        hs: &HashAndSize256,
        store: &ContentStore,
    ) -> Option<PathBuf>;
}

/// A content source backed by a directory tree of files.
///
/// Starts out knowing only the set of files and their sizes (one quick
/// traversal, performed lazily), and computes content hashes only as needed:
/// since callers ask for content by hash *and* size, files of the wrong size
/// are never read at all.
pub struct DirectoryContentSource {
    dir: PathBuf,
    read_only: bool,
    streamer: Streamer,
    create_hasher: HasherFactory,

    /// Hashes computed so far, mapping to a file with that `<hash,size>`.
    files_by_hash: HashMap<HashAndSize256, PathBuf>,

    /// Candidate paths grouped by file size. Files move out of here as their
    /// hashes become known. Buckets are never empty.
    files_by_size: HashMap<u64, Vec<PathBuf>>,

    files_listed: bool,
}

struct FindFileResult {
    /// Where the requested file can be found.
    path: PathBuf,
    /// Did the search already insert the file into the content store?
    already_inserted: bool,
}

impl DirectoryContentSource {
    /// Use `dir` as a content source. With `read_only`, matching files are
    /// copied into the content store; otherwise they are moved.
    pub fn new(
        dir: impl Into<PathBuf>,
        read_only: bool,
        streamer: Streamer,
        create_hasher: HasherFactory,
    ) -> Self {
        Self {
            dir: dir.into(),
            read_only,
            streamer,
            create_hasher,
            files_by_hash: HashMap::new(),
            files_by_size: HashMap::new(),
            files_listed: false,
        }
    }

    /// Traverse the directory tree and populate `files_by_size`. Done the
    /// first time it's needed rather than up front, which saves the listing
    /// entirely when no content is ever requested.
    fn list_files(&mut self, progress: &Progress) {
        if self.files_listed {
            return;
        }
        let task = progress.task(format!("Listing files in {}", self.dir.display()));
        let file_counter = task.counter("files");
        for entry in WalkDir::new(&self.dir).into_iter().filter_map(|e| e.ok()) {
            // Regular files only; symlinks and specials are not content.
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                self.files_by_size
                    .entry(metadata.len())
                    .or_default()
                    .push(entry.into_path());
                file_counter.increment(1);
            }
        }
        self.files_listed = true;
    }

    /// Locate a file with the given hash+size. Pops candidates of the right
    /// size and hashes them until one matches, caching every hash computed
    /// along the way. When `store` is given, candidates are stream-inserted
    /// while they are hashed, so a match needs no second read.
    fn find_file(
        &mut self,
        progress: &Progress,
        hs: &HashAndSize256,
        store: Option<&ContentStore>,
    ) -> Option<FindFileResult> {
        if let Some(path) = self.files_by_hash.get(hs) {
            return Some(FindFileResult {
                path: path.clone(),
                already_inserted: false,
            });
        }
        let bucket = self.files_by_size.get_mut(&hs.size())?;
        debug_assert!(!bucket.is_empty());
        let task = progress.task("Hashing files");
        let file_counter = task.counter("files");
        let byte_counter =
            task.counter_with_total("bytes", (hs.size() * bucket.len() as u64) as i64);

        let mut found = None;
        while let Some(path) = bucket.pop() {
            match hash_candidate(
                &self.streamer,
                self.create_hasher,
                &path,
                hs,
                store,
                &byte_counter,
            ) {
                Ok((computed, inserted_path)) => {
                    let stored = self
                        .files_by_hash
                        .entry(computed)
                        .or_insert_with(|| path.clone());
                    if computed == *hs {
                        found = Some(FindFileResult {
                            path: inserted_path.clone().unwrap_or_else(|| stored.clone()),
                            already_inserted: inserted_path.is_some(),
                        });
                    }
                }
                Err(e) => {
                    warn!("when reading {}: {}", path.display(), e);
                }
            }
            file_counter.increment(1);
            if found.is_some() {
                break;
            }
        }
        if found.is_none() || self.files_by_size[&hs.size()].is_empty() {
            self.files_by_size.remove(&hs.size());
        }
        found
    }
}

impl ContentSource for DirectoryContentSource {
    fn fetch(
        &mut self,
        progress: &Progress,
        hs: &HashAndSize256,
        store: &ContentStore,
    ) -> Option<PathBuf> {
        self.list_files(progress);
        let found = self.find_file(progress, hs, self.read_only.then_some(store))?;
        if found.already_inserted {
            // The search stream-inserted the content for us.
            return Some(found.path);
        }
        let inserted = if self.read_only {
            store.copy_insert(&found.path)
        } else {
            store.move_insert(&found.path)
        };
        match inserted {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("when fetching {}: {}", hs.to_base32(), e);
                None
            }
        }
    }
}

/// Hash one candidate file. With a store, the bytes are forked into a
/// tentative stream-insert whose output is kept iff the hash matches the
/// target. Returns the computed `<hash,size>` and, if kept, the inserted
/// path.
fn hash_candidate(
    streamer: &Streamer,
    create_hasher: HasherFactory,
    path: &Path,
    target: &HashAndSize256,
    store: Option<&ContentStore>,
    byte_counter: &Counter,
) -> Result<(HashAndSize256, Option<PathBuf>)> {
    let mut source = FileSource::open(path)?;
    let mut hasher = SizeHasher::new(create_hasher());
    let store = match store {
        None => {
            streamer.stream_with_progress(&mut source, &mut hasher, &mut |n| {
                byte_counter.increment(n as i64)
            })?;
            return Ok((hasher.finish(), None));
        }
        Some(store) => store,
    };

    let mut computed: Option<HashAndSize256> = None;
    let target_hs = *target;
    let inserted_path = store.stream_insert(|sink| {
        let computed_slot = &mut computed;
        streamer.forked_stream(ForkedStream {
            source: &mut source,
            primary_sink: &mut hasher,
            secondary_sink: sink,
            // Keep the tentative write iff the hash is the one we were
            // looking for.
            primary_done: Box::new(move |hasher: &mut SizeHasher| {
                let hs = hasher.finish();
                *computed_slot = Some(hs);
                if hs == target_hs {
                    SecondaryStreamDecision::Finish
                } else {
                    SecondaryStreamDecision::Abandon
                }
            }),
            primary_progress: &mut |n| byte_counter.increment(n as i64),
            secondary_progress: &mut |_| {},
        })?;
        Ok(computed == Some(target_hs))
    })?;
    let computed = computed.expect("forked stream ran primary_done");
    Ok((computed, inserted_path))
}
