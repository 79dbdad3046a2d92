//! The content pool: readonly files under randomly generated base-32 names.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use frz_hash::BASE32_DIGITS;
use frz_stream::FileSink;
use rand::Rng;
use walkdir::WalkDir;

use crate::fsutil::{relative_subtree_path, remove_write_permissions};
use crate::{CasError, Result};

/// The maximum shard depth used when suggesting destination filenames.
const MAX_CONTENT_DEPTH: usize = 4;

/// Owns a content directory and inserts files into it. Inserted files get
/// collision-probed random names and lose all write permissions; nothing in
/// the pool is ever overwritten.
#[derive(Debug, Clone)]
pub struct ContentStore {
    content_dir: PathBuf,
}

impl ContentStore {
    /// Use the given directory as a content store. The directory need not
    /// exist; it is created on first insertion.
    pub fn new(content_dir: impl Into<PathBuf>) -> Self {
        Self {
            content_dir: content_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.content_dir
    }

    /// Copy a regular file into the store and return the new path.
    pub fn copy_insert(&self, source: &Path) -> Result<PathBuf> {
        let mut input = File::open(source).map_err(|e| CasError::io(source, e))?;
        let mut depth = 0;
        loop {
            let destination = self.suggest_destination(&mut depth)?;
            let mut output = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&destination)
            {
                Ok(file) => file,
                // Collision; try another, longer, random path name.
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(CasError::io(&destination, e)),
            };
            if let Err(e) = io::copy(&mut input, &mut output) {
                drop(output);
                let _ = fs::remove_file(&destination);
                return Err(CasError::io(&destination, e));
            }
            drop(output);
            remove_write_permissions(&destination).map_err(|e| CasError::io(&destination, e))?;
            return Ok(destination);
        }
    }

    /// Move a file into the store, falling back to copying if source and
    /// destination are on different filesystems. Symlinks are copied instead:
    /// moving either the link or its target is unlikely to be what the user
    /// wants.
    pub fn move_insert(&self, source: &Path) -> Result<PathBuf> {
        let metadata = fs::symlink_metadata(source).map_err(|e| CasError::io(source, e))?;
        if metadata.file_type().is_symlink() {
            return self.copy_insert(source);
        }
        let mut depth = 0;
        loop {
            // Plain rename would overwrite an existing destination, so link
            // the new name first and unlink the old one afterwards.
            let destination = self.suggest_destination(&mut depth)?;
            match fs::hard_link(source, &destination) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                    return self.copy_insert(source)
                }
                Err(e) => return Err(CasError::io(&destination, e)),
            }
            fs::remove_file(source).map_err(|e| CasError::io(source, e))?;
            remove_write_permissions(&destination).map_err(|e| CasError::io(&destination, e))?;
            return Ok(destination);
        }
    }

    /// Stream a file into the store. The whole transfer must happen inside
    /// `stream_fn`; returning `Ok(true)` keeps the new file, `Ok(false)` or
    /// an error discards it.
    pub fn stream_insert(
        &self,
        stream_fn: impl FnOnce(&mut FileSink) -> Result<bool>,
    ) -> Result<Option<PathBuf>> {
        let mut depth = 0;
        loop {
            let destination = self.suggest_destination(&mut depth)?;
            let mut sink = match FileSink::create_new(&destination) {
                Ok(sink) => sink,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(CasError::io(&destination, e)),
            };
            let outcome = stream_fn(&mut sink);
            drop(sink);
            return match outcome {
                Ok(true) => {
                    remove_write_permissions(&destination)
                        .map_err(|e| CasError::io(&destination, e))?;
                    Ok(Some(destination))
                }
                Ok(false) => {
                    let _ = fs::remove_file(&destination);
                    Ok(None)
                }
                Err(e) => {
                    let _ = fs::remove_file(&destination);
                    Err(e)
                }
            };
        }
    }

    /// Iterate over all regular files in the store. The callback receives
    /// each file's path and its canonical path relative to the content root.
    pub fn for_each(
        &self,
        mut callback: impl FnMut(&Path, &Path) -> Result<()>,
    ) -> Result<()> {
        if !self.content_dir.exists() {
            return Ok(());
        }
        for entry in WalkDir::new(&self.content_dir) {
            let entry = entry.map_err(|e| walk_error(&self.content_dir, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let canonical = relative_subtree_path(entry.path(), &self.content_dir)
                .expect("walked entry is under the content root");
            callback(entry.path(), &canonical)?;
        }
        Ok(())
    }

    /// If `file` belongs to the store, return it relative to the content
    /// root; otherwise `None`.
    pub fn canonical_path(&self, file: &Path) -> Option<PathBuf> {
        relative_subtree_path(file, &self.content_dir)
    }

    /// Generate a random destination path `depth` shard levels deep, creating
    /// the intermediate directories. Each collision deepens the next attempt,
    /// up to [`MAX_CONTENT_DEPTH`]. Shard directories draw their first digit
    /// from `digits[0..16)` and basenames from `digits[16..32)`, keeping the
    /// two visually distinguishable.
    fn suggest_destination(&self, depth: &mut usize) -> Result<PathBuf> {
        let mut rng = rand::thread_rng();
        let mut destination = self.content_dir.clone();
        for _ in 0..*depth {
            destination.push(digit_pair(
                BASE32_DIGITS[rng.gen_range(0..16)],
                BASE32_DIGITS[rng.gen_range(0..32)],
            ));
        }
        fs::create_dir_all(&destination).map_err(|e| CasError::io(&destination, e))?;
        destination.push(digit_pair(
            BASE32_DIGITS[rng.gen_range(16..32)],
            BASE32_DIGITS[rng.gen_range(0..32)],
        ));
        if *depth < MAX_CONTENT_DEPTH {
            *depth += 1;
        }
        Ok(destination)
    }
}

fn digit_pair(a: u8, b: u8) -> String {
    String::from_utf8(vec![a, b]).expect("base-32 digits are ASCII")
}

fn walk_error(root: &Path, error: walkdir::Error) -> CasError {
    let path = error
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());
    let source = error
        .into_io_error()
        .unwrap_or_else(|| io::Error::other("directory walk failed"));
    CasError::io(path, source)
}
