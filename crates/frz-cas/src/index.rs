//! Persistent map from `<hash,size>` to content-file path.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use frz_hash::{is_base32, symlink_path, HashAndSize256, SYMLINK_SUBDIRS, SYMLINK_SUBDIR_DIGITS};
use tracing::info;

use crate::fsutil::relative_to;
use crate::{CasError, Result};

/// Map from `<hash,size>` to a content-file path.
pub trait HashIndex {
    /// Insert a new path. Returns true if the insertion succeeded, false if
    /// the hash was already present.
    fn insert(&mut self, hs: &HashAndSize256, path: &Path) -> Result<bool>;

    /// Does the index have an entry for the given hash?
    fn contains(&self, hs: &HashAndSize256) -> Result<bool>;

    /// Remove junk from the index. Entries that aren't syntactically valid
    /// are removed; for the rest, `is_good` decides whether they stay.
    fn scrub(&mut self, is_good: &mut dyn FnMut(&HashAndSize256, &Path) -> bool) -> Result<()>;
}

/// In-memory index, used by the standalone hashing tool.
#[derive(Default)]
pub struct RamHashIndex {
    index: HashMap<HashAndSize256, PathBuf>,
}

impl RamHashIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashIndex for RamHashIndex {
    fn insert(&mut self, hs: &HashAndSize256, path: &Path) -> Result<bool> {
        use std::collections::hash_map::Entry;
        match self.index.entry(*hs) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(path.to_path_buf());
                Ok(true)
            }
        }
    }

    fn contains(&self, hs: &HashAndSize256) -> Result<bool> {
        Ok(self.index.contains_key(hs))
    }

    fn scrub(&mut self, is_good: &mut dyn FnMut(&HashAndSize256, &Path) -> bool) -> Result<()> {
        self.index.retain(|hs, path| is_good(hs, path));
        Ok(())
    }
}

/// Disk-backed index under an index directory (`R/.frz/<algo>/`). The base-32
/// token of each key becomes a two-level sharded symlink name; the value is
/// the symlink target, stored relative to the leaf's directory.
pub struct DiskHashIndex {
    index_dir: PathBuf,
}

impl DiskHashIndex {
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
        }
    }

    fn link_path(&self, hs: &HashAndSize256) -> PathBuf {
        self.index_dir.join(symlink_path(&hs.to_base32()))
    }

    fn scrub_dir(
        &self,
        dir: &Path,
        prefix: &str,
        is_good: &mut dyn FnMut(&HashAndSize256, &Path) -> bool,
    ) -> Result<()> {
        let mut to_remove = Vec::new();
        let entries = fs::read_dir(dir).map_err(|e| CasError::io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CasError::io(dir, e))?;
            let path = entry.path();
            let name = entry.file_name();
            let metadata = fs::symlink_metadata(&path).map_err(|e| CasError::io(&path, e))?;
            if prefix.len() == SYMLINK_SUBDIRS * SYMLINK_SUBDIR_DIGITS {
                // Leaf level: we expect symlinks, no subdirectories.
                let hs = name
                    .to_str()
                    .and_then(|n| HashAndSize256::from_base32(&format!("{prefix}{n}")));
                if !metadata.file_type().is_symlink() {
                    info!("removing {} because it isn't a symlink", path.display());
                    to_remove.push(path);
                } else if let Some(hs) = hs {
                    let target =
                        dir.join(fs::read_link(&path).map_err(|e| CasError::io(&path, e))?);
                    if !is_good(&hs, &target) {
                        // `is_good` logs its own reasons.
                        to_remove.push(path);
                    }
                } else {
                    info!(
                        "removing {} because its filename is not a hash",
                        path.display()
                    );
                    to_remove.push(path);
                }
            } else {
                // Shard level: we expect subdirectories, no symlinks.
                let valid_name = name
                    .to_str()
                    .is_some_and(|n| n.len() == SYMLINK_SUBDIR_DIGITS && is_base32(n));
                if !metadata.is_dir() || metadata.file_type().is_symlink() {
                    info!("removing {} because it's not a directory", path.display());
                    to_remove.push(path);
                } else if !valid_name {
                    info!("removing {} because its name is malformed", path.display());
                    to_remove.push(path);
                } else {
                    let name = name.to_str().expect("validated above");
                    self.scrub_dir(&path, &format!("{prefix}{name}"), is_good)?;
                }
            }
        }
        for path in to_remove {
            remove_entry(&path)?;
        }
        Ok(())
    }
}

impl HashIndex for DiskHashIndex {
    fn insert(&mut self, hs: &HashAndSize256, path: &Path) -> Result<bool> {
        let link = self.link_path(hs);
        match fs::symlink_metadata(&link) {
            Ok(metadata) if metadata.file_type().is_symlink() => return Ok(false),
            Ok(_) => {
                return Err(CasError::structural(&link, "exists but is not a symlink"));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CasError::io(&link, e)),
        }
        let link_dir = link.parent().expect("sharded link path has a parent");
        fs::create_dir_all(link_dir).map_err(|e| CasError::io(link_dir, e))?;
        let target = relative_to(path, link_dir);
        std::os::unix::fs::symlink(&target, &link).map_err(|e| CasError::io(&link, e))?;
        Ok(true)
    }

    fn contains(&self, hs: &HashAndSize256) -> Result<bool> {
        let link = self.link_path(hs);
        match fs::symlink_metadata(&link) {
            Ok(metadata) if metadata.file_type().is_symlink() => Ok(true),
            Ok(_) => Err(CasError::structural(&link, "exists but is not a symlink")),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CasError::io(&link, e)),
        }
    }

    fn scrub(&mut self, is_good: &mut dyn FnMut(&HashAndSize256, &Path) -> bool) -> Result<()> {
        match fs::symlink_metadata(&self.index_dir) {
            Ok(metadata) if metadata.is_dir() && !metadata.file_type().is_symlink() => {
                self.scrub_dir(&self.index_dir.clone(), "", is_good)
            }
            Ok(_) => Err(CasError::structural(&self.index_dir, "is not a directory")),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CasError::io(&self.index_dir, e)),
        }
    }
}

fn remove_entry(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path).map_err(|e| CasError::io(path, e))?;
    if metadata.is_dir() && !metadata.file_type().is_symlink() {
        fs::remove_dir_all(path).map_err(|e| CasError::io(path, e))
    } else {
        fs::remove_file(path).map_err(|e| CasError::io(path, e))
    }
}
