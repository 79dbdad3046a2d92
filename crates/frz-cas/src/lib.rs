//! # frz-cas
//!
//! The content-addressed storage layer of frz: the content store (a pool of
//! readonly files with random base-32 names), the hash index (a persistent
//! `<hash,size>` → content-path map realised as a sharded symlink tree), and
//! the content source (a lazy searcher that locates matching files in
//! external directory trees).

mod fsutil;
mod index;
mod source;
mod store;

pub use fsutil::{is_readonly, lexically_normal, relative_subtree_path, relative_to,
                 remove_write_permissions};
pub use index::{DiskHashIndex, HashIndex, RamHashIndex};
pub use source::{ContentSource, DirectoryContentSource};
pub use store::ContentStore;

use std::io;
use std::path::PathBuf;

use frz_stream::StreamError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CasError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: {reason}", path.display())]
    Structural { path: PathBuf, reason: String },
    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl CasError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CasError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn structural(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        CasError::Structural {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CasError>;
