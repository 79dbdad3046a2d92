//! # frz-hash
//!
//! Hash value types and their canonical base-32 token form.
//!
//! A `<hash,size>` pair has exactly one base-32 representation (see
//! [`HashAndSize::to_base32`]); that token, sharded two directory levels
//! deep, is what user symlinks and hash-index entries encode on disk.

mod base32;
mod hash;
mod hasher;

pub use base32::{
    digit_value, is_base32, parse_symlink_target, symlink_path, BASE32_DIGITS,
    SYMLINK_SUBDIRS, SYMLINK_SUBDIR_DIGITS,
};
pub use hash::{Hash, Hash256, HashAndSize, HashAndSize256};
pub use hasher::{blake3_hasher, Blake3Hasher, Hasher, HasherFactory, SizeHasher};
