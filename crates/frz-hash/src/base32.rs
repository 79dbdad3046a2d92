//! The frz base-32 digit set and symlink-path shaping.

use std::path::{Path, PathBuf};

/// A base-32 digit set chosen so that letters easily mistaken for digits are
/// omitted (no `i`, `l`, `o`, `v`).
pub const BASE32_DIGITS: &[u8; 32] = b"0123456789abcdefghjkmnpqrstuwxyz";

/// The number of subdirectory levels to use for base-32 symlink names.
pub const SYMLINK_SUBDIRS: usize = 2;

/// The number of base-32 digits to use for each directory name.
pub const SYMLINK_SUBDIR_DIGITS: usize = 2;

/// The value of a single base-32 digit, or `None` if `c` isn't one.
/// Case-insensitive.
pub fn digit_value(c: char) -> Option<u64> {
    if !c.is_ascii() {
        return None;
    }
    let c = (c as u8).to_ascii_lowercase();
    BASE32_DIGITS.iter().position(|&d| d == c).map(|v| v as u64)
}

/// Is every character of `s` a base-32 digit?
pub fn is_base32(s: &str) -> bool {
    s.chars().all(|c| digit_value(c).is_some())
}

/// Shard a base-32 token into the two-level symlink path
/// `token[0..2]/token[2..4]/token[4..]`.
pub fn symlink_path(token: &str) -> PathBuf {
    debug_assert!(token.len() > SYMLINK_SUBDIRS * SYMLINK_SUBDIR_DIGITS);
    PathBuf::from(&token[0..2])
        .join(&token[2..4])
        .join(&token[4..])
}

/// Parse a base-32 token out of a user-symlink target path of the form
/// `.frz/<hash_name>/<d2>/<d2>/<rest>`. Returns the concatenated digits, or
/// `None` if the path has any other shape.
pub fn parse_symlink_target(hash_name: &str, target: &Path) -> Option<String> {
    let mut token = String::new();
    let mut seen_elements = 0;
    for element in target.iter() {
        let element = element.to_str()?;
        if seen_elements == 0 {
            if element != ".frz" {
                return None;
            }
        } else if seen_elements == 1 {
            if element != hash_name {
                return None;
            }
        } else if seen_elements - 2 < SYMLINK_SUBDIRS {
            if element.len() == SYMLINK_SUBDIR_DIGITS && is_base32(element) {
                token.push_str(element);
            } else {
                return None;
            }
        } else if seen_elements - 2 == SYMLINK_SUBDIRS {
            if is_base32(element) {
                token.push_str(element);
            } else {
                return None;
            }
        } else {
            return None;
        }
        seen_elements += 1;
    }
    Some(token)
}
