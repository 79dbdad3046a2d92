//! End-to-end tests for the standalone `frz hash` tool.

use frz_cli::command;
use frz_config::testing::{recursive_list, TempTree};

#[test]
fn hashes_files_without_a_repository() {
    let tree = TempTree::new();
    tree.file("a", "contents");
    tree.file("b", "contents");
    assert_eq!(command(tree.path(), ["hash", "a", "b"]), 0);
}

#[test]
fn disk_index_records_the_hashes() {
    let tree = TempTree::new();
    tree.file("a", "contents");
    tree.file("b", "contents");
    tree.file("c", "different");

    assert_eq!(
        command(tree.path(), ["hash", "--index-dir", "idx", "a", "b", "c"]),
        0
    );

    // Two distinct hashes were indexed ("b" was a duplicate of "a"); the
    // leaves are symlinks, so a plain file listing sees nothing.
    let index_dir = tree.path().join("idx");
    assert!(index_dir.is_dir());
    assert!(recursive_list(&index_dir).is_empty());
    let mut leaves = 0;
    for entry in walkdir_lite(&index_dir) {
        if entry.symlink_metadata().unwrap().file_type().is_symlink() {
            leaves += 1;
        }
    }
    assert_eq!(leaves, 2);
}

#[test]
fn missing_files_are_errors() {
    let tree = TempTree::new();
    tree.file("a", "contents");
    assert_eq!(command(tree.path(), ["hash", "a", "nope"]), 1);
}

/// Minimal recursive listing of every entry below `dir`.
fn walkdir_lite(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            let meta = std::fs::symlink_metadata(&path).unwrap();
            if meta.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}
