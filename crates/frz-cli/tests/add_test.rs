//! End-to-end tests for `frz add`.

use std::fs;
use std::path::Path;

use frz_cli::command;
use frz_config::testing::{recursive_list, TempTree};

fn is_symlink_starting_with(path: &Path, prefix: &str) -> bool {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return false;
    };
    metadata.file_type().is_symlink()
        && fs::read_link(path)
            .map(|target| target.starts_with(prefix))
            .unwrap_or(false)
}

fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[test]
fn one_file_in_root() {
    let tree = TempTree::new();
    tree.dir(".frz");
    tree.file("foo", "bar");

    assert_eq!(command(tree.path(), ["add", "foo"]), 0);

    // The content file is write protected, so overwriting through the
    // symlink must fail. (Root bypasses permission checks and would
    // truncate the pool file, so don't even try there.)
    if !running_as_root() {
        let overwrite = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(tree.path().join("foo"));
        assert!(overwrite.is_err());
    }

    assert!(is_symlink_starting_with(
        &tree.path().join("foo"),
        ".frz/blake3/"
    ));
    assert_eq!(fs::read_to_string(tree.path().join("foo")).unwrap(), "bar");
}

#[test]
fn one_file_in_root_via_dot() {
    let tree = TempTree::new();
    tree.dir(".frz");
    tree.file("foo", "bar");

    assert_eq!(command(tree.path(), ["add", "."]), 0);

    assert!(is_symlink_starting_with(
        &tree.path().join("foo"),
        ".frz/blake3/"
    ));
    assert_eq!(fs::read_to_string(tree.path().join("foo")).unwrap(), "bar");
}

#[test]
fn one_file_in_subdir() {
    let tree = TempTree::new();
    tree.dir(".frz");
    tree.file("sub/dir/foo", "gg");

    assert_eq!(command(tree.path(), ["add", "sub/dir/foo"]), 0);

    assert_eq!(
        fs::read_link(tree.path().join("sub/dir/.frz")).unwrap(),
        Path::new("../../.frz")
    );
    assert!(is_symlink_starting_with(
        &tree.path().join("sub/dir/foo"),
        ".frz/blake3/"
    ));
    assert_eq!(
        fs::read_to_string(tree.path().join("sub/dir/foo")).unwrap(),
        "gg"
    );
}

#[test]
fn directory_tree() {
    let tree = TempTree::new();
    tree.dir(".frz");
    tree.file("sub/dir/foo", "gg");
    tree.file("sub/dir/bar", "bb");
    tree.file("sub/sume", "fff");

    assert_eq!(command(tree.path(), ["add", "sub"]), 0);

    assert_eq!(
        fs::read_link(tree.path().join("sub/dir/.frz")).unwrap(),
        Path::new("../../.frz")
    );
    assert_eq!(
        fs::read_link(tree.path().join("sub/.frz")).unwrap(),
        Path::new("../.frz")
    );
    for (file, contents) in [("sub/dir/foo", "gg"), ("sub/dir/bar", "bb"), ("sub/sume", "fff")] {
        assert!(is_symlink_starting_with(
            &tree.path().join(file),
            ".frz/blake3/"
        ));
        assert_eq!(fs::read_to_string(tree.path().join(file)).unwrap(), contents);
    }
}

#[test]
fn duplicates_are_coalesced() {
    let tree = TempTree::new();
    tree.dir(".frz");
    tree.file("sub/dir/bar", "12");
    tree.file("sub/sume", "12");
    tree.file("sub/marine", "12");

    assert_eq!(command(tree.path(), ["add", "sub/dir", "sub/sume"]), 0);

    assert!(is_symlink_starting_with(
        &tree.path().join("sub/dir/bar"),
        ".frz/blake3/"
    ));
    assert!(is_symlink_starting_with(
        &tree.path().join("sub/sume"),
        ".frz/blake3/"
    ));
    assert!(tree
        .path()
        .join("sub/marine")
        .symlink_metadata()
        .unwrap()
        .is_file());

    let content = recursive_list(&tree.path().join(".frz/content"));
    assert_eq!(content.len(), 1);
    assert_eq!(fs::read_to_string(&content[0]).unwrap(), "12");
    let unused = recursive_list(&tree.path().join(".frz/unused-content"));
    assert_eq!(unused.len(), 1);
    assert_eq!(fs::read_to_string(&unused[0]).unwrap(), "12");

    assert_eq!(command(tree.path(), ["add", "."]), 0);

    assert!(is_symlink_starting_with(
        &tree.path().join("sub/marine"),
        ".frz/blake3/"
    ));
    assert_eq!(recursive_list(&tree.path().join(".frz/content")).len(), 1);
    let unused = recursive_list(&tree.path().join(".frz/unused-content"));
    assert_eq!(unused.len(), 2);
    for file in &unused {
        assert_eq!(fs::read_to_string(file).unwrap(), "12");
    }
}

#[test]
fn no_frz_directory() {
    let tree = TempTree::new();
    tree.file("x", "y");

    assert_ne!(command(tree.path(), ["add", "x"]), 0);

    let metadata = fs::symlink_metadata(tree.path().join("x")).unwrap();
    assert!(metadata.is_file());
    assert_eq!(fs::read_to_string(tree.path().join("x")).unwrap(), "y");
}

#[test]
fn frz_file_in_subdir() {
    let tree = TempTree::new();
    tree.dir(".frz");
    tree.file("sub/x", "qq");
    tree.file("sub/.frz", "q");

    assert_ne!(command(tree.path(), ["add", "sub"]), 0);

    let metadata = fs::symlink_metadata(tree.path().join("sub/x")).unwrap();
    assert!(metadata.is_file());
    assert_eq!(fs::read_to_string(tree.path().join("sub/x")).unwrap(), "qq");
}

#[test]
fn frz_directory_is_ignored() {
    let tree = TempTree::new();
    tree.dir(".frz");
    tree.file("foo", "bar");

    assert_eq!(command(tree.path(), ["add", "."]), 0);
    assert!(is_symlink_starting_with(
        &tree.path().join("foo"),
        ".frz/blake3/"
    ));

    // A second pass over everything must not re-add the pool's own files.
    assert_eq!(command(tree.path(), ["add", "."]), 0);

    let content = recursive_list(&tree.path().join(".frz/content"));
    assert_eq!(content.len(), 1);
    assert_eq!(fs::read_to_string(&content[0]).unwrap(), "bar");
}

#[test]
fn empty_file() {
    let tree = TempTree::new();
    tree.dir(".frz");
    tree.file("empty", "");

    assert_eq!(command(tree.path(), ["add", "empty"]), 0);

    assert!(is_symlink_starting_with(
        &tree.path().join("empty"),
        ".frz/blake3/"
    ));
    assert_eq!(fs::read_to_string(tree.path().join("empty")).unwrap(), "");
}
