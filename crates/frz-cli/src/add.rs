//! The `frz add` command.

use std::fs;
use std::path::Path;

use console::style;
use frz_hash::blake3_hasher;
use frz_repo::{AddOutcome, RepoError, Top};
use frz_stream::Streamer;

use crate::{pretty_path, HASH_NAME};

#[derive(Default)]
struct Counts {
    successful: i64,
    duplicates: i64,
    nonfiles: i64,
    errors: i64,
}

pub fn run(working_dir: &Path, streamer: Streamer, files: &[std::path::PathBuf]) -> i32 {
    let mut top = Top::new(streamer, blake3_hasher, HASH_NAME);
    let mut counts = Counts::default();

    for file in files {
        let path = working_dir.join(file);
        if let Err(e) = add_path(&mut top, working_dir, &path, &mut counts) {
            counts.errors += 1;
            report_error(working_dir, &path, &e);
        }
    }

    println!(
        "\n{} files successfully added\n\
         {} files successfully added and deduplicated\n\
         {} directory entries skipped because they weren't regular files\n\
         {} files skipped because of errors",
        counts.successful, counts.duplicates, counts.nonfiles, counts.errors
    );
    if counts.errors == 0 {
        0
    } else {
        1
    }
}

fn ignored(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == ".frz")
}

fn add_path(
    top: &mut Top,
    working_dir: &Path,
    path: &Path,
    counts: &mut Counts,
) -> Result<(), RepoError> {
    if ignored(path) {
        return Ok(());
    }
    let metadata = fs::symlink_metadata(path)
        .map_err(|e| RepoError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    if metadata.is_dir() && !metadata.file_type().is_symlink() {
        add_tree(top, working_dir, path, counts)?;
    } else {
        add_one(top, working_dir, path, counts);
    }
    Ok(())
}

fn add_tree(
    top: &mut Top,
    working_dir: &Path,
    dir: &Path,
    counts: &mut Counts,
) -> Result<(), RepoError> {
    let entries = fs::read_dir(dir).map_err(|e| RepoError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| RepoError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if ignored(&path) {
            continue;
        }
        // Errors below the top-level argument are per-entry: report, count,
        // and keep walking.
        let result = (|| -> Result<(), RepoError> {
            let metadata = fs::symlink_metadata(&path).map_err(|e| RepoError::Io {
                path: path.clone(),
                source: e,
            })?;
            if metadata.is_dir() && !metadata.file_type().is_symlink() {
                add_tree(top, working_dir, &path, counts)
            } else {
                add_one(top, working_dir, &path, counts);
                Ok(())
            }
        })();
        if let Err(e) = result {
            counts.errors += 1;
            report_error(working_dir, &path, &e);
        }
    }
    Ok(())
}

fn add_one(top: &mut Top, working_dir: &Path, path: &Path, counts: &mut Counts) {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            counts.errors += 1;
            report_error(
                working_dir,
                path,
                &RepoError::Io {
                    path: path.to_path_buf(),
                    source: e,
                },
            );
            return;
        }
    };
    if !metadata.is_file() && !metadata.file_type().is_symlink() {
        counts.nonfiles += 1;
        return;
    }
    match top.add_file(path) {
        Ok(AddOutcome::NewFile) => {
            counts.successful += 1;
            println!("+ {}", pretty_path(working_dir, path).display());
        }
        Ok(AddOutcome::DuplicateFile) => {
            counts.duplicates += 1;
            println!("= {}", pretty_path(working_dir, path).display());
        }
        Ok(AddOutcome::Symlink) => {}
        Err(e) => {
            counts.errors += 1;
            report_error(working_dir, path, &e);
        }
    }
}

fn report_error(working_dir: &Path, path: &Path, error: &RepoError) {
    println!(
        "{} {}\n {} {}",
        style("***").red(),
        pretty_path(working_dir, path).display(),
        style("*-").red(),
        error
    );
}
