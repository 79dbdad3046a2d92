//! The `frz repair` command.

use std::path::Path;

use console::style;
use frz_config::progress::Progress;
use frz_hash::blake3_hasher;
use frz_repo::{SourceSpec, Top};
use frz_stream::Streamer;

use crate::HASH_NAME;

pub fn run(
    working_dir: &Path,
    streamer: Streamer,
    verify_all_hashes: bool,
    sources: Vec<SourceSpec>,
) -> i32 {
    let progress = Progress::new();
    let mut top = Top::new(streamer, blake3_hasher, HASH_NAME);
    match top.repair(&progress, working_dir, verify_all_hashes, sources) {
        Ok(stats) => {
            println!(
                "Index symlinks\n  {} OK\n  {} bad (removed)\n  {} missing (recreated)\n\
                 Content files\n  {} duplicates (moved aside)\n  {} missing (restored)\n  \
                 {} missing (not restored)",
                stats.num_good_index_links,
                stats.num_bad_index_links,
                stats.num_missing_index_links,
                stats.num_duplicate_content_files,
                stats.num_fetched,
                stats.num_still_missing
            );
            if stats.num_still_missing == 0 {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("{} {}", style("*** ERROR:").red(), e);
            1
        }
    }
}
