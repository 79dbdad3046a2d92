//! The `frz fill` command.

use std::path::Path;

use console::style;
use frz_config::progress::Progress;
use frz_hash::blake3_hasher;
use frz_repo::{SourceSpec, Top};
use frz_stream::Streamer;

use crate::HASH_NAME;

pub fn run(working_dir: &Path, streamer: Streamer, sources: Vec<SourceSpec>) -> i32 {
    let progress = Progress::new();
    let mut top = Top::new(streamer, blake3_hasher, HASH_NAME);
    match top.fill(&progress, working_dir, sources) {
        Ok(stats) => {
            println!(
                "Content files\n  {} missing (restored)\n  {} missing (not restored)",
                stats.num_fetched, stats.num_still_missing
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
