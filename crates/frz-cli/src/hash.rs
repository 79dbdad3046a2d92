//! The `frz hash` command: hash files and print their base-32 tokens.

use std::path::{Path, PathBuf};
use std::time::Instant;

use console::style;
use frz_cas::{DiskHashIndex, HashIndex, RamHashIndex};
use frz_hash::{blake3_hasher, HashAndSize256, SizeHasher};
use frz_stream::{FileSource, Streamer};

use crate::HASH_NAME;

pub fn run(
    working_dir: &Path,
    streamer: Streamer,
    files: &[PathBuf],
    index_dir: Option<PathBuf>,
) -> i32 {
    let mut index: Box<dyn HashIndex> = match index_dir {
        Some(dir) => Box::new(DiskHashIndex::new(working_dir.join(dir))),
        None => Box::new(RamHashIndex::new()),
    };
    println!("Hashing with {HASH_NAME}");

    let mut total_bytes: u64 = 0;
    let mut errors = 0;
    let start = Instant::now();
    for file in files {
        let path = working_dir.join(file);
        match hash_one(&streamer, &path, index.as_mut()) {
            Ok((hs, inserted)) => {
                println!(
                    "{} {}  {}",
                    if inserted { "+" } else { "=" },
                    hs.to_base32(),
                    file.display()
                );
                total_bytes += hs.size();
            }
            Err(e) => {
                errors += 1;
                println!("{} {}", style("***").red(), e);
            }
        }
    }
    let elapsed = start.elapsed();
    println!(
        "Hashed {} bytes in {:.2}s ({:.1} MiB/s)",
        total_bytes,
        elapsed.as_secs_f64(),
        total_bytes as f64 / elapsed.as_secs_f64().max(1e-9) / (1 << 20) as f64
    );
    if errors == 0 {
        0
    } else {
        1
    }
}

fn hash_one(
    streamer: &Streamer,
    path: &Path,
    index: &mut dyn HashIndex,
) -> anyhow::Result<(HashAndSize256, bool)> {
    let mut source = FileSource::open(path)?;
    let mut hasher = SizeHasher::new(blake3_hasher());
    streamer.stream(&mut source, &mut hasher)?;
    let hs = hasher.finish();
    let inserted = index.insert(&hs, path)?;
    Ok((hs, inserted))
}
