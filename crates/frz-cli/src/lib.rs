//! # frz-cli
//!
//! The `frz` command: `add`, `fill`, `repair`, and the standalone `hash`
//! tool. The command functions live in this library so the end-to-end tests
//! can drive them in-process with an explicit working directory.

mod add;
mod fill;
mod hash;
mod repair;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use frz_config::logging::{init_logging, LogLevel};
use frz_config::Config;
use frz_repo::SourceSpec;
use frz_stream::{MultiThreadedOptions, Streamer};

/// The deployment-fixed content hash algorithm name.
pub const HASH_NAME: &str = "blake3";

/// Store files as symlinks to content-addressed storage files.
#[derive(Parser)]
#[command(name = "frz", version, about)]
struct Cli {
    /// Print more detail about what's happening (repeat for more)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add the given files or directories
    Add {
        /// Input file or directory
        #[arg(value_name = "PATH", required = true)]
        files: Vec<PathBuf>,
    },
    /// Look for missing content, and fill it in if possible
    Fill {
        #[command(flatten)]
        sources: SourceArgs,
    },
    /// Look for damage, and fix it if possible
    Repair {
        /// Don't re-hash all content
        #[arg(long)]
        fast: bool,
        #[command(flatten)]
        sources: SourceArgs,
    },
    /// Hash files and print their base-32 tokens
    Hash {
        /// Input file
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
        /// Insert the hashes into this index directory instead of an
        /// in-memory index
        #[arg(long, value_name = "DIR")]
        index_dir: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct SourceArgs {
    /// If content is found to be missing, search this directory for
    /// matching files to copy
    #[arg(long, value_name = "DIR")]
    copy_from: Vec<PathBuf>,

    /// If content is found to be missing, search this directory for
    /// matching files to move into .frz/content (or copy, if moving isn't
    /// possible)
    #[arg(long, value_name = "DIR")]
    move_from: Vec<PathBuf>,
}

/// Run one frz command against `working_dir`, returning the process exit
/// code.
pub fn command<I, S>(working_dir: &Path, args: I) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let argv = std::iter::once(OsString::from("frz"))
        .chain(args.into_iter().map(Into::into));
    let matches = match Cli::command().try_get_matches_from(argv) {
        Ok(matches) => matches,
        Err(e) => {
            let _ = e.print();
            return 2;
        }
    };
    let cli = Cli::from_arg_matches(&matches).expect("matches come from our own command");

    static LOGGING: std::sync::Once = std::sync::Once::new();
    LOGGING.call_once(|| {
        init_logging(match cli.verbose {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        });
    });

    let config = Config::load().unwrap_or_default();
    let streamer = build_streamer(&config);
    match cli.command {
        Commands::Add { files } => add::run(working_dir, streamer, &files),
        Commands::Fill { sources } => {
            let sub = matches.subcommand_matches("fill").expect("fill was parsed");
            fill::run(
                working_dir,
                streamer,
                content_sources(working_dir, sub, &sources),
            )
        }
        Commands::Repair { fast, sources } => {
            let sub = matches
                .subcommand_matches("repair")
                .expect("repair was parsed");
            repair::run(
                working_dir,
                streamer,
                !fast,
                content_sources(working_dir, sub, &sources),
            )
        }
        Commands::Hash { files, index_dir } => {
            hash::run(working_dir, streamer, &files, index_dir)
        }
    }
}

fn build_streamer(config: &Config) -> Streamer {
    if config.stream.multithreaded {
        Streamer::multi_threaded(MultiThreadedOptions {
            num_buffers: config.stream.num_buffers,
            bytes_per_buffer: config.stream.bytes_per_buffer,
            num_buffers_secondary: config.stream.num_buffers_secondary,
        })
    } else {
        Streamer::single_threaded(config.stream.bytes_per_buffer)
    }
}

/// Merge `--copy-from` and `--move-from` into a single list, interleaved in
/// the order they were given on the command line (the parse indices are the
/// only place that order survives).
fn content_sources(
    working_dir: &Path,
    matches: &ArgMatches,
    sources: &SourceArgs,
) -> Vec<SourceSpec> {
    let mut entries: Vec<(usize, SourceSpec)> = Vec::new();
    collect_sources(
        working_dir,
        matches,
        "copy_from",
        &sources.copy_from,
        true,
        &mut entries,
    );
    collect_sources(
        working_dir,
        matches,
        "move_from",
        &sources.move_from,
        false,
        &mut entries,
    );
    entries.sort_by_key(|(index, _)| *index);
    entries.into_iter().map(|(_, spec)| spec).collect()
}

fn collect_sources(
    working_dir: &Path,
    matches: &ArgMatches,
    id: &str,
    values: &[PathBuf],
    read_only: bool,
    entries: &mut Vec<(usize, SourceSpec)>,
) {
    let Some(indices) = matches.indices_of(id) else {
        return;
    };
    for (index, path) in indices.zip(values) {
        entries.push((
            index,
            SourceSpec {
                path: working_dir.join(path),
                read_only,
            },
        ));
    }
}

/// A path as shown to the user: relative to the working directory where
/// possible.
fn pretty_path(working_dir: &Path, path: &Path) -> PathBuf {
    frz_cas::relative_to(path, working_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_sources_interleave_in_command_line_order() {
        let matches = Cli::command()
            .try_get_matches_from([
                "frz",
                "repair",
                "--move-from",
                "sub1",
                "--copy-from",
                "sub2",
                "--move-from",
                "sub3",
            ])
            .unwrap();
        let sub = matches.subcommand_matches("repair").unwrap();
        let args = SourceArgs {
            copy_from: vec![PathBuf::from("sub2")],
            move_from: vec![PathBuf::from("sub1"), PathBuf::from("sub3")],
        };
        let sources = content_sources(Path::new("/w"), sub, &args);
        let summary: Vec<(PathBuf, bool)> = sources
            .into_iter()
            .map(|s| (s.path, s.read_only))
            .collect();
        assert_eq!(
            summary,
            vec![
                (PathBuf::from("/w/sub1"), false),
                (PathBuf::from("/w/sub2"), true),
                (PathBuf::from("/w/sub3"), false),
            ]
        );
    }

    #[test]
    fn pretty_path_strips_the_working_dir() {
        assert_eq!(
            pretty_path(Path::new("/w"), Path::new("/w/sub/foo")),
            PathBuf::from("sub/foo")
        );
    }
}
