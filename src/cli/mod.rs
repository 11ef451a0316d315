use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::workers::{ArchiveOptions, DEFAULT_CHUNK_SIZE, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Create an archive stream from one or more directories.
    #[command(alias = "c")]
    Create {
        /// Directories (or single files) to archive.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Write the archive to this file instead of standard output.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Largest data block in bytes (1-65535).
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_parser = clap::value_parser!(u16).range(1..))]
        block_size: u16,

        /// Directory scanning threads. [0 = one per CPU core]
        #[arg(long, default_value_t = DEFAULT_WORKERS)]
        scan_workers: usize,

        /// File reading threads. [0 = one per CPU core]
        #[arg(long, default_value_t = DEFAULT_WORKERS)]
        read_workers: usize,

        /// `[ADVANCED]` Capacity of each internal queue.
        #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, hide = true)]
        queue_capacity: usize,
    },

    /// Extract an archive stream.
    #[command(alias = "x")]
    Extract {
        /// Read the archive from this file instead of standard input.
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// The directory where files will be extracted.
        #[arg(short = 'C', long, default_value = ".")]
        directory: PathBuf,
    },

    /// List the files of an archive stream without extracting them.
    #[command(alias = "l")]
    List {
        /// Read the archive from this file instead of standard input.
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

/// Resolves a worker count where `0` means one thread per CPU core.
pub fn resolve_workers(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get().max(1)
    } else {
        requested
    }
}

impl Commands {
    /// Pipeline options for a `create` command, `None` for other commands.
    pub fn archive_options(&self) -> Option<ArchiveOptions> {
        match self {
            Commands::Create { block_size, scan_workers, read_workers, queue_capacity, .. } => {
                Some(ArchiveOptions {
                    chunk_size: *block_size,
                    scan_workers: resolve_workers(*scan_workers),
                    read_workers: resolve_workers(*read_workers),
                    queue_capacity: *queue_capacity,
                })
            }
            _ => None,
        }
    }
}

/// Parses command-line arguments using `clap`, exiting on usage errors.
pub fn run() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_defaults() {
        let args = Args::try_parse_from(["streamarch", "create", "a", "b"]).unwrap();
        let opts = args.command.archive_options().unwrap();
        assert_eq!(opts, ArchiveOptions::default());
        match args.command {
            Commands::Create { inputs, output, .. } => {
                assert_eq!(inputs, vec![PathBuf::from("a"), PathBuf::from("b")]);
                assert!(output.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn block_size_bounds() {
        assert!(Args::try_parse_from(["streamarch", "c", "--block-size", "0", "a"]).is_err());
        assert!(Args::try_parse_from(["streamarch", "c", "--block-size", "65536", "a"]).is_err());
        let args = Args::try_parse_from(["streamarch", "c", "--block-size", "65535", "a"]).unwrap();
        assert_eq!(args.command.archive_options().unwrap().chunk_size, u16::MAX);
    }

    #[test]
    fn zero_workers_means_auto() {
        let args = Args::try_parse_from(["streamarch", "c", "--scan-workers", "0", "a"]).unwrap();
        assert!(args.command.archive_options().unwrap().scan_workers >= 1);
    }

    #[test]
    fn extract_defaults_to_current_dir() {
        let args = Args::try_parse_from(["streamarch", "-vv", "x"]).unwrap();
        assert_eq!(args.verbose, 2);
        match args.command {
            Commands::Extract { input, directory } => {
                assert!(input.is_none());
                assert_eq!(directory, PathBuf::from("."));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn create_requires_inputs() {
        assert!(Args::try_parse_from(["streamarch", "create"]).is_err());
    }
}
