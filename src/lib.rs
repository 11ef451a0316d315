//! # streamarch Core Library
//!
//! This crate provides the core functionality for the `streamarch` archiver: it
//! turns directory trees into one linear stream of framed blocks and turns such
//! a stream back into files.
//!
//! It is designed to be used by the `streamarch` command-line application, but
//! its public API works on any `Read`/`Write` stream.
//!
//! ## Key Modules
//!
//! - [`archive`]: The block wire format (encoder and decoder).
//! - [`workers`]: The parallel creation pipeline (scanners, readers, writer).
//! - [`extract`]: The demultiplexer and the per-file writer tasks.
//! - [`pending`]: Completion tracking and cancellation shared by all threads.
//! - [`cli`]: Command-line argument definitions.
//!
//! ## Examples
//!
//! ```no_run
//! use streamarch::{archive, extract, ArchiveOptions};
//! use std::path::Path;
//!
//! let mut stream = Vec::new();
//! archive(&[Path::new("photos")], &mut stream, &ArchiveOptions::default())?;
//! extract(&stream[..], Path::new("restored"))?;
//! # Ok::<(), streamarch::ArchiverError>(())
//! ```

pub mod archive;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod error;
pub mod extract;
pub mod fsx;
pub mod pending;
pub mod stats;
pub mod workers;

pub use common::{Block, BlockKind};
pub use error::{ArchiverError, Result};
pub use extract::{extract, list_files, ListedFile};
pub use stats::{ArchiveStats, ExtractStats};
pub use workers::{archive, ArchiveOptions};
