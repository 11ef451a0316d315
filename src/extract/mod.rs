//! # Extraction Module
//!
//! This module turns a block stream back into files. A single reader decodes
//! blocks in stream order and routes each one to the writer task of its
//! archive path. Writer tasks are spawned on a file's start marker and retired
//! on its end marker, so any number of interleaved files can be in flight.
//!
//! Every writer channel holds one block. A slow file therefore stalls the
//! reader only while it is handing that file its next block.

mod writer_pool;

use std::collections::HashMap;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, info};

use crate::archive::BlockReader;
use crate::common::{Block, BlockKind};
use crate::error::{ArchiverError, Result};
use crate::fsx;
use crate::pending::PendingWork;
use crate::stats::{mib_per_sec, ExtractCounters, ExtractStats};

/// State shared between the reader and the writer tasks.
pub(crate) struct Extraction<'a> {
    dest: &'a Path,
    pending: PendingWork,
    counters: ExtractCounters,
}

#[derive(Default)]
struct RouteTotals {
    blocks: u64,
    max_open: usize,
}

/// Extracts every file in the stream `input` below `dest`.
///
/// Fails on the first corrupt block or filesystem error. Files completed
/// before the failure are left in place.
pub fn extract<R: Read>(input: R, dest: &Path) -> Result<ExtractStats> {
    let started = Instant::now();
    let ctx = Extraction { dest, pending: PendingWork::new(), counters: ExtractCounters::default() };

    let routed = thread::scope(|s| {
        let mut writers = Vec::new();
        let routed = route(s, BlockReader::new(BufReader::new(input)), &ctx, &mut writers);
        // Every channel is closed by now, so all writers are finishing.
        let waited = ctx.pending.wait();
        for writer in writers {
            // Panics are already recorded by the writer's watch guard.
            let _ = writer.join();
        }
        routed.and_then(|totals| waited.map(|()| totals))
    });

    let totals = routed?;
    if let Some(err) = ctx.pending.take_failure() {
        return Err(err);
    }

    let stats = ctx.counters.snapshot(totals.blocks, totals.max_open, started.elapsed());
    info!(
        files = stats.files,
        blocks = stats.blocks,
        bytes = stats.bytes,
        max_open_files = stats.max_open_files,
        "extraction complete in {:.2}s ({:.1} MiB/s)",
        stats.elapsed.as_secs_f64(),
        mib_per_sec(stats.bytes, stats.elapsed),
    );
    Ok(stats)
}

/// The demultiplexer. Owns the path → channel map for its whole life; the map
/// is dropped on return, which closes every channel still open.
fn route<'scope, 'env, R: Read>(
    s: &'scope Scope<'scope, 'env>,
    blocks: BlockReader<R>,
    ctx: &'env Extraction<'env>,
    writers: &mut Vec<ScopedJoinHandle<'scope, ()>>,
) -> Result<RouteTotals> {
    let mut open: HashMap<Arc<str>, Sender<Block>> = HashMap::new();
    let mut totals = RouteTotals::default();

    for block in blocks {
        // A writer failed; its error is waiting in `pending`.
        if ctx.pending.is_halted() {
            return Ok(totals);
        }
        let block = block?;
        totals.blocks += 1;

        let sent = match block.kind {
            BlockKind::StartOfFile => {
                if open.contains_key(&block.path) {
                    return Err(ArchiverError::DuplicateStart(block.path.to_string()));
                }
                let target = fsx::resolve(ctx.dest, &block.path)?;
                let (tx, rx) = bounded(1);
                ctx.pending.add(1);
                writers.push(s.spawn(move || writer_pool::write_file(ctx, target, rx)));
                debug!(path = %block.path, "opened writer");

                let path = Arc::clone(&block.path);
                let sent = ctx.pending.send(&tx, block);
                open.insert(path, tx);
                totals.max_open = totals.max_open.max(open.len());
                sent
            }
            BlockKind::Data(_) => {
                let tx = open
                    .get(&block.path)
                    .ok_or_else(|| ArchiverError::UnopenedPath(block.path.to_string()))?;
                ctx.pending.send(tx, block)
            }
            BlockKind::EndOfFile => {
                let tx = open
                    .remove(&block.path)
                    .ok_or_else(|| ArchiverError::UnopenedPath(block.path.to_string()))?;
                let sent = ctx.pending.send(&tx, block);
                drop(tx);
                reap(writers);
                sent
            }
        };
        if !sent {
            return Ok(totals);
        }
    }

    match open.keys().min() {
        Some(path) => Err(ArchiverError::UnterminatedFile(path.to_string())),
        None => Ok(totals),
    }
}

/// Joins writer threads that have already exited so the handle list only
/// grows with the number of concurrently open files.
fn reap(writers: &mut Vec<ScopedJoinHandle<'_, ()>>) {
    let mut i = 0;
    while i < writers.len() {
        if writers[i].is_finished() {
            let _ = writers.swap_remove(i).join();
        } else {
            i += 1;
        }
    }
}

/// One file as recorded in an archive stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    pub path: String,
    pub size: u64,
}

/// Decodes a stream without touching the filesystem, returning its files in
/// the order their start markers appear.
///
/// Applies the same consistency checks as [`extract`].
pub fn list_files<R: Read>(input: R) -> Result<Vec<ListedFile>> {
    let mut files: Vec<ListedFile> = Vec::new();
    let mut open: HashMap<Arc<str>, usize> = HashMap::new();

    for block in BlockReader::new(BufReader::new(input)) {
        let block = block?;
        match &block.kind {
            BlockKind::StartOfFile => {
                if open.contains_key(&block.path) {
                    return Err(ArchiverError::DuplicateStart(block.path.to_string()));
                }
                open.insert(Arc::clone(&block.path), files.len());
                files.push(ListedFile { path: block.path.to_string(), size: 0 });
            }
            BlockKind::Data(payload) => {
                let idx = open
                    .get(&block.path)
                    .ok_or_else(|| ArchiverError::UnopenedPath(block.path.to_string()))?;
                files[*idx].size += payload.len() as u64;
            }
            BlockKind::EndOfFile => {
                open.remove(&block.path)
                    .ok_or_else(|| ArchiverError::UnopenedPath(block.path.to_string()))?;
            }
        }
    }

    match open.keys().min() {
        Some(path) => Err(ArchiverError::UnterminatedFile(path.to_string())),
        None => Ok(files),
    }
}
