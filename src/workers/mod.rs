//! Parallel archive creation.
//!
//! ```text
//!   roots ──► [dir queue] ──► scanners (N) ──► [file queue] ──► readers (N)
//!                 ▲              │                                 │
//!                 └── subdirs ───┘                                 ▼
//!                                             output ◄── writer ◄── [block queue]
//! ```
//!
//! All three queues are bounded; a full queue stalls its producer. Every
//! directory, file and block is one unit in a shared [`PendingWork`] counter,
//! registered before it is queued and retired once fully handled, so the
//! counter reaching zero means the archive is complete.
//!
//! Each file is read start to finish by one reader, which keeps its blocks in
//! order. Blocks of different files interleave freely in the output.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::archive::BlockWriter;
use crate::common::{Block, Entry};
use crate::error::{ArchiverError, Result};
use crate::pending::PendingWork;
use crate::stats::{mib_per_sec, ArchiveCounters, ArchiveStats};

pub const DEFAULT_CHUNK_SIZE: u16 = 4096;
pub const DEFAULT_WORKERS: usize = 16;
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// Tuning knobs for [`archive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Largest payload of a data block. Must be non-zero.
    pub chunk_size: u16,
    /// Directory scanning threads.
    pub scan_workers: usize,
    /// File reading threads.
    pub read_workers: usize,
    /// Capacity of each of the three queues.
    pub queue_capacity: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            scan_workers: DEFAULT_WORKERS,
            read_workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ArchiveOptions {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ArchiverError::InvalidOptions("chunk size must be at least 1 byte"));
        }
        if self.scan_workers == 0 || self.read_workers == 0 {
            return Err(ArchiverError::InvalidOptions("worker pools need at least one thread"));
        }
        if self.queue_capacity == 0 {
            return Err(ArchiverError::InvalidOptions("queue capacity must be at least 1"));
        }
        Ok(())
    }
}

/// State borrowed by every pipeline thread.
struct Shared<'a> {
    opts: &'a ArchiveOptions,
    pending: PendingWork,
    counters: ArchiveCounters,
}

impl Shared<'_> {
    /// Registers `block` as a unit of work and queues it for the writer.
    fn emit(&self, block_tx: &Sender<Block>, block: Block) -> bool {
        self.pending.add(1);
        self.pending.send(block_tx, block)
    }
}

enum Seed {
    Dir(Entry),
    File(Entry),
}

/// Streams every file below `roots` into `output` as framed blocks.
///
/// Directory roots are scanned recursively; regular-file roots are archived
/// under their file name. Returns on the first fatal error, after all worker
/// threads have stopped.
pub fn archive<P, W>(roots: &[P], output: W, opts: &ArchiveOptions) -> Result<ArchiveStats>
where
    P: AsRef<Path>,
    W: Write + Send,
{
    opts.validate()?;
    if roots.is_empty() {
        return Err(ArchiverError::NoRoots);
    }

    let mut seeds = Vec::with_capacity(roots.len());
    for root in roots {
        let root = root.as_ref();
        let meta = fs::metadata(root).map_err(|e| ArchiverError::io(e, root))?;
        let entry = Entry::root(root)?;
        if meta.is_dir() {
            seeds.push(Seed::Dir(entry));
        } else if meta.is_file() {
            seeds.push(Seed::File(entry));
        } else {
            return Err(ArchiverError::UnsupportedRoot(root.to_path_buf()));
        }
    }

    let started = Instant::now();
    let shared = Shared { opts, pending: PendingWork::new(), counters: ArchiveCounters::default() };
    let ctx = &shared;

    let (dir_tx, dir_rx) = bounded::<Entry>(opts.queue_capacity);
    let (file_tx, file_rx) = bounded::<Entry>(opts.queue_capacity);
    let (block_tx, block_rx) = bounded::<Block>(opts.queue_capacity);

    debug!(
        roots = seeds.len(),
        scan_workers = opts.scan_workers,
        read_workers = opts.read_workers,
        chunk_size = opts.chunk_size,
        "starting archive pipeline"
    );

    let (waited, panicked, totals) = thread::scope(|s| {
        let writer = s.spawn(move || write_blocks(&ctx.pending, block_rx, output));

        let mut workers = Vec::with_capacity(opts.scan_workers + opts.read_workers);
        for _ in 0..opts.scan_workers {
            let (dir_rx, dir_tx, file_tx) = (dir_rx.clone(), dir_tx.clone(), file_tx.clone());
            workers.push(s.spawn(move || scan_directories(ctx, dir_rx, dir_tx, file_tx)));
        }
        for _ in 0..opts.read_workers {
            let (file_rx, block_tx) = (file_rx.clone(), block_tx.clone());
            workers.push(s.spawn(move || read_files(ctx, file_rx, block_tx)));
        }
        drop((dir_rx, file_rx, block_tx));

        for seed in seeds {
            ctx.pending.add(1);
            let sent = match seed {
                Seed::Dir(entry) => ctx.pending.send(&dir_tx, entry),
                Seed::File(entry) => ctx.pending.send(&file_tx, entry),
            };
            if !sent {
                break;
            }
        }
        drop((dir_tx, file_tx));

        let waited = ctx.pending.wait();
        ctx.pending.halt();

        let mut panicked = false;
        for worker in workers {
            panicked |= worker.join().is_err();
        }
        let totals = writer.join();
        panicked |= totals.is_err();
        (waited, panicked, totals.unwrap_or_default())
    });

    waited?;
    // The writer's final flush happens after the wait.
    if let Some(err) = shared.pending.take_failure() {
        return Err(err);
    }
    if panicked {
        return Err(ArchiverError::WorkerPanicked);
    }

    let (blocks, bytes_written) = totals;
    let stats = shared.counters.snapshot(blocks, bytes_written, started.elapsed());
    info!(
        files = stats.files,
        skipped = stats.skipped,
        directories = stats.directories,
        blocks = stats.blocks,
        bytes = stats.bytes_read,
        "archive complete in {:.2}s ({:.1} MiB/s)",
        stats.elapsed.as_secs_f64(),
        mib_per_sec(stats.bytes_read, stats.elapsed),
    );
    Ok(stats)
}

fn scan_directories(ctx: &Shared, dir_rx: Receiver<Entry>, dir_tx: Sender<Entry>, file_tx: Sender<Entry>) {
    let _watch = ctx.pending.watch();
    // Subdirectories that did not fit in the shared queue. Scanners are the
    // only consumers of that queue, so blocking on it could stall every one.
    let mut backlog = Vec::new();
    loop {
        if ctx.pending.is_halted() {
            return;
        }
        let dir = match backlog.pop() {
            Some(dir) => dir,
            None => match ctx.pending.recv(&dir_rx) {
                Some(dir) => dir,
                None => return,
            },
        };
        if let Err(e) = scan_directory(ctx, &dir, &dir_tx, &file_tx, &mut backlog) {
            ctx.pending.fail(e);
            return;
        }
        ctx.pending.retire();
    }
}

/// Queues the immediate children of `dir`, subdirectories and regular files
/// only, in name order. Symlinked directories are not descended into.
fn scan_directory(
    ctx: &Shared,
    dir: &Entry,
    dir_tx: &Sender<Entry>,
    file_tx: &Sender<Entry>,
    backlog: &mut Vec<Entry>,
) -> Result<()> {
    let listing = fs::read_dir(&dir.fs_path).map_err(|e| ArchiverError::io(e, &dir.fs_path))?;
    let mut children = Vec::new();
    for child in listing {
        let child = child.map_err(|e| ArchiverError::io(e, &dir.fs_path))?;
        let file_type = child.file_type().map_err(|e| ArchiverError::io(e, child.path()))?;
        children.push((child.file_name(), file_type));
    }
    children.sort_by(|a, b| a.0.cmp(&b.0));

    ArchiveCounters::bump(&ctx.counters.directories, 1);
    debug!(dir = %dir.fs_path.display(), entries = children.len(), "scanned directory");

    for (name, file_type) in children {
        let child = dir.child(&name)?;
        // Symlinks to regular files are archived as the file they point at.
        let followed = file_type.is_symlink();
        let file_type = if followed {
            match fs::metadata(&child.fs_path) {
                Ok(meta) => meta.file_type(),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(path = %child.fs_path.display(), "dangling symlink, skipping");
                    ArchiveCounters::bump(&ctx.counters.skipped, 1);
                    continue;
                }
                Err(e) => return Err(ArchiverError::io(e, &child.fs_path)),
            }
        } else {
            file_type
        };

        if file_type.is_dir() && followed {
            warn!(path = %child.fs_path.display(), "not following symlinked directory");
        } else if file_type.is_dir() {
            ctx.pending.add(1);
            match dir_tx.try_send(child) {
                Ok(()) => {}
                Err(TrySendError::Full(child)) => backlog.push(child),
                Err(TrySendError::Disconnected(_)) => return Ok(()),
            }
        } else if file_type.is_file() {
            ctx.pending.add(1);
            if !ctx.pending.send(file_tx, child) {
                return Ok(());
            }
        } else {
            warn!(path = %child.fs_path.display(), "skipping entry that is not a regular file or directory");
        }
    }
    Ok(())
}

fn read_files(ctx: &Shared, file_rx: Receiver<Entry>, block_tx: Sender<Block>) {
    let _watch = ctx.pending.watch();
    let mut buf = vec![0u8; ctx.opts.chunk_size as usize];
    while let Some(file) = ctx.pending.recv(&file_rx) {
        if let Err(e) = stream_file(ctx, &file, &block_tx, &mut buf) {
            ctx.pending.fail(e);
            return;
        }
        ctx.pending.retire();
    }
}

/// Emits start, data and end blocks for one file. A file that disappeared
/// since it was listed is skipped.
fn stream_file(ctx: &Shared, file: &Entry, block_tx: &Sender<Block>, buf: &mut [u8]) -> Result<()> {
    let mut source = match File::open(&file.fs_path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %file.fs_path.display(), "file no longer exists, skipping");
            ArchiveCounters::bump(&ctx.counters.skipped, 1);
            return Ok(());
        }
        Err(e) => return Err(ArchiverError::io(e, &file.fs_path)),
    };

    let path = &file.archive_path;
    if !ctx.emit(block_tx, Block::start(path.clone())) {
        return Ok(());
    }
    loop {
        let n = match source.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ArchiverError::io(e, &file.fs_path)),
        };
        ArchiveCounters::bump(&ctx.counters.bytes_read, n as u64);
        if !ctx.emit(block_tx, Block::data(path.clone(), buf[..n].to_vec())) {
            return Ok(());
        }
    }
    if ctx.emit(block_tx, Block::end(path.clone())) {
        ArchiveCounters::bump(&ctx.counters.files, 1);
    }
    Ok(())
}

/// The single consumer of the block queue. Returns (blocks, bytes) written.
fn write_blocks<W: Write>(pending: &PendingWork, block_rx: Receiver<Block>, output: W) -> (u64, u64) {
    let _watch = pending.watch();
    let mut writer = BlockWriter::new(BufWriter::new(output));
    while let Some(block) = pending.recv(&block_rx) {
        if let Err(e) = writer.write(&block) {
            pending.fail(e);
            return (writer.blocks_written(), writer.bytes_written());
        }
        pending.retire();
    }
    if let Err(e) = writer.flush() {
        pending.fail(e);
    }
    (writer.blocks_written(), writer.bytes_written())
}
