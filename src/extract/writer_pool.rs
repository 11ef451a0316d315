//! Per-file writer tasks.
//!
//! The demultiplexer spawns one task per open archive path and feeds it
//! through a capacity-1 channel. The task owns its destination file outright,
//! so writes need no locking and arrive in stream order.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use crossbeam_channel::Receiver;

use crate::common::{Block, BlockKind};
use crate::error::{ArchiverError, Result};
use crate::fsx;
use crate::stats::ExtractCounters;

use super::Extraction;

/// Runs one writer task to completion, reporting failure to the run.
pub(crate) fn write_file(ctx: &Extraction<'_>, target: PathBuf, blocks: Receiver<Block>) {
    let _watch = ctx.pending.watch();
    if let Err(e) = drain(&target, &blocks, &ctx.counters) {
        ctx.pending.fail(e);
    }
    ctx.pending.retire();
}

/// Applies blocks until the file's end marker or until the channel closes.
fn drain(target: &Path, blocks: &Receiver<Block>, counters: &ExtractCounters) -> Result<()> {
    let mut out: Option<BufWriter<File>> = None;
    for Block { path, kind } in blocks.iter() {
        match kind {
            BlockKind::StartOfFile => {
                out = Some(BufWriter::new(fsx::create_file(target)?));
            }
            BlockKind::Data(payload) => {
                let file = out.as_mut().ok_or_else(|| unopened(&path))?;
                file.write_all(&payload).map_err(|e| ArchiverError::io(e, target))?;
                counters.bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);
            }
            BlockKind::EndOfFile => {
                let file = out.take().ok_or_else(|| unopened(&path))?;
                close(file, target)?;
                counters.files.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Flushes buffered data and closes the file, surfacing flush errors that a
/// plain drop would swallow.
fn close(file: BufWriter<File>, target: &Path) -> Result<()> {
    let file = file.into_inner().map_err(|e| ArchiverError::io(e.into_error(), target))?;
    drop(file);
    Ok(())
}

fn unopened(path: &str) -> ArchiverError {
    ArchiverError::UnopenedPath(path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn feed(blocks: Vec<Block>) -> Receiver<Block> {
        let (tx, rx) = bounded(blocks.len().max(1));
        for b in blocks {
            tx.send(b).unwrap();
        }
        rx
    }

    #[test]
    fn writes_payloads_in_order() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("x.txt");
        let p: Arc<str> = Arc::from("a/x.txt");
        let rx = feed(vec![
            Block::start(p.clone()),
            Block::data(p.clone(), b"h".to_vec()),
            Block::data(p.clone(), Vec::new()),
            Block::data(p.clone(), b"i".to_vec()),
            Block::end(p),
        ]);
        let counters = ExtractCounters::default();
        drain(&target, &rx, &counters).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"hi");
        let stats = counters.snapshot(0, 0, Default::default());
        assert_eq!((stats.files, stats.bytes), (1, 2));
    }

    #[test]
    fn empty_file_is_created() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("b").join("y.txt");
        let p: Arc<str> = Arc::from("b/y.txt");
        let rx = feed(vec![Block::start(p.clone()), Block::end(p)]);
        drain(&target, &rx, &ExtractCounters::default()).unwrap();
        assert_eq!(fs::metadata(&target).unwrap().len(), 0);
    }

    #[test]
    fn data_before_start_is_corruption() {
        let dir = tempdir().unwrap();
        let rx = feed(vec![Block::data(Arc::from("x"), b"z".to_vec())]);
        let err = drain(&dir.path().join("x"), &rx, &ExtractCounters::default()).unwrap_err();
        assert!(matches!(err, ArchiverError::UnopenedPath(_)));
    }

    #[test]
    fn unwritable_target_is_an_io_error() {
        let dir = tempdir().unwrap();
        // A regular file where a parent directory is needed.
        fs::write(dir.path().join("a"), b"").unwrap();
        let target = dir.path().join("a").join("x");
        let rx = feed(vec![Block::start(Arc::from("a/x"))]);
        let err = drain(&target, &rx, &ExtractCounters::default()).unwrap_err();
        assert!(matches!(err, ArchiverError::Io { .. }));
    }
}
