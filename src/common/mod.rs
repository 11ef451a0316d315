//! Common types shared by the creation and extraction sides.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::{ArchiverError, Result};

/// The unit of transfer: one marker or one chunk of a single file.
///
/// Blocks of one file share the same `path` allocation, so cloning a path per
/// chunk is a reference-count bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Slash-joined archive path identifying the file.
    pub path: Arc<str>,
    pub kind: BlockKind,
}

/// What a [`Block`] carries. Exactly one kind per block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    StartOfFile,
    /// A chunk of file content, at most `u16::MAX` bytes. May be empty.
    Data(Vec<u8>),
    EndOfFile,
}

impl Block {
    pub fn start(path: Arc<str>) -> Self {
        Block { path, kind: BlockKind::StartOfFile }
    }

    pub fn data(path: Arc<str>, payload: Vec<u8>) -> Self {
        Block { path, kind: BlockKind::Data(payload) }
    }

    pub fn end(path: Arc<str>) -> Self {
        Block { path, kind: BlockKind::EndOfFile }
    }

    /// Payload length, zero for markers.
    pub fn payload_len(&self) -> usize {
        match &self.kind {
            BlockKind::Data(payload) => payload.len(),
            _ => 0,
        }
    }
}

/// A filesystem path paired with the name it is recorded under.
#[derive(Debug, Clone)]
pub struct Entry {
    pub fs_path: PathBuf,
    pub archive_path: Arc<str>,
}

impl Entry {
    /// Entry for a root given by the caller. The archive name is the root's
    /// final component, so `a/` and `/tmp/a` both record their files as `a/...`.
    pub fn root(path: &Path) -> Result<Self> {
        let name = match path.components().next_back() {
            Some(Component::Normal(name)) => utf8(name, path)?.to_owned(),
            _ => String::new(),
        };
        Ok(Entry { fs_path: path.to_path_buf(), archive_path: name.into() })
    }

    /// Entry for `name` found inside this directory entry.
    pub fn child(&self, name: &OsStr) -> Result<Self> {
        let fs_path = self.fs_path.join(name);
        let name = utf8(name, &fs_path)?;
        let archive_path = if self.archive_path.is_empty() {
            name.to_owned()
        } else {
            format!("{}/{}", self.archive_path, name)
        };
        Ok(Entry { fs_path, archive_path: archive_path.into() })
    }
}

fn utf8<'a>(name: &'a OsStr, full: &Path) -> Result<&'a str> {
    name.to_str().ok_or_else(|| ArchiverError::NonUtf8Path(full.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_uses_final_component() {
        assert_eq!(&*Entry::root(Path::new("a/")).unwrap().archive_path, "a");
        assert_eq!(&*Entry::root(Path::new("/tmp/src/a")).unwrap().archive_path, "a");
        assert_eq!(&*Entry::root(Path::new(".")).unwrap().archive_path, "");
        assert_eq!(&*Entry::root(Path::new("/")).unwrap().archive_path, "");
    }

    #[test]
    fn children_are_slash_joined() {
        let root = Entry::root(Path::new("a")).unwrap();
        let b = root.child(OsStr::new("b")).unwrap();
        let y = b.child(OsStr::new("y.txt")).unwrap();
        assert_eq!(&*y.archive_path, "a/b/y.txt");
        assert_eq!(y.fs_path, Path::new("a").join("b").join("y.txt"));

        let dot = Entry::root(Path::new(".")).unwrap();
        assert_eq!(&*dot.child(OsStr::new("x.txt")).unwrap().archive_path, "x.txt");
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_rejected() {
        use std::os::unix::ffi::OsStrExt;
        let root = Entry::root(Path::new("a")).unwrap();
        let err = root.child(OsStr::from_bytes(b"bad\xff")).unwrap_err();
        assert!(matches!(err, ArchiverError::NonUtf8Path(_)));
    }
}
