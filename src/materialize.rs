//! Output layouts fed by the object graph walker.

mod extract;
mod mirror;

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

pub use extract::FlattenedExtraction;
pub use mirror::RawMirror;

use crate::git::{Commit, EntryKind, ObjectHash};

/// Where a blob lands in the flattened layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Commit whose tree reached the blob.
    pub commit: ObjectHash,
    /// Path relative to the commit's root, built from validated segments.
    pub path: PathBuf,
    pub kind: EntryKind,
    pub blob: ObjectHash,
}

/// Receives decoded objects from the walker and owns every write to the
/// output location.
///
/// All methods must be idempotent: objects are immutable by hash, so writing
/// the same thing twice overwrites in place.
pub trait Materializer: Send {
    /// Persist a non-object repository file (`HEAD`, a ref, a reflog, `index`)
    /// with the exact bytes the origin served.
    fn record_file(&mut self, path: &str, raw: &[u8]) -> Result<()>;

    /// Raw bytes of an object stored by an earlier run, if this layout keeps
    /// them. Lets an interrupted run resume without refetching.
    fn cached_object(&self, _hash: &ObjectHash) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Called once per object with the compressed bytes as served.
    fn store_object(&mut self, hash: &ObjectHash, raw: &[u8]) -> Result<()>;

    /// A commit was decoded; create whatever container it needs.
    fn begin_commit(&mut self, hash: &ObjectHash, commit: &Commit) -> Result<()>;

    /// A blob was decoded for this placement.
    fn write_file(&mut self, placement: &Placement, content: &[u8]) -> Result<()>;

    /// Place an already-written blob again without its content. Returns
    /// `false` when the blob was never written, e.g. because it is missing.
    fn reuse_file(&mut self, placement: &Placement) -> Result<bool>;

    /// Whether trees shared between commits must be replayed for every commit
    /// that reaches them.
    fn expands_per_commit(&self) -> bool;
}

impl<M: Materializer + ?Sized> Materializer for &mut M {
    fn record_file(&mut self, path: &str, raw: &[u8]) -> Result<()> {
        (**self).record_file(path, raw)
    }

    fn cached_object(&self, hash: &ObjectHash) -> Result<Option<Vec<u8>>> {
        (**self).cached_object(hash)
    }

    fn store_object(&mut self, hash: &ObjectHash, raw: &[u8]) -> Result<()> {
        (**self).store_object(hash, raw)
    }

    fn begin_commit(&mut self, hash: &ObjectHash, commit: &Commit) -> Result<()> {
        (**self).begin_commit(hash, commit)
    }

    fn write_file(&mut self, placement: &Placement, content: &[u8]) -> Result<()> {
        (**self).write_file(placement, content)
    }

    fn reuse_file(&mut self, placement: &Placement) -> Result<bool> {
        (**self).reuse_file(placement)
    }

    fn expands_per_commit(&self) -> bool {
        (**self).expands_per_commit()
    }
}

/// Write via a temp file in the same directory and rename into place, so an
/// interrupted run never leaves a truncated file behind.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("No parent directory for {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    temp.write_all(content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("Failed to move file into place: {}", path.display()))?;
    Ok(())
}
