use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use super::{write_atomic, Materializer, Placement};
use crate::fetch::validate_relative_path;
use crate::git::{Commit, ObjectHash};

/// Byte-faithful copy of the origin's `.git` directory: loose objects are
/// stored exactly as served, never recompressed, so a standard `git` can
/// verify and check them out later.
pub struct RawMirror {
    base_path: PathBuf,
}

impl RawMirror {
    /// `base_path` is the `.git` directory to populate.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(base_path.join("objects")).with_context(|| {
            format!("Failed to create objects directory in {}", base_path.display())
        })?;
        fs::create_dir_all(base_path.join("refs"))
            .with_context(|| format!("Failed to create refs directory in {}", base_path.display()))?;
        Ok(RawMirror { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// The working tree directory, i.e. the parent of `.git`.
    pub fn work_tree(&self) -> &Path {
        self.base_path.parent().unwrap_or(&self.base_path)
    }

    fn object_path(&self, hash: &ObjectHash) -> PathBuf {
        let (dir, file) = hash.fanout();
        self.base_path.join("objects").join(dir).join(file)
    }

    pub fn object_exists(&self, hash: &ObjectHash) -> bool {
        self.object_path(hash).exists()
    }
}

impl Materializer for RawMirror {
    fn record_file(&mut self, path: &str, raw: &[u8]) -> Result<()> {
        validate_relative_path(path)?;
        write_atomic(&self.base_path.join(path), raw)
    }

    fn cached_object(&self, hash: &ObjectHash) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(hash);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path)
            .with_context(|| format!("Failed to read stored object: {}", path.display()))?;
        Ok(Some(raw))
    }

    fn store_object(&mut self, hash: &ObjectHash, raw: &[u8]) -> Result<()> {
        write_atomic(&self.object_path(hash), raw)
            .with_context(|| format!("Failed to store object {}", hash))
    }

    fn begin_commit(&mut self, _hash: &ObjectHash, _commit: &Commit) -> Result<()> {
        Ok(())
    }

    fn write_file(&mut self, _placement: &Placement, _content: &[u8]) -> Result<()> {
        Ok(())
    }

    fn reuse_file(&mut self, _placement: &Placement) -> Result<bool> {
        Ok(true)
    }

    fn expands_per_commit(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::git::{encode, Kind};

    #[test]
    fn test_store_and_read_back_verbatim() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut mirror = RawMirror::new(temp_dir.path().join("repo/.git"))?;

        let (hash, raw) = encode(Kind::Blob, b"Hello, World!")?;
        assert!(mirror.cached_object(&hash)?.is_none());

        mirror.store_object(&hash, &raw)?;
        mirror.store_object(&hash, &raw)?;

        assert!(mirror.object_exists(&hash));
        assert_eq!(mirror.cached_object(&hash)?, Some(raw.clone()));
        let (dir, file) = hash.fanout();
        let on_disk = fs::read(temp_dir.path().join("repo/.git/objects").join(dir).join(file))?;
        assert_eq!(on_disk, raw);
        assert_eq!(mirror.work_tree(), temp_dir.path().join("repo"));
        Ok(())
    }

    #[test]
    fn test_record_file_keeps_exact_bytes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut mirror = RawMirror::new(temp_dir.path())?;

        mirror.record_file("HEAD", b"ref: refs/heads/master\n")?;
        mirror.record_file("refs/heads/master", b"deadbeefdeadbeefdeadbeefdeadbeefdeadbeef\n")?;

        assert_eq!(fs::read(temp_dir.path().join("HEAD"))?, b"ref: refs/heads/master\n");
        assert_eq!(
            fs::read(temp_dir.path().join("refs/heads/master"))?,
            b"deadbeefdeadbeefdeadbeefdeadbeefdeadbeef\n"
        );
        Ok(())
    }

    #[test]
    fn test_record_file_rejects_escape() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut mirror = RawMirror::new(temp_dir.path().join("inner"))?;
        assert!(mirror.record_file("../outside", b"x").is_err());
        assert!(!temp_dir.path().join("outside").exists());
        Ok(())
    }
}
