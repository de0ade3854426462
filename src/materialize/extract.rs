use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use super::{write_atomic, Materializer, Placement};
use crate::git::{Commit, EntryKind, ObjectHash};

/// Number of trailing hex characters used for commit directory names.
pub const SHORT_ID_LEN: usize = 6;

/// One directory per commit holding its metadata and every reachable file:
///
/// ```text
/// <root>/commit_<id>/commit_info_<id>.txt
/// <root>/commit_<id>/<relative path>
/// ```
pub struct FlattenedExtraction {
    base_path: PathBuf,
    full_ids: bool,
    /// Directory id chosen for each commit.
    ids: HashMap<ObjectHash, String>,
    /// Commit that claimed each directory id, to detect short-id collisions.
    claimed: HashMap<String, ObjectHash>,
    /// First location each blob was written to, for reuse by later commits.
    written: HashMap<ObjectHash, PathBuf>,
}

impl FlattenedExtraction {
    pub fn new<P: AsRef<Path>>(base_path: P, full_ids: bool) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)
            .with_context(|| format!("Failed to create output directory: {}", base_path.display()))?;
        Ok(Self {
            base_path,
            full_ids,
            ids: HashMap::new(),
            claimed: HashMap::new(),
            written: HashMap::new(),
        })
    }

    /// Directory name suffix for a commit. Falls back to the full hash when
    /// two commits share the same short id.
    fn id_for(&mut self, commit: &ObjectHash) -> String {
        if let Some(id) = self.ids.get(commit) {
            return id.clone();
        }
        let mut id = if self.full_ids {
            commit.to_string()
        } else {
            commit.short(SHORT_ID_LEN).to_string()
        };
        if self.claimed.get(&id).is_some_and(|owner| owner != commit) {
            tracing::warn!("Short id {} is ambiguous, using full hash for {}", id, commit);
            id = commit.to_string();
        }
        self.claimed.insert(id.clone(), commit.clone());
        self.ids.insert(commit.clone(), id.clone());
        id
    }

    pub fn commit_dir(&mut self, commit: &ObjectHash) -> PathBuf {
        let id = self.id_for(commit);
        self.base_path.join(format!("commit_{}", id))
    }

    fn target_path(&mut self, placement: &Placement) -> PathBuf {
        self.commit_dir(&placement.commit).join(&placement.path)
    }
}

#[cfg(unix)]
fn apply_mode(path: &Path, kind: EntryKind) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = if kind == EntryKind::Executable { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _kind: EntryKind) -> Result<()> {
    Ok(())
}

impl Materializer for FlattenedExtraction {
    fn record_file(&mut self, path: &str, _raw: &[u8]) -> Result<()> {
        tracing::debug!("Flattened layout does not keep {}", path);
        Ok(())
    }

    fn store_object(&mut self, _hash: &ObjectHash, _raw: &[u8]) -> Result<()> {
        Ok(())
    }

    fn begin_commit(&mut self, hash: &ObjectHash, commit: &Commit) -> Result<()> {
        let id = self.id_for(hash);
        let dir = self.commit_dir(hash);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create commit directory: {}", dir.display()))?;
        write_atomic(
            &dir.join(format!("commit_info_{}.txt", id)),
            &commit.to_payload(),
        )
    }

    fn write_file(&mut self, placement: &Placement, content: &[u8]) -> Result<()> {
        // Symlink targets are written as plain files holding the target path;
        // the origin is untrusted and a real link could point anywhere.
        let path = self.target_path(placement);
        write_atomic(&path, content)?;
        apply_mode(&path, placement.kind)?;
        self.written.entry(placement.blob.clone()).or_insert(path);
        Ok(())
    }

    fn reuse_file(&mut self, placement: &Placement) -> Result<bool> {
        let Some(source) = self.written.get(&placement.blob).cloned() else {
            return Ok(false);
        };
        let path = self.target_path(placement);
        if path != source {
            let content = fs::read(&source)
                .with_context(|| format!("Failed to read {}", source.display()))?;
            write_atomic(&path, &content)?;
            apply_mode(&path, placement.kind)?;
        }
        Ok(true)
    }

    fn expands_per_commit(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn hash(s: &str) -> ObjectHash {
        ObjectHash::parse(&s.repeat(40 / s.len())).unwrap()
    }

    fn commit() -> Commit {
        Commit {
            tree: hash("4b"),
            parents: vec![],
            metadata: b"author A <a@b> 1 +0000\ncommitter A <a@b> 1 +0000\n\nadd flag\n".to_vec(),
        }
    }

    #[test]
    fn test_commit_info_and_nested_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut out = FlattenedExtraction::new(temp_dir.path(), false)?;
        let c = ObjectHash::parse("0123456789012345678901234567890123abcdef")?;

        out.begin_commit(&c, &commit())?;
        out.write_file(
            &Placement {
                commit: c.clone(),
                path: PathBuf::from("sub/flag"),
                kind: EntryKind::Regular,
                blob: hash("aa"),
            },
            b"FLAG{test}",
        )?;

        let dir = temp_dir.path().join("commit_abcdef");
        let info = fs::read_to_string(dir.join("commit_info_abcdef.txt"))?;
        assert!(info.starts_with(&format!("tree {}\n", hash("4b"))));
        assert!(info.ends_with("add flag\n"));
        assert_eq!(fs::read(dir.join("sub/flag"))?, b"FLAG{test}");
        Ok(())
    }

    #[test]
    fn test_reuse_copies_into_other_commit() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut out = FlattenedExtraction::new(temp_dir.path(), true)?;
        let first = hash("11");
        let second = hash("22");
        let blob = hash("aa");

        let placement = |commit: &ObjectHash| Placement {
            commit: commit.clone(),
            path: PathBuf::from("flag"),
            kind: EntryKind::Regular,
            blob: blob.clone(),
        };

        assert!(!out.reuse_file(&placement(&second))?);
        out.write_file(&placement(&first), b"shared")?;
        assert!(out.reuse_file(&placement(&second))?);

        let copied = temp_dir.path().join(format!("commit_{}/flag", second));
        assert_eq!(fs::read(copied)?, b"shared");
        Ok(())
    }

    #[test]
    fn test_short_id_collision_uses_full_hash() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut out = FlattenedExtraction::new(temp_dir.path(), false)?;
        let a = ObjectHash::parse("1111111111111111111111111111111111abcdef")?;
        let b = ObjectHash::parse("2222222222222222222222222222222222abcdef")?;

        assert_eq!(out.commit_dir(&a), temp_dir.path().join("commit_abcdef"));
        assert_eq!(out.commit_dir(&b), temp_dir.path().join(format!("commit_{}", b)));
        assert_eq!(out.commit_dir(&a), temp_dir.path().join("commit_abcdef"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_mode() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new()?;
        let mut out = FlattenedExtraction::new(temp_dir.path(), true)?;
        let c = hash("33");
        out.write_file(
            &Placement {
                commit: c.clone(),
                path: PathBuf::from("run.sh"),
                kind: EntryKind::Executable,
                blob: hash("bb"),
            },
            b"#!/bin/sh\n",
        )?;
        let meta = fs::metadata(temp_dir.path().join(format!("commit_{}/run.sh", c)))?;
        assert_eq!(meta.permissions().mode() & 0o777, 0o755);
        Ok(())
    }
}
