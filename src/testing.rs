//! In-memory origin for unit tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::fetch::{validate_relative_path, ObjectFetcher};
use crate::git::{encode, Commit, Kind, ObjectHash, Tree, TreeEntry};

/// A fake origin serving files from a map, counting every request.
#[derive(Clone, Default)]
pub(crate) struct MemoryRepo {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requests: Arc<Mutex<HashMap<String, usize>>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.into());
    }

    pub fn set_ref(&self, path: &str, target: &str) {
        self.set_file(path, format!("{}\n", target));
    }

    /// Serve `raw` under `hash` without checking that they agree.
    pub fn insert_raw(&self, hash: &ObjectHash, raw: Vec<u8>) {
        self.set_file(&hash.object_path(), raw);
    }

    pub fn add(&self, kind: Kind, payload: &[u8]) -> ObjectHash {
        let (hash, raw) = encode(kind, payload).unwrap();
        self.insert_raw(&hash, raw);
        hash
    }

    pub fn add_blob(&self, content: &[u8]) -> ObjectHash {
        self.add(Kind::Blob, content)
    }

    pub fn add_tree(&self, entries: &[(&str, &str, &ObjectHash)]) -> ObjectHash {
        let tree = Tree {
            entries: entries
                .iter()
                .map(|(mode, name, hash)| TreeEntry {
                    mode: mode.to_string(),
                    name: name.as_bytes().to_vec(),
                    hash: (*hash).clone(),
                })
                .collect(),
        };
        self.add(Kind::Tree, &tree.to_payload())
    }

    pub fn add_commit(&self, tree: &ObjectHash, parents: &[&ObjectHash], message: &str) -> ObjectHash {
        let commit = Commit {
            tree: tree.clone(),
            parents: parents.iter().map(|p| (*p).clone()).collect(),
            metadata: format!(
                "author Test <test@example.com> 1700000000 +0000\n\
                 committer Test <test@example.com> 1700000000 +0000\n\n{}\n",
                message
            )
            .into_bytes(),
        };
        self.add(Kind::Commit, &commit.to_payload())
    }

    pub fn remove(&self, hash: &ObjectHash) {
        self.files.lock().unwrap().remove(&hash.object_path());
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.requests.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn object_requests(&self, hash: &ObjectHash) -> usize {
        self.request_count(&hash.object_path())
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ObjectFetcher for MemoryRepo {
    async fn fetch_ref(&self, path: &str) -> Result<Vec<u8>> {
        validate_relative_path(path)?;
        *self
            .requests
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default() += 1;
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }
}
