use std::fmt;

use serde::{Deserialize, Serialize};

use crate::git::ObjectHash;

/// Why the walker wanted an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SeedCommit,
    Parent,
    Tree,
    Blob,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::SeedCommit => "seed commit",
            Role::Parent => "parent commit",
            Role::Tree => "tree",
            Role::Blob => "blob",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An object the walk needed but could not obtain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingObject {
    pub hash: ObjectHash,
    pub role: Role,
    pub reason: String,
}

/// A tree entry or object the walk deliberately did not follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<ObjectHash>,
    pub path: String,
    pub object: ObjectHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub reason: String,
}

/// Outcome of one walk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalkReport {
    pub seed: Option<ObjectHash>,
    /// Objects fetched from the origin.
    pub fetched: usize,
    /// Objects served from a previous run's output instead of the origin.
    pub reused: usize,
    pub commits: usize,
    pub trees: usize,
    pub blobs: usize,
    #[serde(default)]
    pub missing: Vec<MissingObject>,
    #[serde(default)]
    pub skipped: Vec<SkippedEntry>,
}

impl WalkReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn missing_hashes(&self) -> Vec<ObjectHash> {
        self.missing.iter().map(|m| m.hash.clone()).collect()
    }
}
