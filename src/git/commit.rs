use super::hash::ObjectHash;
use crate::error::{Error, Result};

/// A decoded commit. Only the graph edges are interpreted; every other line
/// (author, committer, signatures, message) is kept verbatim in `metadata`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectHash,
    pub parents: Vec<ObjectHash>,
    pub metadata: Vec<u8>,
}

impl Commit {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut tree = None;
        let mut parents = Vec::new();
        let mut metadata = Vec::with_capacity(payload.len());
        let mut in_headers = true;

        for line in payload.split_inclusive(|&b| b == b'\n') {
            if in_headers {
                if line == b"\n" {
                    in_headers = false;
                } else if let Some(rest) = line.strip_prefix(b"tree ") {
                    if tree.is_some() {
                        return Err(Error::malformed("commit has more than one tree line"));
                    }
                    tree = Some(parse_hash_line("tree", rest)?);
                    continue;
                } else if let Some(rest) = line.strip_prefix(b"parent ") {
                    parents.push(parse_hash_line("parent", rest)?);
                    continue;
                }
            }
            metadata.extend_from_slice(line);
        }

        let tree = tree.ok_or_else(|| Error::malformed("commit has no tree line"))?;
        Ok(Self {
            tree,
            parents,
            metadata,
        })
    }

    /// Re-encode in canonical order: tree, parents, then the retained lines.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.metadata.len() + 48 * (1 + self.parents.len()));
        out.extend_from_slice(format!("tree {}\n", self.tree).as_bytes());
        for parent in &self.parents {
            out.extend_from_slice(format!("parent {}\n", parent).as_bytes());
        }
        out.extend_from_slice(&self.metadata);
        out
    }

    /// The first line of the message, if any.
    pub fn summary(&self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.metadata);
        let (_, message) = text.split_once("\n\n")?;
        message
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
    }
}

fn parse_hash_line(field: &str, rest: &[u8]) -> Result<ObjectHash> {
    let text = std::str::from_utf8(rest)
        .map_err(|_| Error::malformed(format!("commit {} line is not UTF-8", field)))?;
    ObjectHash::parse(text)
        .map_err(|_| Error::malformed(format!("commit {} line has bad hash: {:?}", field, text.trim())))
}
