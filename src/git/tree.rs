//! Tree payload scanning.
//!
//! A tree payload is a sequence of `<mode> <name>\0<20 raw hash bytes>`
//! entries. The mode is variable-length ASCII octal (`100644`, `100755`,
//! `120000`, `40000`, `160000`), so entries are found by scanning for the
//! space and NUL terminators rather than by matching a known mode prefix.

use std::borrow::Cow;

use super::hash::{ObjectHash, RAW_LEN};
use crate::error::{Error, Result};

/// What a tree entry points at, derived from its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Executable,
    Symlink,
    /// Another tree.
    Directory,
    /// A commit in another repository (gitlink).
    Submodule,
}

/// Mode strings git writes, plus the zero-padded variants some older tools
/// emit for directories.
const MODE_TABLE: &[(&str, EntryKind)] = &[
    ("100644", EntryKind::Regular),
    ("100664", EntryKind::Regular),
    ("100755", EntryKind::Executable),
    ("120000", EntryKind::Symlink),
    ("40000", EntryKind::Directory),
    ("040000", EntryKind::Directory),
    ("160000", EntryKind::Submodule),
];

impl EntryKind {
    pub fn from_mode(mode: &str) -> Option<Self> {
        MODE_TABLE
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, kind)| *kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Raw octal mode string, kept verbatim for re-encoding.
    pub mode: String,
    /// Path segment; not guaranteed to be UTF-8.
    pub name: Vec<u8>,
    pub hash: ObjectHash,
}

impl TreeEntry {
    pub fn kind(&self) -> Option<EntryKind> {
        EntryKind::from_mode(&self.mode)
    }

    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut rest = payload;

        while !rest.is_empty() {
            let space = rest
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| Error::malformed("tree entry without mode terminator"))?;
            let mode = std::str::from_utf8(&rest[..space])
                .ok()
                .filter(|m| !m.is_empty() && m.bytes().all(|b| (b'0'..=b'7').contains(&b)))
                .ok_or_else(|| {
                    Error::malformed(format!(
                        "tree entry mode is not octal: {:?}",
                        String::from_utf8_lossy(&rest[..space])
                    ))
                })?
                .to_string();
            rest = &rest[space + 1..];

            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::malformed("tree entry without name terminator"))?;
            let name = rest[..nul].to_vec();
            rest = &rest[nul + 1..];

            if rest.len() < RAW_LEN {
                return Err(Error::malformed(format!(
                    "tree entry {:?} truncated: {} of {} hash bytes",
                    String::from_utf8_lossy(&name),
                    rest.len(),
                    RAW_LEN
                )));
            }
            let hash = ObjectHash::from_raw(&rest[..RAW_LEN])?;
            rest = &rest[RAW_LEN..];

            entries.push(TreeEntry { mode, name, hash });
        }

        Ok(Self { entries })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.as_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(&entry.hash.to_raw());
        }
        out
    }
}
