use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of a hex-encoded SHA-1 object id.
pub const HEX_LEN: usize = 40;

/// Length of a raw SHA-1 object id as it appears inside tree entries.
pub const RAW_LEN: usize = 20;

/// Git SHA-1 object identifier (40 lowercase hex characters)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectHash(String);

impl ObjectHash {
    /// Parse a hex object id. Surrounding whitespace is trimmed and uppercase
    /// digits are normalized.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidHash(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Build from the 20 raw bytes stored in tree entries.
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        if raw.len() != RAW_LEN {
            return Err(Error::InvalidHash(hex::encode(raw)));
        }
        Ok(Self(hex::encode(raw)))
    }

    pub fn to_raw(&self) -> [u8; RAW_LEN] {
        let mut out = [0u8; RAW_LEN];
        // Validated at construction.
        hex::decode_to_slice(&self.0, &mut out).unwrap_or_default();
        out
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into the loose object directory and file name.
    pub fn fanout(&self) -> (&str, &str) {
        self.0.split_at(2)
    }

    /// Relative path of the loose object: `objects/ab/cdef...`.
    pub fn object_path(&self) -> String {
        let (dir, file) = self.fanout();
        format!("objects/{}/{}", dir, file)
    }

    /// The last `n` hex characters, used for short directory names.
    pub fn short(&self, n: usize) -> &str {
        &self.0[HEX_LEN - n.min(HEX_LEN)..]
    }
}

impl fmt::Display for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectHash {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ObjectHash> for String {
    fn from(hash: ObjectHash) -> Self {
        hash.0
    }
}

impl AsRef<str> for ObjectHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
