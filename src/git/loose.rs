//! Loose object codec
//!
//! A loose object is `zlib(<type> <size>\0<payload>)` stored at
//! `objects/<hash[0:2]>/<hash[2:]>`, where the hash is the SHA-1 of the
//! uncompressed bytes.

use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use gix_object::Kind;
use sha1::{Digest, Sha1};

use super::{commit::Commit, hash::ObjectHash, tree::Tree};
use crate::error::{Error, Result};

/// A decoded object, dispatched on by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitObject {
    Commit(Commit),
    Tree(Tree),
    Blob(Vec<u8>),
}

impl GitObject {
    pub fn kind(&self) -> Kind {
        match self {
            GitObject::Commit(_) => Kind::Commit,
            GitObject::Tree(_) => Kind::Tree,
            GitObject::Blob(_) => Kind::Blob,
        }
    }

    /// Serialize the payload (without header). Blobs are returned as-is,
    /// trees and commits are re-encoded from their parsed form.
    pub fn to_payload(&self) -> Vec<u8> {
        match self {
            GitObject::Commit(commit) => commit.to_payload(),
            GitObject::Tree(tree) => tree.to_payload(),
            GitObject::Blob(data) => data.clone(),
        }
    }
}

pub fn kind_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Commit => "commit",
        Kind::Tree => "tree",
        Kind::Blob => "blob",
        Kind::Tag => "tag",
    }
}

/// Inflate raw loose object bytes.
pub fn inflate(raw: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(raw);
    let mut content = Vec::new();
    decoder
        .read_to_end(&mut content)
        .map_err(|e| Error::malformed(format!("failed to decompress object: {}", e)))?;
    Ok(content)
}

/// Split `<type> <size>\0<payload>` and validate the declared size.
pub fn split_header(content: &[u8]) -> Result<(Kind, &[u8])> {
    let null_pos = content
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::malformed("no null terminator in object header"))?;

    let header = std::str::from_utf8(&content[..null_pos])
        .map_err(|_| Error::malformed("object header is not UTF-8"))?;

    let (kind, size) = header
        .split_once(' ')
        .ok_or_else(|| Error::malformed(format!("invalid object header format: {:?}", header)))?;

    let kind = match kind {
        "commit" => Kind::Commit,
        "tree" => Kind::Tree,
        "blob" => Kind::Blob,
        other => {
            return Err(Error::malformed(format!("unsupported object type: {:?}", other)));
        }
    };

    let size: usize = size
        .parse()
        .map_err(|_| Error::malformed(format!("invalid object size: {:?}", size)))?;

    let payload = &content[null_pos + 1..];
    if payload.len() != size {
        return Err(Error::malformed(format!(
            "{} header declares {} bytes but payload has {}",
            kind_name(kind),
            size,
            payload.len()
        )));
    }

    Ok((kind, payload))
}

/// Decode raw (compressed) loose object bytes.
pub fn decode(raw: &[u8]) -> Result<GitObject> {
    let content = inflate(raw)?;
    decode_inflated(&content)
}

/// Decode and check that the content hashes to `expected`.
pub fn decode_verified(expected: &ObjectHash, raw: &[u8]) -> Result<GitObject> {
    let content = inflate(raw)?;
    let actual = hash_content(&content);
    if &actual != expected {
        return Err(Error::malformed(format!(
            "content hashes to {} instead of {}",
            actual, expected
        )));
    }
    decode_inflated(&content)
}

fn decode_inflated(content: &[u8]) -> Result<GitObject> {
    let (kind, payload) = split_header(content)?;
    match kind {
        Kind::Commit => Ok(GitObject::Commit(Commit::parse(payload)?)),
        Kind::Tree => Ok(GitObject::Tree(Tree::parse(payload)?)),
        Kind::Blob => Ok(GitObject::Blob(payload.to_vec())),
        Kind::Tag => Err(Error::malformed("unsupported object type: \"tag\"")),
    }
}

/// SHA-1 of already-inflated `<type> <size>\0<payload>` bytes.
pub fn hash_content(content: &[u8]) -> ObjectHash {
    let digest = Sha1::digest(content);
    // A SHA-1 digest is always 20 bytes.
    ObjectHash::from_raw(&digest).unwrap_or_else(|_| unreachable!())
}

/// Prefix a payload with its loose object header.
pub fn with_header(kind: Kind, payload: &[u8]) -> Vec<u8> {
    let mut content = format!("{} {}\0", kind_name(kind), payload.len()).into_bytes();
    content.extend_from_slice(payload);
    content
}

/// Build the compressed loose form of a payload and return it with its hash.
pub fn encode(kind: Kind, payload: &[u8]) -> Result<(ObjectHash, Vec<u8>)> {
    let content = with_header(kind, payload);
    let hash = hash_content(&content);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&content)?;
    Ok((hash, encoder.finish()?))
}
