use thiserror::Error;

use crate::git::ObjectHash;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the fetch, decode, resolve and walk layers.
///
/// `NotFound` is kept apart from `Network` so best-effort callers (reflogs,
/// `index`, `packed-refs`) can ignore absence without hiding real failures.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure, timeout or non-2xx status.
    #[error("network error fetching {path}: {message}")]
    Network { path: String, message: String },

    /// The origin does not serve this path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Decompression, header, size or payload parse failure.
    #[error("malformed object: {0}")]
    MalformedObject(String),

    /// Symbolic ref resolution did not terminate.
    #[error("symbolic ref chain did not terminate: {}", chain.join(" -> "))]
    RefCycle { chain: Vec<String> },

    /// A symbolic ref points at a ref the origin does not have.
    #[error("ref {target} (via {from}) does not exist")]
    DanglingRef { from: String, target: String },

    /// A required object could not be fetched or decoded.
    #[error("required object {hash} unobtainable: {source}")]
    FetchFailed {
        hash: ObjectHash,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid object hash: {0:?}")]
    InvalidHash(String),

    #[error("invalid relative path: {0:?}")]
    InvalidPath(String),

    #[error("run cancelled after {visited} objects")]
    Cancelled { visited: usize },

    /// A fetch task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// Writing to the output layout failed.
    #[error(transparent)]
    Output(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that only mean "the origin does not have it".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedObject(message.into())
    }
}
