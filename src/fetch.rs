//! Retrieval of individual files from a dumb-transport `.git` directory.

mod filesystem;
mod http;

use async_trait::async_trait;

pub use filesystem::FilesystemFetcher;
pub use http::{HttpFetcher, HttpOptions, DEFAULT_USER_AGENT};

use crate::error::{Error, Result};
use crate::git::ObjectHash;

/// Source of raw repository files, addressed relative to the `.git` root.
///
/// Implementations do not retry and do not persist anything; both are the
/// caller's responsibility.
#[async_trait]
pub trait ObjectFetcher: Send + Sync {
    /// Fetch a non-object path such as `HEAD`, `refs/heads/main` or `index`.
    ///
    /// Returns [`Error::NotFound`] when the origin does not have the path and
    /// [`Error::Network`] for every other failure.
    async fn fetch_ref(&self, path: &str) -> Result<Vec<u8>>;

    /// Fetch the still-compressed bytes of a loose object.
    async fn fetch_object(&self, hash: &ObjectHash) -> Result<Vec<u8>> {
        self.fetch_ref(&hash.object_path()).await
    }
}

#[async_trait]
impl<F: ObjectFetcher + ?Sized> ObjectFetcher for std::sync::Arc<F> {
    async fn fetch_ref(&self, path: &str) -> Result<Vec<u8>> {
        (**self).fetch_ref(path).await
    }

    async fn fetch_object(&self, hash: &ObjectHash) -> Result<Vec<u8>> {
        (**self).fetch_object(hash).await
    }
}

/// Reject paths that could escape the `.git` root, locally or on the origin.
pub fn validate_relative_path(path: &str) -> Result<()> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.contains('\0')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(())
}
