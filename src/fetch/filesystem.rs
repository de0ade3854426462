use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;

use super::{validate_relative_path, ObjectFetcher};
use crate::error::{Error, Result};

/// Reads files from a local copy of a `.git` directory, e.g. one saved by a
/// web crawler or a previous mirror run.
pub struct FilesystemFetcher {
    base_path: PathBuf,
}

impl FilesystemFetcher {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        FilesystemFetcher {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[async_trait]
impl ObjectFetcher for FilesystemFetcher {
    async fn fetch_ref(&self, path: &str) -> Result<Vec<u8>> {
        validate_relative_path(path)?;
        let full = self.base_path.join(path);
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::NotFound(path.to_string())),
            Err(e) => Err(Error::Network {
                path: path.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
