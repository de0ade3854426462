#![deny(clippy::mod_module_files)]
//! Recover a Git repository from a web server that exposes its `.git`
//! directory as plain files.
//!
//! `HEAD` is resolved to a commit, every object reachable from it is fetched
//! one loose object at a time, and the result is written either as a mirror
//! `.git` directory or as one directory of files per commit.

pub mod config;
pub mod error;
pub mod fetch;
pub mod git;
pub mod materialize;
pub mod refs;
pub mod repair;
pub mod report;
pub mod session;
pub mod walker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{FetchConfig, Layout};
pub use error::{Error, Result};
pub use fetch::{FilesystemFetcher, HttpFetcher, HttpOptions, ObjectFetcher};
pub use git::ObjectHash;
pub use materialize::{FlattenedExtraction, Materializer, RawMirror};
pub use refs::{RefResolver, ResolvedRef};
pub use repair::{RepairAdvisor, RepairReport};
pub use report::RunReport;
pub use session::Session;
pub use walker::{ObjectGraphWalker, WalkOptions, WalkReport};
