//! Second-pass gap filling for a raw mirror.
//!
//! The walker reports what it could not obtain; `git fsck` on the finished
//! mirror reports what is still broken. Either list can be handed to
//! [`RepairAdvisor::repair`], which re-requests exactly those objects.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fetch::ObjectFetcher;
use crate::git::{decode_verified, ObjectHash};
use crate::materialize::{Materializer, RawMirror};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairFailure {
    pub hash: ObjectHash,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairReport {
    /// Number of `git fsck` rounds that were run.
    #[serde(default)]
    pub rounds: usize,
    #[serde(default)]
    pub repaired: Vec<ObjectHash>,
    #[serde(default)]
    pub failed: Vec<RepairFailure>,
    /// `git fsck` or checkout runs that could not be completed.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl RepairReport {
    pub fn count(&self) -> usize {
        self.repaired.len()
    }

    /// Fold a later pass into this one. A hash that failed earlier and was
    /// repaired now is no longer reported as failed.
    pub fn merge(&mut self, other: RepairReport) {
        self.failed.retain(|f| !other.repaired.contains(&f.hash));
        self.repaired.extend(other.repaired);
        self.errors.extend(other.errors);
        for failure in other.failed {
            if !self.failed.iter().any(|f| f.hash == failure.hash) {
                self.failed.push(failure);
            }
        }
    }
}

pub struct RepairAdvisor<'a, F: ?Sized> {
    fetcher: &'a F,
    git: PathBuf,
}

impl<'a, F: ObjectFetcher + ?Sized> RepairAdvisor<'a, F> {
    pub fn new(fetcher: &'a F) -> Self {
        Self {
            fetcher,
            git: PathBuf::from("git"),
        }
    }

    /// Use a specific `git` executable instead of the one on `PATH`.
    pub fn with_git(mut self, git: impl Into<PathBuf>) -> Self {
        self.git = git.into();
        self
    }

    /// Fetch, verify and store each hash. Nothing here is fatal: every
    /// failure is recorded in the returned report.
    pub async fn repair(&self, missing: &[ObjectHash], mirror: &mut RawMirror) -> RepairReport {
        let mut report = RepairReport::default();
        for hash in missing {
            if report.repaired.contains(hash) {
                continue;
            }
            match self.repair_one(hash, mirror).await {
                Ok(()) => {
                    tracing::info!("Repaired {}", hash);
                    report.repaired.push(hash.clone());
                }
                Err(e) => {
                    tracing::warn!("Could not repair {}: {:#}", hash, e);
                    report.failed.push(RepairFailure {
                        hash: hash.clone(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }
        report
    }

    /// Repair `initial`, then alternate `git fsck` and repair for up to
    /// `rounds` rounds, stopping early once fsck is clean or a round makes
    /// no progress. An fsck that cannot be run ends the loop and is
    /// recorded in the report.
    pub async fn repair_until_clean(
        &self,
        initial: &[ObjectHash],
        mirror: &mut RawMirror,
        rounds: usize,
    ) -> RepairReport {
        let mut report = self.repair(initial, mirror).await;
        for round in 1..=rounds {
            let broken = match self.fsck(mirror.work_tree()) {
                Ok(broken) => broken,
                Err(e) => {
                    tracing::warn!("Skipping repair rounds: {:#}", e);
                    report.errors.push(format!("{:#}", e));
                    break;
                }
            };
            report.rounds = round;
            if broken.is_empty() {
                tracing::info!("git fsck is clean after {} round(s)", round);
                break;
            }
            tracing::info!("git fsck round {}: {} object(s) to repair", round, broken.len());
            let pass = self.repair(&broken, mirror).await;
            let progressed = pass.count() > 0;
            report.merge(pass);
            if !progressed {
                tracing::warn!("Repair round {} recovered nothing, giving up", round);
                break;
            }
        }
        report
    }

    /// `git reset --hard` in `work_tree`, populating the checkout from the
    /// mirror. A failure is logged and recorded in `report`.
    pub fn checkout(&self, work_tree: &Path, report: &mut RepairReport) {
        match self.reset_hard(work_tree) {
            Ok(()) => tracing::info!("Checked out working tree in {}", work_tree.display()),
            Err(e) => {
                tracing::warn!("Checkout failed: {:#}", e);
                report.errors.push(format!("{:#}", e));
            }
        }
    }

    /// Run `git fsck` in `work_tree` and return the hashes it complains about.
    pub fn fsck(&self, work_tree: &Path) -> Result<Vec<ObjectHash>> {
        tracing::debug!("Running git fsck in {}", work_tree.display());
        let output = Command::new(&self.git)
            .current_dir(work_tree)
            .args(["fsck", "--full"])
            .output()
            .context("Failed to run git fsck; is git installed?")?;
        // fsck exits non-zero exactly when it finds problems, so the status is
        // not an error here.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(parse_fsck_output(&text))
    }

    fn reset_hard(&self, work_tree: &Path) -> Result<()> {
        let output = Command::new(&self.git)
            .current_dir(work_tree)
            .args(["reset", "--hard"])
            .output()
            .context("Failed to run git reset; is git installed?")?;
        if !output.status.success() {
            anyhow::bail!(
                "git reset --hard failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn repair_one(&self, hash: &ObjectHash, mirror: &mut RawMirror) -> Result<()> {
        let raw = self.fetcher.fetch_object(hash).await?;
        decode_verified(hash, &raw)?;
        mirror.store_object(hash, &raw)
    }
}

/// Object hashes `git fsck` reports as missing, unreadable or corrupt, in
/// order of first appearance.
pub fn parse_fsck_output(output: &str) -> Vec<ObjectHash> {
    let mut hashes: Vec<ObjectHash> = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let candidate = if line.starts_with("missing ")
            || line.starts_with("to ")
            || (line.starts_with("broken link") && line.contains(" to "))
        {
            line.split_whitespace().last().and_then(|s| ObjectHash::parse(s).ok())
        } else if line.contains("corrupt or missing") || line.contains("unable to unpack") {
            object_in_line(line)
        } else {
            None
        };
        if let Some(hash) = candidate {
            if !hashes.contains(&hash) {
                hashes.push(hash);
            }
        }
    }
    hashes
}

/// A hash mentioned as a bare 40-hex word or as an `objects/xx/yyyy` path.
fn object_in_line(line: &str) -> Option<ObjectHash> {
    line.split(|c: char| c.is_whitespace() || c == ':' || c == '(' || c == ')')
        .find_map(|word| {
            if let Some(idx) = word.find("objects/") {
                let rest = &word[idx + "objects/".len()..];
                let (dir, file) = rest.split_once('/')?;
                ObjectHash::parse(&format!("{}{}", dir, file)).ok()
            } else {
                ObjectHash::parse(word).ok()
            }
        })
}
