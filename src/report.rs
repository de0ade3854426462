use std::{fs, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Layout;
use crate::git::ObjectHash;
use crate::materialize::write_atomic;
use crate::repair::RepairReport;
use crate::walker::WalkReport;

/// File name of the report inside the output directory.
pub const REPORT_FILE: &str = "fetch-report.yaml";

/// A best-effort path that failed for a reason other than absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestEffortFailure {
    pub path: String,
    pub reason: String,
}

/// Summary of one run, written next to the output so an interrupted or
/// partial run can be inspected later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub base_url: String,
    pub layout: Layout,
    /// Ref files followed from `HEAD` to the seed, in order.
    pub ref_chain: Vec<String>,
    pub seed: ObjectHash,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Non-object files copied into the output.
    #[serde(default)]
    pub recorded: Vec<String>,
    #[serde(default)]
    pub best_effort_failures: Vec<BestEffortFailure>,
    pub walk: WalkReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairReport>,
}

impl RunReport {
    /// Hashes that are still unobtainable after any repair.
    pub fn unresolved(&self) -> Vec<ObjectHash> {
        let mut hashes = self.walk.missing_hashes();
        if let Some(repair) = &self.repair {
            hashes.retain(|h| !repair.repaired.contains(h));
            for failure in &repair.failed {
                if !hashes.contains(&failure.hash) {
                    hashes.push(failure.hash.clone());
                }
            }
        }
        hashes
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read run report from {:?}", path))?;
        let report = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse run report from {:?}", path))?;
        Ok(Some(report))
    }

    /// Write the report via a temp file and rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize run report")?;
        write_atomic(path, content.as_bytes())
            .with_context(|| format!("Failed to write run report to {:?}", path))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run report as JSON")
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::repair::RepairFailure;
    use crate::walker::{MissingObject, Role};

    fn hash(c: &str) -> ObjectHash {
        ObjectHash::parse(&c.repeat(40)).unwrap()
    }

    fn report() -> RunReport {
        RunReport {
            base_url: "http://example.com/.git/".into(),
            layout: Layout::Mirror,
            ref_chain: vec!["HEAD".into(), "refs/heads/master".into()],
            seed: hash("a"),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            recorded: vec!["HEAD".into()],
            best_effort_failures: vec![],
            walk: WalkReport {
                seed: Some(hash("a")),
                commits: 1,
                missing: vec![
                    MissingObject {
                        hash: hash("b"),
                        role: Role::Blob,
                        reason: "not found".into(),
                    },
                    MissingObject {
                        hash: hash("c"),
                        role: Role::Parent,
                        reason: "not found".into(),
                    },
                ],
                ..WalkReport::default()
            },
            repair: None,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(REPORT_FILE);
        assert!(RunReport::load(&path).unwrap().is_none());

        let original = report();
        original.save(&path).unwrap();
        let loaded = RunReport::load(&path).unwrap().unwrap();

        assert_eq!(loaded.seed, original.seed);
        assert_eq!(loaded.ref_chain, original.ref_chain);
        assert_eq!(loaded.walk.missing, original.walk.missing);
        assert_eq!(loaded.started_at, original.started_at);
        assert!(loaded.repair.is_none());

        let yaml = fs::read_to_string(&path).unwrap();
        assert!(yaml.contains("role: blob"));
        assert!(yaml.contains("layout: mirror"));
    }

    #[test]
    fn test_unresolved_after_repair() {
        let mut run = report();
        run.repair = Some(RepairReport {
            rounds: 1,
            repaired: vec![hash("b")],
            failed: vec![RepairFailure {
                hash: hash("d"),
                reason: "not found".into(),
            }],
            errors: vec!["Failed to run git fsck".into()],
        });
        assert_eq!(run.unresolved(), vec![hash("c"), hash("d")]);
    }

    #[test]
    fn test_json_output() {
        let json = report().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["walk"]["commits"], 1);
        assert_eq!(value["seed"], "a".repeat(40));
    }
}
