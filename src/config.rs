use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fetch::{HttpOptions, DEFAULT_USER_AGENT};
use crate::walker::WalkOptions;

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Output layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Byte-faithful `.git` directory that `git` can check out.
    #[default]
    Mirror,
    /// One directory of files per commit.
    Extract,
}

/// Configuration for git-dumb-fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchConfig {
    /// User-Agent header sent with every request
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,
    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
    /// Accept invalid TLS certificates
    #[serde(default)]
    pub insecure: bool,
    /// Maximum number of object fetches in flight
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub layout: Layout,
    /// Output directory; derived from the URL when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Name commit directories by full hash instead of the last 6 characters
    #[serde(default)]
    pub full_ids: bool,
    /// Abort on any unobtainable object
    #[serde(default)]
    pub strict: bool,
    /// Check every object against the hash it was requested by
    #[serde(default = "defaults::verify_hashes")]
    pub verify_hashes: bool,
    /// Bound on symbolic ref hops
    #[serde(default = "defaults::max_ref_hops")]
    pub max_ref_hops: usize,
    /// Files fetched and kept if the origin has them
    #[serde(default = "defaults::best_effort_paths")]
    pub best_effort_paths: Vec<String>,
    /// Maximum `git fsck` repair rounds when repair is requested
    #[serde(default = "defaults::repair_rounds")]
    pub repair_rounds: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout_secs(),
            insecure: false,
            concurrency: defaults::concurrency(),
            layout: Layout::default(),
            output_dir: None,
            full_ids: false,
            strict: false,
            verify_hashes: defaults::verify_hashes(),
            max_ref_hops: defaults::max_ref_hops(),
            best_effort_paths: defaults::best_effort_paths(),
            repair_rounds: defaults::repair_rounds(),
        }
    }
}

impl FetchConfig {
    /// Load the default config file if it exists, then apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        Self::load_with_overrides(&config_path)
    }

    /// Like [`FetchConfig::load`] but reading `config_path`. A missing file
    /// yields the defaults.
    pub fn load_with_overrides(config_path: &Path) -> Result<Self> {
        tracing::debug!("loading git-dumb-fetch config from {:?}", config_path);
        let mut config = if config_path.exists() {
            Self::load_from_file(config_path)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(timeout) = env::var("DUMB_FETCH_TIMEOUT") {
            self.timeout_secs = timeout
                .parse()
                .context("Failed to parse DUMB_FETCH_TIMEOUT as u64")?;
        }

        if let Ok(jobs) = env::var("DUMB_FETCH_JOBS") {
            self.concurrency = jobs
                .parse()
                .context("Failed to parse DUMB_FETCH_JOBS as usize")?;
        }

        if let Ok(user_agent) = env::var("DUMB_FETCH_USER_AGENT") {
            self.user_agent = user_agent;
        }

        if let Ok(path) = env::var("DUMB_FETCH_OUTPUT") {
            self.output_dir = Some(expand_tilde(&PathBuf::from(path)));
        }
        Ok(())
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: FetchConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        if let Some(ref output_dir) = config.output_dir {
            config.output_dir = Some(expand_tilde(output_dir));
        }

        Ok(config)
    }

    /// Get default config file path
    pub fn config_file_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".config/git-dumb-fetch/config.yaml"))
            .context("Could not determine home directory for config file")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            user_agent: self.user_agent.clone(),
            timeout: self.timeout(),
            insecure: self.insecure,
        }
    }

    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            concurrency: self.concurrency,
            strict: self.strict,
            verify_hashes: self.verify_hashes,
        }
    }
}

mod defaults {
    use super::DEFAULT_USER_AGENT;

    pub(crate) fn user_agent() -> String {
        DEFAULT_USER_AGENT.to_string()
    }

    pub(crate) fn timeout_secs() -> u64 {
        10
    }

    pub(crate) fn concurrency() -> usize {
        crate::walker::DEFAULT_CONCURRENCY
    }

    pub(crate) fn verify_hashes() -> bool {
        true
    }

    pub(crate) fn max_ref_hops() -> usize {
        crate::refs::DEFAULT_MAX_HOPS
    }

    pub(crate) fn best_effort_paths() -> Vec<String> {
        [
            "index",
            "logs/HEAD",
            "logs/refs/heads/master",
            "logs/refs/remotes/origin/HEAD",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    pub(crate) fn repair_rounds() -> usize {
        3
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tempfile::tempdir;

    use super::*;

    // Environment variables are process-wide; tests touching them take turns.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");

        let config = FetchConfig {
            timeout_secs: 30,
            concurrency: 2,
            layout: Layout::Extract,
            full_ids: true,
            output_dir: Some(dir.path().join("out")),
            ..FetchConfig::default()
        };
        std::fs::write(&config_path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = FetchConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.timeout_secs, 30);
        assert_eq!(loaded.concurrency, 2);
        assert_eq!(loaded.layout, Layout::Extract);
        assert!(loaded.full_ids);
        assert_eq!(loaded.output_dir, config.output_dir);
        assert_eq!(loaded.best_effort_paths, config.best_effort_paths);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();

        let config = FetchConfig::load_with_overrides(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.layout, Layout::Mirror);
        assert!(config.verify_hashes);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "layout: extract\nstrict: true\n").unwrap();

        let loaded = FetchConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.layout, Layout::Extract);
        assert!(loaded.strict);
        assert_eq!(loaded.max_ref_hops, 10);
        assert_eq!(loaded.repair_rounds, 3);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "colour: blue\n").unwrap();
        assert!(FetchConfig::load_from_file(&config_path).is_err());
    }

    #[test]
    fn test_env_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        env::set_var("DUMB_FETCH_JOBS", "3");
        env::set_var("DUMB_FETCH_USER_AGENT", "curl/8.0");

        let config = FetchConfig::load_with_overrides(&dir.path().join("absent.yaml"));

        env::remove_var("DUMB_FETCH_JOBS");
        env::remove_var("DUMB_FETCH_USER_AGENT");

        let config = config.unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.user_agent, "curl/8.0");
        assert_eq!(config.http_options().user_agent, "curl/8.0");
    }

    #[test]
    fn test_tilde_expansion() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "output_dir: ~/loot\n").unwrap();

        let loaded = FetchConfig::load_from_file(&config_path).unwrap();

        if let Some(home) = dirs::home_dir() {
            assert_eq!(loaded.output_dir, Some(home.join("loot")));
        }
    }

    #[test]
    fn test_tilde_expansion_env_vars() {
        let _guard = ENV_LOCK.lock().unwrap();
        let home = dirs::home_dir().unwrap();
        let dir = tempdir().unwrap();
        env::set_var("DUMB_FETCH_OUTPUT", "~/test/out");

        let config = FetchConfig::load_with_overrides(&dir.path().join("absent.yaml"));
        env::remove_var("DUMB_FETCH_OUTPUT");

        assert_eq!(config.unwrap().output_dir, Some(home.join("test/out")));
    }
}
