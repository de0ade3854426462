#![deny(clippy::mod_module_files)]
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use git_dumb_fetch::{
    fetch::ObjectFetcher,
    repair::{RepairAdvisor, RepairReport},
    report::REPORT_FILE,
    FetchConfig, FilesystemFetcher, FlattenedExtraction, HttpFetcher, Layout, RawMirror,
    RunReport, Session,
};

/// Recover a repository from a web server exposing its `.git` directory.
#[derive(Parser, Debug)]
#[command(name = "git-dumb-fetch", version)]
struct Cli {
    /// URL of the exposed `.git` directory, or a local path to a copy of one.
    url: Option<String>,

    /// Output layout.
    #[arg(long, value_enum)]
    layout: Option<Layout>,

    /// Output directory. Defaults to the host name (and port) of the URL.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum number of object fetches in flight.
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long)]
    user_agent: Option<String>,

    /// Accept invalid TLS certificates.
    #[arg(long)]
    insecure: bool,

    /// Abort on the first object that cannot be obtained.
    #[arg(long)]
    strict: bool,

    /// Name commit directories by full hash (extract layout).
    #[arg(long)]
    full_ids: bool,

    /// Re-fetch what `git fsck` reports missing (mirror layout).
    #[arg(long)]
    repair: bool,

    /// Run `git reset --hard` in the mirror afterwards (mirror layout).
    #[arg(long)]
    checkout: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Path to a YAML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// More logging; repeat for more.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, config: &mut FetchConfig) {
        if let Some(layout) = self.layout {
            config.layout = layout;
        }
        if let Some(output) = &self.output {
            config.output_dir = Some(output.clone());
        }
        if let Some(jobs) = self.jobs {
            config.concurrency = jobs;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = user_agent.clone();
        }
        config.insecure |= self.insecure;
        config.strict |= self.strict;
        config.full_ids |= self.full_ids;
    }
}

/// Where objects come from.
enum Source {
    Http(String),
    Local(PathBuf),
}

impl Source {
    fn parse(url: &str) -> Source {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Source::Http(url.to_string());
        }
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        // Accept the working tree as well as the `.git` directory itself.
        let git_dir = path.join(".git");
        if git_dir.is_dir() {
            Source::Local(git_dir)
        } else {
            Source::Local(path)
        }
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbose {
        0 => "git_dumb_fetch=info",
        1 => "git_dumb_fetch=debug",
        _ => "git_dumb_fetch=trace,reqwest=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// `<host>` or `<host>_<port>` for URLs, the directory name for local paths.
fn default_output_dir(url: &str) -> PathBuf {
    if let Ok(parsed) = Url::parse(url) {
        if let Some(host) = parsed.host_str() {
            return match parsed.port() {
                Some(port) => PathBuf::from(format!("{}_{}", host, port)),
                None => PathBuf::from(host),
            };
        }
    }
    let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
    let name = if path.file_name().is_some_and(|n| n == ".git") {
        path.parent().and_then(Path::file_name)
    } else {
        path.file_name()
    };
    let name = name.map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    PathBuf::from(format!("{}_dump", name.trim_start_matches('.')))
}

fn progress_bar(hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner} {msg} {pos} objects ({elapsed})")
            .context("Failed to create progress template")?,
    );
    bar.set_message("Fetching");
    Ok(bar)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(url) = cli.url.clone() else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let mut config = match &cli.config {
        Some(path) => FetchConfig::load_with_overrides(path)?,
        None => FetchConfig::load()?,
    };
    cli.apply(&mut config);

    let output = config
        .output_dir
        .clone()
        .unwrap_or_else(|| default_output_dir(&url));

    let report_path = output.join(REPORT_FILE);
    match RunReport::load(&report_path) {
        Ok(Some(previous)) => tracing::info!(
            "Previous run finished at {} with {} object(s) unresolved; resuming",
            previous.finished_at,
            previous.unresolved().len()
        ),
        Ok(None) => {}
        Err(e) => tracing::warn!("Ignoring previous run report: {:#}", e),
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after in-flight requests");
            on_signal.cancel();
        }
    });

    let report = match Source::parse(&url) {
        Source::Http(base) => {
            let fetcher = HttpFetcher::new(&base, &config.http_options())?;
            run(Arc::new(fetcher), &base, &config, &output, &cli, cancel).await?
        }
        Source::Local(path) => {
            let base = path.display().to_string();
            run(Arc::new(FilesystemFetcher::new(&path)), &base, &config, &output, &cli, cancel)
                .await?
        }
    };

    report.save(&report_path)?;

    let walk = &report.walk;
    eprintln!(
        "git-dumb-fetch: {} commits, {} trees, {} blobs ({} fetched, {} reused) into {}",
        walk.commits,
        walk.trees,
        walk.blobs,
        walk.fetched,
        walk.reused,
        output.display()
    );
    let unresolved = report.unresolved();
    if !unresolved.is_empty() {
        eprintln!(
            "git-dumb-fetch: {} object(s) could not be obtained, see {}",
            unresolved.len(),
            report_path.display()
        );
    }
    if cli.json {
        println!("{}", report.to_json()?);
    }
    Ok(())
}

async fn run<F: ObjectFetcher + 'static>(
    fetcher: Arc<F>,
    base: &str,
    config: &FetchConfig,
    output: &Path,
    cli: &Cli,
    cancel: CancellationToken,
) -> Result<RunReport> {
    let session = Session::new(Arc::clone(&fetcher), base, config.clone())
        .with_cancellation(cancel)
        .with_progress(progress_bar(cli.json || cli.verbose > 0)?);

    match config.layout {
        Layout::Mirror => {
            let mut mirror = RawMirror::new(output.join("repo/.git"))?;
            let mut report = session.run(&mut mirror).await.with_context(|| {
                format!("Fetch failed; rerun to resume from {}", output.display())
            })?;

            if cli.repair || cli.checkout {
                let advisor = RepairAdvisor::new(fetcher.as_ref());
                let mut repaired = RepairReport::default();
                if cli.repair {
                    repaired = advisor
                        .repair_until_clean(&report.walk.missing_hashes(), &mut mirror, config.repair_rounds)
                        .await;
                }
                if cli.checkout {
                    advisor.checkout(mirror.work_tree(), &mut repaired);
                }
                report.repair = Some(repaired);
            }
            Ok(report)
        }
        Layout::Extract => {
            if cli.repair || cli.checkout {
                tracing::warn!("--repair and --checkout only apply to the mirror layout");
            }
            let mut out = FlattenedExtraction::new(output, config.full_ids)?;
            Ok(session.run(&mut out).await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_dir() {
        assert_eq!(
            default_output_dir("http://10.0.0.5:8080/app/.git/"),
            PathBuf::from("10.0.0.5_8080")
        );
        assert_eq!(
            default_output_dir("https://example.com/.git"),
            PathBuf::from("example.com")
        );
        assert_eq!(
            default_output_dir("/tmp/site/.git"),
            PathBuf::from("site_dump")
        );
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "git-dumb-fetch",
            "http://example.com/.git/",
            "--layout",
            "extract",
            "-j",
            "2",
            "--strict",
        ]);
        let mut config = FetchConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.layout, Layout::Extract);
        assert_eq!(config.concurrency, 2);
        assert!(config.strict);
        assert!(!config.full_ids);
    }

    #[test]
    fn test_no_url_is_allowed() {
        let cli = Cli::parse_from(["git-dumb-fetch"]);
        assert!(cli.url.is_none());
    }
}
