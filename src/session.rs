//! One end-to-end run: resolve `HEAD`, keep the ref files, fetch the
//! best-effort extras and walk the graph into a materializer.

use std::sync::Arc;

use chrono::Utc;
use indicatif::ProgressBar;
use tokio_util::sync::CancellationToken;

use crate::config::FetchConfig;
use crate::error::Result;
use crate::fetch::ObjectFetcher;
use crate::materialize::Materializer;
use crate::refs::{ResolvedRef, RefResolver};
use crate::report::{BestEffortFailure, RunReport};
use crate::walker::ObjectGraphWalker;

pub struct Session<F> {
    fetcher: Arc<F>,
    base_url: String,
    config: FetchConfig,
    cancel: CancellationToken,
    progress: ProgressBar,
}

impl<F: ObjectFetcher + 'static> Session<F> {
    pub fn new(fetcher: Arc<F>, base_url: impl Into<String>, config: FetchConfig) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
            config,
            cancel: CancellationToken::new(),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run<M: Materializer>(&self, materializer: &mut M) -> Result<RunReport> {
        let started_at = Utc::now();
        tracing::info!("Fetching from {}", self.base_url);

        let resolved = RefResolver::new(self.config.max_ref_hops)
            .resolve(self.fetcher.as_ref())
            .await?;
        tracing::info!(
            "HEAD resolves to {} via {}",
            resolved.hash,
            resolved.ref_path().unwrap_or("detached HEAD")
        );

        let mut recorded = Vec::new();
        for hop in &resolved.hops {
            materializer.record_file(&hop.path, &hop.raw)?;
            recorded.push(hop.path.clone());
        }
        if let Some(packed) = &resolved.packed_refs {
            materializer.record_file("packed-refs", packed)?;
            recorded.push("packed-refs".to_string());
        }

        let mut best_effort_failures = Vec::new();
        for path in self.best_effort_paths(&resolved) {
            match self.fetcher.fetch_ref(&path).await {
                Ok(raw) => {
                    materializer.record_file(&path, &raw)?;
                    recorded.push(path);
                }
                Err(e) if e.is_not_found() => tracing::debug!("Origin has no {}", path),
                Err(e) => {
                    tracing::warn!("Could not fetch {}: {}", path, e);
                    best_effort_failures.push(BestEffortFailure {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let walk = ObjectGraphWalker::new(Arc::clone(&self.fetcher), self.config.walk_options())
            .with_cancellation(self.cancel.clone())
            .with_progress(self.progress.clone())
            .walk(&resolved.hash, materializer)
            .await?;
        self.progress.finish_and_clear();

        Ok(RunReport {
            base_url: self.base_url.clone(),
            layout: self.config.layout,
            ref_chain: ref_chain(&resolved),
            seed: resolved.hash,
            started_at,
            finished_at: Utc::now(),
            recorded,
            best_effort_failures,
            walk,
            repair: None,
        })
    }

    /// Configured extras plus the reflog of the branch `HEAD` names.
    fn best_effort_paths(&self, resolved: &ResolvedRef) -> Vec<String> {
        let mut paths = self.config.best_effort_paths.clone();
        if let Some(reflog) = resolved.ref_path().map(|r| format!("logs/{}", r)) {
            if !paths.contains(&reflog) {
                paths.push(reflog);
            }
        }
        paths
    }
}

fn ref_chain(resolved: &ResolvedRef) -> Vec<String> {
    let mut chain: Vec<String> = resolved.hops.iter().map(|hop| hop.path.clone()).collect();
    if let Some(packed) = &resolved.packed_ref {
        chain.push(packed.clone());
    }
    chain
}
