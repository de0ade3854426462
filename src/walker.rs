//! Object graph traversal from a seed commit.
//!
//! The walk is driven by an explicit worklist owned by a single coordinator,
//! so long histories never grow the call stack. The coordinator is also the
//! only owner of the visited set: checking and marking a hash happens in one
//! place, which guarantees each hash is fetched at most once per run no
//! matter how many commits or trees reference it. Fetch and decode of
//! pending objects run on a bounded set of tokio tasks.

mod report;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
};

use indicatif::ProgressBar;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use report::{MissingObject, Role, SkippedEntry, WalkReport};

use crate::error::{Error, Result};
use crate::fetch::ObjectFetcher;
use crate::git::{
    decode, decode_verified, loose::kind_name, EntryKind, GitObject, Kind, ObjectHash, Tree,
    TreeEntry,
};
use crate::materialize::{Materializer, Placement};

/// Default number of concurrent object fetches.
pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Upper bound on fetches in flight.
    pub concurrency: usize,
    /// Abort on any unobtainable object, not only required ones.
    pub strict: bool,
    /// Check that every object's content hashes to the name it was fetched by.
    pub verify_hashes: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            strict: false,
            verify_hashes: true,
        }
    }
}

type MissingHook = Box<dyn FnMut(&MissingObject) + Send>;
type Fetched = Result<(Vec<u8>, GitObject)>;

/// A pending worklist item together with what the materializer needs to
/// place it.
#[derive(Debug, Clone)]
enum Task {
    Commit {
        hash: ObjectHash,
        role: Role,
    },
    Tree {
        hash: ObjectHash,
        commit: ObjectHash,
        dir: PathBuf,
        /// Reached from the seed commit's root tree.
        required: bool,
    },
    Blob(Placement),
}

impl Task {
    fn hash(&self) -> &ObjectHash {
        match self {
            Task::Commit { hash, .. } | Task::Tree { hash, .. } => hash,
            Task::Blob(placement) => &placement.blob,
        }
    }

    fn role(&self) -> Role {
        match self {
            Task::Commit { role, .. } => *role,
            Task::Tree { .. } => Role::Tree,
            Task::Blob(_) => Role::Blob,
        }
    }

    fn expected_kind(&self) -> Kind {
        match self {
            Task::Commit { .. } => Kind::Commit,
            Task::Tree { .. } => Kind::Tree,
            Task::Blob(_) => Kind::Blob,
        }
    }

    fn commit(&self) -> Option<&ObjectHash> {
        match self {
            Task::Commit { .. } => None,
            Task::Tree { commit, .. } => Some(commit),
            Task::Blob(placement) => Some(&placement.commit),
        }
    }

    fn path(&self) -> String {
        match self {
            Task::Commit { .. } => String::new(),
            Task::Tree { dir, .. } => dir.to_string_lossy().into_owned(),
            Task::Blob(placement) => placement.path.to_string_lossy().into_owned(),
        }
    }
}

/// Walks everything reachable from a commit and hands it to a
/// [`Materializer`].
pub struct ObjectGraphWalker<F> {
    fetcher: Arc<F>,
    options: WalkOptions,
    cancel: CancellationToken,
    progress: ProgressBar,
    on_missing: Option<MissingHook>,
}

impl<F: ObjectFetcher + 'static> ObjectGraphWalker<F> {
    pub fn new(fetcher: Arc<F>, options: WalkOptions) -> Self {
        Self {
            fetcher,
            options,
            cancel: CancellationToken::new(),
            progress: ProgressBar::hidden(),
            on_missing: None,
        }
    }

    /// Stop between worklist items once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Tick `progress` once per object obtained.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Report each object that could not be obtained, as it happens.
    pub fn on_missing(mut self, hook: impl FnMut(&MissingObject) + Send + 'static) -> Self {
        self.on_missing = Some(Box::new(hook));
        self
    }

    /// Walk the graph reachable from `seed`.
    ///
    /// Fails with [`Error::FetchFailed`] when the seed commit or one of the
    /// trees of its snapshot cannot be obtained, and with [`Error::Cancelled`]
    /// when cancelled. Other unobtainable objects end up in
    /// [`WalkReport::missing`].
    pub async fn walk<M: Materializer>(
        &mut self,
        seed: &ObjectHash,
        materializer: &mut M,
    ) -> Result<WalkReport> {
        tracing::info!("Walking object graph from {}", seed);
        let limit = self.options.concurrency.max(1);
        let cancel = self.cancel.clone();

        let mut run = Run {
            fetcher: &self.fetcher,
            options: &self.options,
            progress: &self.progress,
            on_missing: &mut self.on_missing,
            expands: materializer.expands_per_commit(),
            materializer,
            queue: VecDeque::new(),
            visited: HashSet::new(),
            in_flight: HashMap::new(),
            trees: HashMap::new(),
            required: HashSet::new(),
            subtrees: HashMap::new(),
            failed_trees: HashMap::new(),
            tasks: JoinSet::new(),
            report: WalkReport {
                seed: Some(seed.clone()),
                ..WalkReport::default()
            },
        };
        run.queue.push_back(Task::Commit {
            hash: seed.clone(),
            role: Role::SeedCommit,
        });

        loop {
            if cancel.is_cancelled() {
                run.tasks.abort_all();
                tracing::warn!("Walk cancelled after {} objects", run.visited.len());
                return Err(Error::Cancelled {
                    visited: run.visited.len(),
                });
            }

            while run.tasks.len() < limit {
                let Some(task) = run.queue.pop_front() else {
                    break;
                };
                run.schedule(task)?;
            }

            if run.tasks.is_empty() {
                if run.queue.is_empty() {
                    break;
                }
                continue;
            }

            let joined = tokio::select! {
                _ = cancel.cancelled() => continue,
                joined = run.tasks.join_next() => joined,
            };
            match joined {
                Some(Ok((task, fetched))) => run.complete(task, fetched)?,
                Some(Err(e)) => return Err(Error::Worker(e.to_string())),
                None => {}
            }
        }

        let report = run.report;
        tracing::info!(
            "Walk finished: {} commits, {} trees, {} blobs ({} fetched, {} reused, {} missing)",
            report.commits,
            report.trees,
            report.blobs,
            report.fetched,
            report.reused,
            report.missing.len()
        );
        Ok(report)
    }
}

/// State of a single walk.
struct Run<'w, F, M> {
    fetcher: &'w Arc<F>,
    options: &'w WalkOptions,
    progress: &'w ProgressBar,
    on_missing: &'w mut Option<MissingHook>,
    materializer: &'w mut M,
    expands: bool,
    queue: VecDeque<Task>,
    visited: HashSet<ObjectHash>,
    /// Hashes being fetched, with tasks for the same hash parked until it lands.
    in_flight: HashMap<ObjectHash, Vec<Task>>,
    /// Decoded trees, kept only when trees are replayed per commit.
    trees: HashMap<ObjectHash, Arc<Tree>>,
    /// Trees in the seed commit's snapshot; failing any of them aborts.
    required: HashSet<ObjectHash>,
    /// Subdirectory hashes of every tree expanded so far.
    subtrees: HashMap<ObjectHash, Vec<ObjectHash>>,
    /// Tree failures that were recorded as missing and abort if a seed
    /// snapshot path later reaches them.
    failed_trees: HashMap<ObjectHash, Error>,
    tasks: JoinSet<(Task, Fetched)>,
    report: WalkReport,
}

impl<F: ObjectFetcher + 'static, M: Materializer> Run<'_, F, M> {
    fn schedule(&mut self, task: Task) -> Result<()> {
        let hash = task.hash().clone();
        if let Task::Tree { required: true, .. } = &task {
            self.require_tree(hash.clone())?;
        }
        if !self.visited.insert(hash.clone()) {
            return self.revisit(task);
        }

        if let Some(raw) = self.materializer.cached_object(&hash)? {
            match self.decode(&hash, &raw) {
                Ok(object) => {
                    tracing::debug!("Reusing stored {}", hash);
                    self.report.reused += 1;
                    self.progress.inc(1);
                    return self.dispatch(task, &object, true);
                }
                Err(e) => tracing::warn!("Stored copy of {} is unusable, refetching: {}", hash, e),
            }
        }

        tracing::debug!("Fetching {} {}", task.role(), hash);
        self.in_flight.insert(hash, Vec::new());
        let fetcher = Arc::clone(self.fetcher);
        let verify = self.options.verify_hashes;
        self.tasks.spawn(async move {
            let fetched: Fetched = async {
                let raw = fetcher.fetch_object(task.hash()).await?;
                let object = if verify {
                    decode_verified(task.hash(), &raw)?
                } else {
                    decode(&raw)?
                };
                Ok((raw, object))
            }
            .await;
            (task, fetched)
        });
        Ok(())
    }

    fn decode(&self, hash: &ObjectHash, raw: &[u8]) -> Result<GitObject> {
        if self.options.verify_hashes {
            decode_verified(hash, raw)
        } else {
            decode(raw)
        }
    }

    /// A task for a hash that was already claimed. Nothing is fetched; for
    /// per-commit layouts the object is placed again under the new commit.
    fn revisit(&mut self, task: Task) -> Result<()> {
        if !self.expands || matches!(task, Task::Commit { .. }) {
            return Ok(());
        }

        let hash = task.hash().clone();
        if let Some(parked) = self.in_flight.get_mut(&hash) {
            parked.push(task);
            return Ok(());
        }

        match task {
            Task::Commit { .. } => {}
            Task::Tree { commit, dir, .. } => {
                if let Some(tree) = self.trees.get(&hash).cloned() {
                    let required = self.required.contains(&hash);
                    self.expand_tree(&commit, &dir, &tree, required);
                }
            }
            Task::Blob(placement) => {
                if !self.materializer.reuse_file(&placement)? {
                    tracing::debug!(
                        "Blob {} was never written, not placing {}",
                        hash,
                        placement.path.display()
                    );
                }
            }
        }
        Ok(())
    }

    fn complete(&mut self, task: Task, fetched: Fetched) -> Result<()> {
        let hash = task.hash().clone();
        let parked = self.in_flight.remove(&hash).unwrap_or_default();
        self.progress.inc(1);

        match fetched {
            Ok((raw, object)) => {
                self.report.fetched += 1;
                self.materializer.store_object(&hash, &raw)?;
                self.dispatch(task, &object, true)?;
                for task in parked {
                    self.dispatch(task, &object, false)?;
                }
                Ok(())
            }
            Err(e) => self.fail(task, e),
        }
    }

    /// Act on a decoded object. `first` is false when replaying an object for
    /// another commit, which must not be counted twice.
    fn dispatch(&mut self, task: Task, object: &GitObject, first: bool) -> Result<()> {
        match (task, object) {
            (Task::Commit { hash, role }, GitObject::Commit(commit)) => {
                self.report.commits += 1;
                tracing::debug!(
                    "Commit {} ({}) has {} parent(s)",
                    hash,
                    commit.summary().unwrap_or_default(),
                    commit.parents.len()
                );
                self.materializer.begin_commit(&hash, commit)?;
                self.queue.push_back(Task::Tree {
                    hash: commit.tree.clone(),
                    commit: hash.clone(),
                    dir: PathBuf::new(),
                    required: role == Role::SeedCommit,
                });
                for parent in &commit.parents {
                    self.queue.push_back(Task::Commit {
                        hash: parent.clone(),
                        role: Role::Parent,
                    });
                }
            }
            (
                Task::Tree {
                    hash,
                    commit,
                    dir,
                    required,
                },
                GitObject::Tree(tree),
            ) => {
                let required = required || self.required.contains(&hash);
                let subtrees = self.expand_tree(&commit, &dir, tree, required);
                if first {
                    self.report.trees += 1;
                    if self.expands {
                        self.trees.insert(hash.clone(), Arc::new(tree.clone()));
                    }
                    self.subtrees.insert(hash, subtrees);
                }
            }
            (Task::Blob(placement), GitObject::Blob(data)) => {
                if first {
                    self.report.blobs += 1;
                }
                self.materializer.write_file(&placement, data)?;
            }
            (task, object) => {
                let hash = task.hash().clone();
                let reason = format!(
                    "expected {}, found {}",
                    kind_name(task.expected_kind()),
                    kind_name(object.kind())
                );
                if task.role() == Role::SeedCommit {
                    return Err(Error::FetchFailed {
                        hash,
                        source: Box::new(Error::malformed(reason)),
                    });
                }
                tracing::warn!("Skipping {}: {}", hash, reason);
                self.report.skipped.push(SkippedEntry {
                    commit: task.commit().cloned(),
                    path: task.path(),
                    object: hash,
                    mode: None,
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Queue the entries of `tree` under `dir` and return the subtree hashes
    /// that were queued.
    fn expand_tree(
        &mut self,
        commit: &ObjectHash,
        dir: &Path,
        tree: &Tree,
        required: bool,
    ) -> Vec<ObjectHash> {
        let mut subtrees = Vec::new();
        for entry in &tree.entries {
            let name = match safe_segment(&entry.name) {
                Some(name) => name,
                None if self.expands => {
                    let path = dir.join(&*entry.name_lossy());
                    self.skip_entry(commit, &path, entry, "unsafe path segment");
                    continue;
                }
                // The path is never written in this layout; the object is
                // still wanted.
                None => entry.hash.to_string(),
            };
            let path = dir.join(name);

            match entry.kind() {
                Some(EntryKind::Directory) => {
                    subtrees.push(entry.hash.clone());
                    self.queue.push_back(Task::Tree {
                        hash: entry.hash.clone(),
                        commit: commit.clone(),
                        dir: path,
                        required,
                    })
                }
                Some(kind @ (EntryKind::Regular | EntryKind::Executable | EntryKind::Symlink)) => {
                    self.queue.push_back(Task::Blob(Placement {
                        commit: commit.clone(),
                        path,
                        kind,
                        blob: entry.hash.clone(),
                    }))
                }
                Some(EntryKind::Submodule) => {
                    self.skip_entry(commit, &path, entry, "submodule commit is not in this repository")
                }
                None => self.skip_entry(commit, &path, entry, "unrecognised mode"),
            }
        }
        subtrees
    }

    fn skip_entry(&mut self, commit: &ObjectHash, path: &Path, entry: &TreeEntry, reason: &str) {
        tracing::warn!(
            "Skipping {} (mode {}) in {}: {}",
            path.display(),
            entry.mode,
            commit,
            reason
        );
        self.report.skipped.push(SkippedEntry {
            commit: Some(commit.clone()),
            path: path.to_string_lossy().into_owned(),
            object: entry.hash.clone(),
            mode: Some(entry.mode.clone()),
            reason: reason.to_string(),
        });
    }

    /// Mark `hash` and every subtree already known below it as part of the
    /// seed snapshot. A tree among them that already failed aborts the walk.
    fn require_tree(&mut self, hash: ObjectHash) -> Result<()> {
        let mut pending = vec![hash];
        while let Some(hash) = pending.pop() {
            if !self.required.insert(hash.clone()) {
                continue;
            }
            if let Some(error) = self.failed_trees.remove(&hash) {
                tracing::error!("Cannot obtain tree {} of the seed snapshot: {}", hash, error);
                return Err(Error::FetchFailed {
                    hash,
                    source: Box::new(error),
                });
            }
            if let Some(children) = self.subtrees.get(&hash) {
                pending.extend(children.iter().cloned());
            }
        }
        Ok(())
    }

    fn is_required(&self, task: &Task) -> bool {
        match task {
            Task::Commit { role, .. } => *role == Role::SeedCommit,
            Task::Tree { hash, required, .. } => *required || self.required.contains(hash),
            Task::Blob(_) => false,
        }
    }

    fn fail(&mut self, task: Task, error: Error) -> Result<()> {
        let hash = task.hash().clone();
        let missing = MissingObject {
            hash: hash.clone(),
            role: task.role(),
            reason: error.to_string(),
        };
        if let Some(hook) = self.on_missing.as_mut() {
            hook(&missing);
        }

        if self.options.strict || self.is_required(&task) {
            tracing::error!("Cannot obtain {} {}: {}", missing.role, hash, error);
            return Err(Error::FetchFailed {
                hash,
                source: Box::new(error),
            });
        }

        tracing::warn!("Missing {} {}: {}", missing.role, hash, error);
        self.report.missing.push(missing);
        if let Task::Tree { .. } = &task {
            self.failed_trees.insert(hash, error);
        }
        Ok(())
    }
}

/// A tree entry name that is safe to use as one path component.
fn safe_segment(name: &[u8]) -> Option<String> {
    let name = std::str::from_utf8(name).ok()?;
    let unsafe_name = name.is_empty()
        || name == "."
        || name == ".."
        || name.eq_ignore_ascii_case(".git")
        || name.contains(['/', '\\', '\0']);
    (!unsafe_name).then(|| name.to_string())
}
