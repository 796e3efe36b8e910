//! Run orchestration.
//!
//! The [`Orchestrator`] wires the store, the rehydrator and the crawler
//! together for one run:
//!
//! - every rehydrated path becomes a tracked unit that either prunes a stale
//!   file (re-queueing its identifier) or feeds the page's links to the
//!   crawler frontier
//! - every fetched [`Document`] becomes a tracked unit that saves it
//!
//! The run is drained once the path stream and the document stream have both
//! closed and the [`WorkTracker`] reports nothing outstanding.

mod summary;
mod tracker;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

pub use summary::{RunStats, RunSummary};
pub use tracker::{WorkGuard, WorkTracker};

use crate::config::MirrorConfig;
use crate::fetch::{
    CrawlStats, Crawler, DOCUMENT_BUFFER, Document, DownloadLedger, FrontierHandle, PageClient,
    extract_identifiers,
};
use crate::rehydrate::{RehydrateError, RehydrateStats, Rehydrator};
use crate::store::{FileStore, Scheme, decode, is_partial_file};

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The output root cannot be used; nothing was started.
    #[error("input error: {0}")]
    Input(#[source] RehydrateError),

    /// The walk of the output root failed part way; the run was cancelled
    /// and drained.
    #[error("rehydration failed: {0}")]
    Rehydrate(#[source] RehydrateError),
}

impl MirrorError {
    fn from_start(err: RehydrateError) -> Self {
        match err {
            RehydrateError::MissingRoot { .. } => Self::Input(err),
            other => Self::Rehydrate(other),
        }
    }
}

/// Drives one mirror run.
#[derive(Debug)]
pub struct Orchestrator {
    config: MirrorConfig,
    client: PageClient,
    store: Arc<FileStore>,
}

impl Orchestrator {
    /// Creates an orchestrator over the configured output root.
    #[must_use]
    pub fn new(config: MirrorConfig, client: PageClient) -> Self {
        let store = Arc::new(FileStore::new(config.output_root()));
        Self {
            config,
            client,
            store,
        }
    }

    /// Runs until drained or cancelled.
    ///
    /// Cancelling `cancel` stops the walk and the crawl; units already
    /// dispatched finish and the summary is flagged as interrupted.
    ///
    /// # Errors
    ///
    /// - [`MirrorError::Input`] if the output root is missing; nothing runs
    /// - [`MirrorError::Rehydrate`] if listing the tree fails part way
    #[instrument(skip(self, cancel), fields(root = %self.config.output_root().display(), seed = %self.config.seed()))]
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary, MirrorError> {
        let started = Instant::now();
        let run_cancel = cancel.child_token();

        let walk = Rehydrator::new(self.config.output_root())
            .start(run_cancel.clone())
            .await
            .map_err(MirrorError::from_start)?;
        let mut paths = walk.paths;
        let mut completion = Some(walk.completion);

        let crawler = Crawler::new(
            self.client.clone(),
            Arc::clone(&self.store) as Arc<dyn DownloadLedger>,
            self.config.policy().clone(),
            self.config.max_concurrent_fetches(),
            self.config.scheme(),
        );
        // Held until the walk finishes; every rehydration unit holds a clone.
        let mut frontier = Some(crawler.frontier());
        let (doc_tx, mut docs) = mpsc::channel(DOCUMENT_BUFFER);
        let crawl = tokio::spawn(crawler.run(
            self.config.seed().clone(),
            doc_tx,
            run_cancel.clone(),
        ));

        info!(
            max_concurrent = self.config.max_concurrent_fetches(),
            scheme = ?self.config.scheme(),
            "mirror run started"
        );

        let stats = Arc::new(RunStats::new());
        let tracker = WorkTracker::new();
        let mut rehydrate_error = None;
        let mut paths_open = true;
        let mut docs_open = true;

        while paths_open || docs_open {
            tokio::select! {
                received = paths.recv(), if paths_open => match received {
                    Some(path) => {
                        if let Some(frontier) = &frontier {
                            self.spawn_rehydrated(path, frontier.clone(), &stats, &tracker);
                        }
                    }
                    None => {
                        paths_open = false;
                        frontier = None;
                        if let Some(completion) = completion.take()
                            && let Err(e) = finish_walk(completion).await
                        {
                            error!(error = %e, "rehydration failed; cancelling run");
                            run_cancel.cancel();
                            rehydrate_error = Some(e);
                        }
                    }
                },
                received = docs.recv(), if docs_open => match received {
                    Some(document) => self.spawn_save(document, &stats, &tracker),
                    None => docs_open = false,
                },
            }
        }

        tracker.wait_idle().await;

        let crawl_stats = match crawl.await {
            Ok(crawl_stats) => crawl_stats,
            Err(e) => {
                error!(error = %e, "crawler task failed");
                CrawlStats {
                    failed: 1,
                    ..CrawlStats::default()
                }
            }
        };

        if let Some(e) = rehydrate_error {
            return Err(MirrorError::Rehydrate(e));
        }

        let summary = RunSummary::new(crawl_stats, &stats, cancel.is_cancelled(), started.elapsed());
        info!(
            saved = summary.saved,
            skipped_duplicate = summary.skipped_duplicate(),
            failed = summary.failed(),
            rehydrated = summary.rehydrated,
            stale_removed = summary.stale_removed,
            interrupted = summary.interrupted,
            duration_ms = u64::try_from(summary.duration.as_millis()).unwrap_or(u64::MAX),
            "mirror run finished"
        );
        Ok(summary)
    }

    fn spawn_rehydrated(
        &self,
        path: PathBuf,
        frontier: FrontierHandle,
        stats: &Arc<RunStats>,
        tracker: &WorkTracker,
    ) {
        let guard = tracker.track();
        let store = Arc::clone(&self.store);
        let stats = Arc::clone(stats);
        let scheme = self.config.scheme();
        tokio::spawn(async move {
            let _guard = guard;
            rehydrate_file(&store, scheme, &frontier, &path, &stats).await;
        });
    }

    fn spawn_save(&self, document: Document, stats: &Arc<RunStats>, tracker: &WorkTracker) {
        let guard = tracker.track();
        let store = Arc::clone(&self.store);
        let stats = Arc::clone(stats);
        tokio::spawn(async move {
            let _guard = guard;
            match store.save(&document.id, &document.body[..]).await {
                Ok(saved) => {
                    info!(id = %document.id, path = %saved.path.display(), bytes = saved.bytes, "page saved");
                    stats.increment_saved();
                }
                Err(e) => {
                    warn!(id = %document.id, error = %e, "failed to save page");
                    stats.increment_save_failed();
                }
            }
        });
    }
}

async fn finish_walk(
    completion: oneshot::Receiver<Result<RehydrateStats, RehydrateError>>,
) -> Result<(), RehydrateError> {
    let walked = completion.await.map_err(|_| RehydrateError::Abandoned)??;
    info!(
        files = walked.files,
        directories = walked.directories,
        "rehydration complete"
    );
    Ok(())
}

/// Handles one file found under the output root.
async fn rehydrate_file(
    store: &FileStore,
    scheme: Scheme,
    frontier: &FrontierHandle,
    path: &Path,
    stats: &RunStats,
) {
    if is_partial_file(path) {
        if store.partial_in_progress(path) {
            trace!(path = %path.display(), "partial file belongs to an active save");
            return;
        }
        match store.remove_path(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed partial file");
                stats.increment_partials_removed();
            }
            Err(e) => {
                warn!(error = %e, "failed to remove partial file");
                stats.increment_read_failed();
            }
        }
        return;
    }

    let id = match decode(path, store.root()) {
        Ok(id) => id,
        Err(e) => {
            debug!(path = %path.display(), reason = %e, "ignoring file");
            stats.increment_unrecognized();
            return;
        }
    };
    stats.increment_rehydrated();

    let stored = match store.read_stale(&id).await {
        Ok(stored) => stored,
        Err(e) => {
            warn!(id = %id, error = %e, "failed to read stored page");
            stats.increment_read_failed();
            return;
        }
    };

    if stored.stale {
        if store.claimed_by_this_run(&id) {
            trace!(id = %id, "placeholder belongs to an active fetch");
            return;
        }
        if let Err(e) = store.remove(&id).await {
            warn!(id = %id, error = %e, "failed to remove stale page");
            stats.increment_read_failed();
            return;
        }
        info!(id = %id, path = %stored.path.display(), "removed stale page; re-queueing");
        stats.increment_stale_removed();
        frontier.requeue_identifier(id);
        return;
    }

    let base = match id.to_url(scheme) {
        Ok(base) => base,
        Err(e) => {
            warn!(id = %id, error = %e, "stored page has no fetchable URL");
            return;
        }
    };
    let content = stored.content;
    let links = match tokio::task::spawn_blocking(move || extract_identifiers(&content, &base)).await
    {
        Ok(links) => links,
        Err(e) => {
            warn!(id = %id, error = %e, "link extraction panicked");
            return;
        }
    };
    trace!(id = %id, links = links.len(), "rehydrated links");
    for link in links {
        frontier.add_identifier(link);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::fetch::FrontierEntry;
    use crate::store::{Identifier, PLACEHOLDER};

    fn config(root: &Path, seed: &str) -> MirrorConfig {
        MirrorConfig::builder()
            .output_root(root)
            .seed(seed)
            .allow_pattern("^never-matches$")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_root_is_input_error() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("absent");
        let orchestrator = Orchestrator::new(
            config(&root, "http://127.0.0.1:9/seed"),
            PageClient::new().unwrap(),
        );

        let err = orchestrator.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            MirrorError::Input(RehydrateError::MissingRoot { .. })
        ));
        assert!(!root.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_subdirectory_fails_run() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("example.com");
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::write(locked.join("a.html"), b"<html></html>").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::read_dir(&locked).is_ok() {
            // Permission bits are not enforced (running as root).
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let orchestrator = Orchestrator::new(
            config(temp.path(), "http://127.0.0.1:9/seed"),
            PageClient::new().unwrap(),
        );
        let result = orchestrator.run(CancellationToken::new()).await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        match result {
            Err(MirrorError::Rehydrate(RehydrateError::ReadDir { path, .. })) => {
                assert_eq!(path, locked);
            }
            other => panic!("expected rehydration failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_file_is_removed_and_requeued() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        let id = Identifier::parse("example.com/a").unwrap();
        let path = store.path_for(&id);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, PLACEHOLDER).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let frontier = FrontierHandle::for_tests(tx);
        let stats = RunStats::new();
        rehydrate_file(&store, Scheme::Https, &frontier, &path, &stats).await;

        assert!(!path.exists());
        assert_eq!(rx.recv().await.unwrap(), FrontierEntry::Requeued(id));
        assert_eq!(stats.stale_removed(), 1);
        assert_eq!(stats.rehydrated(), 1);
    }

    #[tokio::test]
    async fn test_own_placeholder_is_left_alone() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        let id = Identifier::parse("example.com/in-flight").unwrap();
        store.write_placeholder(&id).await.unwrap();
        let path = store.path_for(&id);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let frontier = FrontierHandle::for_tests(tx);
        let stats = RunStats::new();
        rehydrate_file(&store, Scheme::Https, &frontier, &path, &stats).await;

        assert!(path.exists());
        drop(frontier);
        assert!(rx.recv().await.is_none());
        assert_eq!(stats.stale_removed(), 0);
    }

    #[tokio::test]
    async fn test_complete_page_feeds_its_links() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        let id = Identifier::parse("example.com/wiki/Start").unwrap();
        let html = r#"<html><body>
            <a href="/wiki/Next">next</a>
            <a href="https://other.example/page#top">other</a>
        </body></html>"#;
        store.save(&id, html.as_bytes()).await.unwrap();
        let path = store.path_for(&id);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let frontier = FrontierHandle::for_tests(tx);
        let stats = RunStats::new();
        rehydrate_file(&store, Scheme::Https, &frontier, &path, &stats).await;
        drop(frontier);

        let mut found = Vec::new();
        while let Some(entry) = rx.recv().await {
            let FrontierEntry::Discovered(link) = entry else {
                panic!("links are sightings, got {entry:?}");
            };
            found.push(link.as_str().to_string());
        }
        assert_eq!(found, vec!["example.com/wiki/Next", "other.example/page"]);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_partial_and_foreign_files() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        let partial = temp.path().join(".page.html.part");
        let foreign = temp.path().join("notes.txt");
        tokio::fs::write(&partial, b"half").await.unwrap();
        tokio::fs::write(&foreign, b"keep").await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let frontier = FrontierHandle::for_tests(tx);
        let stats = RunStats::new();
        rehydrate_file(&store, Scheme::Https, &frontier, &partial, &stats).await;
        rehydrate_file(&store, Scheme::Https, &frontier, &foreign, &stats).await;

        assert!(!partial.exists());
        assert!(foreign.exists());
        assert_eq!(stats.partials_removed(), 1);
        assert_eq!(stats.unrecognized(), 1);
        assert_eq!(stats.rehydrated(), 0);
    }

    #[test]
    fn test_error_classification() {
        let missing = MirrorError::from_start(RehydrateError::MissingRoot {
            path: PathBuf::from("/nope"),
        });
        assert!(matches!(missing, MirrorError::Input(_)));
        assert!(missing.to_string().contains("/nope"));

        let abandoned = MirrorError::from_start(RehydrateError::Abandoned);
        assert!(matches!(abandoned, MirrorError::Rehydrate(_)));
    }
}
