//! Bounded-concurrency crawler that owns the frontier.
//!
//! The crawler runs a single dispatch loop. Every candidate identifier goes
//! through the same gate before a fetch task is spawned:
//!
//! 1. the set of identifiers already seen this run (queued, skipped or
//!    dispatched); a re-queued identifier bypasses it unless dispatched
//! 2. crawl policy (skipped for the seed)
//! 3. [`DownloadLedger::already_downloaded`]
//! 4. [`DownloadLedger::on_dispatch`], which must claim the identifier
//!
//! Fetch tasks hold a semaphore permit while in flight, forward each page as
//! a [`Document`] and hand the page's links back to the loop. The loop ends
//! once every [`FrontierHandle`] is dropped, nothing is pending and nothing
//! is in flight, or when cancelled.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use super::client::PageClient;
use super::error::FetchError;
use super::links::extract_identifiers;
use super::policy::CrawlPolicy;
use crate::store::{Claim, Identifier, Scheme, StoreError};

/// Dedup and claim hooks consulted before every dispatch.
#[async_trait]
pub trait DownloadLedger: Send + Sync {
    /// Whether `id` is already present and must not be fetched.
    async fn already_downloaded(&self, id: &Identifier) -> bool;

    /// Called once per identifier immediately before its fetch starts.
    ///
    /// Only [`Claim::Claimed`] lets the fetch proceed.
    async fn on_dispatch(&self, id: &Identifier) -> Result<Claim, StoreError>;
}

/// A fetched page.
#[derive(Debug, Clone)]
pub struct Document {
    /// The identifier that was dispatched.
    pub id: Identifier,
    /// URL the body was served from, after redirects.
    pub url: Url,
    /// The `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// The page body.
    pub body: Bytes,
}

/// Message on the crawler's inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrontierEntry {
    /// A sighting; dropped if the identifier was already seen this run.
    Discovered(Identifier),
    /// The stored copy was removed; checked again unless already dispatched.
    Requeued(Identifier),
}

/// Cloneable handle for injecting identifiers into a crawler's frontier.
#[derive(Debug, Clone)]
pub struct FrontierHandle {
    tx: mpsc::UnboundedSender<FrontierEntry>,
}

impl FrontierHandle {
    /// Queues `id` for the crawler. Repeated sightings are dropped.
    ///
    /// Returns false once the crawler has stopped.
    pub fn add_identifier(&self, id: Identifier) -> bool {
        self.tx.send(FrontierEntry::Discovered(id)).is_ok()
    }

    /// Queues `id` again after its stored copy was removed.
    ///
    /// Unlike [`add_identifier`](Self::add_identifier) this is honored even
    /// if `id` was already seen and skipped as downloaded.
    pub fn requeue_identifier(&self, id: Identifier) -> bool {
        self.tx.send(FrontierEntry::Requeued(id)).is_ok()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(tx: mpsc::UnboundedSender<FrontierEntry>) -> Self {
        Self { tx }
    }
}

/// Counters reported when a crawl ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlStats {
    /// Fetches started.
    pub dispatched: usize,
    /// Fetches that produced a document.
    pub fetched: usize,
    /// Fetches (or claims) that failed.
    pub failed: usize,
    /// Candidates skipped because they were already on disk or claimed.
    pub skipped_duplicate: usize,
    /// Candidates rejected by the crawl policy.
    pub filtered: usize,
    /// Links found in fetched pages.
    pub links_discovered: usize,
    /// Whether the crawl stopped because it was cancelled.
    pub cancelled: bool,
}

/// Crawler over a single frontier.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use mirror_core::fetch::{CrawlPolicy, Crawler, PageClient};
/// use mirror_core::store::{FileStore, Identifier, Scheme};
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(FileStore::new("./mirror"));
/// let policy = CrawlPolicy::from_patterns("en.wikipedia.org/wiki", None)?;
/// let crawler = Crawler::new(PageClient::new()?, store, policy, 8, Scheme::Https);
/// let (tx, mut rx) = mpsc::channel(16);
/// let seed = Identifier::parse("en.wikipedia.org/wiki/United_Kingdom")?;
/// let crawl = tokio::spawn(crawler.run(seed, tx, CancellationToken::new()));
/// while let Some(document) = rx.recv().await {
///     println!("{} ({} bytes)", document.id, document.body.len());
/// }
/// let stats = crawl.await?;
/// println!("fetched {}", stats.fetched);
/// # Ok(())
/// # }
/// ```
pub struct Crawler {
    client: PageClient,
    ledger: Arc<dyn DownloadLedger>,
    policy: CrawlPolicy,
    /// `None` when unbounded.
    limit: Option<Arc<Semaphore>>,
    scheme: Scheme,
    inbox_tx: mpsc::UnboundedSender<FrontierEntry>,
    inbox_rx: mpsc::UnboundedReceiver<FrontierEntry>,
}

impl fmt::Debug for Crawler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crawler")
            .field("policy", &self.policy)
            .field("bounded", &self.limit.is_some())
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

impl Crawler {
    /// Creates a crawler.
    ///
    /// `max_concurrent == 0` means no limit on simultaneous fetches.
    #[must_use]
    pub fn new(
        client: PageClient,
        ledger: Arc<dyn DownloadLedger>,
        policy: CrawlPolicy,
        max_concurrent: usize,
        scheme: Scheme,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        debug!(max_concurrent, ?scheme, "creating crawler");
        Self {
            client,
            ledger,
            policy,
            limit: (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent))),
            scheme,
            inbox_tx,
            inbox_rx,
        }
    }

    /// Returns a handle for injecting identifiers.
    ///
    /// The crawl keeps running while any handle is alive.
    #[must_use]
    pub fn frontier(&self) -> FrontierHandle {
        FrontierHandle {
            tx: self.inbox_tx.clone(),
        }
    }

    /// Crawls from `seed`, sending every fetched page to `output`.
    ///
    /// Cancelling `cancel` stops dispatch and aborts in-flight fetches; their
    /// placeholders stay on disk and are picked up by the next run.
    #[instrument(skip(self, output, cancel), fields(seed = %seed))]
    pub async fn run(
        self,
        seed: Identifier,
        output: mpsc::Sender<Document>,
        cancel: CancellationToken,
    ) -> CrawlStats {
        let Self {
            client,
            ledger,
            policy,
            limit,
            scheme,
            inbox_tx,
            mut inbox_rx,
        } = self;
        // Only external handles keep the inbox open from here on.
        drop(inbox_tx);

        let mut frontier = Frontier::new(seed, policy, ledger);
        let mut in_flight: JoinSet<FetchOutcome> = JoinSet::new();
        let mut inbox_open = true;

        info!("crawl started");

        loop {
            while !cancel.is_cancelled() && !frontier.pending.is_empty() {
                let permit = match &limit {
                    Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                    None => None,
                };
                let Some(id) = frontier.next_dispatchable().await else {
                    break;
                };
                frontier.stats.dispatched += 1;
                in_flight.spawn(fetch_page(
                    client.clone(),
                    id,
                    scheme,
                    output.clone(),
                    permit,
                ));
            }

            if cancel.is_cancelled() {
                break;
            }
            if !inbox_open && frontier.pending.is_empty() && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    match joined {
                        Ok(outcome) => frontier.record(outcome),
                        Err(e) => {
                            warn!(error = %e, "fetch task panicked");
                            frontier.stats.failed += 1;
                        }
                    }
                }
                received = inbox_rx.recv(), if inbox_open => match received {
                    Some(FrontierEntry::Discovered(id)) => frontier.enqueue(id),
                    Some(FrontierEntry::Requeued(id)) => frontier.requeue(id),
                    None => {
                        debug!("frontier inbox closed");
                        inbox_open = false;
                    }
                },
            }
        }

        if cancel.is_cancelled() {
            frontier.stats.cancelled = true;
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
            info!(
                pending = frontier.pending.len(),
                "crawl cancelled; in-flight fetches aborted"
            );
        }

        let stats = frontier.stats;
        info!(
            dispatched = stats.dispatched,
            fetched = stats.fetched,
            failed = stats.failed,
            skipped_duplicate = stats.skipped_duplicate,
            filtered = stats.filtered,
            "crawl finished"
        );
        stats
    }
}

/// Frontier state owned by the dispatch loop.
struct Frontier {
    seed: Identifier,
    policy: CrawlPolicy,
    ledger: Arc<dyn DownloadLedger>,
    pending: VecDeque<Identifier>,
    /// Every identifier queued, filtered, skipped or dispatched this run.
    seen: HashSet<Identifier>,
    dispatched: HashSet<Identifier>,
    stats: CrawlStats,
}

impl Frontier {
    fn new(seed: Identifier, policy: CrawlPolicy, ledger: Arc<dyn DownloadLedger>) -> Self {
        Self {
            seed: seed.clone(),
            policy,
            ledger,
            pending: VecDeque::from([seed.clone()]),
            seen: HashSet::from([seed]),
            dispatched: HashSet::new(),
            stats: CrawlStats::default(),
        }
    }

    fn enqueue(&mut self, id: Identifier) {
        if !self.seen.insert(id.clone()) {
            trace!(id = %id, "already seen in this run");
            return;
        }
        if id != self.seed && !self.policy.permits(&id) {
            trace!(id = %id, "rejected by crawl policy");
            self.stats.filtered += 1;
            return;
        }
        self.pending.push_back(id);
    }

    fn requeue(&mut self, id: Identifier) {
        if self.dispatched.contains(&id) {
            trace!(id = %id, "already dispatched in this run");
            return;
        }
        self.seen.remove(&id);
        self.enqueue(id);
    }

    /// Pops pending identifiers until one is claimed.
    async fn next_dispatchable(&mut self) -> Option<Identifier> {
        while let Some(id) = self.pending.pop_front() {
            if self.dispatched.contains(&id) {
                continue;
            }
            if self.ledger.already_downloaded(&id).await {
                debug!(id = %id, "skipping, already downloaded");
                self.stats.skipped_duplicate += 1;
                continue;
            }
            match self.ledger.on_dispatch(&id).await {
                Ok(Claim::Claimed) => {
                    self.dispatched.insert(id.clone());
                    return Some(id);
                }
                Ok(Claim::AlreadyPresent) => {
                    debug!(id = %id, "skipping, claimed concurrently");
                    self.stats.skipped_duplicate += 1;
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "failed to claim identifier");
                    self.stats.failed += 1;
                }
            }
        }
        None
    }

    fn record(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Fetched { id, links } => {
                self.stats.fetched += 1;
                self.stats.links_discovered += links.len();
                debug!(id = %id, links = links.len(), "page fetched");
                for link in links {
                    self.enqueue(link);
                }
            }
            FetchOutcome::Failed { id, error } => {
                warn!(id = %id, error = %error, "fetch failed");
                self.stats.failed += 1;
            }
        }
    }
}

enum FetchOutcome {
    Fetched {
        id: Identifier,
        links: Vec<Identifier>,
    },
    Failed {
        id: Identifier,
        error: FetchError,
    },
}

async fn fetch_page(
    client: PageClient,
    id: Identifier,
    scheme: Scheme,
    output: mpsc::Sender<Document>,
    permit: Option<OwnedSemaphorePermit>,
) -> FetchOutcome {
    let Ok(url) = id.to_url(scheme) else {
        let error = FetchError::invalid_url(format!("{}{id}", scheme.prefix()));
        return FetchOutcome::Failed { id, error };
    };

    let page = match client.fetch(&url).await {
        Ok(page) => page,
        Err(error) => return FetchOutcome::Failed { id, error },
    };
    // The network slot is free once the body is in memory.
    drop(permit);

    let links = if page.is_html() {
        let body = page.body.clone();
        let base = page.url.clone();
        match tokio::task::spawn_blocking(move || extract_identifiers(&body, &base)).await {
            Ok(links) => links,
            Err(e) => {
                warn!(id = %id, error = %e, "link extraction panicked");
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let document = Document {
        id: id.clone(),
        url: page.url,
        content_type: page.content_type,
        body: page.body,
    };
    if output.send(document).await.is_err() {
        debug!(id = %id, "document receiver closed");
    }

    FetchOutcome::Fetched { id, links }
}
