//! Run counters and the final summary.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::fetch::CrawlStats;

/// Counters updated by orchestrator units while a run is in progress.
#[derive(Debug, Default)]
pub struct RunStats {
    saved: AtomicUsize,
    save_failed: AtomicUsize,
    rehydrated: AtomicUsize,
    stale_removed: AtomicUsize,
    partials_removed: AtomicUsize,
    unrecognized: AtomicUsize,
    read_failed: AtomicUsize,
}

impl RunStats {
    /// Creates a tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages written to disk.
    #[must_use]
    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }

    /// Pages fetched but not written.
    #[must_use]
    pub fn save_failed(&self) -> usize {
        self.save_failed.load(Ordering::SeqCst)
    }

    /// Stored files decoded back into identifiers.
    #[must_use]
    pub fn rehydrated(&self) -> usize {
        self.rehydrated.load(Ordering::SeqCst)
    }

    /// Placeholder or empty files removed and re-queued.
    #[must_use]
    pub fn stale_removed(&self) -> usize {
        self.stale_removed.load(Ordering::SeqCst)
    }

    /// Leftover partial files removed.
    #[must_use]
    pub fn partials_removed(&self) -> usize {
        self.partials_removed.load(Ordering::SeqCst)
    }

    /// Files under the root that do not decode to an identifier.
    #[must_use]
    pub fn unrecognized(&self) -> usize {
        self.unrecognized.load(Ordering::SeqCst)
    }

    /// Stored files that could not be read or removed.
    #[must_use]
    pub fn read_failed(&self) -> usize {
        self.read_failed.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_saved(&self) {
        self.saved.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_save_failed(&self) {
        self.save_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_rehydrated(&self) {
        self.rehydrated.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_stale_removed(&self) {
        self.stale_removed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_partials_removed(&self) {
        self.partials_removed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_unrecognized(&self) {
        self.unrecognized.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_read_failed(&self) {
        self.read_failed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Counters reported by the crawler.
    pub crawl: CrawlStats,
    /// Pages written.
    pub saved: usize,
    /// Pages fetched but not written.
    pub save_failed: usize,
    /// Stored files rehydrated into identifiers.
    pub rehydrated: usize,
    /// Stale files removed and re-queued.
    pub stale_removed: usize,
    /// Partial files removed.
    pub partials_removed: usize,
    /// Files under the root that are not stored pages.
    pub unrecognized: usize,
    /// Stored files that could not be read or removed.
    pub read_failed: usize,
    /// Whether the run was cancelled before draining.
    pub interrupted: bool,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl RunSummary {
    pub(crate) fn new(
        crawl: CrawlStats,
        stats: &RunStats,
        interrupted: bool,
        duration: Duration,
    ) -> Self {
        Self {
            crawl,
            saved: stats.saved(),
            save_failed: stats.save_failed(),
            rehydrated: stats.rehydrated(),
            stale_removed: stats.stale_removed(),
            partials_removed: stats.partials_removed(),
            unrecognized: stats.unrecognized(),
            read_failed: stats.read_failed(),
            interrupted,
            duration,
        }
    }

    /// Identifiers skipped because they were already stored or claimed.
    #[must_use]
    pub fn skipped_duplicate(&self) -> usize {
        self.crawl.skipped_duplicate
    }

    /// Every failed unit: fetches, claims, saves and unreadable files.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.crawl.failed + self.save_failed + self.read_failed
    }

    /// Writes a human-readable report.
    ///
    /// # Errors
    ///
    /// Returns any error from the underlying writer.
    pub fn write_report<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let status = if self.interrupted {
            "interrupted"
        } else {
            "complete"
        };
        writeln!(out, "Mirror {status} in {:.2?}", self.duration)?;
        writeln!(out, "  saved:              {}", self.saved)?;
        writeln!(out, "  skipped duplicate:  {}", self.skipped_duplicate())?;
        writeln!(out, "  failed:             {}", self.failed())?;
        writeln!(out, "  rehydrated:         {}", self.rehydrated)?;
        writeln!(out, "  stale removed:      {}", self.stale_removed)?;
        writeln!(out, "  links discovered:   {}", self.crawl.links_discovered)?;
        writeln!(out, "  filtered by policy: {}", self.crawl.filtered)?;
        Ok(())
    }
}
