//! Page fetching and link discovery.
//!
//! This module is the crawl capability the orchestrator drives:
//!
//! - [`PageClient`] fetches page bodies over HTTP(S)
//! - [`extract_identifiers`] finds outbound links in HTML
//! - [`CrawlPolicy`] decides which identifiers may be fetched
//! - [`Crawler`] owns the frontier, enforces the fetch concurrency limit and
//!   consults a [`DownloadLedger`] before every dispatch
//!
//! HTTP-level retries are deliberately absent: a failed fetch leaves its
//! placeholder behind, and the next run re-dispatches it.

mod client;
mod constants;
mod crawler;
mod error;
mod links;
mod policy;

pub use client::{FetchedPage, PageClient};
pub use constants::{CONNECT_TIMEOUT_SECS, DOCUMENT_BUFFER, MAX_PAGE_BYTES, READ_TIMEOUT_SECS};
pub use crawler::{CrawlStats, Crawler, Document, DownloadLedger, FrontierHandle};
pub(crate) use crawler::FrontierEntry;
pub use error::FetchError;
pub use links::extract_identifiers;
pub use policy::{CrawlPolicy, DEFAULT_ALLOW_PATTERN, PatternError};
