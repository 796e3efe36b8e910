//! Mirror Core Library
//!
//! Resumable web-corpus mirroring: pages are fetched from a seed, their
//! links followed within a crawl policy, and every page stored as a file
//! whose path encodes its identifier. A later run walks the same tree,
//! treats every complete file as already downloaded, and re-queues the ones
//! an interrupted run left behind.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`store`] - identifier codec and the on-disk page store
//! - [`rehydrate`] - concurrent walk of an existing output tree
//! - [`fetch`] - HTTP client, link extraction, crawl policy and crawler
//! - [`orchestrator`] - joins rehydration and crawling into one run
//! - [`config`] - validated run configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod fetch;
pub mod orchestrator;
pub mod rehydrate;
pub mod store;
mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, MirrorConfig};
pub use fetch::{CrawlPolicy, CrawlStats, Crawler, Document, DownloadLedger, PageClient};
pub use orchestrator::{MirrorError, Orchestrator, RunSummary};
pub use rehydrate::{RehydrateError, Rehydrator};
pub use store::{FileStore, Identifier, Scheme, StoreError};
