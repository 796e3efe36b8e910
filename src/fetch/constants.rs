//! Constants for the fetch module (timeouts, size limits, buffers).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default whole-request timeout for a single page (2 minutes).
pub const READ_TIMEOUT_SECS: u64 = 120;

/// Largest page body accepted before the fetch is abandoned (32 MiB).
pub const MAX_PAGE_BYTES: u64 = 32 * 1024 * 1024;

/// Capacity of the fetched-document channel between crawler and consumer.
pub const DOCUMENT_BUFFER: usize = 64;
