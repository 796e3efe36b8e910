//! HTTP client wrapper for fetching pages.
//!
//! This module provides the `PageClient` struct which fetches page bodies
//! with timeouts, a size cap and status handling.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, MAX_PAGE_BYTES, READ_TIMEOUT_SECS};
use super::error::FetchError;
use crate::user_agent;

/// A successfully fetched page body.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub url: Url,
    /// The `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// The complete body.
    pub body: Bytes,
}

impl FetchedPage {
    /// Whether links should be extracted from this page.
    ///
    /// Responses without a content type are treated as HTML.
    #[must_use]
    pub fn is_html(&self) -> bool {
        self.content_type.as_deref().is_none_or(|value| {
            let mime = value.split(';').next().unwrap_or("").trim();
            mime.eq_ignore_ascii_case("text/html")
                || mime.eq_ignore_ascii_case("application/xhtml+xml")
        })
    }
}

/// HTTP client for fetching pages.
///
/// Created once per run and cloned into fetch tasks; clones share the
/// connection pool.
///
/// # Example
///
/// ```no_run
/// use mirror_core::fetch::PageClient;
/// use url::Url;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = PageClient::new()?;
/// let page = client.fetch(&Url::parse("https://example.com/")?).await?;
/// println!("{} bytes", page.body.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PageClient {
    client: Client,
    max_page_bytes: u64,
}

impl PageClient {
    /// Creates a client with the default timeouts and page size limit.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot be
    /// initialised.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the client cannot be built.
    #[instrument(level = "debug")]
    pub fn new_with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = base_client_builder(connect_timeout_secs, read_timeout_secs).build()?;
        Ok(Self {
            client,
            max_page_bytes: MAX_PAGE_BYTES,
        })
    }

    /// Overrides the page size limit.
    #[must_use]
    pub fn with_max_page_bytes(mut self, max_page_bytes: u64) -> Self {
        self.max_page_bytes = max_page_bytes;
        self
    }

    /// Fetches `url` and returns its body.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` if:
    /// - The request fails (network error, timeout)
    /// - The server returns an error status (4xx, 5xx)
    /// - The body is larger than the page size limit
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::network(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(url.as_str(), status.as_u16()));
        }

        if let Some(length) = response.content_length()
            && length > self.max_page_bytes
        {
            return Err(FetchError::too_large(url.as_str(), self.max_page_bytes));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::network(url.as_str(), e))?;
            if (body.len() + chunk.len()) as u64 > self.max_page_bytes {
                return Err(FetchError::too_large(url.as_str(), self.max_page_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(bytes = body.len(), final_url = %final_url, "page fetched");
        Ok(FetchedPage {
            url: final_url,
            content_type,
            body: body.freeze(),
        })
    }
}

fn base_client_builder(connect_timeout_secs: u64, read_timeout_secs: u64) -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(read_timeout_secs))
        .gzip(true)
        .user_agent(user_agent::default_user_agent())
}
