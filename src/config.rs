//! Immutable run configuration.
//!
//! A [`MirrorConfig`] is validated once at startup and then shared by every
//! component of the run. Raw values usually come from CLI flags or their
//! environment fallbacks and are assembled with [`MirrorConfigBuilder`].

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::fetch::{CrawlPolicy, DEFAULT_ALLOW_PATTERN, PatternError};
use crate::store::{CodecError, Identifier, Scheme};

/// Seed used when none is configured.
pub const DEFAULT_SEED: &str = "en.wikipedia.org/wiki/United_Kingdom";

/// Errors detected while validating configuration. All are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No output root was given.
    #[error("output root is required (set HTML_DIR or pass --html-dir)")]
    MissingOutputRoot,

    /// An allow or block pattern does not compile.
    #[error(transparent)]
    InvalidPattern(#[from] PatternError),

    /// The seed is not a valid identifier.
    #[error("invalid seed identifier: {0}")]
    InvalidSeed(#[from] CodecError),
}

/// Validated settings for one mirror run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    output_root: PathBuf,
    seed: Identifier,
    scheme: Scheme,
    max_concurrent_fetches: usize,
    policy: CrawlPolicy,
}

impl MirrorConfig {
    /// Starts building a configuration.
    #[must_use]
    pub fn builder() -> MirrorConfigBuilder {
        MirrorConfigBuilder::default()
    }

    /// Base directory of the mirror.
    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Identifier the crawl starts from.
    #[must_use]
    pub fn seed(&self) -> &Identifier {
        &self.seed
    }

    /// Scheme used to fetch identifiers (taken from the seed, else https).
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Fetch concurrency limit; 0 means unbounded.
    #[must_use]
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_concurrent_fetches
    }

    /// The compiled crawl policy.
    #[must_use]
    pub fn policy(&self) -> &CrawlPolicy {
        &self.policy
    }
}

/// Collects raw settings and validates them into a [`MirrorConfig`].
#[derive(Debug, Clone, Default)]
pub struct MirrorConfigBuilder {
    output_root: Option<PathBuf>,
    seed: Option<String>,
    max_concurrent_fetches: i64,
    allow_pattern: Option<String>,
    block_pattern: Option<String>,
}

impl MirrorConfigBuilder {
    /// Sets the output root (required).
    #[must_use]
    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(root.into());
        self
    }

    /// Sets the seed identifier or URL.
    #[must_use]
    pub fn seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    /// Sets the fetch limit; zero or negative means unbounded.
    #[must_use]
    pub fn max_concurrent_fetches(mut self, limit: i64) -> Self {
        self.max_concurrent_fetches = limit;
        self
    }

    /// Sets the allow pattern.
    #[must_use]
    pub fn allow_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.allow_pattern = Some(pattern.into());
        self
    }

    /// Sets the block pattern.
    #[must_use]
    pub fn block_pattern(mut self, pattern: Option<String>) -> Self {
        self.block_pattern = pattern;
        self
    }

    /// Validates the collected settings.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingOutputRoot`] if no output root was set
    /// - [`ConfigError::InvalidSeed`] if the seed does not normalize
    /// - [`ConfigError::InvalidPattern`] if a pattern does not compile
    pub fn build(self) -> Result<MirrorConfig, ConfigError> {
        let output_root = self
            .output_root
            .filter(|root| !root.as_os_str().is_empty())
            .ok_or(ConfigError::MissingOutputRoot)?;

        let raw_seed = self.seed.as_deref().unwrap_or(DEFAULT_SEED);
        let seed = Identifier::parse(raw_seed)?;
        let scheme = Scheme::detect(raw_seed).unwrap_or_default();

        let allow = self.allow_pattern.as_deref().unwrap_or(DEFAULT_ALLOW_PATTERN);
        let policy = CrawlPolicy::from_patterns(allow, self.block_pattern.as_deref())?;

        Ok(MirrorConfig {
            output_root,
            seed,
            scheme,
            max_concurrent_fetches: usize::try_from(self.max_concurrent_fetches).unwrap_or(0),
            policy,
        })
    }
}
