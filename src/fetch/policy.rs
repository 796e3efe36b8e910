//! Inclusion/exclusion policy over identifiers.

use regex::Regex;
use thiserror::Error;

use crate::store::Identifier;

/// Default allow pattern when none is configured.
pub const DEFAULT_ALLOW_PATTERN: &str = "en.wikipedia.org/wiki";

/// A crawl pattern that does not compile.
#[derive(Debug, Error)]
#[error("invalid {name} pattern {pattern:?}: {source}")]
pub struct PatternError {
    /// Which pattern (`allow` or `block`).
    pub name: &'static str,
    /// The pattern source.
    pub pattern: String,
    /// The regex compilation error.
    #[source]
    pub source: regex::Error,
}

fn compile(name: &'static str, pattern: &str) -> Result<Regex, PatternError> {
    Regex::new(pattern).map_err(|source| PatternError {
        name,
        pattern: pattern.to_string(),
        source,
    })
}

/// Decides which discovered identifiers the crawler may dispatch.
///
/// Patterns are unanchored searches over the normalized identifier
/// (`en.wikipedia.org/wiki/UK`, never `https://...`). The block pattern takes
/// precedence over the allow pattern.
#[derive(Debug, Clone)]
pub struct CrawlPolicy {
    /// `None` allows every identifier.
    allow: Option<Regex>,
    block: Option<Regex>,
}

impl CrawlPolicy {
    /// A policy that allows every identifier.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allow: None,
            block: None,
        }
    }

    /// Compiles a policy from pattern strings.
    ///
    /// # Errors
    ///
    /// Returns a [`PatternError`] naming the first pattern that fails to
    /// compile.
    pub fn from_patterns(allow: &str, block: Option<&str>) -> Result<Self, PatternError> {
        Ok(Self {
            allow: Some(compile("allow", allow)?),
            block: block.map(|block| compile("block", block)).transpose()?,
        })
    }

    /// Whether `id` may be fetched.
    #[must_use]
    pub fn permits(&self, id: &Identifier) -> bool {
        if self.block.as_ref().is_some_and(|block| block.is_match(id.as_str())) {
            return false;
        }
        self.allow.as_ref().is_none_or(|allow| allow.is_match(id.as_str()))
    }

    /// The allow pattern source; `None` when everything is allowed.
    #[must_use]
    pub fn allow_pattern(&self) -> Option<&str> {
        self.allow.as_ref().map(Regex::as_str)
    }

    /// The block pattern source, if any.
    #[must_use]
    pub fn block_pattern(&self) -> Option<&str> {
        self.block.as_ref().map(Regex::as_str)
    }
}
