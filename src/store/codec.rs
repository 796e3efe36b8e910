//! Identifier normalization and the identifier <-> stored path codec.
//!
//! An [`Identifier`] is the scheme-less, trailing-slash-free form of a
//! resource URL. The codec maps it one-to-one onto a relative path:
//! identifier segments become directories and the last segment gets the
//! fixed [`FILE_SUFFIX`].
//!
//! ```
//! use std::path::Path;
//! use mirror_core::store::{Identifier, decode, encode};
//!
//! let id = Identifier::parse("https://example.com/a/").unwrap();
//! assert_eq!(id.as_str(), "example.com/a");
//!
//! let relative = encode(&id);
//! assert_eq!(relative, Path::new("example.com/a.html"));
//!
//! let root = Path::new("/srv/mirror");
//! assert_eq!(decode(&root.join(&relative), root).unwrap(), id);
//! ```

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use url::Url;

/// Suffix appended to the last identifier segment to form the file name.
pub const FILE_SUFFIX: &str = ".html";

/// Errors produced while normalizing, encoding or decoding identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The identifier is empty or contains segments that cannot be stored.
    #[error("invalid identifier {raw:?}: {reason}")]
    InvalidIdentifier {
        /// The rejected input.
        raw: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The path handed to [`decode`] does not live under the given root.
    #[error("path {path} is not under {root}")]
    OutsideRoot {
        /// Path being decoded.
        path: PathBuf,
        /// Root it was expected under.
        root: PathBuf,
    },

    /// The path is under the root but was not produced by [`encode`].
    #[error("path {path} does not encode an identifier")]
    NotEncoded {
        /// Path being decoded.
        path: PathBuf,
    },
}

impl CodecError {
    fn invalid(raw: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidIdentifier {
            raw: raw.into(),
            reason,
        }
    }

    fn not_encoded(path: &Path) -> Self {
        Self::NotEncoded {
            path: path.to_path_buf(),
        }
    }
}

/// URL scheme used to turn an identifier back into a fetchable URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    /// Plain `http://`.
    Http,
    /// `https://`, used whenever the seed does not name a scheme.
    #[default]
    Https,
}

impl Scheme {
    /// The prefix including the `://` separator.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Http => "http://",
            Self::Https => "https://",
        }
    }

    /// Returns the scheme a raw identifier starts with, if any.
    #[must_use]
    pub fn detect(raw: &str) -> Option<Self> {
        split_scheme(raw.trim()).0
    }
}

/// Normalized resource identifier, e.g. `en.wikipedia.org/wiki/UK`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Normalizes and validates a raw identifier or URL.
    ///
    /// A leading `http://`/`https://` and one trailing `/` are stripped.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidIdentifier`] if the normalized value is
    /// empty or contains `.`/`..`/empty segments.
    pub fn parse(raw: &str) -> Result<Self, CodecError> {
        let (_, rest) = split_scheme(raw.trim());
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        validate(rest).map_err(|reason| CodecError::invalid(raw, reason))?;
        Ok(Self(rest.to_string()))
    }

    /// Converts an absolute URL discovered in a page, dropping its fragment.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidIdentifier`] for non-HTTP schemes or URLs
    /// whose normalized form is not a valid identifier.
    pub fn from_url(url: &Url) -> Result<Self, CodecError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CodecError::invalid(url.as_str(), "unsupported scheme"));
        }
        let mut url = url.clone();
        url.set_fragment(None);
        Self::parse(url.as_str())
    }

    /// Re-attaches `scheme` and parses the result as a URL.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidIdentifier`] if the identifier does not
    /// form a valid URL (for example an empty host).
    pub fn to_url(&self, scheme: Scheme) -> Result<Url, CodecError> {
        Url::parse(&format!("{}{}", scheme.prefix(), self.0))
            .map_err(|_| CodecError::invalid(self.0.clone(), "not a valid URL"))
    }

    /// The normalized identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identifier {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Returns the normalized text of `raw`.
///
/// # Errors
///
/// Same as [`Identifier::parse`].
pub fn normalize(raw: &str) -> Result<String, CodecError> {
    Identifier::parse(raw).map(|id| id.0)
}

/// Encodes an identifier as a path relative to the store root.
#[must_use]
pub fn encode(id: &Identifier) -> PathBuf {
    let mut path = PathBuf::new();
    // Only the empty segment after an embedded scheme survives validation.
    let mut segments = id.as_str().split('/').filter(|s| !s.is_empty()).peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_some() {
            path.push(segment);
        } else {
            path.push(format!("{segment}{FILE_SUFFIX}"));
        }
    }
    path
}

/// Decodes a stored path under `root` back into its identifier.
///
/// # Errors
///
/// - [`CodecError::OutsideRoot`] if `path` is not under `root`
/// - [`CodecError::NotEncoded`] for non-UTF-8 paths or files without the suffix
/// - [`CodecError::InvalidIdentifier`] if the recovered text does not validate
pub fn decode(path: &Path, root: &Path) -> Result<Identifier, CodecError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| CodecError::OutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;

    let mut segments = Vec::new();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return Err(CodecError::not_encoded(path));
        };
        segments.push(part.to_str().ok_or_else(|| CodecError::not_encoded(path))?);
    }

    let last = segments.pop().ok_or_else(|| CodecError::not_encoded(path))?;
    let stem = last
        .strip_suffix(FILE_SUFFIX)
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| CodecError::not_encoded(path))?;
    segments.push(stem);

    let mut joined = String::new();
    for (index, segment) in segments.iter().enumerate() {
        if index > 0 {
            joined.push('/');
        }
        joined.push_str(segment);
        if index + 1 < segments.len() && is_embedded_scheme(segment) {
            joined.push('/');
        }
    }
    Identifier::parse(&joined)
}

fn split_scheme(raw: &str) -> (Option<Scheme>, &str) {
    for scheme in [Scheme::Https, Scheme::Http] {
        let prefix = scheme.prefix();
        if let Some(head) = raw.get(..prefix.len())
            && head.eq_ignore_ascii_case(prefix)
        {
            return (Some(scheme), &raw[prefix.len()..]);
        }
    }
    (None, raw)
}

fn is_embedded_scheme(segment: &str) -> bool {
    segment.eq_ignore_ascii_case("http:") || segment.eq_ignore_ascii_case("https:")
}

fn validate(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err("empty identifier");
    }
    if value.contains(['\\', '\0']) {
        return Err("contains a backslash or NUL byte");
    }

    // Segment after an embedded `https:` must be empty, and the one after
    // that must name a host.
    #[derive(PartialEq)]
    enum Expect {
        Any,
        SchemeGap,
        Host,
    }

    let mut expect = Expect::Any;
    for (index, segment) in value.split('/').enumerate() {
        match expect {
            Expect::SchemeGap => {
                if !segment.is_empty() {
                    return Err("embedded scheme must be followed by //");
                }
                expect = Expect::Host;
                continue;
            }
            Expect::Host if segment.is_empty() => return Err("embedded scheme without host"),
            _ => {}
        }
        expect = Expect::Any;
        match segment {
            "" => return Err("empty path segment"),
            "." | ".." => return Err("relative path segment"),
            s if is_embedded_scheme(s) => {
                if index == 0 {
                    return Err("nested scheme prefix");
                }
                expect = Expect::SchemeGap;
            }
            _ => {}
        }
    }
    if expect == Expect::Any {
        Ok(())
    } else {
        Err("embedded scheme without host")
    }
}
