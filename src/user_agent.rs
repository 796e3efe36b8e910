//! User-Agent string sent with every page request.

/// Default User-Agent for page requests (identifies the tool).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("mirror/{version} (corpus-mirror)")
}
