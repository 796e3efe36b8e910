//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use mirror_core::config::{ConfigError, DEFAULT_SEED, MirrorConfig};
use mirror_core::fetch::DEFAULT_ALLOW_PATTERN;

/// Mirror a web corpus into a directory tree, resuming from what is already
/// on disk.
///
/// Every flag can also be set through the environment variable shown in its
/// help text.
#[derive(Parser, Debug)]
#[command(name = "mirror")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Output root of the mirror (must already exist)
    #[arg(long, env = "HTML_DIR")]
    pub html_dir: Option<PathBuf>,

    /// Identifier or URL the crawl starts from
    #[arg(long, env = "START_URL", default_value = DEFAULT_SEED)]
    pub start_url: String,

    /// Maximum simultaneous fetches (zero or negative for no limit)
    #[arg(long, env = "MAX_CONCURRENT_REQUESTS", default_value_t = -1, allow_negative_numbers = true)]
    pub max_concurrent_requests: i64,

    /// Only identifiers matching this pattern are crawled
    #[arg(long, env = "ALLOWED_HREF_REGEX", default_value = DEFAULT_ALLOW_PATTERN)]
    pub allowed_href_regex: String,

    /// Identifiers matching this pattern are never crawled
    #[arg(long, env = "BLOCKED_HREF_REGEX")]
    pub blocked_href_regex: Option<String>,
}

impl Args {
    /// Log level implied by `-q`/`-v` when `RUST_LOG` is unset.
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }

    /// Validates the arguments into a run configuration.
    pub fn to_config(&self) -> Result<MirrorConfig, ConfigError> {
        let mut builder = MirrorConfig::builder()
            .seed(self.start_url.as_str())
            .max_concurrent_fetches(self.max_concurrent_requests)
            .allow_pattern(self.allowed_href_regex.as_str())
            .block_pattern(
                self.blocked_href_regex
                    .clone()
                    .filter(|pattern| !pattern.is_empty()),
            );
        if let Some(root) = &self.html_dir {
            builder = builder.output_root(root);
        }
        builder.build()
    }
}
