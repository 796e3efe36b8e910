//! Outbound link extraction from HTML pages.

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::store::Identifier;

/// Extracts the identifiers of every `<a href>` in `html`.
///
/// Relative links are resolved against `base`, fragments are dropped and
/// anything that is not `http`/`https` (mailto, javascript, ...) is skipped.
/// Duplicates are removed while keeping first-seen order.
#[must_use]
pub fn extract_identifiers(html: &[u8], base: &Url) -> Vec<Identifier> {
    let mut found = Vec::new();
    if html.is_empty() {
        return found;
    }

    let text = String::from_utf8_lossy(html);
    let document = Html::parse_document(&text);
    let Ok(selector) = Selector::parse("a[href]") else {
        return found;
    };

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let url = match base.join(href.trim()) {
            Ok(url) => url,
            Err(e) => {
                debug!(href, base = %base, error = %e, "skipping unparseable link");
                continue;
            }
        };
        match Identifier::from_url(&url) {
            Ok(id) => {
                if !found.contains(&id) {
                    found.push(id);
                }
            }
            Err(e) => debug!(url = %url, error = %e, "skipping link"),
        }
    }

    debug!(count = found.len(), base = %base, "extracted links");
    found
}
