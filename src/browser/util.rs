//! URL helpers and the page sufficiency heuristic.

use anyhow::{bail, Context, Result};
use url::Url;

/// Parse a caller-supplied URL, accepting only http(s).
pub fn parse_target_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid URL '{}'", raw))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        bail!("Unsupported URL scheme '{}'", url.scheme());
    }
    Ok(url)
}

/// Split a URL into the server-side part and its client-side route, if any.
///
/// The returned fragment keeps its leading `#`. An empty fragment counts as none.
pub fn split_fragment(url: &Url) -> (Url, Option<String>) {
    let mut base = url.clone();
    base.set_fragment(None);
    let hash = url
        .fragment()
        .filter(|f| !f.is_empty())
        .map(|f| format!("#{}", f));
    (base, hash)
}

/// `scheme://host[:port]/` of the URL.
pub fn root_origin(url: &Url) -> String {
    format!("{}/", url.origin().ascii_serialization())
}

/// Whether rendered page text looks like it holds real content.
pub fn is_content_sufficient(text: &str, min_chars: usize, no_content_phrases: &[String]) -> bool {
    let text = text.to_lowercase();
    if text.chars().count() < min_chars {
        return false;
    }
    !no_content_phrases
        .iter()
        .filter(|p| !p.is_empty())
        .any(|p| text.contains(&p.to_lowercase()))
}
