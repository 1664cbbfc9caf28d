//! HTML link extraction.

use scraper::{Html, Selector};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};
use url::Url;

use crate::entry::Link;
use crate::error::CaptureError;

/// Tags scanned, in output order.
const TAGS: [&str; 9] = [
    "img", "link", "script", "video", "audio", "iframe", "source", "track", "a",
];

/// Attributes inspected on every tag.
const ATTRIBUTES: [&str; 3] = ["src", "href", "poster"];

/// Extensions an anchor must end with to be captured.
const ANCHOR_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "rtf", "txt", "csv",
    "zip", "rar", "7z", "tar", "gz", "jpg", "jpeg", "png", "gif", "svg", "webp", "mp3", "wav",
    "m4a", "ogg", "mp4", "mov", "m4v", "webm", "avi",
];

#[derive(Debug, Deserialize)]
struct PlayerSetup {
    #[serde(default)]
    sources: Vec<PlayerSource>,
}

#[derive(Debug, Deserialize)]
struct PlayerSource {
    src: Option<String>,
}

/// Lists every embeddable reference in `html`, resolved against `base_url`.
///
/// Output is in tag-then-attribute scan order with no deduplication.
///
/// # Errors
///
/// - [`CaptureError::MarkupParse`] when the document is empty
/// - [`CaptureError::Cancelled`] when `token` fires before the scan completes
#[instrument(skip(html, token), fields(html_len = html.len()))]
pub fn extract_links(
    html: &str,
    base_url: Option<&str>,
    token: &CancellationToken,
) -> Result<Vec<Link>, CaptureError> {
    if token.is_cancelled() {
        return Err(CaptureError::Cancelled);
    }
    if html.trim().is_empty() {
        return Err(CaptureError::markup_parse("document is empty"));
    }
    let base = match base_url {
        Some(raw) => Some(Url::parse(raw).map_err(|_| CaptureError::wrong_url(raw))?),
        None => None,
    };

    let document = Html::parse_document(html);
    let mut links = Vec::new();

    for tag in TAGS {
        if token.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        for attribute in ATTRIBUTES {
            let selector = selector(&format!("{tag}[{attribute}]"))?;
            for element in document.select(&selector) {
                let Some(value) = element.value().attr(attribute) else {
                    continue;
                };
                if tag == "link" && !is_captured_link_rel(element.value().attr("rel")) {
                    continue;
                }
                if let Some(link) = accept(tag, attribute, value, base.as_ref()) {
                    trace!(url = %link.absolute_url, tag, attribute, "link discovered");
                    links.push(link);
                }
            }
        }
        if tag == "video" {
            links.extend(player_setup_links(&document, base.as_ref())?);
        }
    }

    debug!(count = links.len(), "links extracted");
    Ok(links)
}

fn selector(source: &str) -> Result<Selector, CaptureError> {
    Selector::parse(source).map_err(|e| CaptureError::markup_parse(format!("{source}: {e:?}")))
}

fn is_captured_link_rel(rel: Option<&str>) -> bool {
    rel.is_some_and(|rel| {
        rel.split_ascii_whitespace()
            .any(|token| token.eq_ignore_ascii_case("stylesheet") || token.eq_ignore_ascii_case("icon"))
    })
}

fn accept(tag: &str, attribute: &str, value: &str, base: Option<&Url>) -> Option<Link> {
    let value = value.trim();
    if value.is_empty() || value.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:")) {
        return None;
    }
    let resolved = resolve(value, base)?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    if tag == "a" && !has_anchor_extension(&resolved) {
        trace!(url = %resolved, "anchor skipped; not a document link");
        return None;
    }
    Some(Link::new(value, resolved.as_str(), tag, attribute))
}

/// Absolute as-is, `//host` gets `https:`, anything else joins the base.
fn resolve(value: &str, base: Option<&Url>) -> Option<Url> {
    if value.starts_with("//") {
        return Url::parse(&format!("https:{value}")).ok();
    }
    match Url::parse(value) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let Some(base) = base else {
                debug!(value, "relative reference without base URL; skipped");
                return None;
            };
            base.join(value).ok()
        }
        Err(_) => None,
    }
}

fn has_anchor_extension(url: &Url) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.rsplit_once('.'))
        .is_some_and(|(_, ext)| {
            ANCHOR_EXTENSIONS
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
}

fn player_setup_links(document: &Html, base: Option<&Url>) -> Result<Vec<Link>, CaptureError> {
    let selector = selector("video[data-setup]")?;
    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(raw) = element.value().attr("data-setup") else {
            continue;
        };
        let setup: PlayerSetup = match serde_json::from_str(raw) {
            Ok(setup) => setup,
            Err(error) => {
                debug!(error = %error, "unreadable data-setup on video tag");
                continue;
            }
        };
        let Some(src) = setup.sources.into_iter().find_map(|source| source.src) else {
            continue;
        };
        if let Some(link) = accept("video", "data-setup", &src, base) {
            links.push(link);
        }
    }
    Ok(links)
}
