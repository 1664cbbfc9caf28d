//! Stylesheet reference scanning and local rewriting.
//!
//! `url(...)` and `@import "..."` references are collected with a single
//! tokenizing regex, downloaded next to the rest of the bundle, and
//! swapped for paths relative to the stylesheet's own folder. Replacement
//! runs longest original first so `a.png` never clobbers part of
//! `a.png?v=2`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use futures_util::future::BoxFuture;
use regex::Regex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::download::{AssetDownloader, relative_path};
use crate::error::CaptureError;

/// Nested `@import` chains deeper than this are left as remote references.
const MAX_IMPORT_DEPTH: usize = 8;

/// A malformed reference in a stylesheet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} at byte {offset}")]
pub struct CssSyntaxError {
    /// Byte offset of the construct that could not be read.
    pub offset: usize,
    /// What was wrong.
    pub reason: String,
}

impl CssSyntaxError {
    fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }
}

/// One tokenizing pass over a stylesheet, leftmost alternative first.
///
/// Comments and string literals are matched so references inside them are
/// skipped. `[\w-]+url(` swallows look-alike functions such as `myurl(`.
/// `bad_url` and `bad_string` only match where a well-formed token could not.
#[allow(clippy::expect_used)]
static CSS_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?xis)
          /\*.*?(?:\*/|\z)
        | @import\s+(?:"(?P<import_dq>[^"\n]*)"|'(?P<import_sq>[^'\n]*)')
        | [\w-]+url\(
        | \burl\(\s*(?:"(?P<url_dq>[^"\n]*)"|'(?P<url_sq>[^'\n]*)'|(?P<url_bare>[^)"'\s]*))\s*\)
        | (?P<bad_url>\burl\()
        | "(?:[^"\\\n]|\\.)*"
        | '(?:[^'\\\n]|\\.)*'
        | (?P<bad_string>["'])
        "#,
    )
    .expect("stylesheet token regex is valid") // Static pattern, safe to panic
});

/// Capture groups holding a reference value.
const REFERENCE_GROUPS: [&str; 5] = ["import_dq", "import_sq", "url_dq", "url_sq", "url_bare"];

/// Lists the distinct references in `css`, in first-seen order.
///
/// `data:` URIs, fragment-only references (`#id`, SVG filters) and empty
/// values are skipped.
///
/// # Errors
///
/// Returns [`CssSyntaxError`] for an unterminated `url(` or string.
pub fn extract_css_urls(css: &str) -> Result<Vec<String>, CssSyntaxError> {
    let mut refs: Vec<String> = Vec::new();

    for caps in CSS_TOKEN.captures_iter(css) {
        if let Some(bad) = caps.name("bad_url") {
            let after = css[bad.end()..].trim_start();
            let reason = if after.starts_with(['"', '\'']) {
                "unterminated string"
            } else {
                "unterminated url("
            };
            return Err(CssSyntaxError::new(bad.start(), reason));
        }
        if let Some(bad) = caps.name("bad_string") {
            return Err(CssSyntaxError::new(bad.start(), "unterminated string"));
        }

        let Some(value) = REFERENCE_GROUPS
            .iter()
            .find_map(|group| caps.name(group))
            .map(|m| m.as_str().trim())
        else {
            continue;
        };
        if value.is_empty()
            || value.starts_with('#')
            || value.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:"))
            || refs.iter().any(|seen| seen == value)
        {
            continue;
        }
        refs.push(value.to_string());
    }
    Ok(refs)
}

/// One reference swapped for a local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssReplacement {
    /// Reference as written in the stylesheet.
    pub original: String,
    /// Path relative to the stylesheet's folder.
    pub local: String,
}

/// Result of rewriting one stylesheet.
#[derive(Debug, Clone, Default)]
pub struct RewrittenStylesheet {
    pub path: PathBuf,
    pub replaced: Vec<CssReplacement>,
    /// References left remote because they could not be resolved or fetched.
    pub skipped: Vec<String>,
}

/// Downloads a stylesheet's references into a bundle and rewrites it in place.
#[derive(Debug)]
pub struct StylesheetRewriter<'a> {
    downloader: &'a AssetDownloader,
    root: &'a Path,
}

impl<'a> StylesheetRewriter<'a> {
    /// Rewriter that stores fetched assets under `root`.
    #[must_use]
    pub fn new(downloader: &'a AssetDownloader, root: &'a Path) -> Self {
        Self { downloader, root }
    }

    /// Rewrites the stylesheet at `path`, fetched from `stylesheet_url`.
    ///
    /// Nested stylesheets are rewritten depth-first before the next sibling
    /// reference is fetched. A reference that fails to download stays remote.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::CssParse`] for an unreadable reference
    /// - [`CaptureError::CssPersist`] when the file cannot be read or replaced
    /// - [`CaptureError::Cancelled`] when `token` fires
    #[instrument(skip(self, token), fields(path = %path.display()))]
    pub async fn rewrite(
        &self,
        path: &Path,
        stylesheet_url: &str,
        token: &CancellationToken,
    ) -> Result<RewrittenStylesheet, CaptureError> {
        let mut fetched = HashMap::from([(stylesheet_url.to_string(), path.to_path_buf())]);
        self.rewrite_at(path, stylesheet_url, token, 0, &mut fetched)
            .await
    }

    fn rewrite_at<'b>(
        &'b self,
        path: &'b Path,
        stylesheet_url: &'b str,
        token: &'b CancellationToken,
        depth: usize,
        fetched: &'b mut HashMap<String, PathBuf>,
    ) -> BoxFuture<'b, Result<RewrittenStylesheet, CaptureError>> {
        Box::pin(async move {
            if token.is_cancelled() {
                return Err(CaptureError::Cancelled);
            }
            let css = read_stylesheet(path).await?;
            let refs = extract_css_urls(&css).map_err(|source| CaptureError::CssParse {
                path: path.to_path_buf(),
                source,
            })?;
            let base =
                Url::parse(stylesheet_url).map_err(|_| CaptureError::wrong_url(stylesheet_url))?;
            let folder = path.parent().unwrap_or(self.root);

            let mut result = RewrittenStylesheet {
                path: path.to_path_buf(),
                ..RewrittenStylesheet::default()
            };

            for original in refs {
                let Some(absolute) = resolve_reference(&base, &original) else {
                    debug!(reference = %original, "unresolvable stylesheet reference");
                    result.skipped.push(original);
                    continue;
                };

                let local = if let Some(existing) = fetched.get(absolute.as_str()) {
                    existing.clone()
                } else {
                    match self.downloader.download_asset(absolute.as_str(), self.root, token).await {
                        Ok(asset) => {
                            let local = asset.path.clone();
                            fetched.insert(absolute.to_string(), local.clone());
                            if asset.is_stylesheet() {
                                if depth < MAX_IMPORT_DEPTH {
                                    self.rewrite_at(&local, absolute.as_str(), token, depth + 1, fetched)
                                        .await?;
                                } else {
                                    warn!(url = %absolute, "import depth limit reached; nested stylesheet left as-is");
                                }
                            }
                            local
                        }
                        Err(error) if error.is_cancelled() => return Err(error),
                        Err(error) => {
                            warn!(url = %absolute, error = %error, "stylesheet asset download failed; keeping remote reference");
                            result.skipped.push(original);
                            continue;
                        }
                    }
                };

                result.replaced.push(CssReplacement {
                    original,
                    local: relative_path(folder, &local),
                });
            }

            if !result.replaced.is_empty() {
                let rewritten = replace_longest_first(&css, &result.replaced);
                persist(path, &rewritten).await?;
            }
            info!(
                replaced = result.replaced.len(),
                skipped = result.skipped.len(),
                "stylesheet rewritten"
            );
            Ok(result)
        })
    }
}

/// Convenience wrapper over [`StylesheetRewriter::rewrite`].
///
/// # Errors
///
/// Same as [`StylesheetRewriter::rewrite`].
pub async fn rewrite_stylesheet(
    path: &Path,
    stylesheet_url: &str,
    downloader: &AssetDownloader,
    root: &Path,
    token: &CancellationToken,
) -> Result<RewrittenStylesheet, CaptureError> {
    StylesheetRewriter::new(downloader, root)
        .rewrite(path, stylesheet_url, token)
        .await
}

fn resolve_reference(base: &Url, reference: &str) -> Option<Url> {
    let resolved = if reference.starts_with("//") {
        Url::parse(&format!("https:{reference}")).ok()?
    } else {
        base.join(reference).ok()?
    };
    matches!(resolved.scheme(), "http" | "https").then_some(resolved)
}

/// Replaces every original with its local path, longest original first.
///
/// Each original is first swapped for a unique placeholder so a shorter
/// original can never match inside text produced by a longer one.
#[must_use]
pub fn replace_longest_first(css: &str, replacements: &[CssReplacement]) -> String {
    let mut order: Vec<usize> = (0..replacements.len()).collect();
    order.sort_by(|&a, &b| {
        replacements[b]
            .original
            .len()
            .cmp(&replacements[a].original.len())
    });

    let mut text = css.to_string();
    for &index in &order {
        text = text.replace(&replacements[index].original, &placeholder(index));
    }
    for &index in &order {
        text = text.replace(&placeholder(index), &replacements[index].local);
    }
    text
}

fn placeholder(index: usize) -> String {
    format!("\u{0}css-ref-{index}\u{0}")
}

async fn read_stylesheet(path: &Path) -> Result<String, CaptureError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| CaptureError::CssPersist {
            path: path.to_path_buf(),
            source,
        })?;
    String::from_utf8(bytes).map_err(|e| CaptureError::CssParse {
        path: path.to_path_buf(),
        source: CssSyntaxError::new(e.utf8_error().valid_up_to(), "stylesheet is not valid UTF-8"),
    })
}

/// Writes `contents` beside `path` and renames over it.
async fn persist(path: &Path, contents: &str) -> Result<(), CaptureError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.rewrite"));
    let persist_error = |source| CaptureError::CssPersist {
        path: path.to_path_buf(),
        source,
    };

    tokio::fs::write(&temp, contents).await.map_err(persist_error)?;
    if let Err(source) = tokio::fs::rename(&temp, path).await {
        if let Err(error) = tokio::fs::remove_file(&temp).await {
            warn!(path = %temp.display(), error = %error, "failed to remove rewrite temp file");
        }
        return Err(persist_error(source));
    }
    Ok(())
}
