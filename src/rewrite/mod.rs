//! Text-level HTML rewriting for captured bundles.
//!
//! The parsed DOM is only used to discover links; rewriting works on the
//! original text so everything the capture does not touch stays byte-for-byte
//! as the host served it.

use std::borrow::Cow;
use std::fmt::Write as _;

use regex::{Captures, Regex};
use tracing::{debug, trace};

use crate::video::{SubtitleTrack, VideoAsset};

/// HTML text being pointed at local files.
#[derive(Debug, Clone)]
pub struct HtmlRewriter {
    html: String,
}

impl HtmlRewriter {
    #[must_use]
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    #[must_use]
    pub fn html(&self) -> &str {
        &self.html
    }

    #[must_use]
    pub fn into_html(self) -> String {
        self.html
    }

    /// Swaps `attribute="original"` for `attribute="local"` everywhere.
    ///
    /// Double-quoted, single-quoted and unquoted values are matched, in both
    /// raw and `&amp;`-escaped form. Returns the number of replacements.
    pub fn replace_attribute(&mut self, attribute: &str, original: &str, local: &str) -> usize {
        let Some(pattern) = attribute_pattern(attribute, original) else {
            return 0;
        };
        let mut count = 0;
        let replaced = pattern.replace_all(&self.html, |caps: &Captures<'_>| {
            count += 1;
            let trailing = caps.name("trail").map_or("", |m| m.as_str());
            format!("{}\"{}\"{trailing}", &caps["prefix"], escape_attr(local))
        });
        if let Cow::Owned(rewritten) = replaced {
            self.html = rewritten;
        }
        trace!(attribute, original, local, count, "attribute rewritten");
        count
    }

    /// Replaces the first `<tag ...>...</tag>` whose opening tag mentions
    /// `original` with `markup`. Returns whether an element was found.
    pub fn replace_element(&mut self, tag: &str, original: &str, markup: &str) -> bool {
        let Some((start, end)) = find_element(&self.html, tag, original) else {
            debug!(tag, original, "element not found for replacement");
            return false;
        };
        self.html.replace_range(start..end, markup);
        true
    }
}

/// The forms a URL can take inside an attribute value.
fn value_forms(original: &str) -> Vec<String> {
    let mut forms = vec![original.to_string()];
    let escaped = original.replace('&', "&amp;");
    if escaped != original {
        forms.push(escaped);
    }
    let json = original.replace('/', "\\/");
    if json != original {
        forms.push(json);
    }
    forms
}

fn attribute_pattern(attribute: &str, original: &str) -> Option<Regex> {
    if original.is_empty() {
        return None;
    }
    let value = value_forms(original)
        .iter()
        .take(2)
        .map(|form| regex::escape(form))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(
        r#"(?i)(?P<prefix>\b{attr}\s*=\s*)(?:"\s*(?:{value})\s*"|'\s*(?:{value})\s*'|(?:{value})(?P<trail>[\s/>]|$))"#,
        attr = regex::escape(attribute),
    );
    Regex::new(&pattern).ok()
}

/// Byte range of the element to replace.
fn find_element(html: &str, tag: &str, original: &str) -> Option<(usize, usize)> {
    let open = Regex::new(&format!(r"(?is)<{}\b[^>]*>", regex::escape(tag))).ok()?;
    let close = Regex::new(&format!(r"(?is)</{}\s*>", regex::escape(tag))).ok()?;
    let forms = value_forms(original);

    let opening = open
        .find_iter(html)
        .find(|m| forms.iter().any(|form| m.as_str().contains(form.as_str())))?;
    let end = close
        .find(&html[opening.end()..])
        .map_or(opening.end(), |m| opening.end() + m.end());
    Some((opening.start(), end))
}

/// Escapes a value for a double-quoted attribute.
#[must_use]
pub fn escape_attr(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '"', '<', '>']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// A subtitle track paired with its local path.
#[derive(Debug, Clone)]
pub struct LocalTrack<'a> {
    pub track: &'a SubtitleTrack,
    pub local: String,
}

/// Native player markup for a resolved asset.
///
/// Video gets `<video controls>` with poster, source and track children.
/// Audio gets a styled player shell around `<audio controls>`.
#[must_use]
pub fn media_markup(
    asset: &VideoAsset,
    local_media: &str,
    local_poster: Option<&str>,
    tracks: &[LocalTrack<'_>],
) -> String {
    let mime = if asset.is_audio {
        if local_media.to_ascii_lowercase().ends_with(".wav") {
            "audio/wav"
        } else {
            "audio/mpeg"
        }
    } else {
        "video/mp4"
    };
    let title = asset.display_name.as_deref().unwrap_or_default();

    let mut markup = String::new();
    if asset.is_audio {
        let color = asset
            .color_hint
            .as_deref()
            .map(|hint| hint.trim_start_matches('#'))
            .filter(|hint| hint.chars().all(|c| c.is_ascii_hexdigit()) && !hint.is_empty())
            .unwrap_or("2d3b45");
        let _ = write!(
            markup,
            r#"<div class="offline-audio-player" style="border-left: 4px solid #{color};">"#
        );
        if !title.is_empty() {
            let _ = write!(
                markup,
                r#"<p class="offline-audio-title">{}</p>"#,
                escape_attr(title)
            );
        }
        let _ = write!(
            markup,
            r#"<audio controls preload="none"><source src="{}" type="{mime}"></audio></div>"#,
            escape_attr(local_media)
        );
        return markup;
    }

    markup.push_str("<video controls playsinline");
    if let Some(poster) = local_poster {
        let _ = write!(markup, r#" poster="{}""#, escape_attr(poster));
    }
    if !title.is_empty() {
        let _ = write!(markup, r#" title="{}""#, escape_attr(title));
    }
    let _ = write!(
        markup,
        r#" style="width: 100%;"><source src="{}" type="{mime}">"#,
        escape_attr(local_media)
    );
    for (index, local) in tracks.iter().enumerate() {
        let _ = write!(markup, r#"<track kind="{}" src="{}""#, escape_attr(&local.track.kind), escape_attr(&local.local));
        if let Some(language) = &local.track.language {
            let _ = write!(markup, r#" srclang="{}""#, escape_attr(language));
        }
        if let Some(label) = &local.track.label {
            let _ = write!(markup, r#" label="{}""#, escape_attr(label));
        }
        if index == 0 {
            markup.push_str(" default");
        }
        markup.push('>');
    }
    markup.push_str("</video>");
    markup
}
