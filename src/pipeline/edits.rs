use tracing::debug;

use crate::entry::Part;
use crate::rewrite::HtmlRewriter;

/// A markup change produced by one processed link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MarkupEdit {
    /// Point every `attribute` carrying `original` at `local`.
    Attribute {
        attribute: String,
        original: String,
        local: String,
    },
    /// Swap the `tag` element referencing `original` for `markup`.
    Element {
        tag: String,
        original: String,
        markup: String,
    },
}

/// Applies `edits` to the part's HTML body. Pointer parts have no markup.
pub(crate) fn apply_edits(part: &mut Part, edits: Vec<MarkupEdit>) {
    let Some(html) = part.html_body() else {
        return;
    };
    let mut rewriter = HtmlRewriter::new(html);
    for edit in edits {
        match edit {
            MarkupEdit::Attribute {
                attribute,
                original,
                local,
            } => {
                let replaced = rewriter.replace_attribute(&attribute, &original, &local);
                if replaced == 0 {
                    debug!(attribute, original, "no attribute occurrence to rewrite");
                }
            }
            MarkupEdit::Element {
                tag,
                original,
                markup,
            } => {
                if !rewriter.replace_element(&tag, &original, &markup) {
                    debug!(tag, original, "no element to replace");
                }
            }
        }
    }
    part.set_html_body(rewriter.into_html());
}
