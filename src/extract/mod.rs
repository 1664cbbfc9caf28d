//! Reference discovery in HTML documents and stylesheets.

mod css;
mod html;

pub use css::{
    CssReplacement, CssSyntaxError, RewrittenStylesheet, StylesheetRewriter, extract_css_urls,
    replace_longest_first, rewrite_stylesheet,
};
pub use html::extract_links;
