//! Delimited-tag extraction from free-text model output.
//!
//! Models are asked to wrap their payload in a known tag (`<blog>`, `<readme>`,
//! `<changelog>`, `<documentation_structure>`), but they do not always comply.
//! A missing tag is not an error: the raw text is the payload.

use regex::Regex;

/// Returns the text between the first `<tag>` and the nearest following `</tag>`.
///
/// Matching is case-sensitive and spans lines. When no complete pair exists the
/// input is returned unchanged, so the function is idempotent on already
/// unwrapped text.
pub fn extract_tagged<'a>(text: &'a str, tag: &str) -> &'a str {
    let escaped = regex::escape(tag);
    let pattern = format!("(?s)<{escaped}>(.*?)</{escaped}>");
    match Regex::new(&pattern) {
        Ok(re) => re
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(text),
        Err(e) => {
            tracing::warn!(tag, error = %e, "Invalid extraction tag, returning raw text");
            text
        }
    }
}
