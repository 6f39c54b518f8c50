//! Character-bounded truncation for text that leaves the gateway.
//!
//! Tool descriptions, error messages and logged argument previews are all
//! capped before they reach an LLM prompt or a log sink. Limits count Unicode
//! scalar values, never bytes, so truncation cannot split a character.

use std::borrow::Cow;

/// Marker appended to truncated text. It counts towards the limit.
pub const ELLIPSIS: char = '…';

/// Truncates `text` to at most `limit` characters.
///
/// Text within the limit is returned borrowed and unchanged. Longer text is
/// cut to `limit - 1` characters followed by [`ELLIPSIS`], so the result is
/// exactly `limit` characters long.
///
/// # Examples
///
/// ```
/// use mcp_tool_gateway::truncate::truncate_chars;
///
/// assert_eq!(truncate_chars("short", 10), "short");
/// assert_eq!(truncate_chars("abcdefgh", 4), "abc…");
/// ```
#[must_use]
pub fn truncate_chars(text: &str, limit: usize) -> Cow<'_, str> {
    if limit == 0 {
        return Cow::Borrowed("");
    }

    let Some((cut, _)) = text.char_indices().nth(limit) else {
        return Cow::Borrowed(text);
    };

    // `cut` is the byte offset of the first character past the limit; keep
    // one character less to make room for the marker.
    let keep = text
        .char_indices()
        .nth(limit - 1)
        .map_or(cut, |(offset, _)| offset);
    let mut truncated = text.get(..keep).unwrap_or_default().to_owned();
    truncated.push(ELLIPSIS);
    Cow::Owned(truncated)
}

/// Renders a JSON value compactly and truncates it for logging.
#[must_use]
pub fn preview_json(value: &serde_json::Value, limit: usize) -> String {
    let rendered = value.to_string();
    truncate_chars(&rendered, limit).into_owned()
}
