//! Plain-text and snippet extraction from a document fragment.
//!
//! A pure-function module: no I/O, no CRDT dependency beyond taking an
//! already-decoded string. The richer "title/snippet" heuristics (fencing
//! off headings, stripping markup) are UI-integration concerns and stay
//! out of this engine; this module only does the mechanical part those
//! heuristics build on.

/// Take the first `max_chars` characters of `text`, respecting char
/// boundaries (never splitting a multi-byte codepoint).
pub fn take_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// First non-empty line of `text`, trimmed — a reasonable note title when
/// none is explicitly set.
pub fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

/// A short preview: the first line if one exists, else the first 100
/// characters of the whole body.
pub fn extract_preview(text: &str) -> String {
    let line = first_line(text);
    if !line.is_empty() {
        take_chars(line, 100)
    } else {
        take_chars(text.trim(), 100)
    }
}

/// Whitespace-collapsed plain-text snippet of up to `max_chars`, used for
/// search result summaries. Collapses runs of whitespace to a single space.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    take_chars(&collapsed, max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_chars_respects_char_boundaries() {
        assert_eq!(take_chars("héllo", 2), "hé");
        assert_eq!(take_chars("hi", 10), "hi");
    }

    #[test]
    fn first_line_skips_leading_blank_lines() {
        assert_eq!(first_line("\n\n  Title here\nbody"), "Title here");
        assert_eq!(first_line(""), "");
    }

    #[test]
    fn extract_preview_falls_back_to_raw_text_when_no_lines() {
        assert_eq!(extract_preview("   "), "");
    }

    #[test]
    fn snippet_collapses_whitespace() {
        assert_eq!(snippet("a   b\n\nc", 10), "a b c");
    }
}
