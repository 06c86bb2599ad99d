//! Text shaping for ledger columns and log messages.
//!
//! Error text from archives and XML parsers can be arbitrarily long and
//! multi-line; ledger columns are short VARCHARs. Everything user-facing
//! goes through [`shorten`] or [`clip`].

/// Collapse CR/LF to spaces, trim, and cap the result at `max_len`
/// characters with a `...` ellipsis.
#[must_use]
pub fn shorten(s: &str, max_len: usize) -> String {
    let flat: String = s.replace(['\r', '\n'], " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= max_len {
        return trimmed.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = trimmed.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Cap a string at `limit` characters without reshaping it.
#[must_use]
pub fn clip(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}

/// `Some(trimmed)` when the input has non-whitespace content, else `None`.
#[must_use]
pub fn strip_or_none(s: Option<&str>) -> Option<String> {
    let t = s?.trim();
    if t.is_empty() { None } else { Some(t.to_string()) }
}

/// Join non-empty message parts with `" | "`, the run-note separator.
#[must_use]
pub fn join_messages(parts: &[String]) -> Option<String> {
    let kept: Vec<&str> = parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorten_collapses_newlines() {
        assert_eq!(shorten("a\r\nb\nc", 100), "a  b c");
    }

    #[test]
    fn shorten_caps_with_ellipsis() {
        let s = "x".repeat(50);
        let out = shorten(&s, 10);
        assert_eq!(out.chars().count(), 10);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn shorten_keeps_short_input_verbatim() {
        assert_eq!(shorten("  ok  ", 10), "ok");
    }

    #[test]
    fn clip_is_char_based() {
        // Multibyte input must not be split mid-character.
        assert_eq!(clip("保険者番号", 3), "保険者");
    }

    #[test]
    fn strip_or_none_drops_blank() {
        assert_eq!(strip_or_none(Some("  ")), None);
        assert_eq!(strip_or_none(Some(" a ")), Some("a".to_string()));
        assert_eq!(strip_or_none(None), None);
    }

    #[test]
    fn join_messages_skips_empties() {
        let parts = vec![String::new(), "a".into(), "  ".into(), "b".into()];
        assert_eq!(join_messages(&parts), Some("a | b".to_string()));
        assert_eq!(join_messages(&[]), None);
    }
}
