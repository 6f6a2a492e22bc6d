//! Output clamping.
//!
//! Captured stdout/stderr streams and event previews are byte-bounded.
//! Truncation is UTF-8-safe: the cut never lands inside a multi-byte
//! character, so the clamped string is always valid and at most `max`
//! bytes long.

/// Clamp `text` to at most `max` bytes, returning the (possibly shortened)
/// string and whether anything was cut.
#[must_use]
pub fn truncate_bytes(text: &str, max: usize) -> (String, bool) {
    if text.len() <= max {
        return (text.to_string(), false);
    }
    let mut cut = max;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    (text[..cut].to_string(), true)
}

/// Single-line preview for event payloads and logs: whitespace collapsed,
/// clamped to `max_chars` characters with a trailing ellipsis when cut.
#[must_use]
pub fn preview(text: &str, max_chars: usize) -> String {
    let compact = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= max_chars {
        return compact;
    }
    let mut out: String = compact.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_text_passes_through() {
        let (out, cut) = truncate_bytes("hello", 100);
        assert_eq!(out, "hello");
        assert!(!cut);
    }

    #[test]
    fn exact_boundary_is_not_truncated() {
        let (out, cut) = truncate_bytes("abcde", 5);
        assert_eq!(out, "abcde");
        assert!(!cut);
    }

    #[test]
    fn truncation_sets_flag() {
        let (out, cut) = truncate_bytes("abcdef", 3);
        assert_eq!(out, "abc");
        assert!(cut);
    }

    #[test]
    fn multibyte_cut_backs_up_to_char_boundary() {
        // 'é' is two bytes; a 3-byte limit would land mid-character.
        let (out, cut) = truncate_bytes("aéé", 4);
        assert_eq!(out, "aé");
        assert!(cut);
    }

    #[test]
    fn preview_collapses_whitespace() {
        assert_eq!(preview("a\n  b\tc", 20), "a b c");
    }

    #[test]
    fn preview_appends_ellipsis() {
        assert_eq!(preview("abcdefgh", 4), "abcd…");
    }

    proptest! {
        #[test]
        fn truncated_output_is_valid_and_bounded(text in ".{0,200}", max in 0usize..64) {
            let (out, cut) = truncate_bytes(&text, max);
            prop_assert!(out.len() <= max || !cut);
            prop_assert!(text.starts_with(&out));
            prop_assert_eq!(cut, out.len() < text.len());
        }

        #[test]
        fn preview_char_count_is_bounded(text in ".{0,200}", max in 1usize..64) {
            let out = preview(&text, max);
            prop_assert!(out.chars().count() <= max + 1);
        }
    }
}
