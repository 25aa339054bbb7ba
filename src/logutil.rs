//! Log hygiene helpers. Record names and document fields come from
//! operators and hand-edited files, so anything interpolated into a log
//! line is escaped to stay on one line.

/// Escape a string for single-line logging. Control characters are
/// rendered with their escape sequences and long strings are truncated
/// with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 120;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW));
    for (i, ch) in s.chars().enumerate() {
        if i >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        if ch.is_control() {
            out.extend(ch.escape_default());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::escape_log;

    #[test]
    fn control_chars_are_escaped() {
        assert_eq!(escape_log("one\ntwo\tend"), "one\\ntwo\\tend");
    }

    #[test]
    fn long_input_is_truncated() {
        let long = "x".repeat(500);
        let escaped = escape_log(&long);
        assert!(escaped.chars().count() <= 121);
        assert!(escaped.ends_with('…'));
    }
}
