//! Small text helpers for diagnostics.

/// Last `max_chars` characters of `text`, with newlines escaped so the
/// result fits on one log line or in one store field.
pub fn escaped_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    let tail: String = text.chars().skip(count.saturating_sub(max_chars)).collect();
    tail.replace('\n', "\\n")
}
