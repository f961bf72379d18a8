//! Last-resort structural repair for truncated or sloppy JSON.

use serde_json::Value;

/// A fallback that tries to turn almost-JSON into a JSON value.
///
/// Installed optionally on an [`Extractor`](crate::Extractor); only consulted
/// after the strict and control-character-escaped parses both failed.
pub trait StructuralRepair: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Repaired value, or `None` if the text is beyond repair.
    fn repair(&self, text: &str) -> Option<Value>;
}

/// Bracket-balancing repair.
///
/// Handles the common ways a response gets cut off or padded: trailing
/// commas, an unterminated string, a dangling `:` and missing closing
/// brackets. Mismatched closers close the inner brackets first; closers
/// with no opener are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancingRepair;

impl StructuralRepair for BalancingRepair {
    fn name(&self) -> &'static str {
        "balancing"
    }

    fn repair(&self, text: &str) -> Option<Value> {
        let balanced = balance(text);
        serde_json::Deserializer::from_str(&balanced)
            .into_iter::<Value>()
            .next()?
            .ok()
    }
}

fn balance(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '{' => {
                stack.push('}');
                out.push(ch);
            }
            '[' => {
                stack.push(']');
                out.push(ch);
            }
            '}' | ']' => {
                if !stack.contains(&ch) {
                    continue;
                }
                while let Some(closer) = stack.pop() {
                    drop_trailing_comma(&mut out);
                    out.push(closer);
                    if closer == ch {
                        break;
                    }
                }
            }
            _ => out.push(ch),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    drop_trailing_comma(&mut out);
    if out.ends_with(':') {
        out.push_str("null");
    }
    while let Some(closer) = stack.pop() {
        drop_trailing_comma(&mut out);
        out.push(closer);
    }

    out
}

fn drop_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    if out.ends_with(',') {
        out.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repair(text: &str) -> Option<Value> {
        BalancingRepair.repair(text)
    }

    #[test]
    fn trailing_commas_are_dropped() {
        assert_eq!(repair(r#"{"a": [1, 2,], "b": 3,}"#), Some(json!({"a": [1, 2], "b": 3})));
    }

    #[test]
    fn missing_closers_are_appended() {
        assert_eq!(
            repair(r#"{"a": {"b": [1, {"c": 2"#),
            Some(json!({"a": {"b": [1, {"c": 2}]}}))
        );
    }

    #[test]
    fn unterminated_string_is_closed() {
        assert_eq!(repair(r#"{"a": "cut off"#), Some(json!({"a": "cut off"})));
        assert_eq!(repair(r#"{"a": "cut \"#), Some(json!({"a": "cut "})));
    }

    #[test]
    fn dangling_colon_becomes_null() {
        assert_eq!(repair(r#"{"a": 1, "b":"#), Some(json!({"a": 1, "b": null})));
    }

    #[test]
    fn mismatched_closer_closes_inner_first() {
        assert_eq!(repair(r#"{"a": [1, 2}"#), Some(json!({"a": [1, 2]})));
    }

    #[test]
    fn brackets_inside_strings_are_ignored() {
        assert_eq!(repair(r#"{"a": "[{"#), Some(json!({"a": "[{"})));
    }

    #[test]
    fn hopeless_input_is_rejected() {
        assert_eq!(repair("not json"), None);
        assert_eq!(repair(r#"{"a" 1"#), None);
    }
}
