//! Recovery of a JSON object from free-form model output.
//!
//! Vision models are asked for strict JSON but routinely wrap it in code
//! fences, follow it with commentary, or emit LaTeX with single backslashes
//! (`"\beta"`). The last one is the nasty case: `\b`, `\f`, `\n`, `\t` are
//! *valid* JSON escapes, so a naive parse succeeds and silently turns
//! `\beta` into a backspace followed by `eta`.
//!
//! [`extract_json_object`] tries, in order:
//!
//! 1. strip `<think>` blocks and an outer code fence;
//! 2. parse the whole text (an object, or an array whose first element is an
//!    object);
//! 3. from the first `{`, decode the first complete JSON value and ignore
//!    whatever follows, on the backslash-fixed text first and then the raw
//!    text;
//! 4. the substring between the first `{` and the last `}`, same two tries.
//!
//! The backslash fix doubles every backslash inside quoted string literals
//! only, so keys and structure are untouched.

use crate::error::IngestError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// A parsed JSON object.
pub type JsonObject = Map<String, Value>;

/// Characters kept from each end of the text in an error preview.
const PREVIEW_CHARS: usize = 400;

static RE_THINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>\s*").unwrap());
static RE_FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[a-zA-Z0-9_-]*\s*").unwrap());
static RE_FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```\s*$").unwrap());
static RE_STRING_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).unwrap());

/// Extract the first JSON object from model output.
///
/// # Errors
/// [`IngestError::EmptyModelOutput`] for blank input, otherwise
/// [`IngestError::JsonUnparseable`] with a head/tail preview of the text.
pub fn extract_json_object(text: &str) -> Result<JsonObject, IngestError> {
    let original = text.trim();
    if original.is_empty() {
        return Err(IngestError::EmptyModelOutput);
    }

    let text = strip_fences(&RE_THINK.replace_all(original, ""));

    if let Ok(value) = serde_json::from_str::<Value>(&text) {
        if let Some(obj) = as_object(value) {
            return Ok(obj);
        }
    }

    if let Some(start) = text.find('{') {
        let tail = &text[start..];
        for candidate in [fix_backslashes(tail), tail.to_string()] {
            if let Some(obj) = decode_prefix(&candidate) {
                return Ok(obj);
            }
        }

        if let Some(end) = text.rfind('}').filter(|&end| end > start) {
            let snippet = &text[start..=end];
            for candidate in [fix_backslashes(snippet), snippet.to_string()] {
                if let Some(obj) = serde_json::from_str::<Value>(&candidate).ok().and_then(as_object) {
                    return Ok(obj);
                }
            }
        }
    }

    Err(IngestError::JsonUnparseable {
        preview: preview(original),
    })
}

/// Text of an OCR reply: the `lines` array joined by newlines (nulls
/// skipped), or the `text` field when there is no `lines` array.
pub fn lines_or_text(obj: &JsonObject) -> String {
    match obj.get("lines") {
        Some(Value::Array(lines)) => lines
            .iter()
            .filter(|v| !v.is_null())
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => obj.get("text").map(value_to_text).unwrap_or_default(),
    }
}

/// A string field, or `None` when missing, null or not a string.
pub fn string_field(obj: &JsonObject, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn value_to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn strip_fences(text: &str) -> String {
    let text = text.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }
    let opened = RE_FENCE_OPEN.replace(text, "");
    RE_FENCE_CLOSE.replace(&opened, "").trim().to_string()
}

/// Double every backslash inside quoted string literals.
fn fix_backslashes(text: &str) -> String {
    RE_STRING_LITERAL
        .replace_all(text, |caps: &regex::Captures| format!("\"{}\"", caps[1].replace('\\', "\\\\")))
        .into_owned()
}

/// Decode the first JSON value of `text`, ignoring anything after it.
fn decode_prefix(text: &str) -> Option<JsonObject> {
    let mut values = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match values.next() {
        Some(Ok(value)) => as_object(value),
        _ => None,
    }
}

fn as_object(value: Value) -> Option<JsonObject> {
    match value {
        Value::Object(obj) => Some(obj),
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(obj)) => Some(obj),
            _ => None,
        },
        _ => None,
    }
}

/// First and last [`PREVIEW_CHARS`] characters, or the whole text when short.
pub fn preview(text: &str) -> String {
    let count = text.chars().count();
    if count <= PREVIEW_CHARS * 2 {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    let tail: String = text.chars().skip(count - PREVIEW_CHARS).collect();
    format!("{head}\n...\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_parses_directly() {
        let obj = extract_json_object("```json\n{\"lines\": [\"\\\\beta\"]}\n```").unwrap();
        assert_eq!(obj["lines"][0], "\\beta");
    }

    #[test]
    fn raw_latex_backslash_is_preserved() {
        let obj = extract_json_object(r#"Here you go: {"latex": "\beta + \alpha"} hope it helps"#).unwrap();
        assert_eq!(obj["latex"], r"\beta + \alpha");
    }

    #[test]
    fn trailing_commentary_is_ignored() {
        let obj = extract_json_object("{\"text\": \"hello\"}\nLet me know if you need more.").unwrap();
        assert_eq!(obj["text"], "hello");
    }

    #[test]
    fn array_of_objects_yields_first() {
        let obj = extract_json_object(r#"[{"a": 1}, {"a": 2}]"#).unwrap();
        assert_eq!(obj["a"], 1);
    }

    #[test]
    fn think_block_is_dropped() {
        let obj = extract_json_object("<think>the page shows {maybe}</think>\n{\"latex\": \"x\"}").unwrap();
        assert_eq!(obj["latex"], "x");
    }

    #[test]
    fn stray_closing_brace_after_object() {
        let obj = extract_json_object("note {\"k\": [1, 2]} }").unwrap();
        assert_eq!(obj["k"][1], 2);
    }

    #[test]
    fn empty_input_is_its_own_error() {
        assert!(matches!(
            extract_json_object("   \n"),
            Err(IngestError::EmptyModelOutput)
        ));
    }

    #[test]
    fn garbage_reports_preview() {
        let err = extract_json_object("no json here").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unable to parse JSON object"), "got: {msg}");
        assert!(msg.contains("no json here"), "got: {msg}");
    }

    #[test]
    fn preview_is_head_and_tail() {
        let text = format!("{}{}{}", "a".repeat(400), "m".repeat(100), "z".repeat(400));
        let p = preview(&text);
        assert!(p.starts_with(&"a".repeat(400)));
        assert!(p.ends_with(&"z".repeat(400)));
        assert!(p.contains("\n...\n"));
        assert!(!p.contains('m'));
    }

    #[test]
    fn lines_join_and_skip_nulls() {
        let obj = extract_json_object(r#"{"lines": ["a", null, "b", 3]}"#).unwrap();
        assert_eq!(lines_or_text(&obj), "a\nb\n3");
    }

    #[test]
    fn text_field_is_the_fallback() {
        let obj = extract_json_object(r#"{"text": "x\ny"}"#).unwrap();
        assert_eq!(lines_or_text(&obj), "x\ny");
        let obj = extract_json_object(r#"{"other": 1}"#).unwrap();
        assert_eq!(lines_or_text(&obj), "");
    }

    #[test]
    fn string_field_ignores_non_strings() {
        let obj = extract_json_object(r#"{"latex": "a", "n": 1}"#).unwrap();
        assert_eq!(string_field(&obj, "latex").as_deref(), Some("a"));
        assert_eq!(string_field(&obj, "n"), None);
        assert_eq!(string_field(&obj, "missing"), None);
    }
}
