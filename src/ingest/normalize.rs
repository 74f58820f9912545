//! Normalization of heterogeneous conversation JSON into `Message` records.
//!
//! Exports differ wildly: flat `messages` arrays, tree-structured `mapping`
//! graphs, `items` arrays, and ad-hoc shapes. Known shapes are described by an
//! ordered chain of matcher/extractor pairs; anything else falls back to a
//! generic recursive scan for objects carrying a role field.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::types::Role;

/// Case-insensitive role mapping. Unknown roles are discarded by the caller.
#[must_use]
pub fn normalize_role(msg: &Value) -> Option<Role> {
    let raw = msg
        .get("role")
        .and_then(Value::as_str)
        .or_else(|| msg.get("author").and_then(|a| a.get("role")).and_then(Value::as_str))
        .or_else(|| msg.get("author").and_then(Value::as_str))?;
    match raw.trim().to_lowercase().as_str() {
        "user" | "human" => Some(Role::User),
        "assistant" | "gpt" | "chatgpt" | "model" => Some(Role::Assistant),
        "system" => Some(Role::System),
        _ => None,
    }
}

/// Normalizes a raw timestamp to milliseconds since the epoch.
///
/// Magnitude heuristic: values below 1e12 are seconds, values above 1e15 are
/// microseconds. Non-positive and non-numeric values are dropped.
#[must_use]
pub fn normalize_ts(raw: &Value) -> Option<i64> {
    let num = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !num.is_finite() || num <= 0.0 {
        return None;
    }
    let ms = if num < 1e12 {
        num * 1000.0
    } else if num > 1e15 {
        num / 1000.0
    } else {
        num
    };
    Some(ms.round() as i64)
}

fn ts_from_keys(value: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(normalize_ts))
}

/// Message-level timestamp, if any of the known fields carry one.
#[must_use]
pub(crate) fn message_ts(msg: &Value) -> Option<i64> {
    ts_from_keys(msg, &["create_time", "update_time", "ts"]).or_else(|| {
        msg.get("end_turn")
            .and_then(|e| e.get("time"))
            .and_then(normalize_ts)
    })
}

/// Conversation-level timestamp used as a fallback for undated messages.
#[must_use]
pub fn conversation_ts(conv: &Value) -> Option<i64> {
    ts_from_keys(conv, &["create_time", "update_time", "timestamp"]).or_else(|| {
        conv.get("current_node")
            .and_then(|n| n.get("message"))
            .and_then(|m| m.get("create_time"))
            .and_then(normalize_ts)
    })
}

fn push_text(texts: &mut Vec<String>, value: &Value) {
    if let Some(s) = value.as_str() {
        if !s.is_empty() {
            texts.push(s.to_owned());
        }
    }
}

fn push_part(texts: &mut Vec<String>, part: &Value) {
    match part {
        Value::String(_) => push_text(texts, part),
        Value::Object(obj) => {
            if let Some(text) = obj.get("text") {
                if text.is_string() {
                    push_text(texts, text);
                } else if let Some(value) = text.get("value") {
                    push_text(texts, value);
                }
            }
        }
        _ => {}
    }
}

/// Extracts textual content, trying the known layouts in priority order and
/// concatenating every found fragment with newlines.
#[must_use]
pub(crate) fn normalize_content(msg: &Value) -> String {
    let mut texts = Vec::new();
    let content = msg.get("content");

    match content {
        Some(value @ Value::String(_)) => push_text(&mut texts, value),
        Some(Value::Array(parts)) => {
            for part in parts {
                push_part(&mut texts, part);
            }
        }
        _ => {}
    }

    if let Some(parts) = msg.get("parts").and_then(Value::as_array) {
        for part in parts {
            push_part(&mut texts, part);
        }
    }

    // Fallback for object-wrapped content: `content.text` / `content.parts`.
    if texts.is_empty() {
        if let Some(Value::Object(obj)) = content {
            if let Some(text) = obj.get("text") {
                if text.is_string() {
                    push_text(&mut texts, text);
                } else if let Some(value) = text.get("value") {
                    push_text(&mut texts, value);
                }
            }
            if let Some(parts) = obj.get("parts").and_then(Value::as_array) {
                for part in parts {
                    push_part(&mut texts, part);
                }
            }
        }
    }

    texts.join("\n")
}

/// Model identifier, checked in priority order across known field names.
#[must_use]
pub(crate) fn pick_model(msg: &Value) -> Option<String> {
    let meta = msg.get("metadata");
    let candidates = [
        msg.get("model"),
        msg.get("model_slug"),
        meta.and_then(|m| m.get("model_slug")),
        meta.and_then(|m| m.get("default_model_slug")),
        meta.and_then(|m| m.get("model")),
        msg.get("recipient"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Author name, used by the emission name filter.
#[must_use]
pub(crate) fn author_name(msg: &Value) -> Option<String> {
    msg.get("name")
        .and_then(Value::as_str)
        .or_else(|| msg.get("author").and_then(|a| a.get("name")).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Unicode scalar count with `\r\n` / `\r` normalized to `\n` first.
#[must_use]
pub fn count_chars(text: &str) -> u64 {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    normalized.chars().count() as u64
}

#[allow(clippy::expect_used)]
static IMAGE_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(png|jpe?g|gif|webp|bmp|svg|heic|heif|tiff?|avif)([?#]|$)")
        .expect("image url regex")
});

#[allow(clippy::expect_used)]
static MARKDOWN_IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").expect("markdown image regex"));

fn looks_like_image_mime(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|s| s.to_lowercase().starts_with("image/"))
}

struct ImageTally {
    seen: HashSet<String>,
    total: u32,
}

impl ImageTally {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            total: 0,
        }
    }

    /// Counts once per distinct key; keyless findings always count.
    fn record(&mut self, key: Option<&str>) {
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            if !self.seen.insert(key.to_owned()) {
                return;
            }
        }
        self.total += 1;
    }
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn inspect_attachment(tally: &mut ImageTally, attachment: &Value) {
    if !attachment.is_object() {
        return;
    }
    let file = attachment.get("file");
    let mime_candidates = [
        attachment.get("mime_type"),
        attachment.get("content_type"),
        attachment.get("mime"),
        attachment.get("media_type"),
        file.and_then(|f| f.get("mime_type")),
        file.and_then(|f| f.get("content_type")),
        file.and_then(|f| f.get("media_type")),
    ];
    let has_image_mime = mime_candidates.into_iter().any(looks_like_image_mime);
    let kind_hints = ["type", "category", "purpose"];
    let looks_like_image_kind = kind_hints.iter().any(|key| {
        attachment
            .get(*key)
            .and_then(Value::as_str)
            .is_some_and(|s| s.to_lowercase().contains("image"))
    });

    if has_image_mime || looks_like_image_kind {
        let key = first_str(attachment, &["id", "file_id", "url"])
            .or_else(|| file.and_then(|f| first_str(f, &["id", "url", "name"])))
            .or_else(|| first_str(attachment, &["name", "filename"]));
        tally.record(key);
        return;
    }

    let url = first_str(attachment, &["url", "href", "link", "source", "download_url"])
        .or_else(|| file.and_then(|f| first_str(f, &["url"])));
    if let Some(url) = url {
        if IMAGE_URL_RE.is_match(url) {
            tally.record(Some(url));
        }
    }
}

fn visit_attachment_list(tally: &mut ImageTally, list: Option<&Value>) {
    let Some(items) = list.and_then(Value::as_array) else {
        return;
    };
    for item in items {
        if !item.is_object() {
            continue;
        }
        inspect_attachment(tally, item);
        if let Some(file) = item.get("file").filter(|f| f.is_object()) {
            inspect_attachment(tally, file);
        }
    }
}

fn visit_content_parts(tally: &mut ImageTally, parts: Option<&Value>) {
    let Some(parts) = parts.and_then(Value::as_array) else {
        return;
    };
    for part in parts {
        if !part.is_object() {
            continue;
        }
        let part_type = part
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .unwrap_or_default();
        if part_type.contains("image") {
            if part_type == "image_url" {
                match part.get("image_url") {
                    Some(Value::String(url)) => tally.record(Some(url)),
                    Some(obj @ Value::Object(_)) => {
                        tally.record(first_str(obj, &["url", "href", "id"]));
                    }
                    _ => tally.record(None),
                }
            } else {
                tally.record(first_str(part, &["id", "asset_pointer", "file_id", "url"]));
            }
            continue;
        }
        if looks_like_image_mime(part.get("media_type")) || looks_like_image_mime(part.get("mime_type"))
        {
            tally.record(first_str(part, &["id", "asset_pointer", "url"]));
        }
        if part.get("parts").is_some() {
            visit_content_parts(tally, part.get("parts"));
        }
    }
}

/// Counts embedded images across attachment lists, content parts, and
/// markdown references, deduplicating by id/url key.
#[must_use]
pub(crate) fn count_images(msg: &Value, normalized_content: &str) -> u32 {
    if !msg.is_object() {
        return 0;
    }
    let mut tally = ImageTally::new();
    let meta = msg.get("metadata");

    visit_attachment_list(&mut tally, msg.get("attachments"));
    visit_attachment_list(&mut tally, msg.get("files"));
    visit_attachment_list(&mut tally, msg.get("assets"));
    visit_attachment_list(&mut tally, meta.and_then(|m| m.get("attachments")));
    visit_attachment_list(&mut tally, meta.and_then(|m| m.get("files")));

    visit_content_parts(&mut tally, msg.get("content").filter(|c| c.is_array()));
    visit_content_parts(
        &mut tally,
        msg.get("content").and_then(|c| c.get("parts")),
    );
    visit_content_parts(&mut tally, msg.get("parts"));

    for captures in MARKDOWN_IMAGE_RE.captures_iter(normalized_content) {
        if let Some(url) = captures.get(1) {
            tally.record(Some(url.as_str()));
        }
    }

    tally.total
}

/// One known conversation layout: a predicate plus a node extractor.
pub(crate) struct ShapeMatcher {
    pub name: &'static str,
    pub matches: fn(&Value) -> bool,
    pub extract: fn(&Value, &mut dyn FnMut(&Value)),
}

/// Known layouts, tried in priority order. Every matching shape contributes
/// nodes; the generic scan only runs when none match.
pub(crate) const SHAPE_MATCHERS: &[ShapeMatcher] = &[
    ShapeMatcher {
        name: "messages",
        matches: |conv| conv.get("messages").is_some_and(Value::is_array),
        extract: |conv, emit| {
            if let Some(entries) = conv.get("messages").and_then(Value::as_array) {
                for entry in entries {
                    emit(entry.get("message").unwrap_or(entry));
                }
            }
        },
    },
    ShapeMatcher {
        name: "mapping",
        matches: |conv| conv.get("mapping").is_some_and(Value::is_object),
        extract: |conv, emit| {
            if let Some(mapping) = conv.get("mapping").and_then(Value::as_object) {
                for node in mapping.values() {
                    if node.is_object() {
                        let msg = node
                            .get("message")
                            .or_else(|| node.get("data").and_then(|d| d.get("message")))
                            .unwrap_or(node);
                        emit(msg);
                    }
                }
            }
        },
    },
    ShapeMatcher {
        name: "items",
        matches: |conv| conv.get("items").is_some_and(Value::is_array),
        extract: |conv, emit| {
            if let Some(items) = conv.get("items").and_then(Value::as_array) {
                for item in items {
                    let msg = item
                        .get("message")
                        .or_else(|| item.get("data"))
                        .unwrap_or(item);
                    emit(msg);
                }
            }
        },
    },
];

/// Recursive fallback: any object carrying `role` or `author.role` is treated
/// as a message node; arrays and other objects are walked.
pub(crate) fn scan_generic(value: &Value, emit: &mut dyn FnMut(&Value)) {
    match value {
        Value::Array(items) => {
            for item in items {
                scan_generic(item, emit);
            }
        }
        Value::Object(obj) => {
            let has_role = obj.contains_key("role")
                || obj
                    .get("author")
                    .is_some_and(|a| a.get("role").is_some());
            if has_role {
                emit(value);
                return;
            }
            for child in obj.values() {
                scan_generic(child, emit);
            }
        }
        _ => {}
    }
}

/// Walks one parsed conversation value, emitting every message-like node.
pub(crate) fn visit_conversation(conv: &Value, emit: &mut dyn FnMut(&Value)) {
    if !conv.is_object() {
        return;
    }
    let mut matched = false;
    for matcher in SHAPE_MATCHERS {
        if (matcher.matches)(conv) {
            matched = true;
            tracing::trace!(shape = matcher.name, "conversation shape matched");
            (matcher.extract)(conv, emit);
        }
    }
    if !matched {
        scan_generic(conv, emit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roles_map_case_insensitively() {
        assert_eq!(normalize_role(&json!({"role": "Human"})), Some(Role::User));
        assert_eq!(
            normalize_role(&json!({"author": {"role": "GPT"}})),
            Some(Role::Assistant)
        );
        assert_eq!(normalize_role(&json!({"role": "SYSTEM"})), Some(Role::System));
        assert_eq!(normalize_role(&json!({"role": "tool"})), None);
        assert_eq!(normalize_role(&json!({"text": "no role"})), None);
    }

    #[test]
    fn timestamps_normalize_by_magnitude() {
        // Seconds
        assert_eq!(normalize_ts(&json!(1_700_000_000)), Some(1_700_000_000_000));
        // Milliseconds pass through
        assert_eq!(normalize_ts(&json!(1_700_000_000_000i64)), Some(1_700_000_000_000));
        // Microseconds
        assert_eq!(
            normalize_ts(&json!(1_700_000_000_000_000i64)),
            Some(1_700_000_000_000)
        );
        assert_eq!(normalize_ts(&json!(0)), None);
        assert_eq!(normalize_ts(&json!(-5)), None);
        assert_eq!(normalize_ts(&json!("1700000000")), Some(1_700_000_000_000));
        assert_eq!(normalize_ts(&json!("soon")), None);
    }

    #[test]
    fn content_extraction_tries_known_layouts() {
        assert_eq!(normalize_content(&json!({"content": "plain"})), "plain");
        assert_eq!(
            normalize_content(&json!({"content": ["a", {"text": "b"}, {"type": "text", "text": {"value": "c"}}]})),
            "a\nb\nc"
        );
        assert_eq!(
            normalize_content(&json!({"parts": ["x", {"text": "y"}]})),
            "x\ny"
        );
        assert_eq!(
            normalize_content(&json!({"content": {"text": {"value": "wrapped"}}})),
            "wrapped"
        );
        assert_eq!(
            normalize_content(&json!({"content": {"parts": ["p1", "p2"]}})),
            "p1\np2"
        );
    }

    #[test]
    fn model_fields_follow_priority_order() {
        let msg = json!({
            "model_slug": "gpt-4o",
            "metadata": {"model_slug": "ignored"},
            "recipient": "also-ignored"
        });
        assert_eq!(pick_model(&msg), Some("gpt-4o".into()));
        assert_eq!(
            pick_model(&json!({"metadata": {"default_model_slug": "o1"}})),
            Some("o1".into())
        );
        assert_eq!(pick_model(&json!({})), None);
    }

    #[test]
    fn image_counting_dedupes_by_key() {
        let msg = json!({
            "attachments": [
                {"id": "img-1", "mime_type": "image/png"},
                {"id": "img-1", "mime_type": "image/png"},
                {"url": "https://x/y.jpg"}
            ],
            "content": [
                {"type": "image_url", "image_url": {"url": "https://x/z.png"}}
            ]
        });
        let content = normalize_content(&msg);
        assert_eq!(count_images(&msg, &content), 3);
    }

    #[test]
    fn markdown_image_references_count() {
        let msg = json!({"content": "see ![alt](https://a/b.png) and ![alt](https://a/b.png)"});
        let content = normalize_content(&msg);
        assert_eq!(count_images(&msg, &content), 1, "same url counts once");
    }

    #[test]
    fn mapping_and_items_shapes_both_contribute() {
        let conv = json!({
            "mapping": {
                "n1": {"message": {"role": "assistant", "content": "from mapping"}}
            },
            "items": [
                {"message": {"role": "user", "content": "from items"}}
            ]
        });
        let mut seen = Vec::new();
        visit_conversation(&conv, &mut |msg| {
            seen.push(normalize_content(msg));
        });
        assert!(seen.contains(&"from mapping".to_owned()));
        assert!(seen.contains(&"from items".to_owned()));
    }

    #[test]
    fn generic_scan_finds_nested_role_objects() {
        let conv = json!({
            "wrapper": {
                "deep": [{"role": "assistant", "content": "buried"}]
            }
        });
        let mut seen = Vec::new();
        visit_conversation(&conv, &mut |msg| {
            seen.push(normalize_content(msg));
        });
        assert_eq!(seen, vec!["buried".to_owned()]);
    }

    #[test]
    fn char_counting_normalizes_line_endings() {
        assert_eq!(count_chars("a\r\nb"), 3);
        assert_eq!(count_chars("你好"), 2);
    }
}
