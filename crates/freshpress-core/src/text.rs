//! # Text Helpers
//!
//! Sanitizers applied to request arguments and the content renderer
//! consumed when building `rendered` fields.

use serde_json::Value;

// =============================================================================
// RENDERER
// =============================================================================

/// Content filter turning stored markup into display markup.
pub trait Renderer: Send + Sync {
    fn render(&self, raw: &str) -> String;
}

/// Default renderer: paragraph and line-break formatting.
#[derive(Debug, Clone, Copy, Default)]
pub struct Autop;

impl Renderer for Autop {
    fn render(&self, raw: &str) -> String {
        autop(raw)
    }
}

const BLOCK_TAGS: [&str; 16] = [
    "<p", "<div", "<ul", "<ol", "<li", "<h1", "<h2", "<h3", "<h4", "<h5", "<h6", "<blockquote",
    "<pre", "<table", "<figure", "<hr",
];

/// Wrap blank-line separated blocks in `<p>` and turn single newlines into
/// `<br />`. Blocks that already open with a block-level tag are left alone.
pub fn autop(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    if normalized.trim().is_empty() {
        return String::new();
    }

    let mut out = String::new();
    for block in normalized.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let lower = block.to_ascii_lowercase();
        if BLOCK_TAGS.iter().any(|tag| lower.starts_with(tag)) {
            out.push_str(block);
        } else {
            out.push_str("<p>");
            out.push_str(&block.replace('\n', "<br />\n"));
            out.push_str("</p>");
        }
        out.push('\n');
    }
    out
}

/// Excerpt generated from content: first `max_words` words, tags removed,
/// followed by `more` when truncated.
pub fn trim_words(text: &str, max_words: usize, more: &str) -> String {
    let stripped = strip_tags(text);
    let words: Vec<&str> = stripped.split_whitespace().collect();
    if words.len() > max_words {
        let mut out = words[..max_words].join(" ");
        out.push_str(more);
        out
    } else {
        words.join(" ")
    }
}

// =============================================================================
// SANITIZERS
// =============================================================================

/// Remove everything between `<` and `>`.
pub fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Single-line plain text: tags stripped, whitespace collapsed, trimmed.
pub fn sanitize_text_field(text: &str) -> String {
    strip_tags(text).split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase alphanumerics, dashes and underscores only.
pub fn sanitize_key(text: &str) -> String {
    text.chars()
        .filter_map(|c| {
            let c = c.to_ascii_lowercase();
            (c.is_ascii_alphanumeric() || c == '_' || c == '-').then_some(c)
        })
        .collect()
}

/// URL-safe slug: lowercase, whitespace and dots become dashes, runs of
/// dashes collapse, leading and trailing dashes trimmed.
pub fn sanitize_title(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in strip_tags(text).chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if c == '_' {
            out.push('_');
        } else if (c.is_whitespace() || c == '-' || c == '.') && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Split a comma/space separated list, or pass an array through.
pub fn parse_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .map(|p| Value::String(p.to_string()))
            .collect(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Interpret a value as a non-negative integer list, dropping anything else.
pub fn parse_id_list(value: &Value) -> Vec<u64> {
    let mut ids: Vec<u64> = parse_list(value).iter().filter_map(value_as_u64).collect();
    ids.dedup();
    ids
}

/// Integer interpretation of a JSON scalar (numbers or numeric strings).
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub fn value_as_u64(value: &Value) -> Option<u64> {
    value_as_i64(value).and_then(|v| u64::try_from(v).ok())
}

/// Loose boolean reading: `false`, `"false"`, `"0"`, `0` and `""` are false.
pub fn value_as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() != Some(0),
        Value::String(s) => !matches!(s.to_ascii_lowercase().as_str(), "" | "false" | "0"),
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// String interpretation of a JSON scalar.
pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1".to_string() } else { String::new() }),
        _ => None,
    }
}

/// Escape text for HTML attribute or element content.
pub fn esc_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Minimal address check: one `@`, non-empty local part, dotted domain.
pub fn is_email(text: &str) -> bool {
    let mut parts = text.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !text.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn autop_wraps_paragraphs() {
        assert_eq!(autop("Hello"), "<p>Hello</p>\n");
        assert_eq!(
            autop("One\ntwo\n\nThree"),
            "<p>One<br />\ntwo</p>\n<p>Three</p>\n"
        );
        assert_eq!(autop("<div>kept</div>"), "<div>kept</div>\n");
        assert_eq!(autop("   "), "");
    }

    #[test]
    fn slugs_are_lowercase_dashed() {
        assert_eq!(sanitize_title("Hello World!"), "hello-world");
        assert_eq!(sanitize_title("  a.b  --c "), "a-b-c");
        assert_eq!(sanitize_title("<b>Bold</b> move"), "bold-move");
    }

    #[test]
    fn keys_and_text_fields() {
        assert_eq!(sanitize_key("Edit Mode!"), "editmode");
        assert_eq!(sanitize_text_field("  a <i>b</i>\n\tc "), "a b c");
    }

    #[test]
    fn lists_and_ids() {
        assert_eq!(parse_list(&json!("1, 2 3")).len(), 3);
        assert_eq!(parse_id_list(&json!(["4", 5, "x", -1])), vec![4, 5]);
        assert!(parse_list(&Value::Null).is_empty());
    }

    #[test]
    fn loose_booleans() {
        assert!(!value_as_bool(&json!("false")));
        assert!(!value_as_bool(&json!("0")));
        assert!(value_as_bool(&json!("true")));
        assert!(value_as_bool(&json!(1)));
    }

    #[test]
    fn excerpt_trimming() {
        assert_eq!(trim_words("<p>a b c d</p>", 2, " [&hellip;]"), "a b [&hellip;]");
        assert_eq!(trim_words("a b", 5, "..."), "a b");
    }

    #[test]
    fn email_shape() {
        assert!(is_email("jane@example.com"));
        assert!(!is_email("jane@example"));
        assert!(!is_email("a@b@c.com"));
    }
}
