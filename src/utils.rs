use std::time::{SystemTime, UNIX_EPOCH};

/// Marker appended to anything cut short before it is sent to the model
pub const ELLIPSIS: &str = "...";

/// Rough token estimate used for request sizing (4 characters per token)
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when cut
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], ELLIPSIS),
        None => text.to_string(),
    }
}

/// Collapse all whitespace runs into single spaces
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip a surrounding markdown code fence from a model answer
pub fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();
    for fence in ["```json", "```html", "```"] {
        if let Some(rest) = s.strip_prefix(fence) {
            if let Some(body) = rest.trim_end().strip_suffix("```") {
                return body.trim();
            }
        }
    }
    s
}

/// Convert a string to a sanitized filename
pub fn sanitize_filename(url: &str) -> String {
    // Remove protocol and replace invalid filename characters
    let mut name = url.replace("http://", "").replace("https://", "");
    name = name.replace(['/', ':', '?', '&', '=', '#', '%'], "_");

    // Limit filename length
    if name.len() > 100 {
        truncate_bytes(&name, 100).to_string()
    } else {
        name
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Whether `value` can be used verbatim as a CSS identifier
pub fn is_css_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let first = match chars.next() {
        Some('-') => match chars.next() {
            Some(c) => c,
            None => return false,
        },
        Some(c) => c,
        None => return false,
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Escape text for use inside an HTML text node
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape text for use inside a double-quoted HTML attribute
pub fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
    out
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
