use std::borrow::Cow;

/// Maximum number of bytes of a request or response body kept in log reports.
pub const MAX_LOGGED_BODY_LENGTH: usize = 400;

/// Truncate a body to avoid logging excessive data
pub fn truncate_body(body: &str) -> String {
    truncate_body_to(body, MAX_LOGGED_BODY_LENGTH)
}

/// Truncate a body to at most `max_len` bytes, never splitting a UTF-8 character.
pub fn truncate_body_to(body: &str, max_len: usize) -> String {
    if body.len() <= max_len {
        return body.to_string();
    }

    let mut end = max_len;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Lossy text view of a raw body
pub fn body_text(body: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(body)
}
