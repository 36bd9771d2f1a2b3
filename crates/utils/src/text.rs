/// Trimmed `content` for logs and error messages, cut to at most `max_len`
/// bytes on a char boundary. An ellipsis marks a cut.
pub fn excerpt(content: &str, max_len: usize) -> String {
    let trimmed = content.trim();
    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }
    let mut end = max_len;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}

/// Split file contents into lines the way a diff counts them. A trailing
/// newline does not start another line.
pub fn content_lines(content: &str) -> Vec<&str> {
    if content.is_empty() {
        return Vec::new();
    }
    content
        .strip_suffix('\n')
        .unwrap_or(content)
        .split('\n')
        .collect()
}
