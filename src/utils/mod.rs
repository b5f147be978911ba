use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Escape HTML special characters
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Escape HTML attribute values
pub fn escape_attr(text: &str) -> String {
    escape_html(text)
}

/// Normalize text before it is written: CRLF becomes LF and trailing spaces
/// or tabs before a newline are dropped. Blank lines survive.
pub fn normalize_content(text: &str) -> String {
    let unified = text.replace("\r\n", "\n");
    let mut lines: Vec<&str> = unified.split('\n').collect();
    let last = lines.len() - 1;
    for line in &mut lines[..last] {
        *line = line.trim_end_matches([' ', '\t']);
    }
    lines.join("\n")
}

/// Map a request path to a content path: `/` is `/index.html` and a final
/// segment without an extension gets `.html`.
pub fn content_path_for_request(req_path: &str) -> String {
    let trimmed = req_path.trim_matches('/');
    if trimmed.is_empty() {
        return "/index.html".to_string();
    }
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if last.contains('.') {
        format!("/{}", trimmed)
    } else {
        format!("/{}.html", trimmed)
    }
}

/// Directory part of a content path, always ending in `/`
pub fn parent_of(content_path: &str) -> &str {
    match content_path.rfind('/') {
        Some(idx) => &content_path[..=idx],
        None => "/",
    }
}

/// Last segment of a content path
pub fn name_of(content_path: &str) -> &str {
    content_path.rsplit('/').next().unwrap_or(content_path)
}

/// Determine content type for a content path based on its extension
pub fn content_type_for(content_path: &str) -> &'static str {
    let ext = content_path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "application/javascript; charset=utf-8",
        "json" => "application/json; charset=utf-8",
        "md" | "markdown" => "text/markdown; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// RFC 3339 rendering used wherever a timestamp reaches a template
pub fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_line_endings_and_trailing_space() {
        let raw = "title  \r\n\r\nbody\t \nlast  ";
        assert_eq!(normalize_content(raw), "title\n\nbody\nlast  ");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_content("a \r\n b\t\r\n\r\n  \nc");
        assert_eq!(normalize_content(&once), once);
    }

    #[test]
    fn request_paths_follow_conventions() {
        assert_eq!(content_path_for_request("/"), "/index.html");
        assert_eq!(content_path_for_request(""), "/index.html");
        assert_eq!(content_path_for_request("/notes/today"), "/notes/today.html");
        assert_eq!(content_path_for_request("/notes/today.md"), "/notes/today.md");
    }

    #[test]
    fn path_parts() {
        assert_eq!(parent_of("/a/b.html"), "/a/");
        assert_eq!(parent_of("/b.html"), "/");
        assert_eq!(name_of("/a/b.html"), "b.html");
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
