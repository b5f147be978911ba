use std::collections::HashMap;

use log::warn;
use pulldown_cmark::{html, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use serde_yaml::{Mapping, Value};

use crate::types::EntryMeta;
use crate::utils::escape_attr;

/// Markdown rendering result
#[derive(Debug, Clone, PartialEq)]
pub struct MarkdownResult {
    pub html: String,
    /// Text of the first level-one heading
    pub title: Option<String>,
}

/// A Markdown source split at its frontmatter fence
#[derive(Debug, Clone, PartialEq)]
pub struct SplitDocument<'a> {
    pub frontmatter: Option<Mapping>,
    pub rest_of_content: &'a str,
}

/// Service for handling markdown rendering
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownService;

impl MarkdownService {
    /// Create a new markdown service
    pub fn new() -> Self {
        Self
    }

    fn options() -> Options {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_FOOTNOTES);
        options
    }

    /// Render Markdown to HTML with slugged heading ids. Inline HTML passes
    /// through untouched so directives can be embedded in Markdown pages.
    pub fn render(&self, content: &str) -> MarkdownResult {
        let options = Self::options();

        // First pass: collect headings
        let mut headings: Vec<(u32, String, String)> = Vec::new(); // (level, id, text)
        let mut in_heading: Option<u32> = None;
        let mut buf = String::new();
        let mut id_counts: HashMap<String, usize> = HashMap::new();

        for ev in Parser::new_ext(content, options) {
            match ev {
                Event::Start(Tag::Heading { level, .. }) => {
                    in_heading = Some(heading_level_to_u32(level));
                    buf.clear();
                }
                Event::End(TagEnd::Heading(_)) => {
                    if let Some(lvl) = in_heading.take() {
                        let mut id = slugify(&buf);
                        if id.is_empty() {
                            id = format!("h{}", lvl);
                        }
                        let count = id_counts.entry(id.clone()).or_insert(0);
                        if *count > 0 {
                            id = format!("{}-{}", id, *count);
                        }
                        *count += 1;
                        headings.push((lvl, id, buf.clone()));
                    }
                    buf.clear();
                }
                Event::Text(t) | Event::Code(t) => {
                    if in_heading.is_some() {
                        buf.push_str(&t);
                    }
                }
                Event::SoftBreak | Event::HardBreak => {
                    if in_heading.is_some() {
                        buf.push(' ');
                    }
                }
                _ => {}
            }
        }

        // Second pass: inject ids
        let mut out = String::new();
        let mut idx = 0usize;
        let mut closing_stack: Vec<u32> = Vec::new();
        for ev in Parser::new_ext(content, options) {
            match ev {
                Event::Start(Tag::Heading { level, .. }) => {
                    let lvl = heading_level_to_u32(level);
                    let id = headings.get(idx).map(|(_, id, _)| id.as_str()).unwrap_or("");
                    out.push_str(&format!("<h{} id=\"{}\">", lvl, escape_attr(id)));
                    closing_stack.push(lvl);
                    idx += 1;
                }
                Event::End(TagEnd::Heading(_)) => {
                    let lvl = closing_stack.pop().unwrap_or(1);
                    out.push_str(&format!("</h{}>", lvl));
                }
                _ => html::push_html(&mut out, std::iter::once(ev)),
            }
        }

        MarkdownResult {
            html: out,
            title: first_heading_text(&headings),
        }
    }

    /// Split off a leading `---` fenced YAML block. Invalid YAML is logged and
    /// the block is still removed from the content.
    pub fn split_frontmatter<'a>(&self, raw: &'a str) -> SplitDocument<'a> {
        let raw = raw.trim_start_matches('\u{feff}');
        let Some(after_open) = strip_fence_line(raw) else {
            return SplitDocument { frontmatter: None, rest_of_content: raw };
        };
        let mut offset = 0usize;
        for line in after_open.split_inclusive('\n') {
            if line.trim_end() == "---" {
                let yaml = &after_open[..offset];
                let rest = &after_open[offset + line.len()..];
                let frontmatter = match serde_yaml::from_str::<Value>(yaml) {
                    Ok(Value::Mapping(map)) => Some(map),
                    Ok(Value::Null) => Some(Mapping::new()),
                    Ok(_) => {
                        warn!("Frontmatter is not a mapping, ignoring it");
                        None
                    }
                    Err(e) => {
                        warn!("Failed to parse frontmatter: {}", e);
                        None
                    }
                };
                return SplitDocument { frontmatter, rest_of_content: rest };
            }
            offset += line.len();
        }
        SplitDocument { frontmatter: None, rest_of_content: raw }
    }
}

fn strip_fence_line(raw: &str) -> Option<&str> {
    let (first, rest) = raw.split_once('\n')?;
    (first.trim_end() == "---").then_some(rest)
}

/// Fold frontmatter keys into entry metadata. `title`, `keywords` and
/// `nocontainer` are recognized; other scalar keys land in `extra`.
pub fn meta_from_frontmatter(frontmatter: &Mapping) -> EntryMeta {
    let mut meta = EntryMeta::default();
    for (key, value) in frontmatter {
        let Some(key) = key.as_str() else { continue };
        match key {
            "title" => meta.title = scalar_text(value).filter(|t| !t.trim().is_empty()),
            "keywords" | "tags" => meta.keywords.extend(keyword_list(value)),
            "nocontainer" => meta.nocontainer = truthy(value),
            _ => {
                if let Some(text) = scalar_text(value) {
                    meta.extra.insert(key.to_string(), text);
                }
            }
        }
    }
    meta
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn keyword_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(scalar_text).collect(),
        other => scalar_text(other)
            .map(|s| split_keywords(&s))
            .unwrap_or_default(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => true,
        Value::String(s) => !s.eq_ignore_ascii_case("false"),
        _ => true,
    }
}

/// Split a comma separated keyword list, dropping blanks
pub fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Convert heading level to u32
fn heading_level_to_u32(level: HeadingLevel) -> u32 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Create URL-friendly slug from text
fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_dash = false;
    for ch in text.chars() {
        let c = ch.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_dash = false;
        } else if (c.is_ascii_whitespace() || c == '-' || c == '_') && !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    if out.ends_with('-') {
        out.pop();
    }
    out
}

/// Get the first H1 heading text
fn first_heading_text(headings: &[(u32, String, String)]) -> Option<String> {
    headings
        .iter()
        .find(|(lvl, _, text)| *lvl == 1 && !text.trim().is_empty())
        .map(|(_, _, text)| text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_frontmatter_from_body() {
        let service = MarkdownService::new();
        let raw = "---\ntitle: Markdown Fixture File Title\nkeywords: [alpha, beta]\n---\n# Heading\n\nBody\n";
        let split = service.split_frontmatter(raw);
        let meta = meta_from_frontmatter(split.frontmatter.as_ref().unwrap());
        assert_eq!(meta.title.as_deref(), Some("Markdown Fixture File Title"));
        assert_eq!(meta.keywords, vec!["alpha", "beta"]);
        assert_eq!(split.rest_of_content, "# Heading\n\nBody\n");
    }

    #[test]
    fn no_fence_means_no_frontmatter() {
        let service = MarkdownService::new();
        let split = service.split_frontmatter("# Just a page\n---\nnot yaml\n");
        assert!(split.frontmatter.is_none());
        assert_eq!(split.rest_of_content, "# Just a page\n---\nnot yaml\n");
    }

    #[test]
    fn unterminated_fence_is_left_alone() {
        let service = MarkdownService::new();
        let split = service.split_frontmatter("---\ntitle: x\n");
        assert!(split.frontmatter.is_none());
        assert_eq!(split.rest_of_content, "---\ntitle: x\n");
    }

    #[test]
    fn comma_separated_keywords_and_flags() {
        let service = MarkdownService::new();
        let split = service.split_frontmatter("---\nkeywords: one, two ,\nnocontainer: true\nauthor: me\n---\n");
        let meta = meta_from_frontmatter(split.frontmatter.as_ref().unwrap());
        assert_eq!(meta.keywords, vec!["one", "two"]);
        assert!(meta.nocontainer);
        assert_eq!(meta.extra.get("author").map(String::as_str), Some("me"));
    }

    #[test]
    fn renders_heading_ids_and_title() {
        let result = MarkdownService::new().render("# Hello World\n\n## Hello World\n\ntext with [link](/a.html)\n");
        assert!(result.html.contains("<h1 id=\"hello-world\">Hello World</h1>"));
        assert!(result.html.contains("<h2 id=\"hello-world-1\">"));
        assert!(result.html.contains("<a href=\"/a.html\">link</a>"));
        assert_eq!(result.title.as_deref(), Some("Hello World"));
    }

    #[test]
    fn inline_html_passes_through() {
        let result = MarkdownService::new().render("<keep-if truthy=\"x\">kept</keep-if>\n\n~~gone~~\n");
        assert!(result.html.contains("<keep-if truthy=\"x\">"));
        assert!(result.html.contains("<del>gone</del>"));
    }
}
