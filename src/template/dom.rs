//! Index-addressed HTML tree.
//!
//! Nodes live in one arena and refer to each other by index, so a directive
//! can detach, replace or unwrap nodes while the walker still holds stable
//! ids for everything that stays attached. Detached nodes simply become
//! unreachable from the root.

use std::borrow::Cow;

use log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::utils::escape_html;

pub type NodeId = usize;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Entities every XML reader understands; anything else is left as written
const PREDEFINED_ENTITIES: &[(&str, &str)] =
    &[("amp", "&"), ("lt", "<"), ("gt", ">"), ("quot", "\""), ("apos", "'")];

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    /// 1-based source line of the start tag
    pub line: usize,
}

impl Element {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Self { name: name.into(), attrs: Vec::new(), line }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|(key, _)| key == name)
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Document,
    Doctype(String),
    Element(Element),
    /// Text exactly as it appears in markup, entities still escaped
    Text(String),
    Comment(String),
    /// Markup passed through verbatim (CDATA sections)
    Raw(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
    data: NodeData,
}

impl Node {
    fn new(data: NodeData) -> Self {
        Self { parent: None, first_child: None, last_child: None, prev: None, next: None, data }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub const ROOT: NodeId = 0;

    pub fn new() -> Self {
        Self { nodes: vec![Node::new(NodeData::Document)] }
    }

    /// Parse a full document or a fragment. `file` only labels log lines.
    pub fn parse(source: &str, file: &str) -> Self {
        let mut doc = Self::new();
        doc.parse_into(Self::ROOT, source, file);
        doc
    }

    /// Parse markup and append the resulting nodes to `parent`.
    ///
    /// Hand-written HTML is accepted as it comes: stray `&` and `<` are read
    /// as text, script and style bodies are never parsed, and whatever the
    /// reader still cannot make sense of is kept as escaped text.
    pub fn parse_into(&mut self, parent: NodeId, source: &str, file: &str) {
        let source = escape_stray_markup(source);
        let source: &str = &source;
        let mut lines = LineCounter::new(source);
        let mut stack: Vec<NodeId> = vec![parent];
        // byte offset the current reader was started at
        let mut base = 0;

        'segments: while base < source.len() {
            let mut reader = Reader::from_str(&source[base..]);
            reader.config_mut().trim_text(false);
            reader.config_mut().enable_all_checks(false);

            loop {
                let offset = base + reader.buffer_position() as usize;
                let current = stack.last().copied().unwrap_or(parent);
                let event = match reader.read_event() {
                    Ok(event) => event,
                    Err(e) => {
                        let line = lines.line_at(offset);
                        warn!("Keeping unreadable markup in {} line {} as text: {}", file, line, e);
                        let rest = source.get(offset..).unwrap_or_default();
                        self.append_text(current, &escape_html(rest));
                        break 'segments;
                    }
                };
                match event {
                    Event::Start(start) => {
                        let element = element_from(&start, lines.line_at(offset));
                        let name = element.name.clone();
                        let id = self.append_new(current, NodeData::Element(element));
                        if is_void(&name) {
                            continue;
                        }
                        let raw_text = RAW_TEXT_ELEMENTS.contains(&name.as_str())
                            || (name == "pre" && self.is_element(current, "code"));
                        if raw_text {
                            let content_start = base + reader.buffer_position() as usize;
                            let (content_end, resume) = raw_text_end(source, content_start, &name);
                            let text = &source[content_start..content_end];
                            if !text.is_empty() {
                                self.append_text(id, text);
                            }
                            base = resume;
                            continue 'segments;
                        }
                        stack.push(id);
                    }
                    Event::Empty(start) => {
                        let element = element_from(&start, lines.line_at(offset));
                        self.append_new(current, NodeData::Element(element));
                    }
                    Event::End(end) => {
                        let name = String::from_utf8_lossy(end.name().as_ref()).to_ascii_lowercase();
                        // unmatched end tags are ignored; matched ones close everything above
                        if let Some(pos) = stack.iter().rposition(|id| self.is_element(*id, &name)) {
                            if pos > 0 {
                                stack.truncate(pos);
                            }
                        }
                    }
                    Event::Text(text) => self.append_text(current, &String::from_utf8_lossy(&text)),
                    Event::GeneralRef(reference) => {
                        self.append_text(current, &format!("&{};", String::from_utf8_lossy(&reference)))
                    }
                    Event::CData(data) => {
                        let raw = format!("<![CDATA[{}]]>", String::from_utf8_lossy(&data));
                        self.append_new(current, NodeData::Raw(raw));
                    }
                    Event::Comment(comment) => {
                        self.append_new(current, NodeData::Comment(String::from_utf8_lossy(&comment).into_owned()));
                    }
                    Event::DocType(doctype) => {
                        let text = String::from_utf8_lossy(&doctype).trim().to_string();
                        self.append_new(current, NodeData::Doctype(text));
                    }
                    Event::Eof => break 'segments,
                    _ => {}
                }
            }
        }
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id].data
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id].data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id].data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId, name: &str) -> bool {
        self.element(id).is_some_and(|e| e.name == name)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    /// Children of `id` in order
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[id].first_child, move |child| self.nodes[*child].next)
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].first_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].next
    }

    /// First node after `id`'s subtree in document order, staying inside `root`
    pub fn following(&self, id: NodeId, root: NodeId) -> Option<NodeId> {
        let mut current = id;
        loop {
            if current == root {
                return None;
            }
            if let Some(next) = self.next_sibling(current) {
                return Some(next);
            }
            current = self.parent(current)?;
        }
    }

    /// Pre-order successor of `id` inside `root`
    pub fn next_in_order(&self, id: NodeId, root: NodeId) -> Option<NodeId> {
        self.first_child(id).or_else(|| self.following(id, root))
    }

    /// Whether `id` is still reachable from the document root
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current == Self::ROOT
    }

    /// Create a node that is not yet part of the tree
    pub fn create(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node::new(data));
        self.nodes.len() - 1
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        let last = self.nodes[parent].last_child;
        self.nodes[child].parent = Some(parent);
        self.nodes[child].prev = last;
        match last {
            Some(last) => self.nodes[last].next = Some(child),
            None => self.nodes[parent].first_child = Some(child),
        }
        self.nodes[parent].last_child = Some(child);
    }

    /// Put `new` directly before the attached node `reference`
    fn insert_before(&mut self, reference: NodeId, new: NodeId) {
        self.detach(new);
        let Some(parent) = self.nodes[reference].parent else {
            return;
        };
        let prev = self.nodes[reference].prev;
        self.nodes[new].parent = Some(parent);
        self.nodes[new].prev = prev;
        self.nodes[new].next = Some(reference);
        self.nodes[reference].prev = Some(new);
        match prev {
            Some(prev) => self.nodes[prev].next = Some(new),
            None => self.nodes[parent].first_child = Some(new),
        }
    }

    fn append_new(&mut self, parent: NodeId, data: NodeData) -> NodeId {
        let id = self.create(data);
        self.append(parent, id);
        id
    }

    /// Append raw (already escaped) text, merging with a trailing text node
    pub fn append_text(&mut self, parent: NodeId, text: &str) {
        if let Some(last) = self.nodes[parent].last_child {
            if let NodeData::Text(existing) = &mut self.nodes[last].data {
                existing.push_str(text);
                return;
            }
        }
        self.append_new(parent, NodeData::Text(text.to_string()));
    }

    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id].parent.take() else {
            return;
        };
        let prev = self.nodes[id].prev.take();
        let next = self.nodes[id].next.take();
        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => self.nodes[parent].first_child = next,
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => self.nodes[parent].last_child = prev,
        }
    }

    /// Put `replacement` where `old` was; `old` ends up detached
    pub fn replace(&mut self, old: NodeId, replacement: NodeId) {
        if self.nodes[old].parent.is_none() {
            return;
        }
        self.insert_before(old, replacement);
        self.detach(old);
    }

    /// Detach and return all children of `id`
    pub fn take_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children: Vec<NodeId> = self.children(id).collect();
        for child in &children {
            let node = &mut self.nodes[*child];
            node.parent = None;
            node.prev = None;
            node.next = None;
        }
        self.nodes[id].first_child = None;
        self.nodes[id].last_child = None;
        children
    }

    /// Move the children of `id` into its place and detach `id`. Returns the
    /// moved children in order.
    pub fn unwrap(&mut self, id: NodeId) -> Vec<NodeId> {
        let children = self.take_children(id);
        if self.nodes[id].parent.is_some() {
            for child in &children {
                self.insert_before(id, *child);
            }
            self.detach(id);
        }
        children
    }

    /// Elements below `scope` in document order
    pub fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut next = self.first_child(scope);
        while let Some(id) = next {
            out.push(id);
            next = self.next_in_order(id, scope);
        }
        out
    }

    pub fn find_element(&self, scope: NodeId, name: &str) -> Option<NodeId> {
        self.descendants(scope).into_iter().find(|id| self.is_element(*id, name))
    }

    /// Concatenated, unescaped text below `id`
    pub fn text_content(&self, id: NodeId) -> String {
        let mut raw = String::new();
        if let NodeData::Text(text) = self.data(id) {
            raw.push_str(text);
        }
        for node in self.descendants(id) {
            if let NodeData::Text(text) = self.data(node) {
                raw.push_str(text);
            }
        }
        unescape_lossy(&raw)
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.write_node(child, &mut out);
        }
        out
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    pub fn to_html(&self) -> String {
        self.outer_html(Self::ROOT)
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id].data {
            NodeData::Document => {
                for child in self.children(id) {
                    self.write_node(child, out);
                }
            }
            NodeData::Doctype(doctype) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(doctype);
                out.push('>');
            }
            NodeData::Element(element) => {
                out.push('<');
                out.push_str(&element.name);
                for (key, value) in &element.attrs {
                    out.push(' ');
                    out.push_str(key);
                    if !value.is_empty() {
                        out.push_str("=\"");
                        write_attr_value(value, out);
                        out.push('"');
                    }
                }
                out.push('>');
                if is_void(&element.name) && self.nodes[id].first_child.is_none() {
                    return;
                }
                for child in self.children(id) {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
            NodeData::Text(text) | NodeData::Raw(text) => out.push_str(text),
            NodeData::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
        }
    }
}

fn element_from(start: &BytesStart<'_>, line: usize) -> Element {
    let name = String::from_utf8_lossy(start.name().as_ref()).to_ascii_lowercase();
    let attrs = start
        .html_attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
            let value = unescape_lossy(&String::from_utf8_lossy(&attr.value));
            (key, value)
        })
        .collect();
    Element { name, attrs, line }
}

/// Resolve character references and the predefined entities. Other named
/// entities, and `&` that starts no reference, stay as written.
pub fn unescape_lossy(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let resolved = after
            .find(';')
            .and_then(|end| resolve_reference(&after[..end]).map(|c| (c, end)));
        match resolved {
            Some((c, end)) => {
                out.push(c);
                rest = &after[end + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_reference(name: &str) -> Option<char> {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code);
    }
    PREDEFINED_ENTITIES
        .iter()
        .find(|(entity, _)| *entity == name)
        .and_then(|(_, text)| text.chars().next())
}

/// Escape an unescaped attribute value. Named entities the reader left
/// unresolved (`&nbsp;`) are written back untouched.
fn write_attr_value(value: &str, out: &mut String) {
    for (i, c) in value.char_indices() {
        match c {
            '&' if unresolved_entity_at(&value[i + 1..]) => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

fn unresolved_entity_at(rest: &str) -> bool {
    let Some(end) = rest.find(';') else {
        return false;
    };
    let name = &rest[..end];
    is_entity_name(name.as_bytes()) && !PREDEFINED_ENTITIES.iter().any(|(entity, _)| *entity == name)
}

fn is_entity_name(name: &[u8]) -> bool {
    name.first().is_some_and(u8::is_ascii_alphabetic) && name.iter().all(u8::is_ascii_alphanumeric)
}

/// Whether the bytes after a `&` form a complete character reference
fn starts_reference(rest: &[u8]) -> bool {
    let Some(end) = rest.iter().position(|b| *b == b';') else {
        return false;
    };
    let name = &rest[..end];
    match name {
        [b'#', b'x' | b'X', hex @ ..] => !hex.is_empty() && hex.iter().all(u8::is_ascii_hexdigit),
        [b'#', digits @ ..] => !digits.is_empty() && digits.iter().all(u8::is_ascii_digit),
        _ => is_entity_name(name),
    }
}

/// Rewrite the parts of hand-written HTML an XML reader rejects: `&` that
/// starts no reference becomes `&amp;`, `<` that starts no markup becomes
/// `&lt;` and a lowercase doctype is upper-cased. Comments and script or
/// style bodies pass through unchanged. Newlines are never added or removed.
fn escape_stray_markup(source: &str) -> Cow<'_, str> {
    let bytes = source.as_bytes();
    let mut out = String::new();
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        let rest = &bytes[i + 1..];
        let replacement = match bytes[i] {
            b'&' if !starts_reference(rest) => Some("&amp;"),
            b'<' if rest.starts_with(b"!--") => {
                i = find_ascii_ci(source, i + 4, "-->").map_or(bytes.len(), |end| end + 3);
                continue;
            }
            b'<' if rest.len() >= 8 && rest[..8].eq_ignore_ascii_case(b"!doctype") => Some("<!DOCTYPE"),
            b'<' if rest.first().is_some_and(u8::is_ascii_alphabetic) => {
                let name_len = rest.iter().take_while(|b| b.is_ascii_alphanumeric()).count();
                let name = source[i + 1..i + 1 + name_len].to_ascii_lowercase();
                if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
                    let body = find_ascii_ci(source, i, ">").map_or(bytes.len(), |end| end + 1);
                    i = raw_text_end(source, body, &name).0;
                    continue;
                }
                None
            }
            b'<' if matches!(rest.first(), Some(b'/' | b'!' | b'?')) => None,
            b'<' => Some("&lt;"),
            _ => None,
        };
        if let Some(replacement) = replacement {
            out.push_str(&source[copied..i]);
            out.push_str(replacement);
            i += if replacement == "<!DOCTYPE" { 9 } else { 1 };
            copied = i;
        } else {
            i += 1;
        }
    }
    if copied == 0 {
        return Cow::Borrowed(source);
    }
    out.push_str(&source[copied..]);
    Cow::Owned(out)
}

/// For a raw text element whose body starts at `from`, the offset where the
/// body ends and the offset just past its end tag. Without an end tag the
/// body runs to the end of `source`.
fn raw_text_end(source: &str, from: usize, name: &str) -> (usize, usize) {
    let closing = format!("</{}", name);
    let mut search = from;
    while let Some(pos) = find_ascii_ci(source, search, &closing) {
        let after = pos + closing.len();
        let boundary = source.as_bytes().get(after).is_none_or(|b| *b == b'>' || b.is_ascii_whitespace());
        if boundary {
            let resume = find_ascii_ci(source, after, ">").map_or(source.len(), |end| end + 1);
            return (pos, resume);
        }
        search = after;
    }
    (source.len(), source.len())
}

/// Byte offset of the first ASCII case-insensitive match of `needle` at or
/// after `from`
fn find_ascii_ci(source: &str, from: usize, needle: &str) -> Option<usize> {
    let haystack = source.as_bytes().get(from..)?;
    let needle = needle.as_bytes();
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
        .map(|pos| from + pos)
}

/// Maps byte offsets to 1-based line numbers; offsets must not go backwards
struct LineCounter<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(source: &'a str) -> Self {
        Self { bytes: source.as_bytes(), pos: 0, line: 1 }
    }

    fn line_at(&mut self, offset: usize) -> usize {
        let end = offset.min(self.bytes.len());
        if end > self.pos {
            self.line += self.bytes[self.pos..end].iter().filter(|b| **b == b'\n').count();
            self.pos = end;
        }
        self.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ordinary_markup() {
        let source = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>T</title></head>\n<body><p class=\"x\">a &amp; b<br/>c</p><!-- note --></body></html>";
        let doc = Document::parse(source, "/t.html");
        assert_eq!(
            doc.to_html(),
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>T</title></head>\n<body><p class=\"x\">a &amp; b<br>c</p><!-- note --></body></html>"
        );
    }

    #[test]
    fn records_line_numbers() {
        let doc = Document::parse("<div>\n\n<span>x</span>\n</div>", "/t.html");
        let span = doc.find_element(Document::ROOT, "span").unwrap();
        assert_eq!(doc.element(span).unwrap().line, 3);
    }

    #[test]
    fn valueless_attributes_and_case() {
        let doc = Document::parse("<REPLACE-WITH div X-Title='t'></REPLACE-WITH>", "/t.html");
        let id = doc.first_child(Document::ROOT).unwrap();
        let element = doc.element(id).unwrap();
        assert_eq!(element.name, "replace-with");
        assert_eq!(element.attrs[0], ("div".to_string(), String::new()));
        assert_eq!(element.attr("x-title"), Some("t"));
    }

    #[test]
    fn pre_inside_code_is_raw_text() {
        let doc = Document::parse("<code><pre># Title\n\n<b>bold</b> &amp; more</pre></code>", "/t.html");
        let pre = doc.find_element(Document::ROOT, "pre").unwrap();
        assert!(doc.find_element(pre, "b").is_none());
        assert_eq!(doc.text_content(pre), "# Title\n\n<b>bold</b> & more");
    }

    #[test]
    fn unwrap_moves_children_into_place() {
        let mut doc = Document::parse("<div><i>a</i><span><b>1</b><b>2</b></span><i>z</i></div>", "/t.html");
        let span = doc.find_element(Document::ROOT, "span").unwrap();
        let moved = doc.unwrap(span);
        assert_eq!(moved.len(), 2);
        assert_eq!(doc.to_html(), "<div><i>a</i><b>1</b><b>2</b><i>z</i></div>");
        assert!(!doc.is_attached(span));
    }

    #[test]
    fn following_skips_subtree() {
        let doc = Document::parse("<a><b><c></c></b><d></d></a>", "/t.html");
        let b = doc.find_element(Document::ROOT, "b").unwrap();
        let d = doc.find_element(Document::ROOT, "d").unwrap();
        assert_eq!(doc.following(b, Document::ROOT), Some(d));
        assert_eq!(doc.following(d, Document::ROOT), None);
    }

    #[test]
    fn bare_ampersand_and_angle_bracket_are_text() {
        let doc = Document::parse("<p>Tom & Jerry</p>\n<p>a < b</p>\n<p id=\"z\">3 &lt; 4</p>", "/t.html");
        assert_eq!(
            doc.to_html(),
            "<p>Tom &amp; Jerry</p>\n<p>a &lt; b</p>\n<p id=\"z\">3 &lt; 4</p>"
        );
        let first = doc.find_element(Document::ROOT, "p").unwrap();
        assert_eq!(doc.text_content(first), "Tom & Jerry");
    }

    #[test]
    fn lowercase_doctype() {
        let doc = Document::parse("<!doctype html>\n<p>x</p>", "/t.html");
        assert_eq!(doc.to_html(), "<!DOCTYPE html>\n<p>x</p>");
    }

    #[test]
    fn unknown_entities_in_attributes_survive() {
        let doc = Document::parse("<p title=\"a&nbsp;b\" data-x=\"1 &amp; 2\" data-y=\"&#65;\"></p>", "/t.html");
        let p = doc.find_element(Document::ROOT, "p").unwrap();
        let element = doc.element(p).unwrap();
        assert_eq!(element.attr("title"), Some("a&nbsp;b"));
        assert_eq!(element.attr("data-x"), Some("1 & 2"));
        assert_eq!(element.attr("data-y"), Some("A"));
        assert_eq!(doc.to_html(), "<p title=\"a&nbsp;b\" data-x=\"1 &amp; 2\" data-y=\"A\"></p>");
    }

    #[test]
    fn script_bodies_are_not_parsed() {
        let source = "<script>if (a < b && c) { x = '<p>'; }</script><p>after</p>";
        let doc = Document::parse(source, "/t.html");
        assert_eq!(doc.to_html(), source);
        let script = doc.find_element(Document::ROOT, "script").unwrap();
        assert!(doc.find_element(script, "p").is_none());
    }

    #[test]
    fn unreadable_tail_is_kept_as_text() {
        let doc = Document::parse("<p>ok</p><div class=\"x", "/t.html");
        let html = doc.to_html();
        assert!(html.starts_with("<p>ok</p>"));
        assert!(html.contains("&lt;div"));
    }

    #[test]
    fn sibling_links_follow_mutations() {
        let mut doc = Document::parse("<a><b></b><c></c><d></d></a>", "/t.html");
        let a = doc.find_element(Document::ROOT, "a").unwrap();
        let b = doc.find_element(Document::ROOT, "b").unwrap();
        let c = doc.find_element(Document::ROOT, "c").unwrap();
        let d = doc.find_element(Document::ROOT, "d").unwrap();
        let x = doc.create(NodeData::Element(Element::new("x", 1)));
        doc.replace(c, x);
        assert_eq!(doc.next_sibling(b), Some(x));
        assert_eq!(doc.next_sibling(x), Some(d));
        doc.detach(b);
        assert_eq!(doc.first_child(a), Some(x));
        assert_eq!(doc.children(a).collect::<Vec<_>>(), vec![x, d]);
        assert_eq!(doc.to_html(), "<a><x></x><d></d></a>");
        assert!(!doc.is_attached(c));
    }
}
