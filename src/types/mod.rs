use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;

use crate::errors::Status;

/// What kind of filesystem object backs an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// How an entry's content is turned into a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renderability {
    Html,
    Markdown,
    Static,
}

impl Renderability {
    /// Classify a content path by its extension
    pub fn for_path(content_path: &str) -> Self {
        let ext = content_path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "html" | "htm" => Renderability::Html,
            "md" | "markdown" => Renderability::Markdown,
            _ => Renderability::Static,
        }
    }
}

/// Raw bytes of an entry plus the layer directory that supplied them
#[derive(Debug, Clone)]
pub struct OriginalContent {
    pub bytes: Vec<u8>,
    pub layer: PathBuf,
}

impl OriginalContent {
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

/// Metadata derived while indexing an entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryMeta {
    pub title: Option<String>,
    pub keywords: Vec<String>,
    pub nocontainer: bool,
    pub content_type: Option<String>,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamps {
    pub accessed: Option<OffsetDateTime>,
    pub created: Option<OffsetDateTime>,
    pub modified: Option<OffsetDateTime>,
}

/// One indexed document, keyed by its content path
///
/// Entries are replaced wholesale on update and shared behind `Arc`, so a
/// returned entry is a snapshot that never changes underneath the caller.
#[derive(Debug, Clone)]
pub struct Entry {
    pub content_path: String,
    pub name: String,
    pub kind: EntryKind,
    pub original_content: OriginalContent,
    pub meta: EntryMeta,
    pub renderability: Renderability,
    pub links: Vec<String>,
    pub timestamps: Timestamps,
}

impl Entry {
    pub fn title(&self) -> Option<&str> {
        self.meta.title.as_deref()
    }

    pub fn text(&self) -> Option<&str> {
        self.original_content.text()
    }
}

pub type SharedEntry = Arc<Entry>;

/// Where a parameter value came from; kept for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSource {
    Derived,
    QueryParam,
    RequestBody,
    UrlFacts,
    ServerConfigured,
}

impl fmt::Display for ParameterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterSource::Derived => "derived",
            ParameterSource::QueryParam => "query param",
            ParameterSource::RequestBody => "request body",
            ParameterSource::UrlFacts => "url facts",
            ParameterSource::ServerConfigured => "server configured",
        };
        f.write_str(name)
    }
}

/// Request and template state, tagged with provenance at every level
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Leaf {
        value: String,
        source: ParameterSource,
    },
    Node {
        children: BTreeMap<String, ParameterValue>,
        source: ParameterSource,
    },
}

impl ParameterValue {
    pub fn leaf(value: impl Into<String>, source: ParameterSource) -> Self {
        ParameterValue::Leaf { value: value.into(), source }
    }

    pub fn node(source: ParameterSource) -> Self {
        ParameterValue::Node { children: BTreeMap::new(), source }
    }

    pub fn source(&self) -> ParameterSource {
        match self {
            ParameterValue::Leaf { source, .. } | ParameterValue::Node { source, .. } => *source,
        }
    }

    pub fn as_leaf(&self) -> Option<&str> {
        match self {
            ParameterValue::Leaf { value, .. } => Some(value),
            ParameterValue::Node { .. } => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        match self {
            ParameterValue::Node { children, .. } => children.get(key),
            ParameterValue::Leaf { .. } => None,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Leaf value of a direct child
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ParameterValue::as_leaf)
    }

    /// Follow a dotted path; `None` as soon as a segment is missing
    pub fn lookup(&self, dotted: &str) -> Option<&ParameterValue> {
        dotted
            .split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |current, segment| current.get(segment))
    }

    /// Insert or overwrite a direct child. A leaf receiving children becomes a
    /// node with the leaf's source.
    pub fn set(&mut self, key: impl Into<String>, value: ParameterValue) {
        let key = key.into();
        if let ParameterValue::Leaf { value: old, source } = self {
            log::debug!("Parameter leaf '{}' ({}) replaced by a node to hold '{}'", old, source, key);
            *self = ParameterValue::node(*source);
        }
        if let ParameterValue::Node { children, .. } = self {
            if let Some(prior) = children.insert(key.clone(), value) {
                match &prior {
                    ParameterValue::Leaf { value, source } => {
                        log::debug!("Parameter '{}' overwritten; prior value '{}' from {}", key, value, source)
                    }
                    ParameterValue::Node { source, .. } => {
                        log::debug!("Parameter '{}' overwritten; prior subtree from {}", key, source)
                    }
                }
            }
        }
    }

    /// Insert along a dotted path, creating intermediate nodes as needed
    pub fn set_path(&mut self, dotted: &str, value: ParameterValue) {
        let mut segments: Vec<&str> = dotted.split('.').filter(|s| !s.is_empty()).collect();
        let Some(last) = segments.pop() else {
            return;
        };
        let mut current = self;
        for segment in segments {
            let source = current.source();
            if current.get(segment).is_none_or(|child| child.as_leaf().is_some()) {
                current.set(segment, ParameterValue::node(source));
            }
            current = match current {
                ParameterValue::Node { children, .. } => match children.get_mut(segment) {
                    Some(child) => child,
                    None => return,
                },
                ParameterValue::Leaf { .. } => return,
            };
        }
        current.set(last, value);
    }

    /// Overlay every child of `other` onto `self`
    pub fn merge(&mut self, other: ParameterValue) {
        if let ParameterValue::Node { children, .. } = other {
            for (key, value) in children {
                self.set(key, value);
            }
        }
    }
}

impl Default for ParameterValue {
    fn default() -> Self {
        ParameterValue::node(ParameterSource::Derived)
    }
}

/// Operations the excluded HTTP layer can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Create,
    Read,
    Update,
    Delete,
}

/// Result of `execute`
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub content: Vec<u8>,
    pub content_type: String,
    pub content_path: Option<String>,
}

impl Response {
    pub fn ok(content: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            content: content.into(),
            content_type: content_type.into(),
            content_path: None,
        }
    }

    pub fn with_content_path(mut self, content_path: impl Into<String>) -> Self {
        self.content_path = Some(content_path.into());
        self
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ParameterValue {
        let mut root = ParameterValue::node(ParameterSource::UrlFacts);
        root.set("contentPath", ParameterValue::leaf("/a.html", ParameterSource::UrlFacts));
        root.set_path("user.name", ParameterValue::leaf("ada", ParameterSource::QueryParam));
        root
    }

    #[test]
    fn dotted_lookup_finds_leaves() {
        let root = params();
        assert_eq!(root.lookup("user.name").and_then(ParameterValue::as_leaf), Some("ada"));
        assert_eq!(root.get_str("contentPath"), Some("/a.html"));
    }

    #[test]
    fn dotted_lookup_is_absent_for_missing_segments() {
        let root = params();
        assert!(root.lookup("user.age").is_none());
        assert!(root.lookup("nobody.name").is_none());
        assert!(root.lookup("contentPath.deeper").is_none());
    }

    #[test]
    fn overwrite_replaces_value_and_source() {
        let mut root = params();
        root.set("contentPath", ParameterValue::leaf("/b.html", ParameterSource::RequestBody));
        let child = root.get("contentPath").unwrap();
        assert_eq!(child.as_leaf(), Some("/b.html"));
        assert_eq!(child.source(), ParameterSource::RequestBody);
    }

    #[test]
    fn set_path_turns_leaf_into_node() {
        let mut root = params();
        root.set_path("contentPath.extra", ParameterValue::leaf("x", ParameterSource::Derived));
        assert_eq!(root.lookup("contentPath.extra").and_then(ParameterValue::as_leaf), Some("x"));
    }

    #[test]
    fn renderability_by_extension() {
        assert_eq!(Renderability::for_path("/a/b.HTML"), Renderability::Html);
        assert_eq!(Renderability::for_path("/notes.md"), Renderability::Markdown);
        assert_eq!(Renderability::for_path("/logo.png"), Renderability::Static);
        assert_eq!(Renderability::for_path("/folder"), Renderability::Static);
    }
}
