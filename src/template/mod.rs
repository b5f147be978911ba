//! Directive interpreter for HTML pages.
//!
//! A page is parsed into a [`Document`], walked once in document order and
//! rewritten in place as directives are met. The same walk collects the
//! page's outgoing links and metadata, so indexing and request rendering
//! share one code path and differ only in [`RenderMode`].

pub mod dom;
pub mod fragment;
pub mod walker;

use log::{debug, warn};

use crate::errors::{Result, WikiError};
use crate::expression::{parse_expression, Evaluator, Scope, Value};
use crate::services::markdown_service::{split_keywords, MarkdownService};
use crate::types::{EntryMeta, ParameterValue};
use crate::utils::escape_html;

use dom::{Document, Element, NodeData, NodeId};
use fragment::FragmentSelector;
use walker::{Flow, TreeWalker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Full rendering for a request; evaluation failures are fatal
    Request,
    /// Metadata extraction while indexing; evaluation failures degrade to absent
    Index,
}

/// Everything a single rendering pass needs to know
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub scope: Scope<'a>,
    /// Content path of the markup being interpreted, used in errors
    pub file: &'a str,
    /// Content path the entry-link slot points at
    pub entry_path: &'a str,
    /// Raw text the content slot is filled with, in edit mode
    pub edit_contents: Option<&'a str>,
    pub mode: RenderMode,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    pub html: String,
    /// `href` values exactly as authored
    pub links: Vec<String>,
    pub meta: EntryMeta,
}

/// Render `source` for a request. With a selector, only the inner markup of
/// the first matching element is returned.
pub fn render_document(source: &str, ctx: &RenderContext<'_>, selector: Option<&str>) -> Result<RenderOutput> {
    let selector = selector.map(FragmentSelector::parse).transpose()?;
    let doc = Document::parse(source, ctx.file);
    let mut interpreter = Interpreter::new(doc, ctx);
    interpreter.run(Document::ROOT)?;
    interpreter.finish(selector.as_ref())
}

/// Walk `source` from its `<head>` to collect links and metadata without a
/// request context
pub fn extract_metadata(source: &str, file: &str) -> Result<RenderOutput> {
    let params = ParameterValue::default();
    let ctx = RenderContext {
        scope: Scope { cache: None, params: &params, depth: 0, max_depth: 0 },
        file,
        entry_path: file,
        edit_contents: None,
        mode: RenderMode::Index,
    };
    let doc = Document::parse(source, file);
    let start = doc.find_element(Document::ROOT, "head").unwrap_or(Document::ROOT);
    let mut interpreter = Interpreter::new(doc, &ctx);
    interpreter.run(start)?;
    interpreter.finish(None)
}

#[derive(Default)]
struct MetaCollector {
    meta: EntryMeta,
    meta_title: Option<String>,
    title_element: Option<String>,
    first_h1: Option<String>,
}

impl MetaCollector {
    fn record(&mut self, key: &str, value: &str) {
        match key {
            "title" => {
                if self.meta_title.is_none() && !value.trim().is_empty() {
                    self.meta_title = Some(value.trim().to_string());
                }
            }
            "keywords" => self.meta.keywords.extend(split_keywords(value)),
            "nocontainer" => self.meta.nocontainer = !value.eq_ignore_ascii_case("false"),
            _ => {
                self.meta.extra.insert(key.to_string(), value.to_string());
            }
        }
    }

    fn into_meta(mut self) -> EntryMeta {
        self.meta.title = self.meta_title.or(self.title_element).or(self.first_h1);
        self.meta
    }
}

struct Interpreter<'c, 'a> {
    doc: Document,
    ctx: &'c RenderContext<'a>,
    evaluator: Evaluator<'a>,
    links: Vec<String>,
    collector: MetaCollector,
    /// Traversal ends when it reaches this node
    boundary: Option<NodeId>,
}

impl<'c, 'a> Interpreter<'c, 'a> {
    fn new(doc: Document, ctx: &'c RenderContext<'a>) -> Self {
        Self {
            doc,
            ctx,
            evaluator: Evaluator::new(ctx.scope),
            links: Vec::new(),
            collector: MetaCollector::default(),
            boundary: None,
        }
    }

    fn run(&mut self, start: NodeId) -> Result<()> {
        let mut walker = TreeWalker::new(Document::ROOT, start);
        while let Some(id) = walker.current() {
            if Some(id) == self.boundary {
                debug!("Stopping traversal of {} at rewritten <body>", self.ctx.file);
                break;
            }
            let flow = match self.doc.element(id) {
                Some(element) => {
                    let element = element.clone();
                    self.visit(id, &element)?
                }
                None => Flow::Descend,
            };
            walker.apply(&self.doc, flow);
        }
        Ok(())
    }

    fn finish(self, selector: Option<&FragmentSelector>) -> Result<RenderOutput> {
        let html = self.doc.to_html();
        let html = match selector {
            Some(selector) => selector.inner_html_of_first(&html)?.unwrap_or_else(|| {
                debug!("Selector matched nothing in {}", self.ctx.file);
                String::new()
            }),
            None => html,
        };
        Ok(RenderOutput { html, links: self.links, meta: self.collector.into_meta() })
    }

    fn failure(&self, line: usize, message: impl Into<String>) -> WikiError {
        WikiError::directive(self.ctx.file, line, message)
    }

    fn visit(&mut self, id: NodeId, element: &Element) -> Result<Flow> {
        match element.name.as_str() {
            "a" => {
                if let Some(href) = element.attr("href").filter(|h| !h.is_empty()) {
                    self.links.push(href.to_string());
                }
                Ok(Flow::Descend)
            }
            "title" => {
                if self.collector.title_element.is_none() {
                    let text = self.doc.text_content(id).trim().to_string();
                    self.collector.title_element = Some(text).filter(|t| !t.is_empty());
                }
                Ok(Flow::Descend)
            }
            "h1" => {
                if self.collector.first_h1.is_none() {
                    let text = self.doc.text_content(id).trim().to_string();
                    self.collector.first_h1 = Some(text).filter(|t| !t.is_empty());
                }
                Ok(Flow::Descend)
            }
            "meta" => self.visit_meta(element),
            "slot" => self.visit_slot(id, element),
            "replace-with" => self.visit_replace_with(id, element),
            "query-content" => self.visit_query_content(id, element),
            "drop-if" => self.visit_conditional(id, element, false),
            "keep-if" => self.visit_conditional(id, element, true),
            _ => Ok(Flow::Descend),
        }
    }

    fn visit_meta(&mut self, element: &Element) -> Result<Flow> {
        let content = element.attr("content").unwrap_or("");
        if element.attr("itemprop") == Some("content-type") {
            self.collector.meta.content_type = Some(content.to_string());
            if content.eq_ignore_ascii_case("markdown") {
                self.render_markdown_body(element.line)?;
            } else {
                warn!("Unknown content-type '{}' in {}", content, self.ctx.file);
            }
            return Ok(Flow::Descend);
        }
        let key = element
            .attr("name")
            .or_else(|| element.attr("itemprop"))
            .or_else(|| element.attr("property"));
        if let Some(key) = key {
            self.collector.record(&key.to_ascii_lowercase(), content);
        }
        Ok(Flow::Descend)
    }

    /// Replace `<body>` with the Markdown held in its `<code><pre>` block
    fn render_markdown_body(&mut self, line: usize) -> Result<()> {
        let body = self
            .doc
            .find_element(Document::ROOT, "body")
            .ok_or_else(|| self.failure(line, "markdown content-type requires a <body>"))?;
        let pre = self
            .doc
            .descendants(body)
            .into_iter()
            .find(|id| {
                self.doc.is_element(*id, "pre")
                    && self.doc.parent(*id).is_some_and(|p| self.doc.is_element(p, "code"))
            })
            .ok_or_else(|| self.failure(line, "markdown content-type requires <code><pre> inside <body>"))?;

        let markdown = self.doc.text_content(pre);
        let rendered = MarkdownService::new().render(&markdown);
        for child in self.doc.take_children(body) {
            debug!("Dropping original body node {} of {}", child, self.ctx.file);
        }
        self.doc.parse_into(body, &rendered.html, self.ctx.file);

        for id in self.doc.descendants(body) {
            if let Some(element) = self.doc.element(id) {
                if element.name == "a" {
                    if let Some(href) = element.attr("href").filter(|h| !h.is_empty()) {
                        self.links.push(href.to_string());
                    }
                }
            }
        }
        if self.collector.first_h1.is_none() {
            self.collector.first_h1 = rendered.title;
        }
        self.boundary = Some(body);
        Ok(())
    }

    fn visit_slot(&mut self, id: NodeId, element: &Element) -> Result<Flow> {
        if let Some(name) = element.attr("name") {
            return Ok(match name {
                "content" => match self.ctx.edit_contents {
                    Some(contents) => {
                        let text = self.doc.create(NodeData::Text(escape_html(contents)));
                        self.replace_and_skip(id, text)
                    }
                    None => Flow::Descend,
                },
                "entry-link" => {
                    let mut anchor = Element::new("a", element.line);
                    anchor.set_attr("href", self.ctx.entry_path);
                    let anchor = self.doc.create(NodeData::Element(anchor));
                    let label = self.doc.create(NodeData::Text(escape_html(self.ctx.entry_path)));
                    self.doc.append(anchor, label);
                    self.replace_and_skip(id, anchor)
                }
                other => {
                    debug!("Leaving unknown slot '{}' in {}", other, self.ctx.file);
                    Flow::Descend
                }
            });
        }

        let keep = element.has_attr("keep");
        let remove = element.has_attr("remove");
        if keep == remove {
            warn!(
                "<slot> at {}:{} needs exactly one of keep or remove",
                self.ctx.file, element.line
            );
            return Ok(Flow::Descend);
        }
        let mut keeping = keep;
        match element.attr("if") {
            None => {}
            Some("raw") => {
                if !self.ctx.scope.params.has("raw") {
                    keeping = !keeping;
                }
            }
            Some(other) => warn!("Unknown slot guard '{}' at {}:{}", other, self.ctx.file, element.line),
        }
        Ok(if keeping { self.flatten(id) } else { self.remove(id) })
    }

    fn visit_replace_with(&mut self, id: NodeId, element: &Element) -> Result<Flow> {
        let mut attrs = element.attrs.iter();
        let Some((tag, value)) = attrs.next() else {
            return Err(self.failure(element.line, "REPLACE-WITH needs the replacement tag as its first attribute"));
        };
        if !value.is_empty() || !is_tag_name(tag) {
            return Err(self.failure(
                element.line,
                format!("REPLACE-WITH first attribute '{}' is not a bare tag name", tag),
            ));
        }

        let mut replacement = Element::new(tag.clone(), element.line);
        let mut content: Option<String> = None;
        for (key, value) in attrs {
            match key.strip_prefix("x-") {
                Some("") => return Err(self.failure(element.line, "REPLACE-WITH has an empty x- attribute")),
                Some("content") => content = Some(self.evaluate(element.line, value)?.to_text()),
                Some(name) => {
                    let evaluated = self.evaluate(element.line, value)?;
                    if !evaluated.is_absent() {
                        replacement.set_attr(name, evaluated.to_text());
                    }
                }
                None => replacement.set_attr(key, value.clone()),
            }
        }

        let after = self.doc.following(id, Document::ROOT);
        let new_id = self.doc.create(NodeData::Element(replacement));
        self.doc.replace(id, new_id);
        match content {
            Some(html) => {
                self.doc.parse_into(new_id, &html, self.ctx.file);
                Ok(Flow::Goto(after))
            }
            None => {
                for child in self.doc.take_children(id) {
                    self.doc.append(new_id, child);
                }
                Ok(Flow::Goto(self.doc.first_child(new_id).or(after)))
            }
        }
    }

    fn visit_query_content(&mut self, id: NodeId, element: &Element) -> Result<Flow> {
        let query = element
            .attr("q")
            .ok_or_else(|| self.failure(element.line, "QUERY-CONTENT requires a q attribute"))?;
        let value = self.evaluate(element.line, query)?;
        let text = value.to_text();
        if value.is_truthy() && !text.is_empty() {
            let node = self.doc.create(NodeData::Text(escape_html(&text)));
            Ok(self.replace_and_skip(id, node))
        } else {
            Ok(self.flatten(id))
        }
    }

    /// `keep_when` is true for KEEP-IF; DROP-IF inverts the decision
    fn visit_conditional(&mut self, id: NodeId, element: &Element, keep_when: bool) -> Result<Flow> {
        let (source, wanted) = match (element.attr("truthy"), element.attr("falsy")) {
            (Some(source), None) => (source, true),
            (None, Some(source)) => (source, false),
            _ => {
                return Err(self.failure(
                    element.line,
                    format!(
                        "{} needs exactly one of truthy= or falsy=",
                        element.name.to_ascii_uppercase()
                    ),
                ));
            }
        };
        let value = self.evaluate(element.line, source)?;
        let condition = value.is_truthy() == wanted;
        let keep = if keep_when { condition } else { !condition };
        Ok(if keep { self.flatten(id) } else { self.remove(id) })
    }

    fn evaluate(&self, line: usize, source: &str) -> Result<Value> {
        let expr = parse_expression(source)
            .map_err(|e| self.failure(line, format!("cannot parse expression '{}': {}", source, e)))?;
        match self.evaluator.eval(&expr) {
            Ok(value) => Ok(value),
            Err(e) if self.ctx.mode == RenderMode::Index => {
                debug!("Treating '{}' as absent while indexing {}: {}", source, self.ctx.file, e);
                Ok(Value::Absent)
            }
            Err(e @ WikiError::DirectiveFailure { .. }) => Err(e),
            Err(e) => Err(self.failure(line, e.to_string())),
        }
    }

    fn flatten(&mut self, id: NodeId) -> Flow {
        let after = self.doc.following(id, Document::ROOT);
        let moved = self.doc.unwrap(id);
        Flow::Goto(moved.first().copied().or(after))
    }

    fn remove(&mut self, id: NodeId) -> Flow {
        let after = self.doc.following(id, Document::ROOT);
        self.doc.detach(id);
        Flow::Goto(after)
    }

    fn replace_and_skip(&mut self, id: NodeId, replacement: NodeId) -> Flow {
        let after = self.doc.following(id, Document::ROOT);
        self.doc.replace(id, replacement);
        Flow::Goto(after)
    }
}

fn is_tag_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParameterSource;

    fn params() -> ParameterValue {
        let mut params = ParameterValue::node(ParameterSource::UrlFacts);
        params.set("contentPath", ParameterValue::leaf("/page.html", ParameterSource::UrlFacts));
        params.set("name", ParameterValue::leaf("Ada", ParameterSource::QueryParam));
        params
    }

    fn render_with(source: &str, params: &ParameterValue, edit: Option<&str>) -> Result<RenderOutput> {
        let ctx = RenderContext {
            scope: Scope { cache: None, params, depth: 0, max_depth: 4 },
            file: "/page.html",
            entry_path: "/target.html",
            edit_contents: edit,
            mode: RenderMode::Request,
        };
        render_document(source, &ctx, None)
    }

    fn render(source: &str) -> String {
        render_with(source, &params(), None).unwrap().html
    }

    #[test]
    fn keep_if_keeps_only_content() {
        assert_eq!(render("<keep-if truthy=\"params.name\">C</keep-if>"), "C");
        assert_eq!(render("<keep-if truthy=\"params.missing\">C</keep-if>"), "");
        assert_eq!(render("<keep-if falsy=\"params.missing\">C</keep-if>"), "C");
    }

    #[test]
    fn drop_if_inverts_keep_if() {
        assert_eq!(render("<drop-if truthy=\"params.name\">C</drop-if>"), "");
        assert_eq!(render("<drop-if truthy=\"params.missing\">C</drop-if>"), "C");
        assert_eq!(render("<drop-if falsy=\"params.name\">C</drop-if>"), "C");
    }

    #[test]
    fn nested_directives_inside_kept_content_run() {
        let html = render("<div><keep-if truthy=\"1\"><drop-if truthy=\"1\">x</drop-if><b>y</b></keep-if></div>");
        assert_eq!(html, "<div><b>y</b></div>");
    }

    #[test]
    fn query_content_falls_back_to_inner_markup() {
        assert_eq!(render("<p><query-content q=\"params.name\">anon</query-content></p>"), "<p>Ada</p>");
        assert_eq!(
            render("<p><query-content q=\"params.missing\"><i>anon</i></query-content></p>"),
            "<p><i>anon</i></p>"
        );
    }

    #[test]
    fn query_content_escapes_values() {
        let mut params = params();
        params.set("name", ParameterValue::leaf("<b>", ParameterSource::QueryParam));
        let html = render_with("<query-content q=\"params.name\"></query-content>", &params, None).unwrap().html;
        assert_eq!(html, "&lt;b&gt;");
    }

    #[test]
    fn replace_with_builds_new_element() {
        assert_eq!(
            render("<replace-with a class=\"c\" x-href=\"params.contentPath\" x-title=\"params.missing\">go <i>on</i></replace-with>"),
            "<a class=\"c\" href=\"/page.html\">go <i>on</i></a>"
        );
        assert_eq!(
            render("<replace-with span x-content=\"params.name\">old</replace-with>"),
            "<span>Ada</span>"
        );
    }

    #[test]
    fn replace_with_rejects_missing_tag() {
        let err = render_with("<div>\n<replace-with x-href=\"1\">x</replace-with></div>", &params(), None).unwrap_err();
        match err {
            WikiError::DirectiveFailure { file, line, .. } => {
                assert_eq!(file, "/page.html");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn conditional_needs_exactly_one_attribute() {
        assert!(render_with("<keep-if>x</keep-if>", &params(), None).is_err());
        assert!(render_with("<keep-if truthy=\"1\" falsy=\"1\">x</keep-if>", &params(), None).is_err());
        assert!(render_with("<keep-if truthy=\"params.\">x</keep-if>", &params(), None).is_err());
    }

    #[test]
    fn raw_guarded_slots() {
        let page = "<slot keep if=\"raw\">K</slot><slot remove if=\"raw\">R</slot>";
        assert_eq!(render(page), "R");
        let mut params = params();
        params.set("raw", ParameterValue::leaf("", ParameterSource::QueryParam));
        assert_eq!(render_with(page, &params, None).unwrap().html, "K");
        assert_eq!(render("<slot keep>a</slot><slot remove>b</slot>"), "a");
    }

    #[test]
    fn edit_slots() {
        let page = "<h1><slot name=\"entry-link\"></slot></h1><textarea><slot name=\"content\"></slot></textarea>";
        let html = render_with(page, &params(), Some("a < b")).unwrap().html;
        assert_eq!(
            html,
            "<h1><a href=\"/target.html\">/target.html</a></h1><textarea>a &lt; b</textarea>"
        );
        let html = render_with("<div><slot name=\"content\">old</slot></div>", &params(), None).unwrap().html;
        assert_eq!(html, "<div><slot name=\"content\">old</slot></div>");
    }

    #[test]
    fn markdown_marker_replaces_body() {
        let page = "<html><head><meta itemprop=\"content-type\" content=\"markdown\"></head>\n<body><code><pre># Notes\n\nSee [other](/other.html).\n</pre></code></body></html>";
        let out = render_with(page, &params(), None).unwrap();
        assert!(out.html.contains("<body><h1 id=\"notes\">Notes</h1>"));
        assert!(!out.html.contains("<pre>"));
        assert_eq!(out.links, vec!["/other.html"]);
        assert_eq!(out.meta.title.as_deref(), Some("Notes"));
    }

    #[test]
    fn markdown_marker_without_pre_fails_with_line() {
        let page = "<html><head>\n<meta itemprop=\"content-type\" content=\"markdown\"></head><body><p>x</p></body></html>";
        match render_with(page, &params(), None).unwrap_err() {
            WikiError::DirectiveFailure { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn metadata_title_precedence() {
        let out = extract_metadata(
            "<html><head><title>Tab</title><meta name=\"keywords\" content=\"a, b\"></head><body><h1>Head</h1><a href=\"/x.html\">x</a></body></html>",
            "/m.html",
        )
        .unwrap();
        assert_eq!(out.meta.title.as_deref(), Some("Tab"));
        assert_eq!(out.meta.keywords, vec!["a", "b"]);
        assert_eq!(out.links, vec!["/x.html"]);

        let out = extract_metadata(
            "<html><head><meta itemprop=\"title\" content=\"Meta\"><title>Tab</title></head><body><h1>Head</h1></body></html>",
            "/m.html",
        )
        .unwrap();
        assert_eq!(out.meta.title.as_deref(), Some("Meta"));

        let out = extract_metadata("<h1>HTML Wiki</h1>", "/index.html").unwrap();
        assert_eq!(out.meta.title.as_deref(), Some("HTML Wiki"));
    }

    #[test]
    fn indexing_tolerates_unresolvable_expressions() {
        let out = extract_metadata(
            "<body><h1>T</h1><query-content q=\"site.nothing.here(1)\">fallback</query-content></body>",
            "/m.html",
        )
        .unwrap();
        assert!(out.html.contains("fallback"));
    }

    #[test]
    fn selector_returns_inner_markup() {
        let ctx_params = params();
        let ctx = RenderContext {
            scope: Scope { cache: None, params: &ctx_params, depth: 0, max_depth: 4 },
            file: "/page.html",
            entry_path: "/page.html",
            edit_contents: None,
            mode: RenderMode::Request,
        };
        let out = render_document(
            "<body><div id=\"main\"><keep-if truthy=\"1\"><p>x</p></keep-if></div></body>",
            &ctx,
            Some("#main"),
        )
        .unwrap();
        assert_eq!(out.html, "<p>x</p>");
    }
}
