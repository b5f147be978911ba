//! `select=` fragment extraction over rendered markup.

use std::cell::Cell;
use std::rc::Rc;

use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings, Selector};

use crate::errors::{Result, WikiError};

const START_MARK: &str = "<!--layerwiki:fragment-start-->";
const END_MARK: &str = "<!--layerwiki:fragment-end-->";

/// A validated CSS selector naming the fragment a caller wants back
#[derive(Debug, Clone)]
pub struct FragmentSelector {
    source: String,
}

impl FragmentSelector {
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        source
            .parse::<Selector>()
            .map_err(|e| WikiError::Validation(vec![format!("invalid selector '{}': {}", source, e)]))?;
        Ok(Self { source: source.to_string() })
    }

    /// Inner markup of the first element in `html` matching this selector,
    /// or `None` when nothing matches
    pub fn inner_html_of_first(&self, html: &str) -> Result<Option<String>> {
        let matched = Rc::new(Cell::new(false));

        let marked = rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![element!(self.source.as_str(), {
                    let matched = Rc::clone(&matched);
                    move |el| {
                        if matched.replace(true) {
                            return Ok(());
                        }
                        if el.can_have_content() {
                            el.prepend(START_MARK, ContentType::Html);
                            el.append(END_MARK, ContentType::Html);
                        }
                        Ok(())
                    }
                })],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|e| WikiError::Internal(format!("selecting '{}' failed: {}", self.source, e)))?;

        if !matched.get() {
            return Ok(None);
        }
        let inner = marked
            .split_once(START_MARK)
            .and_then(|(_, rest)| rest.split_once(END_MARK))
            .map(|(inner, _)| inner.to_string())
            .unwrap_or_default();
        Ok(Some(inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inner(html: &str, selector: &str) -> Option<String> {
        FragmentSelector::parse(selector).unwrap().inner_html_of_first(html).unwrap()
    }

    #[test]
    fn selects_by_id_class_and_tag() {
        let html = "<body><div class=\"a b\">one</div><p id=\"main\"><i>two</i></p></body>";
        assert_eq!(inner(html, "#main").as_deref(), Some("<i>two</i>"));
        assert_eq!(inner(html, "div.b").as_deref(), Some("one"));
        assert_eq!(inner(html, "p i").as_deref(), Some("two"));
        assert_eq!(inner(html, "span, p > i").as_deref(), Some("two"));
    }

    #[test]
    fn child_combinator_is_strict() {
        let html = "<section><div><em>deep</em></div></section>";
        assert_eq!(inner(html, "section > em"), None);
        assert_eq!(inner(html, "section em").as_deref(), Some("deep"));
    }

    #[test]
    fn first_match_wins_even_when_nested() {
        let html = "<div class=\"x\">a<div class=\"x\">b</div></div><div class=\"x\">c</div>";
        assert_eq!(inner(html, ".x").as_deref(), Some("a<div class=\"x\">b</div>"));
    }

    #[test]
    fn void_match_is_empty() {
        assert_eq!(inner("<p>a<br>b</p>", "br").as_deref(), Some(""));
    }

    #[test]
    fn attribute_selectors() {
        let html = "<a href=\"/x\">x</a><a data-k=\"v w\">y</a>";
        assert_eq!(inner(html, "a[data-k='v w']").as_deref(), Some("y"));
        assert_eq!(inner(html, "[href]").as_deref(), Some("x"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(FragmentSelector::parse("div >"), Err(WikiError::Validation(_))));
        assert!(FragmentSelector::parse("a[href").is_err());
    }
}
