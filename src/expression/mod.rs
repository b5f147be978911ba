//! Expressions embedded in directive attributes.
//!
//! Sources are parsed into [`Expr`] trees and evaluated against a fixed set
//! of bindings. Nothing outside that set is reachable from markup.

mod parser;

use std::fmt;

use time::OffsetDateTime;

use crate::errors::{Result, WikiError};
use crate::services::content_cache::ContentCache;
use crate::types::{EntryKind, ParameterSource, ParameterValue, SharedEntry};
use crate::utils::{escape_attr, escape_html, format_timestamp};

pub use parser::{parse_expression, Expr};

/// Functions reachable from expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    And,
    Or,
    Not,
    Now,
    Pipeline,
    Render,
    Links,
    Search,
    Backlinks,
    Keyword,
    Lookup,
}

impl Builtin {
    fn global(name: &str) -> Option<Self> {
        let builtin = match name {
            "and" => Builtin::And,
            "or" => Builtin::Or,
            "not" => Builtin::Not,
            "now" => Builtin::Now,
            "pipeline" => Builtin::Pipeline,
            "render" => Builtin::Render,
            "links" => Builtin::Links,
            _ => return None,
        };
        Some(builtin)
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Absent,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Value>),
    Entry(SharedEntry),
    Params(ParameterValue),
    Site,
    Function(Builtin),
}

impl Value {
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Absent => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Text(text) => !text.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Params(ParameterValue::Leaf { value, .. }) => !value.is_empty(),
            Value::Entry(_) | Value::Params(_) | Value::Site | Value::Function(_) => true,
        }
    }

    /// String form used when a value lands in markup
    pub fn to_text(&self) -> String {
        match self {
            Value::Absent => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Text(text) => text.clone(),
            Value::List(items) => items.iter().map(Value::to_text).collect::<Vec<_>>().join(", "),
            Value::Entry(entry) => entry.content_path.clone(),
            Value::Params(ParameterValue::Leaf { value, .. }) => value.clone(),
            Value::Params(ParameterValue::Node { .. }) => String::new(),
            Value::Site => String::new(),
            Value::Function(builtin) => format!("{:?}", builtin).to_lowercase(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// What an expression can see
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub cache: Option<&'a ContentCache>,
    pub params: &'a ParameterValue,
    /// Nesting level of `render()` calls
    pub depth: usize,
    pub max_depth: usize,
}

pub struct Evaluator<'a> {
    scope: Scope<'a>,
}

impl<'a> Evaluator<'a> {
    pub fn new(scope: Scope<'a>) -> Self {
        Self { scope }
    }

    /// Parse and evaluate in one step
    pub fn evaluate(&self, source: &str) -> Result<Value> {
        let expr = parse_expression(source)
            .map_err(|e| WikiError::Expression(format!("cannot parse '{}': {}", source, e)))?;
        self.eval(&expr)
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Str(text) => Ok(Value::Text(text.clone())),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Ident(name) => self.resolve(name),
            Expr::Member(target, name) => {
                let target = self.eval(target)?;
                Ok(self.member(target, name))
            }
            Expr::Call(callee, args) => {
                let builtin = match self.eval(callee)? {
                    Value::Function(builtin) => builtin,
                    other => {
                        return Err(WikiError::Expression(format!(
                            "'{}' is not callable",
                            describe(callee, &other)
                        )));
                    }
                };
                // and/or short-circuit, so their arguments are evaluated lazily
                match builtin {
                    Builtin::And => {
                        for arg in args {
                            if !self.eval(arg)?.is_truthy() {
                                return Ok(Value::Bool(false));
                            }
                        }
                        Ok(Value::Bool(true))
                    }
                    Builtin::Or => {
                        for arg in args {
                            if self.eval(arg)?.is_truthy() {
                                return Ok(Value::Bool(true));
                            }
                        }
                        Ok(Value::Bool(false))
                    }
                    _ => {
                        let values = args.iter().map(|arg| self.eval(arg)).collect::<Result<Vec<_>>>()?;
                        self.call(builtin, values)
                    }
                }
            }
        }
    }

    fn resolve(&self, name: &str) -> Result<Value> {
        match name {
            "params" => Ok(Value::Params(self.scope.params.clone())),
            "site" => Ok(Value::Site),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "null" | "undefined" => Ok(Value::Absent),
            _ => Builtin::global(name)
                .map(Value::Function)
                .ok_or_else(|| WikiError::Expression(format!("unknown name '{}'", name))),
        }
    }

    fn member(&self, target: Value, name: &str) -> Value {
        match (target, name) {
            (Value::Params(params), _) => match params.get(name) {
                Some(ParameterValue::Leaf { value, .. }) => Value::Text(value.clone()),
                Some(node) => Value::Params(node.clone()),
                None => Value::Absent,
            },
            (Value::Site, "allFiles") => {
                let entries = self.scope.cache.map(ContentCache::all_files).unwrap_or_default();
                entry_list(entries)
            }
            (Value::Site, "search") => Value::Function(Builtin::Search),
            (Value::Site, "backlinks") => Value::Function(Builtin::Backlinks),
            (Value::Site, "keyword") => Value::Function(Builtin::Keyword),
            (Value::Site, "entry") => Value::Function(Builtin::Lookup),
            (Value::Entry(entry), "contentPath" | "path") => Value::Text(entry.content_path.clone()),
            (Value::Entry(entry), "name") => Value::Text(entry.name.clone()),
            (Value::Entry(entry), "title") => {
                entry.title().map(|t| Value::Text(t.to_string())).unwrap_or(Value::Absent)
            }
            (Value::Entry(entry), "keywords") => {
                Value::List(entry.meta.keywords.iter().cloned().map(Value::Text).collect())
            }
            (Value::Entry(entry), "links") => {
                Value::List(entry.links.iter().cloned().map(Value::Text).collect())
            }
            (Value::Entry(entry), "modified") => entry
                .timestamps
                .modified
                .map(|at| Value::Text(format_timestamp(at)))
                .unwrap_or(Value::Absent),
            (Value::Entry(entry), "isDirectory") => Value::Bool(entry.kind == EntryKind::Directory),
            (Value::List(items), "length") => Value::Number(items.len() as f64),
            (Value::List(items), "first") => items.into_iter().next().unwrap_or(Value::Absent),
            (Value::Text(text), "length") => Value::Number(text.chars().count() as f64),
            _ => Value::Absent,
        }
    }

    pub fn call(&self, builtin: Builtin, args: Vec<Value>) -> Result<Value> {
        if builtin == Builtin::Pipeline {
            return self.pipeline(args);
        }
        let mut args = args.into_iter();
        let mut next = || args.next().unwrap_or(Value::Absent);
        match builtin {
            Builtin::And => {
                let first = next();
                let second = next();
                Ok(Value::Bool(first.is_truthy() && second.is_truthy()))
            }
            Builtin::Or => {
                let first = next();
                let second = next();
                Ok(Value::Bool(first.is_truthy() || second.is_truthy()))
            }
            Builtin::Not => Ok(Value::Bool(!next().is_truthy())),
            Builtin::Now => Ok(Value::Text(format_timestamp(OffsetDateTime::now_utc()))),
            Builtin::Pipeline => Ok(Value::Absent),
            Builtin::Render => {
                let path = next();
                let params = next();
                let selector = next();
                self.render(path, params, selector)
            }
            Builtin::Links => Ok(Value::Text(links_html(&next()))),
            Builtin::Search => {
                let query = next().to_text();
                let found = self.scope.cache.map(|cache| cache.search(&query)).unwrap_or_default();
                Ok(entry_list(found))
            }
            Builtin::Backlinks => {
                let target = match next() {
                    Value::Entry(entry) => entry.content_path.clone(),
                    other => other.to_text(),
                };
                let found = self.scope.cache.map(|cache| cache.backlinks_of(&target)).unwrap_or_default();
                Ok(entry_list(found))
            }
            Builtin::Keyword => {
                let keyword = next().to_text();
                let found = self.scope.cache.map(|cache| cache.with_keyword(&keyword)).unwrap_or_default();
                Ok(entry_list(found))
            }
            Builtin::Lookup => {
                let key = next().to_text();
                Ok(self
                    .scope
                    .cache
                    .and_then(|cache| cache.get_by_path_or_title(&key))
                    .map(Value::Entry)
                    .unwrap_or(Value::Absent))
            }
        }
    }

    /// Thread a value through `steps`: functions are applied to the running
    /// value, anything else replaces it. No arguments yields absent.
    pub fn pipeline(&self, args: Vec<Value>) -> Result<Value> {
        let mut args = args.into_iter();
        let Some(mut current) = args.next() else {
            return Ok(Value::Absent);
        };
        for step in args {
            current = match step {
                Value::Function(builtin) => self.call(builtin, vec![current])?,
                other => other,
            };
        }
        Ok(current)
    }

    fn render(&self, path: Value, params: Value, selector: Value) -> Result<Value> {
        let Some(cache) = self.scope.cache else {
            return Ok(Value::Absent);
        };
        let path = match path {
            Value::Entry(entry) => entry.content_path.clone(),
            other => other.to_text(),
        };
        if self.scope.depth >= self.scope.max_depth {
            return Err(WikiError::Expression(format!(
                "render('{}') nested deeper than {} levels",
                path, self.scope.max_depth
            )));
        }
        let entry = cache
            .get_by_path_or_title(&path)
            .ok_or_else(|| WikiError::MissingFile(path.clone()))?;
        let nested_params = match params {
            Value::Params(params) => params,
            _ => ParameterValue::node(ParameterSource::Derived),
        };
        let selector = Some(selector.to_text()).filter(|s| !s.is_empty());
        let scope = Scope {
            cache: Some(cache),
            params: &nested_params,
            depth: self.scope.depth + 1,
            max_depth: self.scope.max_depth,
        };
        let rendered = crate::handlers::render_entry(scope, &entry, selector.as_deref(), None)?;
        Ok(Value::Text(String::from_utf8_lossy(&rendered.content).into_owned()))
    }
}

fn entry_list(entries: Vec<SharedEntry>) -> Value {
    Value::List(entries.into_iter().map(Value::Entry).collect())
}

fn describe(expr: &Expr, value: &Value) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member(_, name) => name.clone(),
        _ => value.to_text(),
    }
}

/// `<ul>` of links for a list of entries or paths
fn links_html(value: &Value) -> String {
    let items: Vec<&Value> = match value {
        Value::List(items) => items.iter().collect(),
        Value::Absent => Vec::new(),
        single => vec![single],
    };
    let mut html = String::from("<ul>");
    for item in items {
        let (href, label) = match item {
            Value::Entry(entry) => (
                entry.content_path.clone(),
                entry.title().unwrap_or(&entry.content_path).to_string(),
            ),
            other => (other.to_text(), other.to_text()),
        };
        html.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>",
            escape_attr(&href),
            escape_html(&label)
        ));
    }
    html.push_str("</ul>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ParameterValue {
        let mut params = ParameterValue::node(ParameterSource::UrlFacts);
        params.set("contentPath", ParameterValue::leaf("/a.html", ParameterSource::UrlFacts));
        params.set_path("user.name", ParameterValue::leaf("ada", ParameterSource::QueryParam));
        params.set("empty", ParameterValue::leaf("", ParameterSource::QueryParam));
        params
    }

    fn eval(source: &str) -> Value {
        let params = params();
        let scope = Scope { cache: None, params: &params, depth: 0, max_depth: 4 };
        Evaluator::new(scope).evaluate(source).unwrap()
    }

    #[test]
    fn parameter_lookup_never_throws() {
        assert_eq!(eval("params.user.name").to_text(), "ada");
        assert!(eval("params.user.age").is_absent());
        assert!(eval("params.nobody.at.all").is_absent());
        assert!(!eval("params.empty").is_truthy());
    }

    #[test]
    fn boolean_combinators() {
        assert!(eval("and(params.user.name, true)").is_truthy());
        assert!(!eval("and(params.user.name, params.missing)").is_truthy());
        assert!(eval("or(params.missing, 'x')").is_truthy());
        assert!(eval("not(params.missing)").is_truthy());
        assert!(!eval("0").is_truthy());
        assert!(!eval("null").is_truthy());
    }

    #[test]
    fn pipeline_applies_function_steps() {
        assert!(eval("pipeline()").is_absent());
        assert_eq!(eval("pipeline('seed')").to_text(), "seed");
        assert_eq!(eval("pipeline(params.missing, not)").to_text(), "true");
        assert_eq!(eval("pipeline('a', 'b')").to_text(), "b");
    }

    #[test]
    fn members_on_lists_and_text() {
        assert_eq!(eval("site.allFiles.length").to_text(), "0");
        assert_eq!(eval("'wiki'.length").to_text(), "4");
        assert!(eval("site.search('anything').first").is_absent());
    }

    #[test]
    fn now_is_rfc3339() {
        let now = eval("now()").to_text();
        assert!(now.contains('T'));
    }

    #[test]
    fn errors_for_unknown_names_and_non_functions() {
        let params = params();
        let scope = Scope { cache: None, params: &params, depth: 0, max_depth: 4 };
        let evaluator = Evaluator::new(scope);
        assert!(evaluator.evaluate("window.alert('x')").is_err());
        assert!(evaluator.evaluate("params.user()").is_err());
        assert!(evaluator.evaluate("params.").is_err());
    }

    #[test]
    fn links_render_escaped_list() {
        assert_eq!(eval("links('/a b.html')").to_text(), "<ul><li><a href=\"/a b.html\">/a b.html</a></li></ul>");
    }
}
