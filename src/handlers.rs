use axum::{
    extract::{Path as AxumPath, Query, State},
    http::header,
    response::IntoResponse,
};
use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{RwLock, RwLockReadGuard};

use crate::config::Config;
use crate::errors::{Result, Status, WikiError};
use crate::expression::Scope;
use crate::services::layered_store::relative_path;
use crate::services::{ContentCache, LayeredStore, MarkdownService};
use crate::template::{render_document, RenderContext, RenderMode};
use crate::types::{Command, Entry, EntryKind, ParameterSource, ParameterValue, Renderability, Response};
use crate::utils::{content_path_for_request, content_type_for, escape_attr, escape_html, parent_of};

const HTML: &str = "text/html; charset=utf-8";
const PLAIN: &str = "text/plain; charset=utf-8";

/// Output of the read pipeline for one entry
#[derive(Debug, Clone)]
pub struct Rendered {
    pub content: Vec<u8>,
    pub content_type: String,
}

impl Rendered {
    fn html(html: String) -> Self {
        Self { content: html.into_bytes(), content_type: HTML.to_string() }
    }
}

/// Target of an edit-mode read
#[derive(Debug, Clone, Copy)]
pub struct EditTarget<'a> {
    pub content_path: &'a str,
    pub contents: Option<&'a str>,
}

/// The wiki: a content cache over layered storage plus the command surface.
///
/// Reads share the cache; create, update and delete take it exclusively
/// so a write and its cache update are never observed half-done.
pub struct Wiki {
    config: Config,
    cache: RwLock<ContentCache>,
}

impl Wiki {
    /// Index all layers and build the wiki
    pub async fn load(config: Config) -> Result<Self> {
        info!("Loading wiki from layers {:?}", config.layers);
        let store = LayeredStore::new(config.layers.clone());
        let cache = ContentCache::load(store).await?;
        Ok(Self { config, cache: RwLock::new(cache) })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared view of the cache
    pub async fn cache(&self) -> RwLockReadGuard<'_, ContentCache> {
        self.cache.read().await
    }

    /// Run a command. Failures are reported through the response status,
    /// never as an error.
    pub async fn execute(&self, command: Command, params: ParameterValue) -> Response {
        let result = match command {
            Command::Read => self.read(&params).await,
            Command::Create => self.create(&params).await,
            Command::Update => self.update(&params).await,
            Command::Delete => self.delete(&params).await,
        };
        match result {
            Ok(response) => response,
            Err(e) => {
                let status = e.status();
                match status {
                    Status::Internal | Status::DirectiveFailed => error!("{:?} failed: {}", command, e),
                    _ => debug!("{:?} rejected: {}", command, e),
                }
                Response {
                    status,
                    content: e.to_string().into_bytes(),
                    content_type: PLAIN.to_string(),
                    content_path: None,
                }
            }
        }
    }

    async fn read(&self, params: &ParameterValue) -> Result<Response> {
        let content_path = required(params, &["contentPath"])?.remove(0);
        let cache = self.cache.read().await;

        let mut request_params = params.clone();
        request_params.set("server", self.config.server_parameters());
        let scope = Scope {
            cache: Some(&*cache),
            params: &request_params,
            depth: 0,
            max_depth: self.config.max_render_depth,
        };
        let selector = params.get_str("select").filter(|s| !s.trim().is_empty());

        if params.has("edit") {
            let template = cache
                .get_by_path_or_title(&self.config.edit_template)
                .ok_or_else(|| WikiError::MissingFile(self.config.edit_template.clone()))?;
            let target = cache.get_by_path_or_title(&content_path);
            let target_path = target
                .as_ref()
                .map(|entry| entry.content_path.clone())
                .unwrap_or_else(|| content_path.clone());
            let edit = EditTarget {
                content_path: &target_path,
                contents: target.as_ref().and_then(|entry| entry.text()),
            };
            debug!("Rendering edit template {} for {}", template.content_path, target_path);
            let rendered = render_entry(scope, &template, selector, Some(edit))?;
            return Ok(respond(rendered, &target_path));
        }

        let entry = cache
            .get_by_path_or_title(&content_path)
            .ok_or_else(|| WikiError::MissingFile(content_path.clone()))?;
        let rendered = render_entry(scope, &entry, selector, None)?;

        let wrap = entry.renderability == Renderability::Markdown
            && !entry.meta.nocontainer
            && selector.is_none();
        let rendered = match (&self.config.markdown_container, wrap) {
            (Some(container), true) => self.wrap_in_container(&cache, &request_params, &entry, container, rendered)?,
            _ => rendered,
        };
        Ok(respond(rendered, &entry.content_path))
    }

    fn wrap_in_container(
        &self,
        cache: &ContentCache,
        request_params: &ParameterValue,
        entry: &Entry,
        container: &str,
        rendered: Rendered,
    ) -> Result<Rendered> {
        let Some(template) = cache.get_by_path_or_title(container) else {
            warn!("Markdown container {} does not exist, serving bare page", container);
            return Ok(rendered);
        };
        let mut params = request_params.clone();
        let body = String::from_utf8_lossy(&rendered.content).into_owned();
        params.set_path("page.body", ParameterValue::leaf(body, ParameterSource::Derived));
        params.set_path(
            "page.contentPath",
            ParameterValue::leaf(entry.content_path.clone(), ParameterSource::Derived),
        );
        if let Some(title) = entry.title() {
            params.set_path("page.title", ParameterValue::leaf(title, ParameterSource::Derived));
        }
        let scope = Scope {
            cache: Some(cache),
            params: &params,
            depth: 0,
            max_depth: self.config.max_render_depth,
        };
        render_entry(scope, &template, None, None)
    }

    async fn create(&self, params: &ParameterValue) -> Result<Response> {
        let (content_path, content) = write_arguments(params)?;
        let mut cache = self.cache.write().await;
        let entry = cache.create_file_and_directories(&content_path, &content).await?;
        Ok(Response::ok(format!("created {}", entry.content_path), PLAIN).with_content_path(content_path))
    }

    async fn update(&self, params: &ParameterValue) -> Result<Response> {
        let (content_path, content) = write_arguments(params)?;
        let mut cache = self.cache.write().await;
        let entry = cache.update_file(&content_path, &content).await?;
        Ok(Response::ok(format!("updated {}", entry.content_path), PLAIN).with_content_path(content_path))
    }

    async fn delete(&self, params: &ParameterValue) -> Result<Response> {
        let content_path = required(params, &["contentPath"])?.remove(0);
        relative_path(&content_path)?;
        let mut cache = self.cache.write().await;
        cache.remove_file(&content_path).await?;
        Ok(Response::ok(format!("deleted {}", content_path), PLAIN).with_content_path(content_path))
    }

    /// A file watcher saw `content_path` appear or change on disk
    pub async fn file_changed(&self, content_path: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        cache.add_file_to_cache_data(content_path, true).await?;
        debug!("Reindexed {} after change", content_path);
        Ok(())
    }

    /// A file watcher saw `content_path` disappear from some layer
    pub async fn file_removed(&self, content_path: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        cache.remove_file_from_cache_data(content_path).await
    }
}

fn respond(rendered: Rendered, content_path: &str) -> Response {
    Response::ok(rendered.content, rendered.content_type).with_content_path(content_path)
}

/// Collect the named leaf parameters, reporting every missing one at once
fn required(params: &ParameterValue, names: &[&str]) -> Result<Vec<String>> {
    let mut values = Vec::new();
    let mut issues = Vec::new();
    for name in names {
        match params.get_str(name) {
            Some(value) => values.push(value.to_string()),
            None => issues.push(format!("missing {}", name)),
        }
    }
    if issues.is_empty() {
        Ok(values)
    } else {
        Err(WikiError::Validation(issues))
    }
}

fn write_arguments(params: &ParameterValue) -> Result<(String, String)> {
    let mut issues = Vec::new();
    let content_path = params.get_str("contentPath");
    match content_path {
        Some(path) => {
            if let Err(WikiError::Validation(path_issues)) = relative_path(path) {
                issues.extend(path_issues);
            }
        }
        None => issues.push("missing contentPath".to_string()),
    }
    let content = params.get_str("content");
    if content.is_none() {
        issues.push("missing content".to_string());
    }
    match (content_path, content) {
        (Some(path), Some(content)) if issues.is_empty() => Ok((path.to_string(), content.to_string())),
        _ => Err(WikiError::Validation(issues)),
    }
}

/// Turn one entry into response content. Used for top-level reads and for
/// nested `render()` calls alike.
pub fn render_entry(
    scope: Scope<'_>,
    entry: &Entry,
    selector: Option<&str>,
    edit: Option<EditTarget<'_>>,
) -> Result<Rendered> {
    if entry.kind == EntryKind::Directory {
        let listing = scope
            .cache
            .map(|cache| render_directory_listing(cache, &entry.content_path))
            .unwrap_or_default();
        return Ok(Rendered::html(listing));
    }

    let entry_path = edit.map(|e| e.content_path).unwrap_or(&entry.content_path);
    let render_ctx = RenderContext {
        scope,
        file: &entry.content_path,
        entry_path,
        edit_contents: edit.and_then(|e| e.contents),
        mode: RenderMode::Request,
    };

    match entry.renderability {
        Renderability::Html => {
            let text = entry_text(entry)?;
            let output = render_document(text, &render_ctx, selector)?;
            Ok(Rendered::html(output.html))
        }
        Renderability::Markdown => {
            let text = entry_text(entry)?;
            let markdown = MarkdownService::new();
            let split = markdown.split_frontmatter(text);
            let rendered = markdown.render(split.rest_of_content);
            let output = render_document(&rendered.html, &render_ctx, selector)?;
            Ok(Rendered::html(output.html))
        }
        Renderability::Static => Ok(Rendered {
            content: entry.original_content.bytes.clone(),
            content_type: content_type_for(&entry.content_path).to_string(),
        }),
    }
}

fn entry_text(entry: &Entry) -> Result<&str> {
    entry
        .text()
        .ok_or_else(|| WikiError::Internal(format!("{} is not valid UTF-8", entry.content_path)))
}

/// Render directory listing HTML: subdirectories first, then files, each
/// group sorted case-insensitively
pub fn render_directory_listing(cache: &ContentCache, dir: &str) -> String {
    let mut children = cache.children_of(dir);
    children.sort_by(|a, b| {
        let a_dir = a.kind == EntryKind::Directory;
        let b_dir = b.kind == EntryKind::Directory;
        b_dir
            .cmp(&a_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    let mut html = String::new();
    html.push_str(&format!("<h1>{}</h1>", escape_html(dir)));
    if dir != "/" {
        let up = parent_of(dir.trim_end_matches('/'));
        html.push_str(&format!("<p><a href=\"{}\">⬑ Up</a></p>", escape_attr(up)));
    }
    html.push_str("<ul class=\"listing\">\n");
    for entry in children {
        let display = if entry.kind == EntryKind::Directory {
            format!("{}/", entry.name)
        } else {
            entry.name.clone()
        };
        html.push_str(&format!(
            "  <li><a href=\"{}\">{}</a></li>\n",
            escape_attr(&entry.content_path),
            escape_html(&display)
        ));
    }
    html.push_str("</ul>\n");
    html
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        (self.status.http(), [(header::CONTENT_TYPE, self.content_type)], self.content).into_response()
    }
}

/// Handle root path requests
pub async fn handle_root(
    State(wiki): State<Arc<Wiki>>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    handle_read(&wiki, "/", query).await
}

/// Handle path requests
pub async fn handle_path(
    State(wiki): State<Arc<Wiki>>,
    AxumPath(path): AxumPath<String>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    handle_read(&wiki, &path, query).await
}

async fn handle_read(wiki: &Wiki, req_path: &str, query: HashMap<String, String>) -> Response {
    info!("Path request received: '{}'", req_path);
    wiki.execute(Command::Read, request_parameters(req_path, query)).await
}

/// Parameters for a GET: the content path comes from the URL and cannot be
/// overridden from the query string
fn request_parameters(req_path: &str, query: HashMap<String, String>) -> ParameterValue {
    let mut params = ParameterValue::node(ParameterSource::UrlFacts);
    params.set(
        "contentPath",
        ParameterValue::leaf(content_path_for_request(req_path), ParameterSource::UrlFacts),
    );
    for (key, value) in query {
        if key.split('.').next() == Some("contentPath") {
            debug!("Ignoring query parameter '{}' for {}", key, req_path);
            continue;
        }
        params.set_path(&key, ParameterValue::leaf(value, ParameterSource::QueryParam));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_arguments_aggregate_issues() {
        let params = ParameterValue::default();
        match write_arguments(&params) {
            Err(WikiError::Validation(issues)) => {
                assert_eq!(issues, vec!["missing contentPath", "missing content"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut params = ParameterValue::default();
        params.set("contentPath", ParameterValue::leaf("/a/../b.html", ParameterSource::RequestBody));
        match write_arguments(&params) {
            Err(WikiError::Validation(issues)) => {
                assert_eq!(issues.len(), 2);
                assert!(issues[0].contains(".."));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn query_cannot_override_content_path() {
        let query = HashMap::from([
            ("contentPath".to_string(), "/other.html".to_string()),
            ("contentPath.x".to_string(), "1".to_string()),
            ("select".to_string(), "#main".to_string()),
        ]);
        let params = request_parameters("/notes/page", query);
        assert_eq!(params.get_str("contentPath"), Some("/notes/page.html"));
        assert_eq!(params.get("contentPath").map(ParameterValue::source), Some(ParameterSource::UrlFacts));
        assert_eq!(params.get_str("select"), Some("#main"));
    }

    #[test]
    fn response_maps_status_to_http() {
        let response = Response {
            status: Status::Conflict,
            content: b"exists".to_vec(),
            content_type: PLAIN.to_string(),
            content_path: None,
        };
        let http = response.into_response();
        assert_eq!(http.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    }
}
