use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use log::{debug, info, warn};

use crate::errors::{Result, WikiError};
use crate::services::layered_store::{LayeredStore, StoredFile};
use crate::services::markdown_service::{meta_from_frontmatter, MarkdownService};
use crate::services::search_service::SearchService;
use crate::template::extract_metadata;
use crate::types::{Entry, EntryKind, EntryMeta, OriginalContent, Renderability, SharedEntry};
use crate::utils::{name_of, parent_of};

/// In-memory index over everything the layered store can serve.
///
/// Entries are keyed by content path. The title, keyword and backlink
/// tables are derived from the entries and rebuilt as a whole by
/// [`ContentCache::rebuild_meta_cache`].
#[derive(Debug)]
pub struct ContentCache {
    store: LayeredStore,
    entries: BTreeMap<String, SharedEntry>,
    titles: HashMap<String, String>,
    keywords: BTreeMap<String, Vec<String>>,
    backlinks: HashMap<String, Vec<String>>,
}

impl ContentCache {
    /// Empty cache over `store`
    pub fn new(store: LayeredStore) -> Self {
        Self {
            store,
            entries: BTreeMap::new(),
            titles: HashMap::new(),
            keywords: BTreeMap::new(),
            backlinks: HashMap::new(),
        }
    }

    /// Index every listed path concurrently. A file that fails to index is
    /// logged and left out; the derived tables are built once at the end.
    pub async fn load(store: LayeredStore) -> Result<Self> {
        let started = Instant::now();
        let listed = store.list().await?;
        let results = join_all(listed.iter().map(|item| load_entry(&store, &item.content_path))).await;

        let mut cache = Self::new(store.clone());
        let mut skipped = 0usize;
        for result in results {
            match result {
                Ok(entry) => {
                    cache.insert(entry);
                }
                Err(e) => {
                    skipped += 1;
                    warn!("{}", e);
                }
            }
        }
        cache.rebuild_meta_cache();
        info!(
            "Indexed {} entries in {}ms ({} skipped)",
            cache.entries.len(),
            started.elapsed().as_millis(),
            skipped
        );
        Ok(cache)
    }

    pub fn store(&self) -> &LayeredStore {
        &self.store
    }

    /// (Re)index one path from the store
    pub async fn add_file_to_cache_data(&mut self, content_path: &str, rebuild_index: bool) -> Result<SharedEntry> {
        let entry = load_entry(&self.store, content_path).await?;
        let entry = self.insert(entry);
        if rebuild_index {
            self.rebuild_meta_cache();
        }
        Ok(entry)
    }

    /// Drop a path from the cache. If a lower layer still holds the path,
    /// that copy is indexed in its place.
    pub async fn remove_file_from_cache_data(&mut self, content_path: &str) -> Result<()> {
        if self.entries.remove(content_path).is_none() {
            debug!("{} was not cached", content_path);
        }
        match self.store.read(content_path).await {
            Ok(file) => {
                info!("Revealed {} from layer {:?}", content_path, file.layer);
                let entry = build_entry(file).map_err(|e| indexing(content_path, e))?;
                self.insert(entry);
            }
            Err(WikiError::MissingFile(_)) => {}
            Err(e) => return Err(e),
        }
        self.rebuild_meta_cache();
        Ok(())
    }

    fn insert(&mut self, entry: Entry) -> SharedEntry {
        let entry = Arc::new(entry);
        self.entries.insert(entry.content_path.clone(), entry.clone());
        entry
    }

    /// Recompute titles, keywords and backlinks from the current entries
    pub fn rebuild_meta_cache(&mut self) {
        let started = Instant::now();

        let mut titles: HashMap<String, String> = HashMap::new();
        for (path, entry) in &self.entries {
            if let Some(title) = entry.title().map(str::trim).filter(|t| !t.is_empty()) {
                titles.entry(title.to_string()).or_insert_with(|| path.clone());
            }
        }
        self.titles = titles;

        let mut keywords: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut backlinks: HashMap<String, Vec<String>> = HashMap::new();
        for (path, entry) in &self.entries {
            for keyword in &entry.meta.keywords {
                let keyword = keyword.trim().to_lowercase();
                if keyword.is_empty() {
                    continue;
                }
                let paths = keywords.entry(keyword).or_default();
                if !paths.contains(path) {
                    paths.push(path.clone());
                }
            }
            for link in &entry.links {
                let Some(destination) = self.resolve_link(path, link) else {
                    continue;
                };
                let sources = backlinks.entry(destination).or_default();
                if !sources.contains(path) {
                    sources.push(path.clone());
                }
            }
        }
        self.keywords = keywords;
        self.backlinks = backlinks;
        debug!("Rebuilt meta cache in {}µs", started.elapsed().as_micros());
    }

    pub fn get_by_content_path(&self, content_path: &str) -> Option<SharedEntry> {
        self.entries.get(content_path).cloned()
    }

    pub fn get_by_title(&self, title: &str) -> Option<SharedEntry> {
        let title = title.trim();
        if title.is_empty() {
            return None;
        }
        self.titles.get(title).and_then(|path| self.get_by_content_path(path))
    }

    /// Title first, then content path; `/` means `/index.html`
    pub fn get_by_path_or_title(&self, key: &str) -> Option<SharedEntry> {
        if let Some(entry) = self.get_by_title(key) {
            return Some(entry);
        }
        let path = if key == "/" { "/index.html" } else { key };
        self.get_by_content_path(path)
    }

    pub fn all_files(&self) -> Vec<SharedEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Immediate children of a directory path, unsorted
    pub fn children_of(&self, dir: &str) -> Vec<SharedEntry> {
        let prefix = if dir.ends_with('/') { dir.to_string() } else { format!("{}/", dir) };
        self.entries
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Entries linking to `target`, which may be a content path or a title
    pub fn backlinks_of(&self, target: &str) -> Vec<SharedEntry> {
        let path = self
            .get_by_path_or_title(target)
            .map(|entry| entry.content_path.clone())
            .unwrap_or_else(|| target.to_string());
        self.backlinks
            .get(&path)
            .map(|sources| sources.iter().filter_map(|s| self.get_by_content_path(s)).collect())
            .unwrap_or_default()
    }

    /// Entries tagged with `keyword`, case-insensitively
    pub fn with_keyword(&self, keyword: &str) -> Vec<SharedEntry> {
        self.keywords
            .get(&keyword.trim().to_lowercase())
            .map(|paths| paths.iter().filter_map(|p| self.get_by_content_path(p)).collect())
            .unwrap_or_default()
    }

    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.keywords.keys().map(String::as_str)
    }

    pub fn search(&self, query: &str) -> Vec<SharedEntry> {
        SearchService::new().search(self.entries.values(), query)
    }

    /// Resolve an authored `href` found in `source` to a cached content path.
    /// Titles win over paths; external and fragment-only links resolve to
    /// nothing.
    pub fn resolve_link(&self, source: &str, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("//") || is_external(href) {
            return None;
        }
        if let Some(path) = self.titles.get(href) {
            return Some(path.clone());
        }
        let bare = href.split(['#', '?']).next().unwrap_or(href);
        let decoded = urlencoding::decode(bare)
            .map(|text| text.into_owned())
            .unwrap_or_else(|_| bare.to_string());
        if let Some(path) = self.titles.get(&decoded) {
            return Some(path.clone());
        }

        let joined = if decoded.starts_with('/') {
            decoded
        } else {
            format!("{}{}", parent_of(source), decoded)
        };
        let absolute = normalize_segments(&joined);
        let mut candidates = vec![absolute.clone()];
        if absolute == "/" {
            candidates.push("/index.html".to_string());
        } else if !name_of(&absolute).contains('.') {
            candidates.push(format!("{}.html", absolute.trim_end_matches('/')));
        }
        candidates.into_iter().find(|candidate| self.entries.contains_key(candidate))
    }

    /// Write a new file and index it. Intermediate directories created on the
    /// way are indexed as well.
    pub async fn create_file_and_directories(&mut self, content_path: &str, content: &str) -> Result<SharedEntry> {
        self.store.create(content_path, content).await?;
        let mut dir = parent_of(content_path).trim_end_matches('/').to_string();
        while !dir.is_empty() && !self.entries.contains_key(&dir) {
            self.add_file_to_cache_data(&dir, false).await?;
            dir = parent_of(&dir).trim_end_matches('/').to_string();
        }
        self.add_file_to_cache_data(content_path, true).await
    }

    pub async fn update_file(&mut self, content_path: &str, content: &str) -> Result<SharedEntry> {
        self.store.update(content_path, content).await?;
        self.add_file_to_cache_data(content_path, true).await
    }

    pub async fn remove_file(&mut self, content_path: &str) -> Result<()> {
        self.store.remove(content_path).await?;
        self.remove_file_from_cache_data(content_path).await
    }
}

fn is_external(href: &str) -> bool {
    match href.split_once(':') {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && !scheme.contains('/')
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Collapse `.` and `..` segments of an absolute path
fn normalize_segments(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

fn indexing(content_path: &str, source: WikiError) -> WikiError {
    WikiError::Indexing {
        path: content_path.to_string(),
        source: Box::new(source),
    }
}

async fn load_entry(store: &LayeredStore, content_path: &str) -> Result<Entry> {
    let file = store.read(content_path).await.map_err(|e| indexing(content_path, e))?;
    build_entry(file).map_err(|e| indexing(content_path, e))
}

/// Classify a stored file and extract its metadata and links
pub fn build_entry(file: StoredFile) -> Result<Entry> {
    let renderability = match file.kind {
        EntryKind::File => Renderability::for_path(&file.content_path),
        EntryKind::Directory | EntryKind::Other => Renderability::Static,
    };

    let (meta, links) = match renderability {
        Renderability::Html => {
            let text = utf8(&file)?;
            let extracted = extract_metadata(text, &file.content_path)?;
            (extracted.meta, extracted.links)
        }
        Renderability::Markdown => {
            let text = utf8(&file)?;
            let markdown = MarkdownService::new();
            let split = markdown.split_frontmatter(text);
            let mut meta = split
                .frontmatter
                .as_ref()
                .map(meta_from_frontmatter)
                .unwrap_or_default();
            let rendered = markdown.render(split.rest_of_content);
            let extracted = extract_metadata(&rendered.html, &file.content_path)?;
            if meta.title.is_none() {
                meta.title = extracted.meta.title.or(rendered.title);
            }
            meta.keywords.extend(extracted.meta.keywords);
            meta.content_type = Some("markdown".to_string());
            (meta, extracted.links)
        }
        Renderability::Static => (EntryMeta::default(), Vec::new()),
    };

    debug!(
        "Indexed {} as {:?} with {} links",
        file.content_path,
        renderability,
        links.len()
    );
    Ok(Entry {
        name: name_of(&file.content_path).to_string(),
        content_path: file.content_path,
        kind: file.kind,
        original_content: OriginalContent { bytes: file.bytes, layer: file.layer },
        meta,
        renderability,
        links,
        timestamps: file.timestamps,
    })
}

fn utf8(file: &StoredFile) -> Result<&str> {
    std::str::from_utf8(&file.bytes)
        .map_err(|e| WikiError::Internal(format!("{} is not valid UTF-8: {}", file.content_path, e)))
}
