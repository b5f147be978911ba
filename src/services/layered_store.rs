use std::collections::BTreeMap;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use time::OffsetDateTime;
use tokio::fs;

use crate::errors::{Result, WikiError};
use crate::types::{EntryKind, Timestamps};
use crate::utils::normalize_content;

/// Raw file as found in the highest-priority layer that has it
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub content_path: String,
    pub kind: EntryKind,
    pub bytes: Vec<u8>,
    pub layer: PathBuf,
    pub timestamps: Timestamps,
}

/// One row of a merged listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub content_path: String,
    pub name: String,
    pub kind: EntryKind,
    pub layer: PathBuf,
}

/// Ordered set of content directories. A path in an earlier layer shadows the
/// same path in later ones; only the first layer is written to. Shadowing is
/// resolved on every lookup, nothing is merged on disk.
#[derive(Debug, Clone)]
pub struct LayeredStore {
    layers: Arc<Vec<PathBuf>>,
}

impl LayeredStore {
    /// Create a new store over `layers`, highest priority first
    pub fn new(layers: Vec<PathBuf>) -> Self {
        debug!("Creating LayeredStore with layers: {:?}", layers);
        Self { layers: Arc::new(layers) }
    }

    pub fn layers(&self) -> &[PathBuf] {
        &self.layers
    }

    fn writable_layer(&self) -> Result<&Path> {
        self.layers
            .first()
            .map(PathBuf::as_path)
            .ok_or_else(|| WikiError::Internal("no content layers configured".to_string()))
    }

    /// Read a content path from the first layer that has it
    pub async fn read(&self, content_path: &str) -> Result<StoredFile> {
        let relative = relative_path(content_path)?;
        for layer in self.layers.iter() {
            let full_path = layer.join(&relative);
            let metadata = match fs::metadata(&full_path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    if e.kind() != io::ErrorKind::NotFound {
                        debug!("Skipping {} in layer {:?}: {}", content_path, layer, e);
                    }
                    continue;
                }
            };
            let kind = kind_of(&metadata);
            let bytes = if kind == EntryKind::File {
                fs::read(&full_path).await?
            } else {
                Vec::new()
            };
            debug!("Read {} from layer {:?}, {} bytes", content_path, layer, bytes.len());
            return Ok(StoredFile {
                content_path: content_path.to_string(),
                kind,
                bytes,
                layer: layer.clone(),
                timestamps: timestamps_of(&metadata),
            });
        }
        Err(WikiError::MissingFile(content_path.to_string()))
    }

    /// Layer that would answer a `read`, if any
    pub async fn locate(&self, content_path: &str) -> Result<Option<PathBuf>> {
        let relative = relative_path(content_path)?;
        for layer in self.layers.iter() {
            if fs::try_exists(layer.join(&relative)).await.unwrap_or(false) {
                return Ok(Some(layer.clone()));
            }
        }
        Ok(None)
    }

    /// Check if any layer holds the content path
    pub async fn exists(&self, content_path: &str) -> Result<bool> {
        Ok(self.locate(content_path).await?.is_some())
    }

    /// Write a new file into the writable layer, creating parent directories.
    /// Shadowing a file from a lower layer is allowed.
    pub async fn create(&self, content_path: &str, content: &str) -> Result<()> {
        let full_path = self.writable_layer()?.join(relative_path(content_path)?);
        if fs::try_exists(&full_path).await? {
            warn!("Refusing to create {}: already present in the writable layer", content_path);
            return Err(WikiError::Conflict(content_path.to_string()));
        }
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full_path, normalize_content(content)).await?;
        info!("Created {}", content_path);
        Ok(())
    }

    /// Overwrite a file that already exists in the writable layer
    pub async fn update(&self, content_path: &str, content: &str) -> Result<()> {
        let full_path = self.writable_layer()?.join(relative_path(content_path)?);
        if !fs::try_exists(&full_path).await? {
            return Err(WikiError::MissingFile(content_path.to_string()));
        }
        fs::write(&full_path, normalize_content(content)).await?;
        info!("Updated {}", content_path);
        Ok(())
    }

    /// Remove a file from the writable layer. Inherited files in lower layers
    /// are never touched.
    pub async fn remove(&self, content_path: &str) -> Result<()> {
        let full_path = self.writable_layer()?.join(relative_path(content_path)?);
        let metadata = match fs::metadata(&full_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(WikiError::MissingFile(content_path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            fs::remove_dir(&full_path).await?;
        } else {
            fs::remove_file(&full_path).await?;
        }
        info!("Removed {}", content_path);
        Ok(())
    }

    /// Every visible path across all layers. Where layers overlap, the row
    /// from the earliest layer wins.
    pub async fn list(&self) -> Result<Vec<ListedEntry>> {
        let mut merged: BTreeMap<String, ListedEntry> = BTreeMap::new();
        for layer in self.layers.iter() {
            if !fs::try_exists(layer).await.unwrap_or(false) {
                warn!("Layer directory does not exist: {:?}", layer);
                continue;
            }
            let mut pending = vec![(layer.clone(), String::new())];
            while let Some((dir, prefix)) = pending.pop() {
                let mut reader = fs::read_dir(&dir).await?;
                while let Some(entry) = reader.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if name.starts_with('.') {
                        continue; // hide dotfiles
                    }
                    let content_path = format!("{}/{}", prefix, name);
                    if let Err(e) = relative_path(&content_path) {
                        warn!("Skipping unaddressable file {:?}: {}", entry.path(), e);
                        continue;
                    }
                    let kind = match fs::metadata(entry.path()).await {
                        Ok(metadata) => kind_of(&metadata),
                        Err(e) => {
                            warn!("Failed to stat {:?}: {}", entry.path(), e);
                            continue;
                        }
                    };
                    if kind == EntryKind::Directory {
                        pending.push((entry.path(), content_path.clone()));
                    }
                    merged.entry(content_path.clone()).or_insert(ListedEntry {
                        content_path,
                        name,
                        kind,
                        layer: layer.clone(),
                    });
                }
            }
        }
        info!("Listed {} paths across {} layers", merged.len(), self.layers.len());
        Ok(merged.into_values().collect())
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.' | '(' | ')' | ',' | '+' | '@')
}

/// Validate a content path against the filename allow-list and turn it into
/// a path relative to a layer root
pub fn relative_path(content_path: &str) -> Result<PathBuf> {
    let mut issues = Vec::new();
    let Some(rest) = content_path.strip_prefix('/') else {
        return Err(WikiError::Validation(vec![format!(
            "content path '{}' must start with '/'",
            content_path
        )]));
    };
    let mut relative = PathBuf::new();
    if rest.is_empty() {
        return Ok(relative);
    }
    for segment in rest.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            issues.push(format!("content path '{}' has an invalid segment '{}'", content_path, segment));
            continue;
        }
        if let Some(bad) = segment.chars().find(|c| !is_allowed_char(*c)) {
            issues.push(format!("content path '{}' contains disallowed character {:?}", content_path, bad));
            continue;
        }
        relative.push(segment);
    }
    if issues.is_empty() {
        Ok(relative)
    } else {
        Err(WikiError::Validation(issues))
    }
}

fn kind_of(metadata: &Metadata) -> EntryKind {
    if metadata.is_file() {
        EntryKind::File
    } else if metadata.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::Other
    }
}

fn timestamps_of(metadata: &Metadata) -> Timestamps {
    Timestamps {
        accessed: metadata.accessed().ok().map(OffsetDateTime::from),
        created: metadata.created().ok().map(OffsetDateTime::from),
        modified: metadata.modified().ok().map(OffsetDateTime::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn two_layers() -> (TempDir, TempDir, LayeredStore) {
        let top = TempDir::new().unwrap();
        let base = TempDir::new().unwrap();
        let store = LayeredStore::new(vec![top.path().to_path_buf(), base.path().to_path_buf()]);
        (top, base, store)
    }

    #[tokio::test]
    async fn earlier_layer_shadows_later_one() {
        let (top, base, store) = two_layers();
        std::fs::write(top.path().join("page.html"), "top").unwrap();
        std::fs::write(base.path().join("page.html"), "base").unwrap();

        let file = store.read("/page.html").await.unwrap();
        assert_eq!(file.bytes, b"top");
        assert_eq!(file.layer, top.path());

        store.remove("/page.html").await.unwrap();
        let file = store.read("/page.html").await.unwrap();
        assert_eq!(file.bytes, b"base");
    }

    #[tokio::test]
    async fn missing_file_message_has_no_filesystem_prefix() {
        let (top, _base, store) = two_layers();
        let err = store.read("/nothing.html").await.unwrap_err();
        assert!(matches!(err, WikiError::MissingFile(ref p) if p == "/nothing.html"));
        assert!(!err.to_string().contains(&*top.path().to_string_lossy()));
    }

    #[tokio::test]
    async fn create_conflicts_only_with_writable_layer() {
        let (top, base, store) = two_layers();
        std::fs::write(base.path().join("inherited.html"), "base").unwrap();

        store.create("/inherited.html", "mine").await.unwrap();
        assert_eq!(std::fs::read_to_string(top.path().join("inherited.html")).unwrap(), "mine");

        let err = store.create("/inherited.html", "again").await.unwrap_err();
        assert!(matches!(err, WikiError::Conflict(_)));
    }

    #[tokio::test]
    async fn create_makes_intermediate_directories_and_normalizes() {
        let (top, _base, store) = two_layers();
        store.create("/deep/er/page.md", "line  \r\nnext\r\n").await.unwrap();
        let written = std::fs::read_to_string(top.path().join("deep/er/page.md")).unwrap();
        assert_eq!(written, "line\nnext\n");
    }

    #[tokio::test]
    async fn update_and_remove_require_writable_copy() {
        let (_top, base, store) = two_layers();
        std::fs::write(base.path().join("inherited.html"), "base").unwrap();

        let err = store.update("/inherited.html", "x").await.unwrap_err();
        assert!(matches!(err, WikiError::MissingFile(_)));
        let err = store.remove("/inherited.html").await.unwrap_err();
        assert!(matches!(err, WikiError::MissingFile(_)));
        assert!(base.path().join("inherited.html").exists());
    }

    #[tokio::test]
    async fn list_merges_layers_and_hides_dotfiles() {
        let (top, base, store) = two_layers();
        std::fs::create_dir(top.path().join("notes")).unwrap();
        std::fs::write(top.path().join("notes/a.md"), "a").unwrap();
        std::fs::write(top.path().join("shared.html"), "top").unwrap();
        std::fs::write(base.path().join("shared.html"), "base").unwrap();
        std::fs::write(base.path().join("only-base.html"), "base").unwrap();
        std::fs::write(base.path().join(".hidden"), "x").unwrap();

        let listed = store.list().await.unwrap();
        let paths: Vec<&str> = listed.iter().map(|e| e.content_path.as_str()).collect();
        assert_eq!(paths, vec!["/notes", "/notes/a.md", "/only-base.html", "/shared.html"]);

        let shared = listed.iter().find(|e| e.content_path == "/shared.html").unwrap();
        assert_eq!(shared.layer, top.path());
        let notes = listed.iter().find(|e| e.content_path == "/notes").unwrap();
        assert_eq!(notes.kind, EntryKind::Directory);
    }

    #[test]
    fn rejects_traversal_and_odd_characters() {
        assert!(relative_path("/ok/page-1 (draft).md").is_ok());
        assert!(relative_path("relative.md").is_err());
        assert!(relative_path("/../etc/passwd").is_err());
        assert!(relative_path("/a//b").is_err());
        assert!(relative_path("/a\\b").is_err());
        match relative_path("/a/../b<c").unwrap_err() {
            WikiError::Validation(issues) => assert_eq!(issues.len(), 2),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
