pub mod content_cache;
pub mod layered_store;
pub mod markdown_service;
pub mod search_service;

pub use content_cache::ContentCache;
pub use layered_store::LayeredStore;
pub use markdown_service::MarkdownService;
pub use search_service::SearchService;
