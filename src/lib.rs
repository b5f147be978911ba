//! Layerwiki - a layered, self-templating wiki engine
//!
//! Pages live in an ordered stack of content directories. The first layer
//! is writable and shadows the ones below it. HTML pages carry their own
//! templating directives, Markdown pages are rendered and optionally wrapped
//! in a container page, and everything is indexed in memory for title
//! lookup, backlinks and search.

pub mod config;
pub mod errors;
pub mod expression;
pub mod handlers;
pub mod logger;
pub mod services;
pub mod template;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use config::Config;
pub use errors::{Status, WikiError};
pub use handlers::Wiki;
pub use services::{ContentCache, LayeredStore, MarkdownService, SearchService};
pub use types::{Command, Entry, EntryKind, ParameterSource, ParameterValue, Renderability, Response, SharedEntry};

// Re-export utility functions
pub use utils::{content_path_for_request, escape_attr, escape_html};
