use std::io;
use axum::{http::StatusCode, response::{IntoResponse, Response}};
use thiserror::Error;

/// Outcome categories reported across the `execute` boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    ValidationError,
    NotFound,
    Conflict,
    Internal,
    DirectiveFailed,
}

impl Status {
    /// HTTP status used when the outcome leaves the process
    pub fn http(self) -> StatusCode {
        match self {
            Status::Ok => StatusCode::OK,
            Status::ValidationError => StatusCode::BAD_REQUEST,
            Status::NotFound => StatusCode::NOT_FOUND,
            Status::Conflict => StatusCode::UNPROCESSABLE_ENTITY,
            Status::Internal | Status::DirectiveFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Custom error types for the wiki application
///
/// Messages only ever mention content paths, never the layer directory that
/// holds a file.
#[derive(Debug, Error)]
pub enum WikiError {
    #[error("{0} does not exist")]
    MissingFile(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("invalid request: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("directive failed at {file}:{line}: {message}")]
    DirectiveFailure {
        file: String,
        line: usize,
        message: String,
    },
    #[error("{0}")]
    Expression(String),
    #[error("failed to index {path}: {source}")]
    Indexing {
        path: String,
        #[source]
        source: Box<WikiError>,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl WikiError {
    pub fn directive(file: &str, line: usize, message: impl Into<String>) -> Self {
        WikiError::DirectiveFailure {
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            WikiError::MissingFile(_) => Status::NotFound,
            WikiError::Conflict(_) => Status::Conflict,
            WikiError::Validation(_) => Status::ValidationError,
            WikiError::DirectiveFailure { .. } | WikiError::Expression(_) => Status::DirectiveFailed,
            WikiError::Indexing { source, .. } => source.status(),
            WikiError::Io(e) if e.kind() == io::ErrorKind::NotFound => Status::NotFound,
            WikiError::Io(_) | WikiError::Internal(_) => Status::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, WikiError>;

impl IntoResponse for WikiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == Status::Internal {
            log::error!("Request failed: {}", self);
        }
        (status.http(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(WikiError::MissingFile("/a.html".into()).status(), Status::NotFound);
        assert_eq!(WikiError::Conflict("/a.html".into()).status(), Status::Conflict);
        assert_eq!(WikiError::Validation(vec![]).status(), Status::ValidationError);
        assert_eq!(WikiError::directive("/a.html", 3, "bad").status(), Status::DirectiveFailed);
        assert_eq!(Status::Conflict.http(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn indexing_error_names_the_path() {
        let err = WikiError::Indexing {
            path: "/notes/a.md".into(),
            source: Box::new(WikiError::directive("/notes/a.md", 7, "missing body")),
        };
        let msg = err.to_string();
        assert!(msg.contains("/notes/a.md"));
        assert!(msg.contains("missing body"));
        assert_eq!(err.status(), Status::DirectiveFailed);
    }

    #[test]
    fn validation_messages_are_aggregated() {
        let err = WikiError::Validation(vec!["missing contentPath".into(), "missing content".into()]);
        assert_eq!(err.to_string(), "invalid request: missing contentPath; missing content");
    }
}
