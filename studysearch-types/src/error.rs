//! The error taxonomy shared by the whole engine. Every failure a caller can
//! observe is one of these kinds; the HTTP layer maps them to status codes
//! through [`Error::status`] and [`Error::code`].

use http::StatusCode;
use serde::{Deserialize, Serialize};
use tantivy::directory::error::OpenDirectoryError;
use tantivy::query::QueryParserError;
use tantivy::TantivyError;
use thiserror::Error;

/// The JSON body returned for any failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub status: u16,
    pub message: String,
}

impl ErrorResponse {
    pub fn new<M: ToString>(code: &str, status: StatusCode, message: M) -> Self {
        Self {
            code: code.into(),
            status: status.as_u16(),
            message: message.to_string(),
        }
    }
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        ErrorResponse::new(err.code(), err.status(), err)
    }
}

/// Base error type of the search service.
#[derive(Debug, Error)]
pub enum Error {
    /// A query string that could not be parsed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// A user query referenced a field that may never appear in queries.
    #[error("Invalid query: field '{0}' is restricted")]
    RestrictedField(String),
    /// A structurally valid request with arguments outside their allowed range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Missing accession, unknown task, unknown entity.
    #[error("Not found: {0}")]
    NotFound(String),
    /// A query referenced an index that is not open in the pool.
    #[error("Unknown index: '{0}' does not exist")]
    UnknownIndex(String),
    /// A query referenced a field absent from the schema.
    #[error("Unknown field: '{0}' queried")]
    UnknownField(String),
    /// The indexing pipeline signalled that it cannot accept work.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Wraps I/O, invalid criteria and mapping errors inside the search
    /// pipeline. Surfaced as a best-effort empty response, never as a 500,
    /// unless the outer search facade itself failed.
    #[error("Error in search execution: '{0}'")]
    Search(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Index error: {0}")]
    Index(String),
    #[error("Error parsing json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Http error: {0}")]
    Http(#[from] http::Error),
    #[error("Http transport error: {0}")]
    Hyper(#[from] hyper::Error),
    /// Anything unhandled. The cause is logged, the client sees a generic 500.
    #[error("Internal server error")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidQuery(_) | Error::RestrictedField(_) => "INVALID_QUERY",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::NotFound(_) | Error::UnknownIndex(_) => "NOT_FOUND",
            Error::UnknownField(_) => "UNKNOWN_FIELD",
            Error::ServiceUnavailable(_) => "WEBSOCKET_CLOSED",
            Error::Search(_) => "SEARCH_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidQuery(_)
            | Error::RestrictedField(_)
            | Error::InvalidArgument(_)
            | Error::UnknownField(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::UnknownIndex(_) => StatusCode::NOT_FOUND,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Demote any pipeline failure to a [`Error::Search`] so the response
    /// processor can build a best-effort result instead of failing the call.
    pub fn into_search(self) -> Self {
        match self {
            e @ Error::InvalidQuery(_)
            | e @ Error::RestrictedField(_)
            | e @ Error::InvalidArgument(_) => e,
            e => Error::Search(e.to_string()),
        }
    }
}

impl From<TantivyError> for Error {
    fn from(err: TantivyError) -> Self {
        Error::Index(err.to_string())
    }
}

impl From<OpenDirectoryError> for Error {
    fn from(err: OpenDirectoryError) -> Self {
        Error::Index(err.to_string())
    }
}

impl From<QueryParserError> for Error {
    fn from(err: QueryParserError) -> Self {
        Error::InvalidQuery(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_field_maps_to_bad_request() {
        let err = Error::RestrictedField("access".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "INVALID_QUERY");
        assert!(err.to_string().contains("access"));
    }

    #[test]
    fn unavailable_keeps_wire_code() {
        let err = Error::ServiceUnavailable("indexer offline".into());
        let body = ErrorResponse::from(&err);
        assert_eq!(body.code, "WEBSOCKET_CLOSED");
        assert_eq!(body.status, 503);
    }

    #[test]
    fn search_demotion_keeps_client_errors() {
        let invalid = Error::InvalidQuery("bad".into()).into_search();
        assert!(matches!(invalid, Error::InvalidQuery(_)));
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")).into_search();
        assert!(matches!(io, Error::Search(_)));
    }
}
