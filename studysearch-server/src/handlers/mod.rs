use hyper::{Body, Response, StatusCode};
use serde::Serialize;

use studysearch_types::{Error, ErrorResponse};

pub use {autocomplete::*, metadata::*, search::*, submissions::*};

pub mod autocomplete;
pub mod metadata;
pub mod search;
pub mod submissions;

pub type ResponseFuture = Result<Response<Body>, hyper::Error>;

pub fn with_body<T: Serialize>(body: T) -> Response<Body> {
    let json = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(json))
        .unwrap_or_default()
}

pub fn with_status<T: Serialize>(code: StatusCode, body: T) -> Response<Body> {
    let json = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(code)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(json))
        .unwrap_or_default()
}

pub fn text_body(text: String) -> Response<Body> {
    Response::builder()
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(text))
        .unwrap_or_default()
}

pub fn empty_with_code(code: StatusCode) -> Response<Body> {
    Response::builder()
        .status(code)
        .body(Body::empty())
        .unwrap_or_default()
}

/// Map an engine error onto its wire status and JSON body.
pub fn from_error(err: &Error) -> Response<Body> {
    with_status(err.status(), ErrorResponse::from(err))
}

pub fn parse_path(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|p| !p.is_empty()).collect()
}

pub async fn not_found() -> ResponseFuture {
    Ok(empty_with_code(StatusCode::NOT_FOUND))
}

pub async fn health() -> ResponseFuture {
    Ok(with_body(serde_json::json!({ "status": "UP" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_splitting() {
        assert_eq!(parse_path("/search"), vec!["search"]);
        assert_eq!(
            parse_path("/submissions/S-BSST1/index"),
            vec!["submissions", "S-BSST1", "index"]
        );
        assert!(parse_path("/").is_empty());
    }

    #[test]
    fn error_mapping() {
        let resp = from_error(&Error::InvalidQuery("bad".into()));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = from_error(&Error::ServiceUnavailable("gone".into()));
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
