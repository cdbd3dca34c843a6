use std::sync::atomic::Ordering;

use hyper::body::to_bytes;
use hyper::{Body, StatusCode};
use log::info;

use studysearch_types::{Error, SearchRequest};

use crate::handlers::{from_error, with_body, with_status, ResponseFuture};
use crate::query::security::Principal;
use crate::router::SharedState;

pub async fn doc_search(
    state: SharedState,
    body: Body,
    principal: Option<Principal>,
) -> ResponseFuture {
    if !state.search_available.load(Ordering::SeqCst) {
        let err = Error::ServiceUnavailable("indexing pipeline is unavailable".into());
        return Ok(with_status(
            StatusCode::SERVICE_UNAVAILABLE,
            studysearch_types::ErrorResponse::from(&err),
        ));
    }

    let bytes = match to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(e) => return Ok(from_error(&Error::from(e))),
    };
    let request = if bytes.is_empty() {
        SearchRequest::default()
    } else {
        match serde_json::from_slice::<SearchRequest>(&bytes) {
            Ok(request) => request,
            Err(e) => return Ok(from_error(&Error::InvalidQuery(e.to_string()))),
        }
    };

    info!(
        "search: query={:?} collection={} page={}",
        request.query, request.collection, request.page
    );
    match state.search.search(&request, principal.as_ref()) {
        Ok(response) => Ok(with_body(response)),
        Err(e) => Ok(from_error(&e)),
    }
}
