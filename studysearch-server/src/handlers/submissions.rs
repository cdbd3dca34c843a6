use hyper::body::to_bytes;
use hyper::{Body, StatusCode};

use studysearch_types::{Error, IndexSubmissionRequest};

use crate::handlers::{from_error, with_body, with_status, ResponseFuture};
use crate::router::SharedState;

/// `POST /submissions/{accNo}/index`: enqueue for indexing, 202 on accept.
pub async fn enqueue_index(state: SharedState, body: Body, accession: &str) -> ResponseFuture {
    let bytes = match to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(e) => return Ok(from_error(&Error::from(e))),
    };
    let request = if bytes.is_empty() {
        IndexSubmissionRequest::default()
    } else {
        match serde_json::from_slice::<IndexSubmissionRequest>(&bytes) {
            Ok(request) => request,
            Err(e) => return Ok(from_error(&Error::InvalidQuery(e.to_string()))),
        }
    };
    match state.queue.enqueue(accession, request) {
        Ok(accepted) => Ok(with_status(StatusCode::ACCEPTED, accepted)),
        Err(e) => Ok(from_error(&e)),
    }
}

/// `GET /submissions/{accNo}/status`: always 200, the state names misses.
pub async fn task_status(state: SharedState, accession: &str) -> ResponseFuture {
    Ok(with_body(state.queue.status(accession)))
}
