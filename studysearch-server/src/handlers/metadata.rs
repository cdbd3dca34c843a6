use std::net::SocketAddr;

use hyper::StatusCode;

use crate::handlers::{empty_with_code, with_body, ResponseFuture};
use crate::router::SharedState;

/// `GET /internal/api/indexes/metadata`: admin-IP-allowlisted listing of
/// every open index with its commit `updateTime`, on-disk size and live
/// document count.
pub async fn index_metadata(state: SharedState, remote: SocketAddr) -> ResponseFuture {
    if !state.auth.is_admin_ip(&remote) {
        return Ok(empty_with_code(StatusCode::FORBIDDEN));
    }
    Ok(with_body(state.pool.metadata()))
}
