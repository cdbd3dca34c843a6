//! Method + path routing over hyper: every handler receives the shared
//! application state and the resolved principal.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use log::{debug, info};
use serde::Deserialize;

use studysearch_types::CollectionRegistry;

use crate::auth::Authenticator;
use crate::handlers::*;
use crate::index::pool::SharedPool;
use crate::index::tasks::IndexingQueue;
use crate::ontology::AutocompleteService;
use crate::search::SearchService;

/// Query-string options shared by the GET endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct QueryOptions {
    pub q: Option<String>,
    pub limit: Option<usize>,
    pub id: Option<String>,
    pub counts: Option<bool>,
}

pub struct AppState {
    pub pool: SharedPool,
    pub registry: Arc<CollectionRegistry>,
    pub search: SearchService,
    pub autocomplete: AutocompleteService,
    pub queue: Arc<IndexingQueue>,
    pub auth: Authenticator,
    /// Cleared when the indexing pipeline signals unavailability; search
    /// answers 503 until it returns.
    pub search_available: AtomicBool,
}

pub type SharedState = Arc<AppState>;

pub struct Router {
    state: SharedState,
}

impl Router {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    pub async fn route(
        state: SharedState,
        remote: SocketAddr,
        req: Request<Body>,
    ) -> Result<Response<Body>, hyper::Error> {
        let (parts, body) = req.into_parts();
        let options: QueryOptions = parts
            .uri
            .query()
            .and_then(|q| serde_urlencoded::from_str(q).ok())
            .unwrap_or_default();
        let method = parts.method;
        let path = parse_path(parts.uri.path());
        let principal = state.auth.principal(&parts.headers);
        debug!("{} /{}", method, path.join("/"));

        match (&method, &path[..]) {
            (m, ["health"]) if m == Method::GET => health().await,
            (m, ["search"]) if m == Method::POST => doc_search(state, body, principal).await,
            (m, ["autocomplete"]) if m == Method::GET => autocomplete(state, options).await,
            (m, ["efo", "tree"]) if m == Method::GET => efo_tree(state, options).await,
            (m, ["submissions", accession, "index"]) if m == Method::POST => {
                enqueue_index(state, body, accession).await
            }
            (m, ["submissions", accession, "status"]) if m == Method::GET => {
                task_status(state, accession).await
            }
            (m, ["internal", "api", "indexes", "metadata"]) if m == Method::GET => {
                index_metadata(state, remote).await
            }
            _ => not_found().await,
        }
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<(), hyper::Error> {
        let state = self.state;
        let service = make_service_fn(move |conn: &AddrStream| {
            let state = Arc::clone(&state);
            let remote = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    Router::route(Arc::clone(&state), remote, req)
                }))
            }
        });
        info!("listening on {}", addr);
        Server::bind(&addr)
            .serve(service)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
            })
            .await
    }
}
