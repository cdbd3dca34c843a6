use crate::handlers::{text_body, ResponseFuture};
use crate::router::{QueryOptions, SharedState};

pub async fn autocomplete(state: SharedState, options: QueryOptions) -> ResponseFuture {
    let q = options.q.unwrap_or_default();
    let limit = options.limit.unwrap_or(0);
    let lines = if options.counts.unwrap_or(false) {
        state.autocomplete.get_keywords_with_counts(&q, limit)
    } else {
        state.autocomplete.get_keywords(&q, limit)
    };
    Ok(text_body(lines))
}

pub async fn efo_tree(state: SharedState, options: QueryOptions) -> ResponseFuture {
    let id = options.id.unwrap_or_default();
    let lines = if options.counts.unwrap_or(false) {
        let limit = options.limit.map(|l| l as i64).unwrap_or(0);
        state.autocomplete.get_efo_tree_with_counts(&id, limit)
    } else {
        state.autocomplete.get_efo_tree(&id)
    };
    Ok(text_body(lines))
}
