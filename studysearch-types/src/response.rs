//! Response DTOs: hits, pages, facets, suggestions, task and index metadata.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::SortOrder;

/// One returned document: stored fields flattened to name → value, single
/// values unwrapped from their one-element arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hit(pub BTreeMap<String, Value>);

impl Hit {
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(Value::as_i64)
    }

    pub fn insert<V: Into<Value>>(&mut self, field: &str, value: V) {
        self.0.insert(field.to_string(), value.into());
    }
}

/// A page of results plus continuation metadata. `last_cursor` is present
/// only when the underlying mode supports continuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub results: Vec<T>,
    pub page: usize,
    #[serde(rename = "pageSize")]
    pub page_size: usize,
    #[serde(rename = "totalHits")]
    pub total_hits: u64,
    #[serde(rename = "isTotalHitsExact")]
    pub is_total_hits_exact: bool,
    #[serde(rename = "lastCursor", skip_serializing_if = "Option::is_none")]
    pub last_cursor: Option<String>,
}

impl<T> PaginatedResult<T> {
    pub fn empty(page: usize, page_size: usize) -> Self {
        Self {
            results: Vec::new(),
            page,
            page_size,
            total_hits: 0,
            is_total_hits_exact: true,
            last_cursor: None,
        }
    }
}

/// One facet label with its count under the current drill-down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetValue {
    pub value: String,
    pub count: u64,
    #[serde(default)]
    pub selected: bool,
}

/// One facet dimension, formatted for the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetDimension {
    pub name: String,
    pub title: String,
    pub values: Vec<FacetValue>,
}

/// The `POST /search` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub page: usize,
    #[serde(rename = "pageSize")]
    pub page_size: usize,
    #[serde(rename = "totalHits")]
    pub total_hits: u64,
    #[serde(rename = "isTotalHitsExact")]
    pub is_total_hits_exact: bool,
    #[serde(rename = "sortBy")]
    pub sort_by: String,
    #[serde(rename = "sortOrder")]
    pub sort_order: SortOrder,
    #[serde(default)]
    pub suggestion: Vec<String>,
    #[serde(rename = "expandedEfoTerms", default)]
    pub expanded_efo_terms: HashSet<String>,
    #[serde(rename = "expandedSynonyms", default)]
    pub expanded_synonyms: HashSet<String>,
    #[serde(rename = "tooManyExpansionTerms", default)]
    pub too_many_expansion_terms: bool,
    /// The echoed query string; null when highlighting is disabled (and,
    /// on the error response, when the original was match-all).
    pub query: Option<String>,
    /// Null when no facet has any label.
    pub facets: Option<Vec<FacetDimension>>,
    pub hits: Vec<Hit>,
}

impl SearchResponse {
    /// The fallback body of a failed search: empty hits, default pagination.
    pub fn empty_with_defaults() -> Self {
        SearchResponse {
            page: 1,
            page_size: 20,
            total_hits: 0,
            is_total_hits_exact: true,
            sort_by: "relevance".into(),
            sort_order: SortOrder::Descending,
            suggestion: Vec::new(),
            expanded_efo_terms: HashSet::new(),
            expanded_synonyms: HashSet::new(),
            too_many_expansion_terms: false,
            query: None,
            facets: None,
            hits: Vec::new(),
        }
    }
}

/// Per-index metadata for the internal endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub location: String,
    #[serde(rename = "updateTime")]
    pub update_time: Option<i64>,
    pub size: u64,
    #[serde(rename = "numberOfDocuments")]
    pub number_of_documents: u64,
}

/// Indexing task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    NotFound,
    Queued,
    InProgress,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub message: String,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl TaskStatus {
    pub fn not_found(accession: &str) -> Self {
        TaskStatus {
            state: TaskState::NotFound,
            message: format!("no indexing task for '{}'", accession),
            task_id: None,
        }
    }
}

/// `202 Accepted` body for an enqueued indexing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexAccepted {
    #[serde(rename = "accNo")]
    pub acc_no: String,
    #[serde(rename = "queuePosition")]
    pub queue_position: usize,
    #[serde(rename = "taskId")]
    pub task_id: String,
    #[serde(rename = "statusUrl")]
    pub status_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_wire_format() {
        assert_eq!(serde_json::to_string(&TaskState::InProgress).unwrap(), r#""IN_PROGRESS""#);
        assert_eq!(serde_json::to_string(&TaskState::NotFound).unwrap(), r#""NOT_FOUND""#);
    }

    #[test]
    fn error_defaults_match_contract() {
        let r = SearchResponse::empty_with_defaults();
        assert_eq!(r.page, 1);
        assert_eq!(r.page_size, 20);
        assert_eq!(r.total_hits, 0);
        assert_eq!(r.sort_by, "relevance");
        assert_eq!(r.sort_order, SortOrder::Descending);
        assert!(r.query.is_none());
    }
}
