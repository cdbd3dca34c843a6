//! Request bodies accepted by the service and the internal search criteria
//! they are translated into.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::query::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Descending
    }
}

/// A sort directive over a sortable field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl Sort {
    pub fn descending<F: Into<String>>(field: F) -> Self {
        Sort {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }

    pub fn ascending<F: Into<String>>(field: F) -> Self {
        Sort {
            field: field.into(),
            order: SortOrder::Ascending,
        }
    }
}

/// The body of `POST /search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "SearchRequest::default_collection")]
    pub collection: String,
    #[serde(default = "SearchRequest::default_page")]
    pub page: usize,
    #[serde(default = "SearchRequest::default_page_size", rename = "pageSize")]
    pub page_size: usize,
    #[serde(default, rename = "sortBy")]
    pub sort_by: Option<String>,
    #[serde(default, rename = "sortOrder")]
    pub sort_order: SortOrder,
    /// Facet drill-down: dimension → selected values.
    #[serde(default)]
    pub facets: HashMap<String, Vec<String>>,
    /// Field filters: field → required terms; keys also select the parse
    /// field set.
    #[serde(default)]
    pub fields: HashMap<String, Vec<String>>,
    #[serde(default, rename = "facetLimit")]
    pub facet_limit: Option<usize>,
    #[serde(default = "SearchRequest::default_highlighting", rename = "highlightingEnabled")]
    pub highlighting_enabled: bool,
}

impl SearchRequest {
    pub fn default_collection() -> String {
        "public".to_string()
    }

    pub const fn default_page() -> usize {
        1
    }

    pub const fn default_page_size() -> usize {
        20
    }

    pub const fn default_highlighting() -> bool {
        true
    }

    /// The page size ceiling of the wire contract. The executor applies its
    /// own, looser caps for non-HTTP callers.
    pub const MAX_REQUEST_PAGE_SIZE: usize = 100;

    pub fn validate(&self) -> crate::Result<()> {
        if self.page < 1 {
            return Err(Error::InvalidArgument("page must be >= 1".into()));
        }
        if self.page_size < 1 || self.page_size > Self::MAX_REQUEST_PAGE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "pageSize must be in [1, {}]",
                Self::MAX_REQUEST_PAGE_SIZE
            )));
        }
        Ok(())
    }
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            query: None,
            collection: Self::default_collection(),
            page: Self::default_page(),
            page_size: Self::default_page_size(),
            sort_by: None,
            sort_order: SortOrder::default(),
            facets: HashMap::new(),
            fields: HashMap::new(),
            facet_limit: None,
            highlighting_enabled: true,
        }
    }
}

/// What the executor runs. Pagination and `limit` are mutually exclusive;
/// `search_after` requires `sort`.
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    pub query: Query,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub sort: Option<Sort>,
    pub limit: Option<usize>,
    pub search_after: Option<String>,
}

impl SearchCriteria {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            page: None,
            page_size: None,
            sort: None,
            limit: None,
            search_after: None,
        }
    }

    pub fn paginated(query: Query, page: usize, page_size: usize) -> Self {
        let mut c = Self::new(query);
        c.page = Some(page);
        c.page_size = Some(page_size);
        c
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cursor<C: Into<String>>(mut self, cursor: C) -> Self {
        self.search_after = Some(cursor.into());
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.page.is_some() && self.limit.is_some() {
            return Err(Error::InvalidArgument(
                "pagination and limit are mutually exclusive".into(),
            ));
        }
        if self.page.is_some() != self.page_size.is_some() {
            return Err(Error::InvalidArgument(
                "page and pageSize must be supplied together".into(),
            ));
        }
        if self.search_after.is_some() && self.sort.is_none() {
            return Err(Error::InvalidArgument("search-after requires a sort".into()));
        }
        Ok(())
    }
}

/// The body of `POST /submissions/{accNo}/index`: the flat field map the
/// external extractor produced, plus per-file maps and the raw pagetab.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSubmissionRequest {
    #[serde(default)]
    pub fields: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub files: Vec<HashMap<String, String>>,
    #[serde(default)]
    pub pagetab: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;

    #[test]
    fn search_request_defaults() {
        let req: SearchRequest = serde_json::from_str(r#"{"query":"leukocyte"}"#).unwrap();
        assert_eq!(req.page, 1);
        assert_eq!(req.page_size, 20);
        assert_eq!(req.collection, "public");
        assert_eq!(req.sort_order, SortOrder::Descending);
        assert!(req.highlighting_enabled);
    }

    #[test]
    fn request_rejects_oversized_page_size() {
        let mut req = SearchRequest::default();
        req.page_size = SearchRequest::MAX_REQUEST_PAGE_SIZE + 1;
        assert!(req.validate().is_err());
        req.page_size = SearchRequest::MAX_REQUEST_PAGE_SIZE;
        assert!(req.validate().is_ok());
        req.page_size = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn criteria_rejects_cursor_without_sort() {
        let c = SearchCriteria::new(Query::All).with_cursor("10:abc");
        assert!(c.validate().is_err());
    }

    #[test]
    fn criteria_rejects_page_with_limit() {
        let mut c = SearchCriteria::paginated(Query::All, 1, 10);
        c.limit = Some(5);
        assert!(c.validate().is_err());
    }
}
