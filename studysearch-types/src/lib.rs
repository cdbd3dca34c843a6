#![warn(clippy::all)]
//! Shared types for the study-repository search engine: the error taxonomy,
//! the query DSL and its lowering to Tantivy queries, field schema metadata,
//! and the request/response DTOs of the HTTP surface.

pub use error::{Error, ErrorResponse};
pub use field::{CollectionRegistry, FacetKind, FieldKind, ParserKind, PropertyDescriptor};
pub use query::{
    boolean::{lower, BoolQuery, BoolQueryBuilder},
    facet::FacetTermQuery,
    fuzzy::{FuzzyQuery, FuzzyTerm},
    phrase::PhraseQuery,
    range::{RangeQuery, Ranges},
    term::ExactTerm,
    wildcard::{PrefixQuery, WildcardQuery},
    CreateQuery, Expansion, KeyValue, Query, QueryResult,
};
pub use request::{IndexSubmissionRequest, SearchCriteria, SearchRequest, Sort, SortOrder};
pub use response::{
    FacetDimension, FacetValue, Hit, IndexAccepted, IndexMetadata, PaginatedResult,
    SearchResponse, TaskState, TaskStatus,
};

/// Result type used across the engine.
pub type Result<T> = std::result::Result<T, error::Error>;

/// Errors visible to callers and their HTTP mapping.
mod error;

/// Field schema metadata and the collection registry.
mod field;

/// The query DSL.
mod query;

/// Request bodies and search criteria.
mod request;

/// Response DTOs.
mod response;
