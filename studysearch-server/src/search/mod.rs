//! Search execution and post-processing: the executor, facet engine,
//! response processor, spell suggester and the facade tying them together.

pub mod executor;
pub mod facets;
pub mod response;
pub mod service;
pub mod suggest;

pub use executor::{
    SearchExecutor, DEFAULT_MAX_RESULTS, MAX_PAGE_SIZE, MAX_TOTAL_DOCS_FOR_PAGINATION,
};
pub use facets::FacetEngine;
pub use response::ResponseProcessor;
pub use service::SearchService;
pub use suggest::SpellChecker;
