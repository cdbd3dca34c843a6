#![forbid(unsafe_code)]
#![warn(clippy::all)]
//! The indexing and search core of a scientific-study repository: a pool of
//! inverted indexes over submissions, their files and page-tab documents,
//! an ontology term store driving query expansion and autocomplete, and the
//! HTTP surface serving keyword, field, faceted, paginated and
//! spell-corrected queries.

pub mod analyzers;
pub mod auth;
pub mod handlers;
pub mod index;
pub mod ontology;
pub mod query;
pub mod router;
pub mod schema;
pub mod search;
pub mod settings;
pub mod support;

pub use index::pool::{IndexPool, SharedPool};

pub type Result<T> = std::result::Result<T, studysearch_types::Error>;
