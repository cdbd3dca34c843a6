//! The ontology subsystem: the in-memory term store, the index loader and
//! the autocomplete/tree navigator.

pub mod autocomplete;
pub mod loader;
pub mod store;

pub use autocomplete::AutocompleteService;
pub use loader::{OntologyLoader, OntologyNodeRecord};
pub use store::OntologyStore;
