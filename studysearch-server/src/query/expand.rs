//! Ontology-aware query expansion: leaves over expander-enabled fields grow
//! a disjunction of the original term plus ontology synonyms and related
//! terms, bounded globally. Expansion failures never fail a search.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};
use tantivy::collector::TopDocs;

use studysearch_types::{
    lower, BoolQuery, CollectionRegistry, Error, ExactTerm, Expansion, Query, QueryResult, Result,
};

use crate::index::pool::SharedPool;
use crate::schema::{EFO, EFO_ALT_TERM, EFO_CHILD_TERM, EFO_EXPANSION, EFO_SYNONYM};

/// Expansion stops adding disjuncts beyond this many terms per query.
pub const MAX_EXPANSION_TERMS: usize = 100;

/// How many ontology documents feed one leaf's expansion.
const EXPANSION_DOC_LIMIT: usize = 16;

pub struct QueryExpander {
    pool: SharedPool,
    registry: Arc<CollectionRegistry>,
}

impl QueryExpander {
    pub fn new(pool: SharedPool, registry: Arc<CollectionRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Rewrite `query`, collecting expansion metadata. Infallible: any
    /// lookup failure downgrades to "no expansion".
    pub fn expand(&self, query: Query, collection: &str) -> QueryResult {
        let (query, expansion) = self.expand_node(query, collection);
        QueryResult { query, expansion }
    }

    fn expand_node(&self, query: Query, collection: &str) -> (Query, Expansion) {
        match query {
            Query::All => (Query::All, Expansion::default()),
            Query::FacetTerm(q) => (Query::FacetTerm(q), Expansion::default()),
            Query::Boolean { bool } => {
                let (must, must_not, should) = bool.into_clauses();
                let mut expansion = Expansion::default();
                let mut expand_all = |clauses: Vec<Query>| -> Vec<Query> {
                    clauses
                        .into_iter()
                        .map(|c| {
                            let (q, e) = self.expand_node(c, collection);
                            expansion.merge(e);
                            q
                        })
                        .collect()
                };
                let must = expand_all(must);
                let must_not = expand_all(must_not);
                let should = expand_all(should);
                (
                    Query::Boolean {
                        bool: BoolQuery::with_clauses(must, must_not, should),
                    },
                    expansion,
                )
            }
            leaf => self.expand_leaf(leaf, collection),
        }
    }

    fn expand_leaf(&self, leaf: Query, collection: &str) -> (Query, Expansion) {
        let field = match leaf.field() {
            Some(f) => f.to_string(),
            None => return (leaf, Expansion::default()),
        };
        let expandable = self
            .registry
            .descriptor(collection, &field)
            .map(|d| d.expanded)
            .unwrap_or(false);
        if !expandable {
            return (leaf, Expansion::default());
        }

        let (efo_terms, synonyms) = match self.lookup(&leaf) {
            Ok(found) => found,
            Err(e) => {
                debug!("expansion lookup failed on '{}': {}", field, e);
                return (leaf, Expansion::default());
            }
        };

        // The term cap applies to the raw lookup result; redundancy drops
        // only happen once expansion is going ahead.
        if efo_terms.len() + synonyms.len() > MAX_EXPANSION_TERMS {
            return (
                leaf,
                Expansion {
                    expanded_efo_terms: HashSet::new(),
                    expanded_synonyms: HashSet::new(),
                    too_many_expansion_terms: true,
                },
            );
        }

        let original = leaf.text().map(|t| t.to_lowercase()).unwrap_or_default();
        let keep = |term: &String| -> bool {
            if term.to_lowercase() == original {
                return false;
            }
            match &leaf {
                Query::Prefix(p) => !p.covers(term),
                Query::Wildcard(w) => !w.covers(term),
                _ => true,
            }
        };
        let efo_terms: HashSet<String> = efo_terms.into_iter().filter(|t| keep(t)).collect();
        let synonyms: HashSet<String> = synonyms.into_iter().filter(|t| keep(t)).collect();

        if efo_terms.is_empty() && synonyms.is_empty() {
            return (leaf, Expansion::default());
        }

        let mut builder = BoolQuery::builder().should(leaf);
        for term in synonyms.iter().chain(efo_terms.iter()) {
            builder = builder.should(Query::term_or_phrase(&field, &term.to_lowercase()));
        }
        (
            builder.build(),
            Expansion {
                expanded_efo_terms: efo_terms,
                expanded_synonyms: synonyms,
                too_many_expansion_terms: false,
            },
        )
    }

    /// Run the leaf, retargeted at the ontology expansion field, and gather
    /// the stored synonyms and child terms of the matching nodes.
    fn lookup(&self, leaf: &Query) -> Result<(HashSet<String>, HashSet<String>)> {
        let lookup_query = match leaf {
            Query::Exact(t) => Query::Exact(ExactTerm::with_term(
                EFO_EXPANSION.to_string(),
                t.value().to_lowercase(),
            )),
            // A phrase is one lower-cased space-joined token in the
            // keyword-analyzed expansion field.
            Query::Phrase(p) => Query::Exact(ExactTerm::with_term(
                EFO_EXPANSION.to_string(),
                p.terms().join(" ").to_lowercase(),
            )),
            Query::Fuzzy(f) => Query::Fuzzy(f.on_field(EFO_EXPANSION)),
            Query::Range(r) => Query::Range(r.on_field(EFO_EXPANSION)),
            Query::Prefix(p) => Query::Prefix(studysearch_types::PrefixQuery::new(
                EFO_EXPANSION.to_string(),
                p.prefix().to_lowercase(),
            )),
            Query::Wildcard(w) => Query::Wildcard(studysearch_types::WildcardQuery::new(
                EFO_EXPANSION.to_string(),
                w.pattern().to_lowercase(),
            )),
            _ => return Ok((HashSet::new(), HashSet::new())),
        };

        let snapshot = self.pool.acquire(EFO)?;
        let gathered = (|| -> Result<(HashSet<String>, HashSet<String>)> {
            let searcher = snapshot.searcher();
            let schema = searcher.schema();
            let query = lower(lookup_query, schema)?;
            let top = searcher.search(&*query, &TopDocs::with_limit(EXPANSION_DOC_LIMIT))?;

            let synonym_field = schema
                .get_field(EFO_SYNONYM)
                .ok_or_else(|| Error::UnknownField(EFO_SYNONYM.into()))?;
            let alt_field = schema
                .get_field(EFO_ALT_TERM)
                .ok_or_else(|| Error::UnknownField(EFO_ALT_TERM.into()))?;
            let child_field = schema
                .get_field(EFO_CHILD_TERM)
                .ok_or_else(|| Error::UnknownField(EFO_CHILD_TERM.into()))?;

            let mut synonyms = HashSet::new();
            let mut efo_terms = HashSet::new();
            for (_score, address) in top {
                let doc = searcher.doc(address)?;
                for value in doc.get_all(synonym_field).filter_map(|v| v.as_text()) {
                    synonyms.insert(value.to_string());
                }
                for value in doc.get_all(alt_field).filter_map(|v| v.as_text()) {
                    synonyms.insert(value.to_string());
                }
                for value in doc.get_all(child_field).filter_map(|v| v.as_text()) {
                    efo_terms.insert(value.to_string());
                }
            }
            Ok((efo_terms, synonyms))
        })();
        if let Err(e) = self.pool.release(EFO, snapshot) {
            warn!("snapshot release failed: {}", e);
        }
        gathered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::pool::tests::test_pool;
    use crate::ontology::loader::{tests::leukocyte_records, OntologyLoader};
    use crate::schema::default_registry;

    async fn expander() -> (tempfile::TempDir, QueryExpander) {
        let (dir, pool) = test_pool();
        let loader = OntologyLoader::new(Arc::clone(&pool));
        loader.load_records(&leukocyte_records()).await.unwrap();
        let expander = QueryExpander::new(pool, Arc::new(default_registry()));
        (dir, expander)
    }

    #[tokio::test]
    async fn term_on_expandable_field_grows_disjunction() {
        let (_dir, expander) = expander().await;
        let leaf = Query::Exact(ExactTerm::with_term("content".into(), "leukocyte".into()));
        let result = expander.expand(leaf, "public");

        assert!(result.expansion.expanded_efo_terms.contains("osteoclast"));
        assert!(result.expansion.expanded_synonyms.contains("white blood cell"));
        assert!(!result.expansion.too_many_expansion_terms);
        match result.query {
            Query::Boolean { bool } => {
                assert!(bool.should_clauses().len() >= 3);
                assert!(bool
                    .should_clauses()
                    .iter()
                    .all(|c| c.field() == Some("content")));
            }
            other => panic!("expected disjunction, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_expandable_field_is_unchanged() {
        let (_dir, expander) = expander().await;
        let leaf = Query::Exact(ExactTerm::with_term("author".into(), "leukocyte".into()));
        let result = expander.expand(leaf.clone(), "public");
        assert_eq!(result.query, leaf);
        assert!(result.expansion.is_empty());
    }

    #[tokio::test]
    async fn match_all_is_unchanged() {
        let (_dir, expander) = expander().await;
        let result = expander.expand(Query::All, "public");
        assert_eq!(result.query, Query::All);
        assert!(result.expansion.is_empty());
    }

    #[tokio::test]
    async fn prefix_redundancy_drops_covered_terms() {
        let (_dir, expander) = expander().await;
        // "leukocyte*" covers nothing among the synonyms, but "o*" would
        // cover "osteoclast"; verify the drop rule over a prefix leaf.
        let leaf = Query::Prefix(studysearch_types::PrefixQuery::new(
            "content".into(),
            "leukocyte".into(),
        ));
        let result = expander.expand(leaf, "public");
        assert!(result.expansion.expanded_synonyms.contains("white blood cell"));
        assert!(!result
            .expansion
            .expanded_synonyms
            .iter()
            .any(|t| t.starts_with("leukocyte")));
    }

    #[tokio::test]
    async fn unknown_term_expands_to_nothing() {
        let (_dir, expander) = expander().await;
        let leaf = Query::Exact(ExactTerm::with_term("content".into(), "zebrafish".into()));
        let result = expander.expand(leaf.clone(), "public");
        assert_eq!(result.query, leaf);
        assert!(result.expansion.is_empty());
    }
}
