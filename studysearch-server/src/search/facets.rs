//! Facet counting and drill-down: per-dimension counts under the current
//! query, precise counts for selected values, and the UI formatting rules.

use std::collections::HashMap;
use std::sync::Arc;

use log::{error, warn};
use tantivy::collector::{Count, FacetCollector, MultiCollector};
use tantivy::schema::Facet;

use studysearch_types::{
    lower, BoolQuery, CollectionRegistry, Error, FacetDimension, FacetKind, FacetTermQuery,
    FacetValue, PropertyDescriptor, Query, Result,
};

use crate::index::pool::SharedPool;
use crate::query::security::Principal;
use crate::schema::{FACET_COLLECTION, FACET_RELEASE_YEAR, SUBMISSION};

pub struct FacetEngine {
    pool: SharedPool,
    registry: Arc<CollectionRegistry>,
}

impl FacetEngine {
    pub fn new(pool: SharedPool, registry: Arc<CollectionRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Narrow `base` by the selected facet values: one required clause per
    /// dimension, a disjunction across that dimension's values. Empty
    /// selections are ignored.
    pub fn drilldown(
        &self,
        base: Query,
        selections: &HashMap<String, Vec<String>>,
        collection: &str,
    ) -> Query {
        let mut query = base;
        let mut dims: Vec<&String> = selections.keys().collect();
        dims.sort();
        for dim in dims {
            let desc = match self.registry.descriptor(collection, dim) {
                Some(d) if d.is_facet() => d,
                _ => {
                    warn!("drill-down on unknown facet dimension '{}' ignored", dim);
                    continue;
                }
            };
            let values: Vec<&String> = selections[dim]
                .iter()
                .filter(|v| !v.trim().is_empty())
                .collect();
            if values.is_empty() {
                continue;
            }
            let mut leaves = Vec::with_capacity(values.len());
            for value in values {
                leaves.push(Query::FacetTerm(FacetTermQuery::new(
                    dim.clone(),
                    facet_path(desc, value),
                )));
            }
            let clause = if leaves.len() == 1 {
                leaves.remove(0)
            } else {
                BoolQuery::builder().should_all(leaves).build()
            };
            query = query.and(clause);
        }
        query
    }

    /// Facet counts for every visible dimension under `query`, formatted
    /// for the UI.
    pub fn facet_counts(
        &self,
        query: &Query,
        collection: &str,
        selections: &HashMap<String, Vec<String>>,
        limit: usize,
        principal: Option<&Principal>,
    ) -> Result<Vec<FacetDimension>> {
        let snapshot = self.pool.acquire(SUBMISSION)?;
        let outcome = self.count_under(&snapshot, query, collection, selections, limit, principal);
        if let Err(e) = self.pool.release(SUBMISSION, snapshot) {
            error!("release after facet counting failed: {}", e);
        }
        outcome
    }

    fn count_under(
        &self,
        snapshot: &crate::index::pool::ReaderSnapshot,
        query: &Query,
        collection: &str,
        selections: &HashMap<String, Vec<String>>,
        limit: usize,
        principal: Option<&Principal>,
    ) -> Result<Vec<FacetDimension>> {
        let searcher = snapshot.searcher();
        let schema = searcher.schema();
        let lowered = lower(query.clone(), schema)?;

        let visible = self.visible_descriptors(collection, principal);
        if visible.is_empty() {
            return Ok(Vec::new());
        }

        let mut collector = MultiCollector::new();
        let mut handles = Vec::with_capacity(visible.len());
        for desc in &visible {
            let field = schema
                .get_field(&desc.name)
                .ok_or_else(|| Error::UnknownField(desc.name.clone()))?;
            let mut facet_collector = FacetCollector::for_field(field);
            facet_collector.add_facet("/");
            handles.push(collector.add_collector(facet_collector));
        }
        let mut fruits = searcher.search(&*lowered, &collector)?;

        // Precise counts for the currently selected values under the same
        // drill-down.
        let mut selected_freq: HashMap<(String, String), u64> = HashMap::new();
        for (dim, values) in selections {
            let desc = match self.registry.descriptor(collection, dim) {
                Some(d) if d.is_facet() => d,
                _ => continue,
            };
            for value in values {
                let filter = Query::FacetTerm(FacetTermQuery::new(
                    dim.clone(),
                    facet_path(desc, value),
                ));
                let narrowed = lower(query.clone().and(filter), schema)?;
                let count = searcher.search(&*narrowed, &Count)?;
                selected_freq.insert((dim.clone(), value.clone()), count as u64);
            }
        }

        let mut dimensions = Vec::new();
        for (desc, handle) in visible.iter().zip(handles) {
            let counts = handle.extract(&mut fruits);
            let release_year = desc.name == FACET_RELEASE_YEAR;
            let mut values: Vec<FacetValue> = if release_year {
                counts
                    .get("/")
                    .map(|(facet, count)| to_value(facet, count))
                    .collect()
            } else {
                counts
                    .top_k("/", limit)
                    .into_iter()
                    .map(|(facet, count)| to_value(facet, count))
                    .collect()
            };

            if !desc.na_visible {
                let na = desc.na_label().to_lowercase();
                values.retain(|v| v.value.to_lowercase() != na);
            }

            // Selected low-frequency labels re-enter ahead of the list.
            if let Some(selected) = selections.get(&desc.name) {
                let mut prepend = Vec::new();
                for value in selected {
                    if values.iter().any(|v| v.value == *value) {
                        continue;
                    }
                    let count = selected_freq
                        .get(&(desc.name.clone(), value.clone()))
                        .copied()
                        .unwrap_or(0);
                    prepend.push(FacetValue {
                        value: value.clone(),
                        count,
                        selected: true,
                    });
                }
                prepend.extend(values);
                values = prepend;
                for v in &mut values {
                    if selected.contains(&v.value) {
                        v.selected = true;
                    }
                }
            }

            if release_year {
                values.sort_by(|a, b| b.value.cmp(&a.value));
                values.retain(|v| !v.value.eq_ignore_ascii_case("n/a"));
                values.truncate(limit);
            } else {
                values.sort_by(|a, b| a.value.cmp(&b.value));
            }

            if values.is_empty() {
                continue;
            }
            dimensions.push(FacetDimension {
                name: desc.name.clone(),
                title: desc.title.clone(),
                values,
            });
        }
        Ok(dimensions)
    }

    fn visible_descriptors(
        &self,
        collection: &str,
        principal: Option<&Principal>,
    ) -> Vec<PropertyDescriptor> {
        let authorised = principal.map(|p| p.superuser).unwrap_or(false);
        self.registry
            .effective(collection)
            .into_iter()
            .filter(|d| d.is_facet())
            .filter(|d| !d.private || authorised)
            .filter(|d| {
                // The collection dimension is hidden inside a non-public
                // collection that has no subcollections.
                if d.name != FACET_COLLECTION {
                    return true;
                }
                collection == "public" || !self.registry.children(collection).is_empty()
            })
            .cloned()
            .collect()
    }
}

/// The facet path of a user-facing value: a single escaped segment for
/// plain dimensions, a `/`-separated path for hierarchical ones.
fn facet_path(desc: &PropertyDescriptor, value: &str) -> String {
    let value = if desc.to_lower_case {
        value.to_lowercase()
    } else {
        value.to_string()
    };
    let facet = match desc.facet_kind {
        Some(FacetKind::Hierarchical) => Facet::from_path(value.split('/').map(|s| s.trim())),
        _ => Facet::from_path(std::iter::once(value.as_str())),
    };
    facet.to_string()
}

fn to_value(facet: &Facet, count: u64) -> FacetValue {
    let path = facet.to_string();
    let label = path.rsplit('/').next().unwrap_or(&path).to_string();
    FacetValue {
        value: label,
        count,
        selected: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{default_registry, FACET_STUDY_TYPE};
    use studysearch_types::FieldKind;

    fn engine_registry() -> Arc<CollectionRegistry> {
        Arc::new(default_registry())
    }

    #[test]
    fn drilldown_adds_one_clause_per_dimension() {
        let registry = engine_registry();
        let (_dir, pool) = crate::index::pool::tests::test_pool();
        let engine = FacetEngine::new(pool, registry);
        let mut selections = HashMap::new();
        selections.insert(FACET_STUDY_TYPE.to_string(), vec!["rna-seq".to_string()]);
        selections.insert(FACET_COLLECTION.to_string(), vec!["Public".to_string()]);
        let query = engine.drilldown(Query::All, &selections, "public");
        match query {
            Query::Boolean { bool } => {
                assert_eq!(bool.must_clauses().len(), 2);
                // lower-cased dimension values fold before matching
                match &bool.must_clauses()[0] {
                    Query::FacetTerm(f) => {
                        assert_eq!(f.field(), FACET_COLLECTION);
                        assert_eq!(f.path(), "/public");
                    }
                    other => panic!("expected facet clause, got {:?}", other),
                }
            }
            other => panic!("expected conjunction, got {:?}", other),
        }
    }

    #[test]
    fn unknown_dimension_is_ignored() {
        let registry = engine_registry();
        let (_dir, pool) = crate::index::pool::tests::test_pool();
        let engine = FacetEngine::new(pool, registry);
        let mut selections = HashMap::new();
        selections.insert("bogus".to_string(), vec!["x".to_string()]);
        assert_eq!(engine.drilldown(Query::All, &selections, "public"), Query::All);
    }

    #[test]
    fn hierarchical_paths_keep_segments() {
        let desc = PropertyDescriptor::new("ontology", FieldKind::Facet)
            .facet(FacetKind::Hierarchical);
        assert_eq!(facet_path(&desc, "cell/leukocyte"), "/cell/leukocyte");
        let plain = PropertyDescriptor::new("study_type", FieldKind::Facet)
            .facet(FacetKind::Plain)
            .lower_cased();
        assert_eq!(facet_path(&plain, "RNA-seq"), "/rna-seq");
    }
}
