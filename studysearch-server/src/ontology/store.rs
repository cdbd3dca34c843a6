//! In-memory ontology term store: term/id maps, ancestor chains and the
//! longest-match free-text scanner. Built once from the ontology index after
//! it is opened; read-only and lock-free afterwards.

use std::collections::{HashMap, HashSet};

use log::{info, warn};
use once_cell::sync::OnceCell;
use regex::Regex;

use studysearch_types::{Error, Result};

use crate::index::pool::IndexPool;
use crate::schema::{EFO, EFO_ALT_TERM, EFO_ID, EFO_PARENT, EFO_TERM};

struct OntologyMaps {
    /// lowercase term (primary or alternative) → ontology id
    term_to_id: HashMap<String, String>,
    /// ontology id → original-case primary term
    id_to_term: HashMap<String, String>,
    /// lowercase term → `[root … immediate parent]`, original case
    term_to_ancestors: HashMap<String, Vec<String>>,
    /// every known lowercase term
    all_terms: HashSet<String>,
    /// ontology id → ids of direct children (canonical parent edge)
    id_to_children: HashMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct OntologyStore {
    maps: OnceCell<OntologyMaps>,
    ignore: HashSet<String>,
}

impl OntologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ignore` holds lowercase terms excluded from free-text matching.
    pub fn with_ignore_list(ignore: HashSet<String>) -> Self {
        Self {
            maps: OnceCell::new(),
            ignore,
        }
    }

    /// One-shot sweep of the ontology index. Callers must not use the match
    /// methods before this returns.
    pub fn initialize(&self, pool: &IndexPool) -> Result<()> {
        if self.maps.get().is_some() {
            return Err(Error::Internal("ontology store already initialized".into()));
        }
        let snapshot = pool.acquire(EFO)?;
        let loaded = self.sweep(pool, &snapshot);
        pool.release(EFO, snapshot)?;
        let maps = loaded?;
        info!(
            "ontology store loaded: {} terms, {} ids",
            maps.all_terms.len(),
            maps.id_to_term.len()
        );
        self.maps
            .set(maps)
            .map_err(|_| Error::Internal("ontology store already initialized".into()))
    }

    fn sweep(
        &self,
        _pool: &IndexPool,
        snapshot: &crate::index::pool::ReaderSnapshot,
    ) -> Result<OntologyMaps> {
        let searcher = snapshot.searcher();
        let schema = searcher.schema();
        let id_field = schema
            .get_field(EFO_ID)
            .ok_or_else(|| Error::UnknownField(EFO_ID.into()))?;
        let term_field = schema
            .get_field(EFO_TERM)
            .ok_or_else(|| Error::UnknownField(EFO_TERM.into()))?;
        let alt_field = schema
            .get_field(EFO_ALT_TERM)
            .ok_or_else(|| Error::UnknownField(EFO_ALT_TERM.into()))?;
        let parent_field = schema
            .get_field(EFO_PARENT)
            .ok_or_else(|| Error::UnknownField(EFO_PARENT.into()))?;

        let mut id_to_term = HashMap::new();
        let mut term_to_id = HashMap::new();
        let mut id_to_parent = HashMap::new();
        let mut id_to_children: HashMap<String, Vec<String>> = HashMap::new();
        let mut alt_terms: Vec<(String, String)> = Vec::new();

        for segment in searcher.segment_readers() {
            let store = segment.get_store_reader(100)?;
            for doc_id in segment.doc_ids_alive() {
                let doc = store.get(doc_id)?;
                let id = match doc.get_first(id_field).and_then(|v| v.as_text()) {
                    Some(id) => id.to_string(),
                    None => continue,
                };
                let term = match doc.get_first(term_field).and_then(|v| v.as_text()) {
                    Some(t) if !t.is_empty() => t.to_string(),
                    _ => {
                        warn!("ontology node '{}' has no primary term", id);
                        continue;
                    }
                };
                // Primary terms first; alternatives join afterwards with
                // put-if-absent semantics.
                term_to_id.insert(term.to_lowercase(), id.clone());
                for alt in doc.get_all(alt_field).filter_map(|v| v.as_text()) {
                    alt_terms.push((alt.to_lowercase(), id.clone()));
                }
                if let Some(parent) = doc.get_first(parent_field).and_then(|v| v.as_text()) {
                    if !parent.is_empty() {
                        id_to_parent.insert(id.clone(), parent.to_string());
                        id_to_children
                            .entry(parent.to_string())
                            .or_insert_with(Vec::new)
                            .push(id.clone());
                    }
                }
                id_to_term.insert(id, term);
            }
        }

        for (alt, id) in alt_terms {
            term_to_id.entry(alt).or_insert(id);
        }

        // Ancestor chains over the canonical parent edge, memoised.
        let mut id_ancestors: HashMap<String, Vec<String>> = HashMap::new();
        for id in id_to_term.keys() {
            ancestors_of(id, &id_to_parent, &id_to_term, &mut id_ancestors);
        }

        let mut term_to_ancestors = HashMap::new();
        for (term, id) in &term_to_id {
            if let Some(chain) = id_ancestors.get(id) {
                term_to_ancestors.insert(term.clone(), chain.clone());
            }
        }

        let all_terms: HashSet<String> = term_to_id.keys().cloned().collect();

        Ok(OntologyMaps {
            term_to_id,
            id_to_term,
            term_to_ancestors,
            all_terms,
            id_to_children,
        })
    }

    fn maps(&self) -> Option<&OntologyMaps> {
        self.maps.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.maps.get().is_some()
    }

    /// Scan `text` for ontology terms: case-insensitive word-boundary
    /// matching, longest match wins among overlaps, results mapped to their
    /// primary terms and deduplicated in first-seen order.
    pub fn find_efo_terms(&self, text: &str) -> Vec<String> {
        let maps = match self.maps() {
            Some(m) => m,
            None => return Vec::new(),
        };
        let text_lower = text.to_lowercase();
        let mut candidates: Vec<(usize, usize, &String)> = Vec::new();
        for term in &maps.all_terms {
            if self.ignore.contains(term) || !text_lower.contains(term.as_str()) {
                continue;
            }
            let pattern = format!(r"\b{}\b", regex::escape(term));
            let re = match Regex::new(&pattern) {
                Ok(re) => re,
                Err(_) => continue,
            };
            for m in re.find_iter(&text_lower) {
                candidates.push((m.start(), m.end(), term));
            }
        }
        candidates.sort_by(|a, b| {
            let len_a = a.1 - a.0;
            let len_b = b.1 - b.0;
            len_b.cmp(&len_a).then(a.0.cmp(&b.0))
        });

        let mut taken: Vec<(usize, usize)> = Vec::new();
        let mut kept: Vec<&String> = Vec::new();
        for (start, end, term) in candidates {
            if taken.iter().any(|&(s, e)| start < e && s < end) {
                continue;
            }
            taken.push((start, end));
            kept.push(term);
        }
        // Report in source order, deduplicated by primary term.
        let mut order: Vec<(usize, &String)> = taken
            .iter()
            .map(|&(s, _)| s)
            .zip(kept.into_iter())
            .collect();
        order.sort_by_key(|&(s, _)| s);

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (_, term) in order {
            if let Some(primary) = maps
                .term_to_id
                .get(term.as_str())
                .and_then(|id| maps.id_to_term.get(id))
            {
                if seen.insert(primary.clone()) {
                    out.push(primary.clone());
                }
            }
        }
        out
    }

    /// `[root … immediate parent]` of a term, case-insensitive lookup.
    pub fn get_ancestors(&self, term: &str) -> Vec<String> {
        self.maps()
            .and_then(|m| m.term_to_ancestors.get(&term.to_lowercase()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_efo_id(&self, term: &str) -> Option<String> {
        self.maps()?.term_to_id.get(&term.to_lowercase()).cloned()
    }

    pub fn get_term(&self, id: &str) -> Option<String> {
        self.maps()?.id_to_term.get(id).cloned()
    }

    pub fn is_efo_term(&self, term: &str) -> bool {
        self.maps()
            .map(|m| m.all_terms.contains(&term.to_lowercase()))
            .unwrap_or(false)
    }

    pub fn has_children(&self, id: &str) -> bool {
        self.maps()
            .and_then(|m| m.id_to_children.get(id))
            .map(|c| !c.is_empty())
            .unwrap_or(false)
    }

    /// Direct children as `(id, primary term, has_children)`.
    pub fn children(&self, id: &str) -> Vec<(String, String, bool)> {
        let maps = match self.maps() {
            Some(m) => m,
            None => return Vec::new(),
        };
        maps.id_to_children
            .get(id)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|child| {
                        maps.id_to_term.get(child).map(|term| {
                            (
                                child.clone(),
                                term.clone(),
                                maps.id_to_children
                                    .get(child)
                                    .map(|c| !c.is_empty())
                                    .unwrap_or(false),
                            )
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Lower-cased facet path segments `[root, …, term]` for a term.
    pub fn facet_segments(&self, term: &str) -> Option<Vec<String>> {
        let maps = self.maps()?;
        let lower = term.to_lowercase();
        let id = maps.term_to_id.get(&lower)?;
        let primary = maps.id_to_term.get(id)?;
        let mut segments: Vec<String> = maps
            .term_to_ancestors
            .get(&primary.to_lowercase())
            .map(|chain| chain.iter().map(|t| t.to_lowercase()).collect())
            .unwrap_or_default();
        segments.push(primary.to_lowercase());
        Some(segments)
    }

    /// Facet path segments for a node id.
    pub fn facet_segments_for_id(&self, id: &str) -> Option<Vec<String>> {
        let term = self.get_term(id)?;
        self.facet_segments(&term)
    }
}

fn ancestors_of<'a>(
    id: &'a str,
    id_to_parent: &'a HashMap<String, String>,
    id_to_term: &HashMap<String, String>,
    memo: &mut HashMap<String, Vec<String>>,
) -> Vec<String> {
    if let Some(chain) = memo.get(id) {
        return chain.clone();
    }
    // Walk the canonical-parent chain iteratively; the graph is declared
    // acyclic but a corrupt index must not hang the sweep.
    let mut chain_ids: Vec<&str> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut current = id;
    while let Some(parent) = id_to_parent.get(current) {
        if !visited.insert(parent.as_str()) {
            warn!("parent cycle detected at ontology node '{}'", parent);
            break;
        }
        chain_ids.push(parent);
        current = parent;
    }
    chain_ids.reverse();
    let chain: Vec<String> = chain_ids
        .iter()
        .filter_map(|pid| id_to_term.get(*pid).cloned())
        .collect();
    memo.insert(id.to_string(), chain.clone());
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(nodes: &[(&str, &str, Option<&str>, &[&str])]) -> OntologyStore {
        // (id, term, parent, alt terms)
        let mut term_to_id = HashMap::new();
        let mut id_to_term = HashMap::new();
        let mut id_to_parent = HashMap::new();
        let mut id_to_children: HashMap<String, Vec<String>> = HashMap::new();
        for (id, term, parent, alts) in nodes {
            id_to_term.insert(id.to_string(), term.to_string());
            term_to_id.insert(term.to_lowercase(), id.to_string());
            for alt in *alts {
                term_to_id
                    .entry(alt.to_lowercase())
                    .or_insert_with(|| id.to_string());
            }
            if let Some(p) = parent {
                id_to_parent.insert(id.to_string(), p.to_string());
                id_to_children
                    .entry(p.to_string())
                    .or_insert_with(Vec::new)
                    .push(id.to_string());
            }
        }
        let mut memo = HashMap::new();
        for id in id_to_term.keys() {
            ancestors_of(id, &id_to_parent, &id_to_term, &mut memo);
        }
        let mut term_to_ancestors = HashMap::new();
        for (term, id) in &term_to_id {
            term_to_ancestors.insert(term.clone(), memo.get(id).cloned().unwrap_or_default());
        }
        let all_terms = term_to_id.keys().cloned().collect();
        let store = OntologyStore::new();
        store
            .maps
            .set(OntologyMaps {
                term_to_id,
                id_to_term,
                term_to_ancestors,
                all_terms,
                id_to_children,
            })
            .ok()
            .unwrap();
        store
    }

    fn cell_store() -> OntologyStore {
        store_with(&[
            ("efo:0", "cell", None, &[]),
            ("efo:1", "leukocyte", Some("efo:0"), &["white blood cell"]),
            ("efo:2", "osteoclast", Some("efo:1"), &[]),
        ])
    }

    #[test]
    fn longest_match_wins_and_overlaps_drop() {
        let store = cell_store();
        let found = store.find_efo_terms("A white blood cell count and a leukocyte image");
        // "white blood cell" covers "cell"; both map terms resolve to primaries.
        assert_eq!(found, vec!["leukocyte".to_string()]);
    }

    #[test]
    fn matches_are_word_bounded() {
        let store = cell_store();
        assert!(store.find_efo_terms("cellular assays").is_empty());
        assert_eq!(store.find_efo_terms("one cell only"), vec!["cell".to_string()]);
    }

    #[test]
    fn dedup_preserves_first_seen_order() {
        let store = cell_store();
        let found = store.find_efo_terms("osteoclast near a cell beside an osteoclast");
        assert_eq!(found, vec!["osteoclast".to_string(), "cell".to_string()]);
    }

    #[test]
    fn ancestors_run_root_first() {
        let store = cell_store();
        assert_eq!(
            store.get_ancestors("osteoclast"),
            vec!["cell".to_string(), "leukocyte".to_string()]
        );
        assert!(store.get_ancestors("cell").is_empty());
        // alternative terms resolve through the same node
        assert_eq!(store.get_ancestors("White Blood Cell"), vec!["cell".to_string()]);
    }

    #[test]
    fn facet_segments_are_lowercased_paths() {
        let store = cell_store();
        assert_eq!(
            store.facet_segments("osteoclast").unwrap(),
            vec!["cell".to_string(), "leukocyte".to_string(), "osteoclast".to_string()]
        );
    }

    #[test]
    fn uninitialized_store_matches_nothing() {
        let store = OntologyStore::new();
        assert!(store.find_efo_terms("cell").is_empty());
        assert!(!store.is_efo_term("cell"));
    }
}
