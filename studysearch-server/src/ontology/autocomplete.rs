//! Autocomplete over ontology terms and ontology-tree navigation, with
//! optional filtering to terms present in the submission index and live
//! facet counts. Every entry point returns an empty string on blank input
//! or on failure.

use std::collections::HashSet;
use std::sync::Arc;

use log::warn;
use tantivy::collector::FacetCollector;
use tantivy::query::AllQuery;

use studysearch_types::{
    BoolQuery, Error, ExactTerm, Hit, PrefixQuery, Query, Result, SearchCriteria, WildcardQuery,
};

use crate::index::pool::SharedPool;
use crate::ontology::store::OntologyStore;
use crate::schema::{EFO, EFO_ALT_TERM, EFO_ID, EFO_TERM, FACET_ONTOLOGY, FIELD_CONTENT, SUBMISSION};
use crate::search::executor::SearchExecutor;

/// Upper bound on returned lines and fetched candidates.
const MAX_KEYWORDS: usize = 200;
const FETCH_MULTIPLIER: usize = 3;
const DEFAULT_TREE_LIMIT: usize = 500;

pub struct AutocompleteService {
    pool: SharedPool,
    store: Arc<OntologyStore>,
    executor: Arc<SearchExecutor>,
    filter_by_index: bool,
}

impl AutocompleteService {
    pub fn new(
        pool: SharedPool,
        store: Arc<OntologyStore>,
        executor: Arc<SearchExecutor>,
        filter_by_index: bool,
    ) -> Self {
        Self {
            pool,
            store,
            executor,
            filter_by_index,
        }
    }

    /// Prefix keyword completion: `term|o|<id-if-has-children>` lines for
    /// primary terms, `alt|t|<primary>` lines for alternative terms.
    pub fn get_keywords(&self, q: &str, limit: usize) -> String {
        match self.keywords_inner(q, limit) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("autocomplete failed for '{}': {}", q, e);
                String::new()
            }
        }
    }

    fn keywords_inner(&self, q: &str, limit: usize) -> Result<String> {
        let q = q.trim();
        if q.is_empty() {
            return Ok(String::new());
        }
        let limit = if limit == 0 {
            MAX_KEYWORDS
        } else {
            limit.min(MAX_KEYWORDS)
        };
        let fetch = (FETCH_MULTIPLIER * limit).min(MAX_KEYWORDS);
        let matcher = Matcher::from_input(q);

        let mut hits = self.fetch(build_query(q, EFO_TERM), fetch)?;
        hits.sort_by(|a, b| {
            term_of(a)
                .to_lowercase()
                .cmp(&term_of(b).to_lowercase())
        });

        let mut seen: HashSet<String> = HashSet::new();
        let mut lines: Vec<String> = Vec::new();
        for hit in &hits {
            if lines.len() >= limit {
                break;
            }
            let term = term_of(hit);
            if term.is_empty() || !seen.insert(term.to_lowercase()) {
                continue;
            }
            if !self.present_in_index(term) {
                continue;
            }
            let id = hit.get_str(EFO_ID).unwrap_or("");
            let id = if self.store.has_children(id) { id } else { "" };
            lines.push(format!("{}|o|{}", term, id));
        }

        if lines.len() < limit {
            let alt_hits = self.fetch(build_query(q, EFO_ALT_TERM), fetch)?;
            for hit in &alt_hits {
                if lines.len() >= limit {
                    break;
                }
                let primary = term_of(hit);
                for alt in values_of(hit, EFO_ALT_TERM) {
                    if lines.len() >= limit {
                        break;
                    }
                    if !matcher.matches(&alt) || !seen.insert(alt.to_lowercase()) {
                        continue;
                    }
                    if !self.present_in_index(&alt) {
                        continue;
                    }
                    lines.push(format!("{}|t|{}", alt, primary));
                }
            }
        }

        Ok(lines.join("\n"))
    }

    /// As [`get_keywords`], but each matched node carries its live count
    /// from the submission ontology facet.
    ///
    /// [`get_keywords`]: AutocompleteService::get_keywords
    pub fn get_keywords_with_counts(&self, q: &str, limit: usize) -> String {
        match self.keywords_with_counts_inner(q, limit) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("autocomplete with counts failed for '{}': {}", q, e);
                String::new()
            }
        }
    }

    fn keywords_with_counts_inner(&self, q: &str, limit: usize) -> Result<String> {
        let q = q.trim();
        if q.is_empty() {
            return Ok(String::new());
        }
        let limit = if limit == 0 {
            MAX_KEYWORDS
        } else {
            limit.min(MAX_KEYWORDS)
        };
        let fetch = (FETCH_MULTIPLIER * limit).min(MAX_KEYWORDS);
        let mut hits = self.fetch(build_query(q, EFO_TERM), fetch)?;
        hits.sort_by(|a, b| term_of(a).to_lowercase().cmp(&term_of(b).to_lowercase()));

        // (term, id, own facet path, parent facet path)
        let mut nodes: Vec<(String, String, String, String)> = Vec::new();
        for hit in &hits {
            let term = term_of(hit).to_string();
            let id = match hit.get_str(EFO_ID) {
                Some(id) => id.to_string(),
                None => continue,
            };
            let segments = match self.store.facet_segments_for_id(&id) {
                Some(s) if !s.is_empty() => s,
                _ => continue,
            };
            let own = format!("/{}", segments.join("/"));
            let parent = if segments.len() == 1 {
                "/".to_string()
            } else {
                format!("/{}", segments[..segments.len() - 1].join("/"))
            };
            nodes.push((term, id, own, parent));
        }

        let counts = self.facet_counts_for(nodes.iter().map(|n| n.3.clone()).collect())?;
        let mut seen = HashSet::new();
        let mut lines = Vec::new();
        for (term, id, own, parent) in nodes {
            if lines.len() >= limit {
                break;
            }
            if !seen.insert(term.to_lowercase()) {
                continue;
            }
            let count = counts
                .iter()
                .find(|(p, path, _)| *p == parent && *path == own)
                .map(|&(_, _, c)| c)
                .unwrap_or(0);
            lines.push(format!("{}|o|{}|{}", term, id, count));
        }
        Ok(lines.join("\n"))
    }

    /// Ontology-tree navigation without counts: the children of `id`.
    pub fn get_efo_tree(&self, id: &str) -> String {
        let id = id.trim();
        if id.is_empty() || self.store.get_term(id).is_none() {
            return String::new();
        }
        let mut children = self.store.children(id);
        children.sort_by(|a, b| a.1.to_lowercase().cmp(&b.1.to_lowercase()));
        children
            .into_iter()
            .map(|(child_id, term, has_children)| {
                format!("{}|o|{}", term, if has_children { child_id } else { String::new() })
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tree navigation with live counts from the submission facet.
    pub fn get_efo_tree_with_counts(&self, id: &str, limit: i64) -> String {
        match self.tree_with_counts_inner(id, limit) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("efo tree with counts failed for '{}': {}", id, e);
                String::new()
            }
        }
    }

    fn tree_with_counts_inner(&self, id: &str, limit: i64) -> Result<String> {
        let id = id.trim();
        if id.is_empty() || self.store.get_term(id).is_none() {
            return Ok(String::new());
        }
        let limit = if limit <= 0 {
            DEFAULT_TREE_LIMIT
        } else {
            limit as usize
        };
        let segments = match self.store.facet_segments_for_id(id) {
            Some(s) if !s.is_empty() => s,
            _ => return Ok(String::new()),
        };
        let path = format!("/{}", segments.join("/"));
        let counts = self.facet_counts_for(vec![path.clone()])?;

        let mut children = self.store.children(id);
        children.sort_by(|a, b| a.1.to_lowercase().cmp(&b.1.to_lowercase()));

        let mut lines = Vec::new();
        for (child_id, term, _has_children) in children.into_iter().take(limit) {
            let child_path = format!("{}/{}", path, term.to_lowercase());
            let count = counts
                .iter()
                .find(|(p, c_path, _)| *p == path && *c_path == child_path)
                .map(|&(_, _, c)| c)
                .unwrap_or(0);
            lines.push(format!("{}|o|{}|{}", term, child_id, count));
        }
        Ok(lines.join("\n"))
    }

    /// Counts of the children of each parent path in the submission
    /// ontology facet, as `(parent, child path, count)` triples. The facet
    /// collector collapses counts to the children of one root and rejects
    /// nested roots, so each parent runs its own collection.
    fn facet_counts_for(&self, parents: Vec<String>) -> Result<Vec<(String, String, u64)>> {
        let unique: HashSet<String> = parents.into_iter().collect();
        if unique.is_empty() {
            return Ok(Vec::new());
        }
        let snapshot = self.pool.acquire(SUBMISSION)?;
        let outcome = (|| -> Result<Vec<(String, String, u64)>> {
            let searcher = snapshot.searcher();
            let field = searcher
                .schema()
                .get_field(FACET_ONTOLOGY)
                .ok_or_else(|| Error::UnknownField(FACET_ONTOLOGY.into()))?;
            let mut out = Vec::new();
            for parent in &unique {
                let mut collector = FacetCollector::for_field(field);
                collector.add_facet(parent.as_str());
                let counts = searcher.search(&AllQuery, &collector)?;
                for (facet, count) in counts.get(parent.as_str()) {
                    out.push((parent.clone(), facet.to_string(), count));
                }
            }
            Ok(out)
        })();
        if let Err(e) = self.pool.release(SUBMISSION, snapshot) {
            warn!("release after facet counting failed: {}", e);
        }
        outcome
    }

    fn fetch(&self, query: Query, fetch: usize) -> Result<Vec<Hit>> {
        let criteria = SearchCriteria::new(query).with_limit(fetch.max(1));
        Ok(self.executor.execute(EFO, &criteria)?.results)
    }

    /// Index-presence filter; lookup failures keep the term (best effort).
    fn present_in_index(&self, term: &str) -> bool {
        if !self.filter_by_index {
            return true;
        }
        for word in term.split_whitespace() {
            match self
                .executor
                .term_frequency(FIELD_CONTENT, word, SUBMISSION)
            {
                Ok(0) => return false,
                Ok(_) => {}
                Err(e) => {
                    warn!("autocomplete index filter failed: {}", e);
                    return true;
                }
            }
        }
        true
    }
}

fn term_of(hit: &Hit) -> &str {
    hit.get_str(EFO_TERM).unwrap_or("")
}

fn values_of(hit: &Hit, field: &str) -> Vec<String> {
    match hit.0.get(field) {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

/// Build the ontology lookup query: a trailing `*` is appended unless the
/// input already carries quotes, operators or a wildcard.
fn build_query(q: &str, field: &str) -> Query {
    let has_operators = q.contains("AND") || q.contains("OR");
    let needs_star =
        !q.contains('"') && !has_operators && !q.contains('*');
    if has_operators {
        let and_mode = q.contains("AND");
        let mut builder = BoolQuery::builder();
        for word in q
            .split_whitespace()
            .filter(|w| *w != "AND" && *w != "OR")
        {
            let leaf = token_leaf(word, field);
            builder = if and_mode {
                builder.must(leaf)
            } else {
                builder.should(leaf)
            };
        }
        return builder.build();
    }
    let text = if needs_star {
        format!("{}*", q)
    } else {
        q.to_string()
    };
    token_leaf(&text, field)
}

fn token_leaf(token: &str, field: &str) -> Query {
    let token = token.trim_matches('"').to_lowercase();
    let has_star = token.contains('*');
    let has_question = token.contains('?');
    if has_star && !has_question && token.ends_with('*') && token.matches('*').count() == 1 {
        Query::Prefix(PrefixQuery::new(field.to_string(), token[..token.len() - 1].to_string()))
    } else if has_star || has_question {
        Query::Wildcard(WildcardQuery::new(field.to_string(), token))
    } else {
        Query::Exact(ExactTerm::with_term(field.to_string(), token))
    }
}

/// Predicate form of the lookup query for matching stored alternative
/// terms back against the user input.
enum Matcher {
    Prefix(String),
    Wildcard(WildcardQuery),
    Exact(String),
    Any,
}

impl Matcher {
    fn from_input(q: &str) -> Self {
        if q.contains("AND") || q.contains("OR") {
            return Matcher::Any;
        }
        let trimmed = q.trim_matches('"').to_lowercase();
        if q.contains('"') {
            return Matcher::Exact(trimmed);
        }
        if !q.contains('*') && !q.contains('?') {
            return Matcher::Prefix(trimmed);
        }
        if trimmed.ends_with('*') && trimmed.matches('*').count() == 1 && !trimmed.contains('?') {
            return Matcher::Prefix(trimmed[..trimmed.len() - 1].to_string());
        }
        Matcher::Wildcard(WildcardQuery::new(String::new(), trimmed))
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            Matcher::Any => true,
            Matcher::Exact(text) => candidate.to_lowercase() == *text,
            Matcher::Prefix(prefix) => candidate.to_lowercase().starts_with(prefix),
            Matcher::Wildcard(pattern) => pattern.covers(candidate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_is_appended_for_plain_input() {
        match build_query("leuk", EFO_TERM) {
            Query::Prefix(p) => assert_eq!(p.prefix(), "leuk"),
            other => panic!("expected prefix, got {:?}", other),
        }
    }

    #[test]
    fn existing_wildcard_is_kept() {
        match build_query("leu*te", EFO_TERM) {
            Query::Wildcard(w) => assert_eq!(w.pattern(), "leu*te"),
            other => panic!("expected wildcard, got {:?}", other),
        }
    }

    #[test]
    fn quoted_input_is_exact() {
        match build_query("\"white blood cell\"", EFO_TERM) {
            Query::Exact(t) => assert_eq!(t.value(), "white blood cell"),
            other => panic!("expected exact, got {:?}", other),
        }
    }

    #[test]
    fn matcher_prefixes() {
        let m = Matcher::from_input("leuk");
        assert!(m.matches("Leukocyte"));
        assert!(!m.matches("osteoclast"));
    }
}
