//! Assembles the final search response: highlighted snippets, spell
//! suggestions when hits are poor, expansion terms filtered to the live
//! index, and the error-response defaults.

use std::collections::HashSet;
use std::sync::Arc;

use log::warn;
use tantivy::SnippetGenerator;

use studysearch_types::{
    lower, Expansion, FacetDimension, Hit, PaginatedResult, Query, SearchRequest, SearchResponse,
};

use crate::index::pool::SharedPool;
use crate::schema::{FIELD_CONTENT, SUBMISSION};
use crate::search::executor::SearchExecutor;

/// Only this many hits (or fewer) trigger a spell suggestion.
const SUGGESTION_HIT_THRESHOLD: u64 = 5;

pub struct ResponseProcessor {
    pool: SharedPool,
    executor: Arc<SearchExecutor>,
    fragment_width: usize,
}

impl ResponseProcessor {
    pub fn new(pool: SharedPool, executor: Arc<SearchExecutor>, fragment_width: usize) -> Self {
        Self {
            pool,
            executor,
            fragment_width,
        }
    }

    /// Build the response record from the executed page. Every enrichment
    /// step here is best-effort; failures degrade, they never propagate.
    pub fn process(
        &self,
        request: &SearchRequest,
        raw_query: &str,
        original: &Query,
        expansion: Expansion,
        page: PaginatedResult<Hit>,
        facets: Option<Vec<FacetDimension>>,
    ) -> SearchResponse {
        let mut hits = page.results;
        if request.highlighting_enabled && *original != Query::All {
            if let Err(e) = self.highlight(original, &mut hits) {
                warn!("snippet extraction failed: {}", e);
            }
        }

        let suggestion = if !raw_query.trim().is_empty()
            && page.total_hits <= SUGGESTION_HIT_THRESHOLD
        {
            match self.pool.spell_checker() {
                Some(spell) => spell.suggest(&self.pool, raw_query),
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        let expanded_efo_terms = self.filter_to_index(expansion.expanded_efo_terms);
        let expanded_synonyms = self.filter_to_index(expansion.expanded_synonyms);

        SearchResponse {
            page: page.page,
            page_size: page.page_size,
            total_hits: page.total_hits,
            is_total_hits_exact: page.is_total_hits_exact,
            sort_by: request
                .sort_by
                .clone()
                .unwrap_or_else(|| "relevance".to_string()),
            sort_order: request.sort_order,
            suggestion,
            expanded_efo_terms,
            expanded_synonyms,
            too_many_expansion_terms: expansion.too_many_expansion_terms,
            // The successful response echoes the query string; it is only
            // nulled when highlighting is off.
            query: if request.highlighting_enabled {
                Some(raw_query.to_string())
            } else {
                None
            },
            facets: facets.filter(|f| !f.is_empty()),
            hits,
        }
    }

    /// Fallback for an unrecoverable search failure: empty hits with
    /// default pagination.
    pub fn error_response(&self, raw_query: &str) -> SearchResponse {
        let mut response = SearchResponse::empty_with_defaults();
        response.query = error_echo(raw_query);
        response
    }

    /// Replace each hit's content with the best bounded fragment around the
    /// match terms of the original (pre-expansion) query.
    fn highlight(&self, original: &Query, hits: &mut [Hit]) -> studysearch_types::Result<()> {
        let snapshot = self.pool.acquire(SUBMISSION)?;
        let outcome = (|| -> studysearch_types::Result<()> {
            let searcher = snapshot.searcher();
            let schema = searcher.schema();
            let content_field = match schema.get_field(FIELD_CONTENT) {
                Some(f) => f,
                None => return Ok(()),
            };
            let query = lower(original.clone(), schema)?;
            let mut generator = SnippetGenerator::create(searcher, &*query, content_field)?;
            generator.set_max_num_chars(self.fragment_width);
            for hit in hits.iter_mut() {
                let content = match hit.get_str(FIELD_CONTENT) {
                    Some(c) => c.to_string(),
                    None => continue,
                };
                let snippet = generator.snippet(&content);
                let html = snippet.to_html();
                // An empty match falls through to the original content.
                if !html.is_empty() {
                    hit.insert(FIELD_CONTENT, html);
                }
            }
            Ok(())
        })();
        if let Err(e) = self.pool.release(SUBMISSION, snapshot) {
            warn!("release after highlighting failed: {}", e);
        }
        outcome
    }

    /// Keep only expansion terms that occur in the live submission index.
    /// On lookup failure the unfiltered set is returned.
    fn filter_to_index(&self, terms: HashSet<String>) -> HashSet<String> {
        let mut kept = HashSet::new();
        for term in &terms {
            let mut in_index = true;
            for word in term.split_whitespace() {
                match self
                    .executor
                    .term_frequency(FIELD_CONTENT, word, SUBMISSION)
                {
                    Ok(freq) => {
                        if freq == 0 {
                            in_index = false;
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("expansion-term filter failed: {}", e);
                        return terms;
                    }
                }
            }
            if in_index {
                kept.insert(term.clone());
            }
        }
        kept
    }
}

/// The error response nulls the query when the original was match-all.
fn error_echo(raw_query: &str) -> Option<String> {
    if raw_query.is_empty() || raw_query == "*:*" {
        None
    } else {
        Some(raw_query.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_echo_nulls_match_all() {
        assert_eq!(error_echo("leukocyte").as_deref(), Some("leukocyte"));
        assert_eq!(error_echo("*:*"), None);
        assert_eq!(error_echo(""), None);
    }
}
