//! Direct, dictionary-less spell checking over the term dictionaries of the
//! live indexes. Candidates share a prefix with the query, pass a
//! Levenshtein automaton, and are ranked by edit distance then frequency.

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

use levenshtein_automata::{Distance, LevenshteinAutomatonBuilder, DFA};

use studysearch_types::{Error, Result};

use crate::index::pool::IndexPool;
use crate::schema::{EFO, EFO_TERM, FIELD_ACCESSION, FIELD_CONTENT, SUBMISSION};

static ACCESSION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^[A-Z]-[A-Z]+[-\d].*").expect("accession pattern"),
        Regex::new(r"^[A-Z]{3,}\d+.*").expect("accession pattern"),
    ]
});

/// Tunable parameters of the direct spell checker.
#[derive(Debug, Clone)]
pub struct SpellChecker {
    pub min_prefix: usize,
    pub max_edits: u8,
    pub min_query_length: usize,
    /// Skip suggesting for terms present in more than this share of docs.
    pub max_query_frequency: f64,
    /// A query term with more than this many postings counts as "in index".
    pub threshold_frequency: u64,
    pub accuracy: f64,
    pub max_suggestions: usize,
}

impl Default for SpellChecker {
    fn default() -> Self {
        Self {
            min_prefix: 2,
            max_edits: 2,
            min_query_length: 3,
            max_query_frequency: 0.01,
            threshold_frequency: 0,
            accuracy: 0.5,
            max_suggestions: 5,
        }
    }
}

impl SpellChecker {
    /// Cascading suggestion: the accession field when the query looks like
    /// an accession, then the ontology term field, then submission content.
    /// Each step degrades to no suggestions on I/O failure.
    pub fn suggest(&self, pool: &IndexPool, query: &str) -> Vec<String> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        if ACCESSION_PATTERNS.iter().any(|p| p.is_match(query)) {
            match self.suggest_on_field(pool, SUBMISSION, FIELD_ACCESSION, query) {
                Ok(found) if !found.is_empty() => return found,
                Ok(_) => {}
                Err(e) => warn!("accession suggestion failed: {}", e),
            }
        }

        match self.suggest_on_field(pool, EFO, EFO_TERM, query) {
            Ok(found) if !found.is_empty() => return found,
            Ok(_) => {}
            Err(e) => warn!("ontology suggestion failed: {}", e),
        }

        match self.suggest_on_field(pool, SUBMISSION, FIELD_CONTENT, query) {
            Ok(found) => found,
            Err(e) => {
                warn!("content suggestion failed: {}", e);
                Vec::new()
            }
        }
    }

    fn suggest_on_field(
        &self,
        pool: &IndexPool,
        index: &str,
        field_name: &str,
        query: &str,
    ) -> Result<Vec<String>> {
        let term = query.to_lowercase();
        if term.chars().count() < self.min_query_length {
            return Ok(Vec::new());
        }

        let snapshot = pool.acquire(index)?;
        let outcome = self.scan(&snapshot, field_name, &term);
        if let Err(e) = pool.release(index, snapshot) {
            warn!("release after suggestion failed: {}", e);
        }
        outcome
    }

    fn scan(
        &self,
        snapshot: &crate::index::pool::ReaderSnapshot,
        field_name: &str,
        term: &str,
    ) -> Result<Vec<String>> {
        let searcher = snapshot.searcher();
        let schema = searcher.schema();
        let field = schema
            .get_field(field_name)
            .ok_or_else(|| Error::UnknownField(field_name.into()))?;

        // "Suggest only when not in index": the query term being present
        // (or too frequent) suppresses suggestions.
        let query_term = tantivy::Term::from_field_text(field, term);
        let query_freq = searcher.doc_freq(&query_term)?;
        if query_freq > self.threshold_frequency {
            return Ok(Vec::new());
        }
        let num_docs = searcher.num_docs();
        if num_docs > 0 && query_freq as f64 / num_docs as f64 > self.max_query_frequency {
            return Ok(Vec::new());
        }

        let prefix: String = term.chars().take(self.min_prefix).collect();
        let dfa = LevenshteinAutomatonBuilder::new(self.max_edits, true).build_dfa(term);

        // candidate → (distance, total doc freq)
        let mut candidates: std::collections::HashMap<String, (u8, u64)> =
            std::collections::HashMap::new();
        for segment in searcher.segment_readers() {
            let inverted = segment.inverted_index(field)?;
            let dict = inverted.terms();
            let mut range = dict.range().ge(prefix.as_bytes());
            let upper = prefix_upper_bound(&prefix);
            if let Some(upper) = &upper {
                range = range.lt(upper.as_bytes());
            }
            let mut stream = range.into_stream()?;
            while stream.advance() {
                let candidate = match std::str::from_utf8(stream.key()) {
                    Ok(c) => c,
                    Err(_) => continue,
                };
                if candidate == term {
                    continue;
                }
                let distance = match eval_distance(&dfa, candidate) {
                    Some(d) if d <= self.max_edits => d,
                    _ => continue,
                };
                if similarity(term, distance) < self.accuracy {
                    continue;
                }
                let doc_freq = stream.value().doc_freq as u64;
                let entry = candidates
                    .entry(candidate.to_string())
                    .or_insert((distance, 0));
                entry.1 += doc_freq;
            }
        }

        let mut ranked: Vec<(String, (u8, u64))> = candidates.into_iter().collect();
        ranked.sort_by(|a, b| {
            (a.1).0
                .cmp(&(b.1).0)
                .then((b.1).1.cmp(&(a.1).1))
                .then(a.0.cmp(&b.0))
        });
        Ok(ranked
            .into_iter()
            .take(self.max_suggestions)
            .map(|(term, _)| term)
            .collect())
    }
}

fn eval_distance(dfa: &DFA, candidate: &str) -> Option<u8> {
    let mut state = dfa.initial_state();
    for &byte in candidate.as_bytes() {
        state = dfa.transition(state, byte);
    }
    match dfa.distance(state) {
        Distance::Exact(d) => Some(d),
        Distance::AtLeast(_) => None,
    }
}

fn similarity(term: &str, distance: u8) -> f64 {
    let len = term.chars().count().max(1);
    1.0 - (distance as f64 / len as f64)
}

/// Smallest byte string greater than every string with this prefix.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(last) = bytes.pop() {
        if last < 0xFF {
            bytes.push(last + 1);
            return String::from_utf8(bytes).ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accession_patterns_recognise_accessions() {
        assert!(ACCESSION_PATTERNS.iter().any(|p| p.is_match("S-BSST1432")));
        assert!(ACCESSION_PATTERNS.iter().any(|p| p.is_match("GSE12345")));
        assert!(!ACCESSION_PATTERNS.iter().any(|p| p.is_match("leukocyte")));
    }

    #[test]
    fn distance_evaluation() {
        let dfa = LevenshteinAutomatonBuilder::new(2, true).build_dfa("leukocytte");
        assert_eq!(eval_distance(&dfa, "leukocyte"), Some(1));
        assert_eq!(eval_distance(&dfa, "lymphocyte"), None);
    }

    #[test]
    fn prefix_bound_increments_last_byte() {
        assert_eq!(prefix_upper_bound("le").as_deref(), Some("lf"));
        assert_eq!(prefix_upper_bound("s-").as_deref(), Some("s."));
    }

    #[test]
    fn similarity_threshold() {
        assert!(similarity("leukocytte", 1) > 0.5);
        assert!(similarity("abc", 2) < 0.5);
    }
}
