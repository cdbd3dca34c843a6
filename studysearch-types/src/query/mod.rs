use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{DeserializeOwned, Deserializer, Error as SerdeError, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::Serializer;
use serde::{Deserialize, Serialize};
use tantivy::query::Query as TantivyQuery;
use tantivy::schema::{FieldType, Schema};
use tantivy::Term;

use crate::error::Error;
use crate::query::{
    boolean::BoolQuery, facet::FacetTermQuery, fuzzy::FuzzyQuery, phrase::PhraseQuery,
    range::RangeQuery, term::ExactTerm, wildcard::PrefixQuery, wildcard::WildcardQuery,
};

pub mod boolean;
pub mod facet;
pub mod fuzzy;
pub mod phrase;
pub mod range;
pub mod term;
pub mod wildcard;

/// Lowers an AST node into an executable Tantivy query.
pub trait CreateQuery {
    fn create_query(self, schema: &Schema) -> crate::Result<Box<dyn TantivyQuery>>;
}

/// The parsed query tree. Leaves carry their target field; the expander and
/// the security filter rewrite this tree before it is lowered for execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Query {
    Fuzzy(FuzzyQuery),
    Exact(ExactTerm),
    Phrase(PhraseQuery),
    Range(RangeQuery),
    Prefix(PrefixQuery),
    Wildcard(WildcardQuery),
    FacetTerm(FacetTermQuery),
    Boolean {
        bool: BoolQuery,
    },
    All,
}

impl Query {
    /// The field a leaf targets. `None` for `All` and boolean nodes.
    pub fn field(&self) -> Option<&str> {
        match self {
            Query::Fuzzy(q) => Some(q.field()),
            Query::Exact(q) => Some(q.field()),
            Query::Phrase(q) => Some(q.field()),
            Query::Range(q) => Some(q.field()),
            Query::Prefix(q) => Some(q.field()),
            Query::Wildcard(q) => Some(q.field()),
            Query::FacetTerm(q) => Some(q.field()),
            Query::Boolean { .. } | Query::All => None,
        }
    }

    /// The user-visible text of a leaf: the term value, the space-joined
    /// phrase, the prefix or pattern. Ranges and `All` have none.
    pub fn text(&self) -> Option<String> {
        match self {
            Query::Exact(q) => Some(q.value().to_string()),
            Query::Phrase(q) => Some(q.terms().join(" ")),
            Query::Fuzzy(q) => Some(q.value().to_string()),
            Query::Prefix(q) => Some(q.prefix().to_string()),
            Query::Wildcard(q) => Some(q.pattern().to_string()),
            Query::Range(_) | Query::FacetTerm(_) | Query::Boolean { .. } | Query::All => None,
        }
    }

    /// Convenience: a term or, when the text holds whitespace, a phrase.
    pub fn term_or_phrase(field: &str, text: &str) -> Query {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() > 1 {
            Query::Phrase(PhraseQuery::new(
                field.to_string(),
                words.into_iter().map(String::from).collect(),
            ))
        } else {
            Query::Exact(ExactTerm::with_term(field.to_string(), text.to_string()))
        }
    }

    /// `a AND b` without nesting when one side is `All`.
    pub fn and(self, other: Query) -> Query {
        match (self, other) {
            (Query::All, q) | (q, Query::All) => q,
            (a, b) => BoolQuery::builder().must(a).must(b).build(),
        }
    }
}

/// Expansion metadata produced by the query expander and surfaced, filtered,
/// in the final response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Expansion {
    pub expanded_efo_terms: HashSet<String>,
    pub expanded_synonyms: HashSet<String>,
    pub too_many_expansion_terms: bool,
}

impl Expansion {
    pub fn merge(&mut self, other: Expansion) {
        self.expanded_efo_terms.extend(other.expanded_efo_terms);
        self.expanded_synonyms.extend(other.expanded_synonyms);
        self.too_many_expansion_terms |= other.too_many_expansion_terms;
    }

    pub fn len(&self) -> usize {
        self.expanded_efo_terms.len() + self.expanded_synonyms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The parsed query plus its expansion metadata.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub query: Query,
    pub expansion: Expansion,
}

impl QueryResult {
    pub fn unexpanded(query: Query) -> Self {
        Self {
            query,
            expansion: Expansion::default(),
        }
    }
}

/// Build a Term for `value` on `field`, honouring the field type.
pub(crate) fn make_term(schema: &Schema, field_name: &str, value: &str) -> crate::Result<Term> {
    let field = schema
        .get_field(field_name)
        .ok_or_else(|| Error::UnknownField(field_name.into()))?;
    match schema.get_field_entry(field).field_type() {
        FieldType::I64(_) => {
            let v = value
                .parse::<i64>()
                .map_err(|_| Error::InvalidQuery(format!("'{}' is not an i64 value", value)))?;
            Ok(Term::from_field_i64(field, v))
        }
        FieldType::U64(_) => {
            let v = value
                .parse::<u64>()
                .map_err(|_| Error::InvalidQuery(format!("'{}' is not a u64 value", value)))?;
            Ok(Term::from_field_u64(field, v))
        }
        _ => Ok(Term::from_field_text(field, value)),
    }
}

/// A single key/value pair: accepts exactly one `{field: value}` entry, which
/// a plain map type would not enforce.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue<K, V>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    pub field: K,
    pub value: V,
}

impl<K, V> KeyValue<K, V>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    pub fn new(field: K, value: V) -> Self {
        Self { field, value }
    }
}

struct KVVisitor<K, V>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    marker: PhantomData<fn() -> KeyValue<K, V>>,
}

impl<'de, K, V> Visitor<'de> for KVVisitor<K, V>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    type Value = KeyValue<K, V>;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("an object with a single key of any name")
    }

    fn visit_map<M>(self, mut access: M) -> std::result::Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        match access.next_entry()? {
            Some((field, value)) => {
                if access.next_entry::<String, V>()?.is_some() {
                    Err(M::Error::custom("expected a single-entry object"))
                } else {
                    Ok(KeyValue { field, value })
                }
            }
            None => Err(M::Error::custom("expected a non-empty object")),
        }
    }
}

impl<'de, K, V> Deserialize<'de> for KeyValue<K, V>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(KVVisitor { marker: PhantomData })
    }
}

impl<'de, K, V> Serialize for KeyValue<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut m = serializer.serialize_map(Some(1))?;
        m.serialize_entry(&self.field, &self.value)?;
        m.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_or_phrase_splits_on_whitespace() {
        let q = Query::term_or_phrase("content", "white blood cell");
        assert!(matches!(q, Query::Phrase(_)));
        assert_eq!(q.text().unwrap(), "white blood cell");

        let q = Query::term_or_phrase("content", "osteoclast");
        assert!(matches!(q, Query::Exact(_)));
        assert_eq!(q.field(), Some("content"));
    }

    #[test]
    fn and_collapses_match_all() {
        let q = Query::term_or_phrase("content", "cell");
        assert_eq!(Query::All.and(q.clone()), q);
    }

    #[test]
    fn keyvalue_round_trip() {
        let kv = KeyValue::new("title".to_string(), "study".to_string());
        let json = serde_json::to_string(&kv).unwrap();
        assert_eq!(json, r#"{"title":"study"}"#);
        let back: KeyValue<String, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kv);
    }

    #[test]
    fn keyvalue_rejects_two_entries() {
        let err = serde_json::from_str::<KeyValue<String, String>>(r#"{"a":"1","b":"2"}"#);
        assert!(err.is_err());
    }
}
