use serde::{Deserialize, Serialize};
use tantivy::query::{PhraseQuery as TantivyPhraseQuery, Query};
use tantivy::schema::Schema;
use tantivy::Term;

use crate::error::Error;
use crate::query::{make_term, CreateQuery, KeyValue};

/// An ordered multi-term query on one field. Phrases need positions, so the
/// target must be indexed with a tokenizing analyzer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PhraseQuery {
    phrase: KeyValue<String, Vec<String>>,
}

impl PhraseQuery {
    pub fn new(field: String, terms: Vec<String>) -> Self {
        Self {
            phrase: KeyValue::new(field, terms),
        }
    }

    pub fn field(&self) -> &str {
        &self.phrase.field
    }

    pub fn terms(&self) -> &[String] {
        &self.phrase.value
    }
}

impl CreateQuery for PhraseQuery {
    fn create_query(self, schema: &Schema) -> crate::Result<Box<dyn Query>> {
        let KeyValue { field, value } = self.phrase;
        if value.len() <= 1 {
            return Err(Error::InvalidQuery(
                "a phrase query needs more than one term".into(),
            ));
        }
        let terms = value
            .iter()
            .map(|t| make_term(schema, &field, t))
            .collect::<crate::Result<Vec<Term>>>()?;
        Ok(Box::new(TantivyPhraseQuery::new(terms)))
    }
}

#[cfg(test)]
mod tests {
    use tantivy::schema::{SchemaBuilder, TEXT};

    use super::*;

    #[test]
    fn single_term_phrase_is_rejected() {
        let mut builder = SchemaBuilder::new();
        builder.add_text_field("content", TEXT);
        let schema = builder.build();
        let query = PhraseQuery::new("content".into(), vec!["leukocyte".into()]).create_query(&schema);
        assert!(query.is_err());
    }
}
