use serde::{Deserialize, Serialize};
use tantivy::query::{FuzzyTermQuery, Query};
use tantivy::schema::Schema;

use crate::query::{make_term, CreateQuery, KeyValue};

fn default_distance() -> u8 {
    2
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FuzzyTerm {
    pub value: String,
    #[serde(default = "default_distance")]
    pub distance: u8,
    #[serde(default)]
    pub transposition: bool,
    /// Prefix-mode fuzzy matching.
    #[serde(default)]
    pub prefix: bool,
}

impl FuzzyTerm {
    pub fn new<V: Into<String>>(value: V, distance: u8, transposition: bool) -> Self {
        Self {
            value: value.into(),
            distance,
            transposition,
            prefix: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FuzzyQuery {
    fuzzy: KeyValue<String, FuzzyTerm>,
}

impl FuzzyQuery {
    pub fn new(field: String, term: FuzzyTerm) -> Self {
        Self {
            fuzzy: KeyValue::new(field, term),
        }
    }

    pub fn field(&self) -> &str {
        &self.fuzzy.field
    }

    pub fn value(&self) -> &str {
        &self.fuzzy.value.value
    }

    pub fn term(&self) -> &FuzzyTerm {
        &self.fuzzy.value
    }

    /// The same fuzzy parameters retargeted at another field.
    pub fn on_field(&self, field: &str) -> FuzzyQuery {
        FuzzyQuery::new(field.to_string(), self.fuzzy.value.clone())
    }
}

impl CreateQuery for FuzzyQuery {
    fn create_query(self, schema: &Schema) -> crate::Result<Box<dyn Query>> {
        let KeyValue { field, value } = self.fuzzy;
        let term = make_term(schema, &field, &value.value)?;
        if value.prefix {
            Ok(Box::new(FuzzyTermQuery::new_prefix(
                term,
                value.distance,
                value.transposition,
            )))
        } else {
            Ok(Box::new(FuzzyTermQuery::new(
                term,
                value.distance,
                value.transposition,
            )))
        }
    }
}
