use serde::{Deserialize, Serialize};
use tantivy::query::{Query, TermQuery};
use tantivy::schema::{Facet, IndexRecordOption, Schema};
use tantivy::Term;

use crate::error::Error;
use crate::query::{CreateQuery, KeyValue};

/// A drill-down filter on one facet dimension: field → facet path
/// (`"/label"`, or `"/a/b/c"` for hierarchical dimensions).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FacetTermQuery {
    facet: KeyValue<String, String>,
}

impl FacetTermQuery {
    pub fn new(field: String, path: String) -> Self {
        Self {
            facet: KeyValue::new(field, path),
        }
    }

    pub fn field(&self) -> &str {
        &self.facet.field
    }

    pub fn path(&self) -> &str {
        &self.facet.value
    }
}

impl CreateQuery for FacetTermQuery {
    fn create_query(self, schema: &Schema) -> crate::Result<Box<dyn Query>> {
        let KeyValue { field: name, value } = self.facet;
        let field = schema
            .get_field(&name)
            .ok_or_else(|| Error::UnknownField(name.clone()))?;
        let facet = Facet::from(value.as_str());
        Ok(Box::new(TermQuery::new(
            Term::from_facet(field, &facet),
            IndexRecordOption::Basic,
        )))
    }
}
