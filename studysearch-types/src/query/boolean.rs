use serde::{Deserialize, Serialize};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query as TantivyQuery};
use tantivy::schema::Schema;

use crate::query::{CreateQuery, Query};

/// Boolean combination of sub-queries.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    #[serde(default)]
    must: Vec<Query>,
    #[serde(default)]
    must_not: Vec<Query>,
    #[serde(default)]
    should: Vec<Query>,
}

impl BoolQuery {
    pub fn builder() -> BoolQueryBuilder {
        BoolQueryBuilder::default()
    }

    pub fn must_clauses(&self) -> &[Query] {
        &self.must
    }

    pub fn must_not_clauses(&self) -> &[Query] {
        &self.must_not
    }

    pub fn should_clauses(&self) -> &[Query] {
        &self.should
    }

    /// Rebuild with the same occurs but new clauses; used by tree rewriters.
    pub fn with_clauses(must: Vec<Query>, must_not: Vec<Query>, should: Vec<Query>) -> Self {
        Self { must, must_not, should }
    }

    /// Decompose into `(must, must_not, should)` for tree rewriters.
    pub fn into_clauses(self) -> (Vec<Query>, Vec<Query>, Vec<Query>) {
        (self.must, self.must_not, self.should)
    }
}

impl CreateQuery for BoolQuery {
    fn create_query(self, schema: &Schema) -> crate::Result<Box<dyn TantivyQuery>> {
        let mut clauses: Vec<(Occur, Box<dyn TantivyQuery>)> = Vec::new();
        lower_into(&mut clauses, Occur::Must, self.must, schema)?;
        lower_into(&mut clauses, Occur::MustNot, self.must_not, schema)?;
        lower_into(&mut clauses, Occur::Should, self.should, schema)?;
        Ok(Box::new(BooleanQuery::from(clauses)))
    }
}

fn lower_into(
    clauses: &mut Vec<(Occur, Box<dyn TantivyQuery>)>,
    occur: Occur,
    queries: Vec<Query>,
    schema: &Schema,
) -> crate::Result<()> {
    for q in queries {
        clauses.push((occur, lower(q, schema)?));
    }
    Ok(())
}

/// Lower any AST node, including nested booleans and match-all.
pub fn lower(query: Query, schema: &Schema) -> crate::Result<Box<dyn TantivyQuery>> {
    match query {
        Query::Fuzzy(q) => q.create_query(schema),
        Query::Exact(q) => q.create_query(schema),
        Query::Phrase(q) => q.create_query(schema),
        Query::Range(q) => q.create_query(schema),
        Query::Prefix(q) => q.create_query(schema),
        Query::Wildcard(q) => q.create_query(schema),
        Query::FacetTerm(q) => q.create_query(schema),
        Query::Boolean { bool } => bool.create_query(schema),
        Query::All => Ok(Box::new(AllQuery)),
    }
}

#[derive(Debug, Default)]
pub struct BoolQueryBuilder {
    must: Vec<Query>,
    must_not: Vec<Query>,
    should: Vec<Query>,
}

impl BoolQueryBuilder {
    pub fn must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    pub fn should_all<I: IntoIterator<Item = Query>>(mut self, queries: I) -> Self {
        self.should.extend(queries);
        self
    }

    pub fn build(self) -> Query {
        Query::Boolean {
            bool: BoolQuery {
                must: self.must,
                must_not: self.must_not,
                should: self.should,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use tantivy::schema::{SchemaBuilder, INDEXED, TEXT};

    use super::*;
    use crate::query::term::ExactTerm;

    #[test]
    fn nested_boolean_lowers() {
        let mut builder = SchemaBuilder::new();
        builder.add_text_field("content", TEXT);
        builder.add_i64_field("release_time", INDEXED);
        let schema = builder.build();

        let inner = BoolQuery::builder()
            .should(Query::Exact(ExactTerm::with_term("content".into(), "cell".into())))
            .build();
        let outer = BoolQuery::builder().must(inner).must(Query::All).build();
        assert!(lower(outer, &schema).is_ok());
    }

    #[test]
    fn bool_query_deserialises_with_missing_occurs() {
        let body = r#"{ "bool": { "must": [ { "term": { "content": "cell" } } ] } }"#;
        let q: Query = serde_json::from_str(body).unwrap();
        match q {
            Query::Boolean { bool } => {
                assert_eq!(bool.must_clauses().len(), 1);
                assert!(bool.should_clauses().is_empty());
            }
            other => panic!("expected boolean, got {:?}", other),
        }
    }
}
