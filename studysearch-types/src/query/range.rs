use std::ops::Bound;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tantivy::query::{Query, RangeQuery as TantivyRangeQuery};
use tantivy::schema::{FieldType, Schema};

use crate::error::Error;
use crate::query::{CreateQuery, KeyValue};

/// Range bounds. `gte`/`lte` are inclusive, `gt`/`lt` exclusive; absent
/// bounds are unbounded.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Ranges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<Value>,
}

impl Ranges {
    pub fn greater_than(value: Value) -> Self {
        Ranges {
            gt: Some(value),
            ..Ranges::default()
        }
    }

    pub fn less_than(value: Value) -> Self {
        Ranges {
            lt: Some(value),
            ..Ranges::default()
        }
    }

    pub fn between(gte: Value, lte: Value) -> Self {
        Ranges {
            gte: Some(gte),
            lte: Some(lte),
            ..Ranges::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RangeQuery {
    range: KeyValue<String, Ranges>,
}

impl RangeQuery {
    pub fn new(field: String, ranges: Ranges) -> Self {
        Self {
            range: KeyValue::new(field, ranges),
        }
    }

    pub fn field(&self) -> &str {
        &self.range.field
    }

    pub fn ranges(&self) -> &Ranges {
        &self.range.value
    }

    /// The same bounds retargeted at another field.
    pub fn on_field(&self, field: &str) -> RangeQuery {
        RangeQuery::new(field.to_string(), self.range.value.clone())
    }
}

fn bound<V: DeserializeOwned>(exclusive: &Option<Value>, inclusive: &Option<Value>) -> crate::Result<Bound<V>> {
    if let Some(v) = exclusive {
        Ok(Bound::Excluded(serde_json::from_value(v.clone()).map_err(Error::from)?))
    } else if let Some(v) = inclusive {
        Ok(Bound::Included(serde_json::from_value(v.clone()).map_err(Error::from)?))
    } else {
        Ok(Bound::Unbounded)
    }
}

fn str_bound(b: &Bound<String>) -> Bound<&str> {
    match b {
        Bound::Included(s) => Bound::Included(s.as_str()),
        Bound::Excluded(s) => Bound::Excluded(s.as_str()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

impl CreateQuery for RangeQuery {
    fn create_query(self, schema: &Schema) -> crate::Result<Box<dyn Query>> {
        let KeyValue { field: name, value: r } = self.range;
        let field = schema
            .get_field(&name)
            .ok_or_else(|| Error::UnknownField(name.clone()))?;
        match schema.get_field_entry(field).field_type() {
            FieldType::I64(_) => {
                let lower = bound::<i64>(&r.gt, &r.gte)?;
                let upper = bound::<i64>(&r.lt, &r.lte)?;
                Ok(Box::new(TantivyRangeQuery::new_i64_bounds(field, lower, upper)))
            }
            FieldType::U64(_) => {
                let lower = bound::<u64>(&r.gt, &r.gte)?;
                let upper = bound::<u64>(&r.lt, &r.lte)?;
                Ok(Box::new(TantivyRangeQuery::new_u64_bounds(field, lower, upper)))
            }
            FieldType::Str(_) => {
                let lower = bound::<String>(&r.gt, &r.gte)?;
                let upper = bound::<String>(&r.lt, &r.lte)?;
                Ok(Box::new(TantivyRangeQuery::new_str_bounds(
                    field,
                    str_bound(&lower),
                    str_bound(&upper),
                )))
            }
            ft => Err(Error::InvalidQuery(format!(
                "field type {:?} does not support range queries",
                ft
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use tantivy::schema::{SchemaBuilder, FAST, INDEXED};

    use super::*;

    #[test]
    fn i64_range_deserialises_and_lowers() {
        let body = r#"{ "range": { "release_time": { "gte": 0, "lt": 1609459200000 } } }"#;
        let query: RangeQuery = serde_json::from_str(body).unwrap();
        assert_eq!(query.field(), "release_time");

        let mut builder = SchemaBuilder::new();
        builder.add_i64_field("release_time", INDEXED | FAST);
        let schema = builder.build();
        assert!(query.create_query(&schema).is_ok());
    }

    #[test]
    fn non_numeric_bound_fails() {
        let body = r#"{ "range": { "release_time": { "gte": "soon" } } }"#;
        let query: RangeQuery = serde_json::from_str(body).unwrap();
        let mut builder = SchemaBuilder::new();
        builder.add_i64_field("release_time", INDEXED);
        let schema = builder.build();
        assert!(query.create_query(&schema).is_err());
    }
}
