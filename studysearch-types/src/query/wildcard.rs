use serde::{Deserialize, Serialize};
use tantivy::query::{Query, RegexQuery};
use tantivy::schema::Schema;

use crate::error::Error;
use crate::query::{CreateQuery, KeyValue};

/// A prefix query, kept un-analyzed end to end.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PrefixQuery {
    prefix: KeyValue<String, String>,
}

impl PrefixQuery {
    pub fn new(field: String, prefix: String) -> Self {
        Self {
            prefix: KeyValue::new(field, prefix),
        }
    }

    pub fn field(&self) -> &str {
        &self.prefix.field
    }

    pub fn prefix(&self) -> &str {
        &self.prefix.value
    }

    pub fn on_field(&self, field: &str) -> PrefixQuery {
        PrefixQuery::new(field.to_string(), self.prefix.value.clone())
    }

    /// Whether `term` is already covered by this prefix.
    pub fn covers(&self, term: &str) -> bool {
        term.to_lowercase().starts_with(&self.prefix.value.to_lowercase())
    }
}

impl CreateQuery for PrefixQuery {
    fn create_query(self, schema: &Schema) -> crate::Result<Box<dyn Query>> {
        let KeyValue { field: name, value } = self.prefix;
        let field = schema
            .get_field(&name)
            .ok_or_else(|| Error::UnknownField(name.clone()))?;
        let pattern = format!("{}.*", regex::escape(&value));
        Ok(Box::new(RegexQuery::from_pattern(&pattern, field)?))
    }
}

/// A wildcard query: `*` matches any run, `?` a single character. The
/// pattern text is never analyzed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WildcardQuery {
    wildcard: KeyValue<String, String>,
}

impl WildcardQuery {
    pub fn new(field: String, pattern: String) -> Self {
        Self {
            wildcard: KeyValue::new(field, pattern),
        }
    }

    pub fn field(&self) -> &str {
        &self.wildcard.field
    }

    pub fn pattern(&self) -> &str {
        &self.wildcard.value
    }

    pub fn on_field(&self, field: &str) -> WildcardQuery {
        WildcardQuery::new(field.to_string(), self.wildcard.value.clone())
    }

    pub fn to_regex_pattern(&self) -> String {
        let mut out = String::with_capacity(self.wildcard.value.len() * 2);
        for c in self.wildcard.value.chars() {
            match c {
                '*' => out.push_str(".*"),
                '?' => out.push('.'),
                c => out.push_str(&regex::escape(&c.to_string())),
            }
        }
        out
    }

    /// Whether `term` is already covered by this pattern.
    pub fn covers(&self, term: &str) -> bool {
        regex::RegexBuilder::new(&format!("^{}$", self.to_regex_pattern()))
            .case_insensitive(true)
            .build()
            .map(|re| re.is_match(term))
            .unwrap_or(false)
    }
}

impl CreateQuery for WildcardQuery {
    fn create_query(self, schema: &Schema) -> crate::Result<Box<dyn Query>> {
        let pattern = self.to_regex_pattern();
        let KeyValue { field: name, .. } = self.wildcard;
        let field = schema
            .get_field(&name)
            .ok_or_else(|| Error::UnknownField(name.clone()))?;
        Ok(Box::new(RegexQuery::from_pattern(&pattern, field)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_covers_is_case_insensitive() {
        let q = PrefixQuery::new("content".into(), "leuk".into());
        assert!(q.covers("Leukocyte"));
        assert!(!q.covers("lymphocyte"));
    }

    #[test]
    fn wildcard_translation() {
        let q = WildcardQuery::new("content".into(), "leu*cy?e".into());
        assert_eq!(q.to_regex_pattern(), "leu.*cy.e");
        assert!(q.covers("leukocyte"));
        assert!(!q.covers("leukocytes"));
    }

    #[test]
    fn wildcard_escapes_regex_metachars() {
        let q = WildcardQuery::new("content".into(), "a+b*".into());
        assert!(q.covers("a+bc"));
        assert!(!q.covers("aab"));
    }
}
