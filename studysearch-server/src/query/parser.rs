//! Parses a user query string into the query AST over a configured field
//! set. Restricted fields are rejected, numeric ranges get their bounds
//! folded, wildcard and prefix text is never analyzed, and an empty query
//! becomes match-all.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use studysearch_types::{
    BoolQuery, CollectionRegistry, Error, ExactTerm, FieldKind, FuzzyQuery, FuzzyTerm,
    PrefixQuery, PropertyDescriptor, Query, RangeQuery, Ranges, Result, WildcardQuery,
};

use crate::schema::FIELD_CONTENT;

/// The only field a user query may never reference.
pub const RESTRICTED_FIELD: &str = "access";

static RESTRICTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(^|\s)access:").expect("restricted-field pattern"));

pub struct QueryStringParser {
    registry: Arc<CollectionRegistry>,
}

impl QueryStringParser {
    pub fn new(registry: Arc<CollectionRegistry>) -> Self {
        Self { registry }
    }

    /// Parse `raw` against the fields of `collection`. A non-empty
    /// `fields_filter` selects the parse field subset and adds one required
    /// clause per entry.
    pub fn parse(
        &self,
        raw: &str,
        collection: &str,
        fields_filter: &HashMap<String, Vec<String>>,
    ) -> Result<Query> {
        if RESTRICTED.is_match(raw) {
            return Err(Error::RestrictedField(RESTRICTED_FIELD.into()));
        }

        let default_fields = if fields_filter.is_empty() {
            self.default_fields(collection)
        } else {
            let mut keys: Vec<String> = fields_filter.keys().cloned().collect();
            keys.sort();
            keys
        };

        let trimmed = raw.trim();
        let text_query = if trimmed.is_empty() || trimmed == "*:*" {
            Query::All
        } else {
            let tokens = lex(trimmed)?;
            let mut parser = Parser {
                tokens,
                pos: 0,
                registry: &self.registry,
                collection,
                default_fields: &default_fields,
            };
            parser.parse_clauses(false)?
        };

        let mut query = text_query;
        let mut keys: Vec<&String> = fields_filter.keys().collect();
        keys.sort();
        for key in keys {
            let values: Vec<&String> = fields_filter[key]
                .iter()
                .filter(|v| !v.trim().is_empty())
                .collect();
            if values.is_empty() {
                continue;
            }
            let mut leaves = Vec::with_capacity(values.len());
            for value in values {
                leaves.push(self.value_leaf(collection, key, value)?);
            }
            let clause = if leaves.len() == 1 {
                leaves.remove(0)
            } else {
                BoolQuery::builder().should_all(leaves).build()
            };
            query = query.and(clause);
        }
        Ok(query)
    }

    /// Fields a bare term is parsed against: retrieved descriptors that are
    /// either expander-enabled or tokenized text.
    fn default_fields(&self, collection: &str) -> Vec<String> {
        let fields: Vec<String> = self
            .registry
            .effective(collection)
            .iter()
            .filter(|d| d.retrieved && (d.expanded || d.kind == FieldKind::TokenizedString))
            .map(|d| d.name.clone())
            .collect();
        if fields.is_empty() {
            vec![FIELD_CONTENT.to_string()]
        } else {
            fields
        }
    }

    fn value_leaf(&self, collection: &str, field: &str, value: &str) -> Result<Query> {
        let desc = self
            .registry
            .descriptor(collection, field)
            .ok_or_else(|| Error::UnknownField(field.into()))?;
        let value = value.trim().trim_matches('"');
        if value.split_whitespace().count() > 1 {
            leaf_from_phrase(desc, value)
        } else {
            leaf_from_word(desc, value)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Phrase(String),
    Range {
        lower: String,
        upper: String,
        incl_lower: bool,
        incl_upper: bool,
    },
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    text.push(c);
                }
                if !closed {
                    return Err(Error::InvalidQuery("unterminated phrase".into()));
                }
                tokens.push(Token::Phrase(text));
            }
            '[' | '{' => {
                let incl_lower = c == '[';
                chars.next();
                let mut body = String::new();
                let mut close = None;
                for c in chars.by_ref() {
                    if c == ']' || c == '}' {
                        close = Some(c);
                        break;
                    }
                    body.push(c);
                }
                let incl_upper = match close {
                    Some(']') => true,
                    Some('}') => false,
                    _ => return Err(Error::InvalidQuery("unterminated range".into())),
                };
                let parts: Vec<&str> = body.split(" TO ").collect();
                if parts.len() != 2 {
                    return Err(Error::InvalidQuery(format!(
                        "range '{}' must use the form [lower TO upper]",
                        body
                    )));
                }
                tokens.push(Token::Range {
                    lower: parts[0].trim().to_string(),
                    upper: parts[1].trim().to_string(),
                    incl_lower,
                    incl_upper,
                });
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || "()\"".contains(c) {
                        break;
                    }
                    if (c == '[' || c == '{') && word.ends_with(':') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(match word.as_str() {
                    "AND" | "&&" => Token::And,
                    "OR" | "||" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Word(word),
                });
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Value {
    Word(String),
    Phrase(String),
    Range {
        lower: String,
        upper: String,
        incl_lower: bool,
        incl_upper: bool,
    },
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    registry: &'a CollectionRegistry,
    collection: &'a str,
    default_fields: &'a [String],
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    /// One boolean level: terms default to SHOULD, `AND` promotes both of
    /// its operands to MUST, `NOT` demotes the next clause to MUST_NOT.
    fn parse_clauses(&mut self, inside_parens: bool) -> Result<Query> {
        let mut must = Vec::new();
        let mut must_not = Vec::new();
        let mut should = Vec::new();
        let mut next_is_must = false;
        let mut next_is_not = false;

        while let Some(token) = self.peek() {
            match token {
                Token::RParen => {
                    if inside_parens {
                        break;
                    }
                    return Err(Error::InvalidQuery("unbalanced ')'".into()));
                }
                Token::And => {
                    self.pos += 1;
                    if let Some(prev) = should.pop() {
                        must.push(prev);
                    }
                    next_is_must = true;
                }
                Token::Or => {
                    self.pos += 1;
                    next_is_must = false;
                }
                Token::Not => {
                    self.pos += 1;
                    next_is_not = true;
                }
                _ => {
                    let clause = self.parse_primary()?;
                    if next_is_not {
                        must_not.push(clause);
                    } else if next_is_must {
                        must.push(clause);
                    } else {
                        should.push(clause);
                    }
                    next_is_must = false;
                    next_is_not = false;
                }
            }
        }

        if must.is_empty() && must_not.is_empty() && should.is_empty() {
            return Ok(Query::All);
        }
        if must.len() == 1 && must_not.is_empty() && should.is_empty() {
            return Ok(must.remove(0));
        }
        if should.len() == 1 && must.is_empty() && must_not.is_empty() {
            return Ok(should.remove(0));
        }
        // A purely negative query still needs something to subtract from.
        if must.is_empty() && should.is_empty() {
            must.push(Query::All);
        }
        Ok(Query::Boolean {
            bool: BoolQuery::with_clauses(must, must_not, should),
        })
    }

    fn parse_primary(&mut self) -> Result<Query> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_clauses(true)?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::InvalidQuery("expected ')'".into())),
                }
            }
            Some(Token::Phrase(text)) => self.on_default_fields(Value::Phrase(text)),
            Some(Token::Word(word)) => {
                if let Some(idx) = word.find(':') {
                    let field = word[..idx].to_string();
                    if field.eq_ignore_ascii_case(RESTRICTED_FIELD) {
                        return Err(Error::RestrictedField(RESTRICTED_FIELD.into()));
                    }
                    let rest = &word[idx + 1..];
                    let value = if rest.is_empty() {
                        match self.advance() {
                            Some(Token::Phrase(p)) => Value::Phrase(p),
                            Some(Token::Range {
                                lower,
                                upper,
                                incl_lower,
                                incl_upper,
                            }) => Value::Range {
                                lower,
                                upper,
                                incl_lower,
                                incl_upper,
                            },
                            Some(Token::Word(w)) => Value::Word(w),
                            _ => {
                                return Err(Error::InvalidQuery(format!(
                                    "missing value for field '{}'",
                                    field
                                )))
                            }
                        }
                    } else {
                        Value::Word(rest.to_string())
                    };
                    self.field_leaf(&field, value)
                } else {
                    self.on_default_fields(Value::Word(word))
                }
            }
            Some(Token::Range { .. }) => {
                Err(Error::InvalidQuery("a range query needs a field".into()))
            }
            _ => Err(Error::InvalidQuery("unexpected end of query".into())),
        }
    }

    fn field_leaf(&self, field: &str, value: Value) -> Result<Query> {
        let desc = self
            .registry
            .descriptor(self.collection, field)
            .ok_or_else(|| Error::UnknownField(field.into()))?;
        leaf(desc, value)
    }

    /// A bare term targets every default field as a SHOULD disjunction.
    fn on_default_fields(&self, value: Value) -> Result<Query> {
        let mut leaves = Vec::new();
        let mut first_err = None;
        for field in self.default_fields {
            match self.field_leaf(field, value.clone()) {
                Ok(q) => leaves.push(q),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match leaves.len() {
            0 => Err(first_err
                .unwrap_or_else(|| Error::InvalidQuery("no searchable fields".into()))),
            1 => Ok(leaves.remove(0)),
            _ => Ok(BoolQuery::builder().should_all(leaves).build()),
        }
    }
}

fn leaf(desc: &PropertyDescriptor, value: Value) -> Result<Query> {
    match value {
        Value::Range {
            lower,
            upper,
            incl_lower,
            incl_upper,
        } => range_leaf(desc, &lower, &upper, incl_lower, incl_upper),
        Value::Phrase(text) => leaf_from_phrase(desc, &text),
        Value::Word(word) => leaf_from_word(desc, &word),
    }
}

fn analyzes_lowercase(desc: &PropertyDescriptor) -> bool {
    desc.kind == FieldKind::TokenizedString || desc.to_lower_case
}

fn leaf_from_phrase(desc: &PropertyDescriptor, text: &str) -> Result<Query> {
    let analyzed = if analyzes_lowercase(desc) {
        text.to_lowercase()
    } else {
        text.to_string()
    };
    let words: Vec<String> = analyzed.split_whitespace().map(String::from).collect();
    match words.len() {
        0 => Err(Error::InvalidQuery("empty phrase".into())),
        1 => Ok(Query::Exact(ExactTerm::with_term(
            desc.name.clone(),
            words.into_iter().next().unwrap(),
        ))),
        _ => Ok(Query::Phrase(studysearch_types::PhraseQuery::new(
            desc.name.clone(),
            words,
        ))),
    }
}

fn leaf_from_word(desc: &PropertyDescriptor, word: &str) -> Result<Query> {
    if word.is_empty() {
        return Err(Error::InvalidQuery("empty term".into()));
    }
    if desc.kind == FieldKind::Long || desc.kind == FieldKind::Date {
        word.parse::<i64>().map_err(|_| {
            Error::InvalidQuery(format!("'{}' is not a number for field '{}'", word, desc.name))
        })?;
        return Ok(Query::Exact(ExactTerm::with_term(
            desc.name.clone(),
            word.to_string(),
        )));
    }

    // `term~` / `term~1` fuzzy syntax.
    if let Some(idx) = word.rfind('~') {
        let (base, suffix) = word.split_at(idx);
        let distance = suffix[1..].parse::<u8>().unwrap_or(2).min(2);
        if !base.is_empty() && !base.contains('*') && !base.contains('?') {
            let base = if analyzes_lowercase(desc) {
                base.to_lowercase()
            } else {
                base.to_string()
            };
            return Ok(Query::Fuzzy(FuzzyQuery::new(
                desc.name.clone(),
                FuzzyTerm::new(base, distance, true),
            )));
        }
    }

    let has_star = word.contains('*');
    let has_question = word.contains('?');
    if has_star || has_question {
        // Wildcard text is kept as-is apart from case folding on
        // case-folding fields.
        let text = if analyzes_lowercase(desc) {
            word.to_lowercase()
        } else {
            word.to_string()
        };
        let trailing_only =
            !has_question && text.ends_with('*') && text.matches('*').count() == 1;
        if trailing_only {
            return Ok(Query::Prefix(PrefixQuery::new(
                desc.name.clone(),
                text[..text.len() - 1].to_string(),
            )));
        }
        return Ok(Query::Wildcard(WildcardQuery::new(desc.name.clone(), text)));
    }

    let analyzed = if analyzes_lowercase(desc) {
        word.to_lowercase()
    } else {
        word.to_string()
    };
    Ok(Query::Exact(ExactTerm::with_term(desc.name.clone(), analyzed)))
}

fn range_leaf(
    desc: &PropertyDescriptor,
    lower: &str,
    upper: &str,
    incl_lower: bool,
    incl_upper: bool,
) -> Result<Query> {
    if desc.kind == FieldKind::Long || desc.kind == FieldKind::Date {
        let parse = |s: &str| -> Result<Option<i64>> {
            if s == "*" {
                Ok(None)
            } else {
                s.parse::<i64>().map(Some).map_err(|_| {
                    Error::InvalidQuery(format!("invalid numeric range bound '{}'", s))
                })
            }
        };
        // Exclusive numeric bounds fold into inclusive ones by one step.
        let lower = parse(lower)?.map(|v| if incl_lower { v } else { v + 1 });
        let upper = parse(upper)?.map(|v| if incl_upper { v } else { v - 1 });
        let ranges = Ranges {
            gte: lower.map(|v| serde_json::json!(v)),
            lte: upper.map(|v| serde_json::json!(v)),
            ..Ranges::default()
        };
        return Ok(Query::Range(RangeQuery::new(desc.name.clone(), ranges)));
    }

    let fold = |s: &str| -> Option<String> {
        if s == "*" {
            None
        } else if analyzes_lowercase(desc) {
            Some(s.to_lowercase())
        } else {
            Some(s.to_string())
        }
    };
    let (lower, upper) = (fold(lower), fold(upper));
    let ranges = Ranges {
        gte: lower.clone().filter(|_| incl_lower).map(|v| serde_json::json!(v)),
        gt: lower.filter(|_| !incl_lower).map(|v| serde_json::json!(v)),
        lte: upper.clone().filter(|_| incl_upper).map(|v| serde_json::json!(v)),
        lt: upper.filter(|_| !incl_upper).map(|v| serde_json::json!(v)),
    };
    Ok(Query::Range(RangeQuery::new(desc.name.clone(), ranges)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::default_registry;
    use std::collections::HashMap;

    fn parser() -> QueryStringParser {
        QueryStringParser::new(Arc::new(default_registry()))
    }

    fn parse(raw: &str) -> Result<Query> {
        parser().parse(raw, "public", &HashMap::new())
    }

    #[test]
    fn empty_query_is_match_all() {
        assert_eq!(parse("").unwrap(), Query::All);
        assert_eq!(parse("   ").unwrap(), Query::All);
        assert_eq!(parse("*:*").unwrap(), Query::All);
    }

    #[test]
    fn access_field_is_restricted() {
        assert!(matches!(parse("access:private"), Err(Error::RestrictedField(_))));
        assert!(matches!(parse("cell access:public"), Err(Error::RestrictedField(_))));
        assert!(matches!(parse("ACCESS:x"), Err(Error::RestrictedField(_))));
        // not at a token boundary: an ordinary (unknown) field
        assert!(matches!(parse("reaccess:granted"), Err(Error::UnknownField(_))));
    }

    #[test]
    fn bare_term_fans_out_over_default_fields() {
        let q = parse("Leukocyte").unwrap();
        match q {
            Query::Boolean { bool } => {
                let fields: Vec<&str> = bool
                    .should_clauses()
                    .iter()
                    .filter_map(|c| c.field())
                    .collect();
                assert!(fields.contains(&"content"));
                assert!(fields.contains(&"title"));
                for clause in bool.should_clauses() {
                    assert_eq!(clause.text().unwrap(), "leukocyte");
                }
            }
            other => panic!("expected disjunction, got {:?}", other),
        }
    }

    #[test]
    fn field_query_targets_one_field() {
        let q = parse("title:Leukocyte").unwrap();
        assert_eq!(q.field(), Some("title"));
        assert_eq!(q.text().unwrap(), "leukocyte");
    }

    #[test]
    fn quoted_phrase_parses() {
        let q = parse(r#"content:"White Blood Cell""#).unwrap();
        match q {
            Query::Phrase(p) => {
                assert_eq!(p.terms(), &["white", "blood", "cell"]);
            }
            other => panic!("expected phrase, got {:?}", other),
        }
    }

    #[test]
    fn numeric_range_folds_exclusive_bounds() {
        let q = parse("file_count:{5 TO 10]").unwrap();
        match q {
            Query::Range(r) => {
                assert_eq!(r.field(), "file_count");
                assert_eq!(r.ranges().gte, Some(serde_json::json!(6)));
                assert_eq!(r.ranges().lte, Some(serde_json::json!(10)));
            }
            other => panic!("expected range, got {:?}", other),
        }
    }

    #[test]
    fn star_bounds_are_open() {
        let q = parse("release_time:[* TO 1609459200000]").unwrap();
        match q {
            Query::Range(r) => {
                assert!(r.ranges().gte.is_none());
                assert_eq!(r.ranges().lte, Some(serde_json::json!(1609459200000i64)));
            }
            other => panic!("expected range, got {:?}", other),
        }
    }

    #[test]
    fn bad_numeric_bound_is_invalid() {
        assert!(matches!(
            parse("file_count:[a TO 10]"),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn wildcards_are_preserved() {
        let q = parse("title:leuk*").unwrap();
        match q {
            Query::Prefix(p) => assert_eq!(p.prefix(), "leuk"),
            other => panic!("expected prefix, got {:?}", other),
        }
        let q = parse("title:le?k*cyte").unwrap();
        assert!(matches!(q, Query::Wildcard(_)));
    }

    #[test]
    fn boolean_operators() {
        let q = parse("title:cell AND title:study").unwrap();
        match q {
            Query::Boolean { bool } => {
                assert_eq!(bool.must_clauses().len(), 2);
                assert!(bool.should_clauses().is_empty());
            }
            other => panic!("expected boolean, got {:?}", other),
        }
        let q = parse("title:cell NOT title:mouse").unwrap();
        match q {
            Query::Boolean { bool } => {
                assert_eq!(bool.must_not_clauses().len(), 1);
                assert_eq!(bool.should_clauses().len(), 1);
            }
            other => panic!("expected boolean, got {:?}", other),
        }
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(matches!(parse("bogus:1"), Err(Error::UnknownField(_))));
    }

    #[test]
    fn fields_filter_selects_subset_and_requires_terms() {
        let mut filter = HashMap::new();
        filter.insert("title".to_string(), vec!["leukocyte".to_string()]);
        let q = parser().parse("cell", "public", &filter).unwrap();
        match q {
            Query::Boolean { bool } => {
                assert_eq!(bool.must_clauses().len(), 2);
                // free text restricted to the filter's field subset
                assert_eq!(bool.must_clauses()[0].field(), Some("title"));
            }
            other => panic!("expected boolean, got {:?}", other),
        }
    }

    #[test]
    fn fuzzy_suffix() {
        let q = parse("content:leukocytte~1").unwrap();
        match q {
            Query::Fuzzy(f) => {
                assert_eq!(f.value(), "leukocytte");
                assert_eq!(f.term().distance, 1);
            }
            other => panic!("expected fuzzy, got {:?}", other),
        }
    }
}
