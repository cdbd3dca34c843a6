//! Access-control filtering: every query is wrapped with a filter derived
//! from the authenticated principal before execution.

use studysearch_types::{BoolQuery, ExactTerm, Query};

use crate::schema::FIELD_ACCESS;

/// The authenticated caller, resolved per request and passed explicitly
/// through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub login: String,
    pub superuser: bool,
}

impl Principal {
    pub fn user<L: Into<String>>(login: L) -> Self {
        Self {
            login: login.into(),
            superuser: false,
        }
    }

    pub fn superuser<L: Into<String>>(login: L) -> Self {
        Self {
            login: login.into(),
            superuser: true,
        }
    }
}

fn access_tag(tag: &str) -> Query {
    Query::Exact(ExactTerm::with_term(
        FIELD_ACCESS.to_string(),
        tag.to_lowercase(),
    ))
}

/// `base ∧ accessFilter`. Anonymous callers see public records, users see
/// public plus their own, superusers see everything.
pub fn secure_query(base: Query, principal: Option<&Principal>) -> Query {
    match principal {
        Some(p) if p.superuser => base,
        Some(p) => base.and(
            BoolQuery::builder()
                .should(access_tag("public"))
                .should(access_tag(&p.login))
                .build(),
        ),
        None => base.and(access_tag("public")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_gets_public_filter() {
        let secured = secure_query(Query::All, None);
        assert_eq!(secured, access_tag("public"));
    }

    #[test]
    fn user_gets_public_or_own_filter() {
        let base = Query::Exact(ExactTerm::with_term("content".into(), "cell".into()));
        let secured = secure_query(base.clone(), Some(&Principal::user("Alice")));
        match secured {
            Query::Boolean { bool } => {
                assert_eq!(bool.must_clauses().len(), 2);
                match &bool.must_clauses()[1] {
                    Query::Boolean { bool: filter } => {
                        let tags: Vec<String> = filter
                            .should_clauses()
                            .iter()
                            .filter_map(|q| q.text())
                            .collect();
                        assert_eq!(tags, vec!["public".to_string(), "alice".to_string()]);
                    }
                    other => panic!("expected access disjunction, got {:?}", other),
                }
            }
            other => panic!("expected conjunction, got {:?}", other),
        }
    }

    #[test]
    fn superuser_is_unfiltered() {
        let base = Query::Exact(ExactTerm::with_term("content".into(), "cell".into()));
        assert_eq!(
            secure_query(base.clone(), Some(&Principal::superuser("admin"))),
            base
        );
    }
}
