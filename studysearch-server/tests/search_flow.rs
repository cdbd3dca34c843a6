//! End-to-end flows over a temporary index set: index → commit → search,
//! ontology expansion, spell suggestion, restricted fields, pagination
//! limits, autocomplete and deletion.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pretty_assertions::assert_eq;

use studysearch_server::index::{IndexPool, IndexTransactionManager, SharedPool};
use studysearch_server::ontology::{
    AutocompleteService, OntologyLoader, OntologyNodeRecord, OntologyStore,
};
use studysearch_server::query::Principal;
use studysearch_server::schema::{self, FILES, PAGETAB, SUBMISSION};
use studysearch_server::search::{SearchService, SpellChecker};
use studysearch_server::settings::Settings;
use studysearch_types::{
    Error, ExactTerm, IndexSubmissionRequest, Query, SearchCriteria, SearchRequest, Sort,
};

struct TestEnv {
    _dir: tempfile::TempDir,
    pool: SharedPool,
    store: Arc<OntologyStore>,
    txn: IndexTransactionManager,
    service: SearchService,
}

fn ontology_nodes() -> Vec<OntologyNodeRecord> {
    vec![
        OntologyNodeRecord {
            id: "efo:cell".into(),
            term: "cell".into(),
            alternative_terms: vec![],
            parents: vec![],
            synonyms: vec![],
        },
        OntologyNodeRecord {
            id: "efo:leukocyte".into(),
            term: "leukocyte".into(),
            alternative_terms: vec!["white blood cell".into()],
            parents: vec!["efo:cell".into()],
            synonyms: vec!["white blood cell".into()],
        },
        OntologyNodeRecord {
            id: "efo:osteoclast".into(),
            term: "osteoclast".into(),
            alternative_terms: vec![],
            parents: vec!["efo:leukocyte".into()],
            synonyms: vec![],
        },
        OntologyNodeRecord {
            id: "efo:leukemia".into(),
            term: "leukemia".into(),
            alternative_terms: vec![],
            parents: vec!["efo:cell".into()],
            synonyms: vec![],
        },
    ]
}

async fn env() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.path = dir.path().display().to_string();
    settings.writer_memory = 15_000_000;

    let pool: SharedPool = Arc::new(IndexPool::new(settings.clone()));
    pool.open_default_indexes().unwrap();

    let loader = OntologyLoader::new(Arc::clone(&pool));
    loader.load_records(&ontology_nodes()).await.unwrap();

    let store = Arc::new(OntologyStore::new());
    store.initialize(&pool).unwrap();
    pool.set_spell_checker(SpellChecker::default());

    let registry = Arc::new(schema::default_registry());
    let txn = IndexTransactionManager::new(
        Arc::clone(&pool),
        Arc::clone(&registry),
        Arc::clone(&store),
    );
    let service = SearchService::new(Arc::clone(&pool), Arc::clone(&registry), &settings);

    TestEnv {
        _dir: dir,
        pool,
        store,
        txn,
        service,
    }
}

fn submission(
    title: &str,
    content: &str,
    access: &str,
    release_time: Option<i64>,
) -> IndexSubmissionRequest {
    let mut fields: HashMap<String, Vec<String>> = HashMap::new();
    fields.insert("title".into(), vec![title.into()]);
    fields.insert("content".into(), vec![content.into()]);
    fields.insert("access".into(), vec![access.into()]);
    fields.insert("collection".into(), vec!["Public".into()]);
    if let Some(rt) = release_time {
        fields.insert("release_time".into(), vec![rt.to_string()]);
    }
    IndexSubmissionRequest {
        fields,
        files: Vec::new(),
        pagetab: Some("submission\tpage-tab".into()),
    }
}

fn search_request(query: &str) -> SearchRequest {
    let mut request = SearchRequest::default();
    request.query = Some(query.to_string());
    request.page = 1;
    request.page_size = 10;
    request
}

fn count_term(env: &TestEnv, index: &str, field: &str, value: &str) -> u64 {
    let criteria = SearchCriteria::new(Query::Exact(ExactTerm::with_term(
        field.to_string(),
        value.to_string(),
    )));
    env.service.executor().execute(index, &criteria).unwrap().total_hits
}

#[tokio::test]
async fn index_and_retrieve() {
    let env = env().await;
    env.txn
        .update_submission(
            "S-BSST1",
            &submission(
                "Human leukocyte study",
                "leukocyte is a cell",
                "public",
                Some(1_609_459_200_000),
            ),
        )
        .await
        .unwrap();
    env.txn.commit().await.unwrap();

    let response = env
        .service
        .search(&search_request("leukocyte"), None)
        .unwrap();
    assert_eq!(response.total_hits, 1);
    assert!(response.is_total_hits_exact);
    let hit = &response.hits[0];
    assert_eq!(hit.get_str("accession"), Some("s-bsst1"));
    assert_eq!(hit.get_str("is_public"), Some("true"));
    assert!(hit.get_str("content").unwrap().contains("leukocyte"));
    assert_eq!(response.query.as_deref(), Some("leukocyte"));
}

#[tokio::test]
async fn expansion_terms_are_filtered_to_live_index() {
    let env = env().await;
    // Only the child term occurs in the corpus.
    env.txn
        .update_submission(
            "S-BSST2",
            &submission(
                "Bone study",
                "osteoclast resorbs bone",
                "public",
                Some(1_609_459_200_000),
            ),
        )
        .await
        .unwrap();
    env.txn.commit().await.unwrap();

    let response = env
        .service
        .search(&search_request("leukocyte"), None)
        .unwrap();
    assert!(response.total_hits >= 1);
    assert!(response.expanded_efo_terms.contains("osteoclast"));
    assert!(!response.expanded_synonyms.contains("white blood cell"));
    assert!(!response.too_many_expansion_terms);
}

#[tokio::test]
async fn poor_hits_produce_spell_suggestion() {
    let env = env().await;
    env.txn
        .update_submission(
            "S-BSST1",
            &submission(
                "Human leukocyte study",
                "leukocyte is a cell",
                "public",
                Some(1_609_459_200_000),
            ),
        )
        .await
        .unwrap();
    env.txn.commit().await.unwrap();

    let response = env
        .service
        .search(&search_request("leukocytte"), None)
        .unwrap();
    assert_eq!(response.total_hits, 0);
    assert_eq!(response.suggestion, vec!["leukocyte".to_string()]);
}

#[tokio::test]
async fn access_field_is_restricted() {
    let env = env().await;
    let err = env
        .service
        .search(&search_request("access:private"), None)
        .unwrap_err();
    assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    assert!(err.to_string().contains("access"));
}

#[tokio::test]
async fn deep_pagination_is_rejected() {
    let env = env().await;
    let mut request = search_request("cell");
    request.page = 600;
    request.page_size = 100;
    let err = env.service.search(&request, None).unwrap_err();
    assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    assert!(err.to_string().contains("Deep pagination"));

    // the wire contract also bounds the page size itself
    let mut request = search_request("cell");
    request.page = 1;
    request.page_size = 600;
    let err = env.service.search(&request, None).unwrap_err();
    assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    assert!(err.to_string().contains("pageSize"));
}

#[tokio::test]
async fn autocomplete_filters_to_index_presence() {
    let env = env().await;
    env.txn
        .update_submission(
            "S-BSST1",
            &submission(
                "Human leukocyte study",
                "leukocyte is a cell",
                "public",
                Some(1_609_459_200_000),
            ),
        )
        .await
        .unwrap();
    env.txn.commit().await.unwrap();

    let autocomplete = AutocompleteService::new(
        Arc::clone(&env.pool),
        Arc::clone(&env.store),
        env.service.executor(),
        true,
    );
    let lines = autocomplete.get_keywords("leuk", 10);
    let lines: Vec<&str> = lines.lines().collect();
    assert_eq!(lines.len(), 1);
    // leukocyte has a child node, so its id rides along
    assert_eq!(lines[0], "leukocyte|o|efo:leukocyte");

    assert_eq!(autocomplete.get_keywords("", 10), "");
    assert_eq!(autocomplete.get_efo_tree("unknown:id"), "");
}

#[tokio::test]
async fn reindex_replaces_documents() {
    let env = env().await;
    for _ in 0..2 {
        env.txn
            .update_submission(
                "S-BSST1",
                &submission("First", "leukocyte content", "public", Some(1000)),
            )
            .await
            .unwrap();
        env.txn.commit().await.unwrap();
    }

    assert_eq!(count_term(&env, SUBMISSION, "accession", "s-bsst1"), 1);
    assert_eq!(count_term(&env, PAGETAB, "accession", "s-bsst1"), 1);
}

#[tokio::test]
async fn delete_submission_clears_all_indexes() {
    let env = env().await;
    let mut request = submission("First", "leukocyte content", "public", Some(1000));
    let mut file = HashMap::new();
    file.insert("file_name".to_string(), "raw.csv".to_string());
    file.insert("file_size".to_string(), "10".to_string());
    request.files = vec![file.clone(), file];
    env.txn.update_submission("S-BSST1", &request).await.unwrap();
    env.txn.commit().await.unwrap();
    assert_eq!(count_term(&env, FILES, "owner", "s-bsst1"), 2);

    env.txn.delete_submission("S-BSST1").await.unwrap();
    assert_eq!(count_term(&env, SUBMISSION, "accession", "s-bsst1"), 0);
    assert_eq!(count_term(&env, FILES, "owner", "s-bsst1"), 0);
    assert_eq!(count_term(&env, PAGETAB, "accession", "s-bsst1"), 0);

    // idempotent
    env.txn.delete_submission("S-BSST1").await.unwrap();
    assert_eq!(count_term(&env, SUBMISSION, "accession", "s-bsst1"), 0);
}

#[tokio::test]
async fn cursor_pagination_visits_every_document_once() {
    let env = env().await;
    for i in 0..5 {
        env.txn
            .update_submission(
                &format!("S-BSST{}", i),
                &submission(
                    "Study",
                    "leukocyte content",
                    "public",
                    Some(1_000_000 + i as i64),
                ),
            )
            .await
            .unwrap();
    }
    env.txn.commit().await.unwrap();

    let mut seen: Vec<String> = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let mut criteria = SearchCriteria::new(Query::All)
            .with_sort(Sort::descending("release_time"))
            .with_limit(2);
        if let Some(c) = &cursor {
            criteria = criteria.with_cursor(c.clone());
        }
        let page = env.service.executor().execute(SUBMISSION, &criteria).unwrap();
        assert_eq!(page.total_hits, 5);
        if page.results.is_empty() {
            break;
        }
        for hit in &page.results {
            seen.push(hit.get_str("id").unwrap().to_string());
        }
        cursor = page.last_cursor.clone();
        if cursor.is_none() {
            break;
        }
    }

    let unique: HashSet<&String> = seen.iter().collect();
    assert_eq!(seen.len(), 5, "no omissions: {:?}", seen);
    assert_eq!(unique.len(), 5, "no duplicates: {:?}", seen);
    // descending release_time order
    assert_eq!(seen[0], "S-BSST4");
    assert_eq!(seen[4], "S-BSST0");
}

#[tokio::test]
async fn security_filter_hides_private_submissions() {
    let env = env().await;
    env.txn
        .update_submission(
            "S-PUB1",
            &submission("Open", "leukocyte content", "public", Some(1000)),
        )
        .await
        .unwrap();
    env.txn
        .update_submission(
            "S-PRIV1",
            &submission("Hidden", "leukocyte content", "alice", Some(1000)),
        )
        .await
        .unwrap();
    env.txn.commit().await.unwrap();

    let anonymous = env.service.search(&search_request("leukocyte"), None).unwrap();
    assert_eq!(anonymous.total_hits, 1);

    let alice = env
        .service
        .search(&search_request("leukocyte"), Some(&Principal::user("alice")))
        .unwrap();
    assert_eq!(alice.total_hits, 2);

    let admin = env
        .service
        .search(
            &search_request("leukocyte"),
            Some(&Principal::superuser("admin")),
        )
        .unwrap();
    assert_eq!(admin.total_hits, 2);
}

#[tokio::test]
async fn update_time_stamped_and_monotonic() {
    let env = env().await;
    env.txn
        .update_submission("S-BSST1", &submission("A", "cell", "public", Some(1)))
        .await
        .unwrap();
    env.txn.commit().await.unwrap();
    let first = env.pool.update_time().unwrap();

    env.txn
        .update_submission("S-BSST2", &submission("B", "cell", "public", Some(2)))
        .await
        .unwrap();
    env.txn.commit().await.unwrap();
    let second = env.pool.update_time().unwrap();
    assert!(second >= first);

    let metadata = env.pool.metadata();
    let sub = metadata.iter().find(|m| m.name == SUBMISSION).unwrap();
    assert_eq!(sub.update_time, Some(second));
    assert_eq!(sub.number_of_documents, 2);
    assert!(sub.size > 0);
}

#[tokio::test]
async fn faceted_search_counts_and_drilldown() {
    let env = env().await;
    env.txn
        .update_submission(
            "S-BSST1",
            &submission("A", "leukocyte study", "public", Some(1_609_459_200_000)),
        )
        .await
        .unwrap();
    env.txn.commit().await.unwrap();

    let response = env.service.search(&search_request("leukocyte"), None).unwrap();
    let facets = response.facets.expect("facet dimensions expected");
    let collection = facets.iter().find(|f| f.name == "collection").unwrap();
    assert_eq!(collection.values[0].value, "public");
    assert_eq!(collection.values[0].count, 1);

    // drill down on the collection facet
    let mut request = search_request("leukocyte");
    request
        .facets
        .insert("collection".to_string(), vec!["public".to_string()]);
    let drilled = env.service.search(&request, None).unwrap();
    assert_eq!(drilled.total_hits, 1);

    let mut request = search_request("leukocyte");
    request
        .facets
        .insert("collection".to_string(), vec!["arrays".to_string()]);
    let missed = env.service.search(&request, None).unwrap();
    assert_eq!(missed.total_hits, 0);
}

#[tokio::test]
async fn wrong_index_release_is_an_invariant_violation() {
    let env = env().await;
    let snapshot = env.pool.acquire(SUBMISSION).unwrap();
    match env.pool.release(FILES, snapshot) {
        Err(Error::Internal(message)) => assert!(message.contains("released")),
        other => panic!("expected loud failure, got {:?}", other),
    }
}
