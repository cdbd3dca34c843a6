use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{info, warn};

use studysearch_server::auth::Authenticator;
use studysearch_server::index::{IndexPool, IndexTransactionManager, IndexingQueue};
use studysearch_server::ontology::{AutocompleteService, OntologyLoader, OntologyStore};
use studysearch_server::router::{AppState, Router};
use studysearch_server::schema::{default_registry, EFO};
use studysearch_server::search::{SearchService, SpellChecker};
use studysearch_server::settings::{settings, HEADER, VERSION};
use studysearch_server::support::setup_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = settings();
    let logger = setup_logging(&settings.log_level)?;
    let _scope = slog_scope::set_global_logger(logger);
    slog_stdlog::init_with_level(
        log::Level::from_str(&settings.log_level).unwrap_or(log::Level::Info),
    )?;
    println!("{}", HEADER);

    if !Path::new(&settings.path).exists() {
        info!("base data path {} does not exist, creating it", settings.path);
        fs::create_dir_all(&settings.path)?;
    }

    let pool = Arc::new(IndexPool::new(settings.clone()));
    pool.open_default_indexes()?;

    // Rebuild the ontology index from extracted node records when it is
    // empty and a source file is configured.
    if !settings.efo.nodes_file.is_empty() {
        let empty = pool
            .acquire(EFO)
            .map(|s| {
                let docs = s.searcher().num_docs();
                let _ = pool.release(EFO, s);
                docs == 0
            })
            .unwrap_or(false);
        if empty {
            let loader = OntologyLoader::new(Arc::clone(&pool));
            match loader.load_file(&settings.efo.nodes_file).await {
                Ok(count) => info!("bootstrapped ontology index with {} nodes", count),
                Err(e) => warn!("ontology bootstrap failed: {}", e),
            }
        }
    }

    let store = Arc::new(OntologyStore::with_ignore_list(load_ignore_list(
        &settings.efo.ignore_list,
    )));
    if let Err(e) = store.initialize(&pool) {
        warn!("ontology store initialisation failed: {}", e);
    }

    let registry = Arc::new(default_registry());
    pool.set_spell_checker(SpellChecker::default());

    let txn = Arc::new(IndexTransactionManager::new(
        Arc::clone(&pool),
        Arc::clone(&registry),
        Arc::clone(&store),
    ));
    let queue = IndexingQueue::start(txn, settings.indexing_queue_size, settings.indexing_workers);

    let search = SearchService::new(Arc::clone(&pool), Arc::clone(&registry), &settings);
    let executor = search.executor();
    let autocomplete = AutocompleteService::new(
        Arc::clone(&pool),
        Arc::clone(&store),
        executor,
        settings.autocomplete_filter_by_index,
    );
    let auth = Authenticator::from_settings(&settings);

    let state = Arc::new(AppState {
        pool: Arc::clone(&pool),
        registry,
        search,
        autocomplete,
        queue,
        auth,
        search_available: AtomicBool::new(true),
    });

    let addr = format!("{}:{}", settings.host, settings.port).parse()?;
    info!("studysearch {} running on {}", VERSION, addr);
    Router::new(state).serve(addr).await?;

    info!("shutting down");
    pool.close().await;
    Ok(())
}

fn load_ignore_list(path: &str) -> HashSet<String> {
    if path.is_empty() || !Path::new(path).exists() {
        return HashSet::new();
    }
    match fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect(),
        Err(e) => {
            warn!("could not read ignore list {}: {}", path, e);
            HashSet::new()
        }
    }
}
