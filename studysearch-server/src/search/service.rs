//! The search facade: parse → expand → secure → drill down → execute →
//! post-process. Client errors propagate for a 400; anything else becomes
//! the best-effort error response.

use std::sync::Arc;

use log::{error, warn};

use studysearch_types::{
    CollectionRegistry, Error, QueryResult, Result, SearchCriteria, SearchRequest, SearchResponse,
    Sort,
};

use crate::index::pool::SharedPool;
use crate::query::{secure_query, Principal, QueryExpander, QueryStringParser};
use crate::schema::SUBMISSION;
use crate::search::executor::SearchExecutor;
use crate::search::facets::FacetEngine;
use crate::search::response::ResponseProcessor;
use crate::settings::Settings;

pub struct SearchService {
    parser: QueryStringParser,
    expander: QueryExpander,
    facet_engine: FacetEngine,
    executor: Arc<SearchExecutor>,
    processor: ResponseProcessor,
    default_facet_limit: usize,
}

impl SearchService {
    pub fn new(pool: SharedPool, registry: Arc<CollectionRegistry>, settings: &Settings) -> Self {
        let executor = Arc::new(SearchExecutor::new(Arc::clone(&pool)));
        Self {
            parser: QueryStringParser::new(Arc::clone(&registry)),
            expander: QueryExpander::new(Arc::clone(&pool), Arc::clone(&registry)),
            facet_engine: FacetEngine::new(Arc::clone(&pool), Arc::clone(&registry)),
            processor: ResponseProcessor::new(
                Arc::clone(&pool),
                Arc::clone(&executor),
                settings.fragment_width,
            ),
            executor,
            default_facet_limit: settings.facet_limit,
        }
    }

    pub fn executor(&self) -> Arc<SearchExecutor> {
        Arc::clone(&self.executor)
    }

    /// Run one search request for `principal`. `Err` is returned only for
    /// client errors (invalid query or arguments); infrastructure failures
    /// come back as the empty error response.
    pub fn search(
        &self,
        request: &SearchRequest,
        principal: Option<&Principal>,
    ) -> Result<SearchResponse> {
        request.validate()?;
        let raw_query = request.query.as_deref().unwrap_or("");

        let parsed = self
            .parser
            .parse(raw_query, &request.collection, &request.fields)?;

        let QueryResult { query, expansion } =
            self.expander.expand(parsed.clone(), &request.collection);
        let secured = secure_query(query, principal);
        let drilled = self
            .facet_engine
            .drilldown(secured, &request.facets, &request.collection);

        let facet_limit = request.facet_limit.unwrap_or(self.default_facet_limit);
        let facets = match self.facet_engine.facet_counts(
            &drilled,
            &request.collection,
            &request.facets,
            facet_limit,
            principal,
        ) {
            Ok(dimensions) => Some(dimensions),
            Err(e) => {
                warn!("facet counting failed: {}", e);
                None
            }
        };

        let mut criteria = SearchCriteria::paginated(drilled, request.page, request.page_size);
        criteria.sort = self.resolve_sort(request);

        match self.executor.execute(SUBMISSION, &criteria) {
            Ok(page) => Ok(self
                .processor
                .process(request, raw_query, &parsed, expansion, page, facets)),
            Err(e @ Error::InvalidArgument(_))
            | Err(e @ Error::InvalidQuery(_))
            | Err(e @ Error::RestrictedField(_)) => Err(e),
            Err(e) => {
                error!("search execution failed: {}", e);
                Ok(self.processor.error_response(raw_query))
            }
        }
    }

    fn resolve_sort(&self, request: &SearchRequest) -> Option<Sort> {
        match request.sort_by.as_deref() {
            None | Some("") | Some("relevance") => None,
            Some(field) => Some(Sort {
                field: field.to_string(),
                order: request.sort_order,
            }),
        }
    }
}
