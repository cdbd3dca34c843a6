//! Executes prepared search criteria against a named index: offset
//! pagination, cursor (search-after) pagination, or a bounded
//! non-paginated fetch, with stored-field materialisation.

use std::cmp::Reverse;
use std::fmt;

use log::{error, warn};
use tantivy::collector::{Count, MultiCollector, TopDocs};

use tantivy::query::Query as TantivyQuery;
use tantivy::schema::{Field, FieldType, Schema};
use tantivy::{DocAddress, DocId, Score, Searcher, SegmentReader, Term};

use studysearch_types::{
    lower, BoolQuery, Error, ExactTerm, Hit, PaginatedResult, Query, RangeQuery, Ranges, Result,
    SearchCriteria, Sort, SortOrder,
};

use crate::index::pool::{ReaderSnapshot, SharedPool};
use crate::schema::{FIELD_ID, SORT_FIELD_SUFFIX};

/// Hard cap on one page (offset mode) or one batch (cursor mode).
pub const MAX_PAGE_SIZE: usize = 1000;
/// Offset pagination refuses to walk past this many documents.
pub const MAX_TOTAL_DOCS_FOR_PAGINATION: usize = 50_000;
/// Cap of the non-paginated mode.
pub const DEFAULT_MAX_RESULTS: usize = 10_000;

const DEFAULT_CURSOR_LIMIT: usize = 100;

pub struct SearchExecutor {
    pool: SharedPool,
}

impl SearchExecutor {
    pub fn new(pool: SharedPool) -> Self {
        Self { pool }
    }

    /// Run `criteria` against `index`. The snapshot is acquired once and
    /// released on every exit path.
    pub fn execute(&self, index: &str, criteria: &SearchCriteria) -> Result<PaginatedResult<Hit>> {
        criteria.validate()?;
        let snapshot = self.pool.acquire(index)?;
        let outcome = run(&snapshot, criteria);
        if let Err(e) = self.pool.release(index, snapshot) {
            error!("release after search failed: {}", e);
        }
        outcome
    }

    /// Document frequency of `term` (lower-cased) in `field` of `index`.
    pub fn term_frequency(&self, field: &str, term: &str, index: &str) -> Result<u64> {
        let snapshot = self.pool.acquire(index)?;
        let outcome = (|| {
            let searcher = snapshot.searcher();
            let schema = searcher.schema();
            let f = schema
                .get_field(field)
                .ok_or_else(|| Error::UnknownField(field.into()))?;
            let term = Term::from_field_text(f, &term.to_lowercase());
            Ok(searcher.doc_freq(&term)?)
        })();
        if let Err(e) = self.pool.release(index, snapshot) {
            error!("release after term-frequency failed: {}", e);
        }
        outcome
    }
}

fn run(snapshot: &ReaderSnapshot, criteria: &SearchCriteria) -> Result<PaginatedResult<Hit>> {
    let searcher = snapshot.searcher();
    let schema = searcher.schema().clone();

    if let (Some(page), Some(page_size)) = (criteria.page, criteria.page_size) {
        if criteria.search_after.is_some() {
            return Err(Error::InvalidArgument(
                "search-after cannot be combined with offset pagination".into(),
            ));
        }
        offset_mode(searcher, &schema, criteria, page, page_size)
    } else if criteria.search_after.is_some() || criteria.sort.is_some() {
        cursor_mode(searcher, &schema, criteria)
    } else {
        unpaginated(searcher, &schema, criteria)
    }
}

fn offset_mode(
    searcher: &Searcher,
    schema: &Schema,
    criteria: &SearchCriteria,
    page: usize,
    page_size: usize,
) -> Result<PaginatedResult<Hit>> {
    if page < 1 {
        return Err(Error::InvalidArgument("page must be >= 1".into()));
    }
    if page_size < 1 || page_size > MAX_PAGE_SIZE {
        return Err(Error::InvalidArgument(format!(
            "pageSize must be in [1, {}]",
            MAX_PAGE_SIZE
        )));
    }
    if page * page_size > MAX_TOTAL_DOCS_FOR_PAGINATION {
        return Err(Error::InvalidArgument(format!(
            "Deep pagination beyond {} documents is not supported, switch to cursor pagination",
            MAX_TOTAL_DOCS_FOR_PAGINATION
        )));
    }

    let query = lower(criteria.query.clone(), schema)?;
    let skip = (page - 1) * page_size;

    let (total, addresses) = match &criteria.sort {
        Some(sort) => {
            let resolved = resolve_sort(schema, sort)?;
            let (total, scored) = sorted_search(searcher, &*query, &resolved, page_size, skip)?;
            (total, scored.into_iter().map(|(_, a)| a).collect())
        }
        None => relevance_search(searcher, &*query, page_size, skip)?,
    };

    Ok(PaginatedResult {
        results: materialize(searcher, schema, &addresses)?,
        page,
        page_size,
        total_hits: total as u64,
        is_total_hits_exact: true,
        last_cursor: None,
    })
}

fn cursor_mode(
    searcher: &Searcher,
    schema: &Schema,
    criteria: &SearchCriteria,
) -> Result<PaginatedResult<Hit>> {
    let sort = criteria
        .sort
        .as_ref()
        .ok_or_else(|| Error::InvalidArgument("search-after requires a sort".into()))?;
    let resolved = resolve_sort(schema, sort)?;
    let limit = criteria
        .limit
        .unwrap_or(DEFAULT_CURSOR_LIMIT)
        .min(MAX_PAGE_SIZE)
        .max(1);

    // Total hits always refer to the un-cursored query; the cursor only
    // selects the continuation window.
    let base = lower(criteria.query.clone(), schema)?;
    let total = searcher.search(&*base, &Count)?;

    let effective: Box<dyn TantivyQuery> = match &criteria.search_after {
        Some(cursor) => {
            let (value, id) = parse_cursor(&resolved, cursor)?;
            let after = after_filter(&resolved, value, &id);
            lower(criteria.query.clone().and(after), schema)?
        }
        None => base,
    };

    let (_, scored) = sorted_search(searcher, &*effective, &resolved, limit, 0)?;
    let addresses: Vec<DocAddress> = scored.iter().map(|&(_, a)| a).collect();
    let results = materialize(searcher, schema, &addresses)?;
    let last_cursor = scored.last().and_then(|&(value, _)| {
        results
            .last()
            .and_then(|hit| hit.get_str(FIELD_ID))
            .map(|id| format!("{}:{}", value, id))
    });

    Ok(PaginatedResult {
        results,
        page: 1,
        page_size: limit,
        total_hits: total as u64,
        is_total_hits_exact: true,
        last_cursor,
    })
}

fn unpaginated(
    searcher: &Searcher,
    schema: &Schema,
    criteria: &SearchCriteria,
) -> Result<PaginatedResult<Hit>> {
    let limit = criteria
        .limit
        .unwrap_or(DEFAULT_MAX_RESULTS)
        .min(DEFAULT_MAX_RESULTS)
        .max(1);
    let query = lower(criteria.query.clone(), schema)?;
    let (total, addresses) = relevance_search(searcher, &*query, limit, 0)?;
    if total > limit {
        warn!(
            "non-paginated fetch truncated: {} total hits, {} returned",
            total, limit
        );
    }

    Ok(PaginatedResult {
        results: materialize(searcher, schema, &addresses)?,
        page: 1,
        page_size: limit,
        total_hits: total as u64,
        is_total_hits_exact: true,
        last_cursor: None,
    })
}

fn relevance_search(
    searcher: &Searcher,
    query: &dyn TantivyQuery,
    limit: usize,
    offset: usize,
) -> Result<(usize, Vec<DocAddress>)> {
    let mut collector = MultiCollector::new();
    let count_handle = collector.add_collector(Count);
    let top_handle = collector.add_collector(TopDocs::with_limit(limit).and_offset(offset));
    let mut fruits = searcher.search(query, &collector)?;
    let total = count_handle.extract(&mut fruits);
    let addresses = top_handle
        .extract(&mut fruits)
        .into_iter()
        .map(|(_, a)| a)
        .collect();
    Ok((total, addresses))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SortKind {
    I64,
    U64,
}

#[derive(Debug, Clone)]
struct ResolvedSort {
    field: Field,
    field_name: String,
    kind: SortKind,
    order: SortOrder,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SortValue {
    I64(i64),
    U64(u64),
}

impl fmt::Display for SortValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortValue::I64(v) => write!(f, "{}", v),
            SortValue::U64(v) => write!(f, "{}", v),
        }
    }
}

impl SortValue {
    fn to_json(self) -> serde_json::Value {
        match self {
            SortValue::I64(v) => serde_json::json!(v),
            SortValue::U64(v) => serde_json::json!(v),
        }
    }
}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (SortValue::I64(a), SortValue::I64(b)) => a.partial_cmp(b),
            (SortValue::U64(a), SortValue::U64(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// A sortable target is an i64 fast field, or the hidden u64 companion of a
/// sortable string field.
fn resolve_sort(schema: &Schema, sort: &Sort) -> Result<ResolvedSort> {
    if let Some(field) = schema.get_field(&sort.field) {
        if let FieldType::I64(opts) = schema.get_field_entry(field).field_type() {
            if opts.is_fast() {
                return Ok(ResolvedSort {
                    field,
                    field_name: sort.field.clone(),
                    kind: SortKind::I64,
                    order: sort.order,
                });
            }
        }
    }
    let companion = format!("{}{}", sort.field, SORT_FIELD_SUFFIX);
    if let Some(field) = schema.get_field(&companion) {
        if let FieldType::U64(opts) = schema.get_field_entry(field).field_type() {
            if opts.is_fast() {
                return Ok(ResolvedSort {
                    field,
                    field_name: companion,
                    kind: SortKind::U64,
                    order: sort.order,
                });
            }
        }
    }
    Err(Error::InvalidArgument(format!(
        "field '{}' is not sortable",
        sort.field
    )))
}

/// `(total hits, (sort value, doc) pairs in requested order)`. The multi
/// collector's fruit handles are not nameable types, so each kind/order
/// combination runs its own search.
fn sorted_search(
    searcher: &Searcher,
    query: &dyn TantivyQuery,
    resolved: &ResolvedSort,
    limit: usize,
    offset: usize,
) -> Result<(usize, Vec<(SortValue, DocAddress)>)> {
    let field = resolved.field;
    let top = TopDocs::with_limit(limit).and_offset(offset);
    match (resolved.kind, resolved.order) {
        (SortKind::I64, SortOrder::Descending) => {
            let mut collector = MultiCollector::new();
            let count_handle = collector.add_collector(Count);
            let top_handle =
                collector.add_collector(top.tweak_score(move |segment: &SegmentReader| {
                    let reader = segment.fast_fields().i64(field).expect("declared fast field");
                    move |doc: DocId, _score: Score| SortValue::I64(reader.get_val(doc))
                }));
            let mut fruits = searcher.search(query, &collector)?;
            let total = count_handle.extract(&mut fruits);
            Ok((total, top_handle.extract(&mut fruits)))
        }
        (SortKind::I64, SortOrder::Ascending) => {
            let mut collector = MultiCollector::new();
            let count_handle = collector.add_collector(Count);
            let top_handle =
                collector.add_collector(top.tweak_score(move |segment: &SegmentReader| {
                    let reader = segment.fast_fields().i64(field).expect("declared fast field");
                    move |doc: DocId, _score: Score| Reverse(SortValue::I64(reader.get_val(doc)))
                }));
            let mut fruits = searcher.search(query, &collector)?;
            let total = count_handle.extract(&mut fruits);
            let scored = top_handle
                .extract(&mut fruits)
                .into_iter()
                .map(|(Reverse(v), a)| (v, a))
                .collect();
            Ok((total, scored))
        }
        (SortKind::U64, SortOrder::Descending) => {
            let mut collector = MultiCollector::new();
            let count_handle = collector.add_collector(Count);
            let top_handle =
                collector.add_collector(top.tweak_score(move |segment: &SegmentReader| {
                    let reader = segment.fast_fields().u64(field).expect("declared fast field");
                    move |doc: DocId, _score: Score| SortValue::U64(reader.get_val(doc))
                }));
            let mut fruits = searcher.search(query, &collector)?;
            let total = count_handle.extract(&mut fruits);
            Ok((total, top_handle.extract(&mut fruits)))
        }
        (SortKind::U64, SortOrder::Ascending) => {
            let mut collector = MultiCollector::new();
            let count_handle = collector.add_collector(Count);
            let top_handle =
                collector.add_collector(top.tweak_score(move |segment: &SegmentReader| {
                    let reader = segment.fast_fields().u64(field).expect("declared fast field");
                    move |doc: DocId, _score: Score| Reverse(SortValue::U64(reader.get_val(doc)))
                }));
            let mut fruits = searcher.search(query, &collector)?;
            let total = count_handle.extract(&mut fruits);
            let scored = top_handle
                .extract(&mut fruits)
                .into_iter()
                .map(|(Reverse(v), a)| (v, a))
                .collect();
            Ok((total, scored))
        }
    }
}

fn parse_cursor(resolved: &ResolvedSort, cursor: &str) -> Result<(SortValue, String)> {
    let (value, id) = cursor
        .split_once(':')
        .ok_or_else(|| Error::InvalidArgument(format!("malformed cursor '{}'", cursor)))?;
    let value = match resolved.kind {
        SortKind::I64 => value
            .parse::<i64>()
            .map(SortValue::I64)
            .map_err(|_| Error::InvalidArgument(format!("malformed cursor '{}'", cursor)))?,
        SortKind::U64 => value
            .parse::<u64>()
            .map(SortValue::U64)
            .map_err(|_| Error::InvalidArgument(format!("malformed cursor '{}'", cursor)))?,
    };
    Ok((value, id.to_string()))
}

/// Documents strictly after `(value, id)` in sort order: past the sort key,
/// or equal on the sort key with a later id.
fn after_filter(resolved: &ResolvedSort, value: SortValue, id: &str) -> Query {
    let beyond = match resolved.order {
        SortOrder::Descending => Ranges::less_than(value.to_json()),
        SortOrder::Ascending => Ranges::greater_than(value.to_json()),
    };
    let tie = BoolQuery::builder()
        .must(Query::Exact(ExactTerm::with_term(
            resolved.field_name.clone(),
            value.to_string(),
        )))
        .must(Query::Range(RangeQuery::new(
            FIELD_ID.to_string(),
            Ranges::greater_than(serde_json::json!(id)),
        )))
        .build();
    BoolQuery::builder()
        .should(Query::Range(RangeQuery::new(
            resolved.field_name.clone(),
            beyond,
        )))
        .should(tie)
        .build()
}

/// Load stored fields for exactly the returned documents.
fn materialize(searcher: &Searcher, schema: &Schema, addresses: &[DocAddress]) -> Result<Vec<Hit>> {
    let mut hits = Vec::with_capacity(addresses.len());
    for address in addresses {
        let doc = searcher.doc(*address)?;
        let named = schema.to_named_doc(&doc);
        let mut hit = Hit::default();
        for (name, values) in named.0 {
            if name.ends_with(SORT_FIELD_SUFFIX) {
                continue;
            }
            let value = if values.len() == 1 {
                serde_json::to_value(&values[0])?
            } else {
                serde_json::to_value(&values)?
            };
            hit.0.insert(name, value);
        }
        hits.push(hit);
    }
    Ok(hits)
}
