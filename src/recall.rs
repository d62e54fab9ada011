//! Recall engine: the query facade
//!
//! Fans a query out to the lexical scan and (when available) the
//! embedding index, merges the candidate sets, and ranks. Reads only;
//! never writes to the store or the index.

use std::collections::HashMap;

use rusqlite::Connection;

use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::{index_len, nearest};
use crate::store::queries::{get_record, scan_records};
use crate::types::{
    MatchOrigin, MemoryRecord, RecordFilter, RecordId, SearchOptions, SearchResult,
};

/// How many times `limit` to overfetch from the embedding index before
/// filtering. The original behavior is underspecified here; 4 keeps the
/// semantic set large enough to survive tag/time filtering.
pub const OVERFETCH_FACTOR: usize = 4;

/// Fixed score for records found only by the lexical path. Low enough
/// that any accepted semantic match outranks it, so semantic results are
/// preferred when both paths produce candidates, but lexical matches are
/// never dropped.
pub const LEXICAL_MATCH_SCORE: f32 = 0.1;

/// Minimum raw cosine similarity for a semantic candidate
pub const MIN_SEMANTIC_SIMILARITY: f32 = 0.3;

/// Monotonic similarity-to-score mapping: cosine [-1, 1] onto [0, 1]
fn normalize_similarity(cosine: f32) -> f32 {
    (cosine + 1.0) / 2.0
}

fn base_filter(options: &SearchOptions) -> RecordFilter {
    RecordFilter {
        tags: options.tags.clone(),
        content_substring: None,
        since: options.since,
        until: options.until,
        source: options.source.clone(),
        limit: None,
    }
}

/// Does a record pass the non-content predicates of the filter?
fn matches_filter(record: &MemoryRecord, filter: &RecordFilter) -> bool {
    if let Some(since) = filter.since {
        if record.timestamp < since {
            return false;
        }
    }
    if let Some(until) = filter.until {
        if record.timestamp >= until {
            return false;
        }
    }
    if let Some(ref source) = filter.source {
        if &record.source != source {
            return false;
        }
    }
    filter
        .tags
        .iter()
        .all(|t| record.tags.iter().any(|have| have.eq_ignore_ascii_case(t)))
}

/// Search records by query plus optional filters
///
/// An empty query is a pure filter: most recent matching records. With a
/// query, lexical and semantic candidates are unioned by id; a record
/// found by both paths ranks by its semantic score. If no embedder is
/// configured, or embedding the query fails, the call degrades to
/// lexical-only rather than failing.
pub fn search(
    conn: &Connection,
    embedder: Option<&dyn Embedder>,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<SearchResult>> {
    let query = query.trim();
    let mut filter = base_filter(options);
    filter.validate()?;

    if query.is_empty() {
        filter.limit = Some(options.limit);
        let records = scan_records(conn, &filter)?;
        return Ok(records
            .into_iter()
            .map(|record| SearchResult {
                record,
                score: LEXICAL_MATCH_SCORE,
                origin: MatchOrigin::Lexical,
            })
            .collect());
    }

    // Lexical candidates: substring match plus filters
    let lexical_filter = RecordFilter {
        content_substring: Some(query.to_string()),
        ..filter.clone()
    };
    let lexical = scan_records(conn, &lexical_filter)?;

    let mut merged: HashMap<RecordId, SearchResult> = HashMap::new();
    for record in lexical {
        merged.insert(
            record.id,
            SearchResult {
                record,
                score: LEXICAL_MATCH_SCORE,
                origin: MatchOrigin::Lexical,
            },
        );
    }

    // Semantic candidates, when the capability and a non-empty index exist
    if let Some(embedder) = embedder {
        if index_len(conn)? > 0 {
            match embedder.embed(query) {
                Ok(query_vector) => {
                    let k = options.limit.max(0) as usize * OVERFETCH_FACTOR;
                    for (id, cosine) in nearest(conn, &query_vector, k)? {
                        if cosine < MIN_SEMANTIC_SIMILARITY {
                            continue;
                        }
                        let score = normalize_similarity(cosine);
                        if let Some(hit) = merged.get_mut(&id) {
                            hit.score = score;
                            hit.origin = MatchOrigin::Both;
                            continue;
                        }
                        match get_record(conn, id) {
                            Ok(record) => {
                                if matches_filter(&record, &filter) {
                                    merged.insert(
                                        id,
                                        SearchResult {
                                            record,
                                            score,
                                            origin: MatchOrigin::Semantic,
                                        },
                                    );
                                }
                            }
                            Err(e) => {
                                tracing::warn!(record_id = id, "stale index entry: {}", e);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("query embedding failed, lexical-only: {}", e);
                }
            }
        }
    }

    let mut results: Vec<SearchResult> = merged.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.timestamp.cmp(&a.record.timestamp))
            .then_with(|| b.record.id.cmp(&a.record.id))
    });
    results.truncate(options.limit.max(0) as usize);

    Ok(results)
}
