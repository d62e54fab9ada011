//! Database queries for record operations

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;

use crate::error::{ChronicleError, Result};
use crate::types::{MemoryRecord, RecordFilter, RecordId, StoreStats, UNKNOWN_SOURCE};

/// Format a timestamp for storage
///
/// Fixed-width RFC3339 with microsecond precision, so lexicographic
/// comparison in SQL agrees with chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a record from a database row
pub fn record_from_row(row: &Row) -> rusqlite::Result<MemoryRecord> {
    let id: RecordId = row.get("id")?;
    let content: String = row.get("content")?;
    let timestamp: String = row.get("timestamp")?;
    let source: String = row.get("source")?;
    let metadata_str: String = row.get("metadata")?;

    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_str).unwrap_or_default();

    Ok(MemoryRecord {
        id,
        content,
        timestamp: parse_timestamp(&timestamp),
        tags: vec![], // Loaded separately
        source,
        metadata,
    })
}

/// Load tags for a record
pub fn load_tags(conn: &Connection, record_id: RecordId) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT t.name FROM tags t
         JOIN record_tags rt ON t.id = rt.tag_id
         WHERE rt.record_id = ?
         ORDER BY t.name",
    )?;

    let tags: Vec<String> = stmt
        .query_map([record_id], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(tags)
}

/// Ensure a tag exists and return its id
fn ensure_tag(conn: &Connection, tag: &str) -> Result<i64> {
    conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?)", params![tag])?;

    let id: i64 = conn.query_row("SELECT id FROM tags WHERE name = ?", params![tag], |row| {
        row.get(0)
    })?;

    Ok(id)
}

/// Append a new record; call inside a write transaction
///
/// The committed timestamp is clamped against the latest stored one so the
/// sequence is monotonically non-decreasing even if the wall clock steps
/// backwards between appends.
pub fn append_record(
    conn: &Connection,
    content: &str,
    tags: &[String],
    source: &str,
    metadata: &HashMap<String, serde_json::Value>,
) -> Result<MemoryRecord> {
    let content = content.trim();
    if content.is_empty() {
        return Err(ChronicleError::Validation(
            "record content must not be empty".to_string(),
        ));
    }

    let source = if source.trim().is_empty() {
        UNKNOWN_SOURCE
    } else {
        source.trim()
    };

    let mut now = Utc::now();
    let last: Option<String> = conn
        .query_row("SELECT MAX(timestamp) FROM records", [], |row| row.get(0))
        .unwrap_or(None);
    if let Some(last) = last.as_deref().map(parse_timestamp) {
        if last > now {
            now = last;
        }
    }
    let now_str = format_timestamp(now);

    let metadata_json = serde_json::to_string(metadata)?;

    conn.execute(
        "INSERT INTO records (content, timestamp, source, metadata)
         VALUES (?, ?, ?, ?)",
        params![content, now_str, source, metadata_json],
    )?;

    let id = conn.last_insert_rowid();

    let mut seen: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || seen.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            continue;
        }
        seen.push(tag.to_string());
        let tag_id = ensure_tag(conn, tag)?;
        conn.execute(
            "INSERT OR IGNORE INTO record_tags (record_id, tag_id) VALUES (?, ?)",
            params![id, tag_id],
        )?;
    }

    get_record(conn, id)
}

/// Get a record by id
pub fn get_record(conn: &Connection, id: RecordId) -> Result<MemoryRecord> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, content, timestamp, source, metadata FROM records WHERE id = ?",
    )?;

    let mut record = stmt
        .query_row(params![id], record_from_row)
        .map_err(|_| ChronicleError::NotFound(id))?;

    record.tags = load_tags(conn, id)?;
    Ok(record)
}

/// Scan records matching a filter, newest first
pub fn scan_records(conn: &Connection, filter: &RecordFilter) -> Result<Vec<MemoryRecord>> {
    filter.validate()?;

    let mut sql = String::from(
        "SELECT r.id, r.content, r.timestamp, r.source, r.metadata
         FROM records r
         WHERE 1=1",
    );
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref needle) = filter.content_substring {
        sql.push_str(" AND instr(lower(r.content), lower(?)) > 0");
        params.push(Box::new(needle.clone()));
    }

    if let Some(since) = filter.since {
        sql.push_str(" AND r.timestamp >= ?");
        params.push(Box::new(format_timestamp(since)));
    }

    if let Some(until) = filter.until {
        sql.push_str(" AND r.timestamp < ?");
        params.push(Box::new(format_timestamp(until)));
    }

    if let Some(ref source) = filter.source {
        sql.push_str(" AND r.source = ?");
        params.push(Box::new(source.clone()));
    }

    // AND semantics: every requested tag must be present
    for tag in &filter.tags {
        sql.push_str(
            " AND EXISTS (
                SELECT 1 FROM record_tags rt
                JOIN tags t ON rt.tag_id = t.id
                WHERE rt.record_id = r.id AND t.name = ?
            )",
        );
        params.push(Box::new(tag.clone()));
    }

    sql.push_str(" ORDER BY r.timestamp DESC, r.id DESC");

    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        params.push(Box::new(limit));
    }

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();

    let mut records: Vec<MemoryRecord> = stmt
        .query_map(param_refs.as_slice(), record_from_row)?
        .filter_map(|r| r.ok())
        .collect();

    for record in &mut records {
        record.tags = load_tags(conn, record.id)?;
    }

    Ok(records)
}

/// Total number of records
pub fn count_records(conn: &Connection) -> Result<i64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
    Ok(n)
}

/// Store statistics
pub fn get_stats(conn: &Connection, db_path: &str) -> Result<StoreStats> {
    let total_records = count_records(conn)?;
    let total_tags: i64 = conn.query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))?;
    let records_with_embeddings: i64 =
        conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;

    let mut sources = HashMap::new();
    let mut stmt = conn.prepare("SELECT source, COUNT(*) FROM records GROUP BY source")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (source, count) = row?;
        sources.insert(source, count);
    }

    let db_size_bytes: i64 = conn.query_row(
        "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        [],
        |row| row.get(0),
    )?;

    Ok(StoreStats {
        total_records,
        total_tags,
        records_with_embeddings,
        records_pending_embedding: total_records - records_with_embeddings,
        sources,
        db_size_bytes,
        db_path: db_path.to_string(),
    })
}
