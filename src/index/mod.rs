//! Derived embedding index
//!
//! Maps record ids to fixed-length vectors in the `embeddings` table.
//! Strictly a cache over the record store: any entry can be dropped and
//! recomputed from `records` plus the embedder, and nothing here is ever
//! treated as authoritative.

mod indexer;

pub use indexer::{spawn_index_worker, IndexWorker, Indexer, WorkerHandle};

use chrono::Utc;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};

use crate::error::{ChronicleError, Result};
use crate::store::queries::format_timestamp;
use crate::types::RecordId;

/// Hash of the content a vector was computed from
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(bytes: &[u8], dimensions: usize) -> Result<Vec<f32>> {
    let expected = dimensions
        .checked_mul(4)
        .ok_or_else(|| ChronicleError::CorruptIndex("dimensions overflow".to_string()))?;
    if bytes.len() != expected {
        return Err(ChronicleError::CorruptIndex(format!(
            "embedding blob is {} bytes, expected {} for {} dimensions",
            bytes.len(),
            expected,
            dimensions
        )));
    }

    let mut vector = Vec::with_capacity(dimensions);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = chunk.try_into().expect("chunks_exact yields 4-byte chunks");
        vector.push(f32::from_le_bytes(arr));
    }
    Ok(vector)
}

/// Insert or refresh the entry for a record
pub fn upsert_embedding(
    conn: &Connection,
    record_id: RecordId,
    vector: &[f32],
    model: &str,
    hash: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO embeddings
            (record_id, embedding, model, dimensions, content_hash, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            record_id,
            vector_to_blob(vector),
            model,
            vector.len(),
            hash,
            format_timestamp(Utc::now()),
        ],
    )?;
    Ok(())
}

/// Remove the entry for a record, if any
pub fn remove_embedding(conn: &Connection, record_id: RecordId) -> Result<()> {
    conn.execute(
        "DELETE FROM embeddings WHERE record_id = ?",
        params![record_id],
    )?;
    Ok(())
}

/// Fetch the stored vector for a record
pub fn get_embedding(conn: &Connection, record_id: RecordId) -> Result<Option<Vec<f32>>> {
    let row = conn.query_row(
        "SELECT embedding, dimensions FROM embeddings WHERE record_id = ?",
        params![record_id],
        |row| {
            let bytes: Vec<u8> = row.get(0)?;
            let dimensions: usize = row.get(1)?;
            Ok((bytes, dimensions))
        },
    );

    match row {
        Ok((bytes, dimensions)) => Ok(Some(blob_to_vector(&bytes, dimensions)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Number of index entries
pub fn index_len(conn: &Connection) -> Result<i64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
    Ok(n)
}

/// Nearest-neighbor query by cosine similarity
///
/// Returns up to `k` `(record_id, score)` pairs, best first; ties broken
/// by more recent record. Entries that fail to decode are skipped (the
/// consistency check in `verify` reports them; `rebuild_all` repairs).
pub fn nearest(conn: &Connection, query: &[f32], k: usize) -> Result<Vec<(RecordId, f32)>> {
    use crate::embedding::cosine_similarity;

    let mut stmt = conn.prepare_cached(
        "SELECT e.record_id, e.embedding, e.dimensions, r.timestamp
         FROM embeddings e
         JOIN records r ON r.id = e.record_id",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, RecordId>(0)?,
            row.get::<_, Vec<u8>>(1)?,
            row.get::<_, usize>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut scored: Vec<(RecordId, f32, String)> = Vec::new();
    for row in rows {
        let (id, bytes, dimensions, timestamp) = row?;
        match blob_to_vector(&bytes, dimensions) {
            Ok(vector) => {
                scored.push((id, cosine_similarity(query, &vector), timestamp));
            }
            Err(e) => {
                tracing::warn!(record_id = id, "skipping undecodable index entry: {}", e);
            }
        }
    }

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.2.cmp(&a.2))
            .then_with(|| b.0.cmp(&a.0))
    });
    scored.truncate(k);

    Ok(scored.into_iter().map(|(id, score, _)| (id, score)).collect())
}

/// Internal consistency check
///
/// Fails with `CorruptIndex` on orphaned entries, blob/dimension
/// mismatches, or mixed models. Recovery is `rebuild_all`; the record
/// store is never affected.
pub fn verify_index(conn: &Connection) -> Result<()> {
    let orphans: i64 = conn.query_row(
        "SELECT COUNT(*) FROM embeddings e
         LEFT JOIN records r ON r.id = e.record_id
         WHERE r.id IS NULL",
        [],
        |row| row.get(0),
    )?;
    if orphans > 0 {
        return Err(ChronicleError::CorruptIndex(format!(
            "{} entries reference missing records",
            orphans
        )));
    }

    let malformed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM embeddings WHERE length(embedding) != dimensions * 4",
        [],
        |row| row.get(0),
    )?;
    if malformed > 0 {
        return Err(ChronicleError::CorruptIndex(format!(
            "{} entries have a blob length that disagrees with their dimensions",
            malformed
        )));
    }

    let models: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT model || '/' || dimensions) FROM embeddings",
        [],
        |row| row.get(0),
    )?;
    if models > 1 {
        return Err(ChronicleError::CorruptIndex(
            "entries were produced by more than one model".to_string(),
        ));
    }

    Ok(())
}

/// Read the incremental indexer's persisted high-water mark
pub fn get_index_mark(conn: &Connection) -> Result<RecordId> {
    let mark: RecordId = conn.query_row(
        "SELECT last_indexed_id FROM index_state WHERE id = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(mark)
}

/// Persist the incremental indexer's high-water mark
pub fn set_index_mark(conn: &Connection, mark: RecordId) -> Result<()> {
    conn.execute(
        "UPDATE index_state SET last_indexed_id = ? WHERE id = 1",
        params![mark],
    )?;
    Ok(())
}
