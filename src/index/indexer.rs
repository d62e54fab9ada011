//! Reconciliation between the record store and the embedding index
//!
//! Two modes, both supported:
//! - incremental: embed everything past the persisted high-water mark,
//!   triggered by the background worker or an explicit pass;
//! - on-demand: embed whatever lacks an entry, at query time.
//!
//! Passes are idempotent: upserts never duplicate, and a record whose
//! embedding fails is left below the mark to be retried on the next pass.

use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use rusqlite::params;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::{
    content_hash, get_index_mark, index_len, set_index_mark, upsert_embedding,
};
use crate::embedding::Embedder;
use crate::error::{ChronicleError, Result};
use crate::store::Store;
use crate::types::RecordId;

/// Keeps the embedding index consistent with the record store
#[derive(Clone)]
pub struct Indexer {
    store: Store,
    embedder: Arc<dyn Embedder>,
}

impl Indexer {
    pub fn new(store: Store, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Incremental pass: embed all records past the high-water mark
    ///
    /// Returns the number of entries written. The mark advances through
    /// contiguous successes only, so a failed record is retried next pass;
    /// successes past a failure are still upserted (re-upserting them later
    /// is harmless, the vector is deterministic per model).
    pub fn index_pending(&self) -> Result<usize> {
        let mark = self.store.with_connection(get_index_mark)?;
        let pending = self.fetch_after(mark)?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut indexed = 0;
        let mut contiguous = true;
        for (id, content) in pending {
            match self.embedder.embed(&content) {
                Ok(vector) => {
                    let hash = content_hash(&content);
                    let model = self.embedder.model_name();
                    // one short write lock per upsert; appends are never
                    // blocked for longer than a single vector write
                    self.store.with_write(|conn| {
                        upsert_embedding(conn, id, &vector, model, &hash)?;
                        if contiguous {
                            set_index_mark(conn, id)?;
                        }
                        Ok(())
                    })?;
                    indexed += 1;
                }
                Err(e) => {
                    contiguous = false;
                    tracing::warn!(record_id = id, "embedding failed, will retry: {}", e);
                }
            }
        }

        tracing::debug!(indexed, "incremental index pass complete");
        Ok(indexed)
    }

    /// On-demand pass: embed every record that lacks an index entry
    ///
    /// Used at query time in on-demand deployments. Failures are skipped
    /// per record, never fatal to the pass.
    pub fn ensure_indexed(&self) -> Result<usize> {
        let missing: Vec<(RecordId, String)> = self.store.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT r.id, r.content FROM records r
                 LEFT JOIN embeddings e ON e.record_id = r.id
                 WHERE e.record_id IS NULL
                 ORDER BY r.id",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })?;

        let mut indexed = 0;
        for (id, content) in missing {
            match self.embedder.embed(&content) {
                Ok(vector) => {
                    let hash = content_hash(&content);
                    let model = self.embedder.model_name();
                    self.store
                        .with_write(|conn| upsert_embedding(conn, id, &vector, model, &hash))?;
                    indexed += 1;
                }
                Err(e) => {
                    tracing::warn!(record_id = id, "embedding failed, skipping: {}", e);
                }
            }
        }

        Ok(indexed)
    }

    /// Drop and recompute every entry from the record store
    ///
    /// Recovery path for index corruption or a model change. The mark is
    /// reset before entries are dropped, so a crash mid-rebuild leaves a
    /// state the next incremental pass repairs. Reads interleaved with the
    /// rebuild see old or new entries, never a torn one.
    pub fn rebuild_all(&self) -> Result<usize> {
        self.store.with_write(|conn| {
            set_index_mark(conn, 0)?;
            conn.execute("DELETE FROM embeddings", [])?;
            Ok(())
        })?;
        self.index_pending()
    }

    /// True when the index has at least one entry
    pub fn has_entries(&self) -> Result<bool> {
        Ok(self.store.with_connection(index_len)? > 0)
    }

    fn fetch_after(&self, mark: RecordId) -> Result<Vec<(RecordId, String)>> {
        self.store.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, content FROM records WHERE id > ? ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![mark], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }
}

/// Handle to a spawned background task
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn new(shutdown: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self { shutdown, join }
    }

    /// Cooperative stop: signal, then wait for the loop to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// Background worker running incremental passes
///
/// Woken by nudges from the ingestion gateway, with a periodic fallback
/// tick for anything the nudge channel missed. One pass at a time.
pub struct IndexWorker {
    indexer: Indexer,
    nudges: Receiver<RecordId>,
    tick: Duration,
}

impl IndexWorker {
    pub fn new(indexer: Indexer, nudges: Receiver<RecordId>, tick: Duration) -> Self {
        Self {
            indexer,
            nudges,
            tick,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.tick);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // a dropped sender counts as shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("index worker shutting down");
                        break;
                    }
                }
                nudge = self.nudges.recv() => {
                    if nudge.is_err() {
                        // gateway gone; fall back to the ticker alone
                        break;
                    }
                    // collapse a burst of appends into one pass
                    while self.nudges.try_recv().is_ok() {}
                    self.run_pass();
                }
                _ = ticker.tick() => {
                    self.run_pass();
                }
            }
        }
    }

    fn run_pass(&self) {
        match self.indexer.index_pending() {
            Ok(0) => {}
            Ok(n) => tracing::info!(indexed = n, "embedded new records"),
            Err(ChronicleError::StoreBusy) => {
                tracing::debug!("index pass deferred, store busy");
            }
            Err(e) => tracing::warn!("index pass failed: {}", e),
        }
    }
}

/// Spawn an [`IndexWorker`] on the current tokio runtime
pub fn spawn_index_worker(
    indexer: Indexer,
    nudges: Receiver<RecordId>,
    tick: Duration,
) -> WorkerHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = IndexWorker::new(indexer, nudges, tick);
    let join = tokio::spawn(worker.run(shutdown_rx));
    WorkerHandle::new(shutdown_tx, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::index::{get_embedding, get_index_mark};
    use crate::store::queries::append_record;
    use std::collections::HashMap;

    fn seeded_store(contents: &[&str]) -> Store {
        let store = Store::open_in_memory().unwrap();
        for content in contents {
            store
                .with_write(|conn| append_record(conn, content, &[], "test", &HashMap::new()))
                .unwrap();
        }
        store
    }

    #[test]
    fn incremental_pass_embeds_and_advances_mark() {
        let store = seeded_store(&["one", "two", "three"]);
        let indexer = Indexer::new(store.clone(), Arc::new(HashEmbedder::new(64)));

        let n = indexer.index_pending().unwrap();
        assert_eq!(n, 3);
        assert_eq!(store.with_connection(get_index_mark).unwrap(), 3);

        // nothing left: rerun is a no-op
        assert_eq!(indexer.index_pending().unwrap(), 0);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let store = seeded_store(&["alpha", "beta"]);
        let indexer = Indexer::new(store.clone(), Arc::new(HashEmbedder::new(64)));

        indexer.rebuild_all().unwrap();
        let first: Vec<Option<Vec<f32>>> = (1..=2)
            .map(|id| store.with_connection(|conn| get_embedding(conn, id)).unwrap())
            .collect();

        indexer.rebuild_all().unwrap();
        let second: Vec<Option<Vec<f32>>> = (1..=2)
            .map(|id| store.with_connection(|conn| get_embedding(conn, id)).unwrap())
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn on_demand_fills_gaps_only() {
        let store = seeded_store(&["one", "two"]);
        let indexer = Indexer::new(store.clone(), Arc::new(HashEmbedder::new(64)));

        assert_eq!(indexer.ensure_indexed().unwrap(), 2);
        assert_eq!(indexer.ensure_indexed().unwrap(), 0);
    }
}
