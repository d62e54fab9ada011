//! Chronicle facade: explicit store handle with open/close lifecycle
//!
//! Owns the record store, the optional embedding capability, and the
//! background index worker. `remember` is the single ingestion entry
//! point; every producer (CLI, watchers) routes through it so write
//! serialization is enforced in one place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::embedding::{create_embedder, Embedder};
use crate::error::{ChronicleError, Result};
use crate::index::{spawn_index_worker, verify_index, Indexer, WorkerHandle};
use crate::recall;
use crate::store::queries::{append_record, count_records, get_record, get_stats, scan_records};
use crate::store::Store;
use crate::types::{
    ChronicleConfig, IndexMode, MemoryRecord, RecordFilter, RecordId, SearchOptions,
    SearchResult, StoreStats,
};

/// A handle to one memory store instance
///
/// Cheap to clone; clones share the same store and worker. Instances
/// opened on different paths are fully independent, and sharing one path
/// across processes is a configuration error the caller must avoid.
#[derive(Clone)]
pub struct Chronicle {
    store: Store,
    config: ChronicleConfig,
    embedder: Option<Arc<dyn Embedder>>,
    indexer: Option<Indexer>,
    nudges: async_channel::Sender<RecordId>,
    nudge_rx: Arc<Mutex<Option<async_channel::Receiver<RecordId>>>>,
    worker: Arc<Mutex<Option<WorkerHandle>>>,
}

impl Chronicle {
    /// Open or create a store per the configuration
    pub fn open(config: ChronicleConfig) -> Result<Self> {
        let store = Store::open(
            &config.db_path,
            Duration::from_millis(config.write_lock_timeout_ms),
        )?;
        let embedder = create_embedder(&config.embedding)?;
        let indexer = embedder
            .as_ref()
            .map(|e| Indexer::new(store.clone(), e.clone()));

        let (nudges, nudge_rx) = async_channel::bounded(1024);

        Ok(Self {
            store,
            config,
            embedder,
            indexer,
            nudges,
            nudge_rx: Arc::new(Mutex::new(Some(nudge_rx))),
            worker: Arc::new(Mutex::new(None)),
        })
    }

    /// In-memory instance for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::open(ChronicleConfig::in_memory())
    }

    /// Spawn the background index worker (incremental deployments)
    ///
    /// Must be called from within a tokio runtime. A no-op when no
    /// embedder is configured or a worker is already running.
    pub fn start_index_worker(&self) -> Result<()> {
        let Some(indexer) = self.indexer.clone() else {
            return Ok(());
        };
        if self.config.index_mode != IndexMode::Incremental {
            return Ok(());
        }

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        let receiver = self
            .nudge_rx
            .lock()
            .take()
            .ok_or_else(|| ChronicleError::Config("index worker already consumed".to_string()))?;

        *worker = Some(spawn_index_worker(
            indexer,
            receiver,
            Duration::from_millis(self.config.index_interval_ms),
        ));
        tracing::debug!("index worker started");
        Ok(())
    }

    /// Ingestion gateway: validate, durably append, nudge the indexer
    ///
    /// The record is fully committed before this returns; a crash
    /// afterwards never loses it.
    pub fn remember(
        &self,
        content: &str,
        tags: &[String],
        source: &str,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<RecordId> {
        let record = self
            .store
            .with_write(|conn| append_record(conn, content, tags, source, metadata))?;

        if self.indexer.is_some() && self.config.index_mode == IndexMode::Incremental {
            // best-effort: the worker's fallback tick catches missed nudges
            let _ = self.nudges.try_send(record.id);
        }

        tracing::debug!(id = record.id, source = %record.source, "remembered");
        Ok(record.id)
    }

    /// Fetch a record by id
    pub fn get(&self, id: RecordId) -> Result<MemoryRecord> {
        self.store.with_connection(|conn| get_record(conn, id))
    }

    /// Scan records matching a filter, newest first
    pub fn scan(&self, filter: &RecordFilter) -> Result<Vec<MemoryRecord>> {
        self.store.with_connection(|conn| scan_records(conn, filter))
    }

    /// Most recent records
    pub fn recent(&self, limit: i64) -> Result<Vec<MemoryRecord>> {
        self.scan(&RecordFilter {
            limit: Some(limit),
            ..Default::default()
        })
    }

    /// Total record count
    pub fn count(&self) -> Result<i64> {
        self.store.with_connection(count_records)
    }

    /// Store statistics
    pub fn stats(&self) -> Result<StoreStats> {
        self.store
            .with_connection(|conn| get_stats(conn, self.store.db_path()))
    }

    /// Search by query plus filters; degrades to lexical-only when no
    /// embedding capability is configured
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        if self.config.index_mode == IndexMode::OnDemand {
            if let Some(ref indexer) = self.indexer {
                indexer.ensure_indexed()?;
            }
        }

        self.store.with_connection(|conn| {
            recall::search(conn, self.embedder.as_deref(), query, options)
        })
    }

    /// Run one incremental indexing pass; returns entries written
    pub fn index_pending(&self) -> Result<usize> {
        match self.indexer {
            Some(ref indexer) => indexer.index_pending(),
            None => Ok(0),
        }
    }

    /// Drop and recompute the whole embedding index
    pub fn rebuild_index(&self) -> Result<usize> {
        match self.indexer {
            Some(ref indexer) => indexer.rebuild_all(),
            None => Ok(0),
        }
    }

    /// Check index consistency, rebuilding once on corruption
    pub fn verify_index(&self) -> Result<()> {
        match self.store.with_connection(verify_index) {
            Err(ChronicleError::CorruptIndex(reason)) => {
                tracing::warn!("corrupt embedding index ({}), rebuilding", reason);
                self.rebuild_index()?;
                self.store.with_connection(verify_index)
            }
            other => other,
        }
    }

    /// Stop the worker and checkpoint the store
    ///
    /// Reads and writes through other clones remain valid; call on the
    /// last handle when shutting down.
    pub async fn close(&self) -> Result<()> {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        self.store.checkpoint()
    }

    /// Access the underlying store (read paths, tests)
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Configured embedding capability, if any
    pub fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }
}
