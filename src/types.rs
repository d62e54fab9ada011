//! Core types for Chronicle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a memory record
pub type RecordId = i64;

/// Sentinel source for records whose provenance is unknown
pub const UNKNOWN_SOURCE: &str = "unknown";

/// A memory record, the sole persisted entity
///
/// Records are immutable once committed: there is no update path, and
/// "editing" a memory means appending a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier, monotonically assigned by the store
    pub id: RecordId,
    /// Text body, never empty
    pub content: String,
    /// Creation instant, assigned by the store at commit time
    pub timestamp: DateTime<Utc>,
    /// Tags for exact-match filtering; unordered, may be empty
    #[serde(default)]
    pub tags: Vec<String>,
    /// Provenance (which producer created the record)
    #[serde(default = "default_source")]
    pub source: String,
    /// Open metadata mapping; not indexed, retrievable only by id
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_source() -> String {
    UNKNOWN_SOURCE.to_string()
}

/// Filter predicate for `scan`
///
/// All supplied predicates are ANDed. An empty filter matches every record.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Record matches iff every requested tag is present in its tag set
    pub tags: Vec<String>,
    /// Case-insensitive substring match against content
    pub content_substring: Option<String>,
    /// Inclusive lower timestamp bound
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper timestamp bound
    pub until: Option<DateTime<Utc>>,
    /// Source equality
    pub source: Option<String>,
    /// Maximum number of records to return
    pub limit: Option<i64>,
}

impl RecordFilter {
    /// Reject malformed bounds before touching the store
    pub fn validate(&self) -> crate::error::Result<()> {
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since >= until {
                return Err(crate::error::ChronicleError::Validation(format!(
                    "empty time range: since {} >= until {}",
                    since, until
                )));
            }
        }
        Ok(())
    }
}

/// Options for `search`
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub tags: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub limit: i64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            since: None,
            until: None,
            source: None,
            limit: 10,
        }
    }
}

/// Which retrieval path produced a search result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOrigin {
    /// Substring match only
    Lexical,
    /// Embedding similarity only
    Semantic,
    /// Found by both paths (ranked by the semantic score)
    Both,
}

/// Search result with ranking metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub record: MemoryRecord,
    /// Combined relevance score, higher = more relevant
    pub score: f32,
    pub origin: MatchOrigin,
}

/// Statistics about a store instance
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub total_records: i64,
    pub total_tags: i64,
    pub records_with_embeddings: i64,
    pub records_pending_embedding: i64,
    pub sources: HashMap<String, i64>,
    pub db_size_bytes: i64,
    pub db_path: String,
}

/// When embeddings for new records are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IndexMode {
    /// Missing entries are embedded at query time, before ranking
    OnDemand,
    /// A background or explicitly triggered pass embeds records past the
    /// persisted high-water mark
    #[default]
    Incremental,
}

/// Configuration for a Chronicle instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChronicleConfig {
    /// Path to the SQLite store, or ":memory:"
    pub db_path: String,
    /// How long `remember` waits on the write lock before `StoreBusy`
    #[serde(default = "default_write_lock_timeout")]
    pub write_lock_timeout_ms: u64,
    /// Indexing lifecycle for new records
    #[serde(default)]
    pub index_mode: IndexMode,
    /// Fallback interval for the background index worker
    #[serde(default = "default_index_interval")]
    pub index_interval_ms: u64,
    /// Embedding model capability
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

fn default_write_lock_timeout() -> u64 {
    5_000
}

fn default_index_interval() -> u64 {
    5_000
}

impl ChronicleConfig {
    /// Configuration for an on-disk store at `db_path` with defaults
    pub fn at_path(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            write_lock_timeout_ms: default_write_lock_timeout(),
            index_mode: IndexMode::default(),
            index_interval_ms: default_index_interval(),
            embedding: EmbeddingConfig::default(),
        }
    }

    /// In-memory configuration for tests
    pub fn in_memory() -> Self {
        Self::at_path(":memory:")
    }
}

/// Embedding model configuration
///
/// `model` selects the capability: `"hash"` for the built-in hashing
/// TF-IDF embedder, `"none"` for lexical-only operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Output vector length (must match the model)
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "hash".to_string(),
            dimensions: 384,
        }
    }
}

impl EmbeddingConfig {
    /// Lexical-only configuration (no embedding capability)
    pub fn none() -> Self {
        Self {
            model: "none".to_string(),
            dimensions: 0,
        }
    }
}
