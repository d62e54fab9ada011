//! Chronicle - personal memory store
//!
//! Persists discrete memory records and recalls them later by keyword,
//! tag, time range, or semantic similarity over pluggable embeddings.

pub mod chronicle;
pub mod embedding;
pub mod error;
pub mod index;
pub mod recall;
pub mod store;
pub mod types;
pub mod watch;

pub use chronicle::Chronicle;
pub use error::{ChronicleError, Result};
pub use store::Store;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
