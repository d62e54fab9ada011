//! Record store: durable SQLite-backed table of memory records
//!
//! The store owns the canonical data. The embedding index is a derived
//! cache that can always be rebuilt from here.

mod connection;
pub mod migrations;
pub mod queries;

pub use connection::Store;
