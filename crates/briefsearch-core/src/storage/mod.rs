//! Storage backends for persisting search indexes.
//!
//! # Storage Abstraction
//!
//! [`IndexStore`] is a byte-level key-value store with point get/put/delete,
//! full scan, and a small metadata namespace. The lexical and semantic indexes
//! each own one, so either can be rebuilt, replaced, or fail without touching
//! the other.
//!
//! # Implementations
//!
//! - [`InMemoryStore`] - Ephemeral storage for tests and throwaway indexes
//! - [`RedbStore`] - Native filesystem via redb (feature `redb-store`)

mod index_store;

#[cfg(feature = "redb-store")]
mod redb_store;

pub use index_store::{InMemoryStore, IndexStore, StoreError};

#[cfg(feature = "redb-store")]
pub use redb_store::RedbStore;

/// Database file name of the lexical index inside a data directory.
pub const LEXICAL_DB_FILENAME: &str = "lexical.redb";

/// Database file name of the semantic index inside a data directory.
pub const SEMANTIC_DB_FILENAME: &str = "semantic.redb";
