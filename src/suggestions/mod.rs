//! Durable suggestion cache.
//!
//! Every completed analysis is persisted keyed by the exact SQL text of the
//! analyzed statement. Later batches look statements up here so a hint the
//! model already produced is fed back into the next analysis.

mod memory;
mod sqlite;

pub use memory::InMemorySuggestionStore;
pub use sqlite::SqliteSuggestionStore;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open suggestion store: {0}")]
    Open(String),

    #[error("Suggestion store query failed: {0}")]
    Query(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}

/// Suggestion cache backend.
#[async_trait]
pub trait SuggestionStore: Send + Sync {
    /// Whether suggestions survive a restart.
    fn is_persistent(&self) -> bool;

    /// Cached suggestion for this exact SQL text, if any.
    async fn lookup(&self, sql: &str) -> Result<Option<String>, StoreError>;

    /// Insert or replace the suggestion for `sql`.
    async fn store(&self, sql: &str, suggestion: &str) -> Result<(), StoreError>;
}

/// Suggestion store type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SuggestionStoreType {
    Memory,
    #[default]
    Sqlite,
}

impl SuggestionStoreType {
    /// Parse from environment variable value.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "memory" => Self::Memory,
            "sqlite" | "db" => Self::Sqlite,
            _ => Self::default(),
        }
    }
}

/// Create a suggestion store based on type and configuration.
pub async fn create_suggestion_store(
    store_type: SuggestionStoreType,
    db_path: PathBuf,
) -> Result<Arc<dyn SuggestionStore>, StoreError> {
    match store_type {
        SuggestionStoreType::Memory => Ok(Arc::new(InMemorySuggestionStore::new())),
        SuggestionStoreType::Sqlite => {
            let store = SqliteSuggestionStore::open(db_path).await?;
            Ok(Arc::new(store))
        }
    }
}
