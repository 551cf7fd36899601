//! In-memory suggestion store (non-persistent).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{StoreError, SuggestionStore};

#[derive(Clone, Default)]
pub struct InMemorySuggestionStore {
    suggestions: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemorySuggestionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SuggestionStore for InMemorySuggestionStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn lookup(&self, sql: &str) -> Result<Option<String>, StoreError> {
        Ok(self.suggestions.read().await.get(sql).cloned())
    }

    async fn store(&self, sql: &str, suggestion: &str) -> Result<(), StoreError> {
        self.suggestions
            .write()
            .await
            .insert(sql.to_string(), suggestion.to_string());
        Ok(())
    }
}
