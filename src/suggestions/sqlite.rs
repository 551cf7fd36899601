//! SQLite-backed suggestion store.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{StoreError, SuggestionStore};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS statements (
    sql_text TEXT PRIMARY KEY NOT NULL,
    ai_suggestion TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const UPSERT_SQL: &str = "INSERT INTO statements (sql_text, ai_suggestion, updated_at)
     VALUES (?1, ?2, ?3)
     ON CONFLICT(sql_text) DO UPDATE SET
         ai_suggestion = excluded.ai_suggestion,
         updated_at = excluded.updated_at";

pub struct SqliteSuggestionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSuggestionStore {
    /// Open (or create) the cache database at `db_path`.
    pub async fn open(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Open(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| StoreError::Open(format!("{}: {}", db_path.display(), e)))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| StoreError::Open(format!("Failed to run schema: {}", e)))?;
            tracing::info!(path = %db_path.display(), "Suggestion store opened");
            Ok::<_, StoreError>(conn)
        })
        .await
        .map_err(|e| StoreError::Open(format!("Task join error: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl SuggestionStore for SqliteSuggestionStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn lookup(&self, sql: &str) -> Result<Option<String>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let suggestion = conn
                .query_row(
                    "SELECT ai_suggestion FROM statements WHERE sql_text = ?1",
                    params![sql],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok::<_, StoreError>(suggestion)
        })
        .await
        .map_err(|e| StoreError::Query(format!("Task join error: {}", e)))?
    }

    async fn store(&self, sql: &str, suggestion: &str) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let suggestion = suggestion.to_string();
        let now = Utc::now().to_rfc3339();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(UPSERT_SQL, params![sql, suggestion, now])?;
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Query(format!("Task join error: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn upsert_overwrites_and_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("suggestions.db");

        let store = SqliteSuggestionStore::open(path.clone()).await.unwrap();
        assert!(store.is_persistent());
        store.store("SELECT * FROM t", "add an index").await.unwrap();
        store.store("SELECT * FROM t", "use a covering index").await.unwrap();
        drop(store);

        let reopened = SqliteSuggestionStore::open(path).await.unwrap();
        assert_eq!(
            reopened.lookup("SELECT * FROM t").await.unwrap().as_deref(),
            Some("use a covering index")
        );
        assert_eq!(reopened.lookup("SELECT * FROM u").await.unwrap(), None);
    }

    #[tokio::test]
    async fn quotes_in_sql_and_suggestion_are_stored_verbatim() {
        let dir = TempDir::new().unwrap();
        let store = SqliteSuggestionStore::open(dir.path().join("s.db"))
            .await
            .unwrap();
        let sql = "SELECT * FROM users WHERE name = 'O''Brien'";
        let suggestion = "Index `users(name)`; it's selective'); DROP TABLE statements; --";
        store.store(sql, suggestion).await.unwrap();
        assert_eq!(store.lookup(sql).await.unwrap().as_deref(), Some(suggestion));
    }
}
