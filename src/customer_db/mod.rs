//! Read-only access to the customer's database.
//!
//! The model inspects the customer database through diagnostic queries. The
//! runner guarantees it never writes:
//! - the leading keyword must be one of [`READ_ONLY_VERBS`]
//! - only a single statement is accepted
//! - pooled sessions default to read-only transactions

mod postgres;

pub use postgres::PostgresQueryRunner;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Leading keywords accepted for diagnostic queries.
pub const READ_ONLY_VERBS: &[&str] = &["SELECT", "WITH", "EXPLAIN", "SHOW", "VALUES"];

/// One result row as a JSON object keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Only read-only queries are allowed")]
    NotReadOnly,

    #[error("Only a single statement is allowed")]
    MultipleStatements,

    #[error("{0}")]
    Database(String),

    #[error("Customer database is not configured")]
    NotConfigured,
}

/// Runs diagnostic SQL against the customer database.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Execute `sql` and return at most the runner's row cap.
    async fn run(&self, sql: &str) -> Result<Vec<Row>, QueryError>;
}

/// Reject anything whose leading keyword is not a read-only verb, and
/// statement batches.
pub fn ensure_read_only(sql: &str) -> Result<(), QueryError> {
    let first_word = sql
        .split_whitespace()
        .next()
        .map(|w| w.trim_start_matches('(').to_uppercase())
        .ok_or(QueryError::NotReadOnly)?;

    if !READ_ONLY_VERBS.contains(&first_word.as_str()) {
        return Err(QueryError::NotReadOnly);
    }

    // Semicolons inside string literals are rejected too; the model can
    // always rephrase.
    let body = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if body.contains(';') {
        return Err(QueryError::MultipleStatements);
    }
    Ok(())
}

/// Runner used when no customer database is configured.
pub struct UnconfiguredRunner;

#[async_trait]
impl QueryRunner for UnconfiguredRunner {
    async fn run(&self, sql: &str) -> Result<Vec<Row>, QueryError> {
        ensure_read_only(sql)?;
        Err(QueryError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_read_only_verbs_case_insensitively() {
        for sql in [
            "SELECT 1",
            "  select * from orders",
            "with x as (select 1) select * from x",
            "EXPLAIN (ANALYZE, DIST, FORMAT JSON) SELECT 1",
            "show search_path",
            "VALUES (1), (2);",
        ] {
            assert!(ensure_read_only(sql).is_ok(), "{sql}");
        }
    }

    #[test]
    fn rejects_writes() {
        for sql in [
            "DROP TABLE x",
            "delete from orders",
            "UPDATE statements SET ai_suggestion = 'x'",
            "CREATE INDEX ON orders(order_ts)",
            "",
            "   ",
        ] {
            assert!(
                matches!(ensure_read_only(sql), Err(QueryError::NotReadOnly)),
                "{sql}"
            );
        }
    }

    #[test]
    fn rejects_statement_batches() {
        assert!(matches!(
            ensure_read_only("SELECT 1; DROP TABLE x"),
            Err(QueryError::MultipleStatements)
        ));
        assert!(ensure_read_only("SELECT 1;  \n").is_ok());
    }

    #[test]
    fn parenthesised_select_is_accepted() {
        assert!(ensure_read_only("(SELECT 1) UNION (SELECT 2)").is_ok());
    }

    #[tokio::test]
    async fn unconfigured_runner_still_checks_read_only() {
        let runner = UnconfiguredRunner;
        assert!(matches!(
            runner.run("DROP TABLE x").await,
            Err(QueryError::NotReadOnly)
        ));
        assert!(matches!(
            runner.run("SELECT 1").await,
            Err(QueryError::NotConfigured)
        ));
    }
}
