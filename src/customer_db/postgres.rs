//! Postgres/Yugabyte (YSQL) query runner.

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo};

use super::{ensure_read_only, QueryError, QueryRunner, Row};

const USER_SCHEMAS_SQL: &str = r#"
SELECT schema_name::text
FROM information_schema.schemata
WHERE schema_name NOT IN ('information_schema', 'pg_catalog')
  AND schema_name NOT LIKE 'pg_toast%'
  AND schema_name NOT LIKE 'pg_temp%'
ORDER BY schema_name
"#;

pub struct PostgresQueryRunner {
    pool: PgPool,
    max_rows: usize,
}

impl PostgresQueryRunner {
    /// Create a lazily-connecting runner. Every pooled session is made
    /// read-only and gets a `search_path` covering all user schemas.
    pub fn connect_lazy(database_url: &str, max_rows: usize) -> Result<Self, QueryError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY")
                        .execute(&mut *conn)
                        .await?;
                    let schemas: Vec<String> = sqlx::query_scalar(USER_SCHEMAS_SQL)
                        .fetch_all(&mut *conn)
                        .await?;
                    if let Some(statement) = search_path_statement(&schemas) {
                        sqlx::query(&statement).execute(&mut *conn).await?;
                    }
                    Ok(())
                })
            })
            .connect_lazy(database_url)
            .map_err(|e| QueryError::Database(e.to_string()))?;

        Ok(Self { pool, max_rows })
    }
}

#[async_trait]
impl QueryRunner for PostgresQueryRunner {
    async fn run(&self, sql: &str) -> Result<Vec<Row>, QueryError> {
        ensure_read_only(sql)?;
        tracing::info!(sql, "Running query on customer database");

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| QueryError::Database(e.to_string()))?;

        // Simple-query protocol: values arrive in text format, and EXPLAIN /
        // SHOW behave exactly as they do in psql.
        let mut stream = sqlx::raw_sql(sql).fetch(&mut *conn);
        let mut rows = Vec::new();
        while rows.len() < self.max_rows {
            match stream.try_next().await {
                Ok(Some(row)) => rows.push(row_to_json(&row)),
                Ok(None) => break,
                Err(e) => return Err(QueryError::Database(e.to_string())),
            }
        }
        Ok(rows)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn search_path_statement(schemas: &[String]) -> Option<String> {
    if schemas.is_empty() {
        return None;
    }
    let mut path: Vec<String> = schemas.iter().map(|s| quote_ident(s)).collect();
    if !schemas.iter().any(|s| s == "public") {
        path.push(quote_ident("public"));
    }
    Some(format!("SET search_path TO {}", path.join(", ")))
}

fn row_to_json(row: &PgRow) -> Row {
    let mut out = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        // Simple-query results are text-encoded whatever the column type.
        let value = match row.try_get_unchecked::<Option<String>, _>(idx) {
            Ok(Some(text)) => text_to_json(column.type_info().name(), &text),
            Ok(None) => Value::Null,
            Err(_) => Value::String("<unreadable>".to_string()),
        };
        out.insert(column.name().to_string(), value);
    }
    out
}

/// Convert a text-format Postgres value into the closest JSON type.
fn text_to_json(type_name: &str, text: &str) -> Value {
    match type_name {
        "INT2" | "INT4" | "INT8" | "OID" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string())),
        "BOOL" => match text {
            "t" | "true" => Value::Bool(true),
            "f" | "false" => Value::Bool(false),
            other => Value::String(other.to_string()),
        },
        "JSON" | "JSONB" => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        }
        _ => Value::String(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_path_quotes_and_appends_public() {
        let stmt = search_path_statement(&["sales".to_string(), "odd\"name".to_string()]).unwrap();
        assert_eq!(stmt, r#"SET search_path TO "sales", "odd""name", "public""#);
    }

    #[test]
    fn search_path_does_not_duplicate_public() {
        let stmt = search_path_statement(&["public".to_string()]).unwrap();
        assert_eq!(stmt, r#"SET search_path TO "public""#);
        assert!(search_path_statement(&[]).is_none());
    }

    #[test]
    fn text_values_map_to_json_types() {
        assert_eq!(text_to_json("INT8", "42"), Value::from(42));
        assert_eq!(text_to_json("FLOAT8", "1.5"), Value::from(1.5));
        assert_eq!(text_to_json("BOOL", "t"), Value::Bool(true));
        assert_eq!(
            text_to_json("JSONB", r#"{"Plan": {}}"#),
            serde_json::json!({"Plan": {}})
        );
        assert_eq!(text_to_json("TEXT", "Seq Scan"), Value::from("Seq Scan"));
        assert_eq!(text_to_json("NUMERIC", "NaN"), Value::from("NaN"));
    }

    #[tokio::test]
    async fn rejects_writes_before_touching_the_pool() {
        let runner =
            PostgresQueryRunner::connect_lazy("postgres://nobody@127.0.0.1:1/none", 10).unwrap();
        assert!(matches!(
            runner.run("DROP TABLE x").await,
            Err(QueryError::NotReadOnly)
        ));
    }
}
