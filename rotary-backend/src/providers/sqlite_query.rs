//! SQLite query backend for the database extension
//!
//! Each call opens the target database, runs one statement on a blocking
//! thread and returns the rows as JSON objects keyed by column name.
//! Statements that write are refused unless the instance sets `allow_write=true`.

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags};
use serde_json::{json, Map, Value};

use super::{ProviderBackend, ProviderContext, ProviderError};

/// Rows returned per query unless the request asks for fewer
const MAX_ROWS: usize = 1000;

pub struct SqliteQueryProvider;

impl SqliteQueryProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqliteQueryProvider {
    fn default() -> Self {
        Self::new()
    }
}

struct QueryJob {
    path: String,
    sql: String,
    params: Vec<SqlValue>,
    allow_write: bool,
    limit: usize,
}

fn json_to_sql(value: &Value) -> Result<SqlValue, ProviderError> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => {
            return Err(ProviderError::InvalidRequest(format!(
                "unsupported parameter type: {}",
                other
            )))
        }
    })
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

fn map_sqlite_error(err: rusqlite::Error) -> ProviderError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) =>
        {
            ProviderError::Transient(err.to_string())
        }
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::CannotOpen => {
            ProviderError::NotConfigured(err.to_string())
        }
        _ => ProviderError::InvalidRequest(err.to_string()),
    }
}

fn run_query(job: QueryJob) -> Result<Value, ProviderError> {
    let flags = if job.allow_write {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let conn = Connection::open_with_flags(&job.path, flags).map_err(map_sqlite_error)?;

    let mut stmt = conn.prepare(&job.sql).map_err(map_sqlite_error)?;
    if !stmt.readonly() && !job.allow_write {
        return Err(ProviderError::InvalidRequest(
            "write statements require the 'allow_write' setting".to_string(),
        ));
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    if columns.is_empty() {
        let affected = stmt
            .execute(rusqlite::params_from_iter(job.params.iter()))
            .map_err(map_sqlite_error)?;
        return Ok(json!({ "columns": [], "rows": [], "rows_affected": affected }));
    }

    let mut rows = stmt
        .query(rusqlite::params_from_iter(job.params.iter()))
        .map_err(map_sqlite_error)?;
    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next().map_err(map_sqlite_error)? {
        if out.len() >= job.limit {
            truncated = true;
            break;
        }
        let mut obj = Map::new();
        for (idx, name) in columns.iter().enumerate() {
            let value = row.get_ref(idx).map_err(map_sqlite_error)?;
            obj.insert(name.clone(), sql_to_json(value));
        }
        out.push(Value::Object(obj));
    }

    Ok(json!({
        "columns": columns,
        "row_count": out.len(),
        "rows": out,
        "truncated": truncated,
    }))
}

#[async_trait]
impl ProviderBackend for SqliteQueryProvider {
    fn name(&self) -> &str {
        "SQLite"
    }

    fn abilities(&self) -> Vec<(&'static str, &'static str)> {
        vec![("database", "execute_sql")]
    }

    async fn execute(&self, ctx: &ProviderContext, request: &Value) -> Result<Value, ProviderError> {
        if ctx.ability != "execute_sql" {
            return Err(ProviderError::InvalidRequest(format!("SQLite cannot serve '{}'", ctx.ability)));
        }

        let sql = request
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidRequest("'query' is required".to_string()))?
            .to_string();

        let params = match request.get("params") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().map(json_to_sql).collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(ProviderError::InvalidRequest("'params' must be an array".to_string())),
        };

        let path = ctx
            .setting("database_path")
            .map(|s| s.to_string())
            .or_else(|| ctx.instance.model_name.clone().filter(|s| !s.is_empty()))
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!("instance '{}' has no database_path", ctx.instance.name))
            })?;

        let limit = request
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| (l as usize).min(MAX_ROWS))
            .unwrap_or(MAX_ROWS);

        let job = QueryJob {
            path,
            sql,
            params,
            allow_write: ctx.setting("allow_write").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false),
            limit,
        };

        tokio::task::spawn_blocking(move || run_query(job))
            .await
            .map_err(|e| ProviderError::Transient(format!("query task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_context;

    fn seeded_db() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db").to_str().unwrap().to_string();
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT, price REAL);
             INSERT INTO items (label, price) VALUES ('apple', 1.5), ('pear', 2.0), ('plum', NULL);",
        )
        .unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_select_returns_rows_as_objects() {
        let (_dir, path) = seeded_db();
        let ctx = test_context("database", "execute_sql", None, &[("database_path", path.as_str())]);

        let result = SqliteQueryProvider::new()
            .execute(&ctx, &json!({ "query": "SELECT label, price FROM items WHERE price > ?1 ORDER BY id", "params": [1] }))
            .await
            .unwrap();

        assert_eq!(result["row_count"], 2);
        assert_eq!(result["rows"][0]["label"], "apple");
        assert_eq!(result["rows"][1]["price"], 2.0);
        assert_eq!(result["columns"], json!(["label", "price"]));
    }

    #[tokio::test]
    async fn test_limit_truncates() {
        let (_dir, path) = seeded_db();
        let ctx = test_context("database", "execute_sql", None, &[("database_path", path.as_str())]);

        let result = SqliteQueryProvider::new()
            .execute(&ctx, &json!({ "query": "SELECT * FROM items", "limit": 1 }))
            .await
            .unwrap();

        assert_eq!(result["row_count"], 1);
        assert_eq!(result["truncated"], true);
        assert!(result["rows"][0]["price"].is_number());
    }

    #[tokio::test]
    async fn test_write_requires_allow_write() {
        let (_dir, path) = seeded_db();
        let provider = SqliteQueryProvider::new();
        let request = json!({ "query": "DELETE FROM items WHERE label = ?1", "params": ["plum"] });

        let ctx = test_context("database", "execute_sql", None, &[("database_path", path.as_str())]);
        let err = provider.execute(&ctx, &request).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));

        let ctx = test_context(
            "database",
            "execute_sql",
            None,
            &[("database_path", path.as_str()), ("allow_write", "true")],
        );
        let result = provider.execute(&ctx, &request).await.unwrap();
        assert_eq!(result["rows_affected"], 1);
    }

    #[tokio::test]
    async fn test_model_name_is_path_fallback() {
        let (_dir, path) = seeded_db();
        let mut ctx = test_context("database", "execute_sql", None, &[]);
        ctx.instance.model_name = Some(path);

        let result = SqliteQueryProvider::new()
            .execute(&ctx, &json!({ "query": "SELECT COUNT(*) AS n FROM items" }))
            .await
            .unwrap();
        assert_eq!(result["rows"][0]["n"], 3);
    }

    #[tokio::test]
    async fn test_missing_path_is_not_configured() {
        let ctx = test_context("database", "execute_sql", None, &[]);
        let err = SqliteQueryProvider::new()
            .execute(&ctx, &json!({ "query": "SELECT 1" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_bad_sql_does_not_fail_over() {
        let (_dir, path) = seeded_db();
        let ctx = test_context("database", "execute_sql", None, &[("database_path", path.as_str())]);
        let err = SqliteQueryProvider::new()
            .execute(&ctx, &json!({ "query": "SELEC nonsense" }))
            .await
            .unwrap_err();
        assert!(!err.should_failover());
    }
}
