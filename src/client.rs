//! The SQL surface the resources need, and its `mysql_async` implementation.

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Opts, Pool, Row, Value};
use tracing::debug;

use crate::error::ProviderError;

/// A handle able to run the provider's statements.
///
/// Rows come back as text columns; `NULL` becomes an empty string.
#[async_trait]
pub trait SqlClient: Send + Sync + 'static {
    /// Execute a statement that returns no rows.
    async fn exec(&self, sql: &str) -> Result<(), ProviderError>;

    /// Run a query and return its first row, if any.
    async fn query_row(
        &self,
        sql: &str,
        params: Vec<String>,
    ) -> Result<Option<Vec<String>>, ProviderError>;

    /// Check that the server is reachable.
    async fn ping(&self) -> Result<(), ProviderError>;

    /// Release all connections.
    async fn close(&self) -> Result<(), ProviderError>;
}

/// [`SqlClient`] over a `mysql_async` connection pool.
#[derive(Debug, Clone)]
pub struct MySqlClient {
    pool: Pool,
}

impl MySqlClient {
    /// Create a pool; no connection is opened until first use.
    pub fn new(opts: Opts) -> Self {
        Self {
            pool: Pool::new(opts),
        }
    }
}

#[async_trait]
impl SqlClient for MySqlClient {
    async fn exec(&self, sql: &str) -> Result<(), ProviderError> {
        debug!(statement = sql, "Executing statement");
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(sql).await?;
        Ok(())
    }

    async fn query_row(
        &self,
        sql: &str,
        params: Vec<String>,
    ) -> Result<Option<Vec<String>>, ProviderError> {
        debug!(statement = sql, ?params, "Executing query");
        let mut conn = self.pool.get_conn().await?;
        let row: Option<Row> = if params.is_empty() {
            conn.query_first(sql).await?
        } else {
            conn.exec_first(sql, params).await?
        };
        Ok(row.map(|row| row_to_strings(&row)))
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        let mut conn = self.pool.get_conn().await?;
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.pool.clone().disconnect().await?;
        Ok(())
    }
}

fn row_to_strings(row: &Row) -> Vec<String> {
    (0..row.len())
        .map(|i| row.as_ref(i).map(value_to_string).unwrap_or_default())
        .collect()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::NULL => String::new(),
        Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Value::Int(n) => n.to_string(),
        Value::UInt(n) => n.to_string(),
        Value::Float(n) => n.to_string(),
        Value::Double(n) => n.to_string(),
        other => other.as_sql(true),
    }
}
