//! Client facade over the embedded engine.

use std::sync::Arc;

use duckdb::{params_from_iter, Connection};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::OpenOptions;
use crate::engine::{Engine, EngineConnector, EnginePool, FileLocation};
use crate::error::{ClientError, QueryError};
use crate::ingest::{Ingestor, Source, SourceMap};
use crate::query::{QueryResult, QueryStream, StreamSettings};
use crate::sql::{infer_sql_type, quote_ident, SqlQuery};
use crate::types::{describe_field, values_to_engine, TableField};
use crate::value::{row_into, FromRow, Row, Value};

/// A table or view visible in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    /// `BASE TABLE`, `VIEW` or `LOCAL TEMPORARY`.
    #[serde(rename = "type")]
    pub table_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStats {
    pub row_count: u64,
}

/// Handle to one opened database.
///
/// Clones share the same engine and pool. After [`DuckDbClient::close`],
/// every operation on any clone fails with [`ClientError::Closed`].
#[derive(Clone)]
pub struct DuckDbClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    engine: Arc<Engine>,
    pool: Arc<EnginePool>,
    options: OpenOptions,
}

impl DuckDbClient {
    /// Open the engine and ingest `sources`.
    ///
    /// If any source fails the engine is shut down again and the aggregate
    /// ingestion error is returned.
    #[instrument(skip(sources, options), fields(sources = sources.len()))]
    pub async fn create(sources: SourceMap, options: OpenOptions) -> Result<Self, ClientError> {
        let open_options = options.clone();
        let engine = tokio::task::spawn_blocking(move || Engine::open(&open_options)).await??;
        let engine = Arc::new(engine);
        let pool = Arc::new(EnginePool::new(
            EngineConnector::new(engine.clone()),
            options.persist_connections,
        ));
        let client = Self {
            inner: Arc::new(ClientInner {
                engine: engine.clone(),
                pool,
                options,
            }),
        };

        if !sources.is_empty() {
            if let Err(err) = Ingestor::ingest_all(engine, sources).await {
                if let Err(close_err) = client.close().await {
                    warn!(error = %close_err, "failed to close database after ingestion failure");
                }
                return Err(err);
            }
        }
        Ok(client)
    }

    pub fn options(&self) -> &OpenOptions {
        &self.inner.options
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }

    /// Connections currently parked in the pool.
    pub fn idle_connections(&self) -> usize {
        self.inner.pool.idle_count()
    }

    /// Where a registered file name points to.
    pub fn resolve_file(&self, name: &str) -> Option<FileLocation> {
        self.inner.engine.resolve_file(name)
    }

    /// Start a query; the first batch has been fetched when this returns.
    pub async fn query_stream<T: FromRow>(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryStream<T>, ClientError> {
        QueryStream::open(
            self.inner.pool.clone(),
            sql.to_string(),
            params.to_vec(),
            self.stream_settings(),
        )
        .await
    }

    /// Run a query and collect every row.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult<Row>, ClientError> {
        self.query_stream::<Row>(sql, params)
            .await?
            .into_result()
            .await
    }

    /// Run a query and deserialize every row into `T`.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult<T>, ClientError> {
        self.query(sql, params)
            .await?
            .try_map(|row| row_into(&row))
            .map_err(|err| err.into_query(sql, params))
    }

    /// First row of the result, without draining the rest.
    pub async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, ClientError> {
        let mut stream = self.query_stream::<Row>(sql, params).await?;
        let mut found = None;
        while let Some(batch) = stream.next_batch().await {
            match batch {
                Ok(rows) => {
                    if let Some(row) = rows.into_iter().next() {
                        found = Some(row);
                        break;
                    }
                }
                Err(err) => {
                    stream.close().await?;
                    return Err(err.into_query(sql, params));
                }
            }
        }
        stream.close().await?;
        Ok(found)
    }

    /// First column of the first row; `Null` when there is no row or column.
    pub async fn query_scalar(&self, sql: &str, params: &[Value]) -> Result<Value, ClientError> {
        Ok(self
            .query_row(sql, params)
            .await?
            .and_then(|row| row.into_values().into_iter().next())
            .unwrap_or(Value::Null))
    }

    /// Run a templated query built with [`crate::sql!`].
    pub async fn sql(&self, query: SqlQuery) -> Result<QueryResult<Row>, ClientError> {
        self.query(&query.text, &query.params).await
    }

    pub async fn list_tables(&self) -> Result<Vec<TableInfo>, ClientError> {
        let result = self
            .query_as::<TableInfo>(
                "SELECT table_schema AS \"schema\", table_name AS name, table_type AS \"type\" \
                 FROM information_schema.tables \
                 WHERE table_schema NOT IN ('information_schema', 'pg_catalog') \
                 ORDER BY table_schema, table_name",
                &[],
            )
            .await?;
        Ok(result.into_rows())
    }

    pub async fn describe_columns(&self, table: &str) -> Result<Vec<TableField>, ClientError> {
        let sql = format!("DESCRIBE {}", quote_ident(table));
        let result = self.query(&sql, &[]).await?;
        Ok(result
            .iter()
            .map(|row| {
                describe_field(
                    text(row, "column_name"),
                    text(row, "column_type"),
                    text(row, "null"),
                )
            })
            .collect())
    }

    pub async fn table_stats(&self, table: &str) -> Result<TableStats, ClientError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count = self.query_scalar(&sql, &[]).await?;
        let row_count = count
            .as_i64()
            .and_then(|count| u64::try_from(count).ok())
            .unwrap_or(0);
        Ok(TableStats { row_count })
    }

    pub async fn sample_table(&self, table: &str, limit: usize) -> Result<QueryResult<Row>, ClientError> {
        let sql = format!("SELECT * FROM {} LIMIT ?", quote_ident(table));
        self.query(&sql, &[Value::from(limit)]).await
    }

    /// Make one source visible to the engine and return its addressable name.
    ///
    /// For a URL without a distinct alias the name is a registry key; use
    /// [`DuckDbClient::resolve_file`] to get a location readers accept.
    #[instrument(skip(self, source))]
    pub async fn import_source(&self, source: Source) -> Result<String, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let name = source.display_name().unwrap_or_default();
        let ingestor = Ingestor::new(self.inner.engine.clone());
        let result = tokio::task::spawn_blocking(move || ingestor.ingest(&source)).await?;
        result.map_err(|err| match err {
            ClientError::Ingestion { .. }
            | ClientError::UnsupportedSource(_)
            | ClientError::Closed
            | ClientError::Connection(_) => err,
            ClientError::Query(query) => ClientError::ingestion(name, query.message),
            other => ClientError::ingestion(name, other),
        })
    }

    /// Import several sources concurrently; see [`Ingestor::ingest_all`].
    pub async fn import_sources(&self, sources: SourceMap) -> Result<Vec<String>, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ingestor::ingest_all(self.inner.engine.clone(), sources).await
    }

    /// Run statements in order on one connection, stopping at the first failure.
    #[instrument(skip(self, statements), fields(count = statements.len()))]
    pub async fn execute_batch<S: AsRef<str>>(&self, statements: &[S]) -> Result<(), ClientError> {
        let statements = statements
            .iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>();
        let log_queries = self.inner.options.log_queries;
        self.with_connection(move |conn| {
            for statement in &statements {
                if log_queries {
                    info!(sql = %statement, "executing batch statement");
                }
                conn.execute_batch(statement).map_err(|err| {
                    QueryError::new(err.to_string(), statements.join(";\n"), &[])
                })?;
            }
            Ok(())
        })
        .await
    }

    /// Create `name` with columns inferred from the first row, then insert
    /// every row with bound parameters.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn create_table(&self, name: &str, rows: &[Row]) -> Result<(), ClientError> {
        let Some(first) = rows.first() else {
            return Err(ClientError::Precondition(
                "cannot create table with empty data".to_string(),
            ));
        };
        let table = quote_ident(name);
        let columns = first
            .iter()
            .map(|(column, value)| format!("{} {}", quote_ident(column), infer_sql_type(value)))
            .collect::<Vec<_>>();
        let create_sql = format!("CREATE TABLE {table} ({})", columns.join(", "));
        let rows = rows.to_vec();
        let log_queries = self.inner.options.log_queries;

        self.with_connection(move |conn| {
            if log_queries {
                info!(sql = %create_sql, "creating table");
            }
            conn.execute_batch(&create_sql)
                .map_err(|err| QueryError::new(err.to_string(), create_sql.as_str(), &[]))?;

            for row in rows {
                let insert_sql = insert_statement(&table, &row);
                let values = row.into_values();
                if log_queries {
                    info!(sql = %insert_sql, params = ?values, "inserting row");
                }
                insert_row(conn, &insert_sql, &values)?;
            }
            Ok(())
        })
        .await
    }

    /// Close the pool and the engine. Later calls are no-ops.
    pub async fn close(&self) -> Result<(), ClientError> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            if inner.pool.close_all() {
                inner.engine.shutdown()?;
            }
            Ok(())
        })
        .await?
    }

    async fn with_connection<F, T>(&self, f: F) -> Result<T, ClientError>
    where
        F: FnOnce(&Connection) -> Result<T, ClientError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.inner.pool.clone();
        tokio::task::spawn_blocking(move || {
            let lease = pool.acquire()?;
            f(&lease)
        })
        .await?
    }

    fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            options: self.inner.options.query.clone(),
            log_queries: self.inner.options.log_queries,
        }
    }
}

fn insert_statement(table: &str, row: &Row) -> String {
    let columns = row.keys().map(quote_ident).collect::<Vec<_>>();
    let placeholders = vec!["?"; columns.len()];
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn insert_row(conn: &Connection, sql: &str, values: &[Value]) -> Result<(), ClientError> {
    let query_error = |err: duckdb::Error| QueryError::new(err.to_string(), sql, values);
    let mut stmt = conn.prepare(sql).map_err(query_error)?;
    stmt.execute(params_from_iter(values_to_engine(values)))
        .map_err(query_error)?;
    Ok(())
}

fn text<'a>(row: &'a Row, column: &str) -> &'a str {
    row.get(column).and_then(Value::as_str).unwrap_or_default()
}
