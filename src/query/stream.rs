//! Streaming query execution.
//!
//! A statement runs on a blocking worker that owns one leased connection for
//! the whole life of the stream. The worker fetches the first batch before the
//! caller gets a [`QueryStream`] back, so the schema is known up front, then
//! hands further batches over a bounded channel. Dropping the stream closes
//! the channel; the worker notices on its next send, drops the statement and
//! releases the lease.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use duckdb::arrow::datatypes::SchemaRef;
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::{params_from_iter, Connection};
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::config::QueryOptions;
use crate::engine::{ConnectionManager, EnginePool, PooledConnection};
use crate::error::{ClientError, QueryError};
use crate::query::QueryResult;
use crate::types::{batch_to_rows, coerce_batch, schema_fields, values_to_engine, TableField};
use crate::value::{FromRow, Row, Value};

type Header = Result<RecordBatch, ClientError>;
type BatchResult = Result<RecordBatch, ClientError>;

/// Settings the worker needs besides the statement itself.
#[derive(Debug, Clone)]
pub(crate) struct StreamSettings {
    pub options: QueryOptions,
    pub log_queries: bool,
}

/// Lazy, single-pass sequence of row batches with an eagerly known schema.
pub struct QueryStream<T: FromRow = Row> {
    schema: Vec<TableField>,
    first: Option<RecordBatch>,
    receiver: Option<mpsc::Receiver<BatchResult>>,
    worker: Option<JoinHandle<()>>,
    sql: String,
    params: Vec<Value>,
    _rows: std::marker::PhantomData<fn() -> T>,
}

impl<T: FromRow> QueryStream<T> {
    /// Execute `sql` and wait for its first batch.
    #[instrument(skip(pool, params, settings), fields(sql = %sql, param_count = params.len()))]
    pub(crate) async fn open(
        pool: Arc<EnginePool>,
        sql: String,
        params: Vec<Value>,
        settings: StreamSettings,
    ) -> Result<Self, ClientError> {
        if settings.log_queries {
            info!(sql = %sql, params = ?params, "executing query");
        }

        let (header_tx, header_rx) = oneshot::channel::<Header>();
        let (batch_tx, batch_rx) = mpsc::channel::<BatchResult>(1);
        let worker_sql = sql.clone();
        let worker_params = params.clone();
        let worker = tokio::task::spawn_blocking(move || {
            produce(
                pool,
                &worker_sql,
                &worker_params,
                &settings.options,
                header_tx,
                batch_tx,
            )
        });

        let first = match header_rx.await {
            Ok(header) => header?,
            Err(_) => {
                // The worker dropped the header sender without sending: it panicked.
                worker.await?;
                return Err(ClientError::Internal(
                    "query worker exited before producing a result".to_string(),
                ));
            }
        };

        let schema = schema_fields(&first.schema());
        debug!(
            columns = schema.len(),
            rows = first.num_rows(),
            "received first batch"
        );
        Ok(Self {
            schema,
            first: Some(first),
            receiver: Some(batch_rx),
            worker: Some(worker),
            sql,
            params,
            _rows: std::marker::PhantomData,
        })
    }

    /// Result schema, available before any row is consumed.
    pub fn schema(&self) -> &[TableField] {
        &self.schema
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Next batch of rows, or `None` once the result is exhausted.
    pub async fn next_batch(&mut self) -> Option<Result<Vec<T>, ClientError>> {
        self.next().await
    }

    /// Stop consuming and wait until the connection has been released.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.first = None;
        self.receiver = None;
        if let Some(worker) = self.worker.take() {
            worker.await?;
        }
        Ok(())
    }

    /// Drain every batch into one result. Failures while draining are
    /// reported as query errors for this statement.
    pub async fn into_result(mut self) -> Result<QueryResult<T>, ClientError> {
        let mut rows = Vec::new();
        while let Some(batch) = self.next().await {
            match batch {
                Ok(batch) => rows.extend(batch),
                Err(err) => {
                    let err = err.into_query(&self.sql, &self.params);
                    self.close().await?;
                    return Err(err);
                }
            }
        }
        let schema = std::mem::take(&mut self.schema);
        self.close().await?;
        Ok(QueryResult::new(schema, rows))
    }
}

impl<T: FromRow> Stream for QueryStream<T> {
    type Item = Result<Vec<T>, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(first) = this.first.take() {
            return Poll::Ready(Some(materialize(&first)));
        }
        let Some(receiver) = this.receiver.as_mut() else {
            return Poll::Ready(None);
        };
        match receiver.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(batch))) => Poll::Ready(Some(materialize(&batch))),
            Poll::Ready(Some(Err(err))) => {
                this.receiver = None;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.receiver = None;
                Poll::Ready(None)
            }
        }
    }
}

fn materialize<T: FromRow>(batch: &RecordBatch) -> Result<Vec<T>, ClientError> {
    batch_to_rows(batch)?.into_iter().map(T::from_row).collect()
}

enum Outcome {
    Streamed,
    MissingFirstBatch,
}

fn produce(
    pool: Arc<EnginePool>,
    sql: &str,
    params: &[Value],
    options: &QueryOptions,
    header_tx: oneshot::Sender<Header>,
    batch_tx: mpsc::Sender<BatchResult>,
) {
    let lease = match pool.acquire() {
        Ok(lease) => lease,
        Err(err) => {
            let _ = header_tx.send(Err(err));
            return;
        }
    };

    let mut header_tx = Some(header_tx);
    let outcome = stream_batches(&lease, sql, params, options, &mut header_tx, &batch_tx);
    if let Err(err) = settle(lease, outcome) {
        match header_tx.take() {
            Some(tx) => {
                let _ = tx.send(Err(err));
            }
            None => {
                let _ = batch_tx.blocking_send(Err(err));
            }
        }
    }
}

/// Give the lease back once the worker is done with it. A missing first
/// batch closes the connection before the error is reported.
fn settle<M: ConnectionManager>(
    lease: PooledConnection<M>,
    outcome: Result<Outcome, ClientError>,
) -> Result<(), ClientError> {
    match outcome {
        Ok(Outcome::Streamed) => {
            drop(lease);
            Ok(())
        }
        Ok(Outcome::MissingFirstBatch) => {
            lease.discard();
            Err(ClientError::MissingFirstBatch)
        }
        Err(err) => {
            drop(lease);
            Err(err)
        }
    }
}

/// The batch the schema is taken from. `None` when the engine produced
/// neither a batch nor any column to describe one.
fn first_batch(next: Option<RecordBatch>, schema: SchemaRef) -> Option<RecordBatch> {
    match next {
        Some(batch) => Some(batch),
        None if schema.fields().is_empty() => None,
        None => Some(RecordBatch::new_empty(schema)),
    }
}

fn stream_batches(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    options: &QueryOptions,
    header_tx: &mut Option<oneshot::Sender<Header>>,
    batch_tx: &mpsc::Sender<BatchResult>,
) -> Result<Outcome, ClientError> {
    let query_error = |err: duckdb::Error| QueryError::new(err.to_string(), sql, params);

    let mut stmt = conn.prepare(sql).map_err(query_error)?;
    let mut arrow = if params.is_empty() {
        stmt.query_arrow([]).map_err(query_error)?
    } else {
        stmt.query_arrow(params_from_iter(values_to_engine(params)))
            .map_err(query_error)?
    };

    let schema: SchemaRef = arrow.get_schema();
    let Some(first) = first_batch(arrow.next(), schema) else {
        return Ok(Outcome::MissingFirstBatch);
    };
    let first = coerce_batch(first, options)?;
    if let Some(tx) = header_tx.take() {
        if tx.send(Ok(first)).is_err() {
            return Ok(Outcome::Streamed);
        }
    }

    for batch in arrow {
        let batch = coerce_batch(batch, options)?;
        if batch_tx.blocking_send(Ok(batch)).is_err() {
            debug!("query stream abandoned by consumer");
            break;
        }
    }
    Ok(Outcome::Streamed)
}
