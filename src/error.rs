use thiserror::Error;

use crate::value::Value;

/// Failure of a statement, carrying the SQL text and bound parameters.
#[derive(Debug, Clone, Error)]
#[error("Query error: {message}\nSQL: {sql}\nParams: {}", render_params(.params))]
pub struct QueryError {
    pub message: String,
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryError {
    pub fn new(message: impl Into<String>, sql: impl Into<String>, params: &[Value]) -> Self {
        Self {
            message: message.into(),
            sql: sql.into(),
            params: params.to_vec(),
        }
    }
}

fn render_params(params: &[Value]) -> String {
    serde_json::to_string(params).unwrap_or_else(|_| format!("{params:?}"))
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("database is closed")]
    Closed,
    #[error("failed to create database connection: {0}")]
    Connection(String),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("failed to ingest source {source_name}: {message}")]
    Ingestion {
        source_name: String,
        message: String,
    },
    #[error("failed to ingest sources: {}", join_messages(.0))]
    AggregateIngestion(Vec<ClientError>),
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("missing first batch")]
    MissingFirstBatch,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Closed,
    Connection,
    Query,
    Ingestion,
    AggregateIngestion,
    UnsupportedSource,
    Precondition,
    Protocol,
    Internal,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Closed => ErrorKind::Closed,
            ClientError::Connection(_) => ErrorKind::Connection,
            ClientError::Query(_) => ErrorKind::Query,
            ClientError::Ingestion { .. } => ErrorKind::Ingestion,
            ClientError::AggregateIngestion(_) => ErrorKind::AggregateIngestion,
            ClientError::UnsupportedSource(_) => ErrorKind::UnsupportedSource,
            ClientError::Precondition(_) => ErrorKind::Precondition,
            ClientError::MissingFirstBatch => ErrorKind::Protocol,
            ClientError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn ingestion(source_name: impl Into<String>, message: impl ToString) -> Self {
        ClientError::Ingestion {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Reclassify any failure into a query error for `sql`/`params`.
    /// Query errors keep their original statement context.
    pub(crate) fn into_query(self, sql: &str, params: &[Value]) -> Self {
        match self {
            ClientError::Query(_) | ClientError::Closed | ClientError::Connection(_) => self,
            other => ClientError::Query(QueryError::new(other.to_string(), sql, params)),
        }
    }
}

impl From<tokio::task::JoinError> for ClientError {
    fn from(err: tokio::task::JoinError) -> Self {
        ClientError::Internal(format!("blocking task failed: {err}"))
    }
}

fn join_messages(errors: &[ClientError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
