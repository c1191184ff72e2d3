//! Embedded DuckDB client.
//!
//! [`DuckDbClient`] opens an in-process database, loads files and URLs into
//! it and runs SQL with streamed or fully materialized results.
//! [`Database`] owns one client across its lifecycle.

pub mod client;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod query;
pub mod sql;
pub mod types;
pub mod value;

pub use client::{DuckDbClient, TableInfo, TableStats};
pub use config::{OpenOptions, QueryOptions};
pub use database::Database;
pub use engine::FileLocation;
pub use error::{ClientError, ErrorKind, QueryError};
pub use ingest::{FileBuffer, Source, SourceMap, SourceOptions};
pub use query::{QueryResult, QueryStream};
pub use sql::SqlQuery;
pub use types::{FieldType, TableField};
pub use value::{FromRow, Row, Value};
