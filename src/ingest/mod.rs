//! Source ingestion: makes files and URLs visible to the engine as files,
//! tables or views.
//!
//! Each ingestion runs on its own short-lived connection. Bulk ingestion fans
//! out one blocking task per source and reports every failure at once.

mod readers;
pub mod source;

use std::sync::Arc;

use duckdb::Connection;
use tracing::{debug, info, instrument, warn};

use crate::engine::{Engine, FileLocation};
use crate::error::ClientError;
use crate::sql::{detect_csv_delimiter, quote_ident};

pub use readers::Reader;
pub use source::{
    CsvOptions, FileBuffer, JsonFormat, JsonOptions, Source, SourceMap, SourceOptions,
};

use source::{extension_of, url_file_name, MEDIA_CSV, MEDIA_JSON, MEDIA_NDJSON, MEDIA_TSV};

/// Bytes sampled when sniffing a CSV delimiter.
const DELIMITER_SAMPLE_BYTES: usize = 64 * 1024;

/// How a named file is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Csv { tab_separated: bool },
    Json,
    Columnar(Reader),
}

pub struct Ingestor {
    engine: Arc<Engine>,
}

impl Ingestor {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Ingest one source and return the name it is addressable by.
    #[instrument(skip(self, source))]
    pub fn ingest(&self, source: &Source) -> Result<String, ClientError> {
        match source {
            Source::File(file) => {
                self.engine.files().register_buffer(&file.name, &file.bytes)?;
                Ok(file.name.clone())
            }
            Source::NamedFile {
                file,
                name,
                options,
            } => {
                let name = name.clone().unwrap_or_else(|| file.name.clone());
                self.insert_file(file, &name, options)?;
                Ok(name)
            }
            Source::Url { url, name } => self.register_url(url, name.as_deref()),
        }
    }

    fn insert_file(
        &self,
        file: &FileBuffer,
        name: &str,
        options: &SourceOptions,
    ) -> Result<(), ClientError> {
        let location = self.engine.files().register_buffer(&file.name, &file.bytes)?;
        let format = detect_format(file)?;
        let conn = self.engine.connect()?;
        let target = readers::qualified_name(options.schema_name(), name);
        let path = location.as_reader_path();

        match format {
            Format::Csv { tab_separated } => {
                insert_csv(&conn, file, &target, &path, options, tab_separated)
            }
            Format::Json => insert_json(&conn, &target, &path, options),
            Format::Columnar(reader) => {
                execute(&conn, &readers::create_view(&target, &reader.scan(&path)))
            }
        }
    }

    fn register_url(&self, url: &str, name: Option<&str>) -> Result<String, ClientError> {
        let file_name = url_file_name(url)?;
        self.engine.files().register_url(&file_name, url)?;

        let Some(alias) = name.filter(|alias| *alias != file_name) else {
            return Ok(file_name);
        };
        let reader = extension_of(&file_name)
            .as_deref()
            .and_then(Reader::for_extension)
            .ok_or_else(|| {
                ClientError::UnsupportedSource(format!("unsupported file extension for {file_name}"))
            })?;
        let conn = self.engine.connect()?;
        let location = FileLocation::Remote(url.to_string());
        execute(
            &conn,
            &readers::create_view(&quote_ident(alias), &reader.scan(&location.as_reader_path())),
        )?;
        Ok(alias.to_string())
    }

    /// Ingest every source concurrently.
    ///
    /// All sources are attempted; if any fail, the returned aggregate error
    /// lists each failure by its key.
    #[instrument(skip(engine, sources), fields(count = sources.len()))]
    pub async fn ingest_all(
        engine: Arc<Engine>,
        sources: SourceMap,
    ) -> Result<Vec<String>, ClientError> {
        let tasks = sources
            .into_iter()
            .map(|(key, source)| {
                let ingestor = Ingestor::new(engine.clone());
                let task = tokio::task::spawn_blocking(move || ingestor.ingest(&source));
                (key, task)
            })
            .collect::<Vec<_>>();

        let mut names = Vec::with_capacity(tasks.len());
        let mut errors = Vec::new();
        for (key, task) in tasks {
            match task.await.map_err(ClientError::from).and_then(|result| result) {
                Ok(name) => {
                    debug!(source = %key, name = %name, "source ingested");
                    names.push(name);
                }
                Err(err) => {
                    warn!(source = %key, error = %err, "source ingestion failed");
                    errors.push(ClientError::ingestion(key, failure_message(err)));
                }
            }
        }

        if errors.is_empty() {
            Ok(names)
        } else {
            Err(ClientError::AggregateIngestion(errors))
        }
    }
}

fn failure_message(err: ClientError) -> String {
    match err {
        ClientError::Ingestion { message, .. } => message,
        ClientError::Query(query) => query.message,
        other => other.to_string(),
    }
}

fn detect_format(file: &FileBuffer) -> Result<Format, ClientError> {
    let extension = file.extension();
    let media_type = file
        .media_type
        .clone()
        .or_else(|| source::media_type_for_extension(&file.name).map(str::to_string));

    match media_type.as_deref() {
        Some(MEDIA_CSV) => return Ok(Format::Csv { tab_separated: false }),
        Some(MEDIA_TSV) => return Ok(Format::Csv { tab_separated: true }),
        Some(MEDIA_JSON) | Some(MEDIA_NDJSON) => return Ok(Format::Json),
        _ => {}
    }
    match extension.as_deref() {
        Some("parquet") => Ok(Format::Columnar(Reader::Parquet)),
        Some("xlsx") => Ok(Format::Columnar(Reader::Xlsx)),
        Some("xls") => Ok(Format::Columnar(Reader::Xls)),
        _ => Err(ClientError::UnsupportedSource(format!(
            "unsupported file type {} for {}",
            file.media_type.as_deref().unwrap_or("unknown"),
            file.name
        ))),
    }
}

fn insert_csv(
    conn: &Connection,
    file: &FileBuffer,
    target: &str,
    path: &str,
    options: &SourceOptions,
    tab_separated: bool,
) -> Result<(), ClientError> {
    let typed = readers::create_table(
        target,
        &readers::typed_csv_scan(path, &options.csv, tab_separated),
    );
    match conn.execute_batch(&typed) {
        Ok(()) => Ok(()),
        Err(err) if is_type_conversion_failure(&err.to_string()) => {
            info!(file = %file.name, error = %err, "typed CSV load failed, loading all columns as text");
            let sample_len = file.bytes.len().min(DELIMITER_SAMPLE_BYTES);
            let sample = String::from_utf8_lossy(&file.bytes[..sample_len]);
            let untyped = readers::create_table(
                target,
                &readers::untyped_csv_scan(
                    path,
                    &options.csv,
                    tab_separated,
                    detect_csv_delimiter(&sample),
                ),
            );
            execute(conn, &untyped).map_err(|err| {
                ClientError::ingestion(
                    &file.name,
                    format!("failed to insert CSV file {} as untyped: {}", file.name, failure_message(err)),
                )
            })
        }
        Err(err) => Err(ClientError::ingestion(&file.name, err)),
    }
}

fn insert_json(
    conn: &Connection,
    target: &str,
    path: &str,
    options: &SourceOptions,
) -> Result<(), ClientError> {
    let typed = readers::create_table(target, &readers::typed_json_scan(path, &options.json));
    if let Err(err) = conn.execute_batch(&typed) {
        info!(error = %err, "typed JSON load failed, creating auto-detected view");
        return execute(conn, &readers::create_view(target, &Reader::Json.scan(path)));
    }
    Ok(())
}

fn execute(conn: &Connection, sql: &str) -> Result<(), ClientError> {
    conn.execute_batch(sql)
        .map_err(|err| crate::error::QueryError::new(err.to_string(), sql, &[]).into())
}

/// Whether an engine error reports values that failed to convert to the
/// detected or declared column type.
///
/// DuckDB does not expose a structured code for this through the C API, so
/// the message is inspected.
pub fn is_type_conversion_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("could not convert")
        || lower.starts_with("conversion error")
        || lower.contains("error when converting column")
}
