//! Native engine handle.
//!
//! One database is opened per client. Every native connection is an extra
//! session on that database, cloned from the root handle, so temp objects and
//! settings are per-connection while tables and views are shared.

use std::sync::Mutex;

use duckdb::{Config, Connection};
use tracing::{debug, info, instrument};

use crate::config::OpenOptions;
use crate::engine::files::{FileLocation, FileRegistry};
use crate::engine::pool::ConnectionManager;
use crate::error::ClientError;

pub struct Engine {
    root: Mutex<Option<Connection>>,
    files: FileRegistry,
}

impl Engine {
    /// Open the database described by `options`.
    #[instrument(skip(options), fields(path = options.path.as_deref().unwrap_or(":memory:")))]
    pub fn open(options: &OpenOptions) -> Result<Self, ClientError> {
        let files = FileRegistry::new()?;
        let config = engine_config(options, &files)?;
        let root = match options.path.as_deref() {
            Some(path) => Connection::open_with_flags(path, config),
            None => Connection::open_in_memory_with_flags(config),
        }
        .map_err(|err| ClientError::Connection(err.to_string()))?;

        info!(scratch = %files.scratch_dir().display(), "DuckDB engine opened");
        Ok(Self {
            root: Mutex::new(Some(root)),
            files,
        })
    }

    /// Open a new native connection on the database.
    pub fn connect(&self) -> Result<Connection, ClientError> {
        let root = self
            .root
            .lock()
            .map_err(|_| ClientError::Internal("engine lock poisoned".to_string()))?;
        let root = root.as_ref().ok_or(ClientError::Closed)?;
        let conn = root
            .try_clone()
            .map_err(|err| ClientError::Connection(err.to_string()))?;
        debug!("DuckDB connection created");
        Ok(conn)
    }

    pub fn files(&self) -> &FileRegistry {
        &self.files
    }

    pub fn resolve_file(&self, name: &str) -> Option<FileLocation> {
        self.files.resolve(name)
    }

    pub fn is_open(&self) -> bool {
        self.root.lock().map(|root| root.is_some()).unwrap_or(false)
    }

    /// Close the root handle. Returns `false` when it was already closed.
    #[instrument(skip(self))]
    pub fn shutdown(&self) -> Result<bool, ClientError> {
        let mut root = self
            .root
            .lock()
            .map_err(|_| ClientError::Internal("engine lock poisoned".to_string()))?;
        let Some(conn) = root.take() else {
            return Ok(false);
        };
        conn.close()
            .map_err(|(_, err)| ClientError::Connection(format!("failed to close engine: {err}")))?;
        info!("DuckDB engine closed");
        Ok(true)
    }
}

fn engine_config(options: &OpenOptions, files: &FileRegistry) -> Result<Config, ClientError> {
    let build = || -> duckdb::Result<Config> {
        let mut config = Config::default()
            .enable_autoload_extension(true)?
            .with(
                "file_search_path",
                &files.scratch_dir().to_string_lossy(),
            )?;
        if options.allow_unsigned_extensions {
            config = config.allow_unsigned_extensions()?;
        }
        if let Some(threads) = options.threads {
            config = config.threads(i64::from(threads))?;
        }
        Ok(config)
    };
    build().map_err(|err| ClientError::Connection(format!("invalid engine configuration: {err}")))
}

/// [`ConnectionManager`] that opens sessions on an [`Engine`].
pub struct EngineConnector {
    engine: std::sync::Arc<Engine>,
}

impl EngineConnector {
    pub fn new(engine: std::sync::Arc<Engine>) -> Self {
        Self { engine }
    }
}

impl ConnectionManager for EngineConnector {
    type Connection = Connection;

    fn connect(&self) -> Result<Connection, ClientError> {
        self.engine.connect()
    }

    fn close(&self, conn: Connection) -> Result<(), ClientError> {
        conn.close()
            .map_err(|(_, err)| ClientError::Connection(format!("failed to close connection: {err}")))?;
        debug!("DuckDB connection closed");
        Ok(())
    }
}
