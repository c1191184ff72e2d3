//! Registry of engine-visible files.
//!
//! In-memory buffers are materialized into a private scratch directory that
//! the engine searches for bare file names. Remote URLs are only recorded;
//! the engine streams them when a reader touches them.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tempfile::TempDir;
use tracing::debug;

use crate::error::ClientError;
use crate::sql::quote_literal;

/// Where a registered file name points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLocation {
    Local(PathBuf),
    Remote(String),
}

impl FileLocation {
    /// The path or URL as it should appear inside a reader function call.
    pub fn as_reader_path(&self) -> String {
        match self {
            FileLocation::Local(path) => path.to_string_lossy().into_owned(),
            FileLocation::Remote(url) => url.clone(),
        }
    }

    /// Quoted string literal of [`FileLocation::as_reader_path`].
    pub fn to_sql_literal(&self) -> String {
        quote_literal(&self.as_reader_path())
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_reader_path())
    }
}

pub struct FileRegistry {
    scratch: TempDir,
    entries: RwLock<HashMap<String, FileLocation>>,
}

impl FileRegistry {
    pub fn new() -> Result<Self, ClientError> {
        let scratch = tempfile::Builder::new()
            .prefix("ducklens-")
            .tempdir()
            .map_err(|err| {
                ClientError::Connection(format!("failed to create scratch directory: {err}"))
            })?;
        Ok(Self {
            scratch,
            entries: RwLock::new(HashMap::new()),
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Write `bytes` under `name`, replacing an earlier registration.
    pub fn register_buffer(&self, name: &str, bytes: &[u8]) -> Result<FileLocation, ClientError> {
        validate_file_name(name)?;
        let path = self.scratch.path().join(name);
        std::fs::write(&path, bytes)
            .map_err(|err| ClientError::Internal(format!("failed to write {name}: {err}")))?;
        debug!(name, size = bytes.len(), "registered file buffer");
        let location = FileLocation::Local(path);
        self.insert(name, location.clone())?;
        Ok(location)
    }

    pub fn register_url(&self, name: &str, url: &str) -> Result<FileLocation, ClientError> {
        validate_file_name(name)?;
        debug!(name, url, "registered remote file");
        let location = FileLocation::Remote(url.to_string());
        self.insert(name, location.clone())?;
        Ok(location)
    }

    pub fn resolve(&self, name: &str) -> Option<FileLocation> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(name).cloned())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .entries
            .read()
            .map(|entries| entries.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn insert(&self, name: &str, location: FileLocation) -> Result<(), ClientError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ClientError::Internal("file registry lock poisoned".to_string()))?;
        entries.insert(name.to_string(), location);
        Ok(())
    }
}

fn validate_file_name(name: &str) -> Result<(), ClientError> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name.split('.').all(str::is_empty)
        || name.contains("..")
    {
        return Err(ClientError::Precondition(format!(
            "invalid file name {name:?}"
        )));
    }
    Ok(())
}
