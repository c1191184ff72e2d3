//! Source model: what can be loaded into the engine and how.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

pub const MEDIA_CSV: &str = "text/csv";
pub const MEDIA_TSV: &str = "text/tab-separated-values";
pub const MEDIA_JSON: &str = "application/json";
pub const MEDIA_NDJSON: &str = "application/x-ndjson";

/// An in-memory file: name, optional media type and contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBuffer {
    pub name: String,
    pub media_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FileBuffer {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            media_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Read a file from disk, guessing its media type from the extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ClientError::UnsupportedSource(format!("invalid file path {}", path.display()))
            })?
            .to_string();
        let bytes = std::fs::read(path).map_err(|err| {
            ClientError::ingestion(name.clone(), format!("failed to read {}: {err}", path.display()))
        })?;
        let media_type = media_type_for_extension(&name).map(str::to_string);
        Ok(Self {
            name,
            media_type,
            bytes,
        })
    }

    /// Lowercased extension of the file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.name)
    }
}

pub(crate) fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Media type implied by a file name's extension, for the text formats.
pub fn media_type_for_extension(name: &str) -> Option<&'static str> {
    match extension_of(name)?.as_str() {
        "csv" => Some(MEDIA_CSV),
        "tsv" => Some(MEDIA_TSV),
        "json" => Some(MEDIA_JSON),
        "ndjson" | "jsonl" => Some(MEDIA_NDJSON),
        _ => None,
    }
}

/// Options for loading delimited text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    pub delimiter: Option<String>,
    pub header: Option<bool>,
    pub quote: Option<String>,
    pub escape: Option<String>,
    /// Lines to skip before the header.
    pub skip: Option<u32>,
    pub date_format: Option<String>,
    pub timestamp_format: Option<String>,
    /// Column name to SQL type overrides.
    pub column_types: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonFormat {
    #[default]
    Auto,
    Array,
    NewlineDelimited,
    Unstructured,
}

impl JsonFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonFormat::Auto => "auto",
            JsonFormat::Array => "array",
            JsonFormat::NewlineDelimited => "newline_delimited",
            JsonFormat::Unstructured => "unstructured",
        }
    }
}

/// Options for loading JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonOptions {
    pub format: JsonFormat,
    pub column_types: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOptions {
    /// Target schema; `main` when unset.
    pub schema: Option<String>,
    pub csv: CsvOptions,
    pub json: JsonOptions,
}

impl SourceOptions {
    pub fn schema_name(&self) -> &str {
        self.schema.as_deref().unwrap_or("main")
    }
}

/// Something that can be made visible to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Registered under its own file name; no table or view is created.
    File(FileBuffer),
    /// Loaded into a table or view named `name`, or the file name.
    NamedFile {
        file: FileBuffer,
        name: Option<String>,
        options: SourceOptions,
    },
    /// Remote file streamed by the engine on demand. A view is created only
    /// when `name` differs from the file name derived from the URL.
    ///
    /// Without such a view the derived name is only a registry key: SQL
    /// readers cannot open it directly. Look the URL up with
    /// `DuckDbClient::resolve_file` and pass that to the reader instead.
    Url { url: String, name: Option<String> },
}

impl Source {
    pub fn file(file: FileBuffer) -> Self {
        Source::File(file)
    }

    pub fn table(file: FileBuffer, name: impl Into<String>) -> Self {
        Source::NamedFile {
            file,
            name: Some(name.into()),
            options: SourceOptions::default(),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Source::Url {
            url: url.into(),
            name: None,
        }
    }

    pub fn url_named(url: impl Into<String>, name: impl Into<String>) -> Self {
        Source::Url {
            url: url.into(),
            name: Some(name.into()),
        }
    }

    /// Attach load options; turns a bare file into a named-file source.
    pub fn with_options(self, options: SourceOptions) -> Self {
        match self {
            Source::File(file) => Source::NamedFile {
                file,
                name: None,
                options,
            },
            Source::NamedFile { file, name, .. } => Source::NamedFile {
                file,
                name,
                options,
            },
            url @ Source::Url { .. } => url,
        }
    }

    /// Name the source is addressable by once ingested.
    pub fn display_name(&self) -> Result<String, ClientError> {
        match self {
            Source::File(file) => Ok(file.name.clone()),
            Source::NamedFile { file, name, .. } => {
                Ok(name.clone().unwrap_or_else(|| file.name.clone()))
            }
            Source::Url { url, name } => match name {
                Some(name) => Ok(name.clone()),
                None => url_file_name(url),
            },
        }
    }
}

/// Sources keyed by a caller-chosen name used in error reports.
pub type SourceMap = BTreeMap<String, Source>;

/// Last path segment of a URL, without query string or fragment.
pub fn url_file_name(url: &str) -> Result<String, ClientError> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let name = path.rsplit('/').next().unwrap_or_default();
    if name.is_empty() || name.contains(':') {
        return Err(ClientError::UnsupportedSource(format!(
            "cannot derive a file name from {url}"
        )));
    }
    Ok(name.to_string())
}
