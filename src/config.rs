use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Read-time coercions applied to every result batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Deliver 64-bit integer columns as floating point numbers.
    pub cast_bigint_to_double: bool,
    /// Deliver timestamp columns as date values instead of raw engine ticks.
    pub cast_timestamp_to_date: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            cast_bigint_to_double: true,
            cast_timestamp_to_date: true,
        }
    }
}

/// Options used when opening the embedded engine.
///
/// Partial documents (JSON or environment) are merged field by field over
/// [`OpenOptions::default`], so supplying a single `query.*` flag keeps the
/// other defaults intact.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenOptions {
    /// Database file; `None` opens an in-memory database.
    pub path: Option<String>,
    pub query: QueryOptions,
    /// Log every executed statement at `info`.
    pub log_queries: bool,
    /// Return released connections to the idle pool instead of closing them.
    pub persist_connections: bool,
    pub allow_unsigned_extensions: bool,
    /// Engine worker threads; `None` keeps the engine default.
    pub threads: Option<u32>,
    /// Extensions installed and loaded once, right after the first open.
    pub baseline_extensions: Vec<String>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            path: None,
            query: QueryOptions::default(),
            log_queries: false,
            persist_connections: true,
            allow_unsigned_extensions: false,
            threads: None,
            baseline_extensions: vec!["spatial".to_string()],
        }
    }
}

impl OpenOptions {
    /// Load options from `DUCKLENS_*` environment variables layered over the defaults.
    ///
    /// Nested keys use a double underscore, e.g. `DUCKLENS_QUERY__CAST_BIGINT_TO_DOUBLE=false`.
    pub fn load() -> anyhow::Result<Self> {
        let defaults_json = serde_json::to_string(&Self::default())
            .with_context(|| "failed to serialize defaults")?;
        let settings = config::Config::builder()
            .add_source(
                config::File::from_str(&defaults_json, config::FileFormat::Json).required(false),
            )
            .add_source(
                config::Environment::with_prefix("DUCKLENS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("baseline_extensions"),
            )
            .build()
            .with_context(|| "failed to load configuration")?;
        settings
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")
    }

    /// Merge a (possibly partial) JSON document over the defaults.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).with_context(|| "failed to parse open options")
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_query(mut self, query: QueryOptions) -> Self {
        self.query = query;
        self
    }

    pub fn with_log_queries(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn with_persist_connections(mut self, enabled: bool) -> Self {
        self.persist_connections = enabled;
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_baseline_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.baseline_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_casts_and_persistence() {
        let opts = OpenOptions::default();
        assert!(opts.query.cast_bigint_to_double);
        assert!(opts.query.cast_timestamp_to_date);
        assert!(!opts.log_queries);
        assert!(opts.persist_connections);
        assert_eq!(opts.baseline_extensions, vec!["spatial".to_string()]);
    }

    #[test]
    fn partial_query_options_merge_over_defaults() {
        let opts =
            OpenOptions::from_json(r#"{"query": {"cast_bigint_to_double": false}}"#).unwrap();
        assert!(!opts.query.cast_bigint_to_double);
        assert!(opts.query.cast_timestamp_to_date);
        assert!(opts.persist_connections);
    }

    #[test]
    fn from_json_rejects_malformed_documents() {
        assert!(OpenOptions::from_json("{not json").is_err());
    }
}
