//! Lifecycle manager for one client.
//!
//! `Database` is an owned service object: create one at startup, register
//! deferred sources, call [`Database::init`] and hand the resulting client to
//! consumers. Tests build their own instance with `Database::for_tests`.

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::client::DuckDbClient;
use crate::config::OpenOptions;
use crate::error::ClientError;
use crate::ingest::{Source, SourceMap};
use crate::value::Value;

pub struct Database {
    options: OpenOptions,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    sources: SourceMap,
    client: Option<DuckDbClient>,
    extensions_loaded: bool,
    closed: bool,
}

impl Database {
    pub fn new(options: OpenOptions) -> Self {
        Self {
            options,
            state: Mutex::new(State::default()),
        }
    }

    /// Fresh instance that loads no baseline extensions, so it needs no network.
    #[cfg(any(test, feature = "test-support"))]
    pub fn for_tests() -> Self {
        Self::new(OpenOptions::default().with_baseline_extensions(Vec::<String>::new()))
    }

    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// Queue a source for ingestion during [`Database::init`].
    pub async fn register_source(&self, key: impl Into<String>, source: Source) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        if state.client.is_some() || state.closed {
            return Err(ClientError::Precondition(
                "cannot register sources after initialization".to_string(),
            ));
        }
        state.sources.insert(key.into(), source);
        Ok(())
    }

    /// Drop a queued source before [`Database::init`].
    pub async fn remove_source(&self, key: &str) -> Result<Option<Source>, ClientError> {
        let mut state = self.state.lock().await;
        if state.client.is_some() || state.closed {
            return Err(ClientError::Precondition(
                "cannot remove sources after initialization".to_string(),
            ));
        }
        Ok(state.sources.remove(key))
    }

    /// Open the client on first call; later calls return the same client.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<DuckDbClient, ClientError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ClientError::Closed);
        }
        if let Some(client) = &state.client {
            return Ok(client.clone());
        }

        // Sources stay queued until a client exists so a failed init can be retried.
        let sources = state.sources.clone();
        let client = DuckDbClient::create(sources, self.options.clone()).await?;
        if !state.extensions_loaded {
            if let Err(err) = self.load_baseline_extensions(&client).await {
                if let Err(close_err) = client.close().await {
                    warn!(error = %close_err, "failed to close database after extension failure");
                }
                return Err(err);
            }
            state.extensions_loaded = true;
        }
        info!("database initialized");
        state.sources.clear();
        state.client = Some(client.clone());
        Ok(client)
    }

    async fn load_baseline_extensions(&self, client: &DuckDbClient) -> Result<(), ClientError> {
        for extension in &self.options.baseline_extensions {
            install_and_load(client, extension).await?;
        }
        Ok(())
    }

    /// The ready client.
    pub async fn client(&self) -> Result<DuckDbClient, ClientError> {
        self.state.lock().await.client.clone().ok_or(ClientError::Closed)
    }

    pub async fn is_ready(&self) -> bool {
        self.state.lock().await.client.is_some()
    }

    /// Install and load an extension on the ready client.
    pub async fn add_extension(&self, name: &str) -> Result<(), ClientError> {
        let client = self.client().await?;
        install_and_load(&client, name).await
    }

    /// Whether `name` is loaded. Any failure, including not being ready,
    /// reports `false`.
    pub async fn has_extension(&self, name: &str) -> bool {
        let Ok(client) = self.client().await else {
            return false;
        };
        let loaded = client
            .query_scalar(
                "SELECT count(*) FROM duckdb_extensions() WHERE extension_name = ? AND loaded",
                &[Value::from(name)],
            )
            .await;
        match loaded {
            Ok(count) => count.as_f64().is_some_and(|count| count > 0.0),
            Err(err) => {
                warn!(extension = name, error = %err, "extension check failed");
                false
            }
        }
    }

    /// Close the client, if any. The instance cannot be initialized again.
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.sources.clear();
        match state.client.take() {
            Some(client) => client.close().await,
            None => Ok(()),
        }
    }

    /// Tear this instance down and return a fresh, uninitialized one.
    pub async fn reset(self, options: OpenOptions) -> Database {
        if let Err(err) = self.close().await {
            warn!(error = %err, "failed to close database during reset");
        }
        Database::new(options)
    }
}

async fn install_and_load(client: &DuckDbClient, name: &str) -> Result<(), ClientError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ClientError::Precondition(format!(
            "invalid extension name {name:?}"
        )));
    }
    client
        .execute_batch(&[format!("INSTALL {name}"), format!("LOAD {name}")])
        .await?;
    info!(extension = name, "extension loaded");
    Ok(())
}
