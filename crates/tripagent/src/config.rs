use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tripagent_core::{
    CacheUpdater, ConversationManager, ConversationManagerBuilder,
    TripContextCache,
};
use tripagent_http_transport::{HttpTransport, HttpTransportConfigBuilder};

use crate::storage::FileStorage;

const BASE_URL_VAR: &str = "TRIPAGENT_BASE_URL";
const API_KEY_VAR: &str = "TRIPAGENT_API_KEY";
const DATA_DIR_VAR: &str = "TRIPAGENT_DATA_DIR";
const DEFAULT_DATA_DIR: &str = ".tripagent";

/// Errors in the application configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("{0} environment variable is not set")]
    MissingVar(&'static str),
}

/// Settings of the application, read from the environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Where the chat backend lives.
    pub base_url: String,
    /// Bearer token for the backend, if it needs one.
    pub api_key: Option<String>,
    /// Directory holding the conversation files.
    pub data_dir: PathBuf,
}

impl AppConfig {
    /// Reads `TRIPAGENT_BASE_URL`, `TRIPAGENT_API_KEY` and
    /// `TRIPAGENT_DATA_DIR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env::var(BASE_URL_VAR)
            .map_err(|_| ConfigError::MissingVar(BASE_URL_VAR))?;
        let api_key = env::var(API_KEY_VAR).ok();
        let data_dir = env::var_os(DATA_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        Ok(Self {
            base_url,
            api_key,
            data_dir,
        })
    }

    /// Builds a manager talking to the configured backend and storing
    /// conversations under the data directory. Trip context learned from
    /// responses is collected in `cache`.
    ///
    /// Must be called within a tokio runtime.
    pub fn build_manager(
        &self,
        cache: Arc<TripContextCache>,
    ) -> ConversationManager {
        let mut transport_config =
            HttpTransportConfigBuilder::with_base_url(self.base_url.as_str());
        if let Some(api_key) = &self.api_key {
            transport_config = transport_config.with_api_key(api_key.as_str());
        }
        let transport = HttpTransport::new(transport_config.build());
        debug!("using {transport:?}");

        ConversationManagerBuilder::with_transport(transport)
            .with_storage(FileStorage::new(self.data_dir.join("conversations")))
            .with_cache_updater(cache as Arc<dyn CacheUpdater>)
            .build()
    }
}
