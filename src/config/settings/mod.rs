
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;

pub const ENV_API_KEY: &str = "RAG_CHAT_API_KEY";
pub const ENV_BASE_URL: &str = "RAG_CHAT_BASE_URL";
pub const ENV_CHAT_MODEL: &str = "RAG_CHAT_MODEL";
pub const ENV_EMBEDDING_MODEL: &str = "RAG_CHAT_EMBEDDING_MODEL";
pub const ENV_DATABASE_URL: &str = "RAG_CHAT_DATABASE_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Connection settings for the OpenAI-compatible embedding and chat endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub batch_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            chat_model: "gpt-3.5-turbo".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout_seconds: 60,
            batch_size: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// LanceDB connection URI. Defaults to `<config dir>/vectors`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub table: String,
    pub embedding_dimension: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: None,
            table: "embeddings".to_string(),
            embedding_dimension: 1536,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Minimum similarity for chat retrieval. Deliberately low: the top-k cut does the work.
    pub threshold: f32,
    pub top_k: usize,
    /// Text placed ahead of the numbered references in the system message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_preamble: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            top_k: 5,
            system_preamble: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 2048)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid temperature: {0} (must be between 0 and 2)")]
    InvalidTemperature(f32),
    #[error("Invalid max tokens: {0} (must be greater than 0)")]
    InvalidMaxTokens(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 8192)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid table name: {0:?} (cannot be empty)")]
    InvalidTable(String),
    #[error("Invalid threshold: {0} (must be between -1 and 1)")]
    InvalidThreshold(f32),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid max chunk size: {0} (must be greater than 0)")]
    InvalidMaxChunkSize(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load `config.toml` from `config_dir`, apply environment overrides and validate.
    ///
    /// A missing file yields the defaults.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();
        config.apply_env_overrides();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Overlay the `RAG_CHAT_*` environment variables onto this configuration
    #[inline]
    pub fn apply_env_overrides(&mut self) {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(key) = read(ENV_API_KEY) {
            self.api.api_key = key;
        }
        if let Some(base_url) = read(ENV_BASE_URL) {
            self.api.base_url = base_url;
        }
        if let Some(model) = read(ENV_CHAT_MODEL) {
            self.api.chat_model = model;
        }
        if let Some(model) = read(ENV_EMBEDDING_MODEL) {
            self.api.embedding_model = model;
        }
        if let Some(uri) = read(ENV_DATABASE_URL) {
            self.store.uri = Some(uri);
        }
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Default configuration directory (`<platform config dir>/rag-chat`)
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("rag-chat"))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api.validate()?;
        self.validate_store_config()?;
        self.validate_retrieval_config()?;
        self.validate_chunking_config()?;

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        Ok(())
    }

    fn validate_store_config(&self) -> Result<(), ConfigError> {
        if self.store.table.trim().is_empty() {
            return Err(ConfigError::InvalidTable(self.store.table.clone()));
        }

        if !(1..=8192).contains(&self.store.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.store.embedding_dimension,
            ));
        }

        Ok(())
    }

    fn validate_retrieval_config(&self) -> Result<(), ConfigError> {
        let config = &self.retrieval;

        if !(-1.0..=1.0).contains(&config.threshold) {
            return Err(ConfigError::InvalidThreshold(config.threshold));
        }

        if !(1..=100).contains(&config.top_k) {
            return Err(ConfigError::InvalidTopK(config.top_k));
        }

        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        if self.chunking.max_chunk_size == 0 {
            return Err(ConfigError::InvalidMaxChunkSize(
                self.chunking.max_chunk_size,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Connection URI for the vector store
    #[inline]
    pub fn store_uri(&self) -> String {
        self.store.uri.clone().unwrap_or_else(|| {
            self.get_base_dir()
                .join("vectors")
                .to_string_lossy()
                .into_owned()
        })
    }
}

impl ApiConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }

        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.chat_model.clone()));
        }

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if !(1..=2048).contains(&self.batch_size) {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        Ok(())
    }

    /// Resolve an endpoint below `base_url`, keeping any path prefix such as `/v1`
    #[inline]
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, ConfigError> {
        let url_str = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    /// API key with everything but the last four characters hidden
    #[inline]
    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.is_empty() {
            return "(not set)".to_string();
        }
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let visible: String = chars.iter().skip(chars.len() - 4).collect();
        format!("{}{}", "*".repeat(chars.len() - 4), visible)
    }
}
