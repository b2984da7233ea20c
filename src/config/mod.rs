// Configuration management module
// TOML file in the config directory, overlaid with RAG_CHAT_* environment variables

pub mod settings;

pub use settings::{
    ApiConfig, Config, ConfigError, RetrievalConfig, ServerConfig, StoreConfig,
};

/// Get the configuration directory path.
///
/// `RAG_CHAT_CONFIG_DIR` takes precedence over the platform default.
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    match std::env::var_os("RAG_CHAT_CONFIG_DIR") {
        Some(dir) if !dir.is_empty() => Ok(dir.into()),
        _ => Config::config_dir(),
    }
}
