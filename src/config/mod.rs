// Configuration module for tweet-fanout
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<FanoutConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<FanoutConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Allow environment variables to override config values
pub fn apply_env_overrides(config: &mut FanoutConfig) -> Result<()> {
    if let Ok(main_storage) = std::env::var("FANOUT_MAIN_STORAGE") {
        config.main_storage = main_storage;
    }

    if let Ok(download) = std::env::var("FANOUT_DOWNLOAD_MEDIA") {
        config.media.download_media = download
            .parse()
            .with_context(|| format!("FANOUT_DOWNLOAD_MEDIA must be true or false, got '{}'", download))?;
    }

    if let Ok(password) = std::env::var("ELASTIC_PASSWORD") {
        for storage in &mut config.storages {
            if let Some(es_config) = storage.backend_config.as_elasticsearch_mut() {
                es_config.password = Some(password.clone());
            }
        }
    }

    // Overrides may have broken what the file got right
    ConfigLoader::validate(config)
}
