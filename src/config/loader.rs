// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<FanoutConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from YAML text
    pub fn parse(content: &str) -> Result<FanoutConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: FanoutConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${ES_URL:-http://localhost:9200} -> http://localhost:9200 (if ES_URL not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid substitution pattern")?;

        let substituted = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str());

            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    // Keep original if no default and var not found
                    None => format!("${{{}}}", var_name),
                },
            }
        });

        Ok(substituted.into_owned())
    }

    /// Validate configuration
    pub fn validate(config: &FanoutConfig) -> Result<()> {
        if config.storages.is_empty() {
            bail!("at least one storage must be configured");
        }

        let mut seen = HashSet::new();
        for storage in &config.storages {
            if storage.name.is_empty() {
                bail!("storage name cannot be empty");
            }
            if !seen.insert(storage.name.as_str()) {
                bail!("storage name must be unique: '{}' is used twice", storage.name);
            }

            let section_present = match storage.backend.as_str() {
                "filesystem" => storage.backend_config.as_filesystem().is_some(),
                "elasticsearch" => storage.backend_config.as_elasticsearch().is_some(),
                "memory" => storage.backend_config.as_memory().is_some(),
                "postgres" | "ssh" => bail!(
                    "{} backend selected for storage '{}' is not available in this build; use filesystem, elasticsearch or memory",
                    storage.backend,
                    storage.name
                ),
                unknown => bail!(
                    "Unknown backend '{}' for storage '{}'. Supported: filesystem, elasticsearch, memory",
                    unknown,
                    storage.name
                ),
            };
            if !section_present {
                bail!(
                    "{} backend selected for storage '{}' but {} config missing",
                    storage.backend,
                    storage.name,
                    storage.backend
                );
            }
        }

        if config.main_storage.is_empty() {
            bail!("main_storage cannot be empty");
        }

        if config.storage(&config.main_storage).is_none() {
            bail!(
                "main_storage '{}' does not name a configured storage",
                config.main_storage
            );
        }

        if config.media.near_duplicate_threshold.is_some_and(|t| t > 64) {
            bail!("media.near_duplicate_threshold must be 0-64");
        }

        Ok(())
    }
}
