// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration types for tweet-fanout

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FanoutConfig {
    /// Name of the storage that receives errors and downloaded media
    pub main_storage: String,

    pub storages: Vec<StorageEntryConfig>,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FanoutConfig {
    pub fn storage(&self, name: &str) -> Option<&StorageEntryConfig> {
        self.storages.iter().find(|s| s.name == name)
    }
}

/// One storage destination and the tags it listens to
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageEntryConfig {
    pub name: String,

    /// Empty means the storage receives every batch
    #[serde(default)]
    pub tags: Vec<String>,

    /// Backend type: "filesystem", "elasticsearch", "memory"
    pub backend: String,

    /// Backend-specific configuration
    #[serde(flatten)]
    pub backend_config: BackendConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BackendConfig {
    Filesystem {
        #[serde(rename = "filesystem")]
        filesystem: FilesystemConfig,
    },
    Elasticsearch {
        #[serde(rename = "elasticsearch")]
        elasticsearch: ElasticsearchConfig,
    },
    Memory {
        #[serde(rename = "memory", default)]
        memory: MemoryConfig,
    },
}

impl BackendConfig {
    pub fn as_filesystem(&self) -> Option<&FilesystemConfig> {
        match self {
            BackendConfig::Filesystem { filesystem } => Some(filesystem),
            _ => None,
        }
    }

    pub fn as_elasticsearch(&self) -> Option<&ElasticsearchConfig> {
        match self {
            BackendConfig::Elasticsearch { elasticsearch } => Some(elasticsearch),
            _ => None,
        }
    }

    pub fn as_elasticsearch_mut(&mut self) -> Option<&mut ElasticsearchConfig> {
        match self {
            BackendConfig::Elasticsearch { elasticsearch } => Some(elasticsearch),
            _ => None,
        }
    }

    pub fn as_memory(&self) -> Option<&MemoryConfig> {
        match self {
            BackendConfig::Memory { memory } => Some(memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemConfig {
    pub base_path: String,

    /// Storage reports no free space once this many bytes were written
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            base_path: "/data/tweets".to_string(),
            max_size_bytes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElasticsearchConfig {
    pub url: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            user: None,
            password: None,
            timeout_seconds: default_timeout(),
            max_retries: default_retries(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MemoryConfig {
    /// Artificial latency added to every write
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

/// Media handling
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MediaConfig {
    /// Always forward media to the main storage, whatever its tags
    #[serde(default)]
    pub download_media: bool,

    /// Compute content signatures for image payloads before saving
    #[serde(default)]
    pub average_hash: bool,

    /// Maximum Hamming distance between two average hashes for the media to
    /// be reported as near duplicates. Unset means exact matches only.
    #[serde(default)]
    pub near_duplicate_threshold: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_timeout() -> u64 { 60 }
fn default_retries() -> u32 { 3 }
fn default_log_level() -> String { "info".to_string() }
