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

// Backend factory for creating storage backends from configuration

use super::backend::StorageBackend;
use super::elasticsearch::ElasticsearchBackend;
use super::filesystem::FilesystemBackend;
use super::memory::MemoryBackend;
use crate::config::StorageEntryConfig;
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct BackendFactory;

impl BackendFactory {
    /// Create storage backend from configuration
    pub fn create(config: &StorageEntryConfig) -> Result<Arc<dyn StorageBackend>> {
        match config.backend.as_str() {
            "filesystem" => {
                let backend_config = config
                    .backend_config
                    .as_filesystem()
                    .ok_or_else(|| anyhow::anyhow!("Filesystem config missing"))?;

                let backend = FilesystemBackend::new(&config.name, backend_config.clone())?;
                Ok(Arc::new(backend))
            }

            "elasticsearch" => {
                let backend_config = config
                    .backend_config
                    .as_elasticsearch()
                    .ok_or_else(|| anyhow::anyhow!("Elasticsearch config missing"))?;

                let backend = ElasticsearchBackend::new(&config.name, backend_config.clone())?;
                Ok(Arc::new(backend))
            }

            "memory" => {
                let backend_config = config
                    .backend_config
                    .as_memory()
                    .ok_or_else(|| anyhow::anyhow!("Memory config missing"))?;

                Ok(Arc::new(MemoryBackend::from_config(&config.name, backend_config)))
            }

            unknown => bail!(
                "Unknown storage backend: '{}'. Supported: filesystem, elasticsearch, memory",
                unknown
            ),
        }
    }
}
