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

// Filesystem backend implementation

use super::backend::StorageBackend;
use crate::config::FilesystemConfig;
use crate::model::{ErrorRecord, Identified, Media, Place, Poll, RecordKind, Rule, Tweet, User};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Filesystem backend writing one JSON document per record
///
/// Layout: `{base_path}/{kind}/{id}.json`. Media payloads are written next to
/// their document as `{media_key}.{ext}`; media links live under
/// `{base_path}/media_link/`.
pub struct FilesystemBackend {
    name: String,
    base_path: PathBuf,
    max_size_bytes: Option<u64>,
    bytes_written: AtomicU64,
}

#[derive(Serialize)]
struct MediaLink<'a> {
    media_key: &'a str,
    signature: &'a str,
    average_signature: &'a str,
}

impl FilesystemBackend {
    pub fn new(name: impl Into<String>, config: FilesystemConfig) -> Result<Self> {
        let base_path = PathBuf::from(&config.base_path);

        info!(
            "Initializing filesystem backend at: {}",
            base_path.display()
        );

        Ok(Self {
            name: name.into(),
            base_path,
            max_size_bytes: config.max_size_bytes,
            bytes_written: AtomicU64::new(0),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Ensure base directory exists
    async fn ensure_base_directory(&self) -> Result<()> {
        if !self.base_path.exists() {
            info!("Creating base directory: {}", self.base_path.display());
            fs::create_dir_all(&self.base_path)
                .await
                .context("Failed to create base directory")?;
        }
        Ok(())
    }

    fn kind_dir(&self, kind: RecordKind) -> PathBuf {
        self.base_path.join(kind.as_str())
    }

    /// Get the document path for a record id
    pub fn document_path(&self, kind: RecordKind, id: &str) -> PathBuf {
        self.kind_dir(kind).join(format!("{}.json", id_to_file_stem(id)))
    }

    async fn ensure_kind_directory(&self, kind: RecordKind) -> Result<PathBuf> {
        let dir = self.kind_dir(kind);
        if !dir.exists() {
            debug!("Creating directory: {}", dir.display());
            fs::create_dir_all(&dir)
                .await
                .context("Failed to create record directory")?;
        }
        Ok(dir)
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut file = fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create file: {}", path.display()))?;

        file.write_all(data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        file.flush()
            .await
            .with_context(|| format!("Failed to flush {}", path.display()))?;

        self.bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn write_documents<T>(&self, kind: RecordKind, records: &[T]) -> Result<()>
    where
        T: Identified + Serialize + Sync,
    {
        if records.is_empty() {
            return Ok(());
        }
        self.ensure_kind_directory(kind).await?;

        for record in records {
            let json = serde_json::to_vec_pretty(record)
                .with_context(|| format!("Failed to serialize {} '{}'", kind, record.record_id()))?;
            self.write_file(&self.document_path(kind, record.record_id()), &json)
                .await?;
        }

        debug!(
            "'{}' wrote {} {} documents",
            self.name,
            records.len(),
            kind
        );
        Ok(())
    }
}

/// Turn a record id into a safe file stem
///
/// Ids made of ASCII letters, digits, `-` and `_` are kept as is. Other ids
/// get their unsafe characters replaced and a digest of the id appended after
/// a `.`, which never appears in a kept id.
pub fn id_to_file_stem(id: &str) -> String {
    let mut replaced = false;
    let stem: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                replaced = true;
                '_'
            }
        })
        .collect();

    if !replaced {
        return stem;
    }
    let digest = format!("{:x}", Sha256::digest(id.as_bytes()));
    format!("{}.{}", stem, &digest[..16])
}

fn payload_extension(payload: &[u8]) -> &'static str {
    image::guess_format(payload)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }

    async fn initialize(&self) -> Result<()> {
        self.ensure_base_directory().await
    }

    async fn save_tweets(&self, tweets: &[Tweet]) -> Result<()> {
        self.write_documents(RecordKind::Tweets, tweets).await
    }

    async fn save_users(&self, users: &[User]) -> Result<()> {
        self.write_documents(RecordKind::Users, users).await
    }

    async fn save_rules(&self, rules: &[Rule]) -> Result<()> {
        self.write_documents(RecordKind::Rules, rules).await
    }

    async fn save_polls(&self, polls: &[Poll]) -> Result<()> {
        self.write_documents(RecordKind::Polls, polls).await
    }

    async fn save_places(&self, places: &[Place]) -> Result<()> {
        self.write_documents(RecordKind::Places, places).await
    }

    async fn save_media(&self, media: &[Media]) -> Result<()> {
        self.write_documents(RecordKind::Media, media).await?;

        for item in media {
            if let Some(payload) = &item.payload {
                let path = self.kind_dir(RecordKind::Media).join(format!(
                    "{}.{}",
                    id_to_file_stem(&item.media_key),
                    payload_extension(payload)
                ));
                debug!("Writing {} bytes to {}", payload.len(), path.display());
                self.write_file(&path, payload).await?;
            }
        }
        Ok(())
    }

    async fn save_error(&self, error: &ErrorRecord) -> Result<()> {
        self.write_documents(RecordKind::Error, std::slice::from_ref(error))
            .await
    }

    async fn save_media_link(
        &self,
        media_key: &str,
        signature: &str,
        average_signature: &str,
    ) -> Result<()> {
        let dir = self.ensure_kind_directory(RecordKind::MediaLink).await?;
        let link = MediaLink {
            media_key,
            signature,
            average_signature,
        };
        let json = serde_json::to_vec_pretty(&link).context("Failed to serialize media link")?;
        self.write_file(&dir.join(format!("{}.json", id_to_file_stem(media_key))), &json)
            .await
    }

    fn has_free_space(&self) -> bool {
        match self.max_size_bytes {
            Some(max) => self.bytes_written() < max,
            None => true,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        // Check if base directory is accessible and writable
        match fs::metadata(&self.base_path).await {
            Ok(metadata) if metadata.is_dir() => {
                let test_file = self.base_path.join(".health_check_test");
                match fs::File::create(&test_file).await {
                    Ok(mut f) => {
                        if let Err(e) = f.write_all(b"test").await {
                            warn!("Health check failed - cannot write: {}", e);
                            return Ok(false);
                        }
                        let _ = fs::remove_file(&test_file).await;
                        Ok(true)
                    }
                    Err(e) => {
                        warn!("Health check failed - cannot create file: {}", e);
                        Ok(false)
                    }
                }
            }
            Ok(_) => {
                warn!(
                    "Health check failed - base path is not a directory: {}",
                    self.base_path.display()
                );
                Ok(false)
            }
            Err(e) => {
                warn!(
                    "Health check failed - cannot access base path {}: {}",
                    self.base_path.display(),
                    e
                );
                Ok(false)
            }
        }
    }
}
