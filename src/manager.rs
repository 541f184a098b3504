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

// Single entry point used by collectors to persist what they collect

use crate::config::{ConfigLoader, FanoutConfig};
use crate::dedup::MediaDeduplicator;
use crate::dispatch::{DispatchEngine, PendingWrite, WritePayload};
use crate::error::{StorageError, StorageResult};
use crate::model::{
    Batch, ErrorRecord, Identified, Media, Place, Poll, RecordKind, RecordSet, Rule, TagSet,
    Tweet, User,
};
use crate::registry::TagRegistry;
use crate::storage::{BackendFactory, StorageBackend};
use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// Options of a [`StorageManager`]
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Always forward media to the main storage
    pub download_media: bool,
    /// Sign image payloads before saving them
    pub average_hash: bool,
    /// Hamming distance still reported as a near duplicate
    pub near_duplicate_threshold: Option<u32>,
}

/// Routes every save to the storages listening to its tags
///
/// Every `save_*` call returns one [`PendingWrite`] per scheduled write.
/// A failing storage only fails its own handles. Callers that drop the
/// handles can still observe failures through a failure sink.
pub struct StorageManager {
    registry: Arc<TagRegistry>,
    engine: DispatchEngine,
    dedup: Option<Arc<MediaDeduplicator>>,
}

impl StorageManager {
    /// Create a manager around `main_storage`, registered with `main_tags`
    pub fn new(main_storage: Arc<dyn StorageBackend>, main_tags: TagSet, options: ManagerOptions) -> Self {
        let registry = Arc::new(TagRegistry::new());
        // The registry is empty, registration cannot collide
        let _ = registry.register(Arc::clone(&main_storage), main_tags);

        let dedup = options.average_hash.then(|| {
            Arc::new(MediaDeduplicator::new(
                Arc::clone(&main_storage),
                options.near_duplicate_threshold,
            ))
        });

        Self {
            engine: DispatchEngine::new(Arc::clone(&registry), main_storage, options.download_media),
            registry,
            dedup,
        }
    }

    /// Build every configured storage, initialize it and register it
    pub async fn from_config(config: &FanoutConfig) -> Result<Self> {
        ConfigLoader::validate(config)?;

        let mut backends = Vec::with_capacity(config.storages.len());
        for entry in &config.storages {
            let backend = BackendFactory::create(entry)
                .with_context(|| format!("Failed to create storage '{}'", entry.name))?;
            backend
                .initialize()
                .await
                .with_context(|| format!("Failed to initialize storage '{}'", entry.name))?;
            let tags: TagSet = entry.tags.iter().cloned().collect();
            backends.push((backend, tags));
        }

        let main_index = backends
            .iter()
            .position(|(b, _)| b.name() == config.main_storage)
            .with_context(|| format!("main storage '{}' is not configured", config.main_storage))?;
        let (main_storage, main_tags) = backends.remove(main_index);

        let manager = Self::new(
            main_storage,
            main_tags,
            ManagerOptions {
                download_media: config.media.download_media,
                average_hash: config.media.average_hash,
                near_duplicate_threshold: config.media.near_duplicate_threshold,
            },
        );

        // Names are unique once validated
        for (backend, tags) in backends {
            manager.add_storage(backend, tags)?;
        }

        info!("Storage manager ready with {} storages", manager.registry.len());
        Ok(manager)
    }

    /// Also report every failed write on `sink`
    pub fn with_failure_sink(mut self, sink: UnboundedSender<StorageError>) -> Self {
        self.engine = self.engine.with_failure_sink(sink);
        self
    }

    pub fn main_storage(&self) -> &Arc<dyn StorageBackend> {
        self.engine.main_storage()
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    pub fn deduplicator(&self) -> Option<&MediaDeduplicator> {
        self.dedup.as_deref()
    }

    // Storage functions

    /// Add a storage listening to `tags` (all tags when empty)
    ///
    /// Names are unique: a second storage with a taken name is rejected.
    pub fn add_storage(&self, storage: Arc<dyn StorageBackend>, tags: TagSet) -> StorageResult<()> {
        self.registry.register(storage, tags).inspect_err(|e| {
            warn!("{}", e);
        })
    }

    pub fn remove_storages<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        self.registry.deregister(names)
    }

    /// The main storage still receives errors and downloaded media afterwards
    pub fn remove_all_storages(&self) {
        self.registry.deregister_all();
    }

    pub fn add_storage_tags(&self, name: &str, tags: &TagSet) -> StorageResult<()> {
        self.registry.add_tags(name, tags)
    }

    pub fn remove_storage_tags(&self, name: &str, tags: &TagSet) -> StorageResult<()> {
        self.registry.remove_tags(name, tags)
    }

    pub fn set_storage_tags(&self, name: &str, tags: TagSet) -> StorageResult<()> {
        self.registry.set_tags(name, tags)
    }

    pub fn remove_all_storage_tags(&self, name: &str) -> StorageResult<()> {
        self.registry.clear_tags(name)
    }

    pub fn get_storages(&self) -> Vec<Arc<dyn StorageBackend>> {
        self.registry.backends()
    }

    pub fn get_storages_listening_to_tags(&self, tags: &TagSet) -> Vec<Arc<dyn StorageBackend>> {
        self.registry.matching(tags)
    }

    // Saving functions

    fn dedup_by_id<T: Identified>(records: Vec<T>) -> Arc<[T]> {
        records.into_iter().collect::<RecordSet<T>>().into_vec().into()
    }

    pub fn save_tweets(&self, tweets: Vec<Tweet>, tags: &TagSet) -> Vec<PendingWrite> {
        self.engine
            .dispatch_payload(WritePayload::Tweets(Self::dedup_by_id(tweets)), tags)
    }

    pub fn save_users(&self, users: Vec<User>, tags: &TagSet) -> Vec<PendingWrite> {
        self.engine
            .dispatch_payload(WritePayload::Users(Self::dedup_by_id(users)), tags)
    }

    pub fn save_rules(&self, rules: Vec<Rule>, tags: &TagSet) -> Vec<PendingWrite> {
        self.engine
            .dispatch_payload(WritePayload::Rules(Self::dedup_by_id(rules)), tags)
    }

    pub fn save_polls(&self, polls: Vec<Poll>, tags: &TagSet) -> Vec<PendingWrite> {
        self.engine
            .dispatch_payload(WritePayload::Polls(Self::dedup_by_id(polls)), tags)
    }

    pub fn save_places(&self, places: Vec<Place>, tags: &TagSet) -> Vec<PendingWrite> {
        self.engine
            .dispatch_payload(WritePayload::Places(Self::dedup_by_id(places)), tags)
    }

    /// Save media, signing image payloads first when enabled
    ///
    /// Side-index link writes come after the storage writes in the result.
    pub fn save_media(&self, media: Vec<Media>, tags: &TagSet) -> Vec<PendingWrite> {
        let mut media: RecordSet<Media> = media.into_iter().collect();
        let links = self.sign_media(&mut media);

        let mut pending = self
            .engine
            .dispatch_payload(WritePayload::Media(media.into_vec().into()), tags);
        pending.extend(links);
        pending
    }

    /// Save a whole batch, one write per record kind and storage
    ///
    /// Kinds are written independently: a storage failing on tweets still
    /// receives the users, rules, polls, places and media of the batch.
    pub fn save_bulk(&self, mut batch: Batch, tags: &TagSet) -> Vec<PendingWrite> {
        let links = self.sign_media(&mut batch.media);

        let mut pending = Vec::new();
        for kind in batch.kinds() {
            pending.extend(self.engine.dispatch(&batch, kind, tags));
        }
        pending.extend(links);
        pending
    }

    /// Save a system error in the main storage only
    pub fn save_error(&self, error: ErrorRecord) -> PendingWrite {
        self.engine.dispatch_error(error)
    }

    fn sign_media(&self, media: &mut RecordSet<Media>) -> Vec<PendingWrite> {
        let Some(dedup) = &self.dedup else {
            return Vec::new();
        };

        let mut links = Vec::new();
        for item in media.iter_mut() {
            if let Some(signature) = dedup.annotate(item) {
                let side_index = dedup.side_index().name().to_string();
                let dedup = Arc::clone(dedup);
                let media_key = item.media_key.clone();
                links.push(self.engine.spawn_write(
                    &side_index,
                    RecordKind::MediaLink,
                    async move { dedup.persist_link(&media_key, &signature).await },
                ));
            }
        }
        links
    }

    // Reports

    /// Free space of the main storage and of every registered storage
    pub fn free_space_report(&self) -> Vec<(String, bool)> {
        let mut report = vec![(
            self.main_storage().name().to_string(),
            self.main_storage().has_free_space(),
        )];
        for storage in self.registry.backends() {
            if storage.name() != self.main_storage().name() {
                report.push((storage.name().to_string(), storage.has_free_space()));
            }
        }
        report
    }

    /// Health of every registered storage
    pub async fn health_report(&self) -> Vec<(String, bool)> {
        let mut report = Vec::new();
        for storage in self.registry.backends() {
            let healthy = match storage.health_check().await {
                Ok(healthy) => healthy,
                Err(e) => {
                    warn!("Health check of '{}' failed: {}", storage.name(), e);
                    false
                }
            };
            report.push((storage.name().to_string(), healthy));
        }
        report
    }
}

impl fmt::Display for StorageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tweets, users and rules stored at:")?;
        for (name, tags) in self.registry.subscriptions() {
            let marker = if name == self.main_storage().name() { " (main)" } else { "" };
            writeln!(f, "  - {}{} listening to [{}]", name, marker, tags)?;
        }
        if self.engine.download_media() {
            writeln!(f, "Media always stored at: {}", self.main_storage().name())?;
        }
        Ok(())
    }
}
