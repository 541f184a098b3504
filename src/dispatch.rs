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

// Concurrent dispatch of record writes to the matching storages

use crate::error::{StorageError, StorageResult};
use crate::model::{Batch, ErrorRecord, Media, Place, Poll, RecordKind, Rule, TagSet, Tweet, User};
use crate::registry::TagRegistry;
use crate::storage::StorageBackend;
use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn, Instrument};

/// Records of one kind, shared by every task writing them
#[derive(Debug, Clone)]
pub enum WritePayload {
    Tweets(Arc<[Tweet]>),
    Users(Arc<[User]>),
    Rules(Arc<[Rule]>),
    Polls(Arc<[Poll]>),
    Places(Arc<[Place]>),
    Media(Arc<[Media]>),
    Bulk(Arc<Batch>),
    Error(Arc<ErrorRecord>),
}

impl WritePayload {
    /// Extract the records of `kind` from a batch
    ///
    /// Errors and media links are not part of a batch.
    pub fn from_batch(batch: &Batch, kind: RecordKind) -> Option<Self> {
        let payload = match kind {
            RecordKind::Tweets => WritePayload::Tweets(batch.tweets.as_slice().into()),
            RecordKind::Users => WritePayload::Users(batch.users.as_slice().into()),
            RecordKind::Rules => WritePayload::Rules(batch.rules.as_slice().into()),
            RecordKind::Polls => WritePayload::Polls(batch.polls.as_slice().into()),
            RecordKind::Places => WritePayload::Places(batch.places.as_slice().into()),
            RecordKind::Media => WritePayload::Media(batch.media.as_slice().into()),
            RecordKind::Bulk => WritePayload::Bulk(Arc::new(batch.clone())),
            RecordKind::Error | RecordKind::MediaLink => return None,
        };
        Some(payload)
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            WritePayload::Tweets(_) => RecordKind::Tweets,
            WritePayload::Users(_) => RecordKind::Users,
            WritePayload::Rules(_) => RecordKind::Rules,
            WritePayload::Polls(_) => RecordKind::Polls,
            WritePayload::Places(_) => RecordKind::Places,
            WritePayload::Media(_) => RecordKind::Media,
            WritePayload::Bulk(_) => RecordKind::Bulk,
            WritePayload::Error(_) => RecordKind::Error,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WritePayload::Tweets(r) => r.len(),
            WritePayload::Users(r) => r.len(),
            WritePayload::Rules(r) => r.len(),
            WritePayload::Polls(r) => r.len(),
            WritePayload::Places(r) => r.len(),
            WritePayload::Media(r) => r.len(),
            WritePayload::Bulk(batch) => batch.record_count(),
            WritePayload::Error(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Media the main storage must receive when media download is on
    fn downloadable_media(&self) -> Option<Arc<[Media]>> {
        match self {
            WritePayload::Media(media) if !media.is_empty() => Some(Arc::clone(media)),
            WritePayload::Bulk(batch) if !batch.media.is_empty() => {
                Some(batch.media.as_slice().into())
            }
            _ => None,
        }
    }

    async fn apply(&self, backend: &dyn StorageBackend) -> Result<()> {
        match self {
            WritePayload::Tweets(tweets) => backend.save_tweets(tweets).await,
            WritePayload::Users(users) => backend.save_users(users).await,
            WritePayload::Rules(rules) => backend.save_rules(rules).await,
            WritePayload::Polls(polls) => backend.save_polls(polls).await,
            WritePayload::Places(places) => backend.save_places(places).await,
            WritePayload::Media(media) => backend.save_media(media).await,
            WritePayload::Bulk(batch) => backend.save_bulk(batch).await,
            WritePayload::Error(error) => backend.save_error(error).await,
        }
    }
}

/// Handle on one scheduled write to one storage
///
/// Dropping the handle does not cancel the write; [`PendingWrite::abort`] does.
#[derive(Debug)]
pub struct PendingWrite {
    backend: String,
    kind: RecordKind,
    handle: JoinHandle<StorageResult<()>>,
}

impl PendingWrite {
    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abandon the write; storages already written to are not rolled back
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the write to land
    ///
    /// A write cancelled through [`PendingWrite::abort`] reports `Aborted`.
    pub async fn wait(self) -> StorageResult<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Aborted {
                backend: self.backend,
                kind: self.kind,
            }),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Result of one write, once it landed
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub backend: String,
    pub kind: RecordKind,
    pub result: StorageResult<()>,
}

impl WriteOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Wait for every write, in the order the handles were given
pub async fn join_all(pending: Vec<PendingWrite>) -> Vec<WriteOutcome> {
    let mut outcomes = Vec::with_capacity(pending.len());
    for write in pending {
        let backend = write.backend.clone();
        let kind = write.kind;
        let result = write.wait().await;
        outcomes.push(WriteOutcome {
            backend,
            kind,
            result,
        });
    }
    outcomes
}

/// Schedules writes on the storages whose tags match a batch
pub struct DispatchEngine {
    registry: Arc<TagRegistry>,
    main_storage: Arc<dyn StorageBackend>,
    download_media: bool,
    failures: Option<UnboundedSender<StorageError>>,
}

impl DispatchEngine {
    pub fn new(
        registry: Arc<TagRegistry>,
        main_storage: Arc<dyn StorageBackend>,
        download_media: bool,
    ) -> Self {
        Self {
            registry,
            main_storage,
            download_media,
            failures: None,
        }
    }

    /// Also report every failed write on `sink`
    pub fn with_failure_sink(mut self, sink: UnboundedSender<StorageError>) -> Self {
        self.failures = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.registry
    }

    pub fn main_storage(&self) -> &Arc<dyn StorageBackend> {
        &self.main_storage
    }

    pub fn download_media(&self) -> bool {
        self.download_media
    }

    /// Schedule the records of `kind` in `batch` on every storage matching `tags`
    pub fn dispatch(&self, batch: &Batch, kind: RecordKind, tags: &TagSet) -> Vec<PendingWrite> {
        match WritePayload::from_batch(batch, kind) {
            Some(payload) => self.dispatch_payload(payload, tags),
            None => {
                warn!("{} records are not routed by tags", kind);
                Vec::new()
            }
        }
    }

    /// Schedule `payload` on every storage matching `tags`
    ///
    /// Returns as soon as the writes are spawned. When media download is on
    /// and the main storage is not among the matches, the media are also
    /// written to the main storage.
    pub fn dispatch_payload(&self, payload: WritePayload, tags: &TagSet) -> Vec<PendingWrite> {
        let matched = self.registry.matching(tags);
        let main_matched = matched
            .iter()
            .any(|b| b.name() == self.main_storage.name());

        let mut pending = Vec::with_capacity(matched.len() + 1);
        for backend in matched {
            pending.push(self.spawn_payload(backend, payload.clone()));
        }

        if !main_matched && self.download_media {
            if let Some(media) = payload.downloadable_media() {
                debug!(
                    "Forwarding {} media to main storage '{}'",
                    media.len(),
                    self.main_storage.name()
                );
                pending.push(self.spawn_payload(
                    Arc::clone(&self.main_storage),
                    WritePayload::Media(media),
                ));
            }
        }

        debug!(
            "Dispatched {} {} records tagged [{}] to {} storages",
            payload.len(),
            payload.kind(),
            tags,
            pending.len()
        );
        pending
    }

    /// Errors are telemetry: they only ever go to the main storage
    pub fn dispatch_error(&self, error: ErrorRecord) -> PendingWrite {
        self.spawn_payload(
            Arc::clone(&self.main_storage),
            WritePayload::Error(Arc::new(error)),
        )
    }

    fn spawn_payload(&self, backend: Arc<dyn StorageBackend>, payload: WritePayload) -> PendingWrite {
        let name = backend.name().to_string();
        let kind = payload.kind();
        self.spawn_write(&name, kind, async move { payload.apply(backend.as_ref()).await })
    }

    /// Run `write` in its own task, attributing failures to `backend`
    pub fn spawn_write<F>(&self, backend: &str, kind: RecordKind, write: F) -> PendingWrite
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let failures = self.failures.clone();
        let task_backend = backend.to_string();
        let span = tracing::debug_span!("storage_write", backend = %backend, kind = %kind);

        let handle = tokio::spawn(
            async move {
                let result = match AssertUnwindSafe(write).catch_unwind().await {
                    Ok(result) => {
                        result.map_err(|e| StorageError::backend_write(&task_backend, kind, e))
                    }
                    Err(panic) => {
                        error!(
                            "Write of {} to '{}' panicked: {}",
                            kind,
                            task_backend,
                            panic_message(panic.as_ref())
                        );
                        Err(StorageError::Aborted {
                            backend: task_backend.clone(),
                            kind,
                        })
                    }
                };

                if let Err(err) = &result {
                    error!("{}", err);
                    if let Some(sink) = failures {
                        // Nobody listening any more is fine
                        let _ = sink.send(err.clone());
                    }
                }
                result
            }
            .instrument(span),
        );

        PendingWrite {
            backend: backend.to_string(),
            kind,
            handle,
        }
    }
}
