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

// Storage backend trait for record persistence

use crate::model::{Batch, ErrorRecord, Media, Place, Poll, RecordKind, Rule, Tweet, User};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::future::Future;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// Generic storage backend trait
///
/// This trait defines everything the storage manager needs from a
/// destination. Implementations decide how records are laid out; the manager
/// only decides which backends receive a batch.
///
/// Query operations are NOT part of this trait - users should query
/// backends directly using their specialized tools (Kibana, psql, etc.)
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Unique, human friendly name of this storage
    fn name(&self) -> &str;

    /// Get backend type identifier
    fn backend_type(&self) -> &str;

    /// Initialize the backend (create directories/indices if needed)
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn save_tweets(&self, tweets: &[Tweet]) -> Result<()>;

    async fn save_users(&self, users: &[User]) -> Result<()>;

    async fn save_rules(&self, rules: &[Rule]) -> Result<()>;

    async fn save_polls(&self, polls: &[Poll]) -> Result<()>;

    async fn save_places(&self, places: &[Place]) -> Result<()>;

    async fn save_media(&self, media: &[Media]) -> Result<()>;

    /// Save every kind present in the batch
    ///
    /// The default implementation saves kind by kind. Every kind is
    /// attempted even when an earlier one fails; the failures are reported
    /// together. Backends with a native bulk API should override it.
    async fn save_bulk(&self, batch: &Batch) -> Result<()> {
        let mut failures = Vec::new();
        for kind in batch.kinds() {
            let result = match kind {
                RecordKind::Tweets => self.save_tweets(batch.tweets.as_slice()).await,
                RecordKind::Users => self.save_users(batch.users.as_slice()).await,
                RecordKind::Rules => self.save_rules(batch.rules.as_slice()).await,
                RecordKind::Polls => self.save_polls(batch.polls.as_slice()).await,
                RecordKind::Places => self.save_places(batch.places.as_slice()).await,
                RecordKind::Media => self.save_media(batch.media.as_slice()).await,
                _ => Ok(()),
            };
            if let Err(e) = result {
                failures.push(format!("{}: {:#}", kind, e));
            }
        }

        if !failures.is_empty() {
            bail!("bulk save failed for {}", failures.join("; "));
        }
        Ok(())
    }

    async fn save_error(&self, error: &ErrorRecord) -> Result<()>;

    /// Record the association between a media key and its signatures
    ///
    /// Backends without a side index ignore it.
    async fn save_media_link(
        &self,
        _media_key: &str,
        _signature: &str,
        _average_signature: &str,
    ) -> Result<()> {
        Ok(())
    }

    /// Whether the backend can still accept writes
    fn has_free_space(&self) -> bool;

    /// Health check
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Run `operation` until it succeeds or `max_retries` retries are exhausted
///
/// Delays double from 100ms and are capped at 30 seconds.
pub async fn with_retry<T, F, Fut>(what: &str, max_retries: u32, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut delay = Duration::from_millis(100);

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!("{} succeeded after {} retries", what, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < max_retries => {
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    what,
                    attempt + 1,
                    max_retries,
                    e,
                    delay
                );
                sleep(delay).await;
                delay *= 2; // Exponential backoff
                delay = delay.min(Duration::from_secs(30));
                attempt += 1;
            }
            Err(e) => {
                error!("{} failed after {} attempts: {}", what, max_retries, e);
                return Err(e);
            }
        }
    }
}
