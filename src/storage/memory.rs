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

// In-memory backend, used as an audit sink and in tests

use super::backend::StorageBackend;
use crate::config::MemoryConfig;
use crate::model::{
    ErrorRecord, Identified, Media, Place, Poll, RecordKind, Rule, Tweet, User,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct Contents {
    tweets: BTreeMap<String, Tweet>,
    users: BTreeMap<String, User>,
    rules: BTreeMap<String, Rule>,
    polls: BTreeMap<String, Poll>,
    places: BTreeMap<String, Place>,
    media: BTreeMap<String, Media>,
    errors: Vec<ErrorRecord>,
    links: BTreeMap<String, (String, String)>,
    calls: Vec<RecordKind>,
}

/// Keeps every record in memory, keyed by id
///
/// Failures can be injected per record kind and every write can be delayed,
/// which makes it possible to observe in-flight behavior.
pub struct MemoryBackend {
    name: String,
    contents: Mutex<Contents>,
    failing: Mutex<HashSet<RecordKind>>,
    delay: Option<Duration>,
    free_space: AtomicBool,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: Mutex::new(Contents::default()),
            failing: Mutex::new(HashSet::new()),
            delay: None,
            free_space: AtomicBool::new(true),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &MemoryConfig) -> Self {
        let backend = Self::new(name);
        match config.delay_ms {
            Some(ms) => backend.with_delay(Duration::from_millis(ms)),
            None => backend,
        }
    }

    /// Delay every write by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every subsequent write of `kind` fail
    pub fn fail_on(&self, kind: RecordKind) {
        self.lock_failing().insert(kind);
    }

    pub fn recover(&self, kind: RecordKind) {
        self.lock_failing().remove(&kind);
    }

    pub fn set_free_space(&self, free: bool) {
        self.free_space.store(free, Ordering::Relaxed);
    }

    fn lock(&self) -> MutexGuard<'_, Contents> {
        self.contents.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_failing(&self) -> MutexGuard<'_, HashSet<RecordKind>> {
        self.failing.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn begin(&self, kind: RecordKind) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.lock_failing().contains(&kind) {
            bail!("injected failure saving {} to '{}'", kind, self.name);
        }
        self.lock().calls.push(kind);
        Ok(())
    }

    fn store<T: Identified + Clone>(map: &mut BTreeMap<String, T>, records: &[T]) {
        for record in records {
            map.insert(record.record_id().to_string(), record.clone());
        }
    }

    pub fn tweets(&self) -> Vec<Tweet> {
        self.lock().tweets.values().cloned().collect()
    }

    pub fn users(&self) -> Vec<User> {
        self.lock().users.values().cloned().collect()
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.lock().rules.values().cloned().collect()
    }

    pub fn polls(&self) -> Vec<Poll> {
        self.lock().polls.values().cloned().collect()
    }

    pub fn places(&self) -> Vec<Place> {
        self.lock().places.values().cloned().collect()
    }

    pub fn media(&self) -> Vec<Media> {
        self.lock().media.values().cloned().collect()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.lock().errors.clone()
    }

    /// Media key to (signature, average signature)
    pub fn media_links(&self) -> BTreeMap<String, (String, String)> {
        self.lock().links.clone()
    }

    /// Successful write calls, in the order they were made
    pub fn calls(&self) -> Vec<RecordKind> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend_type(&self) -> &str {
        "memory"
    }

    async fn save_tweets(&self, tweets: &[Tweet]) -> Result<()> {
        self.begin(RecordKind::Tweets).await?;
        Self::store(&mut self.lock().tweets, tweets);
        debug!("'{}' stored {} tweets", self.name, tweets.len());
        Ok(())
    }

    async fn save_users(&self, users: &[User]) -> Result<()> {
        self.begin(RecordKind::Users).await?;
        Self::store(&mut self.lock().users, users);
        Ok(())
    }

    async fn save_rules(&self, rules: &[Rule]) -> Result<()> {
        self.begin(RecordKind::Rules).await?;
        Self::store(&mut self.lock().rules, rules);
        Ok(())
    }

    async fn save_polls(&self, polls: &[Poll]) -> Result<()> {
        self.begin(RecordKind::Polls).await?;
        Self::store(&mut self.lock().polls, polls);
        Ok(())
    }

    async fn save_places(&self, places: &[Place]) -> Result<()> {
        self.begin(RecordKind::Places).await?;
        Self::store(&mut self.lock().places, places);
        Ok(())
    }

    async fn save_media(&self, media: &[Media]) -> Result<()> {
        self.begin(RecordKind::Media).await?;
        Self::store(&mut self.lock().media, media);
        Ok(())
    }

    async fn save_error(&self, error: &ErrorRecord) -> Result<()> {
        self.begin(RecordKind::Error).await?;
        self.lock().errors.push(error.clone());
        Ok(())
    }

    async fn save_media_link(
        &self,
        media_key: &str,
        signature: &str,
        average_signature: &str,
    ) -> Result<()> {
        self.begin(RecordKind::MediaLink).await?;
        self.lock().links.insert(
            media_key.to_string(),
            (signature.to_string(), average_signature.to_string()),
        );
        Ok(())
    }

    fn has_free_space(&self) -> bool {
        self.free_space.load(Ordering::Relaxed)
    }
}
