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

// Elasticsearch backend implementation

use super::backend::{with_retry, StorageBackend};
use crate::config::ElasticsearchConfig;
use crate::model::{ErrorRecord, Identified, Media, Place, Poll, RecordKind, Rule, Tweet, User};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dashmap::DashSet;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Indexes every record as a document, one index per record kind
pub struct ElasticsearchBackend {
    name: String,
    client: Client,
    base_url: String,
    credentials: Option<(String, Option<String>)>,
    max_retries: u32,
    // Rules never change once created, skip the ones already indexed
    known_rules: DashSet<String>,
}

impl ElasticsearchBackend {
    pub fn new(name: impl Into<String>, config: ElasticsearchConfig) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            name: name.into(),
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            credentials: config.user.map(|user| (user, config.password)),
            max_retries: config.max_retries,
            known_rules: DashSet::new(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, password.as_ref()),
            None => request,
        }
    }

    /// Index name used for a record kind
    pub fn index_name(kind: RecordKind) -> &'static str {
        match kind {
            RecordKind::Tweets => "tweet",
            RecordKind::Users => "user",
            RecordKind::Rules => "rule",
            RecordKind::Polls => "poll",
            RecordKind::Places => "place",
            RecordKind::Media => "media",
            RecordKind::MediaLink => "media_link",
            RecordKind::Error => "error",
            RecordKind::Bulk => "bulk",
        }
    }

    async fn bulk_index<T>(&self, kind: RecordKind, records: &[T]) -> Result<()>
    where
        T: Identified + Serialize + Sync,
    {
        if records.is_empty() {
            return Ok(());
        }
        let body = bulk_body(Self::index_name(kind), records)?;

        with_retry(
            &format!("Indexing {} {} into '{}'", records.len(), kind, self.name),
            self.max_retries,
            || self.send_bulk(body.clone()),
        )
        .await?;

        debug!("'{}' indexed {} {}", self.name, records.len(), kind);
        Ok(())
    }

    async fn send_bulk(&self, body: String) -> Result<()> {
        let url = format!("{}/_bulk?refresh=true", self.base_url);

        let response = self
            .authorized(self.client.post(&url))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("Failed to send bulk request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!(
                "Elasticsearch bulk request failed with status {}: {}",
                status,
                error_text
            );
        }

        let reply: serde_json::Value = response
            .json()
            .await
            .context("Failed to read bulk response")?;
        if reply["errors"].as_bool().unwrap_or(false) {
            bail!("Elasticsearch rejected some documents: {}", first_item_error(&reply));
        }

        Ok(())
    }
}

/// NDJSON body of a bulk request indexing `records` by id
fn bulk_body<T: Identified + Serialize>(index: &str, records: &[T]) -> Result<String> {
    let mut body = String::new();
    for record in records {
        let action = json!({ "index": { "_index": index, "_id": record.record_id() } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(
            &serde_json::to_string(record)
                .with_context(|| format!("Failed to serialize '{}'", record.record_id()))?,
        );
        body.push('\n');
    }
    Ok(body)
}

fn first_item_error(reply: &serde_json::Value) -> String {
    reply["items"]
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .find_map(|item| item["index"].get("error").map(|e| e.to_string()))
        })
        .unwrap_or_else(|| "unknown error".to_string())
}

#[async_trait]
impl StorageBackend for ElasticsearchBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend_type(&self) -> &str {
        "elasticsearch"
    }

    async fn initialize(&self) -> Result<()> {
        if self.health_check().await? {
            info!("Elasticsearch at '{}' is reachable", self.base_url);
            Ok(())
        } else {
            bail!("Elasticsearch at '{}' is not reachable", self.base_url)
        }
    }

    async fn save_tweets(&self, tweets: &[Tweet]) -> Result<()> {
        self.bulk_index(RecordKind::Tweets, tweets).await
    }

    async fn save_users(&self, users: &[User]) -> Result<()> {
        self.bulk_index(RecordKind::Users, users).await
    }

    async fn save_rules(&self, rules: &[Rule]) -> Result<()> {
        let to_save: Vec<Rule> = rules
            .iter()
            .filter(|r| !self.known_rules.contains(&r.id))
            .cloned()
            .collect();

        self.bulk_index(RecordKind::Rules, &to_save).await?;
        for rule in to_save {
            self.known_rules.insert(rule.id);
        }
        Ok(())
    }

    async fn save_polls(&self, polls: &[Poll]) -> Result<()> {
        self.bulk_index(RecordKind::Polls, polls).await
    }

    async fn save_places(&self, places: &[Place]) -> Result<()> {
        self.bulk_index(RecordKind::Places, places).await
    }

    async fn save_media(&self, media: &[Media]) -> Result<()> {
        self.bulk_index(RecordKind::Media, media).await
    }

    async fn save_error(&self, error: &ErrorRecord) -> Result<()> {
        self.bulk_index(RecordKind::Error, std::slice::from_ref(error))
            .await
    }

    fn has_free_space(&self) -> bool {
        true
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/_cluster/health", self.base_url);
        match self.authorized(self.client.get(&url)).send().await {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => {
                warn!("Health check failed with status: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Health check error: {}", e);
                Ok(false)
            }
        }
    }
}
