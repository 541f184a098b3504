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

// Typed records, tag sets and batches handed to the storage manager

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Kind of a scheduled write
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Tweets,
    Users,
    Rules,
    Polls,
    Places,
    Media,
    MediaLink,
    Bulk,
    Error,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Tweets => "tweets",
            RecordKind::Users => "users",
            RecordKind::Rules => "rules",
            RecordKind::Polls => "polls",
            RecordKind::Places => "places",
            RecordKind::Media => "media",
            RecordKind::MediaLink => "media_link",
            RecordKind::Bulk => "bulk",
            RecordKind::Error => "error",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of subscription tags, kept sorted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty tag set subscribes to every batch
    pub fn is_wildcard(&self) -> bool {
        self.0.is_empty()
    }

    pub fn intersects(&self, other: &TagSet) -> bool {
        self.0.iter().any(|tag| other.0.contains(tag))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        self.0.insert(tag.into())
    }

    pub fn extend<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(tags.into_iter().map(Into::into));
    }

    pub fn remove_all(&mut self, tags: &TagSet) {
        self.0.retain(|tag| !tags.0.contains(tag));
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            return f.write_str("*");
        }
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{}", joined.join(","))
    }
}

/// Records carrying a stable identifier
pub trait Identified {
    fn record_id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub media_keys: Vec<String>,
    #[serde(default)]
    pub poll_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    /// Tags of the rules that matched this tweet
    #[serde(default)]
    pub rule_tags: Vec<String>,
}

impl Tweet {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            author_id: None,
            created_at: None,
            lang: None,
            conversation_id: None,
            media_keys: Vec::new(),
            poll_ids: Vec::new(),
            place_id: None,
            rule_tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verified: bool,
}

impl User {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            name: None,
            description: None,
            created_at: None,
            verified: false,
        }
    }
}

/// Collection rule; its tag is what storages subscribe to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub tag: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub position: u32,
    pub label: String,
    #[serde(default)]
    pub votes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    #[serde(default)]
    pub options: Vec<PollOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_datetime: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Photo,
    Video,
    AnimatedGif,
}

impl MediaType {
    /// Only photos are decoded for signatures; videos and gifs are stored as-is
    pub fn is_image(self) -> bool {
        matches!(self, MediaType::Photo)
    }
}

/// Media attached to a tweet
///
/// The binary payload is never serialized with the document; backends that
/// keep payloads write them separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub media_key: String,
    #[serde(default, rename = "type")]
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip)]
    pub payload: Option<Bytes>,
    /// SHA-256 digest of the payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_signature: Option<String>,
    /// Perceptual average hash of the decoded image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_signature: Option<String>,
    /// Key of an earlier media with a matching signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
}

impl Media {
    pub fn new(media_key: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            media_key: media_key.into(),
            media_type,
            url: None,
            payload: None,
            content_signature: None,
            average_signature: None,
            duplicate_of: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Operational error reported by a collector; only ever stored in main storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub source: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorRecord {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            message: message.into(),
            occurred_at: Utc::now(),
            details: None,
        }
    }
}

impl Identified for Tweet {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Identified for User {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Identified for Rule {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Identified for Poll {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Identified for Place {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Identified for Media {
    fn record_id(&self) -> &str {
        &self.media_key
    }
}

impl Identified for ErrorRecord {
    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Insertion-ordered records, unique by id
///
/// Inserting a record whose id is already present replaces it in place, so
/// the last write wins while the first position is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet<T> {
    items: Vec<T>,
    positions: HashMap<String, usize>,
}

impl<T> Default for RecordSet<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<T: Identified> RecordSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning the one it replaced
    pub fn insert(&mut self, record: T) -> Option<T> {
        match self.positions.get(record.record_id()) {
            Some(&index) => Some(std::mem::replace(&mut self.items[index], record)),
            None => {
                self.positions
                    .insert(record.record_id().to_string(), self.items.len());
                self.items.push(record);
                None
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.positions.get(id).map(|&index| &self.items[index])
    }
}

impl<T> RecordSet<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: Identified> FromIterator<T> for RecordSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = RecordSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

impl<T: Identified> Extend<T> for RecordSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for record in iter {
            self.insert(record);
        }
    }
}

impl<T: Serialize> Serialize for RecordSet<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de> + Identified> Deserialize<'de> for RecordSet<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        Ok(items.into_iter().collect())
    }
}

/// Records produced by a single collection event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(default)]
    pub tweets: RecordSet<Tweet>,
    #[serde(default)]
    pub users: RecordSet<User>,
    #[serde(default)]
    pub rules: RecordSet<Rule>,
    #[serde(default)]
    pub polls: RecordSet<Poll>,
    #[serde(default)]
    pub places: RecordSet<Place>,
    #[serde(default)]
    pub media: RecordSet<Media>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tweets(&mut self, tweets: impl IntoIterator<Item = Tweet>) -> &mut Self {
        self.tweets.extend(tweets);
        self
    }

    pub fn add_users(&mut self, users: impl IntoIterator<Item = User>) -> &mut Self {
        self.users.extend(users);
        self
    }

    pub fn add_rules(&mut self, rules: impl IntoIterator<Item = Rule>) -> &mut Self {
        self.rules.extend(rules);
        self
    }

    pub fn add_polls(&mut self, polls: impl IntoIterator<Item = Poll>) -> &mut Self {
        self.polls.extend(polls);
        self
    }

    pub fn add_places(&mut self, places: impl IntoIterator<Item = Place>) -> &mut Self {
        self.places.extend(places);
        self
    }

    pub fn add_media(&mut self, media: impl IntoIterator<Item = Media>) -> &mut Self {
        self.media.extend(media);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.kinds().is_empty()
    }

    /// Record kinds with at least one record, in a fixed order
    pub fn kinds(&self) -> Vec<RecordKind> {
        let mut kinds = Vec::new();
        if !self.tweets.is_empty() {
            kinds.push(RecordKind::Tweets);
        }
        if !self.users.is_empty() {
            kinds.push(RecordKind::Users);
        }
        if !self.rules.is_empty() {
            kinds.push(RecordKind::Rules);
        }
        if !self.polls.is_empty() {
            kinds.push(RecordKind::Polls);
        }
        if !self.places.is_empty() {
            kinds.push(RecordKind::Places);
        }
        if !self.media.is_empty() {
            kinds.push(RecordKind::Media);
        }
        kinds
    }

    pub fn record_count(&self) -> usize {
        self.tweets.len()
            + self.users.len()
            + self.rules.len()
            + self.polls.len()
            + self.places.len()
            + self.media.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_set_last_write_wins_keeps_position() {
        let mut tweets = RecordSet::new();
        tweets.insert(Tweet::new("1", "first"));
        tweets.insert(Tweet::new("2", "second"));
        let replaced = tweets.insert(Tweet::new("1", "updated"));

        assert_eq!(replaced.map(|t| t.text), Some("first".to_string()));
        assert_eq!(tweets.len(), 2);
        let texts: Vec<&str> = tweets.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["updated", "second"]);
    }

    #[test]
    fn test_tag_set_intersection_and_wildcard() {
        let news: TagSet = ["news", "politics"].into_iter().collect();
        let sports: TagSet = ["sports"].into_iter().collect();
        let query: TagSet = ["politics"].into_iter().collect();

        assert!(news.intersects(&query));
        assert!(!sports.intersects(&query));
        assert!(TagSet::new().is_wildcard());
        assert!(!TagSet::new().intersects(&query));
        assert_eq!(news.to_string(), "news,politics");
        assert_eq!(TagSet::new().to_string(), "*");
    }

    #[test]
    fn test_batch_kinds_and_json() {
        let json = r#"{
            "tweets": [{"id": "1", "text": "a"}, {"id": "1", "text": "b"}],
            "media": [{"media_key": "3_1", "type": "video"}]
        }"#;
        let batch: Batch = serde_json::from_str(json).unwrap();

        assert_eq!(batch.tweets.len(), 1);
        assert_eq!(batch.tweets.get("1").unwrap().text, "b");
        assert_eq!(batch.kinds(), vec![RecordKind::Tweets, RecordKind::Media]);
        assert_eq!(batch.media.get("3_1").unwrap().media_type, MediaType::Video);
        assert_eq!(batch.record_count(), 2);
    }

    #[test]
    fn test_media_payload_not_serialized() {
        let media = Media::new("3_9", MediaType::Photo).with_payload(vec![1u8, 2, 3]);
        let value = serde_json::to_value(&media).unwrap();
        assert!(value.get("payload").is_none());
        assert_eq!(value["type"], "photo");
    }
}
