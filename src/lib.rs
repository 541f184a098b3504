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

// Storage fan-out for collected social-media records
//
// Collectors hand batches of tweets, users, rules, polls, places and media
// to a single storage manager, which:
// - Routes each batch to the storages subscribed to its tags
// - Writes to every matching storage concurrently, one handle per write
// - Keeps a failing storage from affecting the others
// - Always forwards media to the main storage when media download is on
// - Signs image payloads with content hashes for duplicate detection

pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod model;
pub mod registry;
pub mod storage;

// Re-export main types
pub use config::{load_config, load_config_with_env, FanoutConfig};
pub use dedup::{compute_signature, ContentSignature, MediaDeduplicator};
pub use dispatch::{join_all, DispatchEngine, PendingWrite, WriteOutcome, WritePayload};
pub use error::{StorageError, StorageResult};
pub use manager::{ManagerOptions, StorageManager};
pub use model::{
    Batch, ErrorRecord, Media, MediaType, Place, Poll, PollOption, RecordKind, RecordSet, Rule,
    TagSet, Tweet, User,
};
pub use registry::TagRegistry;
pub use storage::{BackendFactory, StorageBackend};
