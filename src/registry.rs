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

// Tag subscriptions of the registered storages

use crate::error::{StorageError, StorageResult};
use crate::model::TagSet;
use crate::storage::StorageBackend;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

struct Registration {
    backend: Arc<dyn StorageBackend>,
    tags: TagSet,
}

/// Registered storages with the tags they listen to
///
/// Storages are kept in registration order, which is also the order
/// [`TagRegistry::matching`] returns them in. A storage with no tags listens
/// to everything.
#[derive(Default)]
pub struct TagRegistry {
    entries: RwLock<Vec<Registration>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a writer panicked between two pushes; the
    // vector itself is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Registration>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Registration>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a storage; the first storage registered under a name wins
    pub fn register(&self, backend: Arc<dyn StorageBackend>, tags: TagSet) -> StorageResult<()> {
        let mut entries = self.write();
        let name = backend.name().to_string();
        if entries.iter().any(|e| e.backend.name() == name) {
            return Err(StorageError::DuplicateName { name });
        }

        info!(
            "Registered storage '{}' ({}) listening to [{}]",
            name,
            backend.backend_type(),
            tags
        );
        entries.push(Registration { backend, tags });
        Ok(())
    }

    /// Remove storages by name, returning the names actually removed
    pub fn deregister<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        let mut entries = self.write();
        let mut removed = Vec::new();
        entries.retain(|e| {
            let name = e.backend.name();
            if names.iter().any(|n| n.as_ref() == name) {
                removed.push(name.to_string());
                false
            } else {
                true
            }
        });

        if !removed.is_empty() {
            info!("Removed storages: {:?}", removed);
        }
        removed
    }

    pub fn deregister_all(&self) {
        let mut entries = self.write();
        info!("Removing all {} storages", entries.len());
        entries.clear();
    }

    fn update_tags<F>(&self, name: &str, update: F) -> StorageResult<()>
    where
        F: FnOnce(&mut TagSet),
    {
        let mut entries = self.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.backend.name() == name)
            .ok_or_else(|| StorageError::UnknownBackend {
                name: name.to_string(),
            })?;

        update(&mut entry.tags);
        debug!("Storage '{}' now listens to [{}]", name, entry.tags);
        Ok(())
    }

    pub fn add_tags(&self, name: &str, tags: &TagSet) -> StorageResult<()> {
        self.update_tags(name, |current| current.extend(tags.iter()))
    }

    pub fn remove_tags(&self, name: &str, tags: &TagSet) -> StorageResult<()> {
        self.update_tags(name, |current| current.remove_all(tags))
    }

    pub fn set_tags(&self, name: &str, tags: TagSet) -> StorageResult<()> {
        self.update_tags(name, |current| *current = tags)
    }

    /// Turn a storage back into a wildcard listener
    pub fn clear_tags(&self, name: &str) -> StorageResult<()> {
        self.update_tags(name, TagSet::clear)
    }

    /// Storages listening to at least one of `tags`, plus every wildcard storage
    ///
    /// The result is a snapshot: later registry changes don't affect it.
    pub fn matching(&self, tags: &TagSet) -> Vec<Arc<dyn StorageBackend>> {
        self.read()
            .iter()
            .filter(|e| e.tags.is_wildcard() || e.tags.intersects(tags))
            .map(|e| Arc::clone(&e.backend))
            .collect()
    }

    pub fn tags_of(&self, name: &str) -> Option<TagSet> {
        self.read()
            .iter()
            .find(|e| e.backend.name() == name)
            .map(|e| e.tags.clone())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageBackend>> {
        self.read()
            .iter()
            .find(|e| e.backend.name() == name)
            .map(|e| Arc::clone(&e.backend))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().iter().any(|e| e.backend.name() == name)
    }

    /// All storages in registration order
    pub fn backends(&self) -> Vec<Arc<dyn StorageBackend>> {
        self.read().iter().map(|e| Arc::clone(&e.backend)).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.read()
            .iter()
            .map(|e| e.backend.name().to_string())
            .collect()
    }

    /// Names with their tag sets, in registration order
    pub fn subscriptions(&self) -> Vec<(String, TagSet)> {
        self.read()
            .iter()
            .map(|e| (e.backend.name().to_string(), e.tags.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
