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

// Error taxonomy for the fan-out core

use crate::model::RecordKind;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the registry, the dispatcher and the media signature path.
///
/// Registry errors (`DuplicateName`, `UnknownBackend`) are returned by the
/// mutating call itself. Write errors only ever surface through the
/// [`PendingWrite`](crate::dispatch::PendingWrite) of the failing operation.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("storage name must be unique: '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("unknown storage backend: '{name}'")]
    UnknownBackend { name: String },

    #[error("backend '{backend}' failed to save {kind}: {cause:#}")]
    BackendWrite {
        backend: String,
        kind: RecordKind,
        cause: Arc<anyhow::Error>,
    },

    #[error("write of {kind} to backend '{backend}' was aborted before completion")]
    Aborted { backend: String, kind: RecordKind },

    #[error("unsupported media payload: {reason}")]
    UnsupportedMedia { reason: String },
}

impl StorageError {
    pub fn backend_write(backend: &str, kind: RecordKind, cause: anyhow::Error) -> Self {
        StorageError::BackendWrite {
            backend: backend.to_string(),
            kind,
            cause: Arc::new(cause),
        }
    }

    /// Name of the backend the error is attributed to, if any
    pub fn backend(&self) -> Option<&str> {
        match self {
            StorageError::DuplicateName { name } | StorageError::UnknownBackend { name } => {
                Some(name)
            }
            StorageError::BackendWrite { backend, .. } | StorageError::Aborted { backend, .. } => {
                Some(backend)
            }
            StorageError::UnsupportedMedia { .. } => None,
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
