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

// Content signatures and near-duplicate detection for media payloads
//
// Signatures are metadata recorded next to the media. They never prevent a
// write: a false positive would silently drop a picture.

use crate::error::{StorageError, StorageResult};
use crate::model::Media;
use crate::storage::StorageBackend;
use anyhow::Result;
use image::imageops::{self, FilterType};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

const HASH_SIZE: u32 = 8;

/// Fingerprint of an image payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSignature {
    digest: String,
    average_hash: u64,
}

impl ContentSignature {
    /// SHA-256 of the raw payload, lowercase hex
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn average_hash(&self) -> u64 {
        self.average_hash
    }

    /// Average hash as 16 lowercase hex digits
    pub fn average_hex(&self) -> String {
        format!("{:016x}", self.average_hash)
    }

    /// Hamming distance between the two average hashes
    pub fn distance(&self, other: &ContentSignature) -> u32 {
        (self.average_hash ^ other.average_hash).count_ones()
    }
}

impl fmt::Display for ContentSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.average_hex())
    }
}

/// Compute the signature of an image payload
///
/// The average hash is built from an 8x8 grayscale thumbnail: one bit per
/// pixel, set when the pixel is brighter than the mean, row-major with the
/// first pixel in the most significant bit.
pub fn compute_signature(payload: &[u8]) -> StorageResult<ContentSignature> {
    let format = image::guess_format(payload).map_err(|e| StorageError::UnsupportedMedia {
        reason: e.to_string(),
    })?;
    let decoded = image::load_from_memory_with_format(payload, format).map_err(|e| {
        StorageError::UnsupportedMedia {
            reason: format!("cannot decode {:?} payload: {}", format, e),
        }
    })?;

    let thumbnail = imageops::resize(&decoded.to_luma8(), HASH_SIZE, HASH_SIZE, FilterType::Lanczos3);
    let pixels: Vec<u32> = thumbnail.pixels().map(|p| u32::from(p.0[0])).collect();
    let mean = pixels.iter().sum::<u32>() as f64 / pixels.len() as f64;

    let average_hash = pixels
        .iter()
        .fold(0u64, |hash, &p| (hash << 1) | u64::from(f64::from(p) > mean));

    Ok(ContentSignature {
        digest: format!("{:x}", Sha256::digest(payload)),
        average_hash,
    })
}

/// Media key to signature index, mirrored to a side-index backend
pub struct MediaDeduplicator {
    threshold: Option<u32>,
    known: RwLock<BTreeMap<String, ContentSignature>>,
    side_index: Arc<dyn StorageBackend>,
}

impl MediaDeduplicator {
    /// `threshold` is the largest Hamming distance still reported as a
    /// duplicate; `None` only reports identical average hashes.
    pub fn new(side_index: Arc<dyn StorageBackend>, threshold: Option<u32>) -> Self {
        Self {
            threshold,
            known: RwLock::new(BTreeMap::new()),
            side_index,
        }
    }

    pub fn side_index(&self) -> &Arc<dyn StorageBackend> {
        &self.side_index
    }

    pub fn compute_signature(&self, payload: &[u8]) -> StorageResult<ContentSignature> {
        compute_signature(payload)
    }

    /// Closest known media whose signature matches, ignoring `media_key` itself
    pub fn find_duplicate(&self, media_key: &str, signature: &ContentSignature) -> Option<String> {
        let max_distance = self.threshold.unwrap_or(0);
        let known = self.known.read().unwrap_or_else(|e| e.into_inner());

        known
            .iter()
            .filter(|(key, _)| key.as_str() != media_key)
            .map(|(key, other)| (signature.distance(other), key))
            .filter(|(distance, _)| *distance <= max_distance)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, key)| key.clone())
    }

    /// Remember the signature of `media_key` for later lookups
    pub fn remember(&self, media_key: &str, signature: &ContentSignature) {
        self.known
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(media_key.to_string(), signature.clone());
    }

    /// Write the link between `media_key` and its signature to the side index
    pub async fn persist_link(&self, media_key: &str, signature: &ContentSignature) -> Result<()> {
        self.side_index
            .save_media_link(media_key, signature.digest(), &signature.average_hex())
            .await
    }

    /// Remember the signature of `media_key` and persist the link
    pub async fn record_link(&self, media_key: &str, signature: &ContentSignature) -> Result<()> {
        self.remember(media_key, signature);
        self.persist_link(media_key, signature).await
    }

    pub fn known_links(&self) -> BTreeMap<String, ContentSignature> {
        self.known.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Sign an image payload and annotate the media with it
    ///
    /// The signature is remembered right away, so later media of the same
    /// batch are compared against it. Returns `None` for media that are not
    /// signed: no payload, not a photo, or a payload that doesn't decode as
    /// an image.
    pub fn annotate(&self, media: &mut Media) -> Option<ContentSignature> {
        if !media.media_type.is_image() {
            return None;
        }
        let payload = media.payload.as_ref()?;

        let signature = match compute_signature(payload) {
            Ok(signature) => signature,
            Err(e) => {
                debug!("Skipping signature for media '{}': {}", media.media_key, e);
                return None;
            }
        };

        media.content_signature = Some(signature.digest().to_string());
        media.average_signature = Some(signature.average_hex());

        media.duplicate_of = self.find_duplicate(&media.media_key, &signature);
        if let Some(original) = &media.duplicate_of {
            info!(
                "Media '{}' looks like a duplicate of '{}' (signature {})",
                media.media_key, original, signature
            );
        }
        self.remember(&media.media_key, &signature);

        Some(signature)
    }
}
