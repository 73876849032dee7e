// src/presigned.rs
//
// Adapter for stores that only offer signed single-object requests. Each part
// is staged as its own object under the target key's prefix, and completion
// commits a manifest of the staged parts at the target key with one signed PUT.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{etags_match, UploadBackend};
use crate::config::UploadSettings;
use crate::constants::MAX_OBJECT_KEY_LEN;
use crate::error::{Result, UploadError};
use crate::planner::PartPlan;
use crate::store::ObjectStoreClient;
use crate::types::{PartCompletion, UploadCompletion, UploadFinalization};

/// Objects larger than this are never read back as manifests.
const MAX_MANIFEST_SIZE: u64 = 4 * 1024 * 1024;

/// Hex digits of a synthesized upload id.
const UPLOAD_ID_LEN: usize = 32;

/// Bytes `staged_part_key` appends to the object key.
const STAGED_SUFFIX_LEN: usize = ".parts/".len() + UPLOAD_ID_LEN + "/".len() + 5;

/// Key a staged part is written to.
pub fn staged_part_key(object_key: &str, upload_id: &str, part_number: u32) -> String {
    format!("{object_key}.parts/{upload_id}/{part_number:05}")
}

/// One staged part recorded in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPart {
    pub part_number: u32,
    pub size: u64,
    pub etag: String,
    pub key: String,
}

/// Object committed at the target key when a presigned-only upload completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadManifest {
    pub object_key: String,
    pub upload_id: String,
    pub size: u64,
    pub parts: Vec<ManifestPart>,
}

impl UploadManifest {
    /// Manifest for a sorted completion.
    pub fn from_completion(completion: &UploadCompletion) -> Self {
        let parts = completion
            .parts
            .iter()
            .map(|p| ManifestPart {
                part_number: p.part_number,
                size: p.size,
                etag: p.etag.clone(),
                key: staged_part_key(&completion.object_key, &completion.upload_id, p.part_number),
            })
            .collect();
        Self {
            object_key: completion.object_key.clone(),
            upload_id: completion.upload_id.clone(),
            size: completion.total_size(),
            parts,
        }
    }

    /// Parse `data` as the manifest of `object_key`, if it is one.
    pub fn parse_for(object_key: &str, data: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(data)
            .ok()
            .filter(|m| m.object_key == object_key)
    }
}

#[derive(Clone)]
pub struct PresignedOnlyAdapter {
    store: Arc<dyn ObjectStoreClient>,
    settings: UploadSettings,
}

impl PresignedOnlyAdapter {
    pub fn new(store: Arc<dyn ObjectStoreClient>, settings: UploadSettings) -> Self {
        Self { store, settings }
    }

    /// Check that the staged object behind `part` exists with the reported
    /// size and etag.
    async fn verify_staged_part(&self, completion: &UploadCompletion, part: &PartCompletion) -> Result<()> {
        let key = staged_part_key(&completion.object_key, &completion.upload_id, part.part_number);
        let head = self
            .store
            .head_object(&key)
            .await
            .map_err(|e| UploadError::backend("head_object", &key, e))?;

        let reason = match head {
            None => format!("part {} was never uploaded", part.part_number),
            Some(h) if h.size != part.size => format!(
                "part {} is {} bytes in the store but {} bytes were reported",
                part.part_number, h.size, part.size
            ),
            Some(h) if !h.etag.as_deref().is_some_and(|etag| etags_match(etag, &part.etag)) => {
                format!("part {} etag does not match the stored object", part.part_number)
            }
            Some(_) => return Ok(()),
        };
        Err(UploadError::invalid_completion(&completion.object_key, &completion.upload_id, reason))
    }

    /// HEAD `object_key` and, when it is small enough to be a manifest, read
    /// and parse it.
    async fn load_committed(&self, object_key: &str) -> Result<Option<CommittedObject>> {
        let Some(head) = self
            .store
            .head_object(object_key)
            .await
            .map_err(|e| UploadError::backend("head_object", object_key, e))?
        else {
            return Ok(None);
        };

        let manifest = if head.size <= MAX_MANIFEST_SIZE {
            self.store
                .get_object(object_key)
                .await
                .map_err(|e| UploadError::backend("get_object", object_key, e))?
                .and_then(|data| UploadManifest::parse_for(object_key, &data))
        } else {
            None
        };
        Ok(Some(CommittedObject { size: head.size, manifest }))
    }

    /// A completion whose manifest is already committed must not succeed again.
    async fn ensure_not_completed(&self, completion: &UploadCompletion) -> Result<()> {
        let already = self
            .load_committed(&completion.object_key)
            .await?
            .and_then(|committed| committed.manifest)
            .is_some_and(|m| m.upload_id == completion.upload_id);
        if already {
            return Err(UploadError::backend(
                "complete_upload",
                &completion.object_key,
                anyhow!("upload {} is already completed", completion.upload_id),
            ));
        }
        Ok(())
    }
}

/// What currently sits at a target key.
struct CommittedObject {
    size: u64,
    manifest: Option<UploadManifest>,
}

#[async_trait]
impl UploadBackend for PresignedOnlyAdapter {
    fn name(&self) -> &'static str {
        "presigned-only"
    }

    fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Staged part keys must stay addressable too.
    fn max_object_key_len(&self) -> usize {
        MAX_OBJECT_KEY_LEN - STAGED_SUFFIX_LEN
    }

    async fn create_upload_id(&self, object_key: &str) -> Result<String> {
        // No store call: the id only namespaces this upload's staged parts.
        let upload_id = format!("{:0width$x}", rand::rng().random::<u128>(), width = UPLOAD_ID_LEN);
        debug!(bucket = self.store.bucket(), object_key, upload_id = %upload_id, "synthesized upload id");
        Ok(upload_id)
    }

    async fn presign_part_url(&self, object_key: &str, upload_id: &str, part: PartPlan) -> Result<String> {
        let key = staged_part_key(object_key, upload_id, part.part_number);
        self.store
            .presign_put_object(&key, part.size, self.settings.upload_duration)
            .await
            .map_err(|e| UploadError::backend("presign_put_object", object_key, e))
    }

    async fn complete(&self, completion: &UploadCompletion) -> Result<UploadFinalization> {
        self.ensure_not_completed(completion).await?;

        let checks: Vec<_> = completion
            .parts
            .iter()
            .map(|part| self.verify_staged_part(completion, part))
            .collect();
        stream::iter(checks)
            .buffer_unordered(self.settings.signing_concurrency)
            .try_collect::<Vec<()>>()
            .await
            .inspect_err(|e| warn!("rejecting completion: {e}"))?;

        let manifest = UploadManifest::from_completion(completion);
        let body = serde_json::to_string(&manifest)
            .map_err(|e| UploadError::backend("complete_upload", &completion.object_key, e))?;
        let complete_url = self
            .store
            .presign_put_object(&completion.object_key, body.len() as u64, self.settings.upload_duration)
            .await
            .map_err(|e| UploadError::backend("presign_put_object", &completion.object_key, e))?;
        Ok(UploadFinalization { complete_url, body })
    }

    async fn abort(&self, _object_key: &str, _upload_id: &str) -> Result<()> {
        // Staged parts are left to the bucket's lifecycle rules.
        Ok(())
    }

    async fn get_upload_size(&self, object_key: &str) -> Result<u64> {
        let committed = self
            .load_committed(object_key)
            .await?
            .ok_or_else(|| UploadError::ObjectNotFound {
                operation: "head_object",
                object_key: object_key.to_string(),
            })?;
        // A plain object at the key reports its own length.
        Ok(committed.manifest.map_or(committed.size, |m| m.size))
    }
}
