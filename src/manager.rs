// src/manager.rs
//
// The backend-agnostic entry point. A `MultipartManager` is picked once from
// the storage configuration and then drives the planner and one adapter for
// every upload.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument, warn};

use crate::backend::{check_completion, sort_parts, UploadBackend};
use crate::config::{StorageConfig, StorageKind, UploadSettings};
use crate::constants::{MAX_OBJECT_KEY_LEN, TEST_UPLOAD_KEY};
use crate::error::{Result, UploadError};
use crate::native::NativeMultipartAdapter;
use crate::planner::{self, PartPlan};
use crate::presigned::PresignedOnlyAdapter;
use crate::store::{ObjectStoreClient, S3StoreClient};
use crate::types::{
    PartInitialization, UploadCompletion, UploadFinalization, UploadInitialization, UploadState,
};

/// Multipart upload manager for one configured store.
#[derive(Clone)]
pub enum MultipartManager {
    NativeMultipart(NativeMultipartAdapter),
    PresignedOnly(PresignedOnlyAdapter),
}

impl std::fmt::Debug for MultipartManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MultipartManager").field(&self.backend().name()).finish()
    }
}

impl MultipartManager {
    /// Whether direct uploads are possible against `cfg`'s store.
    pub fn supported(cfg: &StorageConfig) -> bool {
        Self::supports_kind(cfg.kind)
    }

    fn supports_kind(kind: StorageKind) -> bool {
        matches!(kind, StorageKind::Aws | StorageKind::Minio)
    }

    /// Build the manager for `cfg`, connecting an SDK client to its store.
    pub async fn from_storage(cfg: &StorageConfig) -> Result<Self> {
        if !Self::supported(cfg) {
            return Err(UploadError::UnsupportedBackend { kind: cfg.kind });
        }
        cfg.validate().map_err(UploadError::Config)?;

        let store = S3StoreClient::from_config(cfg).await.map_err(UploadError::Config)?;
        Self::with_client(cfg.kind, cfg.upload, Arc::new(store))
    }

    /// Build the manager for a `kind` store reached through `store`.
    pub fn with_client(
        kind: StorageKind,
        settings: UploadSettings,
        store: Arc<dyn ObjectStoreClient>,
    ) -> Result<Self> {
        let manager = match kind {
            StorageKind::Aws => Self::NativeMultipart(NativeMultipartAdapter::new(store, settings)),
            StorageKind::Minio => Self::PresignedOnly(PresignedOnlyAdapter::new(store, settings)),
            StorageKind::Filesystem => return Err(UploadError::UnsupportedBackend { kind }),
        };
        debug!("using {} uploads for {} storage", manager.backend().name(), kind);
        Ok(manager)
    }

    pub fn backend(&self) -> &dyn UploadBackend {
        match self {
            Self::NativeMultipart(adapter) => adapter,
            Self::PresignedOnly(adapter) => adapter,
        }
    }

    pub fn settings(&self) -> &UploadSettings {
        self.backend().settings()
    }

    /// Plan the upload of `file_size` bytes to `object_key` and sign one URL
    /// per part. `requested_part_size` falls back to the configured default.
    #[instrument(skip(self), fields(backend = self.backend().name()))]
    pub async fn initialize_upload(
        &self,
        object_key: &str,
        file_size: u64,
        requested_part_size: Option<u64>,
    ) -> Result<UploadInitialization> {
        let backend = self.backend();
        check_object_key(object_key, backend.max_object_key_len())?;
        let settings = self.settings();
        let parts = planner::plan(file_size, requested_part_size.unwrap_or(settings.default_part_size))
            .map_err(|e| e.for_object_key(object_key))?;

        let upload_id = backend.create_upload_id(object_key).await?;

        let signed: Result<Vec<PartInitialization>> = stream::iter(parts)
            .map(|part: PartPlan| {
                let upload_id = upload_id.as_str();
                async move {
                    let upload_url = backend.presign_part_url(object_key, upload_id, part).await?;
                    Ok::<_, UploadError>(PartInitialization {
                        part_number: part.part_number,
                        size: part.size,
                        upload_url,
                    })
                }
            })
            .buffered(settings.signing_concurrency)
            .try_collect()
            .await;
        let parts = match signed {
            Ok(parts) => parts,
            Err(e) => {
                self.release(object_key, &upload_id).await;
                return Err(e);
            }
        };

        debug!("signed {} part URLs", parts.len());
        info!(upload_id = %upload_id, parts = parts.len(), state = %UploadState::Initialized, "upload initialized");

        Ok(UploadInitialization {
            object_key: object_key.to_string(),
            upload_id,
            parts,
            expires_in_secs: settings.upload_duration.as_secs(),
        })
    }

    /// Validate the client's part report and sign the request that finishes
    /// the upload. The caller relays the result to the store.
    #[instrument(
        skip(self, completion),
        fields(backend = self.backend().name(), object_key = %completion.object_key, upload_id = %completion.upload_id)
    )]
    pub async fn complete_upload(&self, mut completion: UploadCompletion) -> Result<UploadFinalization> {
        let backend = self.backend();
        check_object_key(&completion.object_key, backend.max_object_key_len())?;
        sort_parts(&mut completion);
        check_completion(&completion).inspect_err(|e| warn!("rejecting completion: {e}"))?;

        let finalization = backend.complete(&completion).await?;
        info!(
            parts = completion.parts.len(),
            size = completion.total_size(),
            state = %UploadState::Completed,
            "completion signed"
        );
        Ok(finalization)
    }

    /// Size in bytes of the finished object at `object_key`.
    #[instrument(skip(self), fields(backend = self.backend().name()))]
    pub async fn get_upload_size(&self, object_key: &str) -> Result<u64> {
        check_object_key(object_key, MAX_OBJECT_KEY_LEN)?;
        self.backend().get_upload_size(object_key).await
    }

    /// Exercise credentials and connectivity without moving any bytes: plan
    /// and sign a one-byte probe, release it, and query a size.
    #[instrument(skip(self), fields(backend = self.backend().name()))]
    pub async fn test_upload(&self) -> Result<()> {
        let backend = self.backend();
        let parts = planner::plan(1, self.settings().default_part_size)?;

        let upload_id = backend.create_upload_id(TEST_UPLOAD_KEY).await?;
        for part in parts {
            if let Err(e) = backend.presign_part_url(TEST_UPLOAD_KEY, &upload_id, part).await {
                self.release(TEST_UPLOAD_KEY, &upload_id).await;
                return Err(e);
            }
        }
        backend.abort(TEST_UPLOAD_KEY, &upload_id).await?;
        debug!(upload_id = %upload_id, state = %UploadState::Aborted, "probe upload released");

        match backend.get_upload_size(TEST_UPLOAD_KEY).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        info!("multipart probe succeeded");
        Ok(())
    }

    /// Abort an upload that failed before its part URLs were handed out. The
    /// abort error is logged; the caller reports the original failure.
    async fn release(&self, object_key: &str, upload_id: &str) {
        match self.backend().abort(object_key, upload_id).await {
            Ok(()) => debug!(upload_id, state = %UploadState::Aborted, "released unsigned upload"),
            Err(e) => warn!(upload_id, "failed to abort unsigned upload: {e}"),
        }
    }
}

fn check_object_key(object_key: &str, max_len: usize) -> Result<()> {
    let reason = if object_key.is_empty() {
        "object key is empty"
    } else if object_key.len() > max_len {
        "object key is too long for this store"
    } else {
        return Ok(());
    };
    Err(UploadError::InvalidObjectKey {
        object_key: object_key.to_string(),
        reason,
    })
}
