// src/native.rs
//
// Adapter for stores with a first-class multipart upload API: the store issues
// the upload id, every part is a signed UploadPart, and completion is a signed
// CompleteMultipartUpload carrying an XML part list.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::debug;

use crate::backend::UploadBackend;
use crate::config::UploadSettings;
use crate::constants::S3_XML_NAMESPACE;
use crate::error::{Result, UploadError};
use crate::planner::PartPlan;
use crate::store::ObjectStoreClient;
use crate::types::{UploadCompletion, UploadFinalization};

#[derive(Clone)]
pub struct NativeMultipartAdapter {
    store: Arc<dyn ObjectStoreClient>,
    settings: UploadSettings,
}

impl NativeMultipartAdapter {
    pub fn new(store: Arc<dyn ObjectStoreClient>, settings: UploadSettings) -> Self {
        Self { store, settings }
    }

    /// Body of the `CompleteMultipartUpload` request, parts ascending.
    pub fn marshal_complete_body(completion: &UploadCompletion) -> String {
        let mut parts: Vec<_> = completion.parts.iter().collect();
        parts.sort_by_key(|p| p.part_number);

        let mut body = format!(r#"<CompleteMultipartUpload xmlns="{S3_XML_NAMESPACE}">"#);
        for part in parts {
            // Writing to a String cannot fail.
            let _ = write!(
                body,
                "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
                part.part_number,
                escape_xml(&part.etag)
            );
        }
        body.push_str("</CompleteMultipartUpload>");
        body
    }
}

/// Escape the characters that may not appear raw in XML text content.
fn escape_xml(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

#[async_trait]
impl UploadBackend for NativeMultipartAdapter {
    fn name(&self) -> &'static str {
        "native-multipart"
    }

    fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    async fn create_upload_id(&self, object_key: &str) -> Result<String> {
        let upload_id = self
            .store
            .create_multipart_upload(object_key)
            .await
            .map_err(|e| UploadError::backend("create_multipart_upload", object_key, e))?;
        if upload_id.is_empty() {
            return Err(UploadError::backend(
                "create_multipart_upload",
                object_key,
                anyhow!("store returned an empty upload id"),
            ));
        }
        debug!(bucket = self.store.bucket(), object_key, upload_id = %upload_id, "multipart upload created");
        Ok(upload_id)
    }

    async fn presign_part_url(&self, object_key: &str, upload_id: &str, part: PartPlan) -> Result<String> {
        self.store
            .presign_upload_part(
                object_key,
                upload_id,
                part.part_number,
                part.size,
                self.settings.upload_duration,
            )
            .await
            .map_err(|e| UploadError::backend("presign_upload_part", object_key, e))
    }

    async fn complete(&self, completion: &UploadCompletion) -> Result<UploadFinalization> {
        let body = Self::marshal_complete_body(completion);
        let complete_url = self
            .store
            .presign_complete_multipart_upload(
                &completion.object_key,
                &completion.upload_id,
                self.settings.upload_duration,
            )
            .await
            .map_err(|e| UploadError::backend("presign_complete_multipart_upload", &completion.object_key, e))?;
        Ok(UploadFinalization { complete_url, body })
    }

    async fn abort(&self, object_key: &str, upload_id: &str) -> Result<()> {
        self.store
            .abort_multipart_upload(object_key, upload_id)
            .await
            .map_err(|e| UploadError::backend("abort_multipart_upload", object_key, e))
    }

    async fn get_upload_size(&self, object_key: &str) -> Result<u64> {
        let head = self
            .store
            .head_object(object_key)
            .await
            .map_err(|e| UploadError::backend("head_object", object_key, e))?;
        head.map(|h| h.size).ok_or_else(|| UploadError::ObjectNotFound {
            operation: "head_object",
            object_key: object_key.to_string(),
        })
    }
}
