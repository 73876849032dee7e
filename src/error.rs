// src/error.rs
//
// Error taxonomy shared by the planner, the backend adapters and the manager.

use thiserror::Error;

use crate::config::StorageKind;

/// Errors surfaced by every public s3ff operation.
#[derive(Error, Debug)]
pub enum UploadError {
    /// The planner was given sizes it cannot lay out. `object_key` is set
    /// once the sizes are tied to an upload.
    #[error(
        "invalid size{} (file_size={file_size}, part_size={part_size}): {reason}",
        key_suffix(.object_key)
    )]
    InvalidSize {
        object_key: Option<String>,
        file_size: u64,
        part_size: u64,
        reason: &'static str,
    },

    #[error("invalid object key {object_key:?}: {reason}")]
    InvalidObjectKey {
        object_key: String,
        reason: &'static str,
    },

    #[error("invalid storage configuration: {0:#}")]
    Config(#[source] anyhow::Error),

    /// No adapter exists for the configured store kind.
    #[error("storage backend `{kind}` does not support multipart uploads")]
    UnsupportedBackend { kind: StorageKind },

    #[error("{operation}: object not found: `{object_key}`")]
    ObjectNotFound {
        operation: &'static str,
        object_key: String,
    },

    /// The client-reported part list cannot complete the upload.
    #[error("invalid completion for `{object_key}` (upload {upload_id}): {reason}")]
    InvalidCompletion {
        object_key: String,
        upload_id: String,
        reason: String,
    },

    /// Any failure reported by the underlying store, passed through unmodified.
    #[error("{operation} failed for `{object_key}`: {source:#}")]
    Backend {
        operation: &'static str,
        object_key: String,
        #[source]
        source: anyhow::Error,
    },
}

impl UploadError {
    pub(crate) fn backend(
        operation: &'static str,
        object_key: &str,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        UploadError::Backend {
            operation,
            object_key: object_key.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn invalid_completion(
        object_key: &str,
        upload_id: &str,
        reason: impl Into<String>,
    ) -> Self {
        UploadError::InvalidCompletion {
            object_key: object_key.to_string(),
            upload_id: upload_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Tie a planner error to the upload it was raised for.
    pub(crate) fn for_object_key(self, key: &str) -> Self {
        match self {
            UploadError::InvalidSize { object_key: None, file_size, part_size, reason } => {
                UploadError::InvalidSize {
                    object_key: Some(key.to_string()),
                    file_size,
                    part_size,
                    reason,
                }
            }
            other => other,
        }
    }

    /// True when the error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, UploadError::ObjectNotFound { .. })
    }
}

fn key_suffix(object_key: &Option<String>) -> String {
    object_key.as_deref().map(|k| format!(" for `{k}`")).unwrap_or_default()
}

pub type Result<T, E = UploadError> = std::result::Result<T, E>;
