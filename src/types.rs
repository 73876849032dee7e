// src/types.rs
//
// Records exchanged with the client driving an upload. All are JSON-serializable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A planned part together with the signed URL the client PUTs it to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInitialization {
    pub part_number: u32,
    pub size: u64,
    pub upload_url: String,
}

/// Everything a client needs to transfer an object's parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInitialization {
    pub object_key: String,
    pub upload_id: String,
    pub parts: Vec<PartInitialization>,
    /// Validity window of every `upload_url`, in seconds.
    pub expires_in_secs: u64,
}

impl UploadInitialization {
    pub fn total_size(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }
}

/// Client evidence that one part was stored: the ETag from its PUT response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartCompletion {
    pub part_number: u32,
    pub size: u64,
    pub etag: String,
}

/// Input to `complete_upload`. Parts may arrive in any order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCompletion {
    pub object_key: String,
    pub upload_id: String,
    pub parts: Vec<PartCompletion>,
}

impl UploadCompletion {
    pub fn new(object_key: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            upload_id: upload_id.into(),
            parts: Vec::new(),
        }
    }

    pub fn total_size(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }
}

/// A signed request the caller relays to the store to finalize the object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFinalization {
    pub complete_url: String,
    pub body: String,
}

/// Lifecycle of one upload id. The manager keeps no state; this names the
/// phases the store walks an upload through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Planned,
    /// Upload id allocated and part URLs issued.
    Initialized,
    /// Driven by the client; never observed by the manager.
    PartsUploaded,
    Completed,
    /// Left to store lifecycle policies and URL expiry.
    Aborted,
}

impl UploadState {
    /// True once no further operation may reference the upload id.
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadState::Planned => "planned",
            UploadState::Initialized => "initialized",
            UploadState::PartsUploaded => "parts_uploaded",
            UploadState::Completed => "completed",
            UploadState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
