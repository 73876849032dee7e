// src/lib.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Crate root — module tree plus the public re-exports callers use.

// ===== Core Public API =====
pub mod manager;
pub mod planner;
pub mod types;
pub mod error;
pub mod config;
pub mod credentials;
pub mod token;

// ===== Internal Modules (Implementation) =====
// Public so other store implementations can be plugged in, but may change.
pub mod constants;
pub mod store;
pub mod backend;
pub mod native;
pub mod presigned;

pub use crate::manager::MultipartManager;
pub use crate::planner::{plan, PartPlan};
pub use crate::types::{
    PartCompletion,
    PartInitialization,
    UploadCompletion,
    UploadFinalization,
    UploadInitialization,
    UploadState,
};
pub use crate::error::{Result, UploadError};
pub use crate::config::{StorageConfig, StorageKind, UploadSettings};
pub use crate::credentials::{upload_policy, UploadCredentials};
pub use crate::store::{ObjectHead, ObjectStoreClient, S3StoreClient};
pub use crate::backend::UploadBackend;
pub use crate::token::{TokenError, UploadSigner};
