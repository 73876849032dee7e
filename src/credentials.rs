// src/credentials.rs
//
// Temporary, scoped credentials handed to the store client, and the upload
// policy that restricts them. Minting them (STS AssumeRole) happens elsewhere.

use std::fmt;
use std::time::SystemTime;

use serde_json::{json, Value};

/// An already-issued credential bundle. Treated as opaque by the manager.
#[derive(Clone)]
pub struct UploadCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<SystemTime>,
}

// Keep secrets out of logs.
impl fmt::Debug for UploadCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl UploadCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expiration: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_expiration(mut self, expiration: SystemTime) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Read `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
    /// through `lookup`. Returns `None` unless both keys are set.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let access_key_id = lookup("AWS_ACCESS_KEY_ID").filter(|v| !v.is_empty())?;
        let secret_access_key = lookup("AWS_SECRET_ACCESS_KEY").filter(|v| !v.is_empty())?;
        let mut creds = Self::new(access_key_id, secret_access_key);
        creds.session_token = lookup("AWS_SESSION_TOKEN").filter(|v| !v.is_empty());
        Some(creds)
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expiration.is_some_and(|exp| exp <= now)
    }
}

/// IAM policy granting `s3:PutObject` on `object_key` and everything below it
/// (staged parts of presigned-only uploads live under the key prefix).
pub fn upload_policy(bucket: &str, object_key: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["s3:PutObject"],
                "Resource": format!("arn:aws:s3:::{bucket}/{object_key}*"),
            }
        ],
    })
}
