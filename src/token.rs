// src/token.rs
//
// Tamper-evident, time-limited tokens binding an object key between the
// initialize and complete round trips. Unrelated to the store credentials and
// to the lifetime of the signed part URLs.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: char = ':';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed upload token")]
    Malformed,
    #[error("upload token signature does not match")]
    BadSignature,
    #[error("upload token expired {age:?} after signing (max age {max_age:?})")]
    Expired { age: Duration, max_age: Duration },
}

/// HMAC-SHA256 signer producing `value:timestamp:mac` tokens.
#[derive(Clone)]
pub struct UploadSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for UploadSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSigner").finish_non_exhaustive()
    }
}

impl UploadSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self { key: secret.as_ref().to_vec() }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        HmacSha256::new_from_slice(&self.key).unwrap_or_else(|_| unreachable!())
    }

    pub fn sign(&self, value: &str) -> String {
        self.sign_at(value, SystemTime::now())
    }

    pub fn sign_at(&self, value: &str, at: SystemTime) -> String {
        let timestamp = unix_secs(at);
        let payload = format!("{value}{SEPARATOR}{timestamp}");
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        format!("{payload}{SEPARATOR}{signature}")
    }

    /// Verify `token` and return the value it binds.
    pub fn unsign(&self, token: &str, max_age: Duration) -> Result<String, TokenError> {
        self.unsign_at(token, max_age, SystemTime::now())
    }

    pub fn unsign_at(&self, token: &str, max_age: Duration, now: SystemTime) -> Result<String, TokenError> {
        // The value itself may contain separators; the last two fields may not.
        let mut fields = token.rsplitn(3, SEPARATOR);
        let (Some(signature), Some(timestamp), Some(value)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(TokenError::Malformed);
        };
        let signature = hex::decode(signature).map_err(|_| TokenError::Malformed)?;
        let signed_at: u64 = timestamp.parse().map_err(|_| TokenError::Malformed)?;

        let payload = &token[..value.len() + 1 + timestamp.len()];
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).map_err(|_| TokenError::BadSignature)?;

        let age = Duration::from_secs(unix_secs(now).saturating_sub(signed_at));
        if age > max_age {
            return Err(TokenError::Expired { age, max_age });
        }
        Ok(value.to_string())
    }
}

fn unix_secs(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}
