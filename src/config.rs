// src/config.rs
//
// Storage configuration, built once at process start and handed to the
// manager by reference. Nothing in request handling reads the environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use rand::Rng;

use crate::constants::{
    DEFAULT_PART_SIZE, DEFAULT_REGION, DEFAULT_SIGNING_CONCURRENCY, DEFAULT_UPLOAD_DURATION,
    MAX_UPLOAD_DURATION, MINIO_FAKE_REGION,
};
use crate::credentials::UploadCredentials;

/// Kind of store the application writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    /// AWS S3 (or a fully compatible service) with the native multipart API.
    Aws,
    /// MinIO; uploads go through presigned single-object requests only.
    Minio,
    /// Local filesystem storage. Cannot accept direct uploads.
    Filesystem,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Aws => "aws",
            StorageKind::Minio => "minio",
            StorageKind::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" | "s3" => Ok(StorageKind::Aws),
            "minio" => Ok(StorageKind::Minio),
            "filesystem" | "file" | "fs" => Ok(StorageKind::Filesystem),
            other => Err(anyhow!("unknown storage kind `{other}` (expected aws, minio or filesystem)")),
        }
    }
}

/// Knobs the adapters need while serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSettings {
    /// Validity window of every signed URL.
    pub upload_duration: Duration,
    /// Part size used when the caller does not request one.
    pub default_part_size: u64,
    /// Upper bound on concurrently signed part URLs.
    pub signing_concurrency: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            upload_duration: DEFAULT_UPLOAD_DURATION,
            default_part_size: DEFAULT_PART_SIZE,
            signing_concurrency: DEFAULT_SIGNING_CONCURRENCY,
        }
    }
}

/// Which store is active and how to reach it.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub bucket: String,
    pub region: Option<String>,
    /// `host[:port]` of the store; `None` means the provider default (AWS).
    pub endpoint: Option<String>,
    pub use_ssl: bool,
    /// URL clients use to reach the store, when it differs from `endpoint`
    /// (e.g. a store running inside docker).
    pub public_endpoint_url: Option<String>,
    /// Prepended to generated object keys.
    pub upload_prefix: String,
    pub ca_bundle_path: Option<PathBuf>,
    /// Static credentials; the SDK default chain is used when absent.
    pub credentials: Option<UploadCredentials>,
    pub upload: UploadSettings,
}

impl StorageConfig {
    pub fn new(kind: StorageKind, bucket: impl Into<String>) -> Self {
        Self {
            kind,
            bucket: bucket.into(),
            region: None,
            endpoint: None,
            use_ssl: kind != StorageKind::Minio,
            public_endpoint_url: None,
            upload_prefix: String::new(),
            ca_bundle_path: None,
            credentials: None,
            upload: UploadSettings::default(),
        }
    }

    /// Load `.env` (if any), then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from `S3FF_*` and `AWS_*` keys resolved by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let kind: StorageKind = get("S3FF_STORAGE_KIND")
            .context("S3FF_STORAGE_KIND is not set")?
            .parse()?;
        let bucket = get("S3FF_BUCKET").context("S3FF_BUCKET is not set")?;

        let mut cfg = Self::new(kind, bucket);
        cfg.region = get("S3FF_REGION");
        cfg.endpoint = get("S3FF_ENDPOINT");
        if let Some(v) = get("S3FF_USE_SSL") {
            cfg.use_ssl = parse_bool(&v).with_context(|| format!("S3FF_USE_SSL={v}"))?;
        }
        cfg.public_endpoint_url = get("S3FF_PUBLIC_ENDPOINT_URL");
        cfg.upload_prefix = get("S3FF_UPLOAD_PREFIX").unwrap_or_default();
        cfg.ca_bundle_path = get("S3FF_CA_BUNDLE_PATH").map(PathBuf::from);
        cfg.credentials = UploadCredentials::from_lookup(&lookup);

        if let Some(v) = get("S3FF_UPLOAD_DURATION") {
            cfg.upload.upload_duration = humantime::parse_duration(&v)
                .with_context(|| format!("S3FF_UPLOAD_DURATION={v}"))?;
        }
        if let Some(v) = get("S3FF_DEFAULT_PART_SIZE") {
            cfg.upload.default_part_size = v
                .parse()
                .with_context(|| format!("S3FF_DEFAULT_PART_SIZE={v}"))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            bail!("bucket name must not be empty");
        }
        if self.upload.upload_duration.is_zero() || self.upload.upload_duration > MAX_UPLOAD_DURATION {
            bail!(
                "upload duration {} must be between 1s and {}",
                humantime::format_duration(self.upload.upload_duration),
                humantime::format_duration(MAX_UPLOAD_DURATION)
            );
        }
        if self.upload.default_part_size == 0 {
            bail!("default part size must be positive");
        }
        if self.upload.signing_concurrency == 0 {
            bail!("signing concurrency must be >= 1");
        }
        if self.credentials.as_ref().is_some_and(|c| c.is_expired(SystemTime::now())) {
            bail!("static credentials have already expired");
        }
        Ok(())
    }

    /// Full URL of the store endpoint, e.g. `http://minio:9000`.
    pub fn endpoint_url(&self) -> Option<String> {
        self.endpoint.as_ref().map(|endpoint| {
            if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("http{}://{}", if self.use_ssl { "s" } else { "" }, endpoint)
            }
        })
    }

    /// URL signed into client-facing URLs. Defaults to `endpoint_url`.
    pub fn public_endpoint_url(&self) -> Option<String> {
        self.public_endpoint_url.clone().or_else(|| self.endpoint_url())
    }

    pub fn region(&self) -> String {
        match (&self.region, self.kind) {
            (Some(region), _) => region.clone(),
            (None, StorageKind::Minio) => MINIO_FAKE_REGION.to_string(),
            (None, _) => DEFAULT_REGION.to_string(),
        }
    }

    /// Custom endpoints (MinIO, Ceph, ...) only work with path-style addressing.
    pub fn force_path_style(&self) -> bool {
        self.kind == StorageKind::Minio || self.endpoint.is_some()
    }

    /// A fresh, unique object key for a file called `name`:
    /// `{upload_prefix}{random}/{name}`.
    pub fn new_object_key(&self, name: &str) -> String {
        let token: u128 = rand::rng().random();
        let mut key = self.upload_prefix.clone();
        if !key.is_empty() && !key.ends_with('/') {
            key.push('/');
        }
        key.push_str(&format!("{token:032x}/{}", name.trim_start_matches('/')));
        key
    }
}

fn parse_bool(v: &str) -> Result<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => bail!("expected a boolean"),
    }
}
