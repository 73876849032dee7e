// src/store.rs
//
// The seam between the upload adapters and the object store: a small async
// trait covering exactly the store calls and URL signatures the adapters need,
// plus its implementation on top of the AWS Rust SDK.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use aws_smithy_http_client::tls::rustls_provider::CryptoMode;
use aws_smithy_http_client::{tls, Builder as HttpClientBuilder};
use aws_sigv4::http_request::{
    sign, PercentEncodingMode, SignableBody, SignableRequest, SignatureLocation, SigningParams,
    SigningSettings, UriPathNormalizationMode,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;

use crate::config::StorageConfig;

/// Per-request timeout for store round trips.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// What a HEAD on an existing object reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub etag: Option<String>,
}

/// Store operations used by the upload adapters.
///
/// Signing methods are local computations in the common case; the other
/// methods are network round trips. `head_object` and `get_object` return
/// `Ok(None)` when the key does not exist so callers can tell "missing"
/// apart from every other failure.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    fn bucket(&self) -> &str;

    /// Register a native multipart upload and return its upload id.
    async fn create_multipart_upload(&self, key: &str) -> Result<String>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;

    /// Signed `PUT` for one part of a native multipart upload.
    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        content_length: u64,
        expires_in: Duration,
    ) -> Result<String>;

    /// Signed `POST ?uploadId=` that completes a native multipart upload.
    async fn presign_complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        expires_in: Duration,
    ) -> Result<String>;

    /// Signed single-object `PUT`.
    async fn presign_put_object(
        &self,
        key: &str,
        content_length: u64,
        expires_in: Duration,
    ) -> Result<String>;

    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>>;

    async fn get_object(&self, key: &str) -> Result<Option<Bytes>>;
}

// -----------------------------------------------------------------------------
// AWS SDK implementation
// -----------------------------------------------------------------------------

/// `ObjectStoreClient` backed by `aws-sdk-s3`.
///
/// Two SDK clients are kept: one for the store calls made by this process and
/// one whose endpoint is the public URL clients see, used only for signing.
#[derive(Clone, Debug)]
pub struct S3StoreClient {
    client: Client,
    presign_client: Client,
    completion_signer: CompletionSigner,
    bucket: String,
}

impl S3StoreClient {
    pub async fn from_config(cfg: &StorageConfig) -> Result<Self> {
        let private_url = cfg.endpoint_url();
        let public_url = cfg.public_endpoint_url();

        let sdk_config = load_sdk_config(cfg).await?;
        let client = client_for(&sdk_config, cfg, private_url.as_deref());
        let presign_client = if public_url == private_url {
            client.clone()
        } else {
            debug!("Signing URLs against public endpoint {:?}", public_url);
            client_for(&sdk_config, cfg, public_url.as_deref())
        };
        let completion_signer = CompletionSigner::new(&sdk_config, cfg, public_url.as_deref())?;

        Ok(Self {
            client,
            presign_client,
            completion_signer,
            bucket: cfg.bucket.clone(),
        })
    }
}

/// Create a TLS context using a CA bundle file
fn tls_context_from_pem(filename: impl AsRef<Path>) -> Result<tls::TlsContext> {
    let pem_contents = fs::read(&filename)
        .with_context(|| format!("Failed to read CA bundle file: {}", filename.as_ref().display()))?;

    let trust_store = tls::TrustStore::empty().with_pem_certificate(pem_contents.as_slice());

    tls::TlsContext::builder()
        .with_trust_store(trust_store)
        .build()
        .with_context(|| format!("Failed to build TLS context from PEM {}", filename.as_ref().display()))
}

async fn load_sdk_config(cfg: &StorageConfig) -> Result<SdkConfig> {
    let timeout_config = TimeoutConfig::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .operation_timeout(OPERATION_TIMEOUT)
        .build();

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(cfg.region()))
        .timeout_config(timeout_config);

    if let Some(creds) = &cfg.credentials {
        loader = loader.credentials_provider(Credentials::new(
            creds.access_key_id.clone(),
            creds.secret_access_key.clone(),
            creds.session_token.clone(),
            creds.expiration,
            "s3ff-static",
        ));
    }

    if let Some(ca_bundle_path) = &cfg.ca_bundle_path {
        debug!("Loading CA bundle from: {}", ca_bundle_path.display());
        let tls_context = tls_context_from_pem(ca_bundle_path)?;
        loader = loader.http_client(
            HttpClientBuilder::new()
                .tls_provider(tls::Provider::Rustls(CryptoMode::AwsLc))
                .tls_context(tls_context)
                .build_https(),
        );
    }

    Ok(loader.load().await)
}

fn client_for(sdk_config: &SdkConfig, cfg: &StorageConfig, endpoint_url: Option<&str>) -> Client {
    let mut s3_config = aws_sdk_s3::config::Builder::from(sdk_config)
        .force_path_style(cfg.force_path_style());
    if let Some(url) = endpoint_url {
        s3_config = s3_config.endpoint_url(url);
    }
    Client::from_conf(s3_config.build())
}

// -----------------------------------------------------------------------------
// CompleteMultipartUpload presigning
// -----------------------------------------------------------------------------

/// Characters left as-is in a key path segment (RFC 3986 unreserved).
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// SigV4 query-string signer for `POST /{key}?uploadId=`, which the SDK has
/// no presigner for. Addresses the bucket the same way the presign client does.
#[derive(Clone, Debug)]
struct CompletionSigner {
    credentials: SharedCredentialsProvider,
    region: String,
    endpoint_url: String,
    path_style: bool,
}

impl CompletionSigner {
    fn new(sdk_config: &SdkConfig, cfg: &StorageConfig, endpoint_url: Option<&str>) -> Result<Self> {
        let credentials = sdk_config
            .credentials_provider()
            .context("no AWS credentials provider configured")?;
        let region = cfg.region();
        let endpoint_url = match endpoint_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://s3.{region}.amazonaws.com"),
        };
        Ok(Self {
            credentials,
            region,
            endpoint_url,
            path_style: cfg.force_path_style(),
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        let path = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        if self.path_style {
            return format!("{}/{bucket}/{path}", self.endpoint_url);
        }
        match self.endpoint_url.split_once("://") {
            Some((scheme, host)) => format!("{scheme}://{bucket}.{host}/{path}"),
            None => format!("https://{bucket}.{}/{path}", self.endpoint_url),
        }
    }

    async fn presign_complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        expires_in: Duration,
    ) -> Result<String> {
        let credentials = self
            .credentials
            .provide_credentials()
            .await
            .context("resolving credentials for CompleteMultipartUpload")?;
        let identity: Identity = credentials.into();

        let mut settings = SigningSettings::default();
        settings.signature_location = SignatureLocation::QueryParams;
        settings.expires_in = Some(expires_in);
        settings.percent_encoding_mode = PercentEncodingMode::Single;
        settings.uri_path_normalization_mode = UriPathNormalizationMode::Disabled;

        let params: SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name("s3")
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .context("building SigV4 signing parameters")?
            .into();

        let url = format!(
            "{}?uploadId={}",
            self.object_url(bucket, key),
            utf8_percent_encode(upload_id, KEY_SEGMENT)
        );
        let signable = SignableRequest::new("POST", url.as_str(), std::iter::empty(), SignableBody::UnsignedPayload)
            .context("preparing CompleteMultipartUpload for signing")?;
        let (instructions, _signature) = sign(signable, &params)
            .context("signing CompleteMultipartUpload")?
            .into_parts();

        let mut request = http::Request::builder()
            .method("POST")
            .uri(url.as_str())
            .body(())
            .context("invalid CompleteMultipartUpload URL")?;
        instructions.apply_to_request_http1x(&mut request);
        Ok(request.uri().to_string())
    }
}

fn presigning(expires_in: Duration) -> Result<PresigningConfig> {
    PresigningConfig::expires_in(expires_in).context("invalid presigned URL lifetime")
}

fn content_length(len: u64) -> Result<i64> {
    i64::try_from(len).context("content length out of range")
}

#[async_trait]
impl ObjectStoreClient for S3StoreClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("CreateMultipartUpload failed")?;
        Ok(resp.upload_id().unwrap_or_default().to_string())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .context("AbortMultipartUpload failed")?;
        Ok(())
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        content_length_bytes: u64,
        expires_in: Duration,
    ) -> Result<String> {
        let part_number = i32::try_from(part_number).context("part number out of range")?;
        let presigned = self
            .presign_client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(content_length(content_length_bytes)?)
            .presigned(presigning(expires_in)?)
            .await
            .context("presigning UploadPart failed")?;
        Ok(presigned.uri().to_string())
    }

    async fn presign_complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        expires_in: Duration,
    ) -> Result<String> {
        self.completion_signer
            .presign_complete(&self.bucket, key, upload_id, expires_in)
            .await
            .context("presigning CompleteMultipartUpload failed")
    }

    async fn presign_put_object(
        &self,
        key: &str,
        content_length_bytes: u64,
        expires_in: Duration,
    ) -> Result<String> {
        let presigned = self
            .presign_client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(content_length(content_length_bytes)?)
            .presigned(presigning(expires_in)?)
            .await
            .context("presigning PutObject failed")?;
        Ok(presigned.uri().to_string())
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(resp) => Ok(Some(ObjectHead {
                size: resp.content_length().unwrap_or_default().max(0) as u64,
                etag: resp.e_tag().map(str::to_string),
            })),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(e).context("HeadObject failed"),
        }
    }

    async fn get_object(&self, key: &str) -> Result<Option<Bytes>> {
        let resp = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(resp) => resp,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => return Ok(None),
            Err(e) => return Err(e).context("GetObject failed"),
        };
        let data = resp.body.collect().await.context("reading GetObject body failed")?;
        Ok(Some(data.into_bytes()))
    }
}
