// tests/common/mod.rs
//
// In-memory object store for the integration tests. It signs its own
// `memory://` URLs and can play the role of the client (part PUTs) and of the
// store receiving a relayed completion, so whole uploads run offline.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;

use s3ff::{
    MultipartManager, ObjectHead, ObjectStoreClient, PartCompletion, StorageKind, UploadCompletion,
    UploadFinalization, UploadInitialization, UploadSettings,
};

pub const MIB: u64 = 1024 * 1024;

#[derive(Default)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Default)]
struct State {
    objects: HashMap<String, Bytes>,
    uploads: HashMap<String, PendingUpload>,
    completed: HashSet<String>,
    aborted: HashSet<String>,
}

/// `ObjectStoreClient` keeping everything in a map.
#[derive(Default)]
pub struct MemoryStore {
    bucket: String,
    state: Mutex<State>,
    next_upload: AtomicUsize,
    /// Every store call fails while set.
    unavailable: AtomicBool,
    /// URL signing fails while set; other calls still succeed.
    signing_broken: AtomicBool,
}

fn etag_of(data: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

/// Parsed `memory://bucket/key?query` URL.
struct SignedUrl {
    key: String,
    query: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new(bucket: &str) -> Arc<Self> {
        Arc::new(Self {
            bucket: bucket.to_string(),
            ..Default::default()
        })
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_signing_broken(&self, broken: bool) {
        self.signing_broken.store(broken, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        ensure!(!self.unavailable.load(Ordering::SeqCst), "connection refused");
        Ok(())
    }

    fn check_can_sign(&self) -> Result<()> {
        self.check_available()?;
        ensure!(!self.signing_broken.load(Ordering::SeqCst), "credentials expired");
        Ok(())
    }

    fn url(&self, key: &str, query: &[(&str, String)]) -> String {
        let query: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("memory://{}/{}?{}", self.bucket, key, query.join("&"))
    }

    fn parse_url(&self, url: &str) -> Result<SignedUrl> {
        let prefix = format!("memory://{}/", self.bucket);
        let rest = url.strip_prefix(&prefix).ok_or_else(|| anyhow!("foreign URL {url}"))?;
        let (key, query) = rest.split_once('?').unwrap_or((rest, ""));
        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Ok(SignedUrl { key: key.to_string(), query })
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, data: impl Into<Bytes>) {
        self.state.lock().unwrap().objects.insert(key.to_string(), data.into());
    }

    pub fn was_aborted(&self, upload_id: &str) -> bool {
        self.state.lock().unwrap().aborted.contains(upload_id)
    }

    pub fn pending_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    /// Perform the client's PUT of `data` to a signed part or object URL and
    /// return the ETag header the store would answer with.
    pub fn put(&self, url: &str, data: Bytes) -> Result<String> {
        let signed = self.parse_url(url)?;
        let len: u64 = signed.query.get("len").context("URL not signed for a length")?.parse()?;
        ensure!(len == data.len() as u64, "signed for {len} bytes, got {}", data.len());

        let etag = etag_of(&data);
        let mut state = self.state.lock().unwrap();
        match (signed.query.get("uploadId"), signed.query.get("partNumber")) {
            (Some(upload_id), Some(part_number)) => {
                let upload = state
                    .uploads
                    .get_mut(upload_id)
                    .ok_or_else(|| anyhow!("NoSuchUpload: {upload_id}"))?;
                ensure!(upload.key == signed.key, "upload {upload_id} is for another key");
                upload.parts.insert(part_number.parse()?, data);
            }
            _ => {
                state.objects.insert(signed.key, data);
            }
        }
        Ok(etag)
    }

    /// Send a finalization to the store, as the client would.
    pub fn relay(&self, finalization: &UploadFinalization) -> Result<()> {
        let signed = self.parse_url(&finalization.complete_url)?;
        match signed.query.get("uploadId") {
            Some(upload_id) => self.complete_native(&signed.key, upload_id, &finalization.body),
            None => self.put(&finalization.complete_url, Bytes::from(finalization.body.clone())).map(|_| ()),
        }
    }

    fn complete_native(&self, key: &str, upload_id: &str, body: &str) -> Result<()> {
        let listed = parse_complete_body(body)?;
        let mut state = self.state.lock().unwrap();
        if state.completed.contains(upload_id) {
            bail!("NoSuchUpload: {upload_id} was already completed");
        }
        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| anyhow!("NoSuchUpload: {upload_id}"))?;
        ensure!(upload.key == key, "upload {upload_id} is for another key");

        let mut object = Vec::new();
        let mut previous = 0;
        for (part_number, etag) in &listed {
            ensure!(*part_number > previous, "InvalidPartOrder");
            previous = *part_number;
            let data = upload.parts.get(part_number).ok_or_else(|| anyhow!("InvalidPart {part_number}"))?;
            ensure!(etag_of(data) == *etag, "InvalidPart {part_number}: etag mismatch");
            object.extend_from_slice(data);
        }

        state.uploads.remove(upload_id);
        state.completed.insert(upload_id.to_string());
        state.objects.insert(key.to_string(), Bytes::from(object));
        Ok(())
    }
}

/// `(part_number, etag)` pairs from a CompleteMultipartUpload body.
fn parse_complete_body(body: &str) -> Result<Vec<(u32, String)>> {
    let inner = body
        .strip_prefix(r#"<CompleteMultipartUpload xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#)
        .and_then(|b| b.strip_suffix("</CompleteMultipartUpload>"))
        .ok_or_else(|| anyhow!("MalformedXML"))?;

    let field = |part: &str, tag: &str| -> Result<String> {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        let start = part.find(&open).ok_or_else(|| anyhow!("MalformedXML: no {tag}"))? + open.len();
        let end = part[start..].find(&close).ok_or_else(|| anyhow!("MalformedXML"))? + start;
        Ok(part[start..end].to_string())
    };

    inner
        .split("</Part>")
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| -> Result<(u32, String)> {
            let chunk = chunk.strip_prefix("<Part>").ok_or_else(|| anyhow!("MalformedXML"))?;
            Ok((field(chunk, "PartNumber")?.parse()?, field(chunk, "ETag")?))
        })
        .collect()
}

#[async_trait]
impl ObjectStoreClient for MemoryStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String> {
        self.check_available()?;
        let upload_id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        self.state.lock().unwrap().uploads.insert(
            upload_id.clone(),
            PendingUpload { key: key.to_string(), ..Default::default() },
        );
        Ok(upload_id)
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().unwrap();
        let upload = state.uploads.remove(upload_id).ok_or_else(|| anyhow!("NoSuchUpload"))?;
        ensure!(upload.key == key, "upload {upload_id} is for another key");
        state.aborted.insert(upload_id.to_string());
        Ok(())
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        content_length: u64,
        expires_in: Duration,
    ) -> Result<String> {
        self.check_can_sign()?;
        Ok(self.url(
            key,
            &[
                ("partNumber", part_number.to_string()),
                ("uploadId", upload_id.to_string()),
                ("len", content_length.to_string()),
                ("expires", expires_in.as_secs().to_string()),
            ],
        ))
    }

    async fn presign_complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        expires_in: Duration,
    ) -> Result<String> {
        self.check_can_sign()?;
        Ok(self.url(
            key,
            &[("uploadId", upload_id.to_string()), ("expires", expires_in.as_secs().to_string())],
        ))
    }

    async fn presign_put_object(&self, key: &str, content_length: u64, expires_in: Duration) -> Result<String> {
        self.check_can_sign()?;
        Ok(self.url(
            key,
            &[("len", content_length.to_string()), ("expires", expires_in.as_secs().to_string())],
        ))
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>> {
        self.check_available()?;
        Ok(self.object(key).map(|data| ObjectHead {
            size: data.len() as u64,
            etag: Some(etag_of(&data)),
        }))
    }

    async fn get_object(&self, key: &str) -> Result<Option<Bytes>> {
        self.check_available()?;
        Ok(self.object(key))
    }
}

/// Manager for `kind` on top of a fresh in-memory store.
pub fn memory_manager(kind: StorageKind) -> (MultipartManager, Arc<MemoryStore>) {
    let store = MemoryStore::new("test-bucket");
    let manager = MultipartManager::with_client(kind, UploadSettings::default(), store.clone())
        .expect("supported storage kind");
    (manager, store)
}

/// Deterministic test payload.
pub fn payload(len: u64) -> Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}

/// Upload `data` through every part URL of `init`, last part first, and
/// return what the client reports back.
pub fn upload_parts(store: &MemoryStore, init: &UploadInitialization, data: &Bytes) -> Result<UploadCompletion> {
    let mut completion = UploadCompletion::new(&init.object_key, &init.upload_id);
    let mut offset = 0u64;
    let mut slices = Vec::new();
    for part in &init.parts {
        slices.push((part, data.slice(offset as usize..(offset + part.size) as usize)));
        offset += part.size;
    }
    ensure!(offset == data.len() as u64, "plan does not cover the payload");

    for (part, slice) in slices.into_iter().rev() {
        let etag = store.put(&part.upload_url, slice)?;
        completion.parts.push(PartCompletion {
            part_number: part.part_number,
            size: part.size,
            etag,
        });
    }
    Ok(completion)
}
