// src/constants.rs
//
// Centralized constants for s3ff: object-store multipart limits and upload defaults.

use std::time::Duration;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Minimum multipart upload part size (5 MiB - S3 requirement).
/// The final part of an upload may be smaller.
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Maximum multipart upload part size (5 GiB - S3 requirement).
pub const MAX_PART_SIZE: u64 = 5 * GIB;

/// Maximum number of parts in a multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// S3 rejects object keys longer than this many bytes.
pub const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Largest file the planner accepts: `MAX_PARTS` parts of `MAX_PART_SIZE` each.
pub const MAX_PLANNABLE_FILE_SIZE: u64 = MAX_PART_SIZE * MAX_PARTS;

/// Part size used when the caller does not request one (64 MiB).
pub const DEFAULT_PART_SIZE: u64 = 64 * MIB;

/// Validity window of every signed URL issued for an upload (12 hours).
pub const DEFAULT_UPLOAD_DURATION: Duration = Duration::from_secs(60 * 60 * 12);

/// SigV4 presigned URLs cannot outlive 7 days.
pub const MAX_UPLOAD_DURATION: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Maximum number of part URLs signed concurrently during initialization.
pub const DEFAULT_SIGNING_CONCURRENCY: usize = 32;

/// Namespace of the S3 `CompleteMultipartUpload` document.
pub const S3_XML_NAMESPACE: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Object key used by `test_upload` to probe credentials and connectivity.
pub const TEST_UPLOAD_KEY: &str = ".s3ff_multipart_test";

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// The SDK needs some region for MinIO, whose value is irrelevant to the server.
pub const MINIO_FAKE_REGION: &str = "s3ff-minio-fake-region";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_are_sane() {
        const _: () = assert!(MAX_PART_SIZE > MIN_PART_SIZE);
        const _: () = assert!(DEFAULT_PART_SIZE >= MIN_PART_SIZE);
        const _: () = assert!(DEFAULT_PART_SIZE <= MAX_PART_SIZE);
        assert!(DEFAULT_UPLOAD_DURATION <= MAX_UPLOAD_DURATION);
        assert_eq!(MAX_PLANNABLE_FILE_SIZE, 50_000 * GIB);
    }
}
