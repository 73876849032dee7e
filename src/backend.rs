// src/backend.rs
//
// The contract both upload adapters implement, and the completion checks
// they share.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::config::UploadSettings;
use crate::constants::{MAX_OBJECT_KEY_LEN, MAX_PARTS, MAX_PART_SIZE, MIN_PART_SIZE};
use crate::error::{Result, UploadError};
use crate::planner::PartPlan;
use crate::types::{UploadCompletion, UploadFinalization};

/// Backend-specific half of the multipart protocol.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn settings(&self) -> &UploadSettings;

    /// Longest object key every store request of an upload can address.
    fn max_object_key_len(&self) -> usize {
        MAX_OBJECT_KEY_LEN
    }

    /// Allocate the upload id every part URL and the completion refer to.
    async fn create_upload_id(&self, object_key: &str) -> Result<String>;

    /// Signed URL the client PUTs `part` to.
    async fn presign_part_url(&self, object_key: &str, upload_id: &str, part: PartPlan) -> Result<String>;

    /// Build and sign the completion request. `completion.parts` is sorted and
    /// has passed `check_completion`.
    async fn complete(&self, completion: &UploadCompletion) -> Result<UploadFinalization>;

    /// Release an upload that will never be completed. No-op where the store
    /// has nothing to release.
    async fn abort(&self, object_key: &str, upload_id: &str) -> Result<()>;

    /// Byte length of the finished object.
    async fn get_upload_size(&self, object_key: &str) -> Result<u64>;
}

/// Sort parts ascending by part number.
pub fn sort_parts(completion: &mut UploadCompletion) {
    completion.parts.sort_by_key(|p| p.part_number);
}

/// Reject part lists no planned upload could produce. Expects sorted parts.
///
/// Part numbers must be exactly `1..=n` with `n <= MAX_PARTS`; every part but
/// the last must have the size of the first, within the store's part size
/// limits, and the last may not be larger.
pub fn check_completion(completion: &UploadCompletion) -> Result<()> {
    let reject = |reason: String| {
        Err(UploadError::invalid_completion(
            &completion.object_key,
            &completion.upload_id,
            reason,
        ))
    };

    if completion.upload_id.is_empty() {
        return reject("missing upload id".to_string());
    }
    let Some(first) = completion.parts.first() else {
        return reject("no parts reported".to_string());
    };
    if completion.parts.len() as u64 > MAX_PARTS {
        return reject(format!(
            "{} parts reported, at most {MAX_PARTS} are allowed",
            completion.parts.len()
        ));
    }

    let mut seen = HashSet::with_capacity(completion.parts.len());
    for (idx, part) in completion.parts.iter().enumerate() {
        if !seen.insert(part.part_number) {
            return reject(format!("part {} reported more than once", part.part_number));
        }
        let expected = idx as u32 + 1;
        if part.part_number != expected {
            return reject(format!("part {expected} is missing"));
        }
        if part.etag.is_empty() {
            return reject(format!("part {} has no etag", part.part_number));
        }
    }

    if let Some((last, non_final)) = completion.parts.split_last() {
        if !non_final.is_empty() && !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&first.size) {
            return reject(format!(
                "part size {} is outside [{MIN_PART_SIZE}, {MAX_PART_SIZE}] bytes",
                first.size
            ));
        }
        if let Some(odd) = non_final.iter().find(|p| p.size != first.size) {
            return reject(format!(
                "part {} has size {} but parts before the last must all be {} bytes",
                odd.part_number, odd.size, first.size
            ));
        }
        if last.size > first.size.min(MAX_PART_SIZE) {
            return reject(format!(
                "final part {} is larger ({}) than the part size {}",
                last.part_number, last.size, first.size
            ));
        }
    }
    Ok(())
}

/// ETags compare equal regardless of the quotes S3 wraps them in.
pub fn etags_match(a: &str, b: &str) -> bool {
    a.trim_matches('"') == b.trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PartCompletion;

    const MIB: u64 = 1024 * 1024;

    fn completion(parts: &[(u32, u64)]) -> UploadCompletion {
        let mut c = UploadCompletion::new("key", "upload");
        c.parts = parts
            .iter()
            .map(|&(n, size)| PartCompletion { part_number: n, size, etag: format!("etag-{n}") })
            .collect();
        c
    }

    #[test]
    fn test_sort_parts() {
        let mut c = completion(&[(3, 1), (1, 5), (2, 5)]);
        sort_parts(&mut c);
        let numbers: Vec<u32> = c.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_accepts_planned_layouts() {
        check_completion(&completion(&[(1, 10)])).unwrap();
        check_completion(&completion(&[(1, 10 * MIB), (2, 10 * MIB), (3, 4)])).unwrap();
        check_completion(&completion(&[(1, 5 * MIB), (2, 5 * MIB)])).unwrap();
    }

    #[test]
    fn test_rejects_gaps_duplicates_and_empty() {
        for parts in [&[][..], &[(1, 5), (3, 5)][..], &[(1, 5), (1, 5)][..], &[(2, 5)][..]] {
            let err = check_completion(&completion(parts)).unwrap_err();
            assert!(matches!(err, UploadError::InvalidCompletion { .. }), "{parts:?}: {err}");
        }
    }

    #[test]
    fn test_rejects_inconsistent_sizes() {
        assert!(check_completion(&completion(&[(1, 10 * MIB), (2, 9 * MIB), (3, 1)])).is_err());
        assert!(check_completion(&completion(&[(1, 10 * MIB), (2, 11 * MIB)])).is_err());

        // Non-final parts below the store minimum, or above the maximum.
        assert!(check_completion(&completion(&[(1, 10), (2, 10), (3, 4)])).is_err());
        assert!(check_completion(&completion(&[(1, 5 * MIB - 1), (2, 1)])).is_err());
        let oversized = MAX_PART_SIZE + 1;
        assert!(check_completion(&completion(&[(1, oversized), (2, oversized)])).is_err());
        assert!(check_completion(&completion(&[(1, oversized)])).is_err());
    }

    #[test]
    fn test_rejects_too_many_parts() {
        let parts: Vec<(u32, u64)> = (1..=MAX_PARTS as u32).map(|n| (n, 5 * MIB)).collect();
        check_completion(&completion(&parts)).unwrap();

        let parts: Vec<(u32, u64)> = (1..=MAX_PARTS as u32 + 1).map(|n| (n, 5 * MIB)).collect();
        let err = check_completion(&completion(&parts)).unwrap_err();
        assert!(err.to_string().contains("at most 10000"), "{err}");
    }

    #[test]
    fn test_rejects_missing_etag_and_upload_id() {
        let mut c = completion(&[(1, 10)]);
        c.parts[0].etag.clear();
        assert!(check_completion(&c).is_err());

        let mut c = completion(&[(1, 10)]);
        c.upload_id.clear();
        assert!(check_completion(&c).is_err());
    }

    #[test]
    fn test_etags_match_ignores_quotes() {
        assert!(etags_match("\"abc\"", "abc"));
        assert!(!etags_match("\"abc\"", "abd"));
    }
}
