// src/planner.rs
//
// Part planner: splits a file size into an ordered multipart layout that obeys
// the object-store limits in `constants`. Pure and deterministic.

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_PARTS, MAX_PART_SIZE, MAX_PLANNABLE_FILE_SIZE, MIN_PART_SIZE};
use crate::error::{Result, UploadError};

/// One planned part: its 1-based number and its size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartPlan {
    pub part_number: u32,
    pub size: u64,
}

/// Part size actually used for `file_size` given the caller's request.
///
/// The request is clamped to `[MIN_PART_SIZE, MAX_PART_SIZE]`; if that would
/// still need more than `MAX_PARTS` parts, the size grows until the count fits.
pub fn effective_part_size(file_size: u64, requested_part_size: u64) -> Result<u64> {
    if requested_part_size == 0 {
        return Err(UploadError::InvalidSize {
            object_key: None,
            file_size,
            part_size: requested_part_size,
            reason: "requested part size must be positive",
        });
    }
    if file_size > MAX_PLANNABLE_FILE_SIZE {
        return Err(UploadError::InvalidSize {
            object_key: None,
            file_size,
            part_size: requested_part_size,
            reason: "file too large to fit in 10,000 parts of 5 GiB",
        });
    }

    let mut part_size = requested_part_size.clamp(MIN_PART_SIZE, MAX_PART_SIZE);
    if file_size.div_ceil(part_size) > MAX_PARTS {
        // Bounded by MAX_PART_SIZE thanks to the MAX_PLANNABLE_FILE_SIZE check.
        part_size = file_size.div_ceil(MAX_PARTS);
    }
    Ok(part_size)
}

/// Plan the parts of a `file_size` byte upload.
///
/// All parts but the last have the same size; the last one holds the
/// remainder (or a full part when the size divides evenly). A file that fits
/// in one part, including an empty file, yields exactly one part.
pub fn plan(file_size: u64, requested_part_size: u64) -> Result<Vec<PartPlan>> {
    let part_size = effective_part_size(file_size, requested_part_size)?;

    if file_size <= part_size {
        return Ok(vec![PartPlan { part_number: 1, size: file_size }]);
    }

    let full_parts = file_size / part_size;
    let remainder = file_size % part_size;
    let count = full_parts + u64::from(remainder > 0);

    let parts = (1..=count)
        .map(|n| PartPlan {
            part_number: n as u32,
            size: if n == count && remainder > 0 { remainder } else { part_size },
        })
        .collect();
    Ok(parts)
}
