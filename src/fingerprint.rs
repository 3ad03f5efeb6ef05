//! Canonical request fingerprinting.
//!
//! A fingerprint is a stable SHA-256 identity for an [`AnalysisRequest`]:
//! the same logical request always hashes to the same value, regardless of
//! the order optional `file_paths` arrive in. The dedup index keys its
//! at-most-one-live-job invariant on this value.

use sha2::{Digest, Sha256};

use crate::models::AnalysisRequest;

/// Compute the canonical fingerprint of a request.
///
/// Fields are hashed with single-byte separators so adjacent values cannot
/// collide by concatenation (`"ab" + "c"` vs `"a" + "bc"`). `file_paths`
/// are sorted and deduplicated before hashing.
pub fn fingerprint(request: &AnalysisRequest) -> String {
    let mut hasher = Sha256::new();

    hasher.update(request.repository_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(request.branch.as_bytes());
    hasher.update([0x1f]);
    hasher.update(request.analysis_kind.as_str().as_bytes());
    hasher.update([0x1f]);

    match &request.commit_reference {
        Some(commit) => {
            hasher.update([0x01]);
            hasher.update(commit.as_bytes());
        }
        None => hasher.update([0x00]),
    }
    hasher.update([0x1f]);

    match &request.file_paths {
        Some(paths) => {
            let mut canonical: Vec<&str> = paths.iter().map(|p| p.as_str()).collect();
            canonical.sort_unstable();
            canonical.dedup();
            hasher.update([0x01]);
            for path in canonical {
                hasher.update(path.as_bytes());
                hasher.update([0x1e]);
            }
        }
        None => hasher.update([0x00]),
    }

    format!("{:x}", hasher.finalize())
}
