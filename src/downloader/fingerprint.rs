//! Stable job identifiers derived from source URLs.

use sha2::{Digest, Sha256};

/// Number of digest bytes kept in a fingerprint (rendered as twice as many hex chars)
const FINGERPRINT_BYTES: usize = 12;

/// Compute the job id for `url`: the leading bytes of its SHA-256 digest as lowercase hex.
///
/// The id is the dedup key for the whole queue, so it must come out identical
/// for the same URL in every process.
pub fn fingerprint(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(&digest[..FINGERPRINT_BYTES])
}
