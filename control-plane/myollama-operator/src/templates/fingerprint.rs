use sha2::{Digest, Sha256};

/// Maximum length of a generation fingerprint.
pub const FINGERPRINT_LEN: usize = 10;

/// Derive the generation fingerprint for a model name.
///
/// The value names the ReplicaSet and labels every object of a generation, so it
/// must only depend on `model`. It is a lowercase hex prefix of the SHA-256 digest,
/// which keeps it a valid DNS-1123 label fragment.
pub fn fingerprint(model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    let mut hash = format!("{:x}", hasher.finalize());
    hash.truncate(FINGERPRINT_LEN);
    hash
}
