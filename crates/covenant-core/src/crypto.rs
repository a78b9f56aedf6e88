use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};
use crate::types::{ContentHash, IntegrityHash};

type HmacSha256 = Hmac<Sha256>;

/// Key length required for the keyed integrity hash (HMAC-SHA-256).
pub const INTEGRITY_KEY_LEN: usize = 32;

/// Serialize a JSON value in canonical form.
///
/// `serde_json::Map` is a sorted map, so serialization is key-order
/// independent by construction; this helper exists so every hash site
/// goes through one function.
pub fn canonical_json(value: &serde_json::Value) -> CoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// SHA-256 over the canonical serialization of a content tree.
pub fn content_hash(value: &serde_json::Value) -> CoreResult<ContentHash> {
    let bytes = canonical_json(value)?;
    let digest = Sha256::digest(&bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(ContentHash(out))
}

/// First 16 hex characters of the content hash, used in cache keys.
pub fn short_content_hash(value: &serde_json::Value) -> CoreResult<String> {
    let hash = content_hash(value)?;
    Ok(hex::encode(hash.0)[..16].to_string())
}

/// Keyed HMAC-SHA-256 over arbitrary canonical bytes.
///
/// The key must be exactly [`INTEGRITY_KEY_LEN`] bytes.
pub fn keyed_hash(key: &[u8], message: &[u8]) -> CoreResult<IntegrityHash> {
    if key.len() != INTEGRITY_KEY_LEN {
        return Err(CoreError::Crypto(format!(
            "integrity key must be exactly {} bytes, got {}",
            INTEGRITY_KEY_LEN,
            key.len()
        )));
    }
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CoreError::Crypto(format!("invalid HMAC key: {}", e)))?;
    mac.update(message);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(IntegrityHash(out))
}

/// Generate a fresh random integrity key.
pub fn generate_integrity_key() -> [u8; INTEGRITY_KEY_LEN] {
    use rand::RngCore;
    let mut key = [0u8; INTEGRITY_KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}
