//! Top-level configuration.

use serde::{Deserialize, Serialize};

use covenant_audit::AuditConfig;
use covenant_cache::CacheConfig;
use covenant_core::{crypto, CoreError, CoreResult};
use covenant_rollback::RollbackConfig;

/// Configuration for the whole governance stack. All sections have
/// working defaults; an omitted `integrity_key_hex` generates a fresh
/// random key at startup (fine for tests, wrong for a deployment that
/// must verify old entries).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CovenantConfig {
    /// Hex-encoded 32-byte HMAC key for the audit chain.
    #[serde(default)]
    pub integrity_key_hex: Option<String>,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub rollback: RollbackConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl CovenantConfig {
    pub(crate) fn integrity_key(&self) -> CoreResult<[u8; crypto::INTEGRITY_KEY_LEN]> {
        match &self.integrity_key_hex {
            None => Ok(crypto::generate_integrity_key()),
            Some(hex_key) => {
                let bytes = hex::decode(hex_key)
                    .map_err(|e| CoreError::InvalidInput(format!("integrity key hex: {e}")))?;
                let key: [u8; crypto::INTEGRITY_KEY_LEN] = bytes.try_into().map_err(|_| {
                    CoreError::InvalidInput(format!(
                        "integrity key must be {} bytes",
                        crypto::INTEGRITY_KEY_LEN
                    ))
                })?;
                Ok(key)
            }
        }
    }
}
