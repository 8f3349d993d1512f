use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{decode_key, CryptoError};

type HmacSha256 = Hmac<Sha256>;

/// Deterministic keyed digest of an identity, stored next to its ciphertext
/// so equality lookups can use a database index.
///
/// The key must differ from the field encryption key.
#[derive(Clone)]
pub struct BlindIndex {
    mac: HmacSha256,
}

impl std::fmt::Debug for BlindIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BlindIndex(..)")
    }
}

impl BlindIndex {
    pub fn new(key: &[u8; 32]) -> Result<Self, CryptoError> {
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(format!("BLIND_INDEX_KEY: {}", e)))?;
        Ok(Self { mac })
    }

    pub fn from_hex_key(hex_key: &str) -> Result<Self, CryptoError> {
        Self::new(&decode_key("BLIND_INDEX_KEY", hex_key)?)
    }

    /// Hex HMAC-SHA256 of the normalized identity.
    pub fn compute(&self, identity: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(normalize_identity(identity).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Canonical form used for both indexing and comparison.
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}
