//! Field-level encryption and keyed indexing for personally identifying data.
//!
//! - [`FieldCipher`]: AES-256-GCM with a fresh 96-bit nonce per call, so equal
//!   plaintexts never produce equal ciphertexts.
//! - [`BlindIndex`]: HMAC-SHA256 digest of the normalized value, the only
//!   thing the database can compare for equality.
//!
//! Secret hashing lives in [`crate::utils::password`].

mod blind_index;
mod cipher;

pub use blind_index::{normalize_identity, BlindIndex};
pub use cipher::FieldCipher;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material missing, not hex, or not 256 bits. Fatal at startup.
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    Encryption,

    /// Malformed envelope or failed tag verification.
    #[error("Decryption failed: {0}")]
    Decryption(String),
}

/// Decode a hex-encoded 256-bit key.
pub(crate) fn decode_key(name: &str, hex_key: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| CryptoError::InvalidKey(format!("{} is not valid hex: {}", name, e)))?;

    bytes.try_into().map_err(|bytes: Vec<u8>| {
        CryptoError::InvalidKey(format!(
            "{} must be 32 bytes (64 hex chars), got {} bytes",
            name,
            bytes.len()
        ))
    })
}
