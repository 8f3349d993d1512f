use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};

use super::{decode_key, CryptoError};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SEPARATOR: char = ':';

/// Authenticated, non-deterministic field encryption.
///
/// Envelope format: `hex(nonce):hex(tag):hex(ciphertext)`.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldCipher(..)")
    }
}

impl FieldCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Build from the hex-encoded key in configuration.
    pub fn from_hex_key(hex_key: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(&decode_key("ENCRYPTION_KEY", hex_key)?))
    }

    /// Encrypt `plaintext`. Empty input yields `None`.
    pub fn encrypt(&self, plaintext: &str) -> Result<Option<String>, CryptoError> {
        if plaintext.is_empty() {
            return Ok(None);
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut body = plaintext.as_bytes().to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(&nonce, b"", &mut body)
            .map_err(|_| CryptoError::Encryption)?;

        Ok(Some(format!(
            "{}{sep}{}{sep}{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(body),
            sep = SEPARATOR
        )))
    }

    /// Decrypt an envelope produced by [`FieldCipher::encrypt`].
    pub fn decrypt(&self, envelope: &str) -> Result<String, CryptoError> {
        let parts: Vec<&str> = envelope.split(SEPARATOR).collect();
        let [nonce_hex, tag_hex, body_hex] = parts.as_slice() else {
            return Err(CryptoError::Decryption(format!(
                "expected 3 components, found {}",
                parts.len()
            )));
        };

        let nonce_bytes = decode_component("nonce", nonce_hex, Some(NONCE_LEN))?;
        let tag_bytes = decode_component("tag", tag_hex, Some(TAG_LEN))?;
        let mut body = decode_component("ciphertext", body_hex, None)?;

        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce_bytes),
                b"",
                &mut body,
                Tag::from_slice(&tag_bytes),
            )
            .map_err(|_| CryptoError::Decryption("authentication failed".to_string()))?;

        String::from_utf8(body)
            .map_err(|_| CryptoError::Decryption("plaintext is not UTF-8".to_string()))
    }

    /// Shape test used for rows whose encoding state is unknown.
    pub fn looks_like_ciphertext(value: &str) -> bool {
        let parts: Vec<&str> = value.split(SEPARATOR).collect();
        parts.len() == 3
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_hexdigit()))
    }
}

fn decode_component(
    name: &str,
    value: &str,
    expected_len: Option<usize>,
) -> Result<Vec<u8>, CryptoError> {
    let bytes = hex::decode(value)
        .map_err(|_| CryptoError::Decryption(format!("{} is not valid hex", name)))?;

    match expected_len {
        Some(len) if bytes.len() != len => Err(CryptoError::Decryption(format!(
            "{} must be {} bytes, got {}",
            name,
            len,
            bytes.len()
        ))),
        _ => Ok(bytes),
    }
}
