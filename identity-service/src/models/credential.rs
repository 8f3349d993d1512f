//! Credential records for both account relations.

use chrono::{DateTime, Utc};

use super::AccountKind;

/// How the stored identity value is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityEncoding {
    /// Legacy row written before field encryption.
    Plaintext,
    Encrypted,
}

impl IdentityEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityEncoding::Plaintext => "plaintext",
            IdentityEncoding::Encrypted => "encrypted",
        }
    }

    /// Unknown or missing tags are `None`; callers fall back to shape inference.
    pub fn parse(code: Option<&str>) -> Option<Self> {
        match code {
            Some("plaintext") => Some(IdentityEncoding::Plaintext),
            Some("encrypted") => Some(IdentityEncoding::Encrypted),
            _ => None,
        }
    }
}

/// Stored identity + secret pair.
#[derive(Clone)]
pub struct CredentialRecord {
    pub kind: AccountKind,
    pub id: i64,
    /// Ciphertext envelope or legacy plaintext, see `identity_encoding`.
    pub identity: String,
    pub identity_encoding: Option<IdentityEncoding>,
    pub identity_index: Option<String>,
    pub password_hash: String,
    pub external_id: Option<String>,
    pub display_name: Option<String>,
    pub privacy_accepted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("identity_encoding", &self.identity_encoding)
            .field("external_id", &self.external_id)
            .finish_non_exhaustive()
    }
}

/// Insert payload for a member. Identity is already encrypted.
#[derive(Debug, Clone)]
pub struct NewMember {
    pub external_id: String,
    pub identity_ciphertext: String,
    pub identity_index: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub privacy_accepted: bool,
}

/// Insert payload for an administrator. Identity is already encrypted.
#[derive(Debug, Clone)]
pub struct NewAdministrator {
    pub identity_ciphertext: String,
    pub identity_index: String,
    pub password_hash: String,
    pub display_name: String,
}
