//! Equality lookup over encrypted identity fields.
//!
//! Ciphertexts are randomized, so the database cannot compare them. Rows
//! written by this service carry a blind index and are found with one
//! indexed lookup. Rows without one (written before indexing) are found by
//! decrypting and comparing a bounded, id-ordered candidate set.

use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::error::ServiceError;
use super::metrics;
use super::store::StoreGateway;
use crate::config::LookupConfig;
use crate::crypto::{normalize_identity, BlindIndex, CryptoError, FieldCipher};
use crate::models::{AccountKind, CredentialRecord, IdentityEncoding};

/// Relations in lookup order. First match wins.
const LOOKUP_ORDER: [AccountKind; 2] = [AccountKind::Member, AccountKind::Administrator];

/// A credential row whose identity equals the looked-up value.
#[derive(Debug, Clone)]
pub struct CredentialMatch {
    pub record: CredentialRecord,
    /// Recovered plaintext identity.
    pub identity: String,
}

/// Encrypted identity plus its blind index, ready to persist.
#[derive(Debug, Clone)]
pub struct SealedIdentity {
    pub ciphertext: String,
    pub index: String,
}

#[derive(Clone)]
pub struct CredentialDirectory {
    gateway: StoreGateway,
    cipher: Arc<FieldCipher>,
    index: Arc<BlindIndex>,
    lookup: LookupConfig,
}

impl CredentialDirectory {
    pub fn new(
        gateway: StoreGateway,
        cipher: Arc<FieldCipher>,
        index: Arc<BlindIndex>,
        lookup: LookupConfig,
    ) -> Self {
        Self {
            gateway,
            cipher,
            index,
            lookup,
        }
    }

    /// Members first, then administrators.
    pub async fn find(&self, identity: &str) -> Result<Option<CredentialMatch>, ServiceError> {
        for kind in LOOKUP_ORDER {
            if let Some(found) = self.find_in(kind, identity).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    pub async fn find_in(
        &self,
        kind: AccountKind,
        identity: &str,
    ) -> Result<Option<CredentialMatch>, ServiceError> {
        let wanted = normalize_identity(identity);
        if wanted.is_empty() {
            return Ok(None);
        }

        let digest = self.index.compute(&wanted);
        let store = self.gateway.store();

        let indexed = self
            .gateway
            .read("find_credential_by_index", || {
                store.find_credential_by_index(kind, &digest)
            })
            .await?;

        if let Some(record) = indexed {
            match self.recover_identity(&record) {
                Ok(plain) if identities_equal(&plain, &wanted) => {
                    metrics::record_credential_lookup("index");
                    return Ok(Some(CredentialMatch {
                        record,
                        identity: plain,
                    }));
                }
                Ok(_) => warn!(
                    kind = %kind,
                    id = record.id,
                    "Blind index hit did not match stored identity"
                ),
                Err(e) => warn!(
                    kind = %kind,
                    id = record.id,
                    error = %e,
                    "Blind index hit could not be decrypted"
                ),
            }
        }

        let cap = self.scan_cap(kind);
        let candidates = self
            .gateway
            .read("scan_unindexed_credentials", || {
                store.scan_unindexed_credentials(kind, cap)
            })
            .await?;

        for record in candidates {
            let plain = match self.recover_identity(&record) {
                Ok(plain) => plain,
                Err(e) => {
                    debug!(kind = %kind, id = record.id, error = %e, "Skipping undecryptable candidate");
                    continue;
                }
            };

            if identities_equal(&plain, &wanted) {
                metrics::record_credential_lookup("scan");
                self.upgrade_legacy_row(&record, &plain).await;
                return Ok(Some(CredentialMatch {
                    record,
                    identity: plain,
                }));
            }
        }

        Ok(None)
    }

    /// Plaintext identity of a stored row, dispatching on its encoding tag.
    pub fn recover_identity(&self, record: &CredentialRecord) -> Result<String, CryptoError> {
        let encoding = record.identity_encoding.unwrap_or_else(|| {
            if FieldCipher::looks_like_ciphertext(&record.identity) {
                IdentityEncoding::Encrypted
            } else {
                IdentityEncoding::Plaintext
            }
        });

        match encoding {
            IdentityEncoding::Plaintext => Ok(record.identity.clone()),
            IdentityEncoding::Encrypted => self.cipher.decrypt(&record.identity),
        }
    }

    pub fn seal(&self, identity: &str) -> Result<SealedIdentity, ServiceError> {
        let normalized = normalize_identity(identity);
        let ciphertext = self
            .cipher
            .encrypt(&normalized)?
            .ok_or_else(|| ServiceError::ValidationError("Identity is required".to_string()))?;
        Ok(SealedIdentity {
            ciphertext,
            index: self.index.compute(&normalized),
        })
    }

    fn scan_cap(&self, kind: AccountKind) -> i64 {
        match kind {
            AccountKind::Member => self.lookup.member_scan_cap,
            AccountKind::Administrator => self.lookup.administrator_scan_cap,
        }
    }

    /// Encrypt and index a matched legacy row so later lookups take the
    /// indexed path. Failure leaves the row as it was.
    async fn upgrade_legacy_row(&self, record: &CredentialRecord, plain: &str) {
        let sealed = match self.seal(plain) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(id = record.id, error = %e, "Could not seal legacy identity");
                return;
            }
        };

        let store = self.gateway.store();
        let result = self
            .gateway
            .write(
                "upgrade_identity",
                store.upgrade_identity(record.kind, record.id, &sealed.ciphertext, &sealed.index),
            )
            .await;

        match result {
            Ok(()) => debug!(kind = %record.kind, id = record.id, "Legacy identity upgraded"),
            Err(e) => warn!(kind = %record.kind, id = record.id, error = %e, "Legacy identity upgrade failed"),
        }
    }
}

/// Constant-time comparison of normalized identities.
fn identities_equal(stored: &str, wanted_normalized: &str) -> bool {
    normalize_identity(stored)
        .as_bytes()
        .ct_eq(wanted_normalized.as_bytes())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::InMemoryStore;
    use crate::services::store::IdentityStore;
    use service_core::retry::RetryConfig;
    use std::time::Duration;

    const ENC_KEY: [u8; 32] = [7u8; 32];
    const IDX_KEY: [u8; 32] = [9u8; 32];

    fn directory(store: Arc<InMemoryStore>, cap: i64) -> CredentialDirectory {
        CredentialDirectory::new(
            StoreGateway::new(store, Duration::from_secs(1), RetryConfig::no_retry()),
            Arc::new(FieldCipher::new(&ENC_KEY)),
            Arc::new(BlindIndex::new(&IDX_KEY).unwrap()),
            LookupConfig {
                member_scan_cap: cap,
                administrator_scan_cap: cap,
            },
        )
    }

    #[test]
    fn identity_comparison_normalizes_stored_value() {
        assert!(identities_equal(" User@Example.COM ", "user@example.com"));
        assert!(!identities_equal("user@example.com", "user@example.co"));
    }

    #[tokio::test]
    async fn finds_every_legacy_row_within_the_bound() {
        let store = Arc::new(InMemoryStore::new());
        let cipher = FieldCipher::new(&ENC_KEY);
        let mut identities = Vec::new();
        for k in 0..12 {
            let identity = format!("2022000{:02}@wmsu.edu.ph", k);
            // Alternate plaintext and tagless ciphertext rows.
            let stored = if k % 2 == 0 {
                identity.clone()
            } else {
                cipher.encrypt(&identity).unwrap().unwrap()
            };
            store
                .insert_legacy_credential(AccountKind::Member, &stored, None, "hash")
                .await;
            identities.push(identity);
        }

        for (k, identity) in identities.iter().enumerate() {
            let dir = directory(store.clone(), 100);
            let found = dir.find(identity).await.unwrap().expect("row should be found");
            assert_eq!(found.record.id, k as i64 + 1);
            assert_eq!(&found.identity, identity);
        }
    }

    #[tokio::test]
    async fn rows_beyond_the_cap_are_not_found() {
        let store = Arc::new(InMemoryStore::new());
        for k in 0..5 {
            store
                .insert_legacy_credential(
                    AccountKind::Member,
                    &format!("user{}@wmsu.edu.ph", k),
                    Some(IdentityEncoding::Plaintext),
                    "hash",
                )
                .await;
        }
        let dir = directory(store, 3);
        assert!(dir.find("user2@wmsu.edu.ph").await.unwrap().is_some());
        assert!(dir.find("user4@wmsu.edu.ph").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undecryptable_candidates_are_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let other = FieldCipher::new(&[1u8; 32]);
        let foreign = other.encrypt("someone@wmsu.edu.ph").unwrap().unwrap();
        store
            .insert_legacy_credential(AccountKind::Member, &foreign, Some(IdentityEncoding::Encrypted), "hash")
            .await;
        store
            .insert_legacy_credential(AccountKind::Member, "target@wmsu.edu.ph", None, "hash")
            .await;

        let dir = directory(store, 10);
        let found = dir.find("target@wmsu.edu.ph").await.unwrap().unwrap();
        assert_eq!(found.record.id, 2);
    }

    #[tokio::test]
    async fn encoding_tag_overrides_shape_inference() {
        // A plaintext value that happens to look like an envelope.
        let shaped = "aa:bb:cc";
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_legacy_credential(
                AccountKind::Administrator,
                shaped,
                Some(IdentityEncoding::Plaintext),
                "hash",
            )
            .await;
        let dir = directory(store, 10);
        let found = dir.find(shaped).await.unwrap().unwrap();
        assert_eq!(found.record.kind, AccountKind::Administrator);
    }

    #[tokio::test]
    async fn matched_legacy_rows_are_indexed() {
        let store = Arc::new(InMemoryStore::new());
        let id = store
            .insert_legacy_credential(AccountKind::Member, "Old@WMSU.edu.ph", None, "hash")
            .await;
        let dir = directory(store.clone(), 10);
        dir.find("old@wmsu.edu.ph").await.unwrap().unwrap();

        let row = store.credential_snapshot(AccountKind::Member, id).await.unwrap();
        assert_eq!(row.identity_encoding, Some(IdentityEncoding::Encrypted));
        assert!(row.identity_index.is_some());
        assert!(FieldCipher::looks_like_ciphertext(&row.identity));

        // Now reachable by the indexed lookup alone, even with a zero-row scan.
        let indexed_only = directory(store.clone(), 1);
        let found = indexed_only.find("OLD@wmsu.edu.ph").await.unwrap().unwrap();
        assert_eq!(found.record.id, id);
        assert!(store.scan_unindexed_credentials(AccountKind::Member, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn members_are_checked_before_administrators() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_legacy_credential(AccountKind::Administrator, "dup@wmsu.edu.ph", None, "hash")
            .await;
        store
            .insert_legacy_credential(AccountKind::Member, "dup@wmsu.edu.ph", None, "hash")
            .await;
        let dir = directory(store, 10);
        let found = dir.find("dup@wmsu.edu.ph").await.unwrap().unwrap();
        assert_eq!(found.record.kind, AccountKind::Member);
    }
}
