//! Login, registration, privacy-policy acceptance, and administrator
//! bootstrap.

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use super::credentials::CredentialDirectory;
use super::error::ServiceError;
use super::jwt::{IssuedToken, JwtService};
use super::metrics;
use super::roles::RoleResolver;
use super::store::StoreGateway;
use crate::config::RegistrationConfig;
use crate::crypto::normalize_identity;
use crate::models::{AccountKind, NewAdministrator, NewMember, Principal};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

pub const MIN_SECRET_LENGTH: usize = 8;

#[derive(Debug)]
pub struct LoginOutcome {
    pub token: IssuedToken,
    pub principal: Principal,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub external_id: String,
    pub identity: String,
    pub secret: String,
    pub first_name: String,
    pub last_name: String,
    pub accept_privacy_policy: bool,
}

#[derive(Clone)]
pub struct AuthService {
    directory: CredentialDirectory,
    resolver: RoleResolver,
    jwt: JwtService,
    gateway: StoreGateway,
    registration: RegistrationConfig,
    /// Verified against when no account matches, so unknown identities
    /// cost the same as wrong secrets.
    decoy_hash: PasswordHashString,
}

impl AuthService {
    pub fn new(
        directory: CredentialDirectory,
        resolver: RoleResolver,
        jwt: JwtService,
        gateway: StoreGateway,
        registration: RegistrationConfig,
    ) -> Result<Self, anyhow::Error> {
        let decoy_hash = hash_password(&Password::new("decoy-secret-never-matches".to_string()))?;
        Ok(Self {
            directory,
            resolver,
            jwt,
            gateway,
            registration,
            decoy_hash,
        })
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    #[instrument(skip_all)]
    pub async fn login(&self, identity: &str, secret: &str) -> Result<LoginOutcome, ServiceError> {
        if identity.trim().is_empty() || secret.is_empty() {
            return Err(ServiceError::ValidationError(
                "Identity and secret are required".to_string(),
            ));
        }

        let found = self.directory.find(identity).await?;

        let (found, stored_hash) = match found {
            Some(found) => {
                let hash = found.record.password_hash.clone();
                (Some(found), hash)
            }
            None => (None, self.decoy_hash.as_str().to_string()),
        };

        let verified = match verify_secret(secret.to_string(), stored_hash).await {
            Ok(verified) => verified,
            Err(e) => {
                error!(error = %e, "Stored secret hash could not be verified");
                false
            }
        };

        let found = match (found, verified) {
            (Some(found), true) => found,
            _ => {
                metrics::record_login("rejected");
                return Err(ServiceError::InvalidCredentials);
            }
        };

        let record = found.record;
        let resolved = self.resolver.resolve(record.kind, record.id).await?;

        let principal = Principal {
            kind: record.kind,
            id: record.id,
            identity: found.identity,
            display_name: record.display_name,
            roles: resolved.roles,
            affiliation: resolved.affiliation,
        };

        let token = self.jwt.issue(&principal)?;

        metrics::record_login("success");
        info!(kind = %principal.kind, id = principal.id, "Login succeeded");

        Ok(LoginOutcome { token, principal })
    }

    #[instrument(skip_all)]
    pub async fn register(&self, registration: Registration) -> Result<i64, ServiceError> {
        let identity = normalize_identity(&registration.identity);
        let external_id = registration.external_id.trim().to_string();

        self.check_identity_format(&identity)?;
        self.check_external_id_format(&external_id)?;
        if registration.secret.chars().count() < MIN_SECRET_LENGTH {
            return Err(ServiceError::ValidationError(format!(
                "Secret must be at least {} characters",
                MIN_SECRET_LENGTH
            )));
        }
        let first_name = registration.first_name.trim().to_string();
        let last_name = registration.last_name.trim().to_string();
        if first_name.is_empty() || last_name.is_empty() {
            return Err(ServiceError::ValidationError(
                "First and last name are required".to_string(),
            ));
        }

        let store = self.gateway.store();
        let external_taken = self
            .gateway
            .read("external_id_exists", || store.external_id_exists(&external_id))
            .await?;
        if external_taken {
            metrics::record_registration("duplicate_external_id");
            return Err(ServiceError::Conflict(
                "External id already registered".to_string(),
            ));
        }

        if self.directory.find(&identity).await?.is_some() {
            metrics::record_registration("duplicate_identity");
            return Err(ServiceError::Conflict("Identity already registered".to_string()));
        }

        let sealed = self.directory.seal(&identity)?;
        let password_hash = hash_secret(registration.secret).await?;

        let member_id = self
            .gateway
            .write(
                "insert_member",
                store.insert_member(NewMember {
                    external_id,
                    identity_ciphertext: sealed.ciphertext,
                    identity_index: sealed.index,
                    password_hash: password_hash.into_string(),
                    first_name,
                    last_name,
                    privacy_accepted: registration.accept_privacy_policy,
                }),
            )
            .await?;

        metrics::record_registration("success");
        info!(member_id, "Member registered");
        Ok(member_id)
    }

    /// Idempotent: the first acceptance timestamp is kept.
    pub async fn record_privacy_acceptance(
        &self,
        principal: &Principal,
    ) -> Result<DateTime<Utc>, ServiceError> {
        let now = Utc::now();
        let store = self.gateway.store();
        self.gateway
            .guarded_write("record_privacy_acceptance", || {
                store.record_privacy_acceptance(principal.kind, principal.id, now)
            })
            .await?;

        let record = self
            .gateway
            .read("get_credential", || store.get_credential(principal.kind, principal.id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("Account not found".to_string()))?;

        Ok(record.privacy_accepted_utc.unwrap_or(now))
    }

    /// Create the first administrator. Does nothing once any exists.
    pub async fn bootstrap_administrator(
        &self,
        identity: &str,
        secret: &str,
        display_name: &str,
    ) -> Result<Option<i64>, ServiceError> {
        let store = self.gateway.store();
        let existing = self
            .gateway
            .read("count_administrators", || store.count_administrators())
            .await?;
        if existing > 0 {
            info!(existing, "Administrators present, skipping bootstrap");
            return Ok(None);
        }

        let identity = normalize_identity(identity);
        if identity.is_empty() || secret.chars().count() < MIN_SECRET_LENGTH {
            return Err(ServiceError::ValidationError(
                "Bootstrap administrator needs an identity and a secret of at least 8 characters"
                    .to_string(),
            ));
        }

        if self
            .directory
            .find_in(AccountKind::Administrator, &identity)
            .await?
            .is_some()
        {
            warn!("Bootstrap identity already present as an administrator");
            return Ok(None);
        }

        let sealed = self.directory.seal(&identity)?;
        let password_hash = hash_secret(secret.to_string()).await?;

        let id = self
            .gateway
            .write(
                "insert_administrator",
                store.insert_administrator(NewAdministrator {
                    identity_ciphertext: sealed.ciphertext,
                    identity_index: sealed.index,
                    password_hash: password_hash.into_string(),
                    display_name: display_name.to_string(),
                }),
            )
            .await?;

        info!(administrator_id = id, "Bootstrap administrator created");
        Ok(Some(id))
    }

    /// `<N digits>@<domain>` with N and domain from configuration.
    fn check_identity_format(&self, identity: &str) -> Result<(), ServiceError> {
        let valid = identity
            .split_once('@')
            .map(|(local, domain)| {
                local.len() == self.registration.identity_prefix_len
                    && local.chars().all(|c| c.is_ascii_digit())
                    && domain == self.registration.identity_domain
            })
            .unwrap_or(false);

        if valid {
            Ok(())
        } else {
            Err(ServiceError::ValidationError(format!(
                "Identity must be {} digits followed by @{}",
                self.registration.identity_prefix_len, self.registration.identity_domain
            )))
        }
    }

    fn check_external_id_format(&self, external_id: &str) -> Result<(), ServiceError> {
        if external_id.len() == self.registration.external_id_len
            && external_id.chars().all(|c| c.is_ascii_digit())
        {
            Ok(())
        } else {
            Err(ServiceError::ValidationError(format!(
                "External id must be exactly {} digits",
                self.registration.external_id_len
            )))
        }
    }
}

/// Argon2 is deliberately slow; run it on the blocking pool.
async fn hash_secret(secret: String) -> Result<PasswordHashString, ServiceError> {
    let password = Password::new(secret);
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| anyhow::anyhow!("Hashing task failed: {}", e))??;
    Ok(hashed)
}

async fn verify_secret(secret: String, stored_hash: String) -> Result<bool, anyhow::Error> {
    tokio::task::spawn_blocking(move || {
        verify_password(&Password::new(secret), &PasswordHashString::new(stored_hash))
    })
    .await
    .map_err(|e| anyhow::anyhow!("Verification task failed: {}", e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JwtConfig, LookupConfig};
    use crate::crypto::{BlindIndex, FieldCipher};
    use crate::services::memory_store::InMemoryStore;
    use crate::services::role_cache::NoRoleCache;
    use secrecy::Secret;
    use service_core::retry::RetryConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn service(store: Arc<InMemoryStore>) -> AuthService {
        let gateway = StoreGateway::new(store, Duration::from_secs(2), RetryConfig::no_retry());
        let directory = CredentialDirectory::new(
            gateway.clone(),
            Arc::new(FieldCipher::new(&[3u8; 32])),
            Arc::new(BlindIndex::new(&[4u8; 32]).unwrap()),
            LookupConfig {
                member_scan_cap: 100,
                administrator_scan_cap: 100,
            },
        );
        let resolver = RoleResolver::new(gateway.clone(), Arc::new(NoRoleCache));
        let jwt = JwtService::new(&JwtConfig {
            signing_secret: Secret::new("auth-unit-test-signing-secret-0123456789".to_string()),
            token_lifetime_minutes: 60,
            issuer: "identity-service".to_string(),
        });
        AuthService::new(
            directory,
            resolver,
            jwt,
            gateway,
            RegistrationConfig {
                identity_domain: "wmsu.edu.ph".to_string(),
                identity_prefix_len: 9,
                external_id_len: 9,
            },
        )
        .unwrap()
    }

    fn registration(identity: &str, external_id: &str) -> Registration {
        Registration {
            external_id: external_id.to_string(),
            identity: identity.to_string(),
            secret: "correct horse".to_string(),
            first_name: "Maria".to_string(),
            last_name: "Santos".to_string(),
            accept_privacy_policy: true,
        }
    }

    #[tokio::test]
    async fn register_then_login_yields_member_role_only() {
        let store = Arc::new(InMemoryStore::new());
        let auth = service(store.clone());
        let id = auth
            .register(registration("202211223@wmsu.edu.ph", "202211223"))
            .await
            .unwrap();

        let stored = store.credential_snapshot(AccountKind::Member, id).await.unwrap();
        assert!(FieldCipher::looks_like_ciphertext(&stored.identity));
        assert!(!stored.identity.contains("202211223"));
        assert!(stored.privacy_accepted_utc.is_some());

        let outcome = auth.login("202211223@WMSU.edu.ph ", "correct horse").await.unwrap();
        assert_eq!(outcome.principal.roles, vec!["member"]);
        assert_eq!(outcome.principal.identity, "202211223@wmsu.edu.ph");
        let claims = auth.jwt().verify(&outcome.token.token).unwrap();
        assert_eq!(claims.roles, vec!["member"]);
    }

    #[tokio::test]
    async fn unknown_identity_and_wrong_secret_fail_identically() {
        let store = Arc::new(InMemoryStore::new());
        let auth = service(store);
        auth.register(registration("202211223@wmsu.edu.ph", "202211223"))
            .await
            .unwrap();

        let wrong = auth.login("202211223@wmsu.edu.ph", "not the secret").await.unwrap_err();
        let unknown = auth.login("209999999@wmsu.edu.ph", "correct horse").await.unwrap_err();
        assert!(matches!(wrong, ServiceError::InvalidCredentials));
        assert!(matches!(unknown, ServiceError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn login_requires_both_fields() {
        let auth = service(Arc::new(InMemoryStore::new()));
        assert!(matches!(
            auth.login("", "x").await,
            Err(ServiceError::ValidationError(_))
        ));
        assert!(matches!(
            auth.login("202211223@wmsu.edu.ph", "").await,
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn registration_enforces_formats() {
        let auth = service(Arc::new(InMemoryStore::new()));
        for (identity, external_id) in [
            ("20221122@wmsu.edu.ph", "202211223"),
            ("2022112234@wmsu.edu.ph", "202211223"),
            ("20221122a@wmsu.edu.ph", "202211223"),
            ("202211223@gmail.com", "202211223"),
            ("202211223", "202211223"),
            ("202211223@wmsu.edu.ph", "2022"),
            ("202211223@wmsu.edu.ph", "20221122x"),
        ] {
            assert!(
                matches!(
                    auth.register(registration(identity, external_id)).await,
                    Err(ServiceError::ValidationError(_))
                ),
                "{} / {} should be rejected",
                identity,
                external_id
            );
        }
    }

    #[tokio::test]
    async fn duplicate_registrations_conflict() {
        let auth = service(Arc::new(InMemoryStore::new()));
        auth.register(registration("202211223@wmsu.edu.ph", "202211223"))
            .await
            .unwrap();

        let same_external = auth
            .register(registration("202211224@wmsu.edu.ph", "202211223"))
            .await
            .unwrap_err();
        assert!(matches!(same_external, ServiceError::Conflict(ref m) if m == "External id already registered"));

        let same_identity = auth
            .register(registration("202211223@wmsu.edu.ph", "202211225"))
            .await
            .unwrap_err();
        assert!(matches!(same_identity, ServiceError::Conflict(ref m) if m == "Identity already registered"));
    }

    #[tokio::test]
    async fn duplicate_of_legacy_plaintext_identity_is_detected() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_legacy_credential(AccountKind::Member, "202211223@wmsu.edu.ph", None, "legacy")
            .await;
        let auth = service(store);
        let err = auth
            .register(registration("202211223@wmsu.edu.ph", "202211223"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn bootstrap_creates_one_administrator() {
        let store = Arc::new(InMemoryStore::new());
        let auth = service(store.clone());
        let first = auth
            .bootstrap_administrator("Admin@wmsu.edu.ph", "bootstrap-secret", "Registrar")
            .await
            .unwrap();
        assert_eq!(first, Some(1));
        let second = auth
            .bootstrap_administrator("other@wmsu.edu.ph", "bootstrap-secret", "Registrar")
            .await
            .unwrap();
        assert_eq!(second, None);

        let outcome = auth.login("admin@wmsu.edu.ph", "bootstrap-secret").await.unwrap();
        assert_eq!(outcome.principal.kind, AccountKind::Administrator);
        assert_eq!(outcome.principal.roles, vec!["admin"]);
    }

    #[tokio::test]
    async fn privacy_acceptance_keeps_first_timestamp() {
        let store = Arc::new(InMemoryStore::new());
        let auth = service(store);
        let mut reg = registration("202211223@wmsu.edu.ph", "202211223");
        reg.accept_privacy_policy = false;
        let id = auth.register(reg).await.unwrap();
        let principal = auth
            .login("202211223@wmsu.edu.ph", "correct horse")
            .await
            .unwrap()
            .principal;
        assert_eq!(principal.id, id);

        let first = auth.record_privacy_acceptance(&principal).await.unwrap();
        let second = auth.record_privacy_acceptance(&principal).await.unwrap();
        assert_eq!(first, second);
    }
}
