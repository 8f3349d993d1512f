use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{AccountKind, Affiliation, Principal};

/// Session token service (HS256).
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_lifetime_minutes: i64,
    issuer: String,
}

/// Claims carried by a session token.
///
/// Tokens minted here set `id` (and `member_id` for members). Older
/// clients may carry only `user_id` or `session_id`; all four are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: `<kind>:<id>`
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_id: Option<i64>,
    #[serde(default)]
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Role snapshot as of issuance.
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<Affiliation>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl SessionClaims {
    /// First non-null of `id`, `user_id`, `session_id`, `member_id`.
    pub fn canonical_id(&self) -> Option<i64> {
        self.id
            .or(self.user_id)
            .or(self.session_id)
            .or(self.member_id)
    }
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        let secret = config.signing_secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            token_lifetime_minutes: config.token_lifetime_minutes,
            issuer: config.issuer.clone(),
        }
    }

    /// Mint a session token for `principal`, snapshotting its roles.
    pub fn issue(&self, principal: &Principal) -> Result<IssuedToken, anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.token_lifetime_minutes);

        let claims = SessionClaims {
            sub: format!("{}:{}", principal.kind, principal.id),
            kind: Some(principal.kind.to_string()),
            id: Some(principal.id),
            user_id: None,
            session_id: None,
            member_id: match principal.kind {
                AccountKind::Member => Some(principal.id),
                AccountKind::Administrator => None,
            },
            identity: principal.identity.clone(),
            name: principal.display_name.clone(),
            roles: principal.roles.clone(),
            organization: principal.affiliation.clone(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode session token: {}", e))?;

        Ok(IssuedToken {
            token,
            expires_in: self.token_lifetime_minutes * 60,
        })
    }

    /// Check signature, issuer, and expiry.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);

        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => {
                    tracing::debug!(error = %e, "Session token rejected");
                    TokenError::Invalid
                }
            })
    }
}
