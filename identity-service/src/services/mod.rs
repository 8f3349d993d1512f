//! Business logic: credential lookup, session tokens, role resolution,
//! and the officer role request workflow.

pub mod auth;
pub mod credentials;
mod database;
pub mod error;
pub mod jwt;
pub mod memory_store;
pub mod metrics;
pub mod notifier;
pub mod role_cache;
pub mod role_requests;
pub mod roles;
pub mod store;

pub use auth::{AuthService, LoginOutcome, Registration};
pub use credentials::{CredentialDirectory, CredentialMatch};
pub use database::PgStore;
pub use error::ServiceError;
pub use jwt::{IssuedToken, JwtService, SessionClaims, TokenError};
pub use memory_store::InMemoryStore;
pub use notifier::{NoopNotifier, RecordingNotifier, ReviewerNotifier, SmtpNotifier};
pub use role_cache::{
    build_role_cache, CacheRead, InMemoryRoleCache, NoRoleCache, RedisRoleCache, RoleCache,
};
pub use role_requests::{RoleRequestService, SubmitInput};
pub use roles::{ResolvedRoles, RoleResolver};
pub use store::{IdentityStore, StoreError, StoreGateway};
