pub mod auth;
pub mod authorize;

pub use auth::{auth_middleware, AuthPrincipal};
pub use authorize::{is_authorized, require_roles, MEMBER_ROLES, REVIEWER_ROLES};
