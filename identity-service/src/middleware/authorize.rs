use axum::{extract::Request, middleware::Next, response::Response};
use service_core::error::AppError;

use crate::models::{roles, AccountKind, Principal};

/// Roles allowed to review role requests and manage memberships.
pub const REVIEWER_ROLES: &[&str] = &[roles::ADMIN, "administrator"];

/// Roles allowed to file role requests.
pub const MEMBER_ROLES: &[&str] = &[roles::MEMBER];

/// True when any role, or the account kind itself, is in `allowed`.
/// Comparison ignores case.
pub fn is_authorized(principal_roles: &[String], kind: AccountKind, allowed: &[&str]) -> bool {
    allowed.iter().any(|allowed| {
        allowed.eq_ignore_ascii_case(kind.as_str())
            || principal_roles.iter().any(|r| r.eq_ignore_ascii_case(allowed))
    })
}

/// Reject with 403 unless the reconciled principal matches `allowed`.
/// Runs after `auth_middleware`.
pub async fn require_roles(
    allowed: &'static [&'static str],
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = req.extensions().get::<Principal>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Principal missing from request extensions"
        ))
    })?;

    if !is_authorized(&principal.roles, principal.kind, allowed) {
        tracing::warn!(
            kind = %principal.kind,
            id = principal.id,
            roles = ?principal.roles,
            required = ?allowed,
            "Insufficient role"
        );
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Insufficient permissions"
        )));
    }

    Ok(next.run(req).await)
}
