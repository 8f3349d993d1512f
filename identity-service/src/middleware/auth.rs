use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use service_core::middleware::tracing::RequestId;
use tracing::{debug, warn};

use crate::models::principal::normalize_roles;
use crate::models::{roles, AccountKind, Principal};
use crate::services::{metrics, RoleResolver, SessionClaims};
use crate::AppState;

/// Verify the bearer token, rebuild the principal, reconcile the officer
/// role against live memberships, and store the result in request
/// extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    let claims = state.jwt.verify(token).map_err(|e| {
        let request_id = req
            .extensions()
            .get::<RequestId>()
            .map(|RequestId(id)| id.as_str())
            .unwrap_or("-");
        debug!(request_id, reason = %e, "Rejected bearer token");
        AppError::Unauthorized(anyhow::anyhow!(e.to_string()))
    })?;

    let principal = principal_from_claims(claims)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid token")))?;

    let principal = reconcile_roles(&state.resolver, principal).await;

    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// Normalized principal from verified claims. `None` when no id claim is
/// present.
pub fn principal_from_claims(claims: SessionClaims) -> Option<Principal> {
    let id = claims.canonical_id()?;
    let roles = normalize_roles(&claims.roles);

    let kind = claims
        .kind
        .as_deref()
        .and_then(|k| k.parse::<AccountKind>().ok())
        .unwrap_or_else(|| {
            if roles.iter().any(|r| r == roles::ADMIN) {
                AccountKind::Administrator
            } else {
                AccountKind::Member
            }
        });

    Some(Principal {
        kind,
        id,
        identity: claims.identity,
        display_name: claims.name,
        roles,
        affiliation: claims.organization,
    })
}

/// Align the officer role and affiliation with live membership state.
///
/// Only members are reconciled; the admin role always comes from the token.
/// A failed live check keeps the token snapshot.
pub async fn reconcile_roles(resolver: &RoleResolver, mut principal: Principal) -> Principal {
    if principal.kind != AccountKind::Member {
        return principal;
    }

    let live = match resolver.resolve(principal.kind, principal.id).await {
        Ok(live) => live,
        Err(e) => {
            warn!(
                member_id = principal.id,
                error = %e,
                "Live role check failed, using token roles"
            );
            return principal;
        }
    };

    let claims_officer = principal.has_role(roles::OFFICER);
    if live.has_officer() && !claims_officer {
        debug!(member_id = principal.id, "Granting officer role from live membership");
        principal.grant(roles::OFFICER);
        metrics::record_role_reconciliation("granted");
    } else if !live.has_officer() && claims_officer {
        debug!(member_id = principal.id, "Stripping officer role revoked since issuance");
        principal.revoke(roles::OFFICER);
        metrics::record_role_reconciliation("revoked");
    }
    principal.affiliation = live.affiliation;

    principal
}

/// The reconciled principal for the current request.
pub struct AuthPrincipal(pub Principal);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts.extensions.get::<Principal>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Principal missing from request extensions"
            ))
        })?;

        Ok(AuthPrincipal(principal.clone()))
    }
}
