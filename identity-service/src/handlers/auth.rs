use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::dtos::auth::{
    LoginRequest, LoginResponse, PrivacyAcceptanceResponse, RegisterRequest, RegisterResponse,
};
use crate::{middleware::AuthPrincipal, services::Registration, utils::ValidatedJson, AppState};

/// Exchange an identity and secret for a session token
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Missing identity or secret", body = ErrorResponse),
        (status = 401, description = "Invalid identity or secret", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.auth.login(&req.identity, &req.secret).await?;

    Ok((
        StatusCode::OK,
        Json(LoginResponse {
            token: outcome.token.token,
            token_type: "Bearer".to_string(),
            expires_in: outcome.token.expires_in,
            principal: outcome.principal.view(),
        }),
    ))
}

/// Register a member account
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Member registered", body = RegisterResponse),
        (status = 400, description = "Invalid identity or external id format", body = ErrorResponse),
        (status = 409, description = "Identity or external id already registered", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let member_id = state
        .auth
        .register(Registration {
            external_id: req.external_id,
            identity: req.identity,
            secret: req.secret,
            first_name: req.first_name,
            last_name: req.last_name,
            accept_privacy_policy: req.accept_privacy_policy,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            member_id,
            message: "Registration successful".to_string(),
        }),
    ))
}

/// Return the caller's principal with live roles
#[utoipa::path(
    get,
    path = "/verify",
    responses(
        (status = 200, description = "Token valid", body = PrincipalView),
        (status = 401, description = "Token expired or invalid", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn verify(AuthPrincipal(principal): AuthPrincipal) -> impl IntoResponse {
    Json(principal.view())
}

/// Record that the caller accepted the privacy policy
#[utoipa::path(
    post,
    path = "/me/privacy-acceptance",
    responses(
        (status = 200, description = "Acceptance recorded", body = PrivacyAcceptanceResponse),
        (status = 401, description = "Token expired or invalid", body = ErrorResponse),
        (status = 404, description = "Account no longer exists", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn accept_privacy_policy(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let accepted = state.auth.record_privacy_acceptance(&principal).await?;

    Ok(Json(PrivacyAcceptanceResponse {
        privacy_accepted_utc: accepted,
        message: "Privacy policy acceptance recorded".to_string(),
    }))
}
