use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::roles::{
    ApproveRoleRequestResponse, ListRoleRequestsParams, ReviewRoleRequest,
    RoleRequestListResponse, SubmitRoleRequest,
};
use crate::models::{Page, RoleRequest, RoleRequestQuery, RoleRequestStatus};
use crate::{middleware::AuthPrincipal, services::SubmitInput, utils::ValidatedJson, AppState};

/// Ask for an officer role in an organization
#[utoipa::path(
    post,
    path = "/roles/request",
    request_body = SubmitRoleRequest,
    responses(
        (status = 201, description = "Request filed", body = RoleRequest),
        (status = 400, description = "Unknown or inactive organization", body = ErrorResponse),
        (status = 403, description = "Caller is not a member", body = ErrorResponse),
        (status = 409, description = "Pending request or active membership exists", body = ErrorResponse)
    ),
    tag = "Role Requests",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn submit_role_request(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    ValidatedJson(req): ValidatedJson<SubmitRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = state
        .role_requests
        .submit(
            &principal,
            SubmitInput {
                organization_id: req.organization_id,
                requested_position: req.requested_position,
                justification: req.justification,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(request)))
}

/// Approve a pending request and create the membership
#[utoipa::path(
    post,
    path = "/roles/approve/{id}",
    params(("id" = i64, Path, description = "Role request id")),
    request_body(content = ReviewRoleRequest, description = "Optional review notes"),
    responses(
        (status = 200, description = "Request approved", body = ApproveRoleRequestResponse),
        (status = 403, description = "Caller is not a reviewer", body = ErrorResponse),
        (status = 404, description = "Role request not found", body = ErrorResponse),
        (status = 409, description = "Request already reviewed", body = ErrorResponse)
    ),
    tag = "Role Requests",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn approve_role_request(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let review = parse_review(&body)?;
    let (request, membership) = state
        .role_requests
        .approve(&principal, id, review.review_notes)
        .await?;

    Ok(Json(ApproveRoleRequestResponse {
        request,
        membership,
    }))
}

/// Reject a pending request
#[utoipa::path(
    post,
    path = "/roles/reject/{id}",
    params(("id" = i64, Path, description = "Role request id")),
    request_body(content = ReviewRoleRequest, description = "Optional review notes"),
    responses(
        (status = 200, description = "Request rejected", body = RoleRequest),
        (status = 403, description = "Caller is not a reviewer", body = ErrorResponse),
        (status = 404, description = "Role request not found", body = ErrorResponse),
        (status = 409, description = "Request already reviewed", body = ErrorResponse)
    ),
    tag = "Role Requests",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn reject_role_request(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let review = parse_review(&body)?;
    let request = state
        .role_requests
        .reject(&principal, id, review.review_notes)
        .await?;

    Ok(Json(request))
}

/// List role requests for review
#[utoipa::path(
    get,
    path = "/roles/requests",
    params(ListRoleRequestsParams),
    responses(
        (status = 200, description = "One page of requests", body = RoleRequestListResponse),
        (status = 400, description = "Unknown status filter", body = ErrorResponse),
        (status = 403, description = "Caller is not a reviewer", body = ErrorResponse)
    ),
    tag = "Role Requests",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_role_requests(
    State(state): State<AppState>,
    Query(params): Query<ListRoleRequestsParams>,
) -> Result<impl IntoResponse, AppError> {
    let status = params
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<RoleRequestStatus>())
        .transpose()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;

    let (page, query) = state
        .role_requests
        .list(status, params.page, params.per_page)
        .await?;

    Ok(Json(list_response(page, &query)))
}

/// List the caller's own role requests
#[utoipa::path(
    get,
    path = "/roles/requests/mine",
    params(ListRoleRequestsParams),
    responses(
        (status = 200, description = "One page of the caller's requests", body = RoleRequestListResponse),
        (status = 403, description = "Caller is not a member", body = ErrorResponse)
    ),
    tag = "Role Requests",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn list_my_role_requests(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Query(params): Query<ListRoleRequestsParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, query) = state
        .role_requests
        .list_mine(&principal, params.page, params.per_page)
        .await?;

    Ok(Json(list_response(page, &query)))
}

/// Deactivate a membership; the member loses the officer role if it was
/// their last one
#[utoipa::path(
    post,
    path = "/memberships/{id}/deactivate",
    params(("id" = i64, Path, description = "Membership id")),
    responses(
        (status = 200, description = "Membership deactivated", body = Membership),
        (status = 403, description = "Caller is not a reviewer", body = ErrorResponse),
        (status = 404, description = "Membership not found", body = ErrorResponse),
        (status = 409, description = "Membership already inactive", body = ErrorResponse)
    ),
    tag = "Memberships",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn deactivate_membership(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let membership = state
        .role_requests
        .deactivate_membership(&principal, id)
        .await?;

    Ok(Json(membership))
}

/// Review bodies are optional; an empty body means no notes.
fn parse_review(body: &[u8]) -> Result<ReviewRoleRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ReviewRoleRequest::default());
    }
    let review: ReviewRoleRequest = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", e)))?;
    review.validate()?;
    Ok(review)
}

fn list_response(page: Page<RoleRequest>, query: &RoleRequestQuery) -> RoleRequestListResponse {
    RoleRequestListResponse {
        items: page.items,
        total: page.total,
        page: query.page,
        per_page: query.per_page,
    }
}
