use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::{Membership, RoleRequest};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRoleRequest {
    #[validate(range(min = 1, message = "Organization id must be positive"))]
    #[schema(example = 3)]
    pub organization_id: i64,

    #[serde(default = "default_position")]
    #[validate(length(min = 1, max = 100, message = "Requested position must be 1-100 characters"))]
    #[schema(example = "officer")]
    pub requested_position: String,

    #[validate(length(max = 2000, message = "Justification must be at most 2000 characters"))]
    #[schema(example = "Elected secretary for this term")]
    pub justification: Option<String>,
}

fn default_position() -> String {
    "officer".to_string()
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRoleRequest {
    #[validate(length(max = 2000, message = "Review notes must be at most 2000 characters"))]
    #[schema(example = "Confirmed with the adviser")]
    pub review_notes: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListRoleRequestsParams {
    /// pending | approved | rejected
    pub status: Option<String>,
    /// 1-based page number
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleRequestListResponse {
    pub items: Vec<RoleRequest>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRoleRequestResponse {
    pub request: RoleRequest,
    pub membership: Membership,
}
