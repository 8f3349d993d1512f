use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::PrincipalView;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Identity is required"))]
    #[schema(example = "202211223@wmsu.edu.ph")]
    pub identity: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "Secret is required"))]
    #[schema(example = "correct horse battery")]
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    #[schema(example = 86400)]
    pub expires_in: i64,
    pub principal: PrincipalView,
}

/// Identity and external id formats are checked against the configured
/// registration policy in the service layer.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "External id is required"))]
    #[schema(example = "202211223")]
    pub external_id: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "Identity is required"))]
    #[schema(example = "202211223@wmsu.edu.ph")]
    pub identity: String,

    #[serde(default)]
    #[validate(length(min = 8, max = 128, message = "Secret must be between 8 and 128 characters"))]
    #[schema(min_length = 8)]
    pub secret: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    #[schema(example = "Maria")]
    pub first_name: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 100, message = "Last name is required"))]
    #[schema(example = "Santos")]
    pub last_name: String,

    #[serde(default)]
    pub accept_privacy_policy: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[schema(example = 42)]
    pub member_id: i64,
    #[schema(example = "Registration successful")]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyAcceptanceResponse {
    pub privacy_accepted_utc: DateTime<Utc>,
    #[schema(example = "Privacy policy acceptance recorded")]
    pub message: String,
}
