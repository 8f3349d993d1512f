use serde::Serialize;
use utoipa::ToSchema;

/// Organization a member can be an officer of. Owned by an external
/// collaborator; this service only reads it.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub organization_id: i64,
    pub organization_label: String,
    pub active_flag: bool,
}
