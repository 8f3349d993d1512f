//! Membership model - links a member to an organization position.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::Affiliation;

/// Membership entity. Deactivated, never deleted.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub membership_id: i64,
    pub member_id: i64,
    pub organization_id: i64,
    pub position: String,
    pub active_flag: bool,
    pub created_utc: DateTime<Utc>,
    pub deactivated_utc: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn affiliation(&self) -> Affiliation {
        Affiliation {
            organization_id: self.organization_id,
            position: self.position.clone(),
        }
    }
}
