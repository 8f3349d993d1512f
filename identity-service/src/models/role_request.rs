//! Role request model and its review state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoleRequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// Outcome a reviewer picks for a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Role request already {0}")]
pub struct TransitionError(pub RoleRequestStatus);

impl RoleRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleRequestStatus::Pending => "pending",
            RoleRequestStatus::Approved => "approved",
            RoleRequestStatus::Rejected => "rejected",
        }
    }

    /// Only `pending` moves, and only once.
    pub fn transition(self, decision: ReviewDecision) -> Result<Self, TransitionError> {
        match (self, decision) {
            (RoleRequestStatus::Pending, ReviewDecision::Approve) => Ok(RoleRequestStatus::Approved),
            (RoleRequestStatus::Pending, ReviewDecision::Reject) => Ok(RoleRequestStatus::Rejected),
            (terminal, _) => Err(TransitionError(terminal)),
        }
    }
}

impl fmt::Display for RoleRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(RoleRequestStatus::Pending),
            "approved" => Ok(RoleRequestStatus::Approved),
            "rejected" => Ok(RoleRequestStatus::Rejected),
            other => Err(format!("Unknown role request status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleRequest {
    pub request_id: i64,
    pub requester_id: i64,
    pub organization_id: i64,
    pub requested_position: String,
    pub justification: Option<String>,
    pub status: RoleRequestStatus,
    pub requested_utc: DateTime<Utc>,
    pub reviewer_id: Option<i64>,
    pub review_notes: Option<String>,
    pub reviewed_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewRoleRequest {
    pub requester_id: i64,
    pub organization_id: i64,
    pub requested_position: String,
    pub justification: Option<String>,
}

/// Listing filter. Pages are 1-based.
#[derive(Debug, Clone, Default)]
pub struct RoleRequestQuery {
    pub status: Option<RoleRequestStatus>,
    pub requester_id: Option<i64>,
    pub page: u32,
    pub per_page: u32,
}

impl RoleRequestQuery {
    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.per_page)
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}
