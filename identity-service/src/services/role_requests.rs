//! Officer role request workflow: submit, review, list, and membership
//! deactivation.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::error::ServiceError;
use super::metrics;
use super::notifier::ReviewerNotifier;
use super::roles::RoleResolver;
use super::store::{Review, StoreGateway};
use crate::models::{
    AccountKind, Membership, NewRoleRequest, Page, Principal, RoleRequest, RoleRequestQuery,
    RoleRequestStatus,
};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct SubmitInput {
    pub organization_id: i64,
    pub requested_position: String,
    pub justification: Option<String>,
}

#[derive(Clone)]
pub struct RoleRequestService {
    gateway: StoreGateway,
    resolver: RoleResolver,
    notifier: Arc<dyn ReviewerNotifier>,
}

impl RoleRequestService {
    pub fn new(
        gateway: StoreGateway,
        resolver: RoleResolver,
        notifier: Arc<dyn ReviewerNotifier>,
    ) -> Self {
        Self {
            gateway,
            resolver,
            notifier,
        }
    }

    #[instrument(skip(self, principal, input), fields(member_id = principal.id, organization_id = input.organization_id))]
    pub async fn submit(
        &self,
        principal: &Principal,
        input: SubmitInput,
    ) -> Result<RoleRequest, ServiceError> {
        if principal.kind != AccountKind::Member {
            return Err(ServiceError::Forbidden(
                "Only members can request officer roles".to_string(),
            ));
        }

        let position = input.requested_position.trim().to_string();
        if position.is_empty() {
            return Err(ServiceError::ValidationError(
                "Requested position is required".to_string(),
            ));
        }

        let store = self.gateway.store();
        let organization = self
            .gateway
            .read("get_organization", || store.get_organization(input.organization_id))
            .await?
            .filter(|org| org.active_flag)
            .ok_or_else(|| ServiceError::ValidationError("Organization does not exist".to_string()))?;

        let pending = self
            .gateway
            .read("has_pending_request", || {
                store.has_pending_request(principal.id, organization.organization_id)
            })
            .await?;
        if pending {
            metrics::record_role_request("duplicate");
            return Err(ServiceError::Conflict(
                "A pending role request already exists for this organization".to_string(),
            ));
        }

        let already_member = self
            .gateway
            .read("has_active_membership_in", || {
                store.has_active_membership_in(principal.id, organization.organization_id)
            })
            .await?;
        if already_member {
            return Err(ServiceError::Conflict(
                "Member already holds an active membership in this organization".to_string(),
            ));
        }

        // The partial unique index still guards the race between the check and
        // this insert, so it is never retried.
        let request = self
            .gateway
            .write(
                "insert_role_request",
                store.insert_role_request(NewRoleRequest {
                    requester_id: principal.id,
                    organization_id: organization.organization_id,
                    requested_position: position,
                    justification: input
                        .justification
                        .map(|j| j.trim().to_string())
                        .filter(|j| !j.is_empty()),
                }),
            )
            .await?;

        metrics::record_role_request("submitted");
        info!(request_id = request.request_id, "Role request submitted");

        let notifier = Arc::clone(&self.notifier);
        let notified = request.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_role_request(&notified, &organization).await {
                warn!(
                    request_id = notified.request_id,
                    error = %e,
                    "Reviewer notification failed"
                );
            }
        });

        Ok(request)
    }

    #[instrument(skip(self, reviewer, notes), fields(reviewer_id = reviewer.id))]
    pub async fn approve(
        &self,
        reviewer: &Principal,
        request_id: i64,
        notes: Option<String>,
    ) -> Result<(RoleRequest, Membership), ServiceError> {
        let review = self.review(reviewer, notes)?;
        let store = self.gateway.store();

        let (request, membership) = self
            .gateway
            .write("approve_role_request", store.approve_role_request(request_id, review))
            .await
            .map_err(|e| {
                if matches!(e, ServiceError::Conflict(_)) {
                    metrics::record_role_request("approve_conflict");
                }
                e
            })?;

        self.resolver
            .invalidate(AccountKind::Member, request.requester_id)
            .await;

        metrics::record_role_request("approved");
        info!(
            membership_id = membership.membership_id,
            member_id = request.requester_id,
            "Role request approved"
        );
        Ok((request, membership))
    }

    #[instrument(skip(self, reviewer, notes), fields(reviewer_id = reviewer.id))]
    pub async fn reject(
        &self,
        reviewer: &Principal,
        request_id: i64,
        notes: Option<String>,
    ) -> Result<RoleRequest, ServiceError> {
        let review = self.review(reviewer, notes)?;
        let store = self.gateway.store();

        let request = self
            .gateway
            .guarded_write("reject_role_request", || {
                store.reject_role_request(request_id, review.clone())
            })
            .await?;

        metrics::record_role_request("rejected");
        info!("Role request rejected");
        Ok(request)
    }

    pub async fn list(
        &self,
        status: Option<RoleRequestStatus>,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> Result<(Page<RoleRequest>, RoleRequestQuery), ServiceError> {
        let query = page_query(status, None, page, per_page);
        let store = self.gateway.store();
        let result = self
            .gateway
            .read("list_role_requests", || store.list_role_requests(&query))
            .await?;
        Ok((result, query))
    }

    pub async fn list_mine(
        &self,
        principal: &Principal,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> Result<(Page<RoleRequest>, RoleRequestQuery), ServiceError> {
        if principal.kind != AccountKind::Member {
            return Err(ServiceError::Forbidden(
                "Only members have role requests".to_string(),
            ));
        }
        let query = page_query(None, Some(principal.id), page, per_page);
        let store = self.gateway.store();
        let result = self
            .gateway
            .read("list_role_requests", || store.list_role_requests(&query))
            .await?;
        Ok((result, query))
    }

    /// Used by removal flows; the member loses `officer` on their next
    /// request if this was their last active membership.
    #[instrument(skip(self, reviewer), fields(reviewer_id = reviewer.id))]
    pub async fn deactivate_membership(
        &self,
        reviewer: &Principal,
        membership_id: i64,
    ) -> Result<Membership, ServiceError> {
        require_reviewer(reviewer)?;
        let store = self.gateway.store();
        let now = Utc::now();
        let membership = self
            .gateway
            .write(
                "deactivate_membership",
                store.deactivate_membership(membership_id, now),
            )
            .await?;

        self.resolver
            .invalidate(AccountKind::Member, membership.member_id)
            .await;

        info!(member_id = membership.member_id, "Membership deactivated");
        Ok(membership)
    }

    fn review(&self, reviewer: &Principal, notes: Option<String>) -> Result<Review, ServiceError> {
        require_reviewer(reviewer)?;
        Ok(Review {
            reviewer_id: reviewer.id,
            notes: notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            reviewed_utc: Utc::now(),
        })
    }
}

fn require_reviewer(principal: &Principal) -> Result<(), ServiceError> {
    if principal.kind == AccountKind::Administrator {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Only administrators can review role requests".to_string(),
        ))
    }
}

fn page_query(
    status: Option<RoleRequestStatus>,
    requester_id: Option<i64>,
    page: Option<u32>,
    per_page: Option<u32>,
) -> RoleRequestQuery {
    RoleRequestQuery {
        status,
        requester_id,
        page: page.unwrap_or(1).max(1),
        per_page: per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
    }
}
