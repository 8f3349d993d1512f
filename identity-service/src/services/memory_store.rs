//! In-process [`IdentityStore`] for tests and local runs without PostgreSQL.
//!
//! Enforces the same uniqueness rules as the SQL schema. Every call holds a
//! single mutex, so approval is serialized exactly like a row lock would.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::store::{IdentityStore, Review, StoreError};
use crate::models::{
    AccountKind, CredentialRecord, IdentityEncoding, Membership, NewAdministrator, NewMember,
    NewRoleRequest, Organization, Page, ReviewDecision, RoleRequest, RoleRequestQuery,
    RoleRequestStatus, TransitionError,
};

#[derive(Default)]
struct Inner {
    members: BTreeMap<i64, CredentialRecord>,
    administrators: BTreeMap<i64, CredentialRecord>,
    organizations: BTreeMap<i64, Organization>,
    memberships: BTreeMap<i64, Membership>,
    role_requests: BTreeMap<i64, RoleRequest>,
    last_member_id: i64,
    last_administrator_id: i64,
    last_organization_id: i64,
    last_membership_id: i64,
    last_request_id: i64,
}

impl Inner {
    fn relation(&self, kind: AccountKind) -> &BTreeMap<i64, CredentialRecord> {
        match kind {
            AccountKind::Member => &self.members,
            AccountKind::Administrator => &self.administrators,
        }
    }

    fn relation_mut(&mut self, kind: AccountKind) -> &mut BTreeMap<i64, CredentialRecord> {
        match kind {
            AccountKind::Member => &mut self.members,
            AccountKind::Administrator => &mut self.administrators,
        }
    }

    fn index_taken(&self, kind: AccountKind, index: &str) -> bool {
        self.relation(kind)
            .values()
            .any(|r| r.identity_index.as_deref() == Some(index))
    }

    fn active_membership_exists(&self, member_id: i64, organization_id: i64) -> bool {
        self.memberships
            .values()
            .any(|m| m.member_id == member_id && m.organization_id == organization_id && m.active_flag)
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    latency_ms: AtomicU64,
    transient_failures: AtomicU32,
    fail_membership_lookups: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_organization(&self, label: &str) -> i64 {
        let mut inner = self.inner.lock().await;
        inner.last_organization_id += 1;
        let id = inner.last_organization_id;
        inner.organizations.insert(
            id,
            Organization {
                organization_id: id,
                organization_label: label.to_string(),
                active_flag: true,
            },
        );
        id
    }

    /// Seed an active membership directly, bypassing the request workflow.
    pub async fn insert_membership(&self, member_id: i64, organization_id: i64, position: &str) -> i64 {
        let mut inner = self.inner.lock().await;
        inner.last_membership_id += 1;
        let id = inner.last_membership_id;
        inner.memberships.insert(
            id,
            Membership {
                membership_id: id,
                member_id,
                organization_id,
                position: position.to_string(),
                active_flag: true,
                created_utc: Utc::now(),
                deactivated_utc: None,
            },
        );
        id
    }

    /// Seed a row written before blind indexing: no index, stored identity
    /// taken as-is (plaintext or an envelope).
    pub async fn insert_legacy_credential(
        &self,
        kind: AccountKind,
        stored_identity: &str,
        encoding: Option<IdentityEncoding>,
        password_hash: &str,
    ) -> i64 {
        let mut inner = self.inner.lock().await;
        let id = match kind {
            AccountKind::Member => {
                inner.last_member_id += 1;
                inner.last_member_id
            }
            AccountKind::Administrator => {
                inner.last_administrator_id += 1;
                inner.last_administrator_id
            }
        };
        inner.relation_mut(kind).insert(
            id,
            CredentialRecord {
                kind,
                id,
                identity: stored_identity.to_string(),
                identity_encoding: encoding,
                identity_index: None,
                password_hash: password_hash.to_string(),
                external_id: match kind {
                    AccountKind::Member => Some(format!("legacy-{}", id)),
                    AccountKind::Administrator => None,
                },
                display_name: Some("Legacy Account".to_string()),
                privacy_accepted_utc: None,
                created_utc: Utc::now(),
            },
        );
        id
    }

    pub async fn memberships_for(&self, member_id: i64) -> Vec<Membership> {
        let inner = self.inner.lock().await;
        inner
            .memberships
            .values()
            .filter(|m| m.member_id == member_id)
            .cloned()
            .collect()
    }

    pub async fn credential_snapshot(&self, kind: AccountKind, id: i64) -> Option<CredentialRecord> {
        let inner = self.inner.lock().await;
        inner.relation(kind).get(&id).cloned()
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the next `n` calls fail with [`StoreError::Transient`].
    pub fn fail_next_calls(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Make membership lookups fail with a backend error until reset.
    pub fn fail_membership_lookups(&self, fail: bool) {
        self.fail_membership_lookups.store(fail, Ordering::SeqCst);
    }

    async fn gate(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .transient_failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(StoreError::Transient("connection reset".to_string()));
        }
        Ok(())
    }

    fn membership_gate(&self) -> Result<(), StoreError> {
        if self.fail_membership_lookups.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("membership lookup failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn find_credential_by_index(
        &self,
        kind: AccountKind,
        identity_index: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        self.gate().await?;
        let inner = self.inner.lock().await;
        Ok(inner
            .relation(kind)
            .values()
            .find(|r| r.identity_index.as_deref() == Some(identity_index))
            .cloned())
    }

    async fn scan_unindexed_credentials(
        &self,
        kind: AccountKind,
        cap: i64,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        self.gate().await?;
        let inner = self.inner.lock().await;
        Ok(inner
            .relation(kind)
            .values()
            .filter(|r| r.identity_index.is_none())
            .take(usize::try_from(cap).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn get_credential(
        &self,
        kind: AccountKind,
        id: i64,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        self.gate().await?;
        let inner = self.inner.lock().await;
        Ok(inner.relation(kind).get(&id).cloned())
    }

    async fn external_id_exists(&self, external_id: &str) -> Result<bool, StoreError> {
        self.gate().await?;
        let inner = self.inner.lock().await;
        Ok(inner
            .members
            .values()
            .any(|r| r.external_id.as_deref() == Some(external_id)))
    }

    async fn insert_member(&self, member: NewMember) -> Result<i64, StoreError> {
        self.gate().await?;
        let mut inner = self.inner.lock().await;
        if inner
            .members
            .values()
            .any(|r| r.external_id.as_deref() == Some(member.external_id.as_str()))
        {
            return Err(StoreError::Conflict("External id already registered".to_string()));
        }
        if inner.index_taken(AccountKind::Member, &member.identity_index) {
            return Err(StoreError::Conflict("Identity already registered".to_string()));
        }
        inner.last_member_id += 1;
        let id = inner.last_member_id;
        let now = Utc::now();
        inner.members.insert(
            id,
            CredentialRecord {
                kind: AccountKind::Member,
                id,
                identity: member.identity_ciphertext,
                identity_encoding: Some(IdentityEncoding::Encrypted),
                identity_index: Some(member.identity_index),
                password_hash: member.password_hash,
                external_id: Some(member.external_id),
                display_name: Some(format!("{} {}", member.first_name, member.last_name)),
                privacy_accepted_utc: member.privacy_accepted.then_some(now),
                created_utc: now,
            },
        );
        Ok(id)
    }

    async fn insert_administrator(&self, admin: NewAdministrator) -> Result<i64, StoreError> {
        self.gate().await?;
        let mut inner = self.inner.lock().await;
        if inner.index_taken(AccountKind::Administrator, &admin.identity_index) {
            return Err(StoreError::Conflict("Identity already registered".to_string()));
        }
        inner.last_administrator_id += 1;
        let id = inner.last_administrator_id;
        inner.administrators.insert(
            id,
            CredentialRecord {
                kind: AccountKind::Administrator,
                id,
                identity: admin.identity_ciphertext,
                identity_encoding: Some(IdentityEncoding::Encrypted),
                identity_index: Some(admin.identity_index),
                password_hash: admin.password_hash,
                external_id: None,
                display_name: Some(admin.display_name),
                privacy_accepted_utc: None,
                created_utc: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn count_administrators(&self) -> Result<i64, StoreError> {
        self.gate().await?;
        let inner = self.inner.lock().await;
        Ok(inner.administrators.len() as i64)
    }

    async fn upgrade_identity(
        &self,
        kind: AccountKind,
        id: i64,
        identity_ciphertext: &str,
        identity_index: &str,
    ) -> Result<(), StoreError> {
        self.gate().await?;
        let mut inner = self.inner.lock().await;
        if inner.index_taken(kind, identity_index) {
            return Err(StoreError::Conflict("Identity already registered".to_string()));
        }
        if let Some(record) = inner.relation_mut(kind).get_mut(&id) {
            if record.identity_index.is_none() {
                record.identity = identity_ciphertext.to_string();
                record.identity_encoding = Some(IdentityEncoding::Encrypted);
                record.identity_index = Some(identity_index.to_string());
            }
        }
        Ok(())
    }

    async fn record_privacy_acceptance(
        &self,
        kind: AccountKind,
        id: i64,
        accepted_utc: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.gate().await?;
        let mut inner = self.inner.lock().await;
        let record = inner
            .relation_mut(kind)
            .get_mut(&id)
            .ok_or(StoreError::NotFound("Account"))?;
        record.privacy_accepted_utc.get_or_insert(accepted_utc);
        Ok(())
    }

    async fn get_organization(
        &self,
        organization_id: i64,
    ) -> Result<Option<Organization>, StoreError> {
        self.gate().await?;
        let inner = self.inner.lock().await;
        Ok(inner.organizations.get(&organization_id).cloned())
    }

    async fn first_active_membership(
        &self,
        member_id: i64,
    ) -> Result<Option<Membership>, StoreError> {
        self.gate().await?;
        self.membership_gate()?;
        let inner = self.inner.lock().await;
        // BTreeMap iterates in key order, so the first hit has the lowest id.
        Ok(inner
            .memberships
            .values()
            .find(|m| m.member_id == member_id && m.active_flag)
            .cloned())
    }

    async fn has_active_membership_in(
        &self,
        member_id: i64,
        organization_id: i64,
    ) -> Result<bool, StoreError> {
        self.gate().await?;
        self.membership_gate()?;
        let inner = self.inner.lock().await;
        Ok(inner.active_membership_exists(member_id, organization_id))
    }

    async fn deactivate_membership(
        &self,
        membership_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Membership, StoreError> {
        self.gate().await?;
        let mut inner = self.inner.lock().await;
        let membership = inner
            .memberships
            .get_mut(&membership_id)
            .ok_or(StoreError::NotFound("Membership"))?;
        if !membership.active_flag {
            return Err(StoreError::Conflict("Membership already inactive".to_string()));
        }
        membership.active_flag = false;
        membership.deactivated_utc = Some(at);
        Ok(membership.clone())
    }

    async fn has_pending_request(
        &self,
        member_id: i64,
        organization_id: i64,
    ) -> Result<bool, StoreError> {
        self.gate().await?;
        let inner = self.inner.lock().await;
        Ok(inner.role_requests.values().any(|r| {
            r.requester_id == member_id
                && r.organization_id == organization_id
                && r.status == RoleRequestStatus::Pending
        }))
    }

    async fn insert_role_request(
        &self,
        request: NewRoleRequest,
    ) -> Result<RoleRequest, StoreError> {
        self.gate().await?;
        let mut inner = self.inner.lock().await;
        if inner.role_requests.values().any(|r| {
            r.requester_id == request.requester_id
                && r.organization_id == request.organization_id
                && r.status == RoleRequestStatus::Pending
        }) {
            return Err(StoreError::Conflict(
                "A pending role request already exists for this organization".to_string(),
            ));
        }
        inner.last_request_id += 1;
        let created = RoleRequest {
            request_id: inner.last_request_id,
            requester_id: request.requester_id,
            organization_id: request.organization_id,
            requested_position: request.requested_position,
            justification: request.justification,
            status: RoleRequestStatus::Pending,
            requested_utc: Utc::now(),
            reviewer_id: None,
            review_notes: None,
            reviewed_utc: None,
        };
        inner.role_requests.insert(created.request_id, created.clone());
        Ok(created)
    }

    async fn approve_role_request(
        &self,
        request_id: i64,
        review: Review,
    ) -> Result<(RoleRequest, Membership), StoreError> {
        self.gate().await?;
        let mut inner = self.inner.lock().await;

        let current = inner
            .role_requests
            .get(&request_id)
            .cloned()
            .ok_or(StoreError::NotFound("Role request"))?;
        let next = current.status.transition(ReviewDecision::Approve)?;

        if inner.active_membership_exists(current.requester_id, current.organization_id) {
            return Err(StoreError::Conflict(
                "Member already holds an active membership in this organization".to_string(),
            ));
        }

        let approved = RoleRequest {
            status: next,
            reviewer_id: Some(review.reviewer_id),
            review_notes: review.notes,
            reviewed_utc: Some(review.reviewed_utc),
            ..current
        };

        inner.last_membership_id += 1;
        let membership = Membership {
            membership_id: inner.last_membership_id,
            member_id: approved.requester_id,
            organization_id: approved.organization_id,
            position: approved.requested_position.clone(),
            active_flag: true,
            created_utc: review.reviewed_utc,
            deactivated_utc: None,
        };

        inner.role_requests.insert(request_id, approved.clone());
        inner
            .memberships
            .insert(membership.membership_id, membership.clone());

        Ok((approved, membership))
    }

    async fn reject_role_request(
        &self,
        request_id: i64,
        review: Review,
    ) -> Result<RoleRequest, StoreError> {
        self.gate().await?;
        let mut inner = self.inner.lock().await;
        let request = inner
            .role_requests
            .get_mut(&request_id)
            .ok_or(StoreError::NotFound("Role request"))?;
        if request.status != RoleRequestStatus::Pending {
            return Err(TransitionError(request.status).into());
        }
        request.status = RoleRequestStatus::Rejected;
        request.reviewer_id = Some(review.reviewer_id);
        request.review_notes = review.notes;
        request.reviewed_utc = Some(review.reviewed_utc);
        Ok(request.clone())
    }

    async fn list_role_requests(
        &self,
        query: &RoleRequestQuery,
    ) -> Result<Page<RoleRequest>, StoreError> {
        self.gate().await?;
        let inner = self.inner.lock().await;
        let matching: Vec<&RoleRequest> = inner
            .role_requests
            .values()
            .rev()
            .filter(|r| query.status.map_or(true, |s| r.status == s))
            .filter(|r| query.requester_id.map_or(true, |id| r.requester_id == id))
            .collect();
        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(0))
            .take(query.per_page as usize)
            .cloned()
            .collect();
        Ok(Page { items, total })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.gate().await
    }
}
