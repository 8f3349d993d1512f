//! Persistence seam for credentials, memberships, and role requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::retry::Transient;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::error::ServiceError;
use crate::models::{
    AccountKind, CredentialRecord, Membership, NewAdministrator, NewMember, NewRoleRequest,
    Organization, Page, RoleRequest, RoleRequestQuery, TransitionError,
};
use service_core::retry::{retry_idempotent, RetryConfig};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// Uniqueness guard tripped; the message is safe to show clients.
    #[error("{0}")]
    Conflict(String),

    /// Connectivity problem worth retrying on idempotent calls.
    #[error("Store unavailable: {0}")]
    Transient(String),

    #[error("Store failure: {0}")]
    Backend(String),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Review outcome written by approve/reject.
#[derive(Debug, Clone)]
pub struct Review {
    pub reviewer_id: i64,
    pub notes: Option<String>,
    pub reviewed_utc: DateTime<Utc>,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    // Credentials

    /// Exact blind-index lookup.
    async fn find_credential_by_index(
        &self,
        kind: AccountKind,
        identity_index: &str,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    /// Rows without a blind index, lowest id first, at most `cap`.
    async fn scan_unindexed_credentials(
        &self,
        kind: AccountKind,
        cap: i64,
    ) -> Result<Vec<CredentialRecord>, StoreError>;

    async fn get_credential(
        &self,
        kind: AccountKind,
        id: i64,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    async fn external_id_exists(&self, external_id: &str) -> Result<bool, StoreError>;

    async fn insert_member(&self, member: NewMember) -> Result<i64, StoreError>;

    async fn insert_administrator(&self, admin: NewAdministrator) -> Result<i64, StoreError>;

    async fn count_administrators(&self) -> Result<i64, StoreError>;

    /// Rewrite a legacy row with an encrypted identity and its blind index.
    async fn upgrade_identity(
        &self,
        kind: AccountKind,
        id: i64,
        identity_ciphertext: &str,
        identity_index: &str,
    ) -> Result<(), StoreError>;

    async fn record_privacy_acceptance(
        &self,
        kind: AccountKind,
        id: i64,
        accepted_utc: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // Organizations and memberships

    async fn get_organization(&self, organization_id: i64)
        -> Result<Option<Organization>, StoreError>;

    /// Active membership with the lowest id.
    async fn first_active_membership(
        &self,
        member_id: i64,
    ) -> Result<Option<Membership>, StoreError>;

    async fn has_active_membership_in(
        &self,
        member_id: i64,
        organization_id: i64,
    ) -> Result<bool, StoreError>;

    /// Flip `active_flag` off. Fails with `Conflict` if already inactive.
    async fn deactivate_membership(
        &self,
        membership_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Membership, StoreError>;

    // Role requests

    async fn has_pending_request(
        &self,
        member_id: i64,
        organization_id: i64,
    ) -> Result<bool, StoreError>;

    /// Duplicate pending pairs fail with `Conflict`.
    async fn insert_role_request(&self, request: NewRoleRequest)
        -> Result<RoleRequest, StoreError>;

    /// Lock the request, move it to `approved`, and insert the membership,
    /// all in one transaction.
    async fn approve_role_request(
        &self,
        request_id: i64,
        review: Review,
    ) -> Result<(RoleRequest, Membership), StoreError>;

    /// Status-guarded update; safe to retry.
    async fn reject_role_request(
        &self,
        request_id: i64,
        review: Review,
    ) -> Result<RoleRequest, StoreError>;

    async fn list_role_requests(
        &self,
        query: &RoleRequestQuery,
    ) -> Result<Page<RoleRequest>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Applies the query deadline to every call and retries idempotent ones.
#[derive(Clone)]
pub struct StoreGateway {
    store: Arc<dyn IdentityStore>,
    deadline: Duration,
    retry: RetryConfig,
}

impl StoreGateway {
    pub fn new(store: Arc<dyn IdentityStore>, deadline: Duration, retry: RetryConfig) -> Self {
        Self {
            store,
            deadline,
            retry,
        }
    }

    pub fn store(&self) -> &dyn IdentityStore {
        self.store.as_ref()
    }

    /// Reads. Transient failures are retried.
    pub async fn read<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.retried(operation, f).await
    }

    /// Updates guarded by the row's current state, so repeating one after a
    /// lost reply changes nothing. Retried like reads.
    pub async fn guarded_write<T, F, Fut>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.retried(operation, f).await
    }

    /// Inserts and other calls that must run at most once.
    pub async fn write<T, Fut>(&self, operation: &'static str, fut: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.bounded(operation, fut).await
    }

    async fn retried<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempt = retry_idempotent(&self.retry, operation, f);
        self.bounded(operation, attempt).await
    }

    async fn bounded<T, Fut>(&self, operation: &'static str, fut: Fut) -> Result<T, ServiceError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result.map_err(ServiceError::from),
            Err(_) => {
                tracing::error!(operation, deadline_ms = self.deadline.as_millis() as u64, "Store call timed out");
                Err(ServiceError::Timeout(operation))
            }
        }
    }
}
