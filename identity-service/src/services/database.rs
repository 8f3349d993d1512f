//! PostgreSQL implementation of [`IdentityStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;

use super::store::{IdentityStore, Review, StoreError};
use crate::models::{
    AccountKind, CredentialRecord, IdentityEncoding, Membership, NewAdministrator, NewMember,
    NewRoleRequest, Organization, Page, ReviewDecision, RoleRequest, RoleRequestQuery,
    RoleRequestStatus, TransitionError,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Record"),
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::Conflict(conflict_message(db.constraint()).to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

fn conflict_message(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("idx_members_external_id") => "External id already registered",
        Some("idx_members_identity_index") | Some("idx_administrators_identity_index") => {
            "Identity already registered"
        }
        Some("idx_role_requests_one_pending") => {
            "A pending role request already exists for this organization"
        }
        Some("idx_memberships_one_active_per_org") => {
            "Member already holds an active membership in this organization"
        }
        _ => "Duplicate record",
    }
}

const MEMBER_CREDENTIAL_COLUMNS: &str = r#"
    member_id AS id, identity_value, identity_encoding, identity_index, password_hash,
    external_id, first_name || ' ' || last_name AS display_name,
    privacy_accepted_utc, created_utc
"#;

const ADMIN_CREDENTIAL_COLUMNS: &str = r#"
    administrator_id AS id, identity_value, identity_encoding, identity_index, password_hash,
    NULL::TEXT AS external_id, display_name, privacy_accepted_utc, created_utc
"#;

const ROLE_REQUEST_COLUMNS: &str = r#"
    request_id, requester_id, organization_id, requested_position, justification,
    status_code, requested_utc, reviewer_id, review_notes, reviewed_utc
"#;

const MEMBERSHIP_COLUMNS: &str = r#"
    membership_id, member_id, organization_id, position, active_flag, created_utc, deactivated_utc
"#;

/// (table, id column, select list) for a credential relation.
fn credential_table(kind: AccountKind) -> (&'static str, &'static str, &'static str) {
    match kind {
        AccountKind::Member => ("members", "member_id", MEMBER_CREDENTIAL_COLUMNS),
        AccountKind::Administrator => (
            "administrators",
            "administrator_id",
            ADMIN_CREDENTIAL_COLUMNS,
        ),
    }
}

#[derive(FromRow)]
struct CredentialRow {
    id: i64,
    identity_value: String,
    identity_encoding: Option<String>,
    identity_index: Option<String>,
    password_hash: String,
    external_id: Option<String>,
    display_name: Option<String>,
    privacy_accepted_utc: Option<DateTime<Utc>>,
    created_utc: DateTime<Utc>,
}

impl CredentialRow {
    fn into_record(self, kind: AccountKind) -> CredentialRecord {
        CredentialRecord {
            kind,
            id: self.id,
            identity: self.identity_value,
            identity_encoding: IdentityEncoding::parse(self.identity_encoding.as_deref()),
            identity_index: self.identity_index,
            password_hash: self.password_hash,
            external_id: self.external_id,
            display_name: self.display_name,
            privacy_accepted_utc: self.privacy_accepted_utc,
            created_utc: self.created_utc,
        }
    }
}

#[derive(FromRow)]
struct RoleRequestRow {
    request_id: i64,
    requester_id: i64,
    organization_id: i64,
    requested_position: String,
    justification: Option<String>,
    status_code: String,
    requested_utc: DateTime<Utc>,
    reviewer_id: Option<i64>,
    review_notes: Option<String>,
    reviewed_utc: Option<DateTime<Utc>>,
}

impl TryFrom<RoleRequestRow> for RoleRequest {
    type Error = StoreError;

    fn try_from(row: RoleRequestRow) -> Result<Self, Self::Error> {
        let status = row
            .status_code
            .parse::<RoleRequestStatus>()
            .map_err(StoreError::Backend)?;
        Ok(RoleRequest {
            request_id: row.request_id,
            requester_id: row.requester_id,
            organization_id: row.organization_id,
            requested_position: row.requested_position,
            justification: row.justification,
            status,
            requested_utc: row.requested_utc,
            reviewer_id: row.reviewer_id,
            review_notes: row.review_notes,
            reviewed_utc: row.reviewed_utc,
        })
    }
}

#[derive(FromRow)]
struct MembershipRow {
    membership_id: i64,
    member_id: i64,
    organization_id: i64,
    position: String,
    active_flag: bool,
    created_utc: DateTime<Utc>,
    deactivated_utc: Option<DateTime<Utc>>,
}

impl From<MembershipRow> for Membership {
    fn from(row: MembershipRow) -> Self {
        Membership {
            membership_id: row.membership_id,
            member_id: row.member_id,
            organization_id: row.organization_id,
            position: row.position,
            active_flag: row.active_flag,
            created_utc: row.created_utc,
            deactivated_utc: row.deactivated_utc,
        }
    }
}

#[derive(FromRow)]
struct OrganizationRow {
    organization_id: i64,
    organization_label: String,
    active_flag: bool,
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn find_credential_by_index(
        &self,
        kind: AccountKind,
        identity_index: &str,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let (table, _, columns) = credential_table(kind);
        let sql = format!(
            "SELECT {} FROM {} WHERE identity_index = $1",
            columns, table
        );
        let row = sqlx::query_as::<_, CredentialRow>(&sql)
            .bind(identity_index)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.into_record(kind)))
    }

    async fn scan_unindexed_credentials(
        &self,
        kind: AccountKind,
        cap: i64,
    ) -> Result<Vec<CredentialRecord>, StoreError> {
        let (table, id_column, columns) = credential_table(kind);
        let sql = format!(
            "SELECT {} FROM {} WHERE identity_index IS NULL ORDER BY {} LIMIT $1",
            columns, table, id_column
        );
        let rows = sqlx::query_as::<_, CredentialRow>(&sql)
            .bind(cap)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.into_record(kind)).collect())
    }

    async fn get_credential(
        &self,
        kind: AccountKind,
        id: i64,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let (table, id_column, columns) = credential_table(kind);
        let sql = format!("SELECT {} FROM {} WHERE {} = $1", columns, table, id_column);
        let row = sqlx::query_as::<_, CredentialRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.into_record(kind)))
    }

    async fn external_id_exists(&self, external_id: &str) -> Result<bool, StoreError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM members WHERE external_id = $1)")
                .bind(external_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert_member(&self, member: NewMember) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO members (external_id, identity_value, identity_encoding, identity_index,
                                 password_hash, first_name, last_name, privacy_accepted_utc)
            VALUES ($1, $2, 'encrypted', $3, $4, $5, $6, CASE WHEN $7 THEN NOW() END)
            RETURNING member_id
            "#,
        )
        .bind(&member.external_id)
        .bind(&member.identity_ciphertext)
        .bind(&member.identity_index)
        .bind(&member.password_hash)
        .bind(&member.first_name)
        .bind(&member.last_name)
        .bind(member.privacy_accepted)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn insert_administrator(&self, admin: NewAdministrator) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO administrators (identity_value, identity_encoding, identity_index,
                                        password_hash, display_name)
            VALUES ($1, 'encrypted', $2, $3, $4)
            RETURNING administrator_id
            "#,
        )
        .bind(&admin.identity_ciphertext)
        .bind(&admin.identity_index)
        .bind(&admin.password_hash)
        .bind(&admin.display_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn count_administrators(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM administrators")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn upgrade_identity(
        &self,
        kind: AccountKind,
        id: i64,
        identity_ciphertext: &str,
        identity_index: &str,
    ) -> Result<(), StoreError> {
        let (table, id_column, _) = credential_table(kind);
        // Guarded so a concurrent upgrade of the same row is a no-op.
        let sql = format!(
            "UPDATE {} SET identity_value = $2, identity_encoding = 'encrypted', identity_index = $3 \
             WHERE {} = $1 AND identity_index IS NULL",
            table, id_column
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(identity_ciphertext)
            .bind(identity_index)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_privacy_acceptance(
        &self,
        kind: AccountKind,
        id: i64,
        accepted_utc: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let (table, id_column, _) = credential_table(kind);
        let sql = format!(
            "UPDATE {} SET privacy_accepted_utc = COALESCE(privacy_accepted_utc, $2) WHERE {} = $1",
            table, id_column
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(accepted_utc)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("Account"));
        }
        Ok(())
    }

    async fn get_organization(
        &self,
        organization_id: i64,
    ) -> Result<Option<Organization>, StoreError> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            "SELECT organization_id, organization_label, active_flag FROM organizations WHERE organization_id = $1",
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Organization {
            organization_id: r.organization_id,
            organization_label: r.organization_label,
            active_flag: r.active_flag,
        }))
    }

    async fn first_active_membership(
        &self,
        member_id: i64,
    ) -> Result<Option<Membership>, StoreError> {
        let sql = format!(
            "SELECT {} FROM memberships WHERE member_id = $1 AND active_flag \
             ORDER BY membership_id LIMIT 1",
            MEMBERSHIP_COLUMNS
        );
        let row = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(member_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Membership::from))
    }

    async fn has_active_membership_in(
        &self,
        member_id: i64,
        organization_id: i64,
    ) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM memberships WHERE member_id = $1 AND organization_id = $2 AND active_flag)",
        )
        .bind(member_id)
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn deactivate_membership(
        &self,
        membership_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Membership, StoreError> {
        let sql = format!(
            "UPDATE memberships SET active_flag = FALSE, deactivated_utc = $2 \
             WHERE membership_id = $1 AND active_flag RETURNING {}",
            MEMBERSHIP_COLUMNS
        );
        let updated = sqlx::query_as::<_, MembershipRow>(&sql)
            .bind(membership_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(row) => Ok(row.into()),
            None => {
                let (exists,): (bool,) = sqlx::query_as(
                    "SELECT EXISTS (SELECT 1 FROM memberships WHERE membership_id = $1)",
                )
                .bind(membership_id)
                .fetch_one(&self.pool)
                .await?;
                if exists {
                    Err(StoreError::Conflict("Membership already inactive".to_string()))
                } else {
                    Err(StoreError::NotFound("Membership"))
                }
            }
        }
    }

    async fn has_pending_request(
        &self,
        member_id: i64,
        organization_id: i64,
    ) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM role_requests WHERE requester_id = $1 AND organization_id = $2 AND status_code = 'pending')",
        )
        .bind(member_id)
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_role_request(
        &self,
        request: NewRoleRequest,
    ) -> Result<RoleRequest, StoreError> {
        let sql = format!(
            "INSERT INTO role_requests (requester_id, organization_id, requested_position, justification) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            ROLE_REQUEST_COLUMNS
        );
        let row = sqlx::query_as::<_, RoleRequestRow>(&sql)
            .bind(request.requester_id)
            .bind(request.organization_id)
            .bind(&request.requested_position)
            .bind(&request.justification)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn approve_role_request(
        &self,
        request_id: i64,
        review: Review,
    ) -> Result<(RoleRequest, Membership), StoreError> {
        // Dropping `tx` on any early return rolls back and frees the connection.
        let mut tx = self.pool.begin().await?;

        let lock_sql = format!(
            "SELECT {} FROM role_requests WHERE request_id = $1 FOR UPDATE",
            ROLE_REQUEST_COLUMNS
        );
        let current: RoleRequest = sqlx::query_as::<_, RoleRequestRow>(&lock_sql)
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::NotFound("Role request"))?
            .try_into()?;

        let next = current.status.transition(ReviewDecision::Approve)?;

        let update_sql = format!(
            "UPDATE role_requests SET status_code = $2, reviewer_id = $3, review_notes = $4, reviewed_utc = $5 \
             WHERE request_id = $1 RETURNING {}",
            ROLE_REQUEST_COLUMNS
        );
        let approved: RoleRequest = sqlx::query_as::<_, RoleRequestRow>(&update_sql)
            .bind(request_id)
            .bind(next.as_str())
            .bind(review.reviewer_id)
            .bind(&review.notes)
            .bind(review.reviewed_utc)
            .fetch_one(&mut *tx)
            .await?
            .try_into()?;

        let insert_sql = format!(
            "INSERT INTO memberships (member_id, organization_id, position, created_utc) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            MEMBERSHIP_COLUMNS
        );
        let membership = sqlx::query_as::<_, MembershipRow>(&insert_sql)
            .bind(approved.requester_id)
            .bind(approved.organization_id)
            .bind(&approved.requested_position)
            .bind(review.reviewed_utc)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok((approved, membership.into()))
    }

    async fn reject_role_request(
        &self,
        request_id: i64,
        review: Review,
    ) -> Result<RoleRequest, StoreError> {
        let sql = format!(
            "UPDATE role_requests SET status_code = 'rejected', reviewer_id = $2, review_notes = $3, reviewed_utc = $4 \
             WHERE request_id = $1 AND status_code = 'pending' RETURNING {}",
            ROLE_REQUEST_COLUMNS
        );
        let updated = sqlx::query_as::<_, RoleRequestRow>(&sql)
            .bind(request_id)
            .bind(review.reviewer_id)
            .bind(&review.notes)
            .bind(review.reviewed_utc)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            return row.try_into();
        }

        // Zero rows: either missing or no longer pending.
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT status_code FROM role_requests WHERE request_id = $1")
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?;
        match existing {
            None => Err(StoreError::NotFound("Role request")),
            Some((code,)) => {
                let status = code.parse::<RoleRequestStatus>().map_err(StoreError::Backend)?;
                Err(TransitionError(status).into())
            }
        }
    }

    async fn list_role_requests(
        &self,
        query: &RoleRequestQuery,
    ) -> Result<Page<RoleRequest>, StoreError> {
        let status = query.status.map(|s| s.as_str());

        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM role_requests \
             WHERE ($1::TEXT IS NULL OR status_code = $1) AND ($2::BIGINT IS NULL OR requester_id = $2)",
        )
        .bind(status)
        .bind(query.requester_id)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {} FROM role_requests \
             WHERE ($1::TEXT IS NULL OR status_code = $1) AND ($2::BIGINT IS NULL OR requester_id = $2) \
             ORDER BY request_id DESC LIMIT $3 OFFSET $4",
            ROLE_REQUEST_COLUMNS
        );
        let rows = sqlx::query_as::<_, RoleRequestRow>(&sql)
            .bind(status)
            .bind(query.requester_id)
            .bind(i64::from(query.per_page))
            .bind(query.offset())
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(RoleRequest::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page { items, total })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violations_map_to_client_safe_messages() {
        assert_eq!(
            conflict_message(Some("idx_role_requests_one_pending")),
            "A pending role request already exists for this organization"
        );
        assert_eq!(
            conflict_message(Some("idx_members_external_id")),
            "External id already registered"
        );
        assert_eq!(conflict_message(None), "Duplicate record");
    }

    #[test]
    fn pool_timeouts_are_transient() {
        use service_core::retry::Transient;
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StoreError::from(sqlx::Error::RowNotFound).is_transient());
    }
}
