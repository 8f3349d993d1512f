//! Effective role composition: account kind plus live membership.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::ServiceError;
use super::role_cache::{CacheRead, RoleCache};
use super::store::StoreGateway;
use crate::models::{roles, AccountKind, Affiliation};

/// Roles and affiliation as of one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRoles {
    pub roles: Vec<String>,
    pub affiliation: Option<Affiliation>,
}

impl ResolvedRoles {
    pub fn has_officer(&self) -> bool {
        self.roles.iter().any(|r| r == roles::OFFICER)
    }
}

#[derive(Clone)]
pub struct RoleResolver {
    gateway: StoreGateway,
    cache: Arc<dyn RoleCache>,
}

impl RoleResolver {
    pub fn new(gateway: StoreGateway, cache: Arc<dyn RoleCache>) -> Self {
        Self { gateway, cache }
    }

    /// Administrators get exactly `admin`. Members get `member`, plus
    /// `officer` while any active membership exists; the affiliation is the
    /// active membership with the lowest id.
    pub async fn resolve(&self, kind: AccountKind, id: i64) -> Result<ResolvedRoles, ServiceError> {
        if kind == AccountKind::Administrator {
            return Ok(ResolvedRoles {
                roles: vec![roles::ADMIN.to_string()],
                affiliation: None,
            });
        }

        // Generation observed before the store read; a later invalidation
        // makes the write below a no-op.
        let generation = match self.cache.get(kind, id).await {
            Ok(CacheRead { roles: Some(hit), .. }) => return Ok(hit),
            Ok(CacheRead { generation, .. }) => Some(generation),
            Err(e) => {
                warn!(member_id = id, error = %e, "Role cache read failed");
                None
            }
        };

        let store = self.gateway.store();
        let membership = self
            .gateway
            .read("first_active_membership", || store.first_active_membership(id))
            .await?;

        let mut resolved = ResolvedRoles {
            roles: vec![roles::MEMBER.to_string()],
            affiliation: None,
        };
        if let Some(membership) = membership {
            resolved.roles.push(roles::OFFICER.to_string());
            resolved.affiliation = Some(membership.affiliation());
        }

        if let Some(generation) = generation {
            match self.cache.put(kind, id, &resolved, generation).await {
                Ok(true) => {}
                Ok(false) => debug!(member_id = id, "Role cache entry superseded by invalidation"),
                Err(e) => warn!(member_id = id, error = %e, "Role cache write failed"),
            }
        }

        Ok(resolved)
    }

    /// Drop any cached resolution so the next request reads live state.
    pub async fn invalidate(&self, kind: AccountKind, id: i64) {
        if let Err(e) = self.cache.invalidate(kind, id).await {
            warn!(kind = %kind, id, error = %e, "Role cache invalidation failed");
        }
    }

    pub async fn cache_health(&self) -> Result<(), anyhow::Error> {
        self.cache.health_check().await
    }
}
