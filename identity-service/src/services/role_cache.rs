//! Short-lived cache of resolved role sets keyed by `(kind, id)`.
//!
//! Approval and membership deactivation invalidate the affected entry, so
//! the TTL only bounds staleness for changes made outside this service.
//!
//! Every key carries a generation that `invalidate` bumps. A resolution
//! records the generation it saw before querying the store, and `put` only
//! stores when the generation is unchanged, so a lookup that raced an
//! invalidation cannot write its stale answer back.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client, Script};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::roles::ResolvedRoles;
use crate::config::{RoleCacheBackend, RoleCacheConfig};
use crate::models::AccountKind;

/// Generation keys outlive any single resolution by a wide margin.
const GENERATION_TTL_SECONDS: u64 = 3600;

/// Outcome of a cache read: the entry if fresh, and the key's generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRead {
    pub roles: Option<ResolvedRoles>,
    pub generation: u64,
}

impl CacheRead {
    fn miss(generation: u64) -> Self {
        Self {
            roles: None,
            generation,
        }
    }
}

#[async_trait]
pub trait RoleCache: Send + Sync {
    async fn get(&self, kind: AccountKind, id: i64) -> Result<CacheRead, anyhow::Error>;

    /// Store `roles` if the key is still at `generation`. Returns whether it
    /// was stored.
    async fn put(
        &self,
        kind: AccountKind,
        id: i64,
        roles: &ResolvedRoles,
        generation: u64,
    ) -> Result<bool, anyhow::Error>;

    /// Drop the entry and bump the generation.
    async fn invalidate(&self, kind: AccountKind, id: i64) -> Result<(), anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

fn cache_key(kind: AccountKind, id: i64) -> String {
    format!("roles:{}:{}", kind, id)
}

fn generation_key(kind: AccountKind, id: i64) -> String {
    format!("roles:gen:{}:{}", kind, id)
}

/// Build the cache selected by configuration. A zero TTL disables caching.
pub async fn build_role_cache(config: &RoleCacheConfig) -> Result<Arc<dyn RoleCache>, anyhow::Error> {
    let ttl = Duration::from_secs(config.ttl_seconds);
    if ttl.is_zero() {
        return Ok(Arc::new(NoRoleCache));
    }
    match config.backend {
        RoleCacheBackend::Memory => Ok(Arc::new(InMemoryRoleCache::new(ttl))),
        RoleCacheBackend::Redis => {
            let url = config
                .redis_url
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("REDIS_URL is required for the redis role cache"))?;
            Ok(Arc::new(RedisRoleCache::new(url.expose_secret(), ttl).await?))
        }
        RoleCacheBackend::Disabled => Ok(Arc::new(NoRoleCache)),
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    entry: Option<(Instant, ResolvedRoles)>,
}

/// Per-process cache. Expired entries are dropped on read; the generation
/// stays with the key.
pub struct InMemoryRoleCache {
    slots: DashMap<(AccountKind, i64), Slot>,
    ttl: Duration,
}

impl InMemoryRoleCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            ttl,
        }
    }
}

#[async_trait]
impl RoleCache for InMemoryRoleCache {
    async fn get(&self, kind: AccountKind, id: i64) -> Result<CacheRead, anyhow::Error> {
        let Some(mut slot) = self.slots.get_mut(&(kind, id)) else {
            return Ok(CacheRead::miss(0));
        };
        let fresh = match &slot.entry {
            Some((stored_at, roles)) if stored_at.elapsed() < self.ttl => Some(roles.clone()),
            _ => None,
        };
        if fresh.is_none() {
            slot.entry = None;
        }
        Ok(CacheRead {
            roles: fresh,
            generation: slot.generation,
        })
    }

    async fn put(
        &self,
        kind: AccountKind,
        id: i64,
        roles: &ResolvedRoles,
        generation: u64,
    ) -> Result<bool, anyhow::Error> {
        // The entry guard holds the shard lock across compare and store.
        let mut slot = self.slots.entry((kind, id)).or_default();
        if slot.generation != generation {
            return Ok(false);
        }
        slot.entry = Some((Instant::now(), roles.clone()));
        Ok(true)
    }

    async fn invalidate(&self, kind: AccountKind, id: i64) -> Result<(), anyhow::Error> {
        let mut slot = self.slots.entry((kind, id)).or_default();
        slot.generation += 1;
        slot.entry = None;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Stores `ARGV[1]` under `KEYS[1]` for `ARGV[3]` seconds only while the
/// generation at `KEYS[2]` still equals `ARGV[2]`.
const PUT_IF_GENERATION: &str = r#"
local current = redis.call('GET', KEYS[2]) or '0'
if current ~= ARGV[2] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
return 1
"#;

/// Shared cache for multi-instance deployments.
#[derive(Clone)]
pub struct RedisRoleCache {
    manager: ConnectionManager,
    ttl: Duration,
    put_script: Arc<Script>,
}

impl RedisRoleCache {
    pub async fn new(url: &str, ttl: Duration) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis role cache");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            manager,
            ttl,
            put_script: Arc::new(Script::new(PUT_IF_GENERATION)),
        })
    }
}

#[async_trait]
impl RoleCache for RedisRoleCache {
    async fn get(&self, kind: AccountKind, id: i64) -> Result<CacheRead, anyhow::Error> {
        let mut conn = self.manager.clone();
        let (raw, generation): (Option<String>, Option<u64>) = redis::cmd("MGET")
            .arg(cache_key(kind, id))
            .arg(generation_key(kind, id))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read role cache: {}", e))?;

        let roles = match raw {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        Ok(CacheRead {
            roles,
            generation: generation.unwrap_or(0),
        })
    }

    async fn put(
        &self,
        kind: AccountKind,
        id: i64,
        roles: &ResolvedRoles,
        generation: u64,
    ) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let value = serde_json::to_string(roles)?;
        let stored: i64 = self
            .put_script
            .key(cache_key(kind, id))
            .key(generation_key(kind, id))
            .arg(value)
            .arg(generation)
            .arg(self.ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write role cache: {}", e))?;
        Ok(stored == 1)
    }

    async fn invalidate(&self, kind: AccountKind, id: i64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let generation = generation_key(kind, id);
        redis::pipe()
            .atomic()
            .incr(&generation, 1)
            .ignore()
            .expire(&generation, GENERATION_TTL_SECONDS as i64)
            .ignore()
            .del(cache_key(kind, id))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to invalidate role cache: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// Every read misses.
pub struct NoRoleCache;

#[async_trait]
impl RoleCache for NoRoleCache {
    async fn get(&self, _kind: AccountKind, _id: i64) -> Result<CacheRead, anyhow::Error> {
        Ok(CacheRead::miss(0))
    }

    async fn put(
        &self,
        _kind: AccountKind,
        _id: i64,
        _roles: &ResolvedRoles,
        _generation: u64,
    ) -> Result<bool, anyhow::Error> {
        Ok(false)
    }

    async fn invalidate(&self, _kind: AccountKind, _id: i64) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
