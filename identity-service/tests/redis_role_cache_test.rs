//! Redis-backed role cache tests.
//!
//! Run with `TEST_REDIS_URL=redis://... cargo test -- --ignored`.

use identity_service::models::{roles, AccountKind, Affiliation};
use identity_service::services::{RedisRoleCache, ResolvedRoles, RoleCache};
use std::time::Duration;

async fn test_cache() -> RedisRoleCache {
    let url = std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisRoleCache::new(&url, Duration::from_secs(30))
        .await
        .expect("Failed to connect to Redis")
}

fn officer(organization_id: i64) -> ResolvedRoles {
    ResolvedRoles {
        roles: vec![roles::MEMBER.to_string(), roles::OFFICER.to_string()],
        affiliation: Some(Affiliation {
            organization_id,
            position: "treasurer".to_string(),
        }),
    }
}

#[tokio::test]
#[ignore]
async fn put_get_and_invalidate_round_trip() {
    let cache = test_cache().await;
    let id = 910_001;
    cache.invalidate(AccountKind::Member, id).await.expect("reset");

    let read = cache.get(AccountKind::Member, id).await.expect("get");
    assert_eq!(read.roles, None);

    let stored = cache
        .put(AccountKind::Member, id, &officer(3), read.generation)
        .await
        .expect("put");
    assert!(stored);
    let hit = cache.get(AccountKind::Member, id).await.expect("get");
    assert_eq!(hit.roles, Some(officer(3)));
    assert_eq!(hit.generation, read.generation);

    cache.invalidate(AccountKind::Member, id).await.expect("invalidate");
    let after = cache.get(AccountKind::Member, id).await.expect("get");
    assert_eq!(after.roles, None);
    assert_eq!(after.generation, read.generation + 1);
}

#[tokio::test]
#[ignore]
async fn put_from_before_invalidation_is_refused() {
    let cache = test_cache().await;
    let id = 910_002;
    cache.invalidate(AccountKind::Member, id).await.expect("reset");

    let before = cache.get(AccountKind::Member, id).await.expect("get").generation;
    cache.invalidate(AccountKind::Member, id).await.expect("invalidate");

    let stored = cache
        .put(AccountKind::Member, id, &officer(4), before)
        .await
        .expect("put");
    assert!(!stored);
    assert_eq!(cache.get(AccountKind::Member, id).await.expect("get").roles, None);
}

#[tokio::test]
#[ignore]
async fn kinds_do_not_share_entries() {
    let cache = test_cache().await;
    let id = 910_003;
    cache.invalidate(AccountKind::Member, id).await.expect("reset");
    cache.invalidate(AccountKind::Administrator, id).await.expect("reset");

    let generation = cache.get(AccountKind::Member, id).await.expect("get").generation;
    cache
        .put(AccountKind::Member, id, &officer(5), generation)
        .await
        .expect("put");

    assert_eq!(
        cache.get(AccountKind::Administrator, id).await.expect("get").roles,
        None
    );
    cache.health_check().await.expect("ping");
}
