//! Redis-backed state index.
//!
//! Two sorted sets keyed by namespace mirror the authoritative namespace
//! annotations: `expiration` and `boot_time`, score = UNIX seconds. The
//! cluster is truth; the index is the cache the reaper repairs. Alongside
//! them live the JSON caches for challenge definitions, tag lists, and
//! per-namespace port mappings.

use std::collections::BTreeMap;

use anyhow::Context;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;

use crate::Error;

/// Sorted set of namespace -> lease expiration.
pub const EXPIRATION: &str = "expiration";
/// Sorted set of namespace -> first boot.
pub const BOOT_TIME: &str = "boot_time";

const CACHE_TTL_SECS: u64 = 3600;

async fn conn(redis: &Pool) -> Result<Connection, Error> {
    Ok(redis
        .get()
        .await
        .context("failed to get redis connection")?)
}

pub async fn set_score(redis: &Pool, set: &str, namespace: &str, at: i64) -> Result<(), Error> {
    conn(redis)
        .await?
        .zadd::<_, _, _, ()>(set, namespace, at)
        .await?;
    Ok(())
}

pub async fn score_of(redis: &Pool, set: &str, namespace: &str) -> Result<Option<i64>, Error> {
    let score: Option<f64> = conn(redis).await?.zscore(set, namespace).await?;
    Ok(score.map(|s| s as i64))
}

/// Removes a namespace from both sorted sets.
pub async fn remove(redis: &Pool, namespace: &str) -> Result<(), Error> {
    let mut c = conn(redis).await?;
    c.zrem::<_, _, ()>(EXPIRATION, namespace).await?;
    c.zrem::<_, _, ()>(BOOT_TIME, namespace).await?;
    Ok(())
}

pub async fn remove_from(redis: &Pool, set: &str, namespace: &str) -> Result<(), Error> {
    conn(redis)
        .await?
        .zrem::<_, _, ()>(set, namespace)
        .await?;
    Ok(())
}

/// Namespaces whose lease expired at or before `at`.
pub async fn expired_before(redis: &Pool, at: i64) -> Result<Vec<String>, Error> {
    Ok(conn(redis)
        .await?
        .zrangebyscore(EXPIRATION, "-inf", at)
        .await?)
}

pub async fn members(redis: &Pool, set: &str) -> Result<Vec<String>, Error> {
    Ok(conn(redis).await?.zrange(set, 0, -1).await?)
}

pub async fn bulk_set(
    redis: &Pool,
    set: &str,
    entries: &BTreeMap<String, i64>,
) -> Result<(), Error> {
    if entries.is_empty() {
        return Ok(());
    }
    let items: Vec<(i64, &str)> = entries.iter().map(|(ns, at)| (*at, ns.as_str())).collect();
    conn(redis)
        .await?
        .zadd_multiple::<_, _, _, ()>(set, &items)
        .await?;
    Ok(())
}

pub async fn cache_get(redis: &Pool, key: &str) -> Result<Option<String>, Error> {
    Ok(conn(redis).await?.get(key).await?)
}

/// Caches a JSON blob with the standard one-hour TTL.
pub async fn cache_set(redis: &Pool, key: &str, value: &str) -> Result<(), Error> {
    cache_set_for(redis, key, value, CACHE_TTL_SECS).await
}

pub async fn cache_set_for(
    redis: &Pool,
    key: &str,
    value: &str,
    ttl_secs: u64,
) -> Result<(), Error> {
    conn(redis)
        .await?
        .set_ex::<_, _, ()>(key, value, ttl_secs)
        .await?;
    Ok(())
}

pub async fn cache_del(redis: &Pool, keys: &[String]) -> Result<(), Error> {
    if keys.is_empty() {
        return Ok(());
    }
    conn(redis).await?.del::<_, ()>(keys).await?;
    Ok(())
}

/// Drops every cache entry derived from a challenge definition: the id list,
/// the definition and tag blobs, and any port-mapping snapshot for the shared
/// or per-team namespaces of the challenge.
pub async fn invalidate_challenge(redis: &Pool, challenge_id: &str) -> Result<(), Error> {
    let mut keys = vec![
        "all_challs".to_string(),
        format!("chall:{challenge_id}"),
        format!("chall_tags:{challenge_id}"),
        format!("ports:ci-{challenge_id}"),
    ];
    let mut c = conn(redis).await?;
    let team_snapshots: Vec<String> = c.keys(format!("ports:ci-{challenge_id}-t-*")).await?;
    keys.extend(team_snapshots);
    c.del::<_, ()>(keys).await?;
    Ok(())
}

pub async fn last_resync(redis: &Pool) -> Result<Option<i64>, Error> {
    Ok(conn(redis).await?.get("last_resync").await?)
}

pub async fn set_last_resync(redis: &Pool, at: i64) -> Result<(), Error> {
    conn(redis)
        .await?
        .set::<_, _, ()>("last_resync", at)
        .await?;
    Ok(())
}
