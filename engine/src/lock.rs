//! Per-key mutual exclusion backed by the shared Redis instance.
//!
//! The TTL guarantees eventual recovery if the holder crashes; the
//! owner-checked release keeps a slow holder from deleting a lock that has
//! already expired and been reacquired by another worker. This is not a
//! fenced lock: the instance engine tolerates the window through namespace
//! already-exists preconditions and rollback.

use anyhow::Context;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::Error;

/// Default maximum time a lock may be held, in seconds.
pub const DEFAULT_LOCK_SECS: u64 = 60;

pub struct Lock {
    name: String,
    value: String,
}

impl Lock {
    /// Acquires `lock:<name>` with the given TTL, or fails with
    /// [`Error::AlreadyLocked`] when another worker holds it.
    pub async fn acquire(redis: &Pool, name: &str, max_secs: u64) -> Result<Lock, Error> {
        let value = hex::encode(rand::random::<[u8; 8]>());
        let mut conn = redis
            .get()
            .await
            .context("failed to get redis connection")?;
        let acquired: bool = redis::cmd("SET")
            .arg(format!("lock:{name}"))
            .arg(&value)
            .arg("NX")
            .arg("EX")
            .arg(max_secs)
            .query_async(&mut conn)
            .await?;
        if !acquired {
            return Err(Error::AlreadyLocked(name.to_string()));
        }
        Ok(Lock {
            name: name.to_string(),
            value,
        })
    }

    /// Releases the lock if this instance still owns it. A mismatched or
    /// missing value means the lock expired and was taken over; that is a
    /// silent no-op. Callers must release on every exit path.
    pub async fn release(self, redis: &Pool) {
        let key = format!("lock:{}", self.name);
        let result: Result<(), Error> = async {
            let mut conn = redis
                .get()
                .await
                .context("failed to get redis connection")?;
            let current: Option<String> = conn.get(&key).await?;
            if current.as_deref() == Some(self.value.as_str()) {
                conn.del::<_, ()>(&key).await?;
            }
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!("failed to release lock {}: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_owner_token_shape() {
        let token = hex::encode(rand::random::<[u8; 8]>());
        assert_eq!(token.len(), 16);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
