//! Session revocation
//!
//! Session tokens are stateless, so logging out records the token id as
//! revoked until the token would have expired anyway.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use common::cache::RedisPool;
use uuid::Uuid;

#[async_trait]
pub trait RevocationList: Send + Sync {
    /// Revoke a token id for `ttl`
    async fn revoke(&self, jti: Uuid, ttl: Duration) -> Result<()>;

    async fn is_revoked(&self, jti: Uuid) -> Result<bool>;
}

/// Revocation list kept in Redis with per-entry expiry
#[derive(Clone)]
pub struct RedisRevocationList {
    redis: RedisPool,
}

impl RedisRevocationList {
    pub fn new(redis: RedisPool) -> Self {
        Self { redis }
    }

    fn key(jti: Uuid) -> String {
        format!("session:revoked:{}", jti)
    }
}

#[async_trait]
impl RevocationList for RedisRevocationList {
    async fn revoke(&self, jti: Uuid, ttl: Duration) -> Result<()> {
        self.redis
            .set(&Self::key(jti), "1", Some(ttl.as_secs().max(1)))
            .await
    }

    async fn is_revoked(&self, jti: Uuid) -> Result<bool> {
        Ok(self.redis.get(&Self::key(jti)).await?.is_some())
    }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashSet;
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    pub struct InMemoryRevocationList {
        revoked: Arc<Mutex<HashSet<Uuid>>>,
    }

    #[async_trait]
    impl RevocationList for InMemoryRevocationList {
        async fn revoke(&self, jti: Uuid, _ttl: Duration) -> Result<()> {
            self.revoked.lock().await.insert(jti);
            Ok(())
        }

        async fn is_revoked(&self, jti: Uuid) -> Result<bool> {
            Ok(self.revoked.lock().await.contains(&jti))
        }
    }
}
