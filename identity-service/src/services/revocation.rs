//! TTL'd revocation cache for refresh token values.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};

#[async_trait]
pub trait RevocationCache: Send + Sync {
    /// Stores the revoked value with a TTL equal to its remaining lifetime.
    async fn revoke(&self, value: &str, ttl_seconds: i64) -> Result<(), anyhow::Error>;
    async fn is_revoked(&self, value: &str) -> Result<bool, anyhow::Error>;
    async fn remove(&self, value: &str) -> Result<(), anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %url, "Connecting to Redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }

    fn key(value: &str) -> String {
        format!("revoked:refresh:{}", value)
    }
}

#[async_trait]
impl RevocationCache for RedisCache {
    async fn revoke(&self, value: &str, ttl_seconds: i64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(Self::key(value))
            .arg("revoked")
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to revoke token value: {}", e))
    }

    async fn is_revoked(&self, value: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(Self::key(value))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check revocation: {}", e))?;
        Ok(exists)
    }

    async fn remove(&self, value: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(Self::key(value))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to remove revocation entry: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-memory cache used by tests; records TTLs so they can be asserted.
#[derive(Default)]
pub struct MockRevocationCache {
    pub entries: std::sync::Mutex<std::collections::HashMap<String, i64>>,
}

impl MockRevocationCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationCache for MockRevocationCache {
    async fn revoke(&self, value: &str, ttl_seconds: i64) -> Result<(), anyhow::Error> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("mock cache mutex poisoned: {}", e))?
            .insert(value.to_string(), ttl_seconds);
        Ok(())
    }

    async fn is_revoked(&self, value: &str) -> Result<bool, anyhow::Error> {
        let contains = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("mock cache mutex poisoned: {}", e))?
            .contains_key(value);
        Ok(contains)
    }

    async fn remove(&self, value: &str) -> Result<(), anyhow::Error> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("mock cache mutex poisoned: {}", e))?
            .remove(value);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
