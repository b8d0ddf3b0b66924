//! Redis read-through cache
//!
//! The cache is an optimization only. Every write path updates the store first
//! and then invalidates; any Redis failure is logged and treated as a miss.

use std::time::Duration;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};
use crate::config::RedisConfig;
use crate::utils::errors::{BotError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Cache namespaces with their own TTLs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Profile,
    Subscription,
    Catalog,
    ReferralStats,
}

impl CacheScope {
    fn prefix(self) -> &'static str {
        match self {
            CacheScope::Profile => "profile",
            CacheScope::Subscription => "subscription",
            CacheScope::Catalog => "catalog",
            CacheScope::ReferralStats => "referral_stats",
        }
    }
}

#[derive(Clone)]
pub struct CacheService {
    manager: Option<ConnectionManager>,
    config: RedisConfig,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("enabled", &self.is_enabled())
            .field("prefix", &self.config.prefix)
            .finish()
    }
}

impl CacheService {
    /// Connect to Redis; an unreachable server yields a disabled cache
    pub async fn connect(config: &RedisConfig) -> Self {
        if !config.enabled {
            info!("Redis cache disabled by configuration");
            return Self::disabled(config);
        }

        match Self::open(config).await {
            Ok(manager) => {
                info!(url = %config.url, "Redis cache connected");
                Self { manager: Some(manager), config: config.clone() }
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, continuing without cache");
                Self::disabled(config)
            }
        }
    }

    async fn open(config: &RedisConfig) -> Result<ConnectionManager> {
        let client = Client::open(config.url.as_str())?;
        match tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client)).await {
            Ok(manager) => Ok(manager?),
            Err(_) => Err(BotError::Config(format!("Redis connect timed out after {:?}", CONNECT_TIMEOUT))),
        }
    }

    pub fn disabled(config: &RedisConfig) -> Self {
        Self { manager: None, config: config.clone() }
    }

    pub fn is_enabled(&self) -> bool {
        self.manager.is_some()
    }

    fn ttl(&self, scope: CacheScope) -> Duration {
        let seconds = match scope {
            CacheScope::Profile => self.config.profile_ttl_seconds,
            CacheScope::Subscription => self.config.subscription_ttl_seconds,
            CacheScope::Catalog => self.config.catalog_ttl_seconds,
            CacheScope::ReferralStats => self.config.profile_ttl_seconds,
        };
        Duration::from_secs(seconds)
    }

    fn full_key(&self, scope: CacheScope, key: &str) -> String {
        format!("{}{}:{}", self.config.prefix, scope.prefix(), key)
    }

    pub async fn get<T: DeserializeOwned>(&self, scope: CacheScope, key: &str) -> Option<T> {
        let mut conn = self.manager.clone()?;
        let full_key = self.full_key(scope, key);

        let result: RedisResult<Option<String>> = conn.get(&full_key).await;
        match result {
            Ok(Some(data)) => match serde_json::from_str::<T>(&data) {
                Ok(value) => {
                    debug!(key = %full_key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    warn!(key = %full_key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => {
                debug!(key = %full_key, "Cache miss");
                None
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache read failed");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, scope: CacheScope, key: &str, value: &T) {
        let Some(mut conn) = self.manager.clone() else {
            return;
        };
        let full_key = self.full_key(scope, key);
        let ttl = self.ttl(scope);

        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        let result: RedisResult<()> = conn.set_ex(&full_key, serialized, ttl.as_secs()).await;
        match result {
            Ok(()) => debug!(key = %full_key, ttl = ttl.as_secs(), "Value cached"),
            Err(e) => warn!(key = %full_key, error = %e, "Cache write failed"),
        }
    }

    pub async fn invalidate(&self, scope: CacheScope, key: &str) {
        let Some(mut conn) = self.manager.clone() else {
            return;
        };
        let full_key = self.full_key(scope, key);

        let result: RedisResult<i64> = conn.del(&full_key).await;
        match result {
            Ok(deleted) => debug!(key = %full_key, deleted = deleted > 0, "Cache entry invalidated"),
            Err(e) => warn!(key = %full_key, error = %e, "Cache invalidation failed"),
        }
    }

    /// Drop every cached view of one user
    pub async fn invalidate_user(&self, telegram_id: i64) {
        let key = telegram_id.to_string();
        self.invalidate(CacheScope::Profile, &key).await;
        self.invalidate(CacheScope::Subscription, &key).await;
    }

    pub async fn health_check(&self) -> bool {
        let Some(mut conn) = self.manager.clone() else {
            return false;
        };
        let result: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        match result {
            Ok(response) => response == "PONG",
            Err(e) => {
                warn!(error = %e, "Redis health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RedisConfig {
        RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            prefix: "hb:".to_string(),
            enabled: true,
            profile_ttl_seconds: 300,
            subscription_ttl_seconds: 60,
            catalog_ttl_seconds: 600,
        }
    }

    #[test]
    fn test_key_layout() {
        let cache = CacheService::disabled(&config());
        assert_eq!(cache.full_key(CacheScope::Profile, "42"), "hb:profile:42");
        assert_eq!(cache.full_key(CacheScope::Catalog, "plans"), "hb:catalog:plans");
    }

    #[test]
    fn test_scope_ttls() {
        let cache = CacheService::disabled(&config());
        assert_eq!(cache.ttl(CacheScope::Profile), Duration::from_secs(300));
        assert_eq!(cache.ttl(CacheScope::Subscription), Duration::from_secs(60));
        assert_eq!(cache.ttl(CacheScope::Catalog), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_disabled_cache_is_a_permanent_miss() {
        let cache = CacheService::disabled(&config());
        cache.set(CacheScope::Profile, "1", &"value").await;
        let value: Option<String> = cache.get(CacheScope::Profile, "1").await;
        assert!(value.is_none());
        assert!(!cache.health_check().await);
    }

    #[tokio::test]
    async fn test_unreachable_redis_degrades_to_disabled() {
        let cache = CacheService::connect(&config()).await;
        assert!(!cache.is_enabled());
    }
}
