use std::sync::Arc;

use log::info;

use super::ModuleError;
use crate::configs::properties::{PropertyError, PropertySource};
use crate::connections::cache_redis::{
    RedisClient, RedisParams, ReplicaRedis, StandaloneRedis, DEFAULT_DB, DEFAULT_POOL_SIZE, DEFAULT_PORT,
};
use crate::core::{Qualifier, Registry};

/// Where the convention-based registrations read from.
#[derive(Debug, Clone, Default)]
pub struct RedisOptions {
    /// Defaults to the qualifier's name.
    pub name: Option<String>,
    /// Defaults to `redis.<name>.`.
    pub property_prefix: Option<String>,
}

impl RedisOptions {
    fn resolve(&self, qualifier: &Qualifier) -> (String, String) {
        let name = self.name.clone().unwrap_or_else(|| qualifier.name().to_string());
        let prefix = self.property_prefix.clone().unwrap_or_else(|| format!("redis.{}.", name));
        (name, prefix)
    }
}

/// Reads `<prefix>host|port|db|password|pool.size`, plus `key.prefix` when
/// `with_key_prefix`. Only `host` is required.
pub fn redis_params<P>(properties: &P, prefix: &str, with_key_prefix: bool) -> Result<RedisParams, PropertyError>
where
    P: PropertySource + ?Sized,
{
    let key = |suffix: &str| format!("{}{}", prefix, suffix);
    Ok(RedisParams {
        host: properties.require_string(&key("host"))?,
        port: properties.get_int_as(&key("port"), DEFAULT_PORT)?,
        db: properties.get_int_or(&key("db"), DEFAULT_DB)?,
        password: properties.get_string(&key("password")),
        key_prefix: if with_key_prefix {
            properties.get_string_or(&key("key.prefix"), "")
        } else {
            String::new()
        },
        pool_size: properties.get_int_as(&key("pool.size"), DEFAULT_POOL_SIZE)?,
    })
}

/// Registers a single-node client configured under `redis.<name>.`.
/// `key.prefix` is not read.
pub fn standalone_redis(
    registry: &mut Registry,
    qualifier: &Qualifier,
    options: RedisOptions,
) -> Result<Arc<RedisClient>, ModuleError> {
    let (name, prefix) = options.resolve(qualifier);
    let params = redis_params(registry.properties(), &prefix, false)?;
    register(registry, qualifier, RedisClient::Standalone(StandaloneRedis::new(name, params)?))
}

/// Registers a single-node client configured under `redis.<name>.`, including
/// its key prefix.
pub fn standalone_string_redis(
    registry: &mut Registry,
    qualifier: &Qualifier,
    options: RedisOptions,
) -> Result<Arc<RedisClient>, ModuleError> {
    let (name, prefix) = options.resolve(qualifier);
    let params = redis_params(registry.properties(), &prefix, true)?;
    register(registry, qualifier, RedisClient::Standalone(StandaloneRedis::new(name, params)?))
}

/// Registers a single-node client from explicit parameters.
pub fn standalone_redis_with(
    registry: &mut Registry,
    qualifier: &Qualifier,
    params: RedisParams,
) -> Result<Arc<RedisClient>, ModuleError> {
    let client = StandaloneRedis::new(qualifier.name(), params)?;
    register(registry, qualifier, RedisClient::Standalone(client))
}

/// Registers a replication-aware client seeded from `redis.<name>.`,
/// including its key prefix.
pub fn replica_string_redis(
    registry: &mut Registry,
    qualifier: &Qualifier,
    options: RedisOptions,
) -> Result<Arc<RedisClient>, ModuleError> {
    let (name, prefix) = options.resolve(qualifier);
    let params = redis_params(registry.properties(), &prefix, true)?;
    register(registry, qualifier, RedisClient::Replica(ReplicaRedis::new(name, params)?))
}

/// Registers a replication-aware client from explicit parameters.
pub fn replica_redis_with(
    registry: &mut Registry,
    qualifier: &Qualifier,
    params: RedisParams,
) -> Result<Arc<RedisClient>, ModuleError> {
    let client = ReplicaRedis::new(qualifier.name(), params)?;
    register(registry, qualifier, RedisClient::Replica(client))
}

// No connection is attempted here: an unreachable server only shows up on
// first use.
fn register(registry: &mut Registry, qualifier: &Qualifier, client: RedisClient) -> Result<Arc<RedisClient>, ModuleError> {
    info!(
        "Registered {} at {}:{} (db {}, pool size {})",
        qualifier,
        client.params().host,
        client.params().port,
        client.params().db,
        client.params().pool_size
    );
    let binding = registry
        .single(qualifier, client)?
        .on_close(|client| async move { client.close().await });
    Ok(binding.into_instance())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::properties::Properties;
    use crate::connections::cache_redis::CacheError;
    use crate::core::RegistryError;

    fn properties() -> Properties {
        Properties::from_pairs([
            ("redis.sessions.host", "127.0.0.1"),
            ("redis.sessions.port", "1"),
            ("redis.sessions.db", "2"),
            ("redis.sessions.password", "p@ss"),
            ("redis.sessions.key.prefix", "sess:"),
            ("redis.sessions.pool.size", "4"),
        ])
    }

    #[test]
    fn test_params_defaults() {
        let props = Properties::from_pairs([("redis.cache.host", "cache.local")]);
        let params = redis_params(&props, "redis.cache.", true).unwrap();
        assert_eq!(params, RedisParams::new("cache.local"));
        assert_eq!(params.port, 6379);
        assert_eq!(params.db, 0);
        assert_eq!(params.pool_size, 8);
    }

    #[test]
    fn test_params_key_prefix_only_when_asked() {
        let props = properties();
        assert_eq!(redis_params(&props, "redis.sessions.", true).unwrap().key_prefix, "sess:");
        assert_eq!(redis_params(&props, "redis.sessions.", false).unwrap().key_prefix, "");
    }

    #[test]
    fn test_params_errors() {
        let err = redis_params(&Properties::new(), "redis.x.", false).unwrap_err();
        assert_eq!(err, PropertyError::Missing("redis.x.host".into()));

        let props = Properties::from_pairs([("redis.x.host", "h"), ("redis.x.port", "70000")]);
        let err = redis_params(&props, "redis.x.", false).unwrap_err();
        assert!(matches!(err, PropertyError::OutOfRange { value: 70000, .. }));
    }

    #[tokio::test]
    async fn test_registration_does_not_connect() {
        let mut registry = Registry::new(properties());
        let q = Qualifier::cache("sessions");

        // nothing listens on port 1, registration still succeeds
        let client = standalone_string_redis(&mut registry, &q, RedisOptions::default()).unwrap();
        assert_eq!(client.name(), "sessions");
        assert_eq!(client.params().db, 2);
        assert_eq!(client.params().pool_size, 4);
        assert_eq!(client.key("u:1"), "sess:u:1");
        assert!(Arc::ptr_eq(&client, &registry.require::<RedisClient>(&q).unwrap()));

        registry.close().await;
        assert!(client.is_closed());
        assert!(matches!(client.ping().await, Err(CacheError::Closed(_))));
    }

    #[tokio::test]
    async fn test_replica_and_standalone_side_by_side() {
        let mut registry = Registry::new(properties());
        let options = RedisOptions { name: Some("sessions".into()), property_prefix: None };

        let plain = standalone_redis(&mut registry, &Qualifier::cache("plain"), options.clone()).unwrap();
        let replica = replica_string_redis(&mut registry, &Qualifier::cache("replica"), options).unwrap();
        assert_eq!(plain.params().key_prefix, "");
        assert_eq!(replica.params().key_prefix, "sess:");
        assert!(matches!(*replica, RedisClient::Replica(_)));
        assert_eq!(registry.pending_close_hooks(), 2);

        registry.close().await;
        assert!(plain.is_closed() && replica.is_closed());
    }

    #[tokio::test]
    async fn test_explicit_params() {
        let mut registry = Registry::new(Properties::new());
        let q = Qualifier::cache("explicit");

        let client = standalone_redis_with(&mut registry, &q, RedisParams::new("127.0.0.1")).unwrap();
        assert_eq!(client.name(), "explicit");

        let err = replica_redis_with(&mut registry, &q, RedisParams::new("127.0.0.1")).unwrap_err();
        assert!(matches!(err, ModuleError::Registry(RegistryError::AlreadyRegistered { .. })));

        let err = replica_redis_with(&mut registry, &Qualifier::cache("bad"), RedisParams::new("")).unwrap_err();
        assert!(matches!(err, ModuleError::Cache(CacheError::InvalidConfig(_))));
        registry.close().await;
    }
}
