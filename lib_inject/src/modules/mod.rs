//! # Registration Modules
//!
//! Factory functions that read conventional property keys, build a resource,
//! register it in the [`Registry`](crate::core::Registry) under its qualifier
//! and attach the release callback.
//!
//! | function | keys read | registered as |
//! |---|---|---|
//! | [`data_source`] | `db.<name>[.readonly].driver\|url\|username\|password` | `DataSource` |
//! | [`db`] | as above, primary and optionally read-only | `CrudDb`, `dyn Db` |
//! | [`read_db`] | `db.<name>.readonly.*` | `ReadDb`, `dyn Db` |
//! | [`standalone_redis`] | `redis.<name>.host\|port\|db\|password\|pool.size` | `RedisClient` |
//! | [`standalone_string_redis`] | the above plus `key.prefix` | `RedisClient` |
//! | [`replica_string_redis`] | the above plus `key.prefix` | `RedisClient` |
//!
//! Data sources probe one connection at registration unless told otherwise;
//! cache clients never connect at registration.

use thiserror::Error;

use crate::configs::properties::PropertyError;
use crate::connections::cache_redis::CacheError;
use crate::connections::db_postgres::DbError;
use crate::core::RegistryError;

/// Data-source registration.
pub mod datasource;
/// Logical database registration.
pub mod database;
/// Cache-client registration.
pub mod redis;

pub use database::{db, read_db, DbOptions, ReadDbOptions};
pub use datasource::{data_source, data_source_params, data_source_with, DataSourceOptions};
pub use redis::{
    redis_params, replica_redis_with, replica_string_redis, standalone_redis, standalone_redis_with,
    standalone_string_redis, RedisOptions,
};

/// Any failure while building the registry.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
