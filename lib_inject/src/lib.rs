//! # lib_inject
//!
//! Qualifier-keyed registration of shared infrastructure: PostgreSQL pools,
//! read / read-write database handles, Redis clients and typed properties.
//!
//! ```no_run
//! use lib_inject::configs::config_sys::load_process_properties;
//! use lib_inject::core::{DbQualifier, Qualifier, Registry};
//! use lib_inject::modules::{db, standalone_string_redis, DbOptions, RedisOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = Registry::new(load_process_properties()?);
//! let _orders = db(&mut registry, &DbQualifier::new("orders"), DbOptions::default()).await?;
//! let _sessions = standalone_string_redis(&mut registry, &Qualifier::cache("sessions"), RedisOptions::default())?;
//! // ...
//! registry.close().await;
//! # Ok(())
//! # }
//! ```

pub mod core;

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "loggers")]
pub mod loggers;

#[cfg(feature = "modules")]
pub mod modules;

pub use crate::core::{DbQualifier, Qualifier, Registry, RegistryError};

#[cfg(feature = "configs")]
pub use configs::properties::{Properties, PropertyError, PropertySource};
