use std::sync::Arc;

use log::debug;

use super::datasource::{data_source, DataSourceOptions};
use super::ModuleError;
use crate::connections::database::{CrudDb, Db, ReadDb};
use crate::connections::db_postgres::{DataSource, PoolCustomizer, DEFAULT_POOL_SIZE};
use crate::core::{DbQualifier, Registry};

/// Pool size of the primary when a separate read-only source exists.
pub const DEFAULT_CRUD_POOL_SIZE: u32 = 3;

/// How [`db`] builds its data sources.
#[derive(Clone)]
pub struct DbOptions {
    /// Build the data sources; when `false` they must already be registered.
    pub create_data_source: bool,
    /// Build a separate read-only data source instead of aliasing the primary.
    pub with_read_only: bool,
    pub read_pool_size: u32,
    /// Defaults to 3 with a read-only source, `read_pool_size` otherwise.
    pub crud_pool_size: Option<u32>,
    pub auto_connect: bool,
    pub configure: Option<PoolCustomizer>,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            create_data_source: true,
            with_read_only: false,
            read_pool_size: DEFAULT_POOL_SIZE,
            crud_pool_size: None,
            auto_connect: true,
            configure: None,
        }
    }
}

impl DbOptions {
    /// The primary pool size after defaults.
    pub fn crud_pool_size(&self) -> u32 {
        self.crud_pool_size.unwrap_or(if self.with_read_only {
            DEFAULT_CRUD_POOL_SIZE
        } else {
            self.read_pool_size
        })
    }
}

/// How [`read_db`] builds its data source.
#[derive(Clone)]
pub struct ReadDbOptions {
    pub create_data_source: bool,
    pub pool_size: u32,
    pub auto_connect: bool,
    pub configure: Option<PoolCustomizer>,
}

impl Default for ReadDbOptions {
    fn default() -> Self {
        Self {
            create_data_source: true,
            pool_size: DEFAULT_POOL_SIZE,
            auto_connect: true,
            configure: None,
        }
    }
}

/// Registers a read-write database.
///
/// Without `with_read_only` the read-only qualifier is an alias of the primary
/// data source: one pool, one release callback.
pub async fn db(registry: &mut Registry, qualifier: &DbQualifier, options: DbOptions) -> Result<Arc<CrudDb>, ModuleError> {
    if options.create_data_source {
        let primary_options = DataSourceOptions {
            read_only: Some(false),
            name: Some(qualifier.name().to_string()),
            pool_size: options.crud_pool_size(),
            auto_connect: options.auto_connect,
            configure: options.configure.clone(),
            ..Default::default()
        };
        data_source(registry, qualifier.data_source(), primary_options).await?;

        if options.with_read_only {
            let read_options = DataSourceOptions {
                read_only: Some(true),
                name: Some(qualifier.name().to_string()),
                pool_size: options.read_pool_size,
                auto_connect: options.auto_connect,
                configure: options.configure.clone(),
                ..Default::default()
            };
            data_source(registry, qualifier.read_only_data_source(), read_options).await?;
        } else {
            let primary = registry.require::<DataSource>(qualifier.data_source())?;
            registry.single_arc(qualifier.read_only_data_source(), primary)?;
            debug!("{} aliases {}", qualifier.read_only_data_source(), qualifier.data_source());
        }
    }

    let primary = registry.require::<DataSource>(qualifier.data_source())?;
    let read_only = registry.require::<DataSource>(qualifier.read_only_data_source())?;
    let binding = registry
        .single(qualifier.qualifier(), CrudDb::new(primary, read_only))?
        .bind(|db: Arc<CrudDb>| db as Arc<dyn Db>)?;
    Ok(binding.into_instance())
}

/// Registers a read-only database over the `db.<name>.readonly.*` source.
pub async fn read_db(
    registry: &mut Registry,
    qualifier: &DbQualifier,
    options: ReadDbOptions,
) -> Result<Arc<ReadDb>, ModuleError> {
    if options.create_data_source {
        let read_options = DataSourceOptions {
            read_only: Some(true),
            name: Some(qualifier.name().to_string()),
            pool_size: options.pool_size,
            auto_connect: options.auto_connect,
            configure: options.configure,
            ..Default::default()
        };
        data_source(registry, qualifier.read_only_data_source(), read_options).await?;
    }

    let source = registry.require::<DataSource>(qualifier.read_only_data_source())?;
    let binding = registry
        .single(qualifier.qualifier(), ReadDb::new(source))?
        .bind(|db: Arc<ReadDb>| db as Arc<dyn Db>)?;
    Ok(binding.into_instance())
}
