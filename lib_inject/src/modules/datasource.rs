use std::sync::Arc;

use log::info;

use super::ModuleError;
use crate::configs::properties::{PropertyError, PropertySource};
use crate::connections::db_postgres::{DataSource, DataSourceParams, PoolCustomizer, PoolSettings, DEFAULT_POOL_SIZE};
use crate::core::{Qualifier, Registry, RegistryError};

/// How a data source is built and registered.
///
/// | field | default |
/// |---|---|
/// | `read_only` | the qualifier's read-only flag |
/// | `name` | the qualifier's name |
/// | `pool_size` | 5 |
/// | `property_prefix` | `db.<name>.`, or `db.<name>.readonly.` when read-only |
/// | `auto_connect` | `true` |
/// | `configure` | none |
#[derive(Clone)]
pub struct DataSourceOptions {
    pub read_only: Option<bool>,
    pub name: Option<String>,
    pub pool_size: u32,
    pub property_prefix: Option<String>,
    pub auto_connect: bool,
    pub configure: Option<PoolCustomizer>,
}

impl Default for DataSourceOptions {
    fn default() -> Self {
        Self {
            read_only: None,
            name: None,
            pool_size: DEFAULT_POOL_SIZE,
            property_prefix: None,
            auto_connect: true,
            configure: None,
        }
    }
}

impl DataSourceOptions {
    /// Fills every unset field from `qualifier`; returns the pool settings and
    /// the property prefix.
    pub fn resolve(&self, qualifier: &Qualifier) -> (PoolSettings, String) {
        let read_only = self.read_only.unwrap_or_else(|| qualifier.is_read_only());
        let name = self.name.clone().unwrap_or_else(|| qualifier.name().to_string());
        let property_prefix = self.property_prefix.clone().unwrap_or_else(|| {
            if read_only {
                format!("db.{}.readonly.", name)
            } else {
                format!("db.{}.", name)
            }
        });

        let settings = PoolSettings {
            name,
            read_only,
            pool_size: self.pool_size,
            auto_connect: self.auto_connect,
            configure: self.configure.clone(),
        };
        (settings, property_prefix)
    }
}

/// Reads `<prefix>driver|url|username|password`; only `url` is required.
pub fn data_source_params<P>(properties: &P, prefix: &str) -> Result<DataSourceParams, PropertyError>
where
    P: PropertySource + ?Sized,
{
    Ok(DataSourceParams {
        driver: properties.get_string(&format!("{}driver", prefix)),
        url: properties.require_string(&format!("{}url", prefix))?,
        username: properties.get_string(&format!("{}username", prefix)),
        password: properties.get_string(&format!("{}password", prefix)),
    })
}

/// Registers a data source whose connection parameters come from the
/// registry's properties.
pub async fn data_source(
    registry: &mut Registry,
    qualifier: &Qualifier,
    options: DataSourceOptions,
) -> Result<Arc<DataSource>, ModuleError> {
    let (settings, prefix) = options.resolve(qualifier);
    let params = data_source_params(registry.properties(), &prefix)?;
    register(registry, qualifier, &params, &settings).await
}

/// Registers a data source from explicit connection parameters.
/// `options.property_prefix` is ignored.
pub async fn data_source_with(
    registry: &mut Registry,
    qualifier: &Qualifier,
    params: DataSourceParams,
    options: DataSourceOptions,
) -> Result<Arc<DataSource>, ModuleError> {
    let (settings, _) = options.resolve(qualifier);
    register(registry, qualifier, &params, &settings).await
}

async fn register(
    registry: &mut Registry,
    qualifier: &Qualifier,
    params: &DataSourceParams,
    settings: &PoolSettings,
) -> Result<Arc<DataSource>, ModuleError> {
    // fail before opening a pool that could never be registered
    if registry.is_closed() {
        return Err(RegistryError::Closed.into());
    }
    if registry.contains::<DataSource>(qualifier) {
        return Err(RegistryError::AlreadyRegistered {
            qualifier: qualifier.id(),
            type_name: std::any::type_name::<DataSource>(),
        }
        .into());
    }

    let data_source = DataSource::connect(params, settings).await?;
    info!(
        "Registered {} (pool size {}, read-only {})",
        qualifier,
        data_source.pool_size(),
        data_source.is_read_only()
    );

    let binding = registry
        .single(qualifier, data_source)?
        .on_close(|data_source| async move { data_source.close().await });
    Ok(binding.into_instance())
}
