//! # Resource Probe
//!
//! Registers the named databases and cache clients exactly as a service would
//! at startup, checks that each one answers, then releases everything.
//! Exits non-zero when any resource fails, so it can gate a deployment.
//!
//! ```text
//! probe_resources --db orders --db billing --with-read-only --redis sessions
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lib_inject::configs::config_sys::{load_process_properties, load_properties};
use lib_inject::connections::database::Db;
use lib_inject::connections::db_postgres::mask_url_password;
use lib_inject::loggers::setup_logging;
use lib_inject::modules::{
    db, read_db, replica_string_redis, standalone_string_redis, DbOptions, ModuleError, ReadDbOptions,
    RedisOptions,
};
use lib_inject::{DbQualifier, PropertySource, Qualifier, Registry};
use log::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Checks the databases and caches a service is configured with", long_about = None)]
struct Args {
    /// Read-write database to probe (reads `db.<name>.*`). Repeatable.
    #[arg(long = "db")]
    dbs: Vec<String>,
    /// Read-only database to probe (reads `db.<name>.readonly.*`). Repeatable.
    #[arg(long = "read-db")]
    read_dbs: Vec<String>,
    /// Give every `--db` its own read-only pool.
    #[arg(long, default_value_t = false)]
    with_read_only: bool,
    /// Standalone Redis to probe (reads `redis.<name>.*`). Repeatable.
    #[arg(long = "redis")]
    redis: Vec<String>,
    /// Replicated Redis to probe. Repeatable.
    #[arg(long = "replica-redis")]
    replica_redis: Vec<String>,
    /// JSON files to load instead of the per-process layout.
    #[arg(short, long = "config")]
    configs: Vec<PathBuf>,
    #[arg(long, env = "PROBE_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn is_empty(&self) -> bool {
        self.dbs.is_empty() && self.read_dbs.is_empty() && self.redis.is_empty() && self.replica_redis.is_empty()
    }
}

/// `url` of a data source with its password hidden, for the report.
fn connection_info(registry: &Registry, key: &str) -> String {
    registry
        .properties()
        .get_string(key)
        .map(|url| mask_url_password(&url))
        .unwrap_or_else(|| "Unknown connection info".to_string())
}

async fn probe_db(registry: &mut Registry, name: &str, with_read_only: bool) -> Result<(), ModuleError> {
    let qualifier = DbQualifier::new(name);
    let options = DbOptions { with_read_only, ..Default::default() };
    db(registry, &qualifier, options).await?;
    let handle: Arc<dyn Db> = registry.require::<dyn Db>(qualifier.qualifier())?;
    handle.ping().await?;
    Ok(())
}

async fn probe_read_db(registry: &mut Registry, name: &str) -> Result<(), ModuleError> {
    let qualifier = DbQualifier::new(name);
    read_db(registry, &qualifier, ReadDbOptions::default()).await?;
    let handle: Arc<dyn Db> = registry.require::<dyn Db>(qualifier.qualifier())?;
    handle.ping().await?;
    Ok(())
}

async fn probe_redis(registry: &mut Registry, name: &str, replica: bool) -> Result<(), ModuleError> {
    let qualifier = Qualifier::cache(name);
    let client = if replica {
        replica_string_redis(registry, &qualifier, RedisOptions::default())?
    } else {
        standalone_string_redis(registry, &qualifier, RedisOptions::default())?
    };
    client.ping().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging("probe_resources", &args.log_dir, &args.log_level).context("Failed to initialize logging")?;

    let properties = if args.configs.is_empty() {
        load_process_properties()
    } else {
        load_properties(&args.configs, true)
    }
    .context("Failed to load properties")?;
    info!("Loaded {} properties", properties.len());

    if args.is_empty() {
        warn!("Nothing to probe. Pass --db, --read-db, --redis or --replica-redis.");
        return Ok(());
    }

    let mut registry = Registry::new(properties);
    let mut failures = 0usize;

    for name in &args.dbs {
        let result = probe_db(&mut registry, name, args.with_read_only).await;
        report(&registry, &format!("db '{}'", name), &format!("db.{}.url", name), result, &mut failures);
    }
    for name in &args.read_dbs {
        let result = probe_read_db(&mut registry, name).await;
        report(&registry, &format!("read db '{}'", name), &format!("db.{}.readonly.url", name), result, &mut failures);
    }
    for name in &args.redis {
        let result = probe_redis(&mut registry, name, false).await;
        report(&registry, &format!("redis '{}'", name), &format!("redis.{}.host", name), result, &mut failures);
    }
    for name in &args.replica_redis {
        let result = probe_redis(&mut registry, name, true).await;
        report(&registry, &format!("replica redis '{}'", name), &format!("redis.{}.host", name), result, &mut failures);
    }

    registry.close().await;

    if failures > 0 {
        anyhow::bail!("{} resource(s) FAILED", failures);
    }
    info!("All resources are HEALTHY");
    Ok(())
}

fn report(registry: &Registry, label: &str, key: &str, result: Result<(), ModuleError>, failures: &mut usize) {
    match result {
        Ok(()) => info!("SUCCESS: {} is HEALTHY. Connection: {}", label, connection_info(registry, key)),
        Err(e) => {
            *failures += 1;
            error!("FAILURE: {} FAILED. Connection: {}. Error: {:#}", label, connection_info(registry, key), e);
        }
    }
}
