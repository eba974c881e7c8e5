//! # Database Access Objects
//!
//! Thin read / read-write facades over one or two [`DataSource`]s. A `CrudDb`
//! sends writes to the primary pool and reads to the read-only pool (which may
//! be the very same pool when no replica is configured).

use std::sync::Arc;

use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};

use super::db_postgres::{DataSource, DbError};

/// Anything reads can be issued against.
pub trait Db: Send + Sync {
    /// The pool to run read queries on.
    fn reader(&self) -> &PgPool;
}

impl dyn Db {
    /// Runs `SELECT 1` on the read pool.
    pub async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(self.reader())
            .await
            .map_err(|e: sqlx::Error| DbError::QueryError(e.to_string()))?;
        Ok(())
    }
}

/// Read-only access through a single data source.
#[derive(Debug, Clone)]
pub struct ReadDb {
    data_source: Arc<DataSource>,
}

impl ReadDb {
    pub fn new(data_source: Arc<DataSource>) -> Self {
        Self { data_source }
    }

    pub fn data_source(&self) -> &Arc<DataSource> {
        &self.data_source
    }
}

impl Db for ReadDb {
    fn reader(&self) -> &PgPool {
        self.data_source.pool()
    }
}

/// Read-write access: writes on the primary, reads on the read-only source.
#[derive(Debug, Clone)]
pub struct CrudDb {
    primary: Arc<DataSource>,
    read_only: Arc<DataSource>,
}

impl CrudDb {
    pub fn new(primary: Arc<DataSource>, read_only: Arc<DataSource>) -> Self {
        Self { primary, read_only }
    }

    /// The pool to run writes on.
    pub fn writer(&self) -> &PgPool {
        self.primary.pool()
    }

    /// Starts a transaction on the primary pool.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, DbError> {
        self.primary
            .pool()
            .begin()
            .await
            .map_err(|e: sqlx::Error| DbError::ConnectionError(e.to_string()))
    }

    pub fn primary(&self) -> &Arc<DataSource> {
        &self.primary
    }

    pub fn read_only(&self) -> &Arc<DataSource> {
        &self.read_only
    }

    /// `true` when reads and writes go through the same pool.
    pub fn shares_pool(&self) -> bool {
        Arc::ptr_eq(&self.primary, &self.read_only)
    }
}

impl Db for CrudDb {
    fn reader(&self) -> &PgPool {
        self.read_only.pool()
    }
}
