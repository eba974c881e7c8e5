//! # Connections Module
//!
//! This module handles persistent connections to external services
//! including databases and caching layers.

/// Module for PostgreSQL data sources (pooled connection factories).
pub mod db_postgres;

/// Read and read-write database facades over data sources.
pub mod database;

/// Module for Redis cache clients and connection handling.
pub mod cache_redis;
