//! # Configuration Modules
//!
//! The property store registrations read from, and the loader that fills it
//! from layered JSON files and the environment.

/// Flat property store and typed getters.
pub mod properties;

/// Layered JSON / environment loading into a property store.
pub mod config_sys;
