//! # Core Module
//!
//! The naming and storage layer every registration helper builds on.
//!
//! ## Core Components:
//!
//! - **`qualifier`**: role-tagged names (`<name>-datasource`,
//!   `<name>-readonly-datasource`, `<name>-db`, `<name>-redis`) that identify
//!   registered resources without colliding across roles.
//!
//! - **`registry`**: the singleton store. Resources are registered once at
//!   startup, looked up by qualifier and type, and released exactly once when
//!   the registry is closed.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Role-tagged identifiers for registered resources.
pub mod qualifier;
/// Singleton storage with release callbacks.
pub mod registry;

// --- Public API Re-exports ---
pub use qualifier::{DbQualifier, Qualifier};
pub use registry::{Binding, Registry, RegistryError};
