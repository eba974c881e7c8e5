//! # Qualifiers
//!
//! Stable identifiers for resources registered in the [`Registry`](super::Registry).
//! A qualifier is a short logical name tagged with the role the resource plays;
//! the role decides the suffix of the identifier, so two roles never collide.

use std::fmt;
use std::sync::OnceLock;

const DATASOURCE_SUFFIX: &str = "-datasource";
const READONLY_DATASOURCE_SUFFIX: &str = "-readonly-datasource";
const DATABASE_SUFFIX: &str = "-db";
const CACHE_SUFFIX: &str = "-redis";

/// A role-tagged name identifying one registered resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// A pooled connection factory, either the primary or a read-only replica.
    DataSource { name: String, read_only: bool },
    /// A logical database-access object.
    Database { name: String },
    /// A cache client.
    Cache { name: String },
}

impl Qualifier {
    /// The primary (read-write) data source called `name`.
    pub fn data_source(name: impl Into<String>) -> Self {
        Self::DataSource { name: name.into(), read_only: false }
    }

    /// The read-only data source called `name`.
    pub fn read_only_data_source(name: impl Into<String>) -> Self {
        Self::DataSource { name: name.into(), read_only: true }
    }

    /// The database-access object called `name`.
    pub fn database(name: impl Into<String>) -> Self {
        Self::Database { name: name.into() }
    }

    /// The cache client called `name`.
    pub fn cache(name: impl Into<String>) -> Self {
        Self::Cache { name: name.into() }
    }

    /// The short logical name, without any role suffix.
    pub fn name(&self) -> &str {
        match self {
            Self::DataSource { name, .. } | Self::Database { name } | Self::Cache { name } => name,
        }
    }

    /// `true` only for the read-only data-source role.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::DataSource { read_only: true, .. })
    }

    /// The identifier string, e.g. `primary-readonly-datasource`.
    pub fn id(&self) -> String {
        self.to_string()
    }

    fn suffix(&self) -> &'static str {
        match self {
            Self::DataSource { read_only: false, .. } => DATASOURCE_SUFFIX,
            Self::DataSource { read_only: true, .. } => READONLY_DATASOURCE_SUFFIX,
            Self::Database { .. } => DATABASE_SUFFIX,
            Self::Cache { .. } => CACHE_SUFFIX,
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name(), self.suffix())
    }
}

/// A database qualifier together with the two data-source qualifiers it owns.
///
/// The children are derived on first access and kept for the lifetime of the
/// value, so repeated lookups hand out the same `&Qualifier`.
#[derive(Debug)]
pub struct DbQualifier {
    qualifier: Qualifier,
    primary: OnceLock<Qualifier>,
    read_only: OnceLock<Qualifier>,
}

impl DbQualifier {
    /// A database qualifier for `name`; its data-source qualifiers are
    /// derived lazily.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            qualifier: Qualifier::database(name),
            primary: OnceLock::new(),
            read_only: OnceLock::new(),
        }
    }

    /// The short logical name shared by all three qualifiers.
    pub fn name(&self) -> &str {
        self.qualifier.name()
    }

    /// Qualifier of the read-write pool: `<name>-datasource`.
    pub fn data_source(&self) -> &Qualifier {
        self.primary.get_or_init(|| Qualifier::data_source(self.name()))
    }

    /// Qualifier of the read-only pool: `<name>-readonly-datasource`.
    pub fn read_only_data_source(&self) -> &Qualifier {
        self.read_only.get_or_init(|| Qualifier::read_only_data_source(self.name()))
    }

    /// Qualifier of the database-access object: `<name>-db`.
    pub fn qualifier(&self) -> &Qualifier {
        &self.qualifier
    }
}

impl Clone for DbQualifier {
    fn clone(&self) -> Self {
        Self::new(self.name())
    }
}

impl PartialEq for DbQualifier {
    fn eq(&self, other: &Self) -> bool {
        self.qualifier == other.qualifier
    }
}

impl Eq for DbQualifier {}

impl AsRef<Qualifier> for DbQualifier {
    fn as_ref(&self) -> &Qualifier {
        &self.qualifier
    }
}

impl fmt::Display for DbQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.qualifier, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_source_ids() {
        assert_eq!(Qualifier::data_source("primary").id(), "primary-datasource");
        assert_eq!(
            Qualifier::read_only_data_source("primary").id(),
            "primary-readonly-datasource"
        );
    }

    #[test]
    fn test_database_and_cache_ids() {
        assert_eq!(Qualifier::database("orders").to_string(), "orders-db");
        assert_eq!(Qualifier::cache("session").to_string(), "session-redis");
    }

    #[test]
    fn test_ids_are_stable() {
        let q = Qualifier::read_only_data_source("main");
        assert_eq!(q.id(), q.id());
        assert_eq!(q, Qualifier::DataSource { name: "main".into(), read_only: true });
    }

    #[test]
    fn test_roles_do_not_collide() {
        let ids = [
            Qualifier::data_source("x").id(),
            Qualifier::read_only_data_source("x").id(),
            Qualifier::database("x").id(),
            Qualifier::cache("x").id(),
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in ids.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_db_qualifier_children_are_memoized() {
        let db = DbQualifier::new("main");
        assert_eq!(db.to_string(), "main-db");

        let first = db.data_source() as *const Qualifier;
        let second = db.data_source() as *const Qualifier;
        assert_eq!(first, second);

        assert_eq!(db.data_source().id(), "main-datasource");
        assert_eq!(db.read_only_data_source().id(), "main-readonly-datasource");
        assert!(db.read_only_data_source().is_read_only());
        assert!(!db.data_source().is_read_only());
    }
}
