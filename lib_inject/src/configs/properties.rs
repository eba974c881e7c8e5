//! # Properties
//!
//! The flat key-value store registrations read their settings from, and the
//! typed getters shared by every property source.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

/// Errors raised while reading a single property.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PropertyError {
    /// A required key is absent and has no default.
    #[error("Missing required property: {0}")]
    Missing(String),

    /// The value exists but is not an integer.
    #[error("Property {key} is not an integer: {value:?}")]
    InvalidInt { key: String, value: String },

    /// The value is an integer but does not fit the target type.
    #[error("Property {key} is out of range: {value}")]
    OutOfRange { key: String, value: i64 },
}

/// Read access to a flat string property store.
///
/// Implementors provide [`PropertySource::property`]; the typed getters are
/// shared. Boolean values are `true` only when the stored text equals `"true"`
/// ignoring ASCII case.
pub trait PropertySource {
    /// Raw lookup of `key`.
    fn property(&self, key: &str) -> Option<String>;

    fn get_string(&self, key: &str) -> Option<String> {
        self.property(key)
    }

    fn get_string_or(&self, key: &str, default: &str) -> String {
        self.property(key).unwrap_or_else(|| default.to_string())
    }

    fn require_string(&self, key: &str) -> Result<String, PropertyError> {
        self.property(key).ok_or_else(|| PropertyError::Missing(key.to_string()))
    }

    fn get_int(&self, key: &str) -> Result<Option<i64>, PropertyError> {
        match self.property(key) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| PropertyError::InvalidInt { key: key.to_string(), value }),
        }
    }

    fn get_int_or(&self, key: &str, default: i64) -> Result<i64, PropertyError> {
        Ok(self.get_int(key)?.unwrap_or(default))
    }

    /// Integer lookup converted into a narrower type, e.g. a port.
    fn get_int_as<T>(&self, key: &str, default: T) -> Result<T, PropertyError>
    where
        T: TryFrom<i64>,
    {
        match self.get_int(key)? {
            None => Ok(default),
            Some(value) => {
                T::try_from(value).map_err(|_| PropertyError::OutOfRange { key: key.to_string(), value })
            }
        }
    }

    fn get_boolean(&self, key: &str) -> Option<bool> {
        self.property(key).map(|value| value.eq_ignore_ascii_case("true"))
    }

    fn get_boolean_or(&self, key: &str, default: bool) -> bool {
        self.get_boolean(key).unwrap_or(default)
    }
}

impl<S: std::hash::BuildHasher> PropertySource for HashMap<String, String, S> {
    fn property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl PropertySource for BTreeMap<String, String> {
    fn property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// The registry's property store.
///
/// Keys are dotted paths (`db.main.url`). Keys are normalized on the way in:
/// `:` (the configuration-provider separator) becomes `.` and ASCII letters
/// are lowercased, so `DB__MAIN__URL` from the environment and
/// `{"db":{"main":{"url":..}}}` from JSON land on the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut properties = Self::new();
        for (key, value) in pairs {
            properties.insert(key, value);
        }
        properties
    }

    /// Sets `key`, replacing any previous value.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.values.insert(normalize_key(key.as_ref()), value.into());
    }

    /// Copies every entry of `other` over this store.
    pub fn extend(&mut self, other: Properties) {
        self.values.extend(other.values);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// All entries whose key starts with `prefix`, with the prefix removed.
    pub fn with_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        let prefix = normalize_key(prefix);
        self.values
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v.clone())))
            .collect()
    }
}

impl PropertySource for Properties {
    fn property(&self, key: &str) -> Option<String> {
        self.values.get(&normalize_key(key)).cloned()
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.values {
            if is_secret(key) {
                writeln!(f, "{} = *****", key)?;
            } else {
                writeln!(f, "{} = {}", key, value)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn normalize_key(key: &str) -> String {
    key.replace(':', ".").to_ascii_lowercase()
}

fn is_secret(key: &str) -> bool {
    key.ends_with("password") || key.ends_with("secret")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Properties {
        Properties::from_pairs([
            ("flag.upper", "TRUE"),
            ("flag.mixed", "True"),
            ("flag.yes", "yes"),
            ("db.main.port", "5432"),
            ("db.main.bad", "54x"),
            ("db.main.url", "postgres://localhost/app"),
            ("redis.cache.port", "70000"),
        ])
    }

    #[test]
    fn test_boolean_is_case_insensitive_true() {
        let props = sample();
        assert_eq!(props.get_boolean("flag.upper"), Some(true));
        assert_eq!(props.get_boolean("flag.mixed"), Some(true));
        assert_eq!(props.get_boolean("flag.yes"), Some(false));
        assert_eq!(props.get_boolean("flag.absent"), None);
    }

    #[test]
    fn test_boolean_default_only_applies_when_absent() {
        let props = sample();
        assert!(props.get_boolean_or("flag.absent", true));
        assert!(!props.get_boolean_or("flag.absent", false));
        assert!(!props.get_boolean_or("flag.yes", true));
    }

    #[test]
    fn test_string_getters() {
        let props = sample();
        assert_eq!(props.get_string("db.main.url").as_deref(), Some("postgres://localhost/app"));
        assert_eq!(props.get_string("db.other.url"), None);
        assert_eq!(props.get_string_or("db.other.url", "fallback"), "fallback");
        assert_eq!(
            props.require_string("db.other.url"),
            Err(PropertyError::Missing("db.other.url".to_string()))
        );
    }

    #[test]
    fn test_int_getters() {
        let props = sample();
        assert_eq!(props.get_int("db.main.port"), Ok(Some(5432)));
        assert_eq!(props.get_int("db.main.absent"), Ok(None));
        assert_eq!(props.get_int_or("db.main.absent", 7), Ok(7));
        assert!(matches!(props.get_int("db.main.bad"), Err(PropertyError::InvalidInt { .. })));
        assert_eq!(props.get_int_as::<u16>("db.main.port", 1), Ok(5432));
        assert!(matches!(
            props.get_int_as::<u16>("redis.cache.port", 6379),
            Err(PropertyError::OutOfRange { value: 70000, .. })
        ));
    }

    #[test]
    fn test_keys_are_normalized() {
        let mut props = Properties::new();
        props.insert("DB:Main:URL", "postgres://h/db");
        assert_eq!(props.get_string("db.main.url").as_deref(), Some("postgres://h/db"));
        assert_eq!(props.get_string("DB.MAIN.URL").as_deref(), Some("postgres://h/db"));
    }

    #[test]
    fn test_with_prefix_strips_prefix() {
        let props = sample();
        let db = props.with_prefix("db.main.");
        assert_eq!(db.get("port").map(String::as_str), Some("5432"));
        assert_eq!(db.len(), 3);
    }

    #[test]
    fn test_display_masks_passwords() {
        let props = Properties::from_pairs([("db.main.password", "hunter2"), ("db.main.username", "app")]);
        let shown = props.to_string();
        assert!(shown.contains("db.main.password = *****"));
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("db.main.username = app"));
    }

    #[test]
    fn test_maps_are_property_sources() {
        let mut map = HashMap::new();
        map.insert("flag".to_string(), "TrUe".to_string());
        assert_eq!(map.get_boolean("flag"), Some(true));
    }
}
