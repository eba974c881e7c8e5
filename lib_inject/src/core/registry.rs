//! # Registry
//!
//! Holds singletons keyed by qualifier and type, plus the release callbacks
//! that run once when the registry is closed.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use thiserror::Error;

use super::qualifier::Qualifier;
#[cfg(feature = "configs")]
use crate::configs::properties::Properties;

/// Errors raised while registering or resolving singletons.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("'{qualifier}' is already registered as {type_name}")]
    AlreadyRegistered { qualifier: String, type_name: &'static str },

    #[error("no definition found for '{qualifier}' as {type_name}")]
    NoDefinition { qualifier: String, type_name: &'static str },

    #[error("registry is closed")]
    Closed,
}

type EntryKey = (String, TypeId);

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct CloseHook {
    qualifier: String,
    release: ReleaseFn,
}

/// Singleton store for resources built at startup.
///
/// Every entry is an `Arc<T>` stored under `(qualifier id, TypeId::of::<T>())`,
/// so the same qualifier may expose one instance under several types (see
/// [`Binding::bind`]). Release callbacks are kept in registration order and run
/// in reverse by [`Registry::close`].
pub struct Registry {
    #[cfg(feature = "configs")]
    properties: Properties,
    entries: HashMap<EntryKey, Box<dyn Any + Send + Sync>>,
    close_hooks: Vec<CloseHook>,
    closed: bool,
}

impl Registry {
    /// An empty registry reading its settings from `properties`.
    #[cfg(feature = "configs")]
    pub fn new(properties: Properties) -> Self {
        Self {
            properties,
            entries: HashMap::new(),
            close_hooks: Vec::new(),
            closed: false,
        }
    }

    /// An empty registry.
    #[cfg(not(feature = "configs"))]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            close_hooks: Vec::new(),
            closed: false,
        }
    }

    /// The flat configuration store registrations read from.
    #[cfg(feature = "configs")]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Registers `value` as the singleton for `qualifier`.
    pub fn single<T>(&mut self, qualifier: &Qualifier, value: T) -> Result<Binding<'_, T>, RegistryError>
    where
        T: Send + Sync + 'static,
    {
        self.single_arc(qualifier, Arc::new(value))
    }

    /// Registers an existing shared instance for `qualifier`.
    ///
    /// Used for aliases: the instance keeps whatever release callback it was
    /// first registered with and gets no new one.
    pub fn single_arc<T>(&mut self, qualifier: &Qualifier, instance: Arc<T>) -> Result<Binding<'_, T>, RegistryError>
    where
        T: Send + Sync + 'static,
    {
        let key = self.insert(qualifier, Arc::clone(&instance))?;
        let hooks_before = self.close_hooks.len();
        Ok(Binding {
            registry: self,
            qualifier: qualifier.clone(),
            instance,
            inserted: vec![key],
            hooks_before,
        })
    }

    /// Looks up the instance registered for `qualifier` as `T`.
    pub fn get<T>(&self, qualifier: &Qualifier) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .get(&(qualifier.id(), TypeId::of::<T>()))
            .and_then(|entry| entry.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Like [`Registry::get`] but missing definitions are an error.
    pub fn require<T>(&self, qualifier: &Qualifier) -> Result<Arc<T>, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get(qualifier).ok_or_else(|| RegistryError::NoDefinition {
            qualifier: qualifier.id(),
            type_name: std::any::type_name::<T>(),
        })
    }

    /// `true` when something is registered for `qualifier` as `T`.
    pub fn contains<T>(&self, qualifier: &Qualifier) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries.contains_key(&(qualifier.id(), TypeId::of::<T>()))
    }

    /// Number of release callbacks that [`Registry::close`] will run.
    pub fn pending_close_hooks(&self) -> usize {
        self.close_hooks.len()
    }

    /// `true` once [`Registry::close`] has started.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Runs every release callback exactly once, newest first, then drops all
    /// entries. Calling it again is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let hooks = std::mem::take(&mut self.close_hooks);
        info!("Closing registry: {} resource(s) to release", hooks.len());
        for hook in hooks.into_iter().rev() {
            debug!("Releasing {}", hook.qualifier);
            (hook.release)().await;
        }
        self.entries.clear();
    }

    fn insert<T>(&mut self, qualifier: &Qualifier, instance: Arc<T>) -> Result<EntryKey, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.closed {
            return Err(RegistryError::Closed);
        }

        let key = (qualifier.id(), TypeId::of::<T>());
        if self.entries.contains_key(&key) {
            return Err(RegistryError::AlreadyRegistered {
                qualifier: key.0,
                type_name: std::any::type_name::<T>(),
            });
        }

        debug!("Registered {} as {}", key.0, std::any::type_name::<T>());
        self.entries.insert(key.clone(), Box::new(instance));
        Ok(key)
    }
}

#[cfg(not(feature = "configs"))]
impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if !self.close_hooks.is_empty() {
            warn!(
                "Registry dropped without close(); {} resource(s) were not released",
                self.close_hooks.len()
            );
        }
    }
}

/// A freshly registered singleton, used to add type bindings and a release
/// callback.
pub struct Binding<'r, T> {
    registry: &'r mut Registry,
    qualifier: Qualifier,
    instance: Arc<T>,
    /// Entries added through this binding, removed again if a later bind fails.
    inserted: Vec<EntryKey>,
    hooks_before: usize,
}

impl<'r, T> Binding<'r, T>
where
    T: Send + Sync + 'static,
{
    /// Also exposes the instance as `U` under the same qualifier, typically a
    /// trait object: `.bind(|db: Arc<CrudDb>| db as Arc<dyn Db>)`.
    ///
    /// On failure everything registered through this binding is removed, so
    /// the registry is left as it was before [`Registry::single`].
    pub fn bind<U, F>(mut self, cast: F) -> Result<Self, RegistryError>
    where
        U: ?Sized + Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> Arc<U>,
    {
        let view = cast(Arc::clone(&self.instance));
        match self.registry.insert(&self.qualifier, view) {
            Ok(key) => {
                self.inserted.push(key);
                Ok(self)
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    fn rollback(self) {
        for key in &self.inserted {
            self.registry.entries.remove(key);
        }
        self.registry.close_hooks.truncate(self.hooks_before);
        debug!("Rolled back registration of {}", self.qualifier);
    }

    /// Attaches the callback that releases the instance on [`Registry::close`].
    pub fn on_close<F, Fut>(self, release: F) -> Self
    where
        F: FnOnce(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let instance = Arc::clone(&self.instance);
        self.registry.close_hooks.push(CloseHook {
            qualifier: self.qualifier.id(),
            release: Box::new(move || Box::pin(release(instance))),
        });
        self
    }

    /// The registered instance.
    pub fn instance(&self) -> &Arc<T> {
        &self.instance
    }

    /// Ends the binding, returning the registered instance.
    pub fn into_instance(self) -> Arc<T> {
        self.instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Named: Send + Sync {
        fn label(&self) -> &str;
    }

    struct Counter {
        label: String,
        closes: Arc<AtomicUsize>,
    }

    impl Named for Counter {
        fn label(&self) -> &str {
            &self.label
        }
    }

    #[cfg(feature = "configs")]
    fn registry() -> Registry {
        Registry::new(Properties::default())
    }

    #[cfg(not(feature = "configs"))]
    fn registry() -> Registry {
        Registry::new()
    }

    fn counter(label: &str, closes: &Arc<AtomicUsize>) -> Counter {
        Counter { label: label.to_string(), closes: Arc::clone(closes) }
    }

    #[tokio::test]
    async fn test_get_by_qualifier_and_type() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut registry = registry();
        let q = Qualifier::cache("a");

        registry
            .single(&q, counter("a", &closes))
            .unwrap()
            .bind(|c: Arc<Counter>| c as Arc<dyn Named>)
            .unwrap();

        assert_eq!(registry.get::<Counter>(&q).unwrap().label, "a");
        assert_eq!(registry.get::<dyn Named>(&q).unwrap().label(), "a");
        assert!(registry.get::<Counter>(&Qualifier::cache("b")).is_none());
        assert!(registry.get::<String>(&q).is_none());
        registry.close().await;
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut registry = registry();
        let q = Qualifier::database("dup");

        registry.single(&q, counter("one", &closes)).unwrap();
        let err = registry.single(&q, counter("two", &closes)).err().unwrap();
        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
        assert_eq!(registry.get::<Counter>(&q).unwrap().label, "one");
    }

    #[test]
    fn test_require_reports_missing_definition() {
        let registry = registry();
        let err = registry.require::<Counter>(&Qualifier::database("nope")).err().unwrap();
        match err {
            RegistryError::NoDefinition { qualifier, .. } => assert_eq!(qualifier, "nope-db"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_alias_shares_instance_and_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut registry = registry();
        let primary = Qualifier::data_source("main");
        let replica = Qualifier::read_only_data_source("main");

        registry
            .single(&primary, counter("main", &closes))
            .unwrap()
            .on_close(|c| async move {
                c.closes.fetch_add(1, Ordering::SeqCst);
            });
        let shared = registry.require::<Counter>(&primary).unwrap();
        registry.single_arc(&replica, shared).unwrap();

        assert!(Arc::ptr_eq(
            &registry.get::<Counter>(&primary).unwrap(),
            &registry.get::<Counter>(&replica).unwrap()
        ));
        assert_eq!(registry.pending_close_hooks(), 1);

        registry.close().await;
        registry.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(registry.get::<Counter>(&primary).is_none());
    }

    #[tokio::test]
    async fn test_close_runs_newest_first() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));
        let mut registry = registry();

        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            registry
                .single(&Qualifier::cache(name), counter(name, &closes))
                .unwrap()
                .on_close(move |c| async move {
                    order.lock().unwrap().push(c.label.clone());
                });
        }

        registry.close().await;
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_failed_bind_leaves_registry_untouched() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut registry = registry();
        let q = Qualifier::database("orders");

        registry
            .single(&q, counter("first", &closes))
            .unwrap()
            .bind(|c: Arc<Counter>| c as Arc<dyn Named>)
            .unwrap();

        // same qualifier, another concrete type, but the dyn view is taken
        let err = registry
            .single(&q, String::from("second"))
            .unwrap()
            .on_close(|_| async {})
            .bind(|s: Arc<String>| s as Arc<dyn std::fmt::Debug + Send + Sync>)
            .unwrap()
            .bind(|_: Arc<String>| Arc::new(counter("view", &Arc::new(AtomicUsize::new(0)))) as Arc<dyn Named>)
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));

        assert!(!registry.contains::<String>(&q));
        assert!(!registry.contains::<dyn std::fmt::Debug + Send + Sync>(&q));
        assert_eq!(registry.pending_close_hooks(), 0);
        assert_eq!(registry.require::<dyn Named>(&q).unwrap().label(), "first");
        registry.close().await;
    }

    #[tokio::test]
    async fn test_registration_after_close_fails() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut registry = registry();
        registry.close().await;
        let err = registry.single(&Qualifier::cache("late"), counter("late", &closes)).err().unwrap();
        assert!(matches!(err, RegistryError::Closed));
    }
}
