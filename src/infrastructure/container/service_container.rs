//! Type-keyed service container
//!
//! Providers are stored per [`ServiceKey`] in a `DashMap`. Every registration owns
//! its own singleton cell, so concurrent first resolutions of one service wait on
//! that service only, and re-registering swaps provider and cache together.

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::any::Any;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, error, trace};

use super::{ServiceKey, ServiceLifetime};

/// Error type accepted from fallible providers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Instance = Arc<dyn Any + Send + Sync>;
type Provider = Box<dyn Fn(&ServiceContainer) -> Result<Instance, BoxError> + Send + Sync>;

/// Container errors
#[derive(Debug)]
pub enum ContainerError {
    /// No provider for the requested key
    ServiceNotRegistered {
        service: String,
        available: Vec<String>,
    },
    /// A provider (transitively) asked for the service it is building
    CircularDependency { chain: Vec<String> },
    /// The provider itself returned an error
    CreationFailed { service: String, source: BoxError },
    /// Stored instance does not have the requested type
    TypeMismatch {
        expected: &'static str,
        service: String,
    },
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerError::ServiceNotRegistered { service, available } => {
                if available.is_empty() {
                    write!(f, "Service not registered: {} (container is empty)", service)
                } else {
                    write!(
                        f,
                        "Service not registered: {} (registered: {})",
                        service,
                        available.join(", ")
                    )
                }
            }
            ContainerError::CircularDependency { chain } => {
                write!(f, "Circular dependency detected: {}", chain.join(" -> "))
            }
            ContainerError::CreationFailed { service, source } => {
                write!(f, "Service creation failed for {}: {}", service, source)
            }
            ContainerError::TypeMismatch { expected, service } => {
                write!(f, "Type mismatch resolving {}: expected {}", service, expected)
            }
        }
    }
}

impl std::error::Error for ContainerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ContainerError::CreationFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

struct Registration {
    lifetime: ServiceLifetime,
    provider: Provider,
    /// Only ever filled for `Singleton` registrations
    instance: OnceCell<Instance>,
}

#[derive(Default)]
struct InnerStats {
    total_resolutions: AtomicUsize,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    constructions: AtomicUsize,
}

struct Inner {
    registrations: DashMap<ServiceKey, Arc<Registration>>,
    stats: InnerStats,
    constructions: Constructions,
}

/// Wait-for graph of singleton constructions across threads.
///
/// A thread blocked on another thread's construction is a cycle when the chain
/// of owners and the keys they wait on leads back to a key it is building.
#[derive(Default)]
struct Constructions {
    state: Mutex<ConstructionState>,
}

#[derive(Default)]
struct ConstructionState {
    owners: HashMap<ServiceKey, ThreadId>,
    waiting: HashMap<ThreadId, ServiceKey>,
}

impl ConstructionState {
    fn cycle_through(&self, me: ThreadId, key: &ServiceKey) -> Option<Vec<String>> {
        let mut chain = vec![key.to_string()];
        let mut current = key;
        for _ in 0..=self.owners.len() {
            let owner = *self.owners.get(current)?;
            if owner == me {
                chain.insert(0, current.to_string());
                return Some(chain);
            }
            current = self.waiting.get(&owner)?;
            chain.push(current.to_string());
        }
        None
    }
}

impl Constructions {
    /// Announce that this thread is about to wait for (or build) `key`.
    fn wait_for<'a>(&'a self, key: &ServiceKey) -> Result<WaitGuard<'a>, ContainerError> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if let Some(chain) = state.cycle_through(me, key) {
            debug!(service = %key, chain = %chain.join(" -> "), "cross-thread cycle detected");
            return Err(ContainerError::CircularDependency { chain });
        }
        state.waiting.insert(me, key.clone());
        Ok(WaitGuard {
            constructions: self,
            me,
        })
    }

    /// Record that this thread won the cell and is running the provider for `key`.
    fn build<'a>(&'a self, key: &ServiceKey) -> BuildGuard<'a> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        state.waiting.remove(&me);
        state.owners.insert(key.clone(), me);
        BuildGuard {
            constructions: self,
            key: key.clone(),
            me,
        }
    }
}

struct WaitGuard<'a> {
    constructions: &'a Constructions,
    me: ThreadId,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.constructions.state.lock().waiting.remove(&self.me);
    }
}

struct BuildGuard<'a> {
    constructions: &'a Constructions,
    key: ServiceKey,
    me: ThreadId,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.constructions.state.lock();
        if state.owners.get(&self.key) == Some(&self.me) {
            state.owners.remove(&self.key);
        }
    }
}

thread_local! {
    /// Keys currently under construction on this thread, tagged with their container.
    static RESOLVING: RefCell<Vec<(usize, ServiceKey)>> = const { RefCell::new(Vec::new()) };
}

struct ResolutionGuard;

impl ResolutionGuard {
    fn enter(container: usize, key: &ServiceKey) -> Result<Self, ContainerError> {
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(start) = stack
                .iter()
                .position(|(owner, pending)| *owner == container && pending == key)
            {
                let mut chain: Vec<String> = stack[start..]
                    .iter()
                    .filter(|(owner, _)| *owner == container)
                    .map(|(_, pending)| pending.to_string())
                    .collect();
                chain.push(key.to_string());
                return Err(ContainerError::CircularDependency { chain });
            }
            stack.push((container, key.clone()));
            Ok(ResolutionGuard)
        })
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        RESOLVING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Shared service container.
///
/// Cloning is cheap and every clone sees the same registrations and cache. The
/// container is meant to be fully populated before request handling starts;
/// registering afterwards is memory safe but replaces a provider that running
/// code may already be resolving.
#[derive(Clone)]
pub struct ServiceContainer {
    inner: Arc<Inner>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registrations: DashMap::new(),
                stats: InnerStats::default(),
                constructions: Constructions::default(),
            }),
        }
    }

    /// Register a fallible provider for `T`.
    ///
    /// Replaces any previous registration for `T`, including its cached instance.
    pub fn register<T, E, F>(&self, lifetime: ServiceLifetime, provider: F)
    where
        T: Send + Sync + 'static,
        E: Into<BoxError>,
        F: Fn(&ServiceContainer) -> Result<T, E> + Send + Sync + 'static,
    {
        self.insert(ServiceKey::of::<T>(), lifetime, erase(provider));
    }

    /// Register a fallible provider under a discriminated key.
    pub fn register_named<T, E, F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        lifetime: ServiceLifetime,
        provider: F,
    ) where
        T: Send + Sync + 'static,
        E: Into<BoxError>,
        F: Fn(&ServiceContainer) -> Result<T, E> + Send + Sync + 'static,
    {
        self.insert(ServiceKey::named::<T>(name), lifetime, erase(provider));
    }

    /// Register an infallible provider for `T`.
    pub fn provide<T, F>(&self, lifetime: ServiceLifetime, provider: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> T + Send + Sync + 'static,
    {
        self.register(lifetime, move |container| {
            Ok::<T, BoxError>(provider(container))
        });
    }

    pub fn provide_named<T, F>(
        &self,
        name: impl Into<Cow<'static, str>>,
        lifetime: ServiceLifetime,
        provider: F,
    ) where
        T: Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> T + Send + Sync + 'static,
    {
        self.register_named(name, lifetime, move |container| {
            Ok::<T, BoxError>(provider(container))
        });
    }

    pub fn singleton<T, F>(&self, provider: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> T + Send + Sync + 'static,
    {
        self.provide(ServiceLifetime::Singleton, provider);
    }

    pub fn transient<T, F>(&self, provider: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> T + Send + Sync + 'static,
    {
        self.provide(ServiceLifetime::Transient, provider);
    }

    /// Register an already constructed value as a singleton.
    pub fn provide_instance<T: Send + Sync + 'static>(&self, value: T) {
        let instance: Instance = Arc::new(value);
        let cached = Arc::clone(&instance);
        let registration = Registration {
            lifetime: ServiceLifetime::Singleton,
            provider: Box::new(move |_| Ok(Arc::clone(&instance))),
            instance: OnceCell::with_value(cached),
        };
        self.store(ServiceKey::of::<T>(), registration);
    }

    fn insert(&self, key: ServiceKey, lifetime: ServiceLifetime, provider: Provider) {
        let registration = Registration {
            lifetime,
            provider,
            instance: OnceCell::new(),
        };
        self.store(key, registration);
    }

    fn store(&self, key: ServiceKey, registration: Registration) {
        let lifetime = registration.lifetime;
        let replaced = self
            .inner
            .registrations
            .insert(key.clone(), Arc::new(registration))
            .is_some();
        debug!(service = %key, %lifetime, replaced, "provider registered");
    }

    /// Resolve `T`, panicking on any wiring or construction error.
    ///
    /// A missing registration is a configuration bug; use [`Self::try_resolve`]
    /// where a miss must be handled.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Arc<T> {
        self.try_resolve::<T>().unwrap_or_else(|err| fatal(err))
    }

    pub fn resolve_named<T: Send + Sync + 'static>(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> Arc<T> {
        self.try_resolve_named::<T>(name)
            .unwrap_or_else(|err| fatal(err))
    }

    pub fn try_resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ContainerError> {
        self.resolve_key(ServiceKey::of::<T>())
    }

    pub fn try_resolve_named<T: Send + Sync + 'static>(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> Result<Arc<T>, ContainerError> {
        self.resolve_key(ServiceKey::named::<T>(name))
    }

    fn resolve_key<T: Send + Sync + 'static>(
        &self,
        key: ServiceKey,
    ) -> Result<Arc<T>, ContainerError> {
        self.inner
            .stats
            .total_resolutions
            .fetch_add(1, Ordering::Relaxed);

        let registration = self
            .inner
            .registrations
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| self.not_registered(&key))?;

        let instance = match registration.lifetime {
            ServiceLifetime::Singleton => match registration.instance.get() {
                Some(instance) => {
                    self.inner.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    Arc::clone(instance)
                }
                None => {
                    self.inner.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
                    let _guard = ResolutionGuard::enter(self.id(), &key)?;
                    let _waiting = self.inner.constructions.wait_for(&key)?;
                    // Losers of a first-construction race block here until the
                    // winner stores its instance; a failure leaves the cell empty.
                    let instance = registration.instance.get_or_try_init(|| {
                        let _building = self.inner.constructions.build(&key);
                        self.construct(&key, &registration)
                    })?;
                    Arc::clone(instance)
                }
            },
            ServiceLifetime::Transient => {
                let _guard = ResolutionGuard::enter(self.id(), &key)?;
                self.construct(&key, &registration)?
            }
        };

        instance
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                service: key.to_string(),
            })
    }

    fn construct(
        &self,
        key: &ServiceKey,
        registration: &Registration,
    ) -> Result<Instance, ContainerError> {
        trace!(service = %key, lifetime = %registration.lifetime, "invoking provider");
        self.inner.stats.constructions.fetch_add(1, Ordering::Relaxed);
        (registration.provider)(self).map_err(|source| {
            debug!(service = %key, error = %source, "provider failed");
            ContainerError::CreationFailed {
                service: key.to_string(),
                source,
            }
        })
    }

    fn not_registered(&self, key: &ServiceKey) -> ContainerError {
        let mut available: Vec<String> = self
            .inner
            .registrations
            .iter()
            .map(|entry| entry.key().to_string())
            .collect();
        available.sort();
        ContainerError::ServiceNotRegistered {
            service: key.to_string(),
            available,
        }
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.inner.registrations.contains_key(&ServiceKey::of::<T>())
    }

    pub fn is_registered_named<T: 'static>(&self, name: impl Into<Cow<'static, str>>) -> bool {
        self.inner
            .registrations
            .contains_key(&ServiceKey::named::<T>(name))
    }

    pub fn lifetime_of<T: 'static>(&self) -> Option<ServiceLifetime> {
        self.inner
            .registrations
            .get(&ServiceKey::of::<T>())
            .map(|entry| entry.value().lifetime)
    }

    /// Whether a singleton instance of `T` has been built and cached.
    pub fn is_cached<T: 'static>(&self) -> bool {
        self.inner
            .registrations
            .get(&ServiceKey::of::<T>())
            .map(|entry| entry.value().instance.get().is_some())
            .unwrap_or(false)
    }

    /// All registered keys with their lifetimes, sorted by key.
    pub fn services(&self) -> Vec<(ServiceKey, ServiceLifetime)> {
        let mut services: Vec<_> = self
            .inner
            .registrations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().lifetime))
            .collect();
        services.sort_by_key(|(key, _)| key.to_string());
        services
    }

    pub fn len(&self) -> usize {
        self.inner.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registrations.is_empty()
    }

    pub fn stats(&self) -> ContainerStats {
        let stats = &self.inner.stats;
        ContainerStats {
            total_resolutions: stats.total_resolutions.load(Ordering::Relaxed),
            cache_hits: stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: stats.cache_misses.load(Ordering::Relaxed),
            constructions: stats.constructions.load(Ordering::Relaxed),
        }
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("registrations", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

fn erase<T, E, F>(provider: F) -> Provider
where
    T: Send + Sync + 'static,
    E: Into<BoxError>,
    F: Fn(&ServiceContainer) -> Result<T, E> + Send + Sync + 'static,
{
    Box::new(move |container| {
        provider(container)
            .map(|service| Arc::new(service) as Instance)
            .map_err(Into::into)
    })
}

fn fatal(err: ContainerError) -> ! {
    error!(error = %err, "unrecoverable wiring error");
    panic!("{}", err)
}

/// Container statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerStats {
    pub total_resolutions: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Provider invocations, successful or not
    pub constructions: usize,
}

impl ContainerStats {
    pub fn total(&self) -> usize {
        self.total_resolutions
    }

    /// Share of singleton lookups served from cache
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[derive(Debug)]
    struct TestService {
        id: usize,
    }

    #[derive(Debug)]
    struct Upstream;

    #[derive(Debug)]
    struct Downstream {
        _upstream: Arc<Upstream>,
    }

    #[test]
    fn singleton_is_built_once() {
        let container = ServiceContainer::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        container.singleton(move |_| TestService {
            id: counter_clone.fetch_add(1, Ordering::SeqCst),
        });

        let first = container.resolve::<TestService>();
        let second = container.resolve::<TestService>();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(container.is_cached::<TestService>());
    }

    #[test]
    fn transient_is_never_cached() {
        let container = ServiceContainer::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        container.transient(move |_| TestService {
            id: counter_clone.fetch_add(1, Ordering::SeqCst),
        });

        let first = container.resolve::<TestService>();
        let second = container.resolve::<TestService>();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!((first.id, second.id), (0, 1));
        assert!(!container.is_cached::<TestService>());
    }

    #[test]
    fn missing_service_lists_registrations() {
        let container = ServiceContainer::new();
        container.singleton(|_| Upstream);

        let err = container.try_resolve::<TestService>().unwrap_err();
        match &err {
            ContainerError::ServiceNotRegistered { service, available } => {
                assert!(service.ends_with("TestService"));
                assert_eq!(available.len(), 1);
                assert!(available[0].ends_with("Upstream"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("Upstream"));
    }

    #[test]
    #[should_panic(expected = "Service not registered")]
    fn resolve_panics_when_missing() {
        let container = ServiceContainer::new();
        let _ = container.resolve::<TestService>();
    }

    #[test]
    fn failed_singleton_is_retried() {
        let container = ServiceContainer::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        container.register(ServiceLifetime::Singleton, move |_| {
            let attempt = attempts_clone.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                Err("database offline")
            } else {
                Ok(TestService { id: attempt })
            }
        });

        let err = container.try_resolve::<TestService>().unwrap_err();
        assert!(matches!(err, ContainerError::CreationFailed { .. }));
        assert!(!container.is_cached::<TestService>());

        let service = container.try_resolve::<TestService>().unwrap();
        assert_eq!(service.id, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_provider_does_not_poison_cache() {
        let container = ServiceContainer::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        container.singleton(move |_| {
            if attempts_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first construction blows up");
            }
            TestService { id: 7 }
        });

        let outcome = catch_unwind(AssertUnwindSafe(|| container.resolve::<TestService>()));
        assert!(outcome.is_err());

        assert_eq!(container.resolve::<TestService>().id, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dependencies_bind_lazily() {
        let container = ServiceContainer::new();
        // Downstream is registered before the service it depends on.
        container.singleton(|c| Downstream {
            _upstream: c.resolve::<Upstream>(),
        });
        container.singleton(|_| Upstream);

        let downstream = container.resolve::<Downstream>();
        assert!(Arc::ptr_eq(&downstream._upstream, &container.resolve::<Upstream>()));
    }

    #[test]
    fn circular_dependency_is_reported() {
        #[derive(Debug)]
        struct Left;
        struct Right;

        let container = ServiceContainer::new();
        container.register(ServiceLifetime::Singleton, |c: &ServiceContainer| {
            c.try_resolve::<Right>().map(|_| Left)
        });
        container.register(ServiceLifetime::Singleton, |c: &ServiceContainer| {
            c.try_resolve::<Left>().map(|_| Right)
        });

        let err = container.try_resolve::<Left>().unwrap_err();
        let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(&err);
        let mut found = false;
        while let Some(current) = cause {
            if let Some(ContainerError::CircularDependency { chain }) =
                current.downcast_ref::<ContainerError>()
            {
                assert_eq!(chain.len(), 3);
                assert!(chain[0].ends_with("Left"));
                assert!(chain[2].ends_with("Left"));
                found = true;
            }
            cause = current.source();
        }
        assert!(found, "no circular dependency in chain: {err}");
        assert!(!container.is_cached::<Left>());
    }

    #[test]
    fn wait_for_graph_reports_cross_thread_cycles() {
        let me = thread::current().id();
        let other = thread::spawn(|| thread::current().id()).join().unwrap();
        let upstream = ServiceKey::of::<Upstream>();
        let downstream = ServiceKey::of::<Downstream>();

        let mut state = ConstructionState::default();
        state.owners.insert(upstream.clone(), me);
        state.owners.insert(downstream.clone(), other);
        assert!(state.cycle_through(me, &downstream).is_none());

        state.waiting.insert(other, upstream.clone());
        let chain = state.cycle_through(me, &downstream).unwrap();
        assert_eq!(chain.len(), 3);
        assert!(chain[0].ends_with("Upstream"));
        assert!(chain[1].ends_with("Downstream"));
        assert!(chain[2].ends_with("Upstream"));

        // Unowned keys never block.
        assert!(state.cycle_through(me, &ServiceKey::of::<TestService>()).is_none());
    }

    #[test]
    fn named_registrations_are_independent() {
        let container = ServiceContainer::new();
        container.provide_named("primary", ServiceLifetime::Singleton, |_| TestService { id: 1 });
        container.provide_named("replica", ServiceLifetime::Singleton, |_| TestService { id: 2 });

        assert_eq!(container.resolve_named::<TestService>("primary").id, 1);
        assert_eq!(container.resolve_named::<TestService>("replica").id, 2);
        assert!(!container.is_registered::<TestService>());
        assert!(container.is_registered_named::<TestService>("replica"));
    }

    #[test]
    fn provided_instance_is_returned_as_is() {
        let container = ServiceContainer::new();
        container.provide_instance(TestService { id: 99 });

        assert!(container.is_cached::<TestService>());
        let first = container.resolve::<TestService>();
        let second = container.resolve::<TestService>();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(container.stats().constructions, 0);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let container = ServiceContainer::new();
        container.singleton(|_| TestService { id: 42 });

        for _ in 0..10 {
            let _ = container.resolve::<TestService>();
        }

        let stats = container.stats();
        assert_eq!(stats.total(), 10);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 9);
        assert_eq!(stats.constructions, 1);
        assert!(stats.hit_rate() > 0.8);
    }
}
