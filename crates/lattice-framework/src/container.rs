//! Dependency-injection service container.
//!
//! [`ServiceContainer`] resolves typed services by lifetime. Services are
//! registered with factory closures that receive the container and resolve
//! their own dependencies through it — wiring is explicit, with no runtime
//! reflection:
//!
//! ```rust,ignore
//! let container = Arc::new(ServiceContainer::new());
//! container.register_singleton::<Database, _>(|_| Ok(Arc::new(Database::connect()?)));
//! container.register_singleton::<Repository, _>(|c| {
//!     Ok(Arc::new(Repository::new(c.resolve::<Database>()?)))
//! });
//! let repo = container.resolve::<Repository>()?;
//! ```
//!
//! Cycle prevention: each thread tracks the set of types currently being
//! constructed on its call stack. Re-entering a type mid-construction fails
//! immediately with [`ServiceError::CircularDependency`] instead of
//! recursing until the stack overflows.

use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use lattice_core::BoxError;

/// Type-erased service stored in the registry.
///
/// The inner `dyn Any` is an `Arc<T>` for the registered service type `T`;
/// [`ServiceContainer::resolve`] downcasts it back.
pub type ServiceArc = Arc<dyn Any + Send + Sync>;

type ErasedFactory = Arc<dyn Fn(&ServiceContainer) -> ServiceResult<ServiceArc> + Send + Sync>;
type DisposeFn = Arc<dyn Fn(&ServiceArc) + Send + Sync>;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while registering or resolving services.
///
/// Every variant carries the offending service type name. None of these are
/// retried automatically.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The requested type has no registration.
    #[error("service '{type_name}' is not registered")]
    NotRegistered {
        /// The unregistered service type.
        type_name: &'static str,
    },

    /// The requested type is already mid-construction on this call stack.
    #[error("circular dependency detected while resolving '{type_name}'")]
    CircularDependency {
        /// The service type whose construction re-entered itself.
        type_name: &'static str,
    },

    /// A factory failed, or the stored value had an unexpected type.
    #[error("failed to construct service '{type_name}': {cause}")]
    Construction {
        /// The service type that could not be constructed.
        type_name: &'static str,
        /// Rendered underlying cause.
        cause: String,
    },
}

/// Result type for container operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

// =============================================================================
// Descriptors
// =============================================================================

/// How long a container-managed instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLifetime {
    /// One shared instance per container, constructed on first resolve.
    Singleton,
    /// A fresh instance on every resolve.
    Transient,
    /// One instance per [`ScopedContainer`]; fresh when resolved through the
    /// root container.
    Scoped,
}

#[derive(Clone)]
struct ServiceDescriptor {
    type_name: &'static str,
    lifetime: ServiceLifetime,
    factory: ErasedFactory,
    dispose: Option<DisposeFn>,
}

/// Cleanup hook invoked on scoped instances when their scope is disposed.
pub trait Dispose: Send + Sync {
    /// Releases resources held by the instance.
    fn dispose(&self);
}

// =============================================================================
// ServiceContainer
// =============================================================================

/// Dependency-injection registry resolving typed services by lifetime.
///
/// Registration and resolution are serialized through internal locks; the
/// container is shared behind an `Arc` and used concurrently. Trait-object
/// service types (`dyn MyTrait`) are supported alongside concrete types.
pub struct ServiceContainer {
    services: Mutex<HashMap<TypeId, ServiceDescriptor>>,
    singletons: Mutex<HashMap<TypeId, ServiceArc>>,
    /// Types mid-construction, per thread. Guards against factory recursion.
    building: Mutex<HashMap<ThreadId, HashSet<TypeId>>>,
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceContainer {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            singletons: Mutex::new(HashMap::new()),
            building: Mutex::new(HashMap::new()),
        }
    }

    fn register_erased<T, F>(&self, lifetime: ServiceLifetime, factory: F, dispose: Option<DisposeFn>)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        let erased: ErasedFactory = Arc::new(move |container| {
            factory(container)
                .map(|arc| Arc::new(arc) as ServiceArc)
                .map_err(|e| ServiceError::Construction {
                    type_name: type_name::<T>(),
                    cause: e.to_string(),
                })
        });
        let descriptor = ServiceDescriptor {
            type_name: type_name::<T>(),
            lifetime,
            factory: erased,
            dispose,
        };
        if self
            .services
            .lock()
            .insert(TypeId::of::<T>(), descriptor)
            .is_some()
        {
            warn!(
                service = type_name::<T>(),
                "Service re-registered — previous registration replaced"
            );
            // A stale cached singleton must not shadow the new registration.
            self.singletons.lock().remove(&TypeId::of::<T>());
        }
        debug!(service = type_name::<T>(), lifetime = ?lifetime, "Service registered");
    }

    /// Registers a singleton: constructed on first resolve, cached, shared.
    pub fn register_singleton<T, F>(&self, factory: F) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        self.register_erased::<T, F>(ServiceLifetime::Singleton, factory, None);
        self
    }

    /// Registers a transient service: constructed fresh on every resolve.
    pub fn register_transient<T, F>(&self, factory: F) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        self.register_erased::<T, F>(ServiceLifetime::Transient, factory, None);
        self
    }

    /// Registers a scoped service: one instance per [`ScopedContainer`].
    pub fn register_scoped<T, F>(&self, factory: F) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceContainer) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        self.register_erased::<T, F>(ServiceLifetime::Scoped, factory, None);
        self
    }

    /// Registers a scoped service whose instances are [`Dispose`]d when the
    /// owning scope is disposed.
    pub fn register_scoped_disposable<T, F>(&self, factory: F) -> &Self
    where
        T: ?Sized + Dispose + 'static,
        F: Fn(&ServiceContainer) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        let dispose: DisposeFn = Arc::new(|stored: &ServiceArc| {
            if let Some(instance) = stored.downcast_ref::<Arc<T>>() {
                instance.dispose();
            }
        });
        self.register_erased::<T, F>(ServiceLifetime::Scoped, factory, Some(dispose));
        self
    }

    /// Registers an existing instance as a singleton.
    pub fn register_instance<T>(&self, instance: Arc<T>) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.singletons
            .lock()
            .insert(TypeId::of::<T>(), Arc::new(instance.clone()) as ServiceArc);
        self.register_erased::<T, _>(ServiceLifetime::Singleton, move |_| Ok(instance.clone()), None);
        self
    }

    /// Registers a transient factory invoked directly, with no access to the
    /// container — the factory receives no injected dependencies.
    pub fn register_factory<T, F>(&self, factory: F) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        self.register_erased::<T, _>(ServiceLifetime::Transient, move |_| factory(), None);
        self
    }

    /// Resolves a service instance.
    ///
    /// Singletons are cached after first construction; transient and scoped
    /// registrations construct fresh (scoped caching only happens inside a
    /// [`ScopedContainer`]).
    pub fn resolve<T>(&self) -> ServiceResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let _guard = BuildGuard::enter(self, TypeId::of::<T>(), type_name::<T>())?;
        let stored = self.resolve_stored(TypeId::of::<T>(), type_name::<T>())?;
        downcast::<T>(stored)
    }

    fn resolve_stored(&self, type_id: TypeId, name: &'static str) -> ServiceResult<ServiceArc> {
        let descriptor = self
            .services
            .lock()
            .get(&type_id)
            .cloned()
            .ok_or(ServiceError::NotRegistered { type_name: name })?;

        match descriptor.lifetime {
            ServiceLifetime::Singleton => {
                if let Some(existing) = self.singletons.lock().get(&type_id) {
                    return Ok(existing.clone());
                }
                // Construct outside the cache lock: the factory may resolve
                // other singletons through this container.
                let instance = (descriptor.factory)(self)?;
                self.singletons.lock().insert(type_id, instance.clone());
                Ok(instance)
            }
            ServiceLifetime::Transient | ServiceLifetime::Scoped => (descriptor.factory)(self),
        }
    }

    /// Whether a registration exists for `T`.
    pub fn is_registered<T>(&self) -> bool
    where
        T: ?Sized + 'static,
    {
        self.services.lock().contains_key(&TypeId::of::<T>())
    }

    /// Creates a scope that caches scoped-lifetime services locally.
    pub fn create_scope(self: &Arc<Self>) -> ScopedContainer {
        ScopedContainer {
            parent: Arc::clone(self),
            scoped: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Removes every registration, cached singleton, and in-flight
    /// construction marker.
    pub fn clear(&self) {
        self.services.lock().clear();
        self.singletons.lock().clear();
        self.building.lock().clear();
        info!("Service container cleared");
    }
}

fn downcast<T>(stored: ServiceArc) -> ServiceResult<Arc<T>>
where
    T: ?Sized + 'static,
{
    stored
        .downcast_ref::<Arc<T>>()
        .cloned()
        .ok_or(ServiceError::Construction {
            type_name: type_name::<T>(),
            cause: "stored service has an unexpected type".to_string(),
        })
}

/// Marks a type as mid-construction on the current thread for the duration
/// of a resolve call.
struct BuildGuard<'a> {
    container: &'a ServiceContainer,
    thread: ThreadId,
    type_id: TypeId,
}

impl<'a> BuildGuard<'a> {
    fn enter(
        container: &'a ServiceContainer,
        type_id: TypeId,
        name: &'static str,
    ) -> ServiceResult<Self> {
        let thread = thread::current().id();
        let mut building = container.building.lock();
        let stack = building.entry(thread).or_default();
        if !stack.insert(type_id) {
            return Err(ServiceError::CircularDependency { type_name: name });
        }
        Ok(Self {
            container,
            thread,
            type_id,
        })
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        let mut building = self.container.building.lock();
        if let Some(stack) = building.get_mut(&self.thread) {
            stack.remove(&self.type_id);
            if stack.is_empty() {
                building.remove(&self.thread);
            }
        }
    }
}

// =============================================================================
// ScopedContainer
// =============================================================================

/// Caches scoped-lifetime services for one logical operation.
///
/// Singleton and transient resolution is delegated to the parent container;
/// only scoped registrations are cached locally. Disposing the scope runs
/// the [`Dispose`] hook registered for each scoped instance it created, in
/// creation order.
pub struct ScopedContainer {
    parent: Arc<ServiceContainer>,
    scoped: Mutex<HashMap<TypeId, ServiceArc>>,
    created: Mutex<Vec<(ServiceArc, Option<DisposeFn>)>>,
}

impl ScopedContainer {
    /// Resolves a service within this scope.
    pub fn resolve<T>(&self) -> ServiceResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        let descriptor = self.parent.services.lock().get(&type_id).cloned();

        match descriptor {
            Some(d) if d.lifetime == ServiceLifetime::Scoped => {
                if let Some(existing) = self.scoped.lock().get(&type_id) {
                    return downcast::<T>(existing.clone());
                }
                let _guard = BuildGuard::enter(&self.parent, type_id, type_name::<T>())?;
                let instance = (d.factory)(&self.parent)?;
                self.scoped.lock().insert(type_id, instance.clone());
                self.created.lock().push((instance.clone(), d.dispose));
                downcast::<T>(instance)
            }
            _ => self.parent.resolve::<T>(),
        }
    }

    /// Disposes every scoped instance created by this scope and clears the
    /// local cache. Safe to call more than once.
    pub fn dispose(&self) {
        let created = std::mem::take(&mut *self.created.lock());
        for (instance, hook) in created {
            if let Some(hook) = hook {
                hook(&instance);
            }
        }
        self.scoped.lock().clear();
    }
}

impl Drop for ScopedContainer {
    fn drop(&mut self) {
        self.dispose();
    }
}

// =============================================================================
// Tests
// =============================================================================
