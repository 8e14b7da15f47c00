//! The [Container] is the entry point for registering types and resolving object graphs.
//!
//! Containers form a hierarchy: a child container sees all registrations of its ancestors, but its
//! own registrations are invisible to them. Each container owns a
//! [LifetimeContainer](crate::lifetime::LifetimeContainer) which disposes owned instances and
//! child containers when the container is disposed.

use crate::build_key::{BuildKey, GenericDefinition, Injectable, TypeInfo};
use crate::context::{
    BuildMode, BuilderContext, Existing, PartialInstance, ResolutionScope, ResolutionState,
};
use crate::descriptor::Buildable;
use crate::error::{BuildError, DisposeError, RegistrationError, ResolutionFailedError};
use crate::extension::{ContainerExtension, DefaultStrategies, ExtensionContext};
use crate::injection::{
    FactoryContext, FactoryPolicy, InjectionFactory, InjectionMember, InjectionMemberPtr,
    InjectionPolicies, ResolverOverridePtr,
};
use crate::instance::{
    alias_cast, identity_cast, unwrap_cast, CastFrom, Disposable, ErrorPtr, Instance,
    InstancePtr, Value,
};
use crate::lifetime::{
    ContainerControlledLifetimeManager, LifetimeContainer, LifetimeFactoryPolicy, LifetimeManager,
    LifetimeManagerPtr, TransientLifetimeManager,
};
use crate::mapping::{BuildKeyMapping, BuildKeyMappingPolicy, GenericTypeBuildKeyMapping};
use crate::policy::PolicyList;
use crate::registry::{NamedTypeRegistry, TypeCatalog};
use crate::strategy::StagedStrategyChain;
use crate::trace::BuildTrace;
use std::any::{type_name, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 512;

#[derive(Clone, Debug)]
pub struct ContainerOptions {
    /// Maximum depth of nested dependency resolution, after which resolution fails.
    pub max_resolution_depth: usize,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            max_resolution_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
        }
    }
}

pub(crate) struct ContainerInner {
    parent: Option<Weak<ContainerInner>>,
    pub(crate) policies: Arc<PolicyList>,
    pub(crate) strategies: Arc<StagedStrategyChain>,
    pub(crate) lifetime: Arc<LifetimeContainer>,
    pub(crate) named_types: Arc<NamedTypeRegistry>,
    pub(crate) catalog: Arc<TypeCatalog>,
    pub(crate) options: ContainerOptions,
    disposed: AtomicBool,
}

impl ContainerInner {
    fn dispose_lifetime(&self) -> Result<(), DisposeError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!("Disposing container.");
        self.lifetime.dispose()
    }
}

impl Disposable for ContainerInner {
    fn dispose(&self) -> Result<(), ErrorPtr> {
        self.dispose_lifetime()
            .map_err(|error| Arc::new(error) as ErrorPtr)
    }
}

/// Customization of a single registration.
#[derive(Clone, Default)]
pub struct RegistrationOptions {
    name: Option<String>,
    lifetime: Option<LifetimeManagerPtr>,
    members: Vec<InjectionMemberPtr>,
}

impl RegistrationOptions {
    /// Options of the default (unnamed) registration with transient lifetime.
    pub fn new() -> Self {
        Default::default()
    }

    pub fn named<N: ToString>(name: N) -> Self {
        Self::new().with_name(name)
    }

    pub fn with_name<N: ToString>(mut self, name: N) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_lifetime<L: LifetimeManager + 'static>(self, lifetime: L) -> Self {
        self.with_lifetime_manager(Arc::new(lifetime))
    }

    /// Uses the given manager, which must not be used by any other registration.
    pub fn with_lifetime_manager(mut self, lifetime: LifetimeManagerPtr) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn with_member<M: InjectionMember + 'static>(mut self, member: M) -> Self {
        self.members.push(Arc::new(member));
        self
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Builder for root [Container]s.
#[derive(Default)]
pub struct ContainerBuilder {
    options: ContainerOptions,
    extensions: Vec<Box<dyn ContainerExtension>>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_options(mut self, options: ContainerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_resolution_depth(mut self, max_resolution_depth: usize) -> Self {
        self.options.max_resolution_depth = max_resolution_depth;
        self
    }

    /// Adds an extension initialized after the default strategies.
    pub fn with_extension<E: ContainerExtension + 'static>(mut self, extension: E) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    pub fn build(self) -> Container {
        let container = Container::with_options(self.options);
        for extension in &self.extensions {
            container.add_extension_ref(extension.as_ref());
        }

        container
    }
}

/// Dependency injection container. Cloning a container creates a new handle to the same
/// container, not a child.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    /// Creates a root container with default options.
    pub fn new() -> Self {
        Self::with_options(Default::default())
    }

    pub fn with_options(options: ContainerOptions) -> Self {
        let container = Self {
            inner: Arc::new(ContainerInner {
                parent: None,
                policies: Arc::new(PolicyList::new()),
                strategies: Arc::new(StagedStrategyChain::new()),
                lifetime: Default::default(),
                named_types: Default::default(),
                catalog: Default::default(),
                options,
                disposed: AtomicBool::new(false),
            }),
        };

        container.add_extension(DefaultStrategies);
        debug!(options = ?container.inner.options, "Created container.");
        container
    }

    #[inline]
    pub(crate) fn inner(&self) -> &ContainerInner {
        &self.inner
    }

    pub(crate) fn check_disposed(&self) -> Result<(), RegistrationError> {
        if self.is_disposed() {
            Err(RegistrationError::ContainerDisposed)
        } else {
            Ok(())
        }
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn options(&self) -> &ContainerOptions {
        &self.inner.options
    }

    /// Returns the parent container, unless this is a root container or the parent was dropped.
    pub fn parent(&self) -> Option<Container> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Container { inner })
    }

    /// Creates a child container, which sees all registrations of this container and is disposed
    /// together with it.
    pub fn create_child_container(&self) -> Container {
        let inner = Arc::new(ContainerInner {
            parent: Some(Arc::downgrade(&self.inner)),
            policies: Arc::new(PolicyList::with_parent(self.inner.policies.clone())),
            strategies: Arc::new(StagedStrategyChain::with_parent(
                self.inner.strategies.clone(),
            )),
            lifetime: Default::default(),
            named_types: Arc::new(NamedTypeRegistry::with_parent(
                self.inner.named_types.clone(),
            )),
            catalog: self.inner.catalog.clone(),
            options: self.inner.options.clone(),
            disposed: AtomicBool::new(false),
        });

        self.inner.lifetime.add(inner.clone());
        debug!("Created child container.");

        Container { inner }
    }

    /// Runs the given extension against this container. Strategies added by the extension are
    /// also visible to child containers.
    pub fn add_extension<E: ContainerExtension>(&self, extension: E) {
        self.add_extension_ref(&extension);
    }

    fn add_extension_ref(&self, extension: &dyn ContainerExtension) {
        extension.initialize(&mut ExtensionContext::new(
            &self.inner.strategies,
            &self.inner.policies,
            &self.inner.lifetime,
        ));
        self.inner.catalog.bump();
    }

    /// Registers a mapping from the service type to the implementation type, both given as type
    /// information. The implementation needs a build plan in the catalog, unless built by a
    /// factory member. Prefer the typed registration methods, which add the required build plans
    /// and casts.
    pub fn register(
        &self,
        service: TypeInfo,
        implementation: Option<TypeInfo>,
        options: RegistrationOptions,
    ) -> Result<(), RegistrationError> {
        self.check_disposed()?;

        let implementation = implementation.ok_or_else(|| RegistrationError::MissingImplementation {
            service: service.name().to_string(),
        })?;

        let service_key = BuildKey::new(service, options.name.clone());
        let implementation_key = service_key.with_type(implementation);
        let lifetime = acquire_lifetime(&options, &implementation_key, || {
            Arc::new(TransientLifetimeManager::default())
        })?;

        let policies = &self.inner.policies;
        if service_key == implementation_key {
            policies.clear::<dyn BuildKeyMappingPolicy>(&service_key);
        } else {
            policies.set::<dyn BuildKeyMappingPolicy>(
                service_key.clone(),
                Arc::new(BuildKeyMapping::new(implementation_key.clone())),
            );
        }

        self.set_lifetime(&implementation_key, lifetime);
        self.complete_registration(&service_key, &implementation_key, &options);
        Ok(())
    }

    /// Registers `C` as the implementation of `S`.
    pub fn register_type<S, C>(&self, options: RegistrationOptions) -> Result<(), RegistrationError>
    where
        S: CastFrom<C> + ?Sized,
        C: Buildable,
    {
        self.add_cast::<S, C>();
        self.inner.catalog.add_buildable::<C>();
        self.register(S::type_info(), Some(C::type_info()), options)
    }

    /// Registers `C` as its own implementation.
    pub fn register_self<C: Buildable>(
        &self,
        options: RegistrationOptions,
    ) -> Result<(), RegistrationError> {
        self.inner.catalog.add_buildable::<C>();
        self.register(C::type_info(), Some(C::type_info()), options)
    }

    /// Registers a factory function building `S`. Instances created by the factory are not
    /// disposed by the container; use an [InjectionFactory] member with
    /// [FactoryPolicy::disposable] for that.
    pub fn register_factory<S, F>(
        &self,
        options: RegistrationOptions,
        factory: F,
    ) -> Result<(), RegistrationError>
    where
        S: Injectable + ?Sized,
        F: Fn(&mut FactoryContext<'_, '_>) -> Result<InstancePtr<S>, ErrorPtr>
            + Send
            + Sync
            + 'static,
    {
        self.inner.catalog.add_cast(
            S::type_info().key(),
            TypeId::of::<InstancePtr<S>>(),
            unwrap_cast::<S>,
        );
        self.register(
            S::type_info(),
            Some(S::type_info()),
            options.with_member(InjectionFactory::from_policy(FactoryPolicy::shared(factory))),
        )
    }

    /// Registers an existing instance. Unless given otherwise, the instance is held by a
    /// [ContainerControlledLifetimeManager], but never disposed, since it is shared by the caller.
    /// With an [ExternallyControlledLifetimeManager](crate::lifetime::ExternallyControlledLifetimeManager),
    /// the registration lasts as long as the caller holds the instance.
    pub fn register_instance<S: Injectable + ?Sized>(
        &self,
        instance: InstancePtr<S>,
        options: RegistrationOptions,
    ) -> Result<(), RegistrationError> {
        self.inner.catalog.add_cast(
            S::type_info().key(),
            TypeId::of::<InstancePtr<S>>(),
            unwrap_cast::<S>,
        );
        self.register_instance_value::<S>(Instance::shared(instance), options)
    }

    /// Registers an existing instance, which is disposed along with its lifetime manager.
    pub fn register_disposable_instance<C: Injectable + Disposable>(
        &self,
        instance: InstancePtr<C>,
        options: RegistrationOptions,
    ) -> Result<(), RegistrationError> {
        self.add_identity_cast::<C>();
        self.register_instance_value::<C>(Instance::disposable(instance), options)
    }

    fn register_instance_value<S: Injectable + ?Sized>(
        &self,
        instance: Instance,
        options: RegistrationOptions,
    ) -> Result<(), RegistrationError> {
        self.check_disposed()?;

        let key = BuildKey::new(S::type_info(), options.name.clone());
        let lifetime = acquire_lifetime(&options, &key, || {
            Arc::new(ContainerControlledLifetimeManager::default())
        })?;
        lifetime.set_value(instance);

        self.inner.policies.clear::<dyn BuildKeyMappingPolicy>(&key);
        self.set_lifetime(&key, lifetime);
        self.complete_registration(&key, &key, &options);
        Ok(())
    }

    /// Registers a mapping between generic definitions, e.g. `Repository<T>` to
    /// `SqlRepository<T>`. Closed implementation types need to be added with
    /// [register_closed_generic](Self::register_closed_generic) to be buildable.
    pub fn register_open_generic(
        &self,
        service: &'static GenericDefinition,
        implementation: &'static GenericDefinition,
        options: RegistrationOptions,
    ) -> Result<(), RegistrationError> {
        self.check_disposed()?;

        if service.arity() != implementation.arity() {
            return Err(RegistrationError::GenericArityMismatch {
                service: service.name().to_string(),
                service_arity: service.arity(),
                implementation: implementation.name().to_string(),
                implementation_arity: implementation.arity(),
            });
        }

        let service_key = BuildKey::new(TypeInfo::open(service), options.name.clone());
        let implementation_key = service_key.with_type(TypeInfo::open(implementation));
        let prototype = acquire_lifetime(&options, &implementation_key, || {
            Arc::new(TransientLifetimeManager::default())
        })?;

        let policies = &self.inner.policies;
        if service_key == implementation_key {
            policies.clear::<dyn BuildKeyMappingPolicy>(&service_key);
        } else {
            policies.set::<dyn BuildKeyMappingPolicy>(
                service_key.clone(),
                Arc::new(GenericTypeBuildKeyMapping::new(
                    implementation,
                    options.name.clone(),
                )),
            );
        }

        policies.clear::<dyn LifetimeManager>(&implementation_key);
        policies.set(
            implementation_key.clone(),
            Arc::new(LifetimeFactoryPolicy::new(
                prototype,
                policies,
                &self.inner.lifetime,
            )),
        );

        self.complete_registration(&service_key, &implementation_key, &options);
        Ok(())
    }

    /// Makes the closed generic type `C` known as a closure of its definition, usable as `S`.
    pub fn register_closed_generic<S, C>(&self) -> Result<(), RegistrationError>
    where
        S: CastFrom<C> + ?Sized,
        C: Buildable,
    {
        self.check_disposed()?;

        self.add_cast::<S, C>();
        self.inner.catalog.add_buildable::<C>();
        self.inner.catalog.add_closed_generic(C::type_info());
        Ok(())
    }

    fn add_cast<S: CastFrom<C> + ?Sized, C: Injectable>(&self) {
        self.inner.catalog.add_cast(
            S::type_info().key(),
            TypeId::of::<C>(),
            alias_cast::<S, C>,
        );
    }

    fn add_identity_cast<C: Injectable>(&self) {
        self.inner.catalog.add_cast(
            C::type_info().key(),
            TypeId::of::<C>(),
            identity_cast::<C>,
        );
    }

    fn set_lifetime(&self, key: &BuildKey, lifetime: LifetimeManagerPtr) {
        self.inner.policies.clear::<LifetimeFactoryPolicy>(key);
        self.inner
            .policies
            .set::<dyn LifetimeManager>(key.clone(), lifetime.clone());
        self.inner.lifetime.add_manager(lifetime);
    }

    fn complete_registration(
        &self,
        service_key: &BuildKey,
        implementation_key: &BuildKey,
        options: &RegistrationOptions,
    ) {
        let mut injection = InjectionPolicies::default();
        for member in &options.members {
            member.add_policies(&mut injection);
        }

        injection.install(implementation_key, &self.inner.policies);

        self.inner
            .named_types
            .register(service_key.type_key(), options.name.clone());
        self.inner.catalog.bump();

        debug!(service = %service_key, implementation = %implementation_key, "Registered type.");
    }

    /// Checks if a registration for the given type and name exists in this container or any
    /// ancestor.
    pub fn is_registered<T: Injectable + ?Sized>(&self, name: Option<&str>) -> bool {
        self.inner
            .named_types
            .contains(T::type_info().key(), name)
    }

    /// Resolves the default registration of `T`.
    pub fn resolve<T: Injectable + ?Sized>(&self) -> Result<InstancePtr<T>, ResolutionFailedError> {
        self.resolve_with::<T>(None, vec![])
    }

    pub fn resolve_named<T: Injectable + ?Sized, N: ToString>(
        &self,
        name: N,
    ) -> Result<InstancePtr<T>, ResolutionFailedError> {
        self.resolve_with::<T>(Some(&name.to_string()), vec![])
    }

    /// Resolves `T` with given resolver overrides, which apply only to this call.
    pub fn resolve_with<T: Injectable + ?Sized>(
        &self,
        name: Option<&str>,
        overrides: Vec<ResolverOverridePtr>,
    ) -> Result<InstancePtr<T>, ResolutionFailedError> {
        let key = BuildKey::new(T::type_info(), name.map(str::to_string));
        let value = self.resolve_key(&key, overrides)?;
        downcast_value::<InstancePtr<T>>(&key, value)
    }

    /// Resolves all named registrations of `T`, including the default one.
    pub fn resolve_all<T: Injectable + ?Sized>(
        &self,
    ) -> Result<Vec<InstancePtr<T>>, ResolutionFailedError> {
        let key = BuildKey::new(TypeInfo::array_of::<T>(), None);
        let value = self.resolve_key(&key, vec![])?;
        downcast_value::<Vec<InstancePtr<T>>>(&key, value)
    }

    /// Resolves the given key, returning the instance converted to the requested type: an
    /// `InstancePtr<T>` for regular types or a `Vec<InstancePtr<T>>` for arrays.
    pub fn resolve_key(
        &self,
        key: &BuildKey,
        overrides: Vec<ResolverOverridePtr>,
    ) -> Result<Value, ResolutionFailedError> {
        let instance = match self.execute(key, BuildMode::Resolve, Existing::None, overrides)? {
            Existing::Built(instance) => instance,
            Existing::Building(partial) => partial.seal(),
            Existing::None => {
                return Err(ResolutionFailedError::new(
                    key,
                    BuildTrace::default(),
                    BuildError::NoBuildPlan {
                        type_name: key.type_info().name().to_string(),
                    },
                ))
            }
        };

        self.inner
            .catalog
            .convert(key.type_info(), &instance)
            .map_err(|error| ResolutionFailedError::new(key, BuildTrace::default(), error))
    }

    /// Injects properties and methods into an existing instance, without constructing it or
    /// storing it in any lifetime manager.
    pub fn build_up<C: Buildable>(
        &self,
        name: Option<&str>,
        existing: C,
        overrides: Vec<ResolverOverridePtr>,
    ) -> Result<C, ResolutionFailedError> {
        self.inner.catalog.add_buildable::<C>();

        let key = BuildKey::new(C::type_info(), name.map(str::to_string));
        let built = self.execute(
            &key,
            BuildMode::BuildUp,
            Existing::Building(PartialInstance::new(existing)),
            overrides,
        )?;

        let incompatible = |actual: &str| {
            ResolutionFailedError::new(
                &key,
                BuildTrace::default(),
                BuildError::IncompatibleInstance {
                    requested: type_name::<C>().to_string(),
                    actual: actual.to_string(),
                },
            )
        };

        match built {
            Existing::Building(partial) => partial
                .into_inner::<C>()
                .map_err(|partial| incompatible(partial.type_name())),
            Existing::Built(instance) => Err(incompatible(instance.type_name())),
            Existing::None => Err(incompatible("nothing")),
        }
    }

    /// Runs tear down strategies for the given instance, removing it from its lifetime manager if
    /// held there.
    pub fn teardown<C: Injectable>(
        &self,
        name: Option<&str>,
        instance: &InstancePtr<C>,
    ) -> Result<(), ResolutionFailedError> {
        let key = BuildKey::new(C::type_info(), name.map(str::to_string));
        self.execute(
            &key,
            BuildMode::TearDown,
            Existing::Built(Instance::new(instance.clone())),
            vec![],
        )
        .map(|_| ())
    }

    fn execute(
        &self,
        key: &BuildKey,
        mode: BuildMode,
        existing: Existing,
        overrides: Vec<ResolverOverridePtr>,
    ) -> Result<Existing, ResolutionFailedError> {
        if self.is_disposed() {
            return Err(ResolutionFailedError::new(
                key,
                BuildTrace::default(),
                BuildError::ContainerDisposed,
            ));
        }

        let scope = ResolutionScope::new(self.inner.clone(), overrides);
        let mut state = ResolutionState::default();
        let mut context = BuilderContext::root(&scope, &mut state, key.clone(), mode, existing);

        let result = context.execute();
        let existing = context.take_existing();
        drop(context);

        match result {
            Ok(()) => Ok(existing),
            Err(error) => {
                debug!(%key, %error, "Resolution failed.");
                Err(ResolutionFailedError::new(key, state.take_failure(), error))
            }
        }
    }

    /// Disposes the container: all owned lifetime managers and child containers are disposed in
    /// reverse order of registration. Further registrations and resolutions fail. Disposing an
    /// already disposed container does nothing.
    pub fn dispose(&self) -> Result<(), DisposeError> {
        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            let entry: Arc<dyn Disposable + Send + Sync> = self.inner.clone();
            parent.lifetime.remove(&entry);
        }

        self.inner.dispose_lifetime()
    }
}

fn acquire_lifetime(
    options: &RegistrationOptions,
    key: &BuildKey,
    default: impl FnOnce() -> LifetimeManagerPtr,
) -> Result<LifetimeManagerPtr, RegistrationError> {
    let lifetime = options.lifetime.clone().unwrap_or_else(default);
    if lifetime.in_use().acquire() {
        Ok(lifetime)
    } else {
        Err(RegistrationError::LifetimeManagerInUse {
            key: key.to_string(),
        })
    }
}

fn downcast_value<V: 'static>(key: &BuildKey, value: Value) -> Result<V, ResolutionFailedError> {
    value.downcast::<V>().map(|value| *value).map_err(|_| {
        ResolutionFailedError::new(
            key,
            BuildTrace::default(),
            BuildError::IncompatibleValue {
                expected: type_name::<V>().to_string(),
                slot: format!("resolution of {key}"),
            },
        )
    })
}
