//! Per-build state threaded through the [strategy chain](crate::strategy).
//!
//! A [BuilderContext] is created for every top-level request and for every dependency resolved
//! while building it. Contexts of one request share a [ResolutionScope] (container, strategy
//! chain snapshot, overrides and per-resolve policies) and a single frame stack used for failure
//! reporting, while each gets its own transient policy layer and recovery stack.

use crate::build_key::{BuildKey, Injectable, TypeInfo};
use crate::container::ContainerInner;
use crate::error::BuildError;
use crate::injection::{OverrideTarget, ResolverOverridePtr};
use crate::instance::{DisposeFunction, ErrorPtr, Instance, Value};
use crate::lifetime::{LifetimeContainer, LifetimeGuard};
use crate::plan::BuildPlan;
use crate::policy::PolicyList;
use crate::registry::{NamedTypeRegistry, TypeCatalog};
use crate::resolution::{DependencyResolverPtr, InjectionValue};
use crate::strategy::StrategyChain;
use crate::trace::{BuildFrame, BuildTrace, Operation};
use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum BuildMode {
    /// Build a new instance or reuse an existing one, according to its lifetime.
    Resolve,
    /// Inject properties and methods into an existing, not yet shared instance.
    BuildUp,
    /// Tear down an existing instance.
    TearDown,
}

/// An instance which is still being built and can be mutated, e.g. by property injection.
pub struct PartialInstance {
    value: Box<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
    dispose: Option<DisposeFunction>,
}

impl PartialInstance {
    pub fn new<C: Injectable>(value: C) -> Self {
        Self::from_parts(Box::new(value), TypeId::of::<C>(), type_name::<C>(), None)
    }

    pub fn from_parts(
        value: Box<dyn Any + Send + Sync>,
        type_id: TypeId,
        type_name: &'static str,
        dispose: Option<DisposeFunction>,
    ) -> Self {
        Self {
            value,
            type_id,
            type_name,
            dispose,
        }
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[inline]
    pub fn value_mut(&mut self) -> &mut (dyn Any + Send + Sync) {
        self.value.as_mut()
    }

    /// Finishes building, making the instance shareable.
    pub fn seal(self) -> Instance {
        Instance::from_parts(
            Arc::from(self.value),
            self.type_id,
            self.type_name,
            self.dispose,
        )
    }

    pub fn into_inner<C: Injectable>(self) -> Result<C, Self> {
        let Self {
            value,
            type_id,
            type_name,
            dispose,
        } = self;

        value
            .downcast::<C>()
            .map(|value| *value)
            .map_err(|value| Self::from_parts(value, type_id, type_name, dispose))
    }
}

/// The object being built.
#[derive(Default)]
pub enum Existing {
    #[default]
    None,
    Building(PartialInstance),
    Built(Instance),
}

impl Existing {
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Existing::None)
    }
}

/// Rollback action executed when a build fails.
pub trait RequiresRecovery {
    fn recover(&mut self);
}

#[derive(Default)]
pub struct RecoveryStack {
    items: Vec<Box<dyn RequiresRecovery>>,
}

impl RecoveryStack {
    pub fn add(&mut self, item: Box<dyn RequiresRecovery>) {
        self.items.push(item);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Runs all recovery actions, most recent first.
    pub fn execute_recovery(&mut self) {
        while let Some(mut item) = self.items.pop() {
            item.recover();
        }
    }
}

type SharedLifetimeLock = Rc<RefCell<Option<LifetimeGuard>>>;

struct LifetimeLockRecovery(SharedLifetimeLock);

impl RequiresRecovery for LifetimeLockRecovery {
    fn recover(&mut self) {
        self.0.borrow_mut().take();
    }
}

/// State shared by all contexts of a single request.
pub struct ResolutionScope {
    container: Arc<ContainerInner>,
    chain: StrategyChain,
    overrides: Vec<ResolverOverridePtr>,
    resolve_policies: Arc<PolicyList>,
}

impl ResolutionScope {
    pub(crate) fn new(container: Arc<ContainerInner>, overrides: Vec<ResolverOverridePtr>) -> Self {
        Self {
            chain: container.strategies.make_strategy_chain(),
            resolve_policies: Arc::new(PolicyList::with_parent(container.policies.clone())),
            container,
            overrides,
        }
    }
}

#[derive(Default)]
pub(crate) struct ResolutionState {
    frames: Vec<BuildFrame>,
    in_progress: Vec<BuildKey>,
    failure: Option<BuildTrace>,
    detached: Option<(ErrorPtr, BuildTrace)>,
}

impl ResolutionState {
    pub(crate) fn take_failure(&mut self) -> BuildTrace {
        self.failure.take().unwrap_or_default()
    }
}

pub struct BuilderContext<'a> {
    scope: &'a ResolutionScope,
    state: &'a mut ResolutionState,
    build_key: BuildKey,
    original_build_key: BuildKey,
    mode: BuildMode,
    existing: Existing,
    build_complete: bool,
    policies: Arc<PolicyList>,
    recovery: RecoveryStack,
    lifetime_lock: SharedLifetimeLock,
    depth: usize,
    frame: usize,
}

impl<'a> BuilderContext<'a> {
    pub(crate) fn root(
        scope: &'a ResolutionScope,
        state: &'a mut ResolutionState,
        build_key: BuildKey,
        mode: BuildMode,
        existing: Existing,
    ) -> Self {
        Self {
            policies: Arc::new(PolicyList::with_parent(scope.resolve_policies.clone())),
            scope,
            state,
            original_build_key: build_key.clone(),
            build_key,
            mode,
            existing,
            build_complete: false,
            recovery: Default::default(),
            lifetime_lock: Default::default(),
            depth: 0,
            frame: 0,
        }
    }

    /// Runs the strategy chain for this context. On failure, the frame stack is captured (unless
    /// an inner context already did so, or the failure was handed out and came back) and the
    /// recovery stack is unwound.
    pub(crate) fn execute(&mut self) -> Result<(), BuildError> {
        self.state
            .frames
            .push(BuildFrame::new(self.build_key.clone()));
        self.frame = self.state.frames.len() - 1;
        let in_progress = self.state.in_progress.len();

        let result = self.run();
        if let Err(error) = &result {
            if self.state.failure.is_none() {
                let trace = self
                    .reattached_failure(error)
                    .unwrap_or_else(|| BuildTrace::new(self.state.frames.clone()));
                self.state.failure = Some(trace);
            }

            self.recovery.execute_recovery();
        }

        self.state.in_progress.truncate(in_progress);
        self.state.frames.truncate(self.frame);
        result
    }

    fn run(&mut self) -> Result<(), BuildError> {
        let max_depth = self.scope.container.options.max_resolution_depth;
        if self.depth > max_depth {
            return Err(BuildError::DepthExceeded { depth: max_depth });
        }

        self.enter(self.build_key.clone())?;

        let scope = self.scope;
        match self.mode {
            BuildMode::TearDown => scope.chain.execute_tear_down(self),
            _ => scope.chain.execute_build_up(self),
        }
    }

    fn enter(&mut self, key: BuildKey) -> Result<(), BuildError> {
        if self.state.in_progress.contains(&key) {
            return Err(BuildError::DependencyCycle {
                key: key.to_string(),
            });
        }

        self.state.in_progress.push(key);
        Ok(())
    }

    fn child(&mut self, build_key: BuildKey) -> BuilderContext<'_> {
        BuilderContext {
            scope: self.scope,
            state: &mut *self.state,
            original_build_key: build_key.clone(),
            build_key,
            mode: BuildMode::Resolve,
            existing: Existing::None,
            build_complete: false,
            policies: Arc::new(PolicyList::with_parent(self.policies.clone())),
            recovery: Default::default(),
            lifetime_lock: Default::default(),
            depth: self.depth + 1,
            frame: 0,
        }
    }

    /// Builds a dependency in a child context.
    pub fn resolve_key(&mut self, build_key: BuildKey) -> Result<Instance, BuildError> {
        let mut child = self.child(build_key);
        child.execute()?;
        child.take_instance()
    }

    /// Produces a value for a single dependency slot, using a matching override if one was
    /// supplied to the current request.
    pub fn resolve_dependency(&mut self, value: &InjectionValue) -> Result<Value, BuildError> {
        let resolver = self
            .overridden_resolver(value.dependency_type())
            .unwrap_or_else(|| value.resolver().clone());
        resolver.resolve(self)
    }

    /// Finds an override for a dependency of the given type in the current operation.
    pub fn overridden_resolver(&self, dependency_type: &TypeInfo) -> Option<DependencyResolverPtr> {
        let target = OverrideTarget {
            operation: self.current_operation(),
            build_key: &self.build_key,
            dependency_type,
        };

        self.scope
            .overrides
            .iter()
            .rev()
            .find_map(|resolver_override| resolver_override.resolver(&target))
    }

    /// Takes the built instance, sealing it if needed.
    pub(crate) fn take_instance(&mut self) -> Result<Instance, BuildError> {
        match std::mem::take(&mut self.existing) {
            Existing::Built(instance) => Ok(instance),
            Existing::Building(partial) => Ok(partial.seal()),
            Existing::None => Err(BuildError::NoBuildPlan {
                type_name: self.build_key.type_info().name().to_string(),
            }),
        }
    }

    pub(crate) fn take_existing(&mut self) -> Existing {
        std::mem::take(&mut self.existing)
    }

    /// Seals an instance under construction and returns the built instance, if any.
    pub fn seal_existing(&mut self) -> Option<Instance> {
        if let Existing::Building(_) = &self.existing {
            if let Existing::Building(partial) = std::mem::take(&mut self.existing) {
                self.existing = Existing::Built(partial.seal());
            }
        }

        match &self.existing {
            Existing::Built(instance) => Some(instance.clone()),
            _ => None,
        }
    }

    /// Rewrites the key being built. The new key takes part in cycle detection.
    pub fn map_build_key(&mut self, build_key: BuildKey) -> Result<(), BuildError> {
        if build_key != self.build_key {
            self.enter(build_key.clone())?;
        }

        if let Some(frame) = self.state.frames.get_mut(self.frame) {
            frame.mapped = Some(build_key.clone());
        }

        self.build_key = build_key;
        Ok(())
    }

    /// Returns the build plan for the current key, compiling it if needed. Plans are cached in
    /// the container performing the build until registrations change.
    pub fn build_plan(&self) -> Result<Arc<BuildPlan>, BuildError> {
        let generation = self.catalog().generation();
        let persistent = self.persistent_policies();
        if let Some(plan) = persistent.get_local::<BuildPlan>(&self.build_key) {
            if plan.generation() == generation {
                return Ok(plan);
            }
        }

        let plan = Arc::new(BuildPlan::compile(
            &self.build_key,
            &self.policies,
            self.catalog(),
            generation,
        )?);
        persistent.set(self.build_key.clone(), plan.clone());
        Ok(plan)
    }

    pub fn set_operation(&mut self, operation: Operation) {
        if let Some(frame) = self.state.frames.get_mut(self.frame) {
            frame.operation = Some(operation);
        }
    }

    pub fn clear_operation(&mut self) {
        if let Some(frame) = self.state.frames.get_mut(self.frame) {
            frame.operation = None;
        }
    }

    pub fn current_operation(&self) -> Option<&Operation> {
        self.state
            .frames
            .get(self.frame)
            .and_then(BuildFrame::operation)
    }

    /// Forgets a captured failure, e.g. when an optional dependency failed to resolve.
    pub fn clear_failure(&mut self) {
        self.state.failure = None;
    }

    /// Hands a failed dependency build over to user code, e.g. a factory, which might recover
    /// from it. The captured failure is kept aside and restored only if the same error ends up
    /// failing the build.
    pub fn detach_failure(&mut self, error: BuildError) -> ErrorPtr {
        let error: ErrorPtr = Arc::new(error);
        self.state.detached = self
            .state
            .failure
            .take()
            .map(|trace| (error.clone(), trace));
        error
    }

    fn reattached_failure(&mut self, error: &BuildError) -> Option<BuildTrace> {
        let (detached, trace) = self.state.detached.take()?;
        match error {
            BuildError::ConstructionFailed(error)
                if Arc::as_ptr(error) as *const () == Arc::as_ptr(&detached) as *const () =>
            {
                Some(trace)
            }
            _ => None,
        }
    }

    /// Holds the lifetime lock until [release_lifetime_lock](Self::release_lifetime_lock) or
    /// until the build fails.
    pub fn hold_lifetime_lock(&mut self, guard: LifetimeGuard) {
        *self.lifetime_lock.borrow_mut() = Some(guard);
        self.recovery
            .add(Box::new(LifetimeLockRecovery(self.lifetime_lock.clone())));
    }

    pub fn release_lifetime_lock(&mut self) {
        self.lifetime_lock.borrow_mut().take();
    }

    pub fn add_recovery(&mut self, item: Box<dyn RequiresRecovery>) {
        self.recovery.add(item);
    }

    #[inline]
    pub fn build_key(&self) -> &BuildKey {
        &self.build_key
    }

    /// Key requested before any mapping took place.
    #[inline]
    pub fn original_build_key(&self) -> &BuildKey {
        &self.original_build_key
    }

    #[inline]
    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    #[inline]
    pub fn existing(&self) -> &Existing {
        &self.existing
    }

    #[inline]
    pub fn existing_mut(&mut self) -> &mut Existing {
        &mut self.existing
    }

    pub fn set_existing(&mut self, existing: Existing) {
        self.existing = existing;
    }

    #[inline]
    pub fn is_build_complete(&self) -> bool {
        self.build_complete
    }

    pub fn set_build_complete(&mut self, build_complete: bool) {
        self.build_complete = build_complete;
    }

    /// Transient policies of this context.
    #[inline]
    pub fn policies(&self) -> &Arc<PolicyList> {
        &self.policies
    }

    /// Policies of the container performing the build.
    #[inline]
    pub fn persistent_policies(&self) -> &Arc<PolicyList> {
        &self.scope.container.policies
    }

    /// Policies shared by all contexts of the current request.
    #[inline]
    pub fn resolve_policies(&self) -> &Arc<PolicyList> {
        &self.scope.resolve_policies
    }

    #[inline]
    pub fn lifetime(&self) -> &Arc<LifetimeContainer> {
        &self.scope.container.lifetime
    }

    #[inline]
    pub fn catalog(&self) -> &TypeCatalog {
        &self.scope.container.catalog
    }

    #[inline]
    pub fn named_types(&self) -> &NamedTypeRegistry {
        &self.scope.container.named_types
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use crate::context::{Existing, PartialInstance, RecoveryStack, RequiresRecovery};
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counter(u8);

    #[derive(Debug)]
    struct Other;

    crate::injectable!(Counter, Other);

    struct RecordRecovery {
        order: Rc<Cell<u32>>,
        id: u32,
    }

    impl RequiresRecovery for RecordRecovery {
        fn recover(&mut self) {
            self.order.set(self.order.get() * 10 + self.id);
        }
    }

    #[test]
    fn should_recover_in_reverse_order() {
        let order = Rc::new(Cell::new(0));
        let mut stack = RecoveryStack::default();
        stack.add(Box::new(RecordRecovery {
            order: order.clone(),
            id: 1,
        }));
        stack.add(Box::new(RecordRecovery {
            order: order.clone(),
            id: 2,
        }));

        stack.execute_recovery();

        assert_eq!(order.get(), 21);
        assert!(stack.is_empty());
    }

    #[test]
    fn should_mutate_and_seal_partial_instance() {
        let mut partial = PartialInstance::new(Counter(1));
        partial.value_mut().downcast_mut::<Counter>().unwrap().0 = 2;

        let instance = partial.seal();
        assert_eq!(instance.value().downcast_ref::<Counter>().unwrap().0, 2);
    }

    #[test]
    fn should_return_partial_instance_of_other_type() {
        let partial = PartialInstance::new(Counter(1));
        let partial = partial.into_inner::<Other>().err().unwrap();

        assert_eq!(partial.into_inner::<Counter>().ok().unwrap().0, 1);
        assert!(Existing::default().is_none());
    }
}
