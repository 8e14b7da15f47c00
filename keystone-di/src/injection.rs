//! Injection members customize how a registered type is built, while resolver overrides replace
//! the values of single dependency slots for the duration of one resolve call.
//!
//! Members are installed as policies of the registering container, keyed by the implementation
//! key:
//!
//! * [InjectionConstructor] - selects the constructor whose parameter types match given values.
//! * [InjectionProperty] - injects a property, optionally with a given value.
//! * [InjectionMethod] - calls a method, optionally with given values.
//! * [InjectionFactory] - builds instances with a user function instead of a constructor.
//!
//! Overrides are passed to [resolve_with](crate::container::Container::resolve_with) and matched
//! against the operation in progress: [ParameterOverride] against the constructor or method
//! parameter name, [PropertyOverride] against the property name and [DependencyOverride] against
//! the dependency type.

use crate::build_key::{BuildKey, Injectable, TypeInfo};
use crate::context::BuilderContext;
use crate::error::BuildError;
use crate::instance::{Disposable, ErrorPtr, Instance, InstancePtr};
use crate::policy::PolicyList;
use crate::resolution::{DependencyResolverPtr, InjectionValue};
use crate::selection::{
    ConstructorSelectorPolicy, MethodSelectorPolicy, PropertySelectorPolicy,
    SpecifiedConstructorSelector, SpecifiedMethodsSelector, SpecifiedPropertiesSelector,
};
use crate::trace::Operation;
use std::any::type_name;
use std::sync::Arc;

/// The dependency slot being resolved, as seen by overrides.
pub struct OverrideTarget<'a> {
    pub operation: Option<&'a Operation>,
    pub build_key: &'a BuildKey,
    pub dependency_type: &'a TypeInfo,
}

pub type ResolverOverridePtr = Arc<dyn ResolverOverride>;

/// Supersedes the default resolver of matching dependency slots.
pub trait ResolverOverride: Send + Sync {
    /// Returns the resolver to use for the given target, if the override applies to it.
    fn resolver(&self, target: &OverrideTarget) -> Option<DependencyResolverPtr>;
}

fn matches_type(target_type: &Option<TypeInfo>, target: &OverrideTarget) -> bool {
    target_type
        .as_ref()
        .map_or(true, |target_type| target_type == target.build_key.type_info())
}

/// Overrides constructor or method parameters with the given name.
pub struct ParameterOverride {
    name: &'static str,
    value: InjectionValue,
    target_type: Option<TypeInfo>,
}

impl ParameterOverride {
    pub fn new(name: &'static str, value: InjectionValue) -> Self {
        Self {
            name,
            value,
            target_type: None,
        }
    }

    /// Limits the override to parameters of the given type being built.
    pub fn on_type<T: Injectable + ?Sized>(mut self) -> Self {
        self.target_type = Some(T::type_info());
        self
    }
}

impl ResolverOverride for ParameterOverride {
    fn resolver(&self, target: &OverrideTarget) -> Option<DependencyResolverPtr> {
        (target.operation.and_then(Operation::parameter_name) == Some(self.name)
            && matches_type(&self.target_type, target))
        .then(|| self.value.resolver().clone())
    }
}

/// Overrides properties with the given name.
pub struct PropertyOverride {
    name: &'static str,
    value: InjectionValue,
    target_type: Option<TypeInfo>,
}

impl PropertyOverride {
    pub fn new(name: &'static str, value: InjectionValue) -> Self {
        Self {
            name,
            value,
            target_type: None,
        }
    }

    pub fn on_type<T: Injectable + ?Sized>(mut self) -> Self {
        self.target_type = Some(T::type_info());
        self
    }
}

impl ResolverOverride for PropertyOverride {
    fn resolver(&self, target: &OverrideTarget) -> Option<DependencyResolverPtr> {
        (target.operation.and_then(Operation::property_name) == Some(self.name)
            && matches_type(&self.target_type, target))
        .then(|| self.value.resolver().clone())
    }
}

/// Overrides every dependency of the given type, regardless of the slot.
pub struct DependencyOverride {
    dependency_type: TypeInfo,
    value: InjectionValue,
    target_type: Option<TypeInfo>,
}

impl DependencyOverride {
    pub fn new<T: Injectable + ?Sized>(value: InjectionValue) -> Self {
        Self {
            dependency_type: T::type_info(),
            value,
            target_type: None,
        }
    }

    /// Overrides dependencies of type `T` with the given instance.
    pub fn instance<T: Injectable + ?Sized>(instance: InstancePtr<T>) -> Self {
        Self::new::<T>(InjectionValue::value(instance))
    }

    pub fn on_type<T: Injectable + ?Sized>(mut self) -> Self {
        self.target_type = Some(T::type_info());
        self
    }
}

impl ResolverOverride for DependencyOverride {
    fn resolver(&self, target: &OverrideTarget) -> Option<DependencyResolverPtr> {
        (&self.dependency_type == target.dependency_type
            && matches_type(&self.target_type, target))
        .then(|| self.value.resolver().clone())
    }
}

impl From<ParameterOverride> for ResolverOverridePtr {
    fn from(value: ParameterOverride) -> Self {
        Arc::new(value)
    }
}

impl From<PropertyOverride> for ResolverOverridePtr {
    fn from(value: PropertyOverride) -> Self {
        Arc::new(value)
    }
}

impl From<DependencyOverride> for ResolverOverridePtr {
    fn from(value: DependencyOverride) -> Self {
        Arc::new(value)
    }
}

pub type FactoryFunction =
    dyn Fn(&mut FactoryContext<'_, '_>) -> Result<Instance, ErrorPtr> + Send + Sync;

/// Builds instances with a user function. The function can resolve further dependencies through
/// the given [FactoryContext], which takes part in cycle detection and failure reporting.
pub struct FactoryPolicy {
    factory: Arc<FactoryFunction>,
}

impl FactoryPolicy {
    pub fn new<C, F>(factory: F) -> Self
    where
        C: Injectable,
        F: Fn(&mut FactoryContext<'_, '_>) -> Result<C, ErrorPtr> + Send + Sync + 'static,
    {
        Self {
            factory: erase_factory(move |context| {
                factory(context).map(|instance| Instance::new(InstancePtr::new(instance)))
            }),
        }
    }

    /// Factory of instances disposed by their lifetime manager.
    pub fn disposable<C, F>(factory: F) -> Self
    where
        C: Injectable + Disposable,
        F: Fn(&mut FactoryContext<'_, '_>) -> Result<C, ErrorPtr> + Send + Sync + 'static,
    {
        Self {
            factory: erase_factory(move |context| {
                factory(context).map(|instance| Instance::disposable(InstancePtr::new(instance)))
            }),
        }
    }

    /// Factory of already shared instances, e.g. trait objects. Such instances are never disposed
    /// by the container.
    pub fn shared<S, F>(factory: F) -> Self
    where
        S: Injectable + ?Sized,
        F: Fn(&mut FactoryContext<'_, '_>) -> Result<InstancePtr<S>, ErrorPtr>
            + Send
            + Sync
            + 'static,
    {
        Self {
            factory: erase_factory(move |context| {
                factory(context).map(Instance::shared)
            }),
        }
    }

    pub fn create(&self, context: &mut BuilderContext<'_>) -> Result<Instance, BuildError> {
        (self.factory)(&mut FactoryContext { context }).map_err(BuildError::ConstructionFailed)
    }
}

fn erase_factory<F>(factory: F) -> Arc<FactoryFunction>
where
    F: Fn(&mut FactoryContext<'_, '_>) -> Result<Instance, ErrorPtr> + Send + Sync + 'static,
{
    Arc::new(factory)
}

/// Gives factories access to the build in progress.
pub struct FactoryContext<'c, 'a> {
    context: &'c mut BuilderContext<'a>,
}

impl<'c, 'a> FactoryContext<'c, 'a> {
    /// Key being built.
    pub fn build_key(&self) -> &BuildKey {
        self.context.build_key()
    }

    pub fn resolve<T: Injectable + ?Sized>(&mut self) -> Result<InstancePtr<T>, ErrorPtr> {
        self.resolve_key::<T>(BuildKey::of::<T>())
    }

    pub fn resolve_named<T: Injectable + ?Sized, N: ToString>(
        &mut self,
        name: N,
    ) -> Result<InstancePtr<T>, ErrorPtr> {
        self.resolve_key::<T>(BuildKey::named::<T, N>(name))
    }

    fn resolve_key<T: Injectable + ?Sized>(
        &mut self,
        key: BuildKey,
    ) -> Result<InstancePtr<T>, ErrorPtr> {
        let instance = match self.context.resolve_key(key.clone()) {
            Ok(instance) => instance,
            Err(error) => return Err(self.context.detach_failure(error)),
        };

        self.context
            .catalog()
            .convert(key.type_info(), &instance)
            .and_then(|value| {
                value
                    .downcast::<InstancePtr<T>>()
                    .map(|value| *value)
                    .map_err(|_| BuildError::IncompatibleValue {
                        expected: type_name::<InstancePtr<T>>().to_string(),
                        slot: format!("factory of {}", key.type_info()),
                    })
            })
            .map_err(|error| Arc::new(error) as ErrorPtr)
    }
}

/// Policies collected from injection members of a single registration.
#[derive(Default)]
pub struct InjectionPolicies {
    constructor: Option<Vec<InjectionValue>>,
    properties: Vec<(String, Option<InjectionValue>)>,
    methods: Vec<(String, Option<Vec<InjectionValue>>)>,
    factory: Option<Arc<FactoryPolicy>>,
}

impl InjectionPolicies {
    pub fn set_constructor(&mut self, values: Vec<InjectionValue>) {
        self.constructor = Some(values);
    }

    pub fn add_property(&mut self, name: String, value: Option<InjectionValue>) {
        self.properties.push((name, value));
    }

    pub fn add_method(&mut self, name: String, values: Option<Vec<InjectionValue>>) {
        self.methods.push((name, values));
    }

    pub fn set_factory(&mut self, factory: Arc<FactoryPolicy>) {
        self.factory = Some(factory);
    }

    /// Replaces selection and factory policies for the given key in the given layer.
    pub fn install(self, key: &BuildKey, policies: &PolicyList) {
        policies.clear::<dyn ConstructorSelectorPolicy>(key);
        policies.clear::<dyn PropertySelectorPolicy>(key);
        policies.clear::<dyn MethodSelectorPolicy>(key);
        policies.clear::<FactoryPolicy>(key);

        if let Some(values) = self.constructor {
            policies.set::<dyn ConstructorSelectorPolicy>(
                key.clone(),
                Arc::new(SpecifiedConstructorSelector::new(values)),
            );
        }

        if !self.properties.is_empty() {
            policies.set::<dyn PropertySelectorPolicy>(
                key.clone(),
                Arc::new(SpecifiedPropertiesSelector::new(self.properties)),
            );
        }

        if !self.methods.is_empty() {
            policies.set::<dyn MethodSelectorPolicy>(
                key.clone(),
                Arc::new(SpecifiedMethodsSelector::new(self.methods)),
            );
        }

        if let Some(factory) = self.factory {
            policies.set(key.clone(), factory);
        }
    }
}

/// Registration-time customization of how a type is built.
pub trait InjectionMember: Send + Sync {
    fn add_policies(&self, policies: &mut InjectionPolicies);
}

pub type InjectionMemberPtr = Arc<dyn InjectionMember>;

/// Selects the constructor taking the given values.
pub struct InjectionConstructor {
    values: Vec<InjectionValue>,
}

impl InjectionConstructor {
    pub fn new(values: Vec<InjectionValue>) -> Self {
        Self { values }
    }
}

impl InjectionMember for InjectionConstructor {
    fn add_policies(&self, policies: &mut InjectionPolicies) {
        policies.set_constructor(self.values.clone());
    }
}

/// Injects the property with the given name.
pub struct InjectionProperty {
    name: String,
    value: Option<InjectionValue>,
}

impl InjectionProperty {
    /// Injects the property with its declared value.
    pub fn new<N: ToString>(name: N) -> Self {
        Self {
            name: name.to_string(),
            value: None,
        }
    }

    pub fn with_value<N: ToString>(name: N, value: InjectionValue) -> Self {
        Self {
            name: name.to_string(),
            value: Some(value),
        }
    }
}

impl InjectionMember for InjectionProperty {
    fn add_policies(&self, policies: &mut InjectionPolicies) {
        policies.add_property(self.name.clone(), self.value.clone());
    }
}

/// Calls the method with the given name after construction.
pub struct InjectionMethod {
    name: String,
    values: Option<Vec<InjectionValue>>,
}

impl InjectionMethod {
    /// Calls the method with its declared parameter values.
    pub fn new<N: ToString>(name: N) -> Self {
        Self {
            name: name.to_string(),
            values: None,
        }
    }

    /// Calls the method overload taking the given values.
    pub fn with_values<N: ToString>(name: N, values: Vec<InjectionValue>) -> Self {
        Self {
            name: name.to_string(),
            values: Some(values),
        }
    }
}

impl InjectionMember for InjectionMethod {
    fn add_policies(&self, policies: &mut InjectionPolicies) {
        policies.add_method(self.name.clone(), self.values.clone());
    }
}

/// Builds instances with the given function instead of a constructor.
pub struct InjectionFactory {
    policy: Arc<FactoryPolicy>,
}

impl InjectionFactory {
    pub fn new<C, F>(factory: F) -> Self
    where
        C: Injectable,
        F: Fn(&mut FactoryContext<'_, '_>) -> Result<C, ErrorPtr> + Send + Sync + 'static,
    {
        Self {
            policy: Arc::new(FactoryPolicy::new(factory)),
        }
    }

    pub fn from_policy(policy: FactoryPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }
}

impl InjectionMember for InjectionFactory {
    fn add_policies(&self, policies: &mut InjectionPolicies) {
        policies.set_factory(self.policy.clone());
    }
}
