//! Dependency resolvers produce values for single dependency slots - constructor and method
//! parameters or properties. Each slot carries an [InjectionValue], which pairs the resolver with
//! the type of the value it produces.

use crate::build_key::{BuildKey, Injectable, TypeInfo};
use crate::context::BuilderContext;
use crate::error::BuildError;
use crate::instance::{InstancePtr, Value};
use derivative::Derivative;
use std::any::{type_name, TypeId};
use std::sync::Arc;
use tracing::trace;

pub type DependencyResolverPtr = Arc<dyn DependencyResolverPolicy>;

/// Produces a value for a single dependency slot.
pub trait DependencyResolverPolicy: Send + Sync {
    fn resolve(&self, context: &mut BuilderContext<'_>) -> Result<Value, BuildError>;
}

/// Builds the given key in a child context and casts the result to the requested type.
pub struct NamedTypeDependencyResolver {
    key: BuildKey,
}

impl NamedTypeDependencyResolver {
    pub fn new(key: BuildKey) -> Self {
        Self { key }
    }

    #[inline]
    pub fn key(&self) -> &BuildKey {
        &self.key
    }
}

impl DependencyResolverPolicy for NamedTypeDependencyResolver {
    fn resolve(&self, context: &mut BuilderContext<'_>) -> Result<Value, BuildError> {
        let instance = context.resolve_key(self.key.clone())?;
        context.catalog().convert(self.key.type_info(), &instance)
    }
}

/// Like [NamedTypeDependencyResolver], but any failure results in `None`.
pub struct OptionalDependencyResolver {
    inner: NamedTypeDependencyResolver,
    wrap: fn(Option<Value>) -> Value,
}

impl OptionalDependencyResolver {
    pub fn new<T: Injectable + ?Sized>(key: BuildKey) -> Self {
        Self {
            inner: NamedTypeDependencyResolver::new(key),
            wrap: wrap_optional::<T>,
        }
    }
}

impl DependencyResolverPolicy for OptionalDependencyResolver {
    fn resolve(&self, context: &mut BuilderContext<'_>) -> Result<Value, BuildError> {
        match self.inner.resolve(context) {
            Ok(value) => Ok((self.wrap)(Some(value))),
            Err(error) => {
                trace!(key = %self.inner.key, %error, "Optional dependency not resolved.");
                context.clear_failure();
                Ok((self.wrap)(None))
            }
        }
    }
}

fn wrap_optional<T: Injectable + ?Sized>(value: Option<Value>) -> Value {
    Box::new(
        value
            .and_then(|value| value.downcast::<InstancePtr<T>>().ok())
            .map(|value| *value),
    )
}

/// Returns a captured value.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct LiteralValueDependencyResolver {
    #[derivative(Debug = "ignore")]
    make: Box<dyn Fn() -> Value + Send + Sync>,
}

impl LiteralValueDependencyResolver {
    pub fn new<V: Clone + Send + Sync + 'static>(value: V) -> Self {
        Self {
            make: Box::new(move || Box::new(value.clone()) as Value),
        }
    }
}

impl DependencyResolverPolicy for LiteralValueDependencyResolver {
    fn resolve(&self, _context: &mut BuilderContext<'_>) -> Result<Value, BuildError> {
        Ok((self.make)())
    }
}

/// Resolves all registrations of the array element type.
pub struct ArrayDependencyResolver {
    type_info: TypeInfo,
}

impl ArrayDependencyResolver {
    /// Creates a resolver for the given array type, as created by [TypeInfo::array_of].
    pub fn new(type_info: TypeInfo) -> Self {
        Self { type_info }
    }
}

impl DependencyResolverPolicy for ArrayDependencyResolver {
    fn resolve(&self, context: &mut BuilderContext<'_>) -> Result<Value, BuildError> {
        let instance = context.resolve_key(BuildKey::new(self.type_info.clone(), None))?;
        context.catalog().convert(&self.type_info, &instance)
    }
}

/// Describes how to get a value for a dependency slot: the dependency type (used for override
/// matching), the type of the produced value and the default resolver.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct InjectionValue {
    dependency_type: TypeInfo,
    value_type: TypeId,
    value_type_name: &'static str,
    #[derivative(Debug = "ignore")]
    resolver: DependencyResolverPtr,
}

impl InjectionValue {
    pub fn new(
        dependency_type: TypeInfo,
        value_type: TypeId,
        value_type_name: &'static str,
        resolver: DependencyResolverPtr,
    ) -> Self {
        Self {
            dependency_type,
            value_type,
            value_type_name,
            resolver,
        }
    }

    /// Default registration of `T`, produced as `InstancePtr<T>`.
    pub fn resolved<T: Injectable + ?Sized>() -> Self {
        Self::of_key::<T>(BuildKey::of::<T>())
    }

    /// Named registration of `T`, produced as `InstancePtr<T>`.
    pub fn named<T: Injectable + ?Sized, N: ToString>(name: N) -> Self {
        Self::of_key::<T>(BuildKey::named::<T, N>(name))
    }

    /// Default registration of `T`, produced as `Option<InstancePtr<T>>`.
    pub fn optional<T: Injectable + ?Sized>() -> Self {
        Self::optional_of_key::<T>(BuildKey::of::<T>())
    }

    pub fn optional_named<T: Injectable + ?Sized, N: ToString>(name: N) -> Self {
        Self::optional_of_key::<T>(BuildKey::named::<T, N>(name))
    }

    /// All registrations of `T`, produced as `Vec<InstancePtr<T>>`.
    pub fn array<T: Injectable + ?Sized>() -> Self {
        let type_info = TypeInfo::array_of::<T>();
        Self::new(
            type_info.clone(),
            TypeId::of::<Vec<InstancePtr<T>>>(),
            type_name::<Vec<InstancePtr<T>>>(),
            Arc::new(ArrayDependencyResolver::new(type_info)),
        )
    }

    /// A literal value.
    pub fn value<V: Clone + Send + Sync + 'static>(value: V) -> Self {
        Self::new(
            TypeInfo::of::<V>(),
            TypeId::of::<V>(),
            type_name::<V>(),
            Arc::new(LiteralValueDependencyResolver::new(value)),
        )
    }

    fn of_key<T: Injectable + ?Sized>(key: BuildKey) -> Self {
        Self::new(
            T::type_info(),
            TypeId::of::<InstancePtr<T>>(),
            type_name::<InstancePtr<T>>(),
            Arc::new(NamedTypeDependencyResolver::new(key)),
        )
    }

    fn optional_of_key<T: Injectable + ?Sized>(key: BuildKey) -> Self {
        Self::new(
            T::type_info(),
            TypeId::of::<Option<InstancePtr<T>>>(),
            type_name::<Option<InstancePtr<T>>>(),
            Arc::new(OptionalDependencyResolver::new::<T>(key)),
        )
    }

    /// Type of the dependency, e.g. `T` for `InstancePtr<T>` values.
    #[inline]
    pub fn dependency_type(&self) -> &TypeInfo {
        &self.dependency_type
    }

    /// Type of the produced value.
    #[inline]
    pub fn value_type(&self) -> TypeId {
        self.value_type
    }

    #[inline]
    pub fn value_type_name(&self) -> &'static str {
        self.value_type_name
    }

    #[inline]
    pub fn resolver(&self) -> &DependencyResolverPtr {
        &self.resolver
    }

    /// Replaces the resolver, keeping the value type.
    pub fn with_resolver(mut self, resolver: DependencyResolverPtr) -> Self {
        self.resolver = resolver;
        self
    }
}

#[cfg(test)]
mod tests {
    use crate::build_key::TypeInfo;
    use crate::instance::InstancePtr;
    use crate::resolution::{wrap_optional, InjectionValue};
    use std::any::TypeId;

    struct Plugin;

    crate::injectable!(Plugin);

    #[test]
    fn should_describe_value_types() {
        assert_eq!(
            InjectionValue::resolved::<Plugin>().value_type(),
            TypeId::of::<InstancePtr<Plugin>>()
        );
        assert_eq!(
            InjectionValue::optional::<Plugin>().value_type(),
            TypeId::of::<Option<InstancePtr<Plugin>>>()
        );
        assert_eq!(
            InjectionValue::array::<Plugin>().dependency_type(),
            &TypeInfo::array_of::<Plugin>()
        );
        assert_eq!(InjectionValue::value(5u32).value_type(), TypeId::of::<u32>());
        assert_eq!(
            InjectionValue::named::<Plugin, _>("a").dependency_type(),
            &TypeInfo::of::<Plugin>()
        );
    }

    #[test]
    fn should_wrap_optional_values() {
        let missing = wrap_optional::<Plugin>(None)
            .downcast::<Option<InstancePtr<Plugin>>>()
            .unwrap();
        assert!(missing.is_none());

        let present = wrap_optional::<Plugin>(Some(Box::new(InstancePtr::new(Plugin))))
            .downcast::<Option<InstancePtr<Plugin>>>()
            .unwrap();
        assert!(present.is_some());
    }
}
