//! Registration data shared by the container hierarchy: the [TypeCatalog] of buildable types and
//! casts, and the per-container [NamedTypeRegistry] used to enumerate registrations.

use crate::build_key::{GenericDefinition, TypeInfo, TypeKey};
use crate::descriptor::{BuildDescriptor, Buildable};
use crate::error::BuildError;
use crate::instance::{identity_cast, CastFunction, Instance, Value};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type CastKey = (TypeKey, TypeId);
type ClosedGenericKey = (&'static str, Vec<TypeKey>);

/// Descriptors of buildable types, casts between implementation and service types and known
/// closures of generic definitions. A single catalog is shared by a root container and all its
/// children. Every change bumps the catalog generation, which invalidates compiled build plans.
#[derive(Default)]
pub struct TypeCatalog {
    descriptors: RwLock<FxHashMap<TypeKey, Arc<BuildDescriptor>>>,
    casts: RwLock<FxHashMap<CastKey, CastFunction>>,
    closed_generics: RwLock<FxHashMap<ClosedGenericKey, TypeInfo>>,
    generation: AtomicU64,
}

impl TypeCatalog {
    pub fn add_descriptor(&self, descriptor: BuildDescriptor) {
        self.descriptors
            .write()
            .insert(descriptor.type_info().key(), Arc::new(descriptor));
        self.bump();
    }

    /// Adds the descriptor of `C` along with its identity cast, unless already known.
    pub fn add_buildable<C: Buildable>(&self) {
        let type_info = C::type_info();
        if self.contains_descriptor(type_info.key()) {
            return;
        }

        self.add_descriptor(C::descriptor().build());
        self.add_cast(type_info.key(), TypeId::of::<C>(), identity_cast::<C>);
    }

    pub fn descriptor(&self, key: TypeKey) -> Option<Arc<BuildDescriptor>> {
        self.descriptors.read().get(&key).cloned()
    }

    pub fn contains_descriptor(&self, key: TypeKey) -> bool {
        self.descriptors.read().contains_key(&key)
    }

    /// Allows using instances of type `actual` where `requested` is needed.
    pub fn add_cast(&self, requested: TypeKey, actual: TypeId, cast: CastFunction) {
        self.casts.write().insert((requested, actual), cast);
    }

    /// Records a closed generic type, so that open generic mappings can target it.
    pub fn add_closed_generic(&self, type_info: TypeInfo) {
        if let Some(definition) = type_info.generic_definition() {
            let arguments = type_info
                .generic_arguments()
                .iter()
                .map(TypeInfo::key)
                .collect();

            self.closed_generics
                .write()
                .insert((definition.name(), arguments), type_info);
            self.bump();
        }
    }

    /// Finds the closed type of the given definition with the given type arguments.
    pub fn closed_generic(
        &self,
        definition: &GenericDefinition,
        arguments: &[TypeInfo],
    ) -> Option<TypeInfo> {
        let arguments = arguments.iter().map(TypeInfo::key).collect();
        self.closed_generics
            .read()
            .get(&(definition.name(), arguments))
            .cloned()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidates all compiled build plans.
    pub fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Converts a built instance to a value of the requested type: `InstancePtr<T>` for plain
    /// types or `Vec<InstancePtr<T>>` for arrays.
    pub fn convert(&self, requested: &TypeInfo, instance: &Instance) -> Result<Value, BuildError> {
        let incompatible = || BuildError::IncompatibleInstance {
            requested: requested.name().to_string(),
            actual: instance.type_name().to_string(),
        };

        if let Some(shape) = requested.array_shape() {
            return shape.extract(instance.value()).ok_or_else(incompatible);
        }

        let cast = self
            .casts
            .read()
            .get(&(requested.key(), instance.type_id()))
            .copied()
            .ok_or_else(incompatible)?;

        cast(instance.value().clone()).map_err(|_| incompatible())
    }
}

/// Names registered for each type in a single container. Lookups include the names registered
/// in ancestors.
#[derive(Default)]
pub struct NamedTypeRegistry {
    parent: Option<Arc<NamedTypeRegistry>>,
    names: RwLock<FxHashMap<TypeKey, Vec<Option<String>>>>,
}

impl NamedTypeRegistry {
    pub fn with_parent(parent: Arc<NamedTypeRegistry>) -> Self {
        Self {
            parent: Some(parent),
            names: Default::default(),
        }
    }

    pub fn register(&self, type_key: TypeKey, name: Option<String>) {
        let mut names = self.names.write();
        let names = names.entry(type_key).or_default();
        if !names.contains(&name) {
            names.push(name);
        }
    }

    /// All names registered for the given type, ancestors first. The default registration is
    /// reported as `None`.
    pub fn names_of(&self, type_key: TypeKey) -> Vec<Option<String>> {
        let mut result = self
            .parent
            .as_ref()
            .map(|parent| parent.names_of(type_key))
            .unwrap_or_default();

        if let Some(names) = self.names.read().get(&type_key) {
            for name in names {
                if !result.contains(name) {
                    result.push(name.clone());
                }
            }
        }

        result
    }

    pub fn contains(&self, type_key: TypeKey, name: Option<&str>) -> bool {
        self.names
            .read()
            .get(&type_key)
            .map(|names| names.iter().any(|registered| registered.as_deref() == name))
            .unwrap_or(false)
            || self
                .parent
                .as_ref()
                .map(|parent| parent.contains(type_key, name))
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use crate::build_key::{GenericDefinition, Injectable, TypeInfo};
    use crate::descriptor::{Buildable, Constructor, TypeDescriptor};
    use crate::error::BuildError;
    use crate::instance::{alias_cast, Instance, InstancePtr};
    use crate::registry::{NamedTypeRegistry, TypeCatalog};
    use std::any::TypeId;
    use std::sync::Arc;

    static BOX: GenericDefinition = GenericDefinition::new("Box", 1);

    trait Shape {}

    struct Circle;

    struct Square;

    struct Crate<T>(std::marker::PhantomData<T>);

    impl Shape for Circle {}

    crate::injectable!(dyn Shape + Send + Sync, Circle, Square);
    crate::alias!(dyn Shape + Send + Sync => Circle);

    impl<T: Injectable> Injectable for Crate<T> {
        fn type_info() -> TypeInfo {
            TypeInfo::generic::<Self>(&BOX, vec![T::type_info()])
        }
    }

    impl Buildable for Circle {
        fn descriptor() -> TypeDescriptor<Self> {
            TypeDescriptor::new().constructor(Constructor::new(vec![], |_| Ok(Circle)))
        }
    }

    #[test]
    fn should_convert_with_registered_casts() {
        let catalog = TypeCatalog::default();
        catalog.add_buildable::<Circle>();
        catalog.add_cast(
            <dyn Shape + Send + Sync>::type_info().key(),
            TypeId::of::<Circle>(),
            alias_cast::<dyn Shape + Send + Sync, Circle>,
        );

        let instance = Instance::new(InstancePtr::new(Circle));
        let shape = catalog
            .convert(&<dyn Shape + Send + Sync>::type_info(), &instance)
            .unwrap();
        assert!(shape
            .downcast::<InstancePtr<dyn Shape + Send + Sync>>()
            .is_ok());

        let circle = catalog.convert(&Circle::type_info(), &instance).unwrap();
        assert!(circle.downcast::<InstancePtr<Circle>>().is_ok());
    }

    #[test]
    fn should_reject_unknown_conversion() {
        let catalog = TypeCatalog::default();
        let instance = Instance::new(InstancePtr::new(Square));

        assert!(matches!(
            catalog.convert(&<dyn Shape + Send + Sync>::type_info(), &instance),
            Err(BuildError::IncompatibleInstance { .. })
        ));
    }

    #[test]
    fn should_bump_generation_on_changes() {
        let catalog = TypeCatalog::default();
        let initial = catalog.generation();

        catalog.add_buildable::<Circle>();
        let after_add = catalog.generation();
        assert!(after_add > initial);

        catalog.add_buildable::<Circle>();
        assert_eq!(catalog.generation(), after_add);
    }

    #[test]
    fn should_find_closed_generic() {
        let catalog = TypeCatalog::default();
        catalog.add_closed_generic(Crate::<Circle>::type_info());

        assert_eq!(
            catalog.closed_generic(&BOX, &[Circle::type_info()]),
            Some(Crate::<Circle>::type_info())
        );
        assert!(catalog.closed_generic(&BOX, &[Square::type_info()]).is_none());
    }

    #[test]
    fn should_list_names_with_ancestors() {
        let parent = Arc::new(NamedTypeRegistry::default());
        let child = NamedTypeRegistry::with_parent(parent.clone());
        let key = Circle::type_info().key();

        parent.register(key, None);
        parent.register(key, Some("a".to_string()));
        child.register(key, Some("a".to_string()));
        child.register(key, Some("b".to_string()));

        assert_eq!(
            child.names_of(key),
            vec![None, Some("a".to_string()), Some("b".to_string())]
        );
        assert_eq!(parent.names_of(key).len(), 2);
        assert!(child.contains(key, Some("b")));
        assert!(!parent.contains(key, Some("b")));
    }
}
