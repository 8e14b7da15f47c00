//! A [BuildPlan] holds the results of running selectors over the descriptor of a single build key.
//! Plans are compiled on first use and cached as policies of the resolving container, until the
//! registration generation changes.

use crate::build_key::BuildKey;
use crate::descriptor::BuildDescriptor;
use crate::error::BuildError;
use crate::policy::PolicyList;
use crate::registry::TypeCatalog;
use crate::selection::{
    ConstructorSelectorPolicy, DefaultConstructorSelector, DefaultMethodSelector,
    DefaultPropertySelector, MethodSelectorPolicy, PropertySelectorPolicy, SelectedConstructor,
    SelectedMethod, SelectedProperty,
};
use std::sync::Arc;
use tracing::trace;

/// Compiled selection results. Selection errors are kept in the plan and reported only when the
/// failing part is needed, e.g. a constructor selection error doesn't matter for build-up.
pub struct BuildPlan {
    generation: u64,
    descriptor: Arc<BuildDescriptor>,
    constructor: Result<SelectedConstructor, BuildError>,
    properties: Result<Vec<SelectedProperty>, BuildError>,
    methods: Result<Vec<SelectedMethod>, BuildError>,
}

impl BuildPlan {
    pub fn compile(
        build_key: &BuildKey,
        policies: &PolicyList,
        catalog: &TypeCatalog,
        generation: u64,
    ) -> Result<Self, BuildError> {
        let descriptor = catalog
            .descriptor(build_key.type_key())
            .ok_or_else(|| BuildError::NoBuildPlan {
                type_name: build_key.type_info().name().to_string(),
            })?;

        trace!(%build_key, generation, "Compiling build plan.");

        let constructor = match policies.get::<dyn ConstructorSelectorPolicy>(build_key) {
            Some(found) => found.policy.select_constructor(&descriptor),
            None => DefaultConstructorSelector.select_constructor(&descriptor),
        };

        let properties = match policies.get::<dyn PropertySelectorPolicy>(build_key) {
            Some(found) => found.policy.select_properties(&descriptor),
            None => DefaultPropertySelector.select_properties(&descriptor),
        };

        let methods = match policies.get::<dyn MethodSelectorPolicy>(build_key) {
            Some(found) => found.policy.select_methods(&descriptor),
            None => DefaultMethodSelector.select_methods(&descriptor),
        };

        Ok(Self {
            generation,
            descriptor,
            constructor,
            properties,
            methods,
        })
    }

    /// Registration generation the plan was compiled for.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn descriptor(&self) -> &Arc<BuildDescriptor> {
        &self.descriptor
    }

    pub fn constructor(&self) -> Result<&SelectedConstructor, BuildError> {
        self.constructor.as_ref().map_err(Clone::clone)
    }

    pub fn properties(&self) -> Result<&[SelectedProperty], BuildError> {
        self.properties
            .as_deref()
            .map_err(Clone::clone)
    }

    pub fn methods(&self) -> Result<&[SelectedMethod], BuildError> {
        self.methods.as_deref().map_err(Clone::clone)
    }
}

#[cfg(test)]
mod tests {
    use crate::build_key::BuildKey;
    use crate::descriptor::{Buildable, Constructor, Parameter, TypeDescriptor};
    use crate::error::BuildError;
    use crate::plan::BuildPlan;
    use crate::policy::PolicyList;
    use crate::registry::TypeCatalog;
    use crate::resolution::InjectionValue;
    use crate::selection::{ConstructorSelectorPolicy, SpecifiedConstructorSelector};
    use std::sync::Arc;

    struct Counter(u32);

    struct Unregistered;

    crate::injectable!(Counter, Unregistered);

    impl Buildable for Counter {
        fn descriptor() -> TypeDescriptor<Self> {
            TypeDescriptor::new()
                .constructor(Constructor::new(vec![], |_| Ok(Counter(0))))
                .constructor(Constructor::new(
                    vec![Parameter::value("start", 1u32)],
                    |arguments| Ok(Counter(arguments.next()?)),
                ))
        }
    }

    #[test]
    fn should_compile_with_default_selectors() {
        let catalog = TypeCatalog::default();
        catalog.add_buildable::<Counter>();

        let plan = BuildPlan::compile(
            &BuildKey::of::<Counter>(),
            &PolicyList::new(),
            &catalog,
            catalog.generation(),
        )
        .unwrap();

        assert_eq!(plan.constructor().unwrap().parameters.len(), 1);
        assert!(plan.properties().unwrap().is_empty());
        assert!(plan.methods().unwrap().is_empty());
        assert_eq!(plan.generation(), catalog.generation());
    }

    #[test]
    fn should_use_selector_policies() {
        let catalog = TypeCatalog::default();
        catalog.add_buildable::<Counter>();

        let policies = PolicyList::new();
        policies.set::<dyn ConstructorSelectorPolicy>(
            BuildKey::of::<Counter>(),
            Arc::new(SpecifiedConstructorSelector::new(vec![])),
        );

        let plan =
            BuildPlan::compile(&BuildKey::of::<Counter>(), &policies, &catalog, 0).unwrap();
        assert!(plan.constructor().unwrap().parameters.is_empty());

        policies.set::<dyn ConstructorSelectorPolicy>(
            BuildKey::of::<Counter>(),
            Arc::new(SpecifiedConstructorSelector::new(vec![InjectionValue::value(
                "text",
            )])),
        );

        let plan =
            BuildPlan::compile(&BuildKey::of::<Counter>(), &policies, &catalog, 0).unwrap();
        assert!(matches!(
            plan.constructor(),
            Err(BuildError::NoMatchingConstructor { .. })
        ));
    }

    #[test]
    fn should_require_descriptor() {
        let result = BuildPlan::compile(
            &BuildKey::of::<Unregistered>(),
            &PolicyList::new(),
            &TypeCatalog::default(),
            0,
        );

        assert!(matches!(result, Err(BuildError::NoBuildPlan { .. })));
    }
}
