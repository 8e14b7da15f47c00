//! Container extensions configure containers by adding strategies and default policies. Built-in
//! behavior is itself provided by the [DefaultStrategies] extension, installed in every root
//! container.

use crate::lifetime::LifetimeContainer;
use crate::policy::PolicyList;
use crate::selection::{
    ConstructorSelectorPolicy, DefaultConstructorSelector, DefaultMethodSelector,
    DefaultPropertySelector, MethodSelectorPolicy, PropertySelectorPolicy,
};
use crate::strategies::{
    ArrayResolutionStrategy, BuildKeyMappingStrategy, ConstructionStrategy,
    HierarchicalLifetimeStrategy, LifetimeStrategy, MethodInjectionStrategy,
    PropertyInjectionStrategy,
};
use crate::strategy::{BuilderStrategyPtr, Stage, StagedStrategyChain};
use std::sync::Arc;

/// Extends container configuration.
pub trait ContainerExtension: Send + Sync {
    fn initialize(&self, context: &mut ExtensionContext<'_>);
}

/// Configuration of the container being extended.
pub struct ExtensionContext<'a> {
    strategies: &'a StagedStrategyChain,
    policies: &'a Arc<PolicyList>,
    lifetime: &'a Arc<LifetimeContainer>,
}

impl<'a> ExtensionContext<'a> {
    pub(crate) fn new(
        strategies: &'a StagedStrategyChain,
        policies: &'a Arc<PolicyList>,
        lifetime: &'a Arc<LifetimeContainer>,
    ) -> Self {
        Self {
            strategies,
            policies,
            lifetime,
        }
    }

    /// Adds a strategy at the end of the given stage. Affects only builds started afterwards.
    pub fn add_strategy(&mut self, stage: Stage, strategy: BuilderStrategyPtr) {
        self.strategies.add(stage, strategy);
    }

    /// Persistent policies of the container.
    #[inline]
    pub fn policies(&self) -> &Arc<PolicyList> {
        self.policies
    }

    #[inline]
    pub fn lifetime(&self) -> &Arc<LifetimeContainer> {
        self.lifetime
    }
}

/// Installs built-in strategies and default selectors.
#[derive(Default)]
pub struct DefaultStrategies;

impl ContainerExtension for DefaultStrategies {
    fn initialize(&self, context: &mut ExtensionContext<'_>) {
        context.add_strategy(Stage::TypeMapping, Arc::new(BuildKeyMappingStrategy));
        context.add_strategy(Stage::Lifetime, Arc::new(HierarchicalLifetimeStrategy));
        context.add_strategy(Stage::Lifetime, Arc::new(LifetimeStrategy));
        context.add_strategy(Stage::Creation, Arc::new(ArrayResolutionStrategy));
        context.add_strategy(Stage::Creation, Arc::new(ConstructionStrategy));
        context.add_strategy(Stage::Initialization, Arc::new(PropertyInjectionStrategy));
        context.add_strategy(Stage::Initialization, Arc::new(MethodInjectionStrategy));

        let policies = context.policies();
        policies.set_default::<dyn ConstructorSelectorPolicy>(Arc::new(DefaultConstructorSelector));
        policies.set_default::<dyn PropertySelectorPolicy>(Arc::new(DefaultPropertySelector));
        policies.set_default::<dyn MethodSelectorPolicy>(Arc::new(DefaultMethodSelector));
    }
}

#[cfg(test)]
mod tests {
    use crate::extension::{ContainerExtension, DefaultStrategies, ExtensionContext};
    use crate::lifetime::LifetimeContainer;
    use crate::policy::PolicyList;
    use crate::selection::ConstructorSelectorPolicy;
    use crate::strategy::StagedStrategyChain;
    use std::sync::Arc;

    #[test]
    fn should_install_default_strategies() {
        let strategies = StagedStrategyChain::new();
        let policies = Arc::new(PolicyList::new());
        let lifetime = Arc::new(LifetimeContainer::default());

        DefaultStrategies.initialize(&mut ExtensionContext::new(
            &strategies,
            &policies,
            &lifetime,
        ));

        assert_eq!(strategies.make_strategy_chain().strategies().len(), 7);
        assert!(policies
            .get_default::<dyn ConstructorSelectorPolicy>()
            .is_some());
        assert!(lifetime.is_empty());
    }
}
