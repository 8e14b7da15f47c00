//! Objects are built by a chain of [BuilderStrategy]s, grouped in [Stage]s. Each strategy gets
//! a chance to act on the [BuilderContext] before the object is built (in stage order) and after
//! it's built (in reverse order). A strategy can mark the build as complete, which skips the
//! remaining pre-build hooks, e.g. when an instance is already available from its lifetime
//! manager.
//!
//! Stage definitions are mutable while configuring a container (extensions can add strategies),
//! while each build operates on an immutable [StrategyChain] snapshot.

use crate::context::BuilderContext;
use crate::error::BuildError;
use parking_lot::RwLock;
use std::sync::Arc;

pub type BuilderStrategyPtr = Arc<dyn BuilderStrategy>;

/// Build stages, in execution order.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum Stage {
    Setup,
    TypeMapping,
    Lifetime,
    PreCreation,
    Creation,
    Initialization,
    PostInitialization,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Setup,
        Stage::TypeMapping,
        Stage::Lifetime,
        Stage::PreCreation,
        Stage::Creation,
        Stage::Initialization,
        Stage::PostInitialization,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// A single step of building or tearing down an object. All hooks do nothing by default.
pub trait BuilderStrategy: Send + Sync {
    fn pre_build(&self, _context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        Ok(())
    }

    fn post_build(&self, _context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        Ok(())
    }

    fn pre_tear_down(&self, _context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        Ok(())
    }

    fn post_tear_down(&self, _context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        Ok(())
    }
}

/// Mutable strategy definitions. Chains of child containers include the strategies of their
/// parents, which come first within each stage.
#[derive(Default)]
pub struct StagedStrategyChain {
    parent: Option<Arc<StagedStrategyChain>>,
    stages: RwLock<[Vec<BuilderStrategyPtr>; 7]>,
}

impl StagedStrategyChain {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_parent(parent: Arc<StagedStrategyChain>) -> Self {
        Self {
            parent: Some(parent),
            stages: Default::default(),
        }
    }

    /// Adds a strategy at the end of the given stage.
    pub fn add(&self, stage: Stage, strategy: BuilderStrategyPtr) {
        self.stages.write()[stage.index()].push(strategy);
    }

    /// Snapshots current definitions into an executable chain.
    pub fn make_strategy_chain(&self) -> StrategyChain {
        let mut strategies = vec![];
        for stage in Stage::ALL {
            self.fill_stage(stage, &mut strategies);
        }

        StrategyChain {
            strategies: strategies.into(),
        }
    }

    fn fill_stage(&self, stage: Stage, strategies: &mut Vec<BuilderStrategyPtr>) {
        if let Some(parent) = &self.parent {
            parent.fill_stage(stage, strategies);
        }

        strategies.extend(self.stages.read()[stage.index()].iter().cloned());
    }
}

/// Immutable, ordered list of strategies used by a single build.
#[derive(Clone)]
pub struct StrategyChain {
    strategies: Arc<[BuilderStrategyPtr]>,
}

impl StrategyChain {
    #[inline]
    pub fn strategies(&self) -> &[BuilderStrategyPtr] {
        &self.strategies
    }

    /// Runs pre-build hooks in order until the build is complete, then post-build hooks of the
    /// strategies which ran, in reverse order.
    pub fn execute_build_up(&self, context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        let mut executed = 0;
        for strategy in self.strategies.iter() {
            if context.is_build_complete() {
                break;
            }

            strategy.pre_build(context)?;
            executed += 1;
        }

        for strategy in self.strategies[..executed].iter().rev() {
            strategy.post_build(context)?;
        }

        Ok(())
    }

    /// Runs pre-tear-down hooks in reverse stage order, then post-tear-down hooks in stage order.
    pub fn execute_tear_down(&self, context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        for strategy in self.strategies.iter().rev() {
            strategy.pre_tear_down(context)?;
        }

        for strategy in self.strategies.iter() {
            strategy.post_tear_down(context)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::strategy::{BuilderStrategy, BuilderStrategyPtr, StagedStrategyChain, Stage};
    use std::sync::Arc;

    struct Marker;

    impl BuilderStrategy for Marker {}

    fn marker() -> BuilderStrategyPtr {
        Arc::new(Marker)
    }

    #[test]
    fn should_order_strategies_by_stage() {
        let chain = StagedStrategyChain::new();
        let creation = marker();
        let mapping = marker();
        let setup = marker();

        chain.add(Stage::Creation, creation.clone());
        chain.add(Stage::TypeMapping, mapping.clone());
        chain.add(Stage::Setup, setup.clone());

        let snapshot = chain.make_strategy_chain();
        let strategies = snapshot.strategies();

        assert_eq!(strategies.len(), 3);
        assert!(Arc::ptr_eq(&strategies[0], &setup));
        assert!(Arc::ptr_eq(&strategies[1], &mapping));
        assert!(Arc::ptr_eq(&strategies[2], &creation));
    }

    #[test]
    fn should_put_parent_strategies_first_within_stage() {
        let parent = Arc::new(StagedStrategyChain::new());
        let child = StagedStrategyChain::with_parent(parent.clone());

        let child_creation = marker();
        let parent_creation = marker();
        let parent_lifetime = marker();

        child.add(Stage::Creation, child_creation.clone());
        parent.add(Stage::Creation, parent_creation.clone());
        parent.add(Stage::Lifetime, parent_lifetime.clone());

        let snapshot = child.make_strategy_chain();
        let strategies = snapshot.strategies();

        assert_eq!(strategies.len(), 3);
        assert!(Arc::ptr_eq(&strategies[0], &parent_lifetime));
        assert!(Arc::ptr_eq(&strategies[1], &parent_creation));
        assert!(Arc::ptr_eq(&strategies[2], &child_creation));
        assert_eq!(parent.make_strategy_chain().strategies().len(), 2);
    }

    #[test]
    fn should_not_change_snapshot_after_adding() {
        let chain = StagedStrategyChain::new();
        chain.add(Stage::Creation, marker());

        let snapshot = chain.make_strategy_chain();
        chain.add(Stage::Creation, marker());

        assert_eq!(snapshot.strategies().len(), 1);
    }
}
