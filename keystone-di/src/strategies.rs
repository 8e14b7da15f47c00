//! Built-in strategies, installed by [DefaultStrategies](crate::extension::DefaultStrategies):
//!
//! | Stage            | Strategy                                                      |
//! |------------------|---------------------------------------------------------------|
//! | `TypeMapping`    | [BuildKeyMappingStrategy]                                     |
//! | `Lifetime`       | [HierarchicalLifetimeStrategy], [LifetimeStrategy]            |
//! | `Creation`       | [ArrayResolutionStrategy], [ConstructionStrategy]             |
//! | `Initialization` | [PropertyInjectionStrategy], [MethodInjectionStrategy]        |

use crate::build_key::BuildKey;
use crate::context::{BuildMode, BuilderContext, Existing, PartialInstance};
use crate::descriptor::Arguments;
use crate::error::BuildError;
use crate::injection::FactoryPolicy;
use crate::instance::Instance;
use crate::lifetime::{
    LifetimeFactoryPolicy, LifetimeKind, LifetimeManager, LifetimeManagerPtr,
    PerResolveLifetimeManager,
};
use crate::mapping::BuildKeyMappingPolicy;
use crate::strategy::BuilderStrategy;
use crate::trace::Operation;
use std::sync::Arc;
use tracing::trace;

fn is_new_resolve(context: &BuilderContext<'_>) -> bool {
    context.mode() == BuildMode::Resolve && context.existing().is_none()
}

/// Replaces the key being built according to its [BuildKeyMappingPolicy].
#[derive(Default)]
pub struct BuildKeyMappingStrategy;

impl BuilderStrategy for BuildKeyMappingStrategy {
    fn pre_build(&self, context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        if !is_new_resolve(context) {
            return Ok(());
        }

        if let Some(found) = context
            .policies()
            .get_no_default::<dyn BuildKeyMappingPolicy>(context.build_key())
        {
            let mapped = found.policy.map(context.build_key(), context.catalog())?;
            trace!(from = %context.build_key(), to = %mapped, "Mapping build key.");
            context.map_build_key(mapped)?;
        }

        Ok(())
    }
}

/// Gives child containers their own instances of hierarchical registrations inherited from
/// ancestors, by placing a fresh manager in the policies of the resolving container.
#[derive(Default)]
pub struct HierarchicalLifetimeStrategy;

impl BuilderStrategy for HierarchicalLifetimeStrategy {
    fn pre_build(&self, context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        if !is_new_resolve(context) {
            return Ok(());
        }

        if let Some(found) = context
            .policies()
            .get_no_default::<dyn LifetimeManager>(context.build_key())
        {
            let persistent = context.persistent_policies();
            if found.policy.kind() == LifetimeKind::Hierarchical && found.layer != persistent.id()
            {
                let (manager, created) = persistent
                    .set_if_absent(context.build_key().clone(), || found.policy.new_instance());
                if created {
                    trace!(key = %context.build_key(), "Localizing hierarchical lifetime.");
                    context.lifetime().add_manager(manager);
                }
            }
        }

        Ok(())
    }
}

/// Reuses instances held by lifetime managers and stores newly built ones.
#[derive(Default)]
pub struct LifetimeStrategy;

impl LifetimeStrategy {
    fn manager(&self, context: &BuilderContext<'_>) -> Option<LifetimeManagerPtr> {
        let key = context.build_key();
        if let Some(found) = context.policies().get_no_default::<dyn LifetimeManager>(key) {
            return Some(found.policy);
        }

        let factory = context
            .policies()
            .get_no_default::<LifetimeFactoryPolicy>(key)?
            .policy;

        let (policies, lifetime) = match factory.owner() {
            Some(owner) if factory.kind() != LifetimeKind::Hierarchical => owner,
            _ => (
                context.persistent_policies().clone(),
                context.lifetime().clone(),
            ),
        };

        let (manager, created) =
            policies.set_if_absent::<dyn LifetimeManager>(key.clone(), || factory.new_manager());
        if created {
            trace!(%key, kind = ?manager.kind(), "Creating lifetime manager from factory.");
            lifetime.add_manager(manager.clone());
        }

        Some(manager)
    }

    fn complete_with(&self, context: &mut BuilderContext<'_>, instance: Instance) {
        trace!(key = %context.build_key(), "Using instance held by lifetime manager.");
        context.set_existing(Existing::Built(instance));
        context.set_build_complete(true);
    }
}

impl BuilderStrategy for LifetimeStrategy {
    fn pre_build(&self, context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        if !is_new_resolve(context) {
            return Ok(());
        }

        let manager = match self.manager(context) {
            Some(manager) => manager,
            None => return Ok(()),
        };

        if let Some(instance) = manager.get_value() {
            self.complete_with(context, instance);
            return Ok(());
        }

        if let Some(guard) = manager.begin_build() {
            // another thread might have stored the value while we were waiting for the lock
            if let Some(instance) = manager.get_value() {
                drop(guard);
                self.complete_with(context, instance);
                return Ok(());
            }

            context.hold_lifetime_lock(guard);
        }

        Ok(())
    }

    fn post_build(&self, context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        if context.mode() != BuildMode::Resolve {
            return Ok(());
        }

        if let Some(manager) = self.manager(context) {
            if let Some(instance) = context.seal_existing() {
                if manager.kind() == LifetimeKind::PerResolve {
                    context.resolve_policies().set::<dyn LifetimeManager>(
                        context.build_key().clone(),
                        Arc::new(PerResolveLifetimeManager::with_value(instance)),
                    );
                } else if !manager
                    .get_value()
                    .map(|held| held.is_same(&instance))
                    .unwrap_or(false)
                {
                    manager.set_value(instance);
                }
            }
        }

        context.release_lifetime_lock();
        Ok(())
    }

    fn pre_tear_down(&self, context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        let found = context
            .policies()
            .get_no_default::<dyn LifetimeManager>(context.build_key());

        if let (Some(found), Existing::Built(instance)) = (found, context.existing()) {
            let held = found
                .policy
                .get_value()
                .map(|held| held.is_same(instance))
                .unwrap_or(false);

            if held {
                trace!(key = %context.build_key(), "Removing torn down instance.");
                found
                    .policy
                    .remove_value()
                    .map_err(BuildError::DisposalFailed)?;
            }
        }

        Ok(())
    }
}

/// Resolves array keys as all registrations of their element type, default one included.
#[derive(Default)]
pub struct ArrayResolutionStrategy;

impl BuilderStrategy for ArrayResolutionStrategy {
    fn pre_build(&self, context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        if !is_new_resolve(context) {
            return Ok(());
        }

        let type_info = context.build_key().type_info().clone();
        let shape = match type_info.array_shape() {
            Some(shape) => shape,
            None => return Ok(()),
        };

        let element = shape.element().clone();
        let names = context.named_types().names_of(element.key());
        trace!(%element, count = names.len(), "Resolving array.");

        let mut values = Vec::with_capacity(names.len());
        for name in names {
            let instance = context.resolve_key(BuildKey::new(element.clone(), name))?;
            values.push(context.catalog().convert(&element, &instance)?);
        }

        let incompatible = || BuildError::IncompatibleInstance {
            requested: type_info.name().to_string(),
            actual: element.name().to_string(),
        };

        let type_id = type_info.type_id().ok_or_else(incompatible)?;
        let array = shape.collect(values).ok_or_else(incompatible)?;

        context.set_existing(Existing::Built(Instance::from_parts(
            array,
            type_id,
            type_info.name(),
            None,
        )));
        context.set_build_complete(true);
        Ok(())
    }
}

/// Creates new instances with a [FactoryPolicy] or the constructor selected by the build plan.
#[derive(Default)]
pub struct ConstructionStrategy;

impl BuilderStrategy for ConstructionStrategy {
    fn pre_build(&self, context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        if !is_new_resolve(context) {
            return Ok(());
        }

        if let Some(found) = context
            .policies()
            .get_no_default::<FactoryPolicy>(context.build_key())
        {
            context.set_operation(Operation::InvokingFactory {
                type_name: context.build_key().type_info().name(),
            });

            let instance = found.policy.create(context)?;
            trace!(key = %context.build_key(), "Created instance with factory.");

            context.clear_operation();
            context.set_existing(Existing::Built(instance));
            return Ok(());
        }

        let plan = context.build_plan()?;
        let constructor = plan.constructor()?;

        let mut arguments = Vec::with_capacity(constructor.parameters.len());
        for parameter in &constructor.parameters {
            context.set_operation(Operation::ResolvingConstructorParameter {
                constructor: constructor.signature.clone(),
                parameter: parameter.name,
            });
            arguments.push((parameter.name, context.resolve_dependency(&parameter.value)?));
        }

        context.set_operation(Operation::InvokingConstructor {
            constructor: constructor.signature.clone(),
        });

        let value = (constructor.construct)(&mut Arguments::new(arguments))
            .map_err(BuildError::ConstructionFailed)?;
        trace!(key = %context.build_key(), "Constructed instance.");

        context.clear_operation();

        let descriptor = plan.descriptor();
        context.set_existing(Existing::Building(PartialInstance::from_parts(
            value,
            descriptor.type_id(),
            descriptor.type_name(),
            descriptor.dispose(),
        )));
        Ok(())
    }
}

/// Injects properties selected by the build plan into instances still being built.
#[derive(Default)]
pub struct PropertyInjectionStrategy;

impl BuilderStrategy for PropertyInjectionStrategy {
    fn pre_build(&self, context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        if !matches!(context.existing(), Existing::Building(_)) {
            return Ok(());
        }

        let plan = context.build_plan()?;
        let type_name = plan.descriptor().type_name();
        for property in plan.properties()? {
            context.set_operation(Operation::ResolvingProperty {
                type_name,
                property: property.name,
            });
            let value = context.resolve_dependency(&property.value)?;

            context.set_operation(Operation::SettingProperty {
                type_name,
                property: property.name,
            });
            if let Existing::Building(partial) = context.existing_mut() {
                property
                    .set(partial.value_mut(), value)
                    .map_err(BuildError::ConstructionFailed)?;
            }
        }

        context.clear_operation();
        Ok(())
    }
}

/// Calls methods selected by the build plan on instances still being built.
#[derive(Default)]
pub struct MethodInjectionStrategy;

impl BuilderStrategy for MethodInjectionStrategy {
    fn pre_build(&self, context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        if !matches!(context.existing(), Existing::Building(_)) {
            return Ok(());
        }

        let plan = context.build_plan()?;
        for method in plan.methods()? {
            let mut arguments = Vec::with_capacity(method.parameters.len());
            for parameter in &method.parameters {
                context.set_operation(Operation::ResolvingMethodParameter {
                    method: method.signature.clone(),
                    parameter: parameter.name,
                });
                arguments.push((parameter.name, context.resolve_dependency(&parameter.value)?));
            }

            context.set_operation(Operation::InvokingMethod {
                method: method.signature.clone(),
            });
            if let Existing::Building(partial) = context.existing_mut() {
                (method.invoke)(partial.value_mut(), &mut Arguments::new(arguments))
                    .map_err(BuildError::ConstructionFailed)?;
            }
        }

        context.clear_operation();
        Ok(())
    }
}
