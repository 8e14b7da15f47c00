//! Interception wraps resolved instances in proxies which route calls through a pipeline of
//! [CallHandler]s. Proxies are written by hand for each intercepted service:
//!
//! ```
//! use keystone_di::container::{Container, RegistrationOptions};
//! use keystone_di::descriptor::{Buildable, Constructor, TypeDescriptor};
//! use keystone_di::instance::{ErrorPtr, InstancePtr};
//! use keystone_di::interception::{HandlerPipeline, Interception, Invocation};
//! use keystone_di::{alias, injectable};
//! use std::sync::Arc;
//!
//! trait Calculator {
//!     fn add(&self, a: i32, b: i32) -> Result<i32, ErrorPtr>;
//! }
//!
//! struct SimpleCalculator;
//!
//! impl Calculator for SimpleCalculator {
//!     fn add(&self, a: i32, b: i32) -> Result<i32, ErrorPtr> {
//!         Ok(a + b)
//!     }
//! }
//!
//! struct CalculatorProxy {
//!     target: InstancePtr<dyn Calculator + Send + Sync>,
//!     pipeline: Arc<HandlerPipeline>,
//! }
//!
//! impl Calculator for CalculatorProxy {
//!     fn add(&self, a: i32, b: i32) -> Result<i32, ErrorPtr> {
//!         self.pipeline.invoke(&Invocation::new("Calculator", "add"), || self.target.add(a, b))
//!     }
//! }
//!
//! fn calculator_proxy(
//!     target: InstancePtr<dyn Calculator + Send + Sync>,
//!     pipeline: Arc<HandlerPipeline>,
//! ) -> InstancePtr<dyn Calculator + Send + Sync> {
//!     Arc::new(CalculatorProxy { target, pipeline })
//! }
//!
//! injectable!(dyn Calculator + Send + Sync, SimpleCalculator);
//! alias!(dyn Calculator + Send + Sync => SimpleCalculator);
//!
//! impl Buildable for SimpleCalculator {
//!     fn descriptor() -> TypeDescriptor<Self> {
//!         TypeDescriptor::new().constructor(Constructor::new(vec![], |_| Ok(SimpleCalculator)))
//!     }
//! }
//!
//! let container = Container::new();
//! container.add_extension(Interception);
//! container
//!     .register_type::<dyn Calculator + Send + Sync, SimpleCalculator>(RegistrationOptions::new())
//!     .unwrap();
//! container
//!     .register_interception::<dyn Calculator + Send + Sync>(None, vec![], calculator_proxy)
//!     .unwrap();
//!
//! let calculator = container.resolve::<dyn Calculator + Send + Sync>().unwrap();
//! assert_eq!(calculator.add(2, 3).unwrap(), 5);
//! ```

use crate::build_key::{BuildKey, Injectable};
use crate::container::Container;
use crate::context::{BuildMode, BuilderContext, Existing};
use crate::error::{BuildError, RegistrationError};
use crate::extension::{ContainerExtension, ExtensionContext};
use crate::instance::{unwrap_cast, ErrorPtr, Instance, InstancePtr};
use crate::registry::TypeCatalog;
use crate::strategy::{BuilderStrategy, Stage};
use std::any::{type_name, Any, TypeId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

pub type InvocationResult = Result<Box<dyn Any + Send>, ErrorPtr>;

pub type CallHandlerPtr = Arc<dyn CallHandler>;

/// Describes an intercepted call.
#[derive(Clone, Debug)]
pub struct Invocation {
    type_name: &'static str,
    method: &'static str,
}

impl Invocation {
    pub fn new(type_name: &'static str, method: &'static str) -> Self {
        Self { type_name, method }
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[inline]
    pub fn method(&self) -> &'static str {
        self.method
    }
}

#[derive(Error, Clone, Debug)]
pub enum InterceptionError {
    #[error("The target of {0} has already been invoked")]
    TargetAlreadyInvoked(String),
    #[error("A call handler returned an unexpected value from {method} - expected {expected}")]
    UnexpectedReturnType { method: String, expected: String },
}

/// Step of the interception pipeline. Handlers call `next` to continue the pipeline or return
/// their own result to short-circuit it.
pub trait CallHandler: Send + Sync {
    fn invoke(
        &self,
        invocation: &Invocation,
        next: &mut dyn FnMut() -> InvocationResult,
    ) -> InvocationResult;
}

/// Ordered handlers applied to calls of intercepted instances.
#[derive(Default)]
pub struct HandlerPipeline {
    handlers: Vec<CallHandlerPtr>,
}

impl HandlerPipeline {
    pub fn new(handlers: Vec<CallHandlerPtr>) -> Self {
        Self { handlers }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handlers, with the target call at the end of the pipeline.
    pub fn invoke<R, F>(&self, invocation: &Invocation, target: F) -> Result<R, ErrorPtr>
    where
        R: Send + 'static,
        F: FnOnce() -> Result<R, ErrorPtr>,
    {
        let mut target = Some(target);
        let mut call = || -> InvocationResult {
            match target.take() {
                Some(target) => target().map(|result| Box::new(result) as Box<dyn Any + Send>),
                None => Err(Arc::new(InterceptionError::TargetAlreadyInvoked(
                    invocation.method.to_string(),
                ))),
            }
        };

        self.invoke_at(0, invocation, &mut call)?
            .downcast::<R>()
            .map(|result| *result)
            .map_err(|_| {
                Arc::new(InterceptionError::UnexpectedReturnType {
                    method: invocation.method.to_string(),
                    expected: type_name::<R>().to_string(),
                }) as ErrorPtr
            })
    }

    fn invoke_at(
        &self,
        index: usize,
        invocation: &Invocation,
        target: &mut dyn FnMut() -> InvocationResult,
    ) -> InvocationResult {
        match self.handlers.get(index) {
            Some(handler) => handler.invoke(invocation, &mut || {
                self.invoke_at(index + 1, invocation, &mut *target)
            }),
            None => target(),
        }
    }
}

type InterceptFunction =
    dyn Fn(&Instance, &TypeCatalog, &Arc<HandlerPipeline>) -> Result<Instance, BuildError>
        + Send
        + Sync;

/// Wraps instances resolved for a key in proxies.
pub struct InterceptionPolicy {
    pipeline: Arc<HandlerPipeline>,
    intercept: Box<InterceptFunction>,
}

impl InterceptionPolicy {
    pub fn new<S: Injectable + ?Sized>(
        pipeline: HandlerPipeline,
        proxy: fn(InstancePtr<S>, Arc<HandlerPipeline>) -> InstancePtr<S>,
    ) -> Self {
        let intercept = move |instance: &Instance,
                              catalog: &TypeCatalog,
                              pipeline: &Arc<HandlerPipeline>|
         -> Result<Instance, BuildError> {
            let target = catalog
                .convert(&S::type_info(), instance)?
                .downcast::<InstancePtr<S>>()
                .map(|target| *target)
                .map_err(|_| BuildError::IncompatibleValue {
                    expected: type_name::<InstancePtr<S>>().to_string(),
                    slot: format!("interception of {}", type_name::<S>()),
                })?;

            Ok(Instance::shared(proxy(target, pipeline.clone())))
        };

        Self {
            pipeline: Arc::new(pipeline),
            intercept: Box::new(intercept),
        }
    }

    pub fn intercept(
        &self,
        instance: &Instance,
        catalog: &TypeCatalog,
    ) -> Result<Instance, BuildError> {
        (self.intercept)(instance, catalog, &self.pipeline)
    }
}

/// Replaces newly built instances with proxies. Runs as the first post-build hook, so lifetime
/// managers store the proxy in place of the original instance. Instances reused by a lifetime
/// manager complete the build early and never reach this strategy.
#[derive(Default)]
pub struct InterceptionStrategy;

impl BuilderStrategy for InterceptionStrategy {
    fn post_build(&self, context: &mut BuilderContext<'_>) -> Result<(), BuildError> {
        if context.mode() != BuildMode::Resolve {
            return Ok(());
        }

        let found = context
            .policies()
            .get_no_default::<InterceptionPolicy>(context.original_build_key());
        if let Some(found) = found {
            if let Some(instance) = context.seal_existing() {
                let proxy = found.policy.intercept(&instance, context.catalog())?;
                trace!(key = %context.original_build_key(), "Intercepting instance.");
                context.set_existing(Existing::Built(proxy));
            }
        }

        Ok(())
    }
}

/// Enables interception of instances registered with
/// [register_interception](Container::register_interception).
#[derive(Default)]
pub struct Interception;

impl ContainerExtension for Interception {
    fn initialize(&self, context: &mut ExtensionContext<'_>) {
        context.add_strategy(Stage::PostInitialization, Arc::new(InterceptionStrategy));
    }
}

impl Container {
    /// Intercepts instances resolved as `S` with the given name, by wrapping them with the given
    /// proxy function. Requires the [Interception] extension.
    pub fn register_interception<S: Injectable + ?Sized>(
        &self,
        name: Option<&str>,
        handlers: Vec<CallHandlerPtr>,
        proxy: fn(InstancePtr<S>, Arc<HandlerPipeline>) -> InstancePtr<S>,
    ) -> Result<(), RegistrationError> {
        self.check_disposed()?;

        let key = BuildKey::new(S::type_info(), name.map(str::to_string));
        let inner = self.inner();
        inner.catalog.add_cast(
            S::type_info().key(),
            TypeId::of::<InstancePtr<S>>(),
            unwrap_cast::<S>,
        );
        inner.policies.set(
            key.clone(),
            Arc::new(InterceptionPolicy::new(HandlerPipeline::new(handlers), proxy)),
        );
        inner.catalog.bump();

        debug!(%key, "Registered interception.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::instance::ErrorPtr;
    use crate::interception::{
        CallHandler, HandlerPipeline, InterceptionError, Invocation, InvocationResult,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Recorder {
        id: u8,
        calls: Arc<Mutex<Vec<u8>>>,
    }

    impl CallHandler for Recorder {
        fn invoke(
            &self,
            _invocation: &Invocation,
            next: &mut dyn FnMut() -> InvocationResult,
        ) -> InvocationResult {
            self.calls.lock().push(self.id);
            next()
        }
    }

    struct ShortCircuit;

    impl CallHandler for ShortCircuit {
        fn invoke(
            &self,
            _invocation: &Invocation,
            _next: &mut dyn FnMut() -> InvocationResult,
        ) -> InvocationResult {
            Ok(Box::new(42i32))
        }
    }

    struct Twice;

    impl CallHandler for Twice {
        fn invoke(
            &self,
            _invocation: &Invocation,
            next: &mut dyn FnMut() -> InvocationResult,
        ) -> InvocationResult {
            next()?;
            next()
        }
    }

    #[test]
    fn should_run_handlers_in_order() {
        let calls = Arc::new(Mutex::new(vec![]));
        let pipeline = HandlerPipeline::new(vec![
            Arc::new(Recorder {
                id: 1,
                calls: calls.clone(),
            }),
            Arc::new(Recorder {
                id: 2,
                calls: calls.clone(),
            }),
        ]);

        let result = pipeline
            .invoke(&Invocation::new("Calculator", "add"), || {
                Ok::<_, ErrorPtr>(5)
            })
            .unwrap();

        assert_eq!(result, 5);
        assert_eq!(*calls.lock(), vec![1, 2]);
    }

    #[test]
    fn should_short_circuit_pipeline() {
        let pipeline = HandlerPipeline::new(vec![Arc::new(ShortCircuit)]);
        let result = pipeline
            .invoke(&Invocation::new("Calculator", "add"), || -> Result<i32, ErrorPtr> {
                panic!("target should not be called")
            })
            .unwrap();

        assert_eq!(result, 42);
    }

    #[test]
    fn should_report_unexpected_return_type() {
        let pipeline = HandlerPipeline::new(vec![Arc::new(ShortCircuit)]);
        let error = pipeline
            .invoke(&Invocation::new("Calculator", "name"), || {
                Ok::<_, ErrorPtr>("name".to_string())
            })
            .unwrap_err();

        assert!(error.downcast_ref::<InterceptionError>().is_some());
    }

    #[test]
    fn should_invoke_target_once() {
        let pipeline = HandlerPipeline::new(vec![Arc::new(Twice)]);
        let error = pipeline
            .invoke(&Invocation::new("Calculator", "add"), || Ok::<_, ErrorPtr>(1))
            .unwrap_err();

        assert!(matches!(
            error.downcast_ref::<InterceptionError>(),
            Some(InterceptionError::TargetAlreadyInvoked(_))
        ));
    }
}
