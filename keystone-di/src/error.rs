use crate::build_key::BuildKey;
use crate::instance::ErrorPtr;
use crate::trace::BuildTrace;
use itertools::Itertools;
use thiserror::Error;

/// Errors related to registering types in a container. Registration errors are configuration
/// errors and are reported immediately.
#[derive(Error, Clone, Debug)]
pub enum RegistrationError {
    #[error("Cannot register {service}: no implementation type, factory or instance was provided")]
    MissingImplementation { service: String },
    #[error("The lifetime manager is already in use by another registration - cannot reuse it for {key}")]
    LifetimeManagerInUse { key: String },
    #[error("Cannot map open generic {service} with {service_arity} type parameter(s) to {implementation} with {implementation_arity}")]
    GenericArityMismatch {
        service: String,
        service_arity: usize,
        implementation: String,
        implementation_arity: usize,
    },
    #[error("Cannot register into a disposed container")]
    ContainerDisposed,
}

/// Errors raised while building an object graph.
#[derive(Error, Clone, Debug)]
pub enum BuildError {
    #[error("The type {type_name} has no build plan - it is neither registered as buildable nor mapped to a buildable type. Are you missing a type mapping?")]
    NoBuildPlan { type_name: String },
    #[error("The type {type_name} does not have an accessible constructor")]
    NoConstructor { type_name: String },
    #[error("The type {type_name} has multiple constructors of length {parameter_count}. Unable to disambiguate.")]
    AmbiguousConstructor {
        type_name: String,
        parameter_count: usize,
    },
    #[error("The type {type_name} has multiple constructors marked for injection")]
    MultipleInjectionConstructors { type_name: String },
    #[error("The type {type_name} does not have a constructor that takes the parameters ({signature})")]
    NoMatchingConstructor { type_name: String, signature: String },
    #[error("The type {type_name} does not contain a property named {property}")]
    UnknownProperty { type_name: String, property: String },
    #[error("The property {property} on type {type_name} is not settable")]
    PropertyNotSettable { type_name: String, property: String },
    #[error("The type {type_name} does not have a method {method} taking the given parameters")]
    UnknownMethod { type_name: String, method: String },
    #[error("The method {type_name}.{method} is not a legal injection target: {reason}")]
    IllegalInjectionMethod {
        type_name: String,
        method: String,
        reason: String,
    },
    #[error("The generic type {type_name} has {actual} type argument(s), but the mapped definition expects {expected}")]
    GenericArityMismatch {
        type_name: String,
        expected: usize,
        actual: usize,
    },
    #[error("The generic definition {definition} has no registered closure for type arguments <{arguments}>")]
    MissingClosedGeneric {
        definition: String,
        arguments: String,
    },
    #[error("Dependency cycle detected while building {key}")]
    DependencyCycle { key: String },
    #[error("Maximum resolution depth of {depth} exceeded")]
    DepthExceeded { depth: usize },
    #[error("Expected a value of type {expected} for {slot}")]
    IncompatibleValue { expected: String, slot: String },
    #[error("Cannot use an instance of {actual} as {requested}")]
    IncompatibleInstance { requested: String, actual: String },
    #[error("{0}")]
    ConstructionFailed(ErrorPtr),
    #[error("Error disposing an instance: {0}")]
    DisposalFailed(ErrorPtr),
    #[error("The container has been disposed")]
    ContainerDisposed,
}

impl BuildError {
    /// Returns the most specific error - user errors wrapping nested build errors are unwrapped.
    pub fn innermost(&self) -> &BuildError {
        match self {
            BuildError::ConstructionFailed(error) => error
                .downcast_ref::<BuildError>()
                .map(BuildError::innermost)
                .unwrap_or(self),
            _ => self,
        }
    }

    /// Name of the error variant, used when rendering failure reports.
    pub fn kind_name(&self) -> &'static str {
        match self {
            BuildError::NoBuildPlan { .. } => "NoBuildPlan",
            BuildError::NoConstructor { .. } => "NoConstructor",
            BuildError::AmbiguousConstructor { .. } => "AmbiguousConstructor",
            BuildError::MultipleInjectionConstructors { .. } => "MultipleInjectionConstructors",
            BuildError::NoMatchingConstructor { .. } => "NoMatchingConstructor",
            BuildError::UnknownProperty { .. } => "UnknownProperty",
            BuildError::PropertyNotSettable { .. } => "PropertyNotSettable",
            BuildError::UnknownMethod { .. } => "UnknownMethod",
            BuildError::IllegalInjectionMethod { .. } => "IllegalInjectionMethod",
            BuildError::GenericArityMismatch { .. } => "GenericArityMismatch",
            BuildError::MissingClosedGeneric { .. } => "MissingClosedGeneric",
            BuildError::DependencyCycle { .. } => "DependencyCycle",
            BuildError::DepthExceeded { .. } => "DepthExceeded",
            BuildError::IncompatibleValue { .. } => "IncompatibleValue",
            BuildError::IncompatibleInstance { .. } => "IncompatibleInstance",
            BuildError::ConstructionFailed(_) => "ConstructionFailed",
            BuildError::DisposalFailed(_) => "DisposalFailed",
            BuildError::ContainerDisposed => "ContainerDisposed",
        }
    }
}

/// The single failure type surfaced by resolve calls. Wraps the original [BuildError] as its
/// source and carries the build trace captured at the point of failure.
#[derive(Error, Clone, Debug)]
#[error("Resolution of the dependency failed, type = \"{type_name}\", name = \"{name}\".\nException occurred while: {operation}.\nException is: {kind} - {message}\n-----------------------------------------------\nAt the time of the exception, the container was:\n{trace}")]
pub struct ResolutionFailedError {
    type_name: String,
    name: String,
    operation: String,
    kind: &'static str,
    message: String,
    trace: BuildTrace,
    source: BuildError,
}

impl ResolutionFailedError {
    pub(crate) fn new(requested: &BuildKey, trace: BuildTrace, source: BuildError) -> Self {
        let innermost = source.innermost();
        Self {
            type_name: requested.type_info().name().to_string(),
            name: requested.name().unwrap_or("(none)").to_string(),
            operation: trace
                .innermost_operation()
                .map(|operation| operation.to_string())
                .unwrap_or_else(|| "while resolving".to_string()),
            kind: innermost.kind_name(),
            message: innermost.to_string(),
            trace,
            source,
        }
    }

    /// Requested type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Requested registration name, or `(none)` for the default registration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Trace of the build key chain at the time of failure.
    pub fn trace(&self) -> &BuildTrace {
        &self.trace
    }

    /// The original error.
    pub fn error(&self) -> &BuildError {
        &self.source
    }

    /// The most specific error, unwrapped from nested factory failures.
    pub fn innermost(&self) -> &BuildError {
        self.source.innermost()
    }
}

/// Errors collected while disposing a container. Disposal is best-effort: a failing disposable
/// does not prevent its siblings from being disposed.
#[derive(Error, Clone, Debug)]
#[error("{} error(s) occurred while disposing: {}", .errors.len(), .errors.iter().join("; "))]
pub struct DisposeError {
    pub errors: Vec<ErrorPtr>,
}
