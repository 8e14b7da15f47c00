//! Diagnostic records of in-progress builds. Every build pushes a [BuildFrame] on an explicit frame
//! stack and the first failure snapshots the stack into a [BuildTrace], so that errors can describe
//! the whole chain of keys which led to them.

use crate::build_key::BuildKey;
use std::fmt::{Display, Formatter};

/// Operation in progress while building a key.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Operation {
    ResolvingConstructorParameter {
        constructor: String,
        parameter: &'static str,
    },
    InvokingConstructor {
        constructor: String,
    },
    ResolvingProperty {
        type_name: &'static str,
        property: &'static str,
    },
    SettingProperty {
        type_name: &'static str,
        property: &'static str,
    },
    ResolvingMethodParameter {
        method: String,
        parameter: &'static str,
    },
    InvokingMethod {
        method: String,
    },
    InvokingFactory {
        type_name: &'static str,
    },
}

impl Operation {
    /// Name of the constructor or method parameter being resolved.
    pub fn parameter_name(&self) -> Option<&'static str> {
        match self {
            Operation::ResolvingConstructorParameter { parameter, .. }
            | Operation::ResolvingMethodParameter { parameter, .. } => Some(parameter),
            _ => None,
        }
    }

    /// Name of the property being resolved or set.
    pub fn property_name(&self) -> Option<&'static str> {
        match self {
            Operation::ResolvingProperty { property, .. }
            | Operation::SettingProperty { property, .. } => Some(property),
            _ => None,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::ResolvingConstructorParameter {
                constructor,
                parameter,
            } => write!(
                f,
                "Resolving parameter \"{parameter}\" of constructor {constructor}"
            ),
            Operation::InvokingConstructor { constructor } => {
                write!(f, "Calling constructor {constructor}")
            }
            Operation::ResolvingProperty {
                type_name,
                property,
            } => write!(f, "Resolving value for property {type_name}.{property}"),
            Operation::SettingProperty {
                type_name,
                property,
            } => write!(f, "Setting value for property {type_name}.{property}"),
            Operation::ResolvingMethodParameter { method, parameter } => {
                write!(f, "Resolving parameter \"{parameter}\" of method {method}")
            }
            Operation::InvokingMethod { method } => write!(f, "Calling method {method}"),
            Operation::InvokingFactory { type_name } => {
                write!(f, "Calling factory of {type_name}")
            }
        }
    }
}

/// A single level of the build chain.
#[derive(Clone, Debug)]
pub struct BuildFrame {
    pub(crate) requested: BuildKey,
    pub(crate) mapped: Option<BuildKey>,
    pub(crate) operation: Option<Operation>,
}

impl BuildFrame {
    pub(crate) fn new(requested: BuildKey) -> Self {
        Self {
            requested,
            mapped: None,
            operation: None,
        }
    }

    /// Key requested at this level.
    #[inline]
    pub fn requested(&self) -> &BuildKey {
        &self.requested
    }

    /// Key the requested one was mapped to, if any mapping took place.
    #[inline]
    pub fn mapped(&self) -> Option<&BuildKey> {
        self.mapped.as_ref()
    }

    #[inline]
    pub fn operation(&self) -> Option<&Operation> {
        self.operation.as_ref()
    }
}

/// Snapshot of the build chain at the time of a failure, outermost frame first.
#[derive(Clone, Debug, Default)]
pub struct BuildTrace {
    frames: Vec<BuildFrame>,
}

impl BuildTrace {
    pub(crate) fn new(frames: Vec<BuildFrame>) -> Self {
        Self { frames }
    }

    #[inline]
    pub fn frames(&self) -> &[BuildFrame] {
        &self.frames
    }

    /// The operation closest to the failure.
    pub fn innermost_operation(&self) -> Option<&Operation> {
        self.frames.iter().rev().find_map(BuildFrame::operation)
    }
}

impl Display for BuildTrace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (depth, frame) in self.frames.iter().enumerate() {
            let indent = "  ".repeat(depth + 1);
            match &frame.mapped {
                Some(mapped) if mapped != &frame.requested => writeln!(
                    f,
                    "{indent}Resolving {mapped} (mapped from {})",
                    frame.requested
                )?,
                _ => writeln!(f, "{indent}Resolving {}", frame.requested)?,
            }

            if let Some(operation) = &frame.operation {
                writeln!(f, "{indent}{operation}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::build_key::BuildKey;
    use crate::trace::{BuildFrame, BuildTrace, Operation};

    struct Logger;
    struct ConsoleLogger;
    struct Service;

    crate::injectable!(Logger, ConsoleLogger, Service);

    #[test]
    fn should_render_mappings_and_operations() {
        let mut service = BuildFrame::new(BuildKey::of::<Service>());
        service.operation = Some(Operation::ResolvingConstructorParameter {
            constructor: "Service(logger: Logger)".to_string(),
            parameter: "logger",
        });

        let mut logger = BuildFrame::new(BuildKey::of::<Logger>());
        logger.mapped = Some(BuildKey::of::<ConsoleLogger>());

        let trace = BuildTrace::new(vec![service, logger]);
        let rendered = trace.to_string();

        assert!(rendered.contains("Resolving parameter \"logger\" of constructor"));
        assert!(rendered.contains("ConsoleLogger,(none) (mapped from"));
        assert_eq!(
            trace
                .innermost_operation()
                .and_then(Operation::parameter_name),
            Some("logger")
        );
    }

    #[test]
    fn should_report_property_names() {
        let operation = Operation::SettingProperty {
            type_name: "Service",
            property: "logger",
        };

        assert_eq!(operation.property_name(), Some("logger"));
        assert_eq!(operation.parameter_name(), None);
    }
}
