//! Selectors decide which parts of a [BuildDescriptor] are used when building: the constructor,
//! properties to inject and methods to call. Default selectors use the injection markers of the
//! descriptor, while specified selectors are installed by
//! [injection members](crate::injection) to choose parts by name and parameter types.

use crate::descriptor::{
    BuildDescriptor, ConstructFunction, ConstructorInfo, InvokeFunction, MethodInfo,
    ParameterInfo, PropertyInfo, SetterFunction,
};
use crate::error::BuildError;
use crate::instance::{ErrorPtr, Value};
use crate::resolution::InjectionValue;
use itertools::Itertools;
use std::any::Any;
use std::sync::Arc;

/// A dependency slot chosen for injection.
#[derive(Clone)]
pub struct SelectedParameter {
    pub name: &'static str,
    pub value: InjectionValue,
}

impl SelectedParameter {
    fn from_info(parameter: &ParameterInfo) -> Self {
        Self {
            name: parameter.name(),
            value: parameter.value().clone(),
        }
    }
}

#[derive(Clone)]
pub struct SelectedConstructor {
    pub signature: String,
    pub parameters: Vec<SelectedParameter>,
    pub construct: Arc<ConstructFunction>,
}

impl SelectedConstructor {
    fn new(constructor: &ConstructorInfo, values: Option<&[InjectionValue]>) -> Self {
        Self {
            signature: constructor.signature(),
            parameters: select_parameters(constructor.parameters(), values),
            construct: constructor.construct().clone(),
        }
    }
}

#[derive(Clone)]
pub struct SelectedProperty {
    pub name: &'static str,
    pub value: InjectionValue,
    setter: Arc<SetterFunction>,
}

impl SelectedProperty {
    pub fn set(&self, target: &mut (dyn Any + Send + Sync), value: Value) -> Result<(), ErrorPtr> {
        (self.setter)(target, value)
    }
}

#[derive(Clone)]
pub struct SelectedMethod {
    pub name: &'static str,
    pub signature: String,
    pub parameters: Vec<SelectedParameter>,
    pub invoke: Arc<InvokeFunction>,
}

fn select_parameters(
    parameters: &[ParameterInfo],
    values: Option<&[InjectionValue]>,
) -> Vec<SelectedParameter> {
    match values {
        Some(values) => parameters
            .iter()
            .zip(values)
            .map(|(parameter, value)| SelectedParameter {
                name: parameter.name(),
                value: value.clone(),
            })
            .collect(),
        None => parameters.iter().map(SelectedParameter::from_info).collect(),
    }
}

fn matches_values(parameters: &[ParameterInfo], values: &[InjectionValue]) -> bool {
    parameters.len() == values.len()
        && parameters
            .iter()
            .zip(values)
            .all(|(parameter, value)| parameter.value().value_type() == value.value_type())
}

fn value_signature(values: &[InjectionValue]) -> String {
    values.iter().map(InjectionValue::value_type_name).join(", ")
}

pub trait ConstructorSelectorPolicy: Send + Sync {
    fn select_constructor(
        &self,
        descriptor: &BuildDescriptor,
    ) -> Result<SelectedConstructor, BuildError>;
}

pub trait PropertySelectorPolicy: Send + Sync {
    fn select_properties(
        &self,
        descriptor: &BuildDescriptor,
    ) -> Result<Vec<SelectedProperty>, BuildError>;
}

pub trait MethodSelectorPolicy: Send + Sync {
    fn select_methods(&self, descriptor: &BuildDescriptor)
        -> Result<Vec<SelectedMethod>, BuildError>;
}

/// Selects the single constructor marked for injection or, if none is marked, the one with the
/// most parameters.
#[derive(Default)]
pub struct DefaultConstructorSelector;

impl ConstructorSelectorPolicy for DefaultConstructorSelector {
    fn select_constructor(
        &self,
        descriptor: &BuildDescriptor,
    ) -> Result<SelectedConstructor, BuildError> {
        let constructors = descriptor.constructors();
        let mut marked = constructors.iter().filter(|constructor| constructor.is_injection());
        if let Some(constructor) = marked.next() {
            if marked.next().is_some() {
                return Err(BuildError::MultipleInjectionConstructors {
                    type_name: descriptor.type_name().to_string(),
                });
            }

            return Ok(SelectedConstructor::new(constructor, None));
        }

        let longest = constructors
            .iter()
            .map(|constructor| constructor.parameters().len())
            .max()
            .ok_or_else(|| BuildError::NoConstructor {
                type_name: descriptor.type_name().to_string(),
            })?;

        let candidates = constructors
            .iter()
            .filter(|constructor| constructor.parameters().len() == longest)
            .collect_vec();

        match candidates.as_slice() {
            [constructor] => Ok(SelectedConstructor::new(constructor, None)),
            _ => Err(BuildError::AmbiguousConstructor {
                type_name: descriptor.type_name().to_string(),
                parameter_count: longest,
            }),
        }
    }
}

/// Selects all properties marked for injection.
#[derive(Default)]
pub struct DefaultPropertySelector;

impl PropertySelectorPolicy for DefaultPropertySelector {
    fn select_properties(
        &self,
        descriptor: &BuildDescriptor,
    ) -> Result<Vec<SelectedProperty>, BuildError> {
        descriptor
            .properties()
            .iter()
            .filter(|property| property.is_injection())
            .map(|property| select_property(descriptor, property, property.value().clone()))
            .try_collect()
    }
}

fn select_property(
    descriptor: &BuildDescriptor,
    property: &PropertyInfo,
    value: InjectionValue,
) -> Result<SelectedProperty, BuildError> {
    let setter = property
        .setter()
        .ok_or_else(|| BuildError::PropertyNotSettable {
            type_name: descriptor.type_name().to_string(),
            property: property.name().to_string(),
        })?;

    Ok(SelectedProperty {
        name: property.name(),
        value,
        setter: setter.clone(),
    })
}

/// Selects all methods marked for injection.
#[derive(Default)]
pub struct DefaultMethodSelector;

impl MethodSelectorPolicy for DefaultMethodSelector {
    fn select_methods(
        &self,
        descriptor: &BuildDescriptor,
    ) -> Result<Vec<SelectedMethod>, BuildError> {
        descriptor
            .methods()
            .iter()
            .filter(|method| method.is_injection())
            .map(|method| select_method(descriptor, method, None))
            .try_collect()
    }
}

fn select_method(
    descriptor: &BuildDescriptor,
    method: &MethodInfo,
    values: Option<&[InjectionValue]>,
) -> Result<SelectedMethod, BuildError> {
    let illegal = |reason: &str| BuildError::IllegalInjectionMethod {
        type_name: descriptor.type_name().to_string(),
        method: method.name().to_string(),
        reason: reason.to_string(),
    };

    if method.is_generic_definition() {
        return Err(illegal("generic method definitions cannot be injected"));
    }

    if method
        .parameters()
        .iter()
        .any(ParameterInfo::is_by_reference)
    {
        return Err(illegal("by-reference parameters cannot be injected"));
    }

    Ok(SelectedMethod {
        name: method.name(),
        signature: method.signature(),
        parameters: select_parameters(method.parameters(), values),
        invoke: method.invoke().clone(),
    })
}

/// Selects the constructor whose parameter value types match the given values.
pub struct SpecifiedConstructorSelector {
    values: Vec<InjectionValue>,
}

impl SpecifiedConstructorSelector {
    pub fn new(values: Vec<InjectionValue>) -> Self {
        Self { values }
    }
}

impl ConstructorSelectorPolicy for SpecifiedConstructorSelector {
    fn select_constructor(
        &self,
        descriptor: &BuildDescriptor,
    ) -> Result<SelectedConstructor, BuildError> {
        descriptor
            .constructors()
            .iter()
            .find(|constructor| matches_values(constructor.parameters(), &self.values))
            .map(|constructor| SelectedConstructor::new(constructor, Some(&self.values)))
            .ok_or_else(|| BuildError::NoMatchingConstructor {
                type_name: descriptor.type_name().to_string(),
                signature: value_signature(&self.values),
            })
    }
}

/// Selects properties by name, optionally replacing their values.
pub struct SpecifiedPropertiesSelector {
    properties: Vec<(String, Option<InjectionValue>)>,
}

impl SpecifiedPropertiesSelector {
    pub fn new(properties: Vec<(String, Option<InjectionValue>)>) -> Self {
        Self { properties }
    }
}

impl PropertySelectorPolicy for SpecifiedPropertiesSelector {
    fn select_properties(
        &self,
        descriptor: &BuildDescriptor,
    ) -> Result<Vec<SelectedProperty>, BuildError> {
        self.properties
            .iter()
            .map(|(name, value)| {
                let property = descriptor
                    .properties()
                    .iter()
                    .find(|property| property.name() == name)
                    .ok_or_else(|| BuildError::UnknownProperty {
                        type_name: descriptor.type_name().to_string(),
                        property: name.clone(),
                    })?;

                let value = value.clone().unwrap_or_else(|| property.value().clone());
                if value.value_type() != property.value().value_type() {
                    return Err(BuildError::IncompatibleValue {
                        expected: property.value().value_type_name().to_string(),
                        slot: format!("property \"{name}\""),
                    });
                }

                select_property(descriptor, property, value)
            })
            .try_collect()
    }
}

/// Selects methods by name and, if values are given, by parameter value types.
pub struct SpecifiedMethodsSelector {
    methods: Vec<(String, Option<Vec<InjectionValue>>)>,
}

impl SpecifiedMethodsSelector {
    pub fn new(methods: Vec<(String, Option<Vec<InjectionValue>>)>) -> Self {
        Self { methods }
    }
}

impl MethodSelectorPolicy for SpecifiedMethodsSelector {
    fn select_methods(
        &self,
        descriptor: &BuildDescriptor,
    ) -> Result<Vec<SelectedMethod>, BuildError> {
        self.methods
            .iter()
            .map(|(name, values)| {
                let method = descriptor
                    .methods()
                    .iter()
                    .find(|method| {
                        method.name() == name
                            && values.as_ref().map_or(true, |values| {
                                matches_values(method.parameters(), values)
                            })
                    })
                    .ok_or_else(|| BuildError::UnknownMethod {
                        type_name: descriptor.type_name().to_string(),
                        method: match values {
                            Some(values) => format!("{name}({})", value_signature(values)),
                            None => name.clone(),
                        },
                    })?;

                select_method(descriptor, method, values.as_deref())
            })
            .try_collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::{
        Arguments, Buildable, Constructor, Method, Parameter, Property, TypeDescriptor,
    };
    use crate::error::BuildError;
    use crate::instance::InstancePtr;
    use crate::resolution::InjectionValue;
    use crate::selection::{
        ConstructorSelectorPolicy, DefaultConstructorSelector, DefaultMethodSelector,
        DefaultPropertySelector, MethodSelectorPolicy, PropertySelectorPolicy,
        SpecifiedConstructorSelector, SpecifiedMethodsSelector, SpecifiedPropertiesSelector,
    };

    struct Dependency;

    #[derive(Default)]
    struct Longest {
        count: u32,
    }

    struct Ambiguous;

    struct Marked;

    struct TwiceMarked;

    struct Empty;

    crate::injectable!(Dependency, Longest, Ambiguous, Marked, TwiceMarked, Empty);

    impl Buildable for Longest {
        fn descriptor() -> TypeDescriptor<Self> {
            TypeDescriptor::new()
                .constructor(Constructor::new(vec![], |_| Ok(Longest::default())))
                .constructor(Constructor::new(
                    vec![Parameter::value("count", 1u32)],
                    |arguments| {
                        Ok(Longest {
                            count: arguments.next()?,
                        })
                    },
                ))
                .constructor(Constructor::new(
                    vec![
                        Parameter::value("count", 1u32),
                        Parameter::required::<Dependency>("dependency"),
                    ],
                    |arguments| {
                        Ok(Longest {
                            count: arguments.next()?,
                        })
                    },
                ))
                .property(
                    Property::new(
                        "count",
                        InjectionValue::value(5u32),
                        |target: &mut Longest, count: u32| target.count = count,
                    )
                    .injection(),
                )
                .property(Property::read_only("label", InjectionValue::value("")))
                .method(
                    Method::new(
                        "increment",
                        vec![Parameter::value("by", 1u32)],
                        |target: &mut Longest, arguments: &mut Arguments| {
                            target.count += arguments.next::<u32>()?;
                            Ok(())
                        },
                    )
                    .injection(),
                )
                .method(
                    Method::new(
                        "swap",
                        vec![Parameter::value("other", 1u32).by_reference()],
                        |_: &mut Longest, _: &mut Arguments| Ok(()),
                    )
                    .injection(),
                )
                .method(
                    Method::new(
                        "convert",
                        vec![],
                        |_: &mut Longest, _: &mut Arguments| Ok(()),
                    )
                    .generic_definition(),
                )
        }
    }

    impl Buildable for Ambiguous {
        fn descriptor() -> TypeDescriptor<Self> {
            TypeDescriptor::new()
                .constructor(Constructor::new(
                    vec![Parameter::value("a", 1u32)],
                    |_| Ok(Ambiguous),
                ))
                .constructor(Constructor::new(
                    vec![Parameter::value("b", "b")],
                    |_| Ok(Ambiguous),
                ))
        }
    }

    impl Buildable for Marked {
        fn descriptor() -> TypeDescriptor<Self> {
            TypeDescriptor::new()
                .constructor(Constructor::new(vec![], |_| Ok(Marked)).injection())
                .constructor(Constructor::new(
                    vec![Parameter::required::<Dependency>("dependency")],
                    |_| Ok(Marked),
                ))
        }
    }

    impl Buildable for TwiceMarked {
        fn descriptor() -> TypeDescriptor<Self> {
            TypeDescriptor::new()
                .constructor(Constructor::new(vec![], |_| Ok(TwiceMarked)).injection())
                .constructor(
                    Constructor::new(vec![Parameter::value("a", 1u32)], |_| Ok(TwiceMarked))
                        .injection(),
                )
        }
    }

    impl Buildable for Empty {
        fn descriptor() -> TypeDescriptor<Self> {
            TypeDescriptor::new()
        }
    }

    #[test]
    fn should_select_longest_constructor() {
        let selected = DefaultConstructorSelector
            .select_constructor(&Longest::descriptor().build())
            .unwrap();

        assert_eq!(selected.parameters.len(), 2);
        assert_eq!(selected.parameters[1].name, "dependency");
    }

    #[test]
    fn should_prefer_marked_constructor() {
        let selected = DefaultConstructorSelector
            .select_constructor(&Marked::descriptor().build())
            .unwrap();

        assert!(selected.parameters.is_empty());
    }

    #[test]
    fn should_reject_constructor_ambiguity() {
        assert!(matches!(
            DefaultConstructorSelector.select_constructor(&Ambiguous::descriptor().build()),
            Err(BuildError::AmbiguousConstructor {
                parameter_count: 1,
                ..
            })
        ));
        assert!(matches!(
            DefaultConstructorSelector.select_constructor(&TwiceMarked::descriptor().build()),
            Err(BuildError::MultipleInjectionConstructors { .. })
        ));
        assert!(matches!(
            DefaultConstructorSelector.select_constructor(&Empty::descriptor().build()),
            Err(BuildError::NoConstructor { .. })
        ));
    }

    #[test]
    fn should_select_constructor_by_value_types() {
        let descriptor = Longest::descriptor().build();
        let selected = SpecifiedConstructorSelector::new(vec![InjectionValue::value(7u32)])
            .select_constructor(&descriptor)
            .unwrap();
        assert_eq!(selected.parameters.len(), 1);

        assert!(matches!(
            SpecifiedConstructorSelector::new(vec![InjectionValue::value("x")])
                .select_constructor(&descriptor),
            Err(BuildError::NoMatchingConstructor { .. })
        ));
    }

    #[test]
    fn should_select_marked_properties() {
        let selected = DefaultPropertySelector
            .select_properties(&Longest::descriptor().build())
            .unwrap();

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "count");

        let mut target = Longest::default();
        selected[0].set(&mut target, Box::new(3u32)).unwrap();
        assert_eq!(target.count, 3);
    }

    #[test]
    fn should_validate_specified_properties() {
        let descriptor = Longest::descriptor().build();

        assert!(matches!(
            SpecifiedPropertiesSelector::new(vec![("missing".to_string(), None)])
                .select_properties(&descriptor),
            Err(BuildError::UnknownProperty { .. })
        ));
        assert!(matches!(
            SpecifiedPropertiesSelector::new(vec![("label".to_string(), None)])
                .select_properties(&descriptor),
            Err(BuildError::PropertyNotSettable { .. })
        ));

        let selected = SpecifiedPropertiesSelector::new(vec![(
            "count".to_string(),
            Some(InjectionValue::value(9u32)),
        )])
        .select_properties(&descriptor)
        .unwrap();
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn should_reject_illegal_marked_methods() {
        assert!(matches!(
            DefaultMethodSelector.select_methods(&Longest::descriptor().build()),
            Err(BuildError::IllegalInjectionMethod { .. })
        ));
    }

    #[test]
    fn should_select_specified_methods() {
        let descriptor = Longest::descriptor().build();

        let selected = SpecifiedMethodsSelector::new(vec![(
            "increment".to_string(),
            Some(vec![InjectionValue::value(2u32)]),
        )])
        .select_methods(&descriptor)
        .unwrap();
        assert_eq!(selected.len(), 1);
        assert!(selected[0].signature.contains("increment(by: u32)"));

        assert!(matches!(
            SpecifiedMethodsSelector::new(vec![("convert".to_string(), None)])
                .select_methods(&descriptor),
            Err(BuildError::IllegalInjectionMethod { .. })
        ));
        assert!(matches!(
            SpecifiedMethodsSelector::new(vec![("missing".to_string(), None)])
                .select_methods(&descriptor),
            Err(BuildError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn should_keep_dependency_parameters() {
        let selected = DefaultConstructorSelector
            .select_constructor(&Longest::descriptor().build())
            .unwrap();

        assert_eq!(
            selected.parameters[1].value.value_type(),
            std::any::TypeId::of::<InstancePtr<Dependency>>()
        );
    }
}
