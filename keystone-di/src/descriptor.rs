//! Buildable types describe how they can be built with a [TypeDescriptor]: their constructors,
//! properties and methods, along with the dependencies each of them needs. Descriptors are
//! captured once, at registration time, and [selectors](crate::selection) decide which parts are
//! used when building.
//!
//! ```
//! use keystone_di::descriptor::{Buildable, Constructor, Method, Parameter, Property, TypeDescriptor};
//! use keystone_di::injectable;
//! use keystone_di::instance::InstancePtr;
//! use keystone_di::resolution::InjectionValue;
//!
//! struct Clock;
//!
//! struct Scheduler {
//!     clock: Option<InstancePtr<Clock>>,
//!     interval: u32,
//! }
//!
//! injectable!(Clock, Scheduler);
//!
//! impl Buildable for Scheduler {
//!     fn descriptor() -> TypeDescriptor<Self> {
//!         TypeDescriptor::new()
//!             .constructor(Constructor::new(vec![], |_| {
//!                 Ok(Scheduler {
//!                     clock: None,
//!                     interval: 0,
//!                 })
//!             }))
//!             .property(
//!                 Property::new(
//!                     "clock",
//!                     InjectionValue::resolved::<Clock>(),
//!                     |scheduler: &mut Scheduler, clock: InstancePtr<Clock>| {
//!                         scheduler.clock = Some(clock)
//!                     },
//!                 )
//!                 .injection(),
//!             )
//!             .method(
//!                 Method::new(
//!                     "configure",
//!                     vec![Parameter::value("interval", 60u32)],
//!                     |scheduler: &mut Scheduler, arguments| {
//!                         scheduler.interval = arguments.next()?;
//!                         Ok(())
//!                     },
//!                 )
//!                 .injection(),
//!             )
//!     }
//! }
//! ```

use crate::build_key::{Injectable, TypeInfo};
use crate::error::BuildError;
use crate::instance::{dispose_as, Disposable, DisposeFunction, ErrorPtr, Value};
use crate::resolution::InjectionValue;
use itertools::Itertools;
use std::any::{type_name, Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

pub type ConstructFunction =
    dyn Fn(&mut Arguments) -> Result<Box<dyn Any + Send + Sync>, ErrorPtr> + Send + Sync;
pub type SetterFunction =
    dyn Fn(&mut (dyn Any + Send + Sync), Value) -> Result<(), ErrorPtr> + Send + Sync;
pub type InvokeFunction =
    dyn Fn(&mut (dyn Any + Send + Sync), &mut Arguments) -> Result<(), ErrorPtr> + Send + Sync;

/// Types which can be built by a container.
pub trait Buildable: Injectable + Sized {
    fn descriptor() -> TypeDescriptor<Self>;
}

/// Resolved arguments passed to constructors and methods, in parameter order.
pub struct Arguments {
    values: Vec<(&'static str, Option<Value>)>,
    position: usize,
}

impl Arguments {
    pub fn new(values: Vec<(&'static str, Value)>) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|(name, value)| (name, Some(value)))
                .collect(),
            position: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Takes the argument at the given position.
    pub fn take<V: 'static>(&mut self, index: usize) -> Result<V, ErrorPtr> {
        let (name, value) = match self.values.get_mut(index) {
            Some((name, value)) => (*name, value.take()),
            None => ("", None),
        };

        value
            .and_then(|value| value.downcast::<V>().ok())
            .map(|value| *value)
            .ok_or_else(|| {
                Arc::new(BuildError::IncompatibleValue {
                    expected: type_name::<V>().to_string(),
                    slot: if name.is_empty() {
                        format!("argument {index}")
                    } else {
                        format!("parameter \"{name}\"")
                    },
                }) as ErrorPtr
            })
    }

    /// Takes the next argument.
    pub fn next<V: 'static>(&mut self) -> Result<V, ErrorPtr> {
        let index = self.position;
        self.position += 1;
        self.take(index)
    }
}

/// A constructor or method parameter.
#[derive(Clone)]
pub struct ParameterInfo {
    name: &'static str,
    value: InjectionValue,
    by_reference: bool,
}

impl ParameterInfo {
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn value(&self) -> &InjectionValue {
        &self.value
    }

    /// By-reference parameters cannot be injected into methods.
    #[inline]
    pub fn is_by_reference(&self) -> bool {
        self.by_reference
    }
}

/// Builder for [ParameterInfo].
pub struct Parameter {
    info: ParameterInfo,
}

impl Parameter {
    pub fn new(name: &'static str, value: InjectionValue) -> Self {
        Self {
            info: ParameterInfo {
                name,
                value,
                by_reference: false,
            },
        }
    }

    /// Parameter resolved as the default registration of `T`.
    pub fn required<T: Injectable + ?Sized>(name: &'static str) -> Self {
        Self::new(name, InjectionValue::resolved::<T>())
    }

    pub fn named<T: Injectable + ?Sized, N: ToString>(name: &'static str, registration: N) -> Self {
        Self::new(name, InjectionValue::named::<T, N>(registration))
    }

    /// Parameter of type `Option<InstancePtr<T>>`, which is `None` when `T` cannot be resolved.
    pub fn optional<T: Injectable + ?Sized>(name: &'static str) -> Self {
        Self::new(name, InjectionValue::optional::<T>())
    }

    /// Parameter of type `Vec<InstancePtr<T>>`, containing all registrations of `T`.
    pub fn array<T: Injectable + ?Sized>(name: &'static str) -> Self {
        Self::new(name, InjectionValue::array::<T>())
    }

    pub fn value<V: Clone + Send + Sync + 'static>(name: &'static str, value: V) -> Self {
        Self::new(name, InjectionValue::value(value))
    }

    pub fn by_reference(mut self) -> Self {
        self.info.by_reference = true;
        self
    }
}

fn signature(name: &str, parameters: &[ParameterInfo]) -> String {
    format!(
        "{name}({})",
        parameters
            .iter()
            .map(|parameter| format!(
                "{}: {}",
                parameter.name,
                parameter.value.dependency_type().name()
            ))
            .join(", ")
    )
}

pub struct ConstructorInfo {
    type_name: &'static str,
    parameters: Vec<ParameterInfo>,
    injection: bool,
    construct: Arc<ConstructFunction>,
}

impl ConstructorInfo {
    #[inline]
    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }

    /// Is the constructor explicitly marked for injection.
    #[inline]
    pub fn is_injection(&self) -> bool {
        self.injection
    }

    #[inline]
    pub fn construct(&self) -> &Arc<ConstructFunction> {
        &self.construct
    }

    /// Printable signature, e.g. `Service(logger: dyn Logger)`.
    pub fn signature(&self) -> String {
        signature(self.type_name, &self.parameters)
    }
}

pub struct Constructor<C> {
    info: ConstructorInfo,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Injectable> Constructor<C> {
    pub fn new<F>(parameters: Vec<Parameter>, construct: F) -> Self
    where
        F: Fn(&mut Arguments) -> Result<C, ErrorPtr> + Send + Sync + 'static,
    {
        Self {
            info: ConstructorInfo {
                type_name: type_name::<C>(),
                parameters: parameters
                    .into_iter()
                    .map(|parameter| parameter.info)
                    .collect(),
                injection: false,
                construct: Arc::new(move |arguments: &mut Arguments| {
                    construct(arguments)
                        .map(|instance| Box::new(instance) as Box<dyn Any + Send + Sync>)
                }),
            },
            _marker: PhantomData,
        }
    }

    /// Marks the constructor as the one to use for injection.
    pub fn injection(mut self) -> Self {
        self.info.injection = true;
        self
    }
}

pub struct PropertyInfo {
    name: &'static str,
    value: InjectionValue,
    setter: Option<Arc<SetterFunction>>,
    injection: bool,
}

impl PropertyInfo {
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn value(&self) -> &InjectionValue {
        &self.value
    }

    #[inline]
    pub fn setter(&self) -> Option<&Arc<SetterFunction>> {
        self.setter.as_ref()
    }

    #[inline]
    pub fn is_injection(&self) -> bool {
        self.injection
    }
}

pub struct Property<C> {
    info: PropertyInfo,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Injectable> Property<C> {
    pub fn new<V, F>(name: &'static str, value: InjectionValue, setter: F) -> Self
    where
        V: 'static,
        F: Fn(&mut C, V) + Send + Sync + 'static,
    {
        let setter = move |target: &mut (dyn Any + Send + Sync), value: Value| {
            let target = target.downcast_mut::<C>().ok_or_else(|| {
                Arc::new(BuildError::IncompatibleInstance {
                    requested: type_name::<C>().to_string(),
                    actual: "unknown".to_string(),
                }) as ErrorPtr
            })?;
            let value = value.downcast::<V>().map_err(|_| {
                Arc::new(BuildError::IncompatibleValue {
                    expected: type_name::<V>().to_string(),
                    slot: format!("property \"{name}\""),
                }) as ErrorPtr
            })?;

            setter(target, *value);
            Ok(())
        };

        Self {
            info: PropertyInfo {
                name,
                value,
                setter: Some(Arc::new(setter)),
                injection: false,
            },
            _marker: PhantomData,
        }
    }

    /// A property which cannot be set.
    pub fn read_only(name: &'static str, value: InjectionValue) -> Self {
        Self {
            info: PropertyInfo {
                name,
                value,
                setter: None,
                injection: false,
            },
            _marker: PhantomData,
        }
    }

    /// Marks the property for injection.
    pub fn injection(mut self) -> Self {
        self.info.injection = true;
        self
    }
}

pub struct MethodInfo {
    type_name: &'static str,
    name: &'static str,
    parameters: Vec<ParameterInfo>,
    injection: bool,
    generic_definition: bool,
    invoke: Arc<InvokeFunction>,
}

impl MethodInfo {
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }

    #[inline]
    pub fn is_injection(&self) -> bool {
        self.injection
    }

    /// Generic method definitions cannot be injected.
    #[inline]
    pub fn is_generic_definition(&self) -> bool {
        self.generic_definition
    }

    #[inline]
    pub fn invoke(&self) -> &Arc<InvokeFunction> {
        &self.invoke
    }

    pub fn signature(&self) -> String {
        signature(
            &format!("{}.{}", self.type_name, self.name),
            &self.parameters,
        )
    }
}

pub struct Method<C> {
    info: MethodInfo,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Injectable> Method<C> {
    pub fn new<F>(name: &'static str, parameters: Vec<Parameter>, invoke: F) -> Self
    where
        F: Fn(&mut C, &mut Arguments) -> Result<(), ErrorPtr> + Send + Sync + 'static,
    {
        let invoke = move |target: &mut (dyn Any + Send + Sync), arguments: &mut Arguments| {
            let target = target.downcast_mut::<C>().ok_or_else(|| {
                Arc::new(BuildError::IncompatibleInstance {
                    requested: type_name::<C>().to_string(),
                    actual: "unknown".to_string(),
                }) as ErrorPtr
            })?;

            invoke(target, arguments)
        };

        Self {
            info: MethodInfo {
                type_name: type_name::<C>(),
                name,
                parameters: parameters
                    .into_iter()
                    .map(|parameter| parameter.info)
                    .collect(),
                injection: false,
                generic_definition: false,
                invoke: Arc::new(invoke),
            },
            _marker: PhantomData,
        }
    }

    /// Marks the method for injection.
    pub fn injection(mut self) -> Self {
        self.info.injection = true;
        self
    }

    /// Marks the method as a generic definition, which makes it illegal for injection.
    pub fn generic_definition(mut self) -> Self {
        self.info.generic_definition = true;
        self
    }
}

/// Type-erased description of a buildable type.
pub struct BuildDescriptor {
    type_info: TypeInfo,
    type_id: TypeId,
    constructors: Vec<ConstructorInfo>,
    properties: Vec<PropertyInfo>,
    methods: Vec<MethodInfo>,
    dispose: Option<DisposeFunction>,
}

impl BuildDescriptor {
    #[inline]
    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    /// Type id of the built value.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_info.name()
    }

    #[inline]
    pub fn constructors(&self) -> &[ConstructorInfo] {
        &self.constructors
    }

    #[inline]
    pub fn properties(&self) -> &[PropertyInfo] {
        &self.properties
    }

    #[inline]
    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    #[inline]
    pub fn dispose(&self) -> Option<DisposeFunction> {
        self.dispose
    }
}

/// Typed builder of a [BuildDescriptor].
pub struct TypeDescriptor<C> {
    constructors: Vec<ConstructorInfo>,
    properties: Vec<PropertyInfo>,
    methods: Vec<MethodInfo>,
    dispose: Option<DisposeFunction>,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Buildable> Default for TypeDescriptor<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Buildable> TypeDescriptor<C> {
    pub fn new() -> Self {
        Self {
            constructors: vec![],
            properties: vec![],
            methods: vec![],
            dispose: None,
            _marker: PhantomData,
        }
    }

    pub fn constructor(mut self, constructor: Constructor<C>) -> Self {
        self.constructors.push(constructor.info);
        self
    }

    pub fn property(mut self, property: Property<C>) -> Self {
        self.properties.push(property.info);
        self
    }

    pub fn method(mut self, method: Method<C>) -> Self {
        self.methods.push(method.info);
        self
    }

    /// Built instances are disposed by their lifetime manager.
    pub fn disposable(mut self) -> Self
    where
        C: Disposable,
    {
        self.dispose = Some(dispose_as::<C>);
        self
    }

    pub fn build(self) -> BuildDescriptor {
        BuildDescriptor {
            type_info: C::type_info(),
            type_id: TypeId::of::<C>(),
            constructors: self.constructors,
            properties: self.properties,
            methods: self.methods,
            dispose: self.dispose,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::{
        Arguments, Buildable, Constructor, Method, Parameter, Property, TypeDescriptor,
    };
    use crate::instance::{InstancePtr, Value};
    use crate::resolution::InjectionValue;
    use std::any::Any;

    struct Engine;

    struct Car {
        engine: Option<InstancePtr<Engine>>,
        wheels: u8,
    }

    crate::injectable!(Engine, Car);

    impl Buildable for Car {
        fn descriptor() -> TypeDescriptor<Self> {
            TypeDescriptor::new()
                .constructor(Constructor::new(vec![], |_| {
                    Ok(Car {
                        engine: None,
                        wheels: 0,
                    })
                }))
                .constructor(
                    Constructor::new(
                        vec![
                            Parameter::required::<Engine>("engine"),
                            Parameter::value("wheels", 4u8),
                        ],
                        |arguments| {
                            Ok(Car {
                                engine: Some(arguments.next()?),
                                wheels: arguments.next()?,
                            })
                        },
                    )
                    .injection(),
                )
                .property(Property::new(
                    "engine",
                    InjectionValue::resolved::<Engine>(),
                    |car: &mut Car, engine: InstancePtr<Engine>| car.engine = Some(engine),
                ))
                .property(Property::read_only("wheels", InjectionValue::value(4u8)))
                .method(Method::new(
                    "add_wheel",
                    vec![],
                    |car: &mut Car, _arguments: &mut Arguments| {
                        car.wheels += 1;
                        Ok(())
                    },
                ))
        }
    }

    #[test]
    fn should_describe_type() {
        let descriptor = Car::descriptor().build();

        assert_eq!(descriptor.constructors().len(), 2);
        assert!(descriptor.constructors()[1].is_injection());
        assert!(descriptor.constructors()[1]
            .signature()
            .contains("(engine: "));
        assert!(descriptor.properties()[0].setter().is_some());
        assert!(descriptor.properties()[1].setter().is_none());
        assert!(descriptor.dispose().is_none());
    }

    #[test]
    fn should_construct_from_arguments() {
        let descriptor = Car::descriptor().build();
        let mut arguments = Arguments::new(vec![
            ("engine", Box::new(InstancePtr::new(Engine)) as Value),
            ("wheels", Box::new(4u8) as Value),
        ]);

        let car = (descriptor.constructors()[1].construct())(&mut arguments)
            .unwrap()
            .downcast::<Car>()
            .ok()
            .unwrap();
        assert!(car.engine.is_some());
        assert_eq!(car.wheels, 4);
    }

    #[test]
    fn should_reject_incompatible_argument() {
        let mut arguments = Arguments::new(vec![("wheels", Box::new("four") as Value)]);
        let error = arguments.next::<u8>().unwrap_err();

        assert!(error.to_string().contains("parameter \"wheels\""));
        assert!(arguments.next::<u8>().is_err());
    }

    #[test]
    fn should_set_property_and_invoke_method() {
        let descriptor = Car::descriptor().build();
        let mut car = Car {
            engine: None,
            wheels: 0,
        };

        let target: &mut (dyn Any + Send + Sync) = &mut car;
        (descriptor.properties()[0].setter().unwrap())(
            target,
            Box::new(InstancePtr::new(Engine)),
        )
        .unwrap();
        (descriptor.methods()[0].invoke())(target, &mut Arguments::new(vec![])).unwrap();

        assert!(car.engine.is_some());
        assert_eq!(car.wheels, 1);
    }
}
