//! Build keys identify what to build: a type together with an optional registration name. A key
//! without a name denotes the default registration for its type.
//!
//! Types participating in resolution implement [Injectable], which provides their [TypeInfo].
//! Plain types and trait objects can use the [injectable](crate::injectable) macro, while closed
//! generic types override [Injectable::type_info] with [TypeInfo::generic] so that open generic
//! mappings can be applied to them.

use crate::instance::{InstanceAnyPtr, InstancePtr, Value};
use std::any::{type_name, TypeId};
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Type identity used for key comparison.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum TypeKey {
    /// A concrete type.
    Closed(TypeId),
    /// An open generic definition, identified by its unique name.
    Open(&'static str),
}

/// Describes an open generic definition, e.g. `Repository<_>`. Definitions are meant to live in
/// statics and their names must be unique within a process.
#[derive(Eq, PartialEq, Hash, Debug)]
pub struct GenericDefinition {
    name: &'static str,
    arity: usize,
}

impl GenericDefinition {
    pub const fn new(name: &'static str, arity: usize) -> Self {
        Self { name, arity }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of type parameters of the definition.
    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }
}

/// Element information of array types, used to collect resolved elements into a single instance
/// and to extract that instance back into a typed value.
pub struct ArrayShape {
    element: TypeInfo,
    collect: fn(Vec<Value>) -> Option<InstanceAnyPtr>,
    extract: fn(&InstanceAnyPtr) -> Option<Value>,
}

impl ArrayShape {
    #[inline]
    pub fn element(&self) -> &TypeInfo {
        &self.element
    }

    /// Collects resolved elements into an array instance.
    pub fn collect(&self, values: Vec<Value>) -> Option<InstanceAnyPtr> {
        (self.collect)(values)
    }

    /// Extracts a typed array value from an array instance.
    pub fn extract(&self, instance: &InstanceAnyPtr) -> Option<Value> {
        (self.extract)(instance)
    }
}

#[derive(Clone)]
pub enum TypeShape {
    Plain,
    Generic {
        definition: &'static GenericDefinition,
        arguments: Arc<[TypeInfo]>,
    },
    Open(&'static GenericDefinition),
    Array(Arc<ArrayShape>),
}

/// Runtime type information: identity, printable name and shape. Equality and hashing consider
/// identity only.
#[derive(Clone)]
pub struct TypeInfo {
    key: TypeKey,
    name: &'static str,
    shape: TypeShape,
}

impl TypeInfo {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            key: TypeKey::Closed(TypeId::of::<T>()),
            name: type_name::<T>(),
            shape: TypeShape::Plain,
        }
    }

    /// Information about a closed generic type `T`, created from the given definition.
    pub fn generic<T: ?Sized + 'static>(
        definition: &'static GenericDefinition,
        arguments: Vec<TypeInfo>,
    ) -> Self {
        Self {
            key: TypeKey::Closed(TypeId::of::<T>()),
            name: type_name::<T>(),
            shape: TypeShape::Generic {
                definition,
                arguments: arguments.into(),
            },
        }
    }

    pub fn open(definition: &'static GenericDefinition) -> Self {
        Self {
            key: TypeKey::Open(definition.name),
            name: definition.name,
            shape: TypeShape::Open(definition),
        }
    }

    /// Information about an array of `T` - resolved as all registrations of `T`.
    pub fn array_of<T: Injectable + ?Sized>() -> Self {
        Self {
            key: TypeKey::Closed(TypeId::of::<Vec<InstancePtr<T>>>()),
            name: type_name::<Vec<InstancePtr<T>>>(),
            shape: TypeShape::Array(Arc::new(ArrayShape {
                element: T::type_info(),
                collect: collect_array::<T>,
                extract: extract_array::<T>,
            })),
        }
    }

    #[inline]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type id of concrete types.
    pub fn type_id(&self) -> Option<TypeId> {
        match self.key {
            TypeKey::Closed(type_id) => Some(type_id),
            TypeKey::Open(_) => None,
        }
    }

    #[inline]
    pub fn shape(&self) -> &TypeShape {
        &self.shape
    }

    /// Definition of a closed generic type or the open definition itself.
    pub fn generic_definition(&self) -> Option<&'static GenericDefinition> {
        match &self.shape {
            TypeShape::Generic { definition, .. } => Some(*definition),
            TypeShape::Open(definition) => Some(*definition),
            _ => None,
        }
    }

    pub fn generic_arguments(&self) -> &[TypeInfo] {
        match &self.shape {
            TypeShape::Generic { arguments, .. } => &arguments[..],
            _ => &[],
        }
    }

    pub fn array_shape(&self) -> Option<&ArrayShape> {
        match &self.shape {
            TypeShape::Array(shape) => Some(shape.as_ref()),
            _ => None,
        }
    }

    #[inline]
    pub fn is_open_generic(&self) -> bool {
        matches!(self.key, TypeKey::Open(_))
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for TypeInfo {}

impl Hash for TypeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl Debug for TypeInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeInfo")
            .field("key", &self.key)
            .field("name", &self.name)
            .finish()
    }
}

impl Display for TypeInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

fn collect_array<T: Injectable + ?Sized>(values: Vec<Value>) -> Option<InstanceAnyPtr> {
    values
        .into_iter()
        .map(|value| value.downcast::<InstancePtr<T>>().ok().map(|value| *value))
        .collect::<Option<Vec<_>>>()
        .map(|elements| Arc::new(elements) as InstanceAnyPtr)
}

fn extract_array<T: Injectable + ?Sized>(instance: &InstanceAnyPtr) -> Option<Value> {
    instance
        .downcast_ref::<Vec<InstancePtr<T>>>()
        .map(|elements| Box::new(elements.clone()) as Value)
}

/// Identifies a single registration: a type and an optional name.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct BuildKey {
    type_info: TypeInfo,
    name: Option<String>,
}

impl BuildKey {
    pub fn new(type_info: TypeInfo, name: Option<String>) -> Self {
        Self { type_info, name }
    }

    /// Key of the default registration of `T`.
    pub fn of<T: Injectable + ?Sized>() -> Self {
        Self::new(T::type_info(), None)
    }

    pub fn named<T: Injectable + ?Sized, N: ToString>(name: N) -> Self {
        Self::new(T::type_info(), Some(name.to_string()))
    }

    /// Creates a key with the same name, but a different type.
    pub fn with_type(&self, type_info: TypeInfo) -> Self {
        Self::new(type_info, self.name.clone())
    }

    #[inline]
    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    #[inline]
    pub fn type_key(&self) -> TypeKey {
        self.type_info.key
    }

    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// For keys of closed generic types, returns the key of their open definition with the same
    /// name.
    pub fn open_generic_key(&self) -> Option<BuildKey> {
        match &self.type_info.shape {
            TypeShape::Generic { definition, .. } => {
                Some(self.with_type(TypeInfo::open(*definition)))
            }
            _ => None,
        }
    }
}

impl Display for BuildKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{}",
            self.type_info.name,
            self.name.as_deref().unwrap_or("(none)")
        )
    }
}

/// Types which can be resolved by a container. Trait objects used as services should be
/// `dyn Trait + Send + Sync`.
pub trait Injectable: Send + Sync + 'static {
    fn type_info() -> TypeInfo {
        TypeInfo::of::<Self>()
    }
}

/// Implements [Injectable] with default type information for the given types.
#[macro_export]
macro_rules! injectable {
    ($($type:ty),+ $(,)?) => {
        $(impl $crate::build_key::Injectable for $type {})+
    };
}

/// Declares that the given implementation types can be used as the service type, by implementing
/// [CastFrom](crate::instance::CastFrom) through unsized coercion.
#[macro_export]
macro_rules! alias {
    ($service:ty => $($implementation:ty),+ $(,)?) => {
        $(impl $crate::instance::CastFrom<$implementation> for $service {
            fn cast_from(
                instance: $crate::instance::InstancePtr<$implementation>,
            ) -> $crate::instance::InstancePtr<Self> {
                instance
            }
        })+
    };
}
