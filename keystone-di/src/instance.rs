//! Built instances and the type-erased plumbing used to pass them around.

use crate::build_key::Injectable;
use derivative::Derivative;
#[cfg(test)]
use mockall::automock;
use std::any::{type_name, Any, TypeId};
use std::error::Error;
use std::sync::{Arc, Weak};

pub type InstancePtr<T> = Arc<T>;
pub type InstanceAnyPtr = Arc<dyn Any + Send + Sync>;

/// A typed value produced for a single dependency slot, e.g. an `InstancePtr<dyn Trait>` or a
/// literal.
pub type Value = Box<dyn Any + Send>;

pub type ErrorPtr = Arc<dyn Error + Send + Sync>;

/// Casts an instance to a typed [Value], returning the original instance on failure.
pub type CastFunction = fn(InstanceAnyPtr) -> Result<Value, InstanceAnyPtr>;

pub type DisposeFunction = fn(&InstanceAnyPtr) -> Result<(), ErrorPtr>;

/// Allows using `C` where `Self` is requested. Usually implemented with the
/// [alias](crate::alias) macro for trait objects.
pub trait CastFrom<C: Injectable + ?Sized>: Injectable {
    fn cast_from(instance: InstancePtr<C>) -> InstancePtr<Self>;
}

/// Instances which need explicit cleanup when their owner goes away.
#[cfg_attr(test, automock)]
pub trait Disposable {
    fn dispose(&self) -> Result<(), ErrorPtr>;
}

/// Weak reference to a value stored as `InstancePtr<S>` inside an [Instance].
trait SharedWeak: Send + Sync {
    fn upgrade(&self) -> Option<InstanceAnyPtr>;
}

impl<S: Injectable + ?Sized> SharedWeak for Weak<S> {
    fn upgrade(&self) -> Option<InstanceAnyPtr> {
        Weak::upgrade(self).map(|value| Arc::new(value) as InstanceAnyPtr)
    }
}

/// Access to the allocation behind an `InstancePtr<S>` wrapped in an [InstanceAnyPtr]. Identity
/// and weak references of shared instances follow that allocation, not the wrapper.
#[derive(Clone, Copy)]
struct SharedAccess {
    address: fn(&InstanceAnyPtr) -> *const (),
    downgrade: fn(&InstanceAnyPtr) -> Option<Arc<dyn SharedWeak>>,
}

fn shared_address<S: Injectable + ?Sized>(value: &InstanceAnyPtr) -> *const () {
    value
        .downcast_ref::<InstancePtr<S>>()
        .map(|value| Arc::as_ptr(value) as *const ())
        .unwrap_or_else(|| Arc::as_ptr(value) as *const ())
}

fn shared_downgrade<S: Injectable + ?Sized>(
    value: &InstanceAnyPtr,
) -> Option<Arc<dyn SharedWeak>> {
    value
        .downcast_ref::<InstancePtr<S>>()
        .map(|value| Arc::new(Arc::downgrade(value)) as Arc<dyn SharedWeak>)
}

/// A fully built, shareable instance.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Instance {
    #[derivative(Debug = "ignore")]
    value: InstanceAnyPtr,
    type_id: TypeId,
    type_name: &'static str,
    #[derivative(Debug = "ignore")]
    dispose: Option<DisposeFunction>,
    #[derivative(Debug = "ignore")]
    shared: Option<SharedAccess>,
}

impl Instance {
    pub fn new<C: Injectable>(value: InstancePtr<C>) -> Self {
        Self::from_parts(value, TypeId::of::<C>(), type_name::<C>(), None)
    }

    /// Creates an instance which is disposed when removed from its lifetime manager.
    pub fn disposable<C: Injectable + Disposable>(value: InstancePtr<C>) -> Self {
        Self::from_parts(
            value,
            TypeId::of::<C>(),
            type_name::<C>(),
            Some(dispose_as::<C>),
        )
    }

    pub fn from_parts(
        value: InstanceAnyPtr,
        type_id: TypeId,
        type_name: &'static str,
        dispose: Option<DisposeFunction>,
    ) -> Self {
        Self {
            value,
            type_id,
            type_name,
            dispose,
            shared: None,
        }
    }

    /// Creates an instance from a pointer which may be held elsewhere, e.g. an existing trait
    /// object. The value is stored as `InstancePtr<S>`, so it needs an
    /// [unwrap_cast] for `S`. Weak references follow the given pointer, so an
    /// [ExternallyControlledLifetimeManager](crate::lifetime::ExternallyControlledLifetimeManager)
    /// holds the value for as long as the caller does.
    pub fn shared<S: Injectable + ?Sized>(value: InstancePtr<S>) -> Self {
        Self {
            value: Arc::new(value),
            type_id: TypeId::of::<InstancePtr<S>>(),
            type_name: type_name::<S>(),
            dispose: None,
            shared: Some(SharedAccess {
                address: shared_address::<S>,
                downgrade: shared_downgrade::<S>,
            }),
        }
    }

    #[inline]
    pub fn value(&self) -> &InstanceAnyPtr {
        &self.value
    }

    /// Type id of the concrete value.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[inline]
    pub fn is_disposable(&self) -> bool {
        self.dispose.is_some()
    }

    pub fn dispose(&self) -> Result<(), ErrorPtr> {
        match self.dispose {
            Some(dispose) => dispose(&self.value),
            None => Ok(()),
        }
    }

    fn address(&self) -> *const () {
        match self.shared {
            Some(shared) => (shared.address)(&self.value),
            None => Arc::as_ptr(&self.value) as *const (),
        }
    }

    /// Checks if both instances point to the same value.
    pub fn is_same(&self, other: &Instance) -> bool {
        self.address() == other.address()
    }

    pub fn downgrade(&self) -> WeakInstance {
        let value = match self.shared.and_then(|shared| (shared.downgrade)(&self.value)) {
            Some(weak) => WeakValue::Shared(weak),
            None => WeakValue::Direct(Arc::downgrade(&self.value)),
        };

        WeakInstance {
            value,
            type_id: self.type_id,
            type_name: self.type_name,
            dispose: self.dispose,
            shared: self.shared,
        }
    }
}

#[derive(Clone)]
enum WeakValue {
    Direct(Weak<dyn Any + Send + Sync>),
    Shared(Arc<dyn SharedWeak>),
}

/// Non-owning reference to an [Instance].
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct WeakInstance {
    #[derivative(Debug = "ignore")]
    value: WeakValue,
    type_id: TypeId,
    type_name: &'static str,
    #[derivative(Debug = "ignore")]
    dispose: Option<DisposeFunction>,
    #[derivative(Debug = "ignore")]
    shared: Option<SharedAccess>,
}

impl WeakInstance {
    pub fn upgrade(&self) -> Option<Instance> {
        let value = match &self.value {
            WeakValue::Direct(value) => value.upgrade(),
            WeakValue::Shared(value) => value.upgrade(),
        }?;

        Some(Instance {
            value,
            type_id: self.type_id,
            type_name: self.type_name,
            dispose: self.dispose,
            shared: self.shared,
        })
    }
}

/// Cast returning the concrete type itself.
pub fn identity_cast<C: Injectable>(instance: InstanceAnyPtr) -> Result<Value, InstanceAnyPtr> {
    instance
        .downcast::<C>()
        .map(|instance| Box::new(instance) as Value)
}

/// Cast from the concrete type `C` to the service type `S`.
pub fn alias_cast<S: CastFrom<C> + ?Sized, C: Injectable>(
    instance: InstanceAnyPtr,
) -> Result<Value, InstanceAnyPtr> {
    instance
        .downcast::<C>()
        .map(|instance| Box::new(S::cast_from(instance)) as Value)
}

/// Cast for instances stored as `InstancePtr<S>`, e.g. intercepted proxies.
pub fn unwrap_cast<S: Injectable + ?Sized>(
    instance: InstanceAnyPtr,
) -> Result<Value, InstanceAnyPtr> {
    instance
        .downcast::<InstancePtr<S>>()
        .map(|instance| Box::new(InstancePtr::clone(&*instance)) as Value)
}

pub fn dispose_as<C: Disposable + Injectable>(instance: &InstanceAnyPtr) -> Result<(), ErrorPtr> {
    instance
        .downcast_ref::<C>()
        .map(Disposable::dispose)
        .unwrap_or(Ok(()))
}

#[cfg(test)]
mod tests {
    use crate::build_key::Injectable;
    use crate::instance::{
        alias_cast, identity_cast, unwrap_cast, Instance, InstanceAnyPtr, InstancePtr,
        MockDisposable,
    };

    trait Greeter {}

    struct EnglishGreeter;

    impl Greeter for EnglishGreeter {}

    crate::injectable!(dyn Greeter + Send + Sync, EnglishGreeter);
    crate::alias!(dyn Greeter + Send + Sync => EnglishGreeter);

    impl Injectable for MockDisposable {}

    #[test]
    fn should_cast_to_concrete_type() {
        let instance = InstancePtr::new(EnglishGreeter) as InstanceAnyPtr;
        let value = identity_cast::<EnglishGreeter>(instance).unwrap();

        assert!(value.downcast::<InstancePtr<EnglishGreeter>>().is_ok());
    }

    #[test]
    fn should_cast_to_alias() {
        let instance = InstancePtr::new(EnglishGreeter) as InstanceAnyPtr;
        let value = alias_cast::<dyn Greeter + Send + Sync, EnglishGreeter>(instance).unwrap();

        assert!(value
            .downcast::<InstancePtr<dyn Greeter + Send + Sync>>()
            .is_ok());
    }

    #[test]
    fn should_not_cast_unrelated_type() {
        let instance = InstancePtr::new(5u8) as InstanceAnyPtr;
        assert!(identity_cast::<EnglishGreeter>(instance).is_err());
    }

    #[test]
    fn should_dispose_disposable_instance() {
        let mut disposable = MockDisposable::new();
        disposable.expect_dispose().times(1).returning(|| Ok(()));

        let instance = Instance::disposable(InstancePtr::new(disposable));
        assert!(instance.is_disposable());
        instance.dispose().unwrap();
    }

    #[test]
    fn should_track_identity() {
        let first = Instance::new(InstancePtr::new(EnglishGreeter));
        let second = Instance::new(InstancePtr::new(EnglishGreeter));

        assert!(first.is_same(&first.clone()));
        assert!(!first.is_same(&second));
    }

    #[test]
    fn should_release_weak_instance() {
        let instance = Instance::new(InstancePtr::new(EnglishGreeter));
        let weak = instance.downgrade();

        assert!(weak.upgrade().is_some());
        drop(instance);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn should_follow_shared_pointer() {
        let greeter: InstancePtr<dyn Greeter + Send + Sync> = InstancePtr::new(EnglishGreeter);
        let instance = Instance::shared(greeter.clone());
        let weak = instance.downgrade();

        drop(instance);
        let upgraded = weak.upgrade().unwrap();
        assert!(upgraded.is_same(&Instance::shared(greeter.clone())));

        let value = unwrap_cast::<dyn Greeter + Send + Sync>(upgraded.value().clone())
            .ok()
            .unwrap()
            .downcast::<InstancePtr<dyn Greeter + Send + Sync>>()
            .ok()
            .unwrap();
        assert!(InstancePtr::ptr_eq(&value, &greeter));

        drop(upgraded);
        drop(value);
        drop(greeter);
        assert!(weak.upgrade().is_none());
    }
}
