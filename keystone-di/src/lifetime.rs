//! Built instances are owned by [LifetimeManager]s, which decide when to reuse an existing
//! instance and when to build a new one. Each registration owns its own manager - a manager is
//! never shared between two registrations, which is guarded by an [InUseFlag].
//!
//! Managers follow a simple state machine: they start empty, hold an instance once one is built
//! and stored, and become empty again when the value is removed or the manager disposed. Some
//! managers never hold anything ([TransientLifetimeManager]), while others hold instances only
//! weakly ([ExternallyControlledLifetimeManager]) or per thread ([PerThreadLifetimeManager]).
//!
//! Note: lifetimes are checked at build time, so mixing incompatible lifetimes can lead to
//! surprising results, e.g. a transient dependency of a container-controlled instance lives as long
//! as the container-controlled one.

use crate::error::DisposeError;
use crate::instance::{Disposable, ErrorPtr, Instance, WeakInstance};
use crate::policy::PolicyList;
use fxhash::FxHashMap;
use parking_lot::{Mutex, RawMutex, RwLock};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

pub type LifetimeManagerPtr = Arc<dyn LifetimeManager>;

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum LifetimeKind {
    Transient,
    ContainerControlled,
    Hierarchical,
    ExternallyControlled,
    PerThread,
    PerResolve,
}

/// Marks a lifetime manager as used by a registration.
#[derive(Default, Debug)]
pub struct InUseFlag(AtomicBool);

impl InUseFlag {
    /// Marks the flag as used. Returns `false` if it was already in use.
    pub fn acquire(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_in_use(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Guard serializing the check-build-store sequence of a lifetime manager. The lock is released
/// when the guard is dropped.
pub struct LifetimeGuard {
    _guard: parking_lot::lock_api::ArcMutexGuard<RawMutex, ()>,
}

/// Owner of built instances. See module documentation for information on lifetimes.
pub trait LifetimeManager: Send + Sync {
    fn kind(&self) -> LifetimeKind;

    /// Returns the held instance, if any.
    fn get_value(&self) -> Option<Instance>;

    fn set_value(&self, instance: Instance);

    /// Removes the held instance, disposing it if owned by the manager.
    fn remove_value(&self) -> Result<(), ErrorPtr>;

    /// Starts building a new instance. Managers which guarantee a single instance return a guard
    /// which should be held until the built instance is stored with
    /// [set_value](Self::set_value).
    fn begin_build(&self) -> Option<LifetimeGuard> {
        None
    }

    /// Creates a fresh, empty manager of the same kind.
    fn new_instance(&self) -> LifetimeManagerPtr;

    fn in_use(&self) -> &InUseFlag;

    fn dispose(&self) -> Result<(), ErrorPtr> {
        self.remove_value()
    }
}

#[derive(Default)]
struct SynchronizedSlot {
    value: RwLock<Option<Instance>>,
    build_lock: Arc<Mutex<()>>,
}

impl SynchronizedSlot {
    fn get(&self) -> Option<Instance> {
        self.value.read().clone()
    }

    fn set(&self, instance: Instance) {
        *self.value.write() = Some(instance);
    }

    fn take(&self) -> Option<Instance> {
        self.value.write().take()
    }

    fn lock(&self) -> LifetimeGuard {
        LifetimeGuard {
            _guard: self.build_lock.lock_arc(),
        }
    }
}

/// Builds a new instance on every request.
#[derive(Default)]
pub struct TransientLifetimeManager {
    in_use: InUseFlag,
}

impl LifetimeManager for TransientLifetimeManager {
    fn kind(&self) -> LifetimeKind {
        LifetimeKind::Transient
    }

    #[inline]
    fn get_value(&self) -> Option<Instance> {
        None
    }

    #[inline]
    fn set_value(&self, _instance: Instance) {}

    #[inline]
    fn remove_value(&self) -> Result<(), ErrorPtr> {
        Ok(())
    }

    fn new_instance(&self) -> LifetimeManagerPtr {
        Arc::<TransientLifetimeManager>::default()
    }

    fn in_use(&self) -> &InUseFlag {
        &self.in_use
    }
}

/// Holds a single instance for the lifetime of the owning container. The instance is disposed
/// along with the manager.
#[derive(Default)]
pub struct ContainerControlledLifetimeManager {
    slot: SynchronizedSlot,
    in_use: InUseFlag,
}

impl LifetimeManager for ContainerControlledLifetimeManager {
    fn kind(&self) -> LifetimeKind {
        LifetimeKind::ContainerControlled
    }

    fn get_value(&self) -> Option<Instance> {
        self.slot.get()
    }

    fn set_value(&self, instance: Instance) {
        self.slot.set(instance);
    }

    fn remove_value(&self) -> Result<(), ErrorPtr> {
        self.slot
            .take()
            .map(|instance| instance.dispose())
            .unwrap_or(Ok(()))
    }

    fn begin_build(&self) -> Option<LifetimeGuard> {
        Some(self.slot.lock())
    }

    fn new_instance(&self) -> LifetimeManagerPtr {
        Arc::<ContainerControlledLifetimeManager>::default()
    }

    fn in_use(&self) -> &InUseFlag {
        &self.in_use
    }
}

/// Container-controlled lifetime, but each child container gets its own instance. Inherited
/// managers are localized lazily, on first build in a child container.
#[derive(Default)]
pub struct HierarchicalLifetimeManager {
    slot: SynchronizedSlot,
    in_use: InUseFlag,
}

impl LifetimeManager for HierarchicalLifetimeManager {
    fn kind(&self) -> LifetimeKind {
        LifetimeKind::Hierarchical
    }

    fn get_value(&self) -> Option<Instance> {
        self.slot.get()
    }

    fn set_value(&self, instance: Instance) {
        self.slot.set(instance);
    }

    fn remove_value(&self) -> Result<(), ErrorPtr> {
        self.slot
            .take()
            .map(|instance| instance.dispose())
            .unwrap_or(Ok(()))
    }

    fn begin_build(&self) -> Option<LifetimeGuard> {
        Some(self.slot.lock())
    }

    fn new_instance(&self) -> LifetimeManagerPtr {
        Arc::<HierarchicalLifetimeManager>::default()
    }

    fn in_use(&self) -> &InUseFlag {
        &self.in_use
    }
}

/// Holds a weak reference to the instance - the container never owns it.
#[derive(Default)]
pub struct ExternallyControlledLifetimeManager {
    value: RwLock<Option<WeakInstance>>,
    build_lock: Arc<Mutex<()>>,
    in_use: InUseFlag,
}

impl LifetimeManager for ExternallyControlledLifetimeManager {
    fn kind(&self) -> LifetimeKind {
        LifetimeKind::ExternallyControlled
    }

    fn get_value(&self) -> Option<Instance> {
        self.value.read().as_ref().and_then(WeakInstance::upgrade)
    }

    fn set_value(&self, instance: Instance) {
        *self.value.write() = Some(instance.downgrade());
    }

    #[inline]
    fn remove_value(&self) -> Result<(), ErrorPtr> {
        Ok(())
    }

    fn begin_build(&self) -> Option<LifetimeGuard> {
        Some(LifetimeGuard {
            _guard: self.build_lock.lock_arc(),
        })
    }

    fn new_instance(&self) -> LifetimeManagerPtr {
        Arc::<ExternallyControlledLifetimeManager>::default()
    }

    fn in_use(&self) -> &InUseFlag {
        &self.in_use
    }
}

static NEXT_PER_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static PER_THREAD_VALUES: RefCell<FxHashMap<u64, Instance>> = RefCell::new(FxHashMap::default());
}

/// Holds one instance per thread. Removing the value or disposing the manager only clears the slot
/// of the calling thread; other threads keep their instances until they exit.
pub struct PerThreadLifetimeManager {
    id: u64,
    in_use: InUseFlag,
}

impl Default for PerThreadLifetimeManager {
    fn default() -> Self {
        Self {
            id: NEXT_PER_THREAD_ID.fetch_add(1, Ordering::Relaxed),
            in_use: Default::default(),
        }
    }
}

impl LifetimeManager for PerThreadLifetimeManager {
    fn kind(&self) -> LifetimeKind {
        LifetimeKind::PerThread
    }

    fn get_value(&self) -> Option<Instance> {
        PER_THREAD_VALUES.with(|values| values.borrow().get(&self.id).cloned())
    }

    fn set_value(&self, instance: Instance) {
        PER_THREAD_VALUES.with(|values| {
            values.borrow_mut().insert(self.id, instance);
        });
    }

    fn remove_value(&self) -> Result<(), ErrorPtr> {
        PER_THREAD_VALUES.with(|values| {
            values.borrow_mut().remove(&self.id);
        });
        Ok(())
    }

    fn new_instance(&self) -> LifetimeManagerPtr {
        Arc::<PerThreadLifetimeManager>::default()
    }

    fn in_use(&self) -> &InUseFlag {
        &self.in_use
    }
}

/// Shares a single instance within one resolve call. When registered, the manager itself is
/// always empty - once an instance is built, a new manager holding it is published for the rest
/// of the resolve call.
#[derive(Default)]
pub struct PerResolveLifetimeManager {
    value: Option<Instance>,
    in_use: InUseFlag,
}

impl PerResolveLifetimeManager {
    pub fn with_value(instance: Instance) -> Self {
        Self {
            value: Some(instance),
            in_use: Default::default(),
        }
    }
}

impl LifetimeManager for PerResolveLifetimeManager {
    fn kind(&self) -> LifetimeKind {
        LifetimeKind::PerResolve
    }

    fn get_value(&self) -> Option<Instance> {
        self.value.clone()
    }

    #[inline]
    fn set_value(&self, _instance: Instance) {}

    #[inline]
    fn remove_value(&self) -> Result<(), ErrorPtr> {
        Ok(())
    }

    fn new_instance(&self) -> LifetimeManagerPtr {
        Arc::<PerResolveLifetimeManager>::default()
    }

    fn in_use(&self) -> &InUseFlag {
        &self.in_use
    }
}

/// Creates lifetime managers on demand, e.g. for each closed type of an open generic
/// registration. Created managers belong to the registering container, apart from hierarchical
/// ones, which belong to the container performing the build.
pub struct LifetimeFactoryPolicy {
    prototype: LifetimeManagerPtr,
    owner_policies: Weak<PolicyList>,
    owner_lifetime: Weak<LifetimeContainer>,
}

impl LifetimeFactoryPolicy {
    pub fn new(
        prototype: LifetimeManagerPtr,
        owner_policies: &Arc<PolicyList>,
        owner_lifetime: &Arc<LifetimeContainer>,
    ) -> Self {
        Self {
            prototype,
            owner_policies: Arc::downgrade(owner_policies),
            owner_lifetime: Arc::downgrade(owner_lifetime),
        }
    }

    #[inline]
    pub fn kind(&self) -> LifetimeKind {
        self.prototype.kind()
    }

    /// Policies and lifetime of the registering container, if still alive.
    pub fn owner(&self) -> Option<(Arc<PolicyList>, Arc<LifetimeContainer>)> {
        self.owner_policies
            .upgrade()
            .zip(self.owner_lifetime.upgrade())
    }

    pub fn new_manager(&self) -> LifetimeManagerPtr {
        self.prototype.new_instance()
    }
}

enum Entry {
    Manager(LifetimeManagerPtr),
    Disposable(Arc<dyn Disposable + Send + Sync>),
}

impl Entry {
    fn dispose(&self) -> Result<(), ErrorPtr> {
        match self {
            Entry::Manager(manager) => manager.dispose(),
            Entry::Disposable(disposable) => disposable.dispose(),
        }
    }
}

/// Disposal list of a single container. Entries are disposed in reverse order of addition.
#[derive(Default)]
pub struct LifetimeContainer {
    entries: Mutex<Vec<Entry>>,
}

impl LifetimeContainer {
    pub fn add_manager(&self, manager: LifetimeManagerPtr) {
        self.entries.lock().push(Entry::Manager(manager));
    }

    pub fn add(&self, entry: Arc<dyn Disposable + Send + Sync>) {
        self.entries.lock().push(Entry::Disposable(entry));
    }

    /// Removes the given entry without disposing it.
    pub fn remove(&self, entry: &Arc<dyn Disposable + Send + Sync>) {
        let target = Arc::as_ptr(entry) as *const ();
        self.entries.lock().retain(|existing| match existing {
            Entry::Disposable(existing) => Arc::as_ptr(existing) as *const () != target,
            Entry::Manager(_) => true,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Disposes all entries, in reverse order of addition. Disposal continues past failures and
    /// all errors are reported together.
    pub fn dispose(&self) -> Result<(), DisposeError> {
        let entries = std::mem::take(&mut *self.entries.lock());
        debug!(count = entries.len(), "Disposing lifetime container.");

        let errors: Vec<_> = entries
            .iter()
            .rev()
            .filter_map(|entry| entry.dispose().err())
            .inspect(|error| warn!(%error, "Error disposing lifetime entry."))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DisposeError { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::DisposeError;
    use crate::instance::{Disposable, ErrorPtr, Instance, InstancePtr, MockDisposable};
    use crate::lifetime::{
        ContainerControlledLifetimeManager, ExternallyControlledLifetimeManager,
        HierarchicalLifetimeManager, LifetimeContainer, LifetimeKind,
        LifetimeManager, PerResolveLifetimeManager, PerThreadLifetimeManager,
        TransientLifetimeManager,
    };
    use mockall::Sequence;
    use std::sync::Arc;
    use std::thread;

    struct Value(u8);

    crate::injectable!(Value);

    fn instance(value: u8) -> Instance {
        Instance::new(InstancePtr::new(Value(value)))
    }

    fn failure() -> ErrorPtr {
        Arc::new(DisposeError { errors: vec![] })
    }

    #[test]
    fn should_never_hold_transient_values() {
        let manager = TransientLifetimeManager::default();
        manager.set_value(instance(1));

        assert!(manager.get_value().is_none());
        assert!(manager.begin_build().is_none());
        assert_eq!(manager.new_instance().kind(), LifetimeKind::Transient);
    }

    #[test]
    fn should_hold_and_dispose_container_controlled_value() {
        let mut disposable = MockDisposable::new();
        disposable.expect_dispose().times(1).returning(|| Ok(()));

        let manager = ContainerControlledLifetimeManager::default();
        let value = Instance::disposable(InstancePtr::new(disposable));
        manager.set_value(value.clone());

        assert!(manager.get_value().unwrap().is_same(&value));

        manager.remove_value().unwrap();
        assert!(manager.get_value().is_none());
    }

    #[test]
    fn should_create_empty_hierarchical_manager() {
        let manager = HierarchicalLifetimeManager::default();
        manager.set_value(instance(1));

        let scoped = manager.new_instance();
        assert_eq!(scoped.kind(), LifetimeKind::Hierarchical);
        assert!(scoped.get_value().is_none());
        assert!(manager.get_value().is_some());
    }

    #[test]
    fn should_hold_weak_external_value() {
        let manager = ExternallyControlledLifetimeManager::default();
        let value = instance(1);
        manager.set_value(value.clone());

        manager.remove_value().unwrap();
        assert!(manager.get_value().is_some());

        drop(value);
        assert!(manager.get_value().is_none());
    }

    #[test]
    fn should_hold_value_per_thread() {
        let manager = Arc::new(PerThreadLifetimeManager::default());
        manager.set_value(instance(1));

        let other = manager.clone();
        let other_thread_value = thread::spawn(move || other.get_value().is_some())
            .join()
            .unwrap();

        assert!(!other_thread_value);
        assert!(manager.get_value().is_some());
        assert!(PerThreadLifetimeManager::default().get_value().is_none());
    }

    #[test]
    fn should_clear_current_thread_value_on_dispose() {
        let manager = Arc::new(PerThreadLifetimeManager::default());

        let other = manager.clone();
        let other_thread_cleared = thread::spawn(move || {
            other.set_value(instance(2));
            other.dispose().unwrap();
            other.get_value().is_none()
        })
        .join()
        .unwrap();

        manager.set_value(instance(1));
        assert!(other_thread_cleared);
        assert!(manager.get_value().is_some());

        manager.dispose().unwrap();
        assert!(manager.get_value().is_none());
    }

    #[test]
    fn should_hold_captured_per_resolve_value() {
        let value = instance(1);
        let manager = PerResolveLifetimeManager::with_value(value.clone());
        manager.set_value(instance(2));

        assert!(manager.get_value().unwrap().is_same(&value));
        assert!(PerResolveLifetimeManager::default().get_value().is_none());
    }

    #[test]
    fn should_flag_manager_usage() {
        let manager = TransientLifetimeManager::default();

        assert!(manager.in_use().acquire());
        assert!(!manager.in_use().acquire());
        assert!(manager.in_use().is_in_use());
    }

    #[test]
    fn should_dispose_in_reverse_order() {
        let mut sequence = Sequence::new();

        let mut first = MockDisposable::new();
        let mut second = MockDisposable::new();
        second
            .expect_dispose()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|| Ok(()));
        first
            .expect_dispose()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|| Ok(()));

        let container = LifetimeContainer::default();
        container.add(Arc::new(first));
        container.add(Arc::new(second));

        container.dispose().unwrap();
        assert!(container.is_empty());
    }

    #[test]
    fn should_continue_disposing_after_failure() {
        let mut failing = MockDisposable::new();
        failing.expect_dispose().times(1).returning(|| Err(failure()));

        let mut succeeding = MockDisposable::new();
        succeeding.expect_dispose().times(1).returning(|| Ok(()));

        let container = LifetimeContainer::default();
        container.add(Arc::new(succeeding));
        container.add(Arc::new(failing));

        let error = container.dispose().unwrap_err();
        assert_eq!(error.errors.len(), 1);
    }

    #[test]
    fn should_remove_entry_without_disposing() {
        let mut disposable = MockDisposable::new();
        disposable.expect_dispose().never();

        let entry: Arc<dyn Disposable + Send + Sync> = Arc::new(disposable);
        let container = LifetimeContainer::default();
        container.add(entry.clone());
        container.remove(&entry);

        assert!(container.is_empty());
        container.dispose().unwrap();
    }
}
