//! Layered storage for policies - pluggable behavior objects looked up by their type and an
//! optional [BuildKey]. Each container owns one layer parented to the layer of its parent, and each
//! build adds a transient layer on top, so writes never leak to ancestors.
//!
//! Lookups report the [LayerId] of the layer where a policy was found, which allows detecting
//! policies inherited from ancestors.

use crate::build_key::BuildKey;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type LayerId = u64;

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

type PolicyKey = (TypeId, Option<BuildKey>);

/// A policy found in a [PolicyList], along with the layer which contains it.
pub struct FoundPolicy<P: ?Sized> {
    pub policy: Arc<P>,
    pub layer: LayerId,
}

pub struct PolicyList {
    id: LayerId,
    parent: Option<Arc<PolicyList>>,
    policies: RwLock<FxHashMap<PolicyKey, Box<dyn Any + Send + Sync>>>,
}

impl Default for PolicyList {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyList {
    /// Creates a root layer.
    pub fn new() -> Self {
        Self {
            id: NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed),
            parent: None,
            policies: Default::default(),
        }
    }

    pub fn with_parent(parent: Arc<PolicyList>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new()
        }
    }

    #[inline]
    pub fn id(&self) -> LayerId {
        self.id
    }

    #[inline]
    pub fn parent(&self) -> Option<&Arc<PolicyList>> {
        self.parent.as_ref()
    }

    /// Finds a policy for the given key, falling back to the open generic key of closed generic
    /// types, and then to the default policy.
    pub fn get<P: ?Sized + Send + Sync + 'static>(&self, key: &BuildKey) -> Option<FoundPolicy<P>> {
        self.get_no_default(key).or_else(|| self.get_default())
    }

    /// Finds a policy for the given key or its open generic key, ignoring defaults.
    pub fn get_no_default<P: ?Sized + Send + Sync + 'static>(
        &self,
        key: &BuildKey,
    ) -> Option<FoundPolicy<P>> {
        self.get_exact(key).or_else(|| {
            key.open_generic_key()
                .and_then(|open_key| self.get_exact(&open_key))
        })
    }

    /// Finds a policy for exactly the given key in this layer or its ancestors.
    pub fn get_exact<P: ?Sized + Send + Sync + 'static>(
        &self,
        key: &BuildKey,
    ) -> Option<FoundPolicy<P>> {
        self.find(&(TypeId::of::<P>(), Some(key.clone())))
    }

    pub fn get_default<P: ?Sized + Send + Sync + 'static>(&self) -> Option<FoundPolicy<P>> {
        self.find(&(TypeId::of::<P>(), None))
    }

    /// Finds a policy for exactly the given key in this layer only.
    pub fn get_local<P: ?Sized + Send + Sync + 'static>(&self, key: &BuildKey) -> Option<Arc<P>> {
        self.find_local(&(TypeId::of::<P>(), Some(key.clone())))
    }

    pub fn set<P: ?Sized + Send + Sync + 'static>(&self, key: BuildKey, policy: Arc<P>) {
        self.policies
            .write()
            .insert((TypeId::of::<P>(), Some(key)), Box::new(policy));
    }

    pub fn set_default<P: ?Sized + Send + Sync + 'static>(&self, policy: Arc<P>) {
        self.policies
            .write()
            .insert((TypeId::of::<P>(), None), Box::new(policy));
    }

    /// Returns the local policy for the given key, creating it if absent. The flag reports if the
    /// policy was created by this call.
    pub fn set_if_absent<P: ?Sized + Send + Sync + 'static>(
        &self,
        key: BuildKey,
        make: impl FnOnce() -> Arc<P>,
    ) -> (Arc<P>, bool) {
        let mut policies = self.policies.write();
        let entry_key = (TypeId::of::<P>(), Some(key));
        if let Some(policy) = policies
            .get(&entry_key)
            .and_then(|policy| policy.downcast_ref::<Arc<P>>())
        {
            return (policy.clone(), false);
        }

        let policy = make();
        policies.insert(entry_key, Box::new(policy.clone()));
        (policy, true)
    }

    /// Removes the local policy for the given key. Ancestors are unaffected.
    pub fn clear<P: ?Sized + Send + Sync + 'static>(&self, key: &BuildKey) {
        self.policies
            .write()
            .remove(&(TypeId::of::<P>(), Some(key.clone())));
    }

    pub fn clear_default<P: ?Sized + Send + Sync + 'static>(&self) {
        self.policies.write().remove(&(TypeId::of::<P>(), None));
    }

    fn find<P: ?Sized + Send + Sync + 'static>(&self, key: &PolicyKey) -> Option<FoundPolicy<P>> {
        let mut layer = Some(self);
        while let Some(current) = layer {
            if let Some(policy) = current.find_local(key) {
                return Some(FoundPolicy {
                    policy,
                    layer: current.id,
                });
            }

            layer = current.parent.as_deref();
        }

        None
    }

    fn find_local<P: ?Sized + Send + Sync + 'static>(&self, key: &PolicyKey) -> Option<Arc<P>> {
        self.policies
            .read()
            .get(key)
            .and_then(|policy| policy.downcast_ref::<Arc<P>>())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use crate::build_key::{BuildKey, GenericDefinition, Injectable, TypeInfo};
    use crate::policy::PolicyList;
    use std::sync::Arc;

    trait NamePolicy: Send + Sync {
        fn name(&self) -> &'static str;
    }

    struct FixedName(&'static str);

    impl NamePolicy for FixedName {
        fn name(&self) -> &'static str {
            self.0
        }
    }

    static LIST: GenericDefinition = GenericDefinition::new("List", 1);

    struct Item;

    struct List<T>(std::marker::PhantomData<T>);

    crate::injectable!(Item);

    impl<T: Injectable> Injectable for List<T> {
        fn type_info() -> TypeInfo {
            TypeInfo::generic::<Self>(&LIST, vec![T::type_info()])
        }
    }

    fn name_policy(name: &'static str) -> Arc<dyn NamePolicy> {
        Arc::new(FixedName(name))
    }

    #[test]
    fn should_find_policy_in_parent_and_report_layer() {
        let parent = Arc::new(PolicyList::new());
        let child = PolicyList::with_parent(parent.clone());
        parent.set(BuildKey::of::<Item>(), name_policy("parent"));

        let found = child.get::<dyn NamePolicy>(&BuildKey::of::<Item>()).unwrap();
        assert_eq!(found.policy.name(), "parent");
        assert_eq!(found.layer, parent.id());
        assert_ne!(found.layer, child.id());
    }

    #[test]
    fn should_not_leak_child_writes_to_parent() {
        let parent = Arc::new(PolicyList::new());
        let child = PolicyList::with_parent(parent.clone());
        parent.set(BuildKey::of::<Item>(), name_policy("parent"));
        child.set(BuildKey::of::<Item>(), name_policy("child"));

        assert_eq!(
            child
                .get::<dyn NamePolicy>(&BuildKey::of::<Item>())
                .unwrap()
                .policy
                .name(),
            "child"
        );
        assert_eq!(
            parent
                .get::<dyn NamePolicy>(&BuildKey::of::<Item>())
                .unwrap()
                .policy
                .name(),
            "parent"
        );
    }

    #[test]
    fn should_fall_back_to_open_generic_and_default() {
        let policies = PolicyList::new();
        policies.set_default(name_policy("default"));

        let key = BuildKey::of::<List<Item>>();
        assert_eq!(
            policies.get::<dyn NamePolicy>(&key).unwrap().policy.name(),
            "default"
        );
        assert!(policies.get_no_default::<dyn NamePolicy>(&key).is_none());

        policies.set(key.open_generic_key().unwrap(), name_policy("open"));
        assert_eq!(
            policies.get::<dyn NamePolicy>(&key).unwrap().policy.name(),
            "open"
        );

        policies.set(key.clone(), name_policy("closed"));
        assert_eq!(
            policies.get::<dyn NamePolicy>(&key).unwrap().policy.name(),
            "closed"
        );
    }

    #[test]
    fn should_distinguish_policy_types() {
        let policies = PolicyList::new();
        policies.set(BuildKey::of::<Item>(), Arc::new(5usize));

        assert!(policies.get::<dyn NamePolicy>(&BuildKey::of::<Item>()).is_none());
        assert_eq!(
            *policies.get_local::<usize>(&BuildKey::of::<Item>()).unwrap(),
            5
        );
    }

    #[test]
    fn should_create_absent_policy_once() {
        let policies = PolicyList::new();
        let (first, created) =
            policies.set_if_absent(BuildKey::of::<Item>(), || name_policy("first"));
        assert!(created);

        let (second, created) =
            policies.set_if_absent(BuildKey::of::<Item>(), || name_policy("second"));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn should_clear_local_policy_only() {
        let parent = Arc::new(PolicyList::new());
        let child = PolicyList::with_parent(parent.clone());
        parent.set(BuildKey::of::<Item>(), name_policy("parent"));
        child.set(BuildKey::of::<Item>(), name_policy("child"));

        child.clear::<dyn NamePolicy>(&BuildKey::of::<Item>());
        assert_eq!(
            child
                .get::<dyn NamePolicy>(&BuildKey::of::<Item>())
                .unwrap()
                .policy
                .name(),
            "parent"
        );
    }
}
