//! Identity-keyed, weakly-held association from resources to capture state.
//!
//! An entry never extends the lifetime of its resource. Once the resource's
//! [`ResourceHandle`] is dropped the entry is dead: lookups treat it as
//! absent and remove it, and [`CorrelationStore::sweep`] reclaims the rest.

use std::sync::Weak;

use dashmap::DashMap;
use tracing::trace;

use crate::context::SharedContext;
use crate::resource::{ResourceClass, ResourceHandle, ResourceKey};

struct Slot<V> {
    liveness: Weak<()>,
    value: V,
}

impl<V> Slot<V> {
    fn is_alive(&self) -> bool {
        self.liveness.strong_count() > 0
    }
}

/// One correlation layer, e.g. byte input streams to their request context.
pub struct CorrelationStore<V> {
    slots: DashMap<usize, Slot<V>>,
}

impl<V> Default for CorrelationStore<V> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<V> std::fmt::Debug for CorrelationStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationStore")
            .field("entries", &self.slots.len())
            .finish()
    }
}

impl<V: Clone> CorrelationStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `value` with `resource`, returning the value it replaced.
    pub fn attach(&self, resource: &ResourceHandle, value: V) -> Option<V> {
        let key = resource.key();
        self.slots
            .insert(
                key.id(),
                Slot {
                    liveness: key.liveness(),
                    value,
                },
            )
            .map(|slot| slot.value)
    }

    pub fn get(&self, resource: &ResourceHandle) -> Option<V> {
        self.slots.get(&resource.id()).map(|slot| slot.value.clone())
    }

    /// Look up by weak key. A dead entry is removed and reported as absent.
    pub fn get_key(&self, key: &ResourceKey) -> Option<V> {
        match self.slots.get(&key.id()) {
            Some(slot) if slot.is_alive() => return Some(slot.value.clone()),
            Some(_) => {}
            None => return None,
        }
        self.slots.remove_if(&key.id(), |_, slot| !slot.is_alive());
        None
    }

    pub fn detach(&self, resource: &ResourceHandle) -> Option<V> {
        self.slots.remove(&resource.id()).map(|(_, slot)| slot.value)
    }

    pub fn detach_key(&self, key: &ResourceKey) -> Option<V> {
        self.slots.remove(&key.id()).map(|(_, slot)| slot.value)
    }

    /// Drop every entry whose resource is gone. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_alive());
        before.saturating_sub(self.slots.len())
    }

    /// Entries currently held, dead ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Which side of the exchange a correlation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    fn index(self) -> usize {
        self as usize
    }
}

/// Selects one store inside a [`CorrelationRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub class: ResourceClass,
    pub direction: Direction,
}

impl StoreKey {
    pub fn new(class: ResourceClass, direction: Direction) -> Self {
        Self { class, direction }
    }

    fn index(self) -> usize {
        self.class.index() * 2 + self.direction.index()
    }
}

const STORE_COUNT: usize = ResourceClass::COUNT * 2;

/// The full set of stores, one per (resource class, direction) pair, so the
/// same resource can carry independent correlations at different layers.
#[derive(Debug)]
pub struct CorrelationRegistry {
    stores: [CorrelationStore<SharedContext>; STORE_COUNT],
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self {
            stores: std::array::from_fn(|_| CorrelationStore::new()),
        }
    }
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, key: StoreKey) -> &CorrelationStore<SharedContext> {
        &self.stores[key.index()]
    }

    pub fn attach(&self, key: StoreKey, resource: &ResourceHandle, context: SharedContext) {
        trace!(store = ?key, resource = resource.id(), "capture context attached");
        self.store(key).attach(resource, context);
    }

    pub fn get(&self, key: StoreKey, resource: &ResourceHandle) -> Option<SharedContext> {
        self.store(key).get(resource)
    }

    pub fn get_key(&self, key: StoreKey, resource: &ResourceKey) -> Option<SharedContext> {
        self.store(key).get_key(resource)
    }

    pub fn detach(&self, key: StoreKey, resource: &ResourceHandle) -> Option<SharedContext> {
        self.store(key).detach(resource)
    }

    /// Remove `resource` from every store. Returns how many entries went.
    pub fn detach_all(&self, resource: &ResourceKey) -> usize {
        self.stores
            .iter()
            .filter_map(|store| store.detach_key(resource))
            .count()
    }

    pub fn sweep(&self) -> usize {
        let removed: usize = self.stores.iter().map(CorrelationStore::sweep).sum();
        if removed > 0 {
            trace!(removed, "swept orphaned capture contexts");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.stores.iter().map(CorrelationStore::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.iter().all(CorrelationStore::is_empty)
    }
}
