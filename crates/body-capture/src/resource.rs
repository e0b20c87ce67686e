use std::fmt;
use std::sync::{Arc, Weak};

/// Identity token owned by an instrumented stream.
///
/// Correlation stores key on the token's identity, never on the stream's
/// contents. Dropping the handle marks every entry keyed on it as dead.
#[derive(Default)]
pub struct ResourceHandle {
    token: Arc<()>,
}

impl ResourceHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            id: self.id(),
            liveness: Arc::downgrade(&self.token),
        }
    }

    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.token) as usize
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceHandle").field(&self.id()).finish()
    }
}

/// Weak reference to a [`ResourceHandle`]; does not keep the resource alive.
///
/// The id stays unique while any key or store entry for it exists, since
/// the weak reference pins the token's allocation.
#[derive(Clone)]
pub struct ResourceKey {
    id: usize,
    liveness: Weak<()>,
}

impl ResourceKey {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.strong_count() > 0
    }

    pub(crate) fn liveness(&self) -> Weak<()> {
        self.liveness.clone()
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.liveness.ptr_eq(&other.liveness)
    }
}

impl Eq for ResourceKey {}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceKey")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Kind of stream a resource is; each has its own call-depth counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    ByteInput,
    CharInput,
    ByteOutput,
    CharOutput,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 4] = [
        ResourceClass::ByteInput,
        ResourceClass::CharInput,
        ResourceClass::ByteOutput,
        ResourceClass::CharOutput,
    ];

    pub(crate) const COUNT: usize = Self::ALL.len();

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_track_liveness() {
        let handle = ResourceHandle::new();
        let key = handle.key();
        assert!(key.is_alive());
        assert_eq!(key.id(), handle.id());
        drop(handle);
        assert!(!key.is_alive());
    }

    #[test]
    fn distinct_handles_have_distinct_ids() {
        let a = ResourceHandle::new();
        let b = ResourceHandle::new();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), a.key());
    }

    #[test]
    fn dead_key_id_is_not_reused() {
        let first = ResourceHandle::new();
        let key = first.key();
        drop(first);
        let second = ResourceHandle::new();
        assert_ne!(second.id(), key.id());
    }
}
