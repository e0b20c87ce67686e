//! Per-thread call-depth tracking for instrumented stream operations.
//!
//! A wrapper that delegates to another instrumented operation on the same
//! thread (a bulk read built from single-byte reads, a writer wrapping a
//! writer) would otherwise capture the same data twice. Only the outermost
//! call on a thread, per [`ResourceClass`], runs capture logic.

use std::cell::RefCell;
use std::marker::PhantomData;

use crate::resource::ResourceClass;

thread_local! {
    static CALL_DEPTH: RefCell<[usize; ResourceClass::COUNT]> =
        const { RefCell::new([0; ResourceClass::COUNT]) };
}

/// Increment the counter for `class`, returning its previous value.
pub fn enter(class: ResourceClass) -> usize {
    CALL_DEPTH.with(|depths| {
        let mut depths = depths.borrow_mut();
        let previous = depths[class.index()];
        depths[class.index()] = previous + 1;
        previous
    })
}

pub fn exit(class: ResourceClass) {
    CALL_DEPTH.with(|depths| {
        let mut depths = depths.borrow_mut();
        depths[class.index()] = depths[class.index()].saturating_sub(1);
    });
}

/// Force the counter for `class` back to idle.
pub fn reset(class: ResourceClass) {
    CALL_DEPTH.with(|depths| depths.borrow_mut()[class.index()] = 0);
}

pub fn depth(class: ResourceClass) -> usize {
    CALL_DEPTH.with(|depths| depths.borrow()[class.index()])
}

/// Scope guard pairing [`enter`] with the matching exit.
///
/// Dropping the outermost guard resets the counter to zero, so a call that
/// unwound abnormally further down cannot leave the class locked out.
#[must_use = "the depth is released when the guard drops"]
#[derive(Debug)]
pub struct CallDepthGuard {
    class: ResourceClass,
    outermost: bool,
    // Depth is per thread; the guard must be dropped where it was created.
    _not_send: PhantomData<*const ()>,
}

impl CallDepthGuard {
    pub fn enter(class: ResourceClass) -> Self {
        Self {
            class,
            outermost: enter(class) == 0,
            _not_send: PhantomData,
        }
    }

    pub fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for CallDepthGuard {
    fn drop(&mut self) {
        if self.outermost {
            reset(self.class);
        } else {
            exit(self.class);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_returns_previous_depth() {
        let class = ResourceClass::ByteInput;
        assert_eq!(enter(class), 0);
        assert_eq!(enter(class), 1);
        exit(class);
        exit(class);
        assert_eq!(depth(class), 0);
    }

    #[test]
    fn only_outermost_guard_is_outermost() {
        let outer = CallDepthGuard::enter(ResourceClass::CharOutput);
        {
            let inner = CallDepthGuard::enter(ResourceClass::CharOutput);
            assert!(!inner.is_outermost());
            assert_eq!(depth(ResourceClass::CharOutput), 2);
        }
        assert!(outer.is_outermost());
        drop(outer);
        assert_eq!(depth(ResourceClass::CharOutput), 0);
    }

    #[test]
    fn classes_are_independent() {
        let _bytes = CallDepthGuard::enter(ResourceClass::ByteOutput);
        let chars = CallDepthGuard::enter(ResourceClass::CharInput);
        assert!(chars.is_outermost());
    }

    #[test]
    fn outermost_drop_clears_leaked_depth() {
        let class = ResourceClass::CharInput;
        let guard = CallDepthGuard::enter(class);
        // A nested call that never exited.
        enter(class);
        enter(class);
        drop(guard);
        assert_eq!(depth(class), 0);
    }

    #[test]
    fn counter_recovers_after_panic() {
        let class = ResourceClass::ByteInput;
        let result = std::panic::catch_unwind(|| {
            let _outer = CallDepthGuard::enter(class);
            let _inner = CallDepthGuard::enter(class);
            panic!("stream failed mid-read");
        });
        assert!(result.is_err());
        assert_eq!(depth(class), 0);
        assert!(CallDepthGuard::enter(class).is_outermost());
    }

    #[test]
    fn depth_is_per_thread() {
        let _held = CallDepthGuard::enter(ResourceClass::ByteOutput);
        let other =
            std::thread::spawn(|| CallDepthGuard::enter(ResourceClass::ByteOutput).is_outermost())
                .join()
                .unwrap();
        assert!(other);
    }
}
