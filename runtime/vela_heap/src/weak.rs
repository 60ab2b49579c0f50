//! Weak references: non-owning observation edges.
//!
//! A weak reference never contributes to an object's strong count and never
//! keeps it alive. Liveness is detected through the arena's generations:
//! freeing a slot bumps its generation, so a stale weak handle observes the
//! mismatch and reports the referent as gone instead of dangling.

use crate::handle::ObjRef;
use crate::heap::Heap;
use crate::value::Value;

/// A non-owning handle to a heap object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeakRef {
    target: ObjRef,
}

impl WeakRef {
    /// The raw target handle, live or not.
    pub fn target(self) -> ObjRef {
        self.target
    }

    /// Attempt to obtain a strong reference to the referent.
    ///
    /// Returns `Some` with a freshly retained handle only while the
    /// referent is alive. Objects whose strong count already reached zero
    /// are reported as gone even if they still sit in the deferred-release
    /// buffer: they are dead to the program, just not finalized yet.
    pub fn upgrade(self, heap: &Heap) -> Option<Value> {
        let mut inner = heap.lock_inner();
        let o = inner.get_mut(self.target)?;
        if o.strong == 0 {
            return None;
        }
        o.strong += 1;
        // An upgrade can resurrect a cycle member mid-analysis; the epoch
        // bump forces an in-flight cyclic collection to restart. It must
        // happen while the write lock is held, or the collector could
        // observe the retain with the old epoch and still sever the graph.
        heap.bump_mutation_epoch();
        drop(inner);
        Some(Value::Ref(self.target))
    }

    /// Non-retaining liveness probe.
    pub fn is_alive(self, heap: &Heap) -> bool {
        let inner = heap.read_inner();
        inner.get(self.target).is_some_and(|o| o.strong > 0)
    }
}

impl Heap {
    /// Create a weak reference to `obj`. Does not touch the strong count.
    pub fn downgrade(&self, obj: ObjRef) -> WeakRef {
        WeakRef { target: obj }
    }
}
