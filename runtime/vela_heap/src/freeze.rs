//! Transitive freezing: the prerequisite for safe sharing.
//!
//! `freeze(x)` marks `x` and everything reachable from it as permanently
//! immutable and shared. The walk runs under the heap write lock, so no
//! worker can ever observe a half-frozen graph. Traversal stops at nodes
//! that are already frozen, which makes the operation idempotent and keeps
//! re-freezing large shared structures cheap.

use crate::handle::ObjRef;
use crate::heap::Heap;
use crate::object::Owner;

impl Heap {
    /// Transitively freeze the subgraph rooted at `root`.
    ///
    /// Every reached object's frozen bit is set and its owner tag becomes
    /// [`Owner::Shared`], never to revert. Freezing an already-frozen
    /// object is a no-op. Atomic cell values are frozen along with the
    /// rest of the graph (cells themselves stay writable unless they are
    /// freezable cells, which refuse writes from this point on).
    pub fn freeze(&self, root: ObjRef) {
        let mut inner = self.lock_inner();
        let mut worklist = vec![root];
        let mut frozen_count = 0usize;
        while let Some(r) = worklist.pop() {
            let Some(o) = inner.get_mut(r) else { continue };
            if o.frozen {
                continue;
            }
            o.frozen = true;
            o.owner = Owner::Shared;
            frozen_count += 1;
            worklist.extend(o.outgoing());
        }
        tracing::trace!(?root, frozen_count, "froze subgraph");
    }
}
