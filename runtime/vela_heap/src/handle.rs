//! Handles identifying heap objects and workers.
//!
//! The heap is an arena of generational slots: an [`ObjRef`] names a slot
//! index plus the generation the slot had when the object was allocated.
//! Freeing a slot bumps its generation, so a stale handle can be detected
//! instead of dereferencing freed memory. Cyclic structures become graphs
//! of indices rather than owning references, which lets the collector scan
//! and rewrite the graph without invalidating concurrent readers.

use std::fmt;

/// Handle to a heap object: slot index plus allocation generation.
///
/// `Copy` by design — handles move freely between workers; what moves
/// with ceremony is *ownership* (see the transfer protocol), not the
/// handle bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    index: u32,
    generation: u32,
}

impl ObjRef {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        ObjRef { index, generation }
    }

    /// Slot index in the heap arena.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot at allocation time.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({}g{})", self.index, self.generation)
    }
}

/// Process-unique identifier of a worker; stable for the worker's lifetime.
///
/// Worker 1 is the main worker (the thread that initialized the runtime),
/// matching the original runtime's id assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u32);

impl WorkerId {
    pub const fn new(raw: u32) -> Self {
        WorkerId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}
