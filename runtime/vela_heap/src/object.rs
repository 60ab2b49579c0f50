//! Heap object representation: refcount, frozen bit, ownership tag, body.

use smallvec::SmallVec;

use crate::handle::WorkerId;
use crate::value::Value;

/// Ownership tag of a heap object.
///
/// Invariant: freezing an object sets the tag to `Shared` and it never
/// reverts. An unfrozen object is always `Local` to exactly one worker,
/// which is the only worker allowed to mutate or release it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    /// Exclusively owned and mutable by one worker.
    Local(WorkerId),
    /// Frozen and shared; readable by every worker, mutable by none.
    Shared,
}

/// Body of a heap object.
#[derive(Clone, Debug)]
pub enum Body {
    /// An ordinary record: an ordered list of fields.
    Record { fields: SmallVec<[Value; 4]> },

    /// An atomic reference cell — the only sanctioned mutable edge visible
    /// to multiple workers, and a root for the cyclic collector.
    ///
    /// `freezable` distinguishes the two cell flavors: a non-freezable cell
    /// only ever holds frozen (or scalar) values and is shared from birth;
    /// a freezable cell may hold unfrozen values while it is itself local,
    /// and refuses writes once frozen.
    AtomicCell { value: Value, freezable: bool },
}

/// A live heap object.
#[derive(Clone, Debug)]
pub struct Object {
    /// Strong reference count. Reaching zero triggers one of the two
    /// release paths (immediate free for unfrozen locals, deferred buffer
    /// for frozen shared objects).
    pub strong: u32,
    /// Monotonic frozen bit: false at allocation, true forever after
    /// `freeze` reaches the object.
    pub frozen: bool,
    /// Ownership tag; see [`Owner`].
    pub owner: Owner,
    /// Record fields or atomic cell payload.
    pub body: Body,
}

impl Object {
    pub(crate) fn record(worker: WorkerId, fields: SmallVec<[Value; 4]>) -> Self {
        Object {
            strong: 1,
            frozen: false,
            owner: Owner::Local(worker),
            body: Body::Record { fields },
        }
    }

    pub(crate) fn atomic_cell(worker: WorkerId, value: Value, freezable: bool) -> Self {
        Object {
            strong: 1,
            frozen: false,
            owner: Owner::Local(worker),
            body: Body::AtomicCell { value, freezable },
        }
    }

    /// Iterate the outgoing heap edges of this object.
    pub fn outgoing(&self) -> impl Iterator<Item = crate::handle::ObjRef> + '_ {
        let values: &[Value] = match &self.body {
            Body::Record { fields } => fields.as_slice(),
            Body::AtomicCell { value, .. } => std::slice::from_ref(value),
        };
        values.iter().filter_map(Value::as_ref)
    }
}
