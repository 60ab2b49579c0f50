//! The cross-worker ownership transfer protocol.
//!
//! An unfrozen object graph may change workers only through [`transfer`],
//! which rebinds the ownership tag of every unfrozen member so the
//! receiver becomes the one worker allowed to mutate and release it.
//! Frozen objects need no transfer at all: they are immutable and shared,
//! so a frozen root crosses by reference in every mode.
//!
//! The whole operation runs under a single heap write lock, so a transfer
//! is atomic with respect to mutation, freezing, and collection.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use vela_heap::{still_reachable, Heap, HeapWriter, ObjRef, RuntimeResult, Value, WorkerId};

/// How strictly a transfer verifies that the sender gives the graph up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransferMode {
    /// Verify the unfrozen subgraph is disjoint: the only external strong
    /// reference into it is the handle being transferred. Fail with a
    /// still-reachable error otherwise.
    #[default]
    Checked,
    /// Verify like `Checked`, but fall back to a deep structural copy when
    /// the graph is still reachable. Always succeeds; the caller may
    /// receive a different root handle.
    Safe,
    /// Rebind ownership without any verification. The caller asserts the
    /// graph is disjoint; a false assertion leads to cross-worker mutation
    /// of unfrozen data, which the heap punishes with a panic when caught.
    Unchecked,
}

/// Move `value` from worker `from` to worker `to` under `mode`.
///
/// Consumes the sender's handle. On success the returned value is owned by
/// `to`; in `Safe` mode it may be a fresh deep copy, in which case the
/// original was released on the sender's behalf. On a `Checked` failure
/// nothing moves and the sender keeps ownership.
pub fn transfer(
    heap: &Heap,
    from: WorkerId,
    to: WorkerId,
    value: Value,
    mode: TransferMode,
) -> RuntimeResult<Value> {
    let Some(root) = value.as_ref() else {
        return Ok(value); // Scalars carry no ownership.
    };

    let mut writer = heap.writer();
    if writer.is_frozen(root) || !writer.is_live(root) {
        return Ok(value);
    }

    let members = unfrozen_closure(&writer, root);
    match mode {
        TransferMode::Unchecked => {
            rebind(&mut writer, &members, to);
            Ok(value)
        }
        TransferMode::Checked | TransferMode::Safe => {
            if is_disjoint(&writer, root, &members) {
                rebind(&mut writer, &members, to);
                trace!(?root, %from, %to, members = members.len(), "transferred");
                Ok(value)
            } else if mode == TransferMode::Checked {
                Err(still_reachable())
            } else {
                let Some(copy) = writer.deep_copy(root, to) else {
                    return Ok(value);
                };
                drop(writer);
                trace!(?root, ?copy, %from, %to, "reachable, transferred a copy");
                heap.release(from, root);
                Ok(Value::Ref(copy))
            }
        }
    }
}

/// Rebind the unfrozen closure under `root` to worker `to` without any
/// verification. Used when disjointness was already established, e.g. when
/// a consumer takes a future's result.
pub(crate) fn rebind_closure(writer: &mut HeapWriter<'_>, root: ObjRef, to: WorkerId) {
    let members = unfrozen_closure(writer, root);
    rebind(writer, &members, to);
}

/// The unfrozen objects reachable from `root`, stopping at frozen nodes.
fn unfrozen_closure(writer: &HeapWriter<'_>, root: ObjRef) -> Vec<ObjRef> {
    let mut seen: FxHashSet<ObjRef> = FxHashSet::default();
    seen.insert(root);
    let mut order = vec![root];
    let mut i = 0;
    while i < order.len() {
        let r = order[i];
        i += 1;
        for child in writer.outgoing(r) {
            if writer.is_live(child) && !writer.is_frozen(child) && seen.insert(child) {
                order.push(child);
            }
        }
    }
    order
}

/// Disjointness check: every member's strong count must be fully explained
/// by edges internal to the closure, plus one for the transferred handle on
/// the root itself. Any surplus means the sender (or someone else) still
/// reaches the graph.
fn is_disjoint(writer: &HeapWriter<'_>, root: ObjRef, members: &[ObjRef]) -> bool {
    let member_set: FxHashSet<ObjRef> = members.iter().copied().collect();
    let mut inner: FxHashMap<ObjRef, u32> = FxHashMap::default();
    for &m in members {
        for child in writer.outgoing(m) {
            if member_set.contains(&child) {
                *inner.entry(child).or_insert(0) += 1;
            }
        }
    }
    members.iter().all(|&m| {
        let expected = inner.get(&m).copied().unwrap_or(0) + u32::from(m == root);
        writer.strong(m) == Some(expected)
    })
}

fn rebind(writer: &mut HeapWriter<'_>, members: &[ObjRef], to: WorkerId) {
    for &m in members {
        writer.rebind_owner(m, to);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use vela_heap::{Heap, Owner, RuntimeErrorKind, Value, WorkerId};

    use super::{transfer, TransferMode};

    const W1: WorkerId = WorkerId::new(1);
    const W2: WorkerId = WorkerId::new(2);

    #[test]
    fn checked_transfer_moves_a_disjoint_graph() {
        let heap = Heap::new();
        let leaf = heap.alloc(W1, vec![Value::Int(1)]);
        let root = heap.alloc(W1, vec![Value::Ref(leaf)]);

        let moved = transfer(&heap, W1, W2, Value::Ref(root), TransferMode::Checked).unwrap();
        assert_eq!(moved, Value::Ref(root));
        assert_eq!(heap.owner(root), Some(Owner::Local(W2)));
        assert_eq!(heap.owner(leaf), Some(Owner::Local(W2)));
    }

    #[test]
    fn checked_transfer_rejects_a_reachable_graph() {
        let heap = Heap::new();
        let root = heap.alloc(W1, vec![Value::Int(1)]);
        heap.retain(root); // The sender keeps a second handle.

        let err = transfer(&heap, W1, W2, Value::Ref(root), TransferMode::Checked).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::StillReachable);
        // Nothing moved; the sender still owns and can use the object.
        assert_eq!(heap.owner(root), Some(Owner::Local(W1)));
        heap.set_field(W1, root, 0, Value::Int(2)).unwrap();
    }

    #[test]
    fn checked_transfer_rejects_an_internally_held_member() {
        let heap = Heap::new();
        let leaf = heap.alloc(W1, vec![Value::Int(1)]);
        heap.retain(leaf); // Sender keeps a direct handle to a child.
        let root = heap.alloc(W1, vec![Value::Ref(leaf)]);

        let err = transfer(&heap, W1, W2, Value::Ref(root), TransferMode::Checked).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::StillReachable);
    }

    #[test]
    fn safe_transfer_copies_when_reachable() {
        let heap = Heap::new();
        let root = heap.alloc(W1, vec![Value::Int(7)]);
        heap.retain(root);

        let moved = transfer(&heap, W1, W2, Value::Ref(root), TransferMode::Safe).unwrap();
        let copy = moved.as_ref().unwrap();
        assert_ne!(copy, root);
        assert_eq!(heap.owner(copy), Some(Owner::Local(W2)));
        assert_eq!(heap.get_field(copy, 0), Some(Value::Int(7)));
        // The sender's transferred handle was released; its retained one
        // remains, and the original stays local to the sender.
        assert_eq!(heap.strong_count(root), Some(1));
        assert_eq!(heap.owner(root), Some(Owner::Local(W1)));
    }

    #[test]
    fn safe_transfer_moves_without_copy_when_disjoint() {
        let heap = Heap::new();
        let root = heap.alloc(W1, vec![Value::Int(7)]);

        let moved = transfer(&heap, W1, W2, Value::Ref(root), TransferMode::Safe).unwrap();
        assert_eq!(moved, Value::Ref(root));
        assert_eq!(heap.owner(root), Some(Owner::Local(W2)));
    }

    #[test]
    fn safe_copy_preserves_cycles() {
        let heap = Heap::new();
        let a = heap.alloc(W1, vec![Value::Unit]);
        let b = heap.alloc(W1, vec![Value::Ref(a)]);
        heap.retain(b);
        heap.set_field(W1, a, 0, Value::Ref(b)).unwrap();
        heap.retain(a); // Keeps the graph reachable, forcing the copy.

        let moved = transfer(&heap, W1, W2, Value::Ref(a), TransferMode::Safe).unwrap();
        let ca = moved.as_ref().unwrap();
        assert_ne!(ca, a);
        let cb = heap.get_field(ca, 0).unwrap().as_ref().unwrap();
        assert_ne!(cb, b);
        assert_eq!(heap.get_field(cb, 0), Some(Value::Ref(ca)));
    }

    #[test]
    fn unchecked_transfer_skips_verification() {
        let heap = Heap::new();
        let root = heap.alloc(W1, vec![Value::Int(1)]);
        heap.retain(root); // Would fail a checked transfer.

        let moved = transfer(&heap, W1, W2, Value::Ref(root), TransferMode::Unchecked).unwrap();
        assert_eq!(moved, Value::Ref(root));
        assert_eq!(heap.owner(root), Some(Owner::Local(W2)));
    }

    #[test]
    fn frozen_graphs_cross_by_reference() {
        let heap = Heap::new();
        let root = heap.alloc(W1, vec![Value::Int(1)]);
        heap.freeze(root);
        heap.retain(root); // External reachability is irrelevant once frozen.

        let moved = transfer(&heap, W1, W2, Value::Ref(root), TransferMode::Checked).unwrap();
        assert_eq!(moved, Value::Ref(root));
        assert_eq!(heap.owner(root), Some(Owner::Shared));
    }

    #[test]
    fn transfer_stops_at_frozen_boundary() {
        let heap = Heap::new();
        let shared = heap.alloc(W1, vec![Value::Int(1)]);
        heap.freeze(shared);
        heap.retain(shared); // Another worker may also hold the frozen part.
        let root = heap.alloc(W1, vec![Value::Ref(shared)]);

        let moved = transfer(&heap, W1, W2, Value::Ref(root), TransferMode::Checked).unwrap();
        assert_eq!(moved, Value::Ref(root));
        assert_eq!(heap.owner(root), Some(Owner::Local(W2)));
        assert_eq!(heap.owner(shared), Some(Owner::Shared));
    }

    #[test]
    fn scalars_transfer_trivially() {
        let heap = Heap::new();
        let moved = transfer(&heap, W1, W2, Value::Int(5), TransferMode::Checked).unwrap();
        assert_eq!(moved, Value::Int(5));
    }
}
