//! Unit tests for the heap arena: refcount lifecycle, release paths,
//! atomic cells, weak references.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use pretty_assertions::assert_eq;

use crate::handle::WorkerId;
use crate::heap::Heap;
use crate::value::Value;

const W1: WorkerId = WorkerId::new(1);
const W2: WorkerId = WorkerId::new(2);

#[test]
fn alloc_starts_with_refcount_one_unfrozen() {
    let heap = Heap::new();
    let obj = heap.alloc(W1, vec![Value::Int(5)]);

    assert_eq!(heap.strong_count(obj), Some(1));
    assert!(!heap.is_frozen(obj));
    assert_eq!(heap.owner(obj), Some(crate::object::Owner::Local(W1)));
}

#[test]
fn release_to_zero_frees_unfrozen_local_immediately() {
    let heap = Heap::new();
    let obj = heap.alloc(W1, vec![Value::Int(5)]);
    assert_eq!(heap.live_count(), 1);

    heap.release(W1, obj);
    assert_eq!(heap.live_count(), 0);
    assert!(!heap.is_live(obj));
    // No trip through the deferred buffer on the fast path.
    assert_eq!(heap.deferred_len(), 0);
}

#[test]
fn release_cascades_through_owned_children() {
    let heap = Heap::new();
    let leaf = heap.alloc(W1, vec![Value::Int(1)]);
    let mid = heap.alloc(W1, vec![Value::Ref(leaf)]);
    let root = heap.alloc(W1, vec![Value::Ref(mid)]);
    assert_eq!(heap.live_count(), 3);

    heap.release(W1, root);
    assert_eq!(heap.live_count(), 0);
}

#[test]
fn retain_extends_lifetime() {
    let heap = Heap::new();
    let obj = heap.alloc(W1, vec![]);
    heap.retain(obj);

    heap.release(W1, obj);
    assert!(heap.is_live(obj));
    heap.release(W1, obj);
    assert!(!heap.is_live(obj));
}

#[test]
fn frozen_zero_count_goes_to_deferred_buffer() {
    let heap = Heap::new();
    let obj = heap.alloc(W1, vec![Value::Int(9)]);
    heap.freeze(obj);

    heap.release(W1, obj);
    // Frozen garbage is buffered, not freed in place.
    assert!(heap.is_live(obj));
    assert_eq!(heap.deferred_len(), 1);

    assert_eq!(heap.drain_deferred(), 1);
    assert!(!heap.is_live(obj));
}

#[test]
#[should_panic(expected = "released")]
fn releasing_unowned_unfrozen_object_is_fatal() {
    let heap = Heap::new();
    let obj = heap.alloc(W1, vec![]);
    heap.release(W2, obj);
}

#[test]
fn any_worker_may_release_frozen_objects() {
    let heap = Heap::new();
    let obj = heap.alloc(W1, vec![]);
    heap.freeze(obj);
    heap.retain(obj);

    heap.release(W2, obj);
    assert_eq!(heap.strong_count(obj), Some(1));
}

#[test]
fn set_field_releases_old_value() {
    let heap = Heap::new();
    let old = heap.alloc(W1, vec![Value::Int(1)]);
    let holder = heap.alloc(W1, vec![Value::Ref(old)]);

    heap.set_field(W1, holder, 0, Value::Int(2)).unwrap();
    assert!(!heap.is_live(old));
    assert_eq!(heap.get_field(holder, 0), Some(Value::Int(2)));
}

#[test]
fn generation_prevents_stale_handle_resurrection() {
    let heap = Heap::new();
    let a = heap.alloc(W1, vec![Value::Int(1)]);
    heap.release(W1, a);

    // A new allocation may reuse the slot; the stale handle must not see it.
    let b = heap.alloc(W1, vec![Value::Int(2)]);
    assert_eq!(b.index(), a.index());
    assert!(!heap.is_live(a));
    assert!(heap.is_live(b));
}

#[test]
fn shallow_copy_is_unfrozen_and_shares_children() {
    let heap = Heap::new();
    let child = heap.alloc(W1, vec![Value::Int(3)]);
    let orig = heap.alloc(W1, vec![Value::Ref(child), Value::Int(7)]);
    heap.freeze(orig);

    let copy = heap.shallow_copy(W2, orig).unwrap();
    assert!(!heap.is_frozen(copy));
    assert_eq!(heap.get_field(copy, 0), Some(Value::Ref(child)));
    assert_eq!(heap.get_field(copy, 1), Some(Value::Int(7)));
    assert_eq!(heap.strong_count(child), Some(2));
}

mod atomic_cells {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_cell_rejects_unfrozen_ref() {
        let heap = Heap::new();
        let unfrozen = heap.alloc(W1, vec![]);
        let err = heap.alloc_atomic(W1, Value::Ref(unfrozen)).unwrap_err();
        assert_eq!(
            err.kind,
            crate::errors::RuntimeErrorKind::InvalidMutability
        );
    }

    #[test]
    fn plain_cell_accepts_frozen_ref_and_scalars() {
        let heap = Heap::new();
        let frozen = heap.alloc(W1, vec![]);
        heap.freeze(frozen);

        let c1 = heap.alloc_atomic(W1, Value::Ref(frozen)).unwrap();
        let c2 = heap.alloc_atomic(W1, Value::Int(42)).unwrap();
        assert_eq!(heap.cell_get(c1), Some(Value::Ref(frozen)));
        assert_eq!(heap.cell_get(c2), Some(Value::Int(42)));
    }

    #[test]
    fn cell_set_releases_old_value() {
        let heap = Heap::new();
        let old = heap.alloc(W1, vec![]);
        heap.freeze(old);
        let cell = heap.alloc_atomic(W1, Value::Ref(old)).unwrap();

        heap.cell_set(cell, Value::Unit).unwrap();
        // Frozen old value lands in the deferred buffer.
        assert_eq!(heap.deferred_len(), 1);
        heap.drain_deferred();
        assert!(!heap.is_live(old));
    }

    #[test]
    fn freezable_cell_allows_unfrozen_until_frozen() {
        let heap = Heap::new();
        let local = heap.alloc(W1, vec![]);
        let cell = heap.alloc_freezable_atomic(W1, Value::Ref(local));
        assert_eq!(heap.cell_get(cell), Some(Value::Ref(local)));

        heap.freeze(cell);
        assert!(heap.is_frozen(local)); // freeze descends through the cell
        let err = heap.cell_set(cell, Value::Unit).unwrap_err();
        assert_eq!(err.message, "object is frozen");
    }

    #[test]
    fn compare_and_set_swaps_only_on_match() {
        let heap = Heap::new();
        let cell = heap.alloc_atomic(W1, Value::Int(1)).unwrap();

        assert!(!heap
            .cell_compare_and_set(cell, &Value::Int(9), Value::Int(2))
            .unwrap());
        assert_eq!(heap.cell_get(cell), Some(Value::Int(1)));

        assert!(heap
            .cell_compare_and_set(cell, &Value::Int(1), Value::Int(2))
            .unwrap());
        assert_eq!(heap.cell_get(cell), Some(Value::Int(2)));
    }

    #[test]
    fn cell_writes_bump_mutation_epoch() {
        let heap = Heap::new();
        let cell = heap.alloc_atomic(W1, Value::Int(0)).unwrap();
        let before = heap.mutation_epoch();
        heap.cell_set(cell, Value::Int(1)).unwrap();
        assert!(heap.mutation_epoch() > before);
    }

    #[test]
    fn compare_and_swap_bumps_epoch_only_when_it_swaps() {
        let heap = Heap::new();
        let cell = heap.alloc_atomic(W1, Value::Int(1)).unwrap();

        let before = heap.mutation_epoch();
        heap.cell_compare_and_swap(cell, &Value::Int(9), Value::Int(2))
            .unwrap();
        assert_eq!(heap.mutation_epoch(), before);

        heap.cell_compare_and_swap(cell, &Value::Int(1), Value::Int(2))
            .unwrap();
        assert!(heap.mutation_epoch() > before);
    }
}

mod weak_refs {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn upgrade_returns_referent_while_alive() {
        let heap = Heap::new();
        let obj = heap.alloc(W1, vec![Value::Int(1)]);
        let weak = heap.downgrade(obj);

        assert_eq!(heap.strong_count(obj), Some(1)); // downgrade is free
        let strong = weak.upgrade(&heap).unwrap();
        assert_eq!(strong, Value::Ref(obj));
        assert_eq!(heap.strong_count(obj), Some(2));
    }

    #[test]
    fn successful_upgrade_bumps_the_mutation_epoch() {
        let heap = Heap::new();
        let obj = heap.alloc(W1, vec![]);
        let weak = heap.downgrade(obj);

        // A resurrection must invalidate any in-flight cyclic analysis.
        let before = heap.mutation_epoch();
        weak.upgrade(&heap).unwrap();
        assert!(heap.mutation_epoch() > before);

        heap.release(W1, obj);
        heap.release(W1, obj);
        // A failed upgrade resurrects nothing and leaves the epoch alone.
        let after = heap.mutation_epoch();
        assert_eq!(weak.upgrade(&heap), None);
        assert_eq!(heap.mutation_epoch(), after);
    }

    #[test]
    fn upgrade_after_collection_returns_none() {
        let heap = Heap::new();
        let obj = heap.alloc(W1, vec![]);
        let weak = heap.downgrade(obj);

        heap.release(W1, obj);
        assert_eq!(weak.upgrade(&heap), None);
        assert!(!weak.is_alive(&heap));
    }

    #[test]
    fn buffered_frozen_garbage_is_already_unobservable() {
        let heap = Heap::new();
        let obj = heap.alloc(W1, vec![]);
        heap.freeze(obj);
        let weak = heap.downgrade(obj);

        heap.release(W1, obj);
        // Still in the deferred buffer, but dead to the program.
        assert!(heap.is_live(obj));
        assert_eq!(weak.upgrade(&heap), None);
    }
}
