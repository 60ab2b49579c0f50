//! Atomic reference cells: the sanctioned mutable crossing point.
//!
//! An atomic cell is the only place a mutable edge may legally be visible
//! to more than one worker, and every live cell is a root for the cyclic
//! collector. Two flavors exist, mirroring the split in the surface
//! language:
//!
//! - a plain **atomic reference** is shared from birth and only accepts
//!   frozen (or scalar) values, so no unfrozen object can leak across a
//!   worker boundary through it;
//! - a **freezable atomic reference** may hold unfrozen values while it is
//!   itself local to a worker, participates in `freeze` like any other
//!   object, and refuses writes once frozen.
//!
//! Every write releases the old value (a collection candidate) and bumps
//! the heap's mutation epoch so an in-flight cyclic analysis knows to
//! restart.

use crate::errors::{invalid_mutability, object_is_frozen, RuntimeResult};
use crate::handle::{ObjRef, WorkerId};
use crate::heap::Heap;
use crate::object::{Body, Object, Owner};
use crate::value::Value;

impl Heap {
    /// Allocate a plain atomic reference cell holding `value`.
    ///
    /// The cell is born frozen and shared. `value` must be frozen or a
    /// scalar; storing an unfrozen object fails with an
    /// invalid-mutability error. Takes ownership of `value`.
    pub fn alloc_atomic(&self, worker: WorkerId, value: Value) -> RuntimeResult<ObjRef> {
        self.check_cell_value(&value)?;
        let mut object = Object::atomic_cell(worker, value, false);
        object.frozen = true;
        object.owner = Owner::Shared;
        Ok(self.alloc_object(object))
    }

    /// Allocate a freezable atomic reference cell holding `value`.
    ///
    /// The cell starts unfrozen and local to `worker`; it may hold
    /// unfrozen values until it is frozen. Takes ownership of `value`.
    pub fn alloc_freezable_atomic(&self, worker: WorkerId, value: Value) -> ObjRef {
        self.alloc_object(Object::atomic_cell(worker, value, true))
    }

    /// Read the cell's current value. The returned value is not retained.
    pub fn cell_get(&self, cell: ObjRef) -> Option<Value> {
        let inner = self.read_inner();
        match &inner.get(cell)?.body {
            Body::AtomicCell { value, .. } => Some(value.clone()),
            Body::Record { .. } => None,
        }
    }

    /// Replace the cell's value, releasing the old one.
    ///
    /// Takes ownership of `new`. Fails with "object is frozen" on a frozen
    /// freezable cell, and with an invalid-mutability error when storing an
    /// unfrozen object into a plain atomic cell.
    pub fn cell_set(&self, cell: ObjRef, new: Value) -> RuntimeResult<()> {
        let mut inner = self.lock_inner();
        let unfrozen_ref = new
            .as_ref()
            .is_some_and(|r| inner.get(r).is_some_and(|o| !o.frozen));
        let Some(o) = inner.get_mut(cell) else {
            return Ok(());
        };
        let old = match &mut o.body {
            Body::AtomicCell { value, freezable } => {
                if *freezable && o.frozen {
                    return Err(object_is_frozen());
                }
                if !*freezable && unfrozen_ref {
                    return Err(invalid_mutability());
                }
                std::mem::replace(value, new)
            }
            Body::Record { .. } => return Ok(()),
        };
        // The old value is a release point: it may be the last edge
        // keeping a shared subgraph alive.
        if let Some(r) = old.as_ref() {
            inner.decref(r);
        }
        // Published while the write lock is still held, so an in-flight
        // cyclic analysis can never see the old epoch after this write
        // became visible.
        self.bump_mutation_epoch();
        drop(inner);
        Ok(())
    }

    /// Compare-and-swap: if the current value equals `expected`, replace it
    /// with `new` and return the old value; otherwise return the current
    /// value unchanged.
    ///
    /// On success, ownership of `new` moves into the cell and the returned
    /// old value is retained for the caller. On failure the caller keeps
    /// ownership of `new` (the returned current value is retained too, so
    /// callers treat the result uniformly).
    pub fn cell_compare_and_swap(
        &self,
        cell: ObjRef,
        expected: &Value,
        new: Value,
    ) -> RuntimeResult<Value> {
        let mut inner = self.lock_inner();
        let unfrozen_ref = new
            .as_ref()
            .is_some_and(|r| inner.get(r).is_some_and(|o| !o.frozen));
        let Some(o) = inner.get_mut(cell) else {
            return Ok(Value::Unit);
        };
        let swapped;
        let current = match &mut o.body {
            Body::AtomicCell { value, freezable } => {
                if *freezable && o.frozen {
                    return Err(object_is_frozen());
                }
                if !*freezable && unfrozen_ref {
                    return Err(invalid_mutability());
                }
                if value == expected {
                    swapped = true;
                    std::mem::replace(value, new)
                } else {
                    swapped = false;
                    value.clone()
                }
            }
            Body::Record { .. } => return Ok(Value::Unit),
        };
        // The returned value gains a caller-held strong reference.
        // On failure `new` never entered the cell, so the caller simply
        // keeps the ownership it already had.
        if let Some(r) = current.as_ref() {
            if let Some(obj) = inner.get_mut(r) {
                obj.strong += 1;
            }
        }
        if swapped {
            // Under the write lock, same ordering requirement as cell_set.
            self.bump_mutation_epoch();
        }
        drop(inner);
        Ok(current)
    }

    /// Compare-and-set: returns whether the swap happened.
    pub fn cell_compare_and_set(
        &self,
        cell: ObjRef,
        expected: &Value,
        new: Value,
    ) -> RuntimeResult<bool> {
        let old = self.cell_compare_and_swap(cell, expected, new)?;
        let matched = &old == expected;
        // Drop the retain the swap granted on the returned value; the
        // boolean form does not hand the old value to the caller.
        if let Some(r) = old.as_ref() {
            let mut inner = self.lock_inner();
            inner.decref(r);
        }
        Ok(matched)
    }

    fn check_cell_value(&self, value: &Value) -> RuntimeResult<()> {
        if let Some(r) = value.as_ref() {
            if !self.is_frozen(r) {
                return Err(invalid_mutability());
            }
        }
        Ok(())
    }
}
