//! The heap arena: generational slots, reference counting, release paths.
//!
//! # Locking discipline
//!
//! The arena lives behind a single `parking_lot::RwLock`. Field reads and
//! state queries take the read lock, so concurrent readers never block each
//! other; allocation, mutation, refcount updates, and freezing take the
//! write lock. The write lock doubles as the collector's safe point: while
//! it is held, no worker can be mid-mutation of an atomic cell's pointee.
//!
//! # Release paths
//!
//! When a strong count reaches zero there are two paths:
//!
//! - **Unfrozen, locally owned** — freed immediately, cascading through
//!   children with an explicit worklist. This is the common non-cyclic
//!   fast path.
//! - **Frozen (shared)** — buffered into the deferred-release queue,
//!   because frozen objects may participate in cycles reachable only via
//!   atomic roots. The buffer is drained on a worker's own turn
//!   (between jobs, `process_queue`, or an explicit collect), never from
//!   a foreign thread.
//!
//! Releasing an unfrozen object from a worker that does not own it is a
//! programming-model violation and panics: it means ownership was not
//! transferred before sharing.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::errors::{object_is_frozen, RuntimeResult};
use crate::handle::{ObjRef, WorkerId};
use crate::object::{Body, Object, Owner};
use crate::value::Value;

/// A generational arena slot.
struct Slot {
    generation: u32,
    object: Option<Object>,
}

pub(crate) struct HeapInner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Every live atomic cell; the cyclic collector's root set.
    atomic_roots: FxHashSet<ObjRef>,
    /// Frozen objects whose strong count reached zero, awaiting
    /// finalization on a worker's turn.
    deferred: Vec<ObjRef>,
    live: usize,
}

/// The shared heap.
pub struct Heap {
    inner: RwLock<HeapInner>,
    /// Bumped on every atomic cell write. The cyclic collector snapshots
    /// this before analysis and restarts if it moved.
    mutation_epoch: AtomicU64,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            inner: RwLock::new(HeapInner {
                slots: Vec::new(),
                free: Vec::new(),
                atomic_roots: FxHashSet::default(),
                deferred: Vec::new(),
                live: 0,
            }),
            mutation_epoch: AtomicU64::new(0),
        }
    }

    // ── Allocation ───────────────────────────────────────────────────────

    /// Allocate a record owned by `worker` with refcount 1.
    ///
    /// Takes ownership of the supplied field values: each `Ref` field keeps
    /// the strong count it arrived with. Callers that want to go on using a
    /// field value must `retain` it first.
    pub fn alloc(&self, worker: WorkerId, fields: Vec<Value>) -> ObjRef {
        let mut inner = self.inner.write();
        inner.insert(Object::record(worker, SmallVec::from_vec(fields)))
    }

    pub(crate) fn alloc_object(&self, object: Object) -> ObjRef {
        self.inner.write().insert(object)
    }

    // ── Reference counting ───────────────────────────────────────────────

    /// Increment the strong count of a live object.
    pub fn retain(&self, obj: ObjRef) {
        let mut inner = self.inner.write();
        if let Some(o) = inner.get_mut(obj) {
            o.strong += 1;
        }
    }

    /// Decrement the strong count, reclaiming on zero.
    ///
    /// # Panics
    ///
    /// Panics if `worker` releases an unfrozen object it does not own —
    /// that is the fail-fast contract violation of the ownership model.
    pub fn release(&self, worker: WorkerId, obj: ObjRef) {
        let mut inner = self.inner.write();
        let Some(o) = inner.get(obj) else { return };
        if !o.frozen && o.owner != Owner::Local(worker) {
            panic!("{worker} released {obj:?} owned by {:?}", o.owner);
        }
        inner.decref(obj);
    }

    /// Drain the deferred-release buffer, freeing frozen garbage.
    ///
    /// Returns the number of objects reclaimed. Called on a worker's own
    /// turn: between jobs, from `process_queue`/`park`, or by the explicit
    /// GC entry points.
    pub fn drain_deferred(&self) -> usize {
        let mut inner = self.inner.write();
        let n = inner.drain_deferred();
        if n > 0 {
            tracing::debug!(reclaimed = n, "drained deferred releases");
        }
        n
    }

    // ── Field access ─────────────────────────────────────────────────────

    /// Read a record field. The returned value is *not* retained; callers
    /// that store it must retain it themselves.
    pub fn get_field(&self, obj: ObjRef, index: usize) -> Option<Value> {
        let inner = self.inner.read();
        match &inner.get(obj)?.body {
            Body::Record { fields } => fields.get(index).cloned(),
            Body::AtomicCell { .. } => None,
        }
    }

    /// Number of fields of a record, 0 for cells and dead handles.
    pub fn field_count(&self, obj: ObjRef) -> usize {
        let inner = self.inner.read();
        match inner.get(obj).map(|o| &o.body) {
            Some(Body::Record { fields }) => fields.len(),
            _ => 0,
        }
    }

    /// Write a record field, releasing the old value.
    ///
    /// Takes ownership of `value`. Fails with "object is frozen" on frozen
    /// targets; panics if `worker` does not own the unfrozen target.
    pub fn set_field(
        &self,
        worker: WorkerId,
        obj: ObjRef,
        index: usize,
        value: Value,
    ) -> RuntimeResult<()> {
        let mut inner = self.inner.write();
        let Some(o) = inner.get_mut(obj) else {
            return Ok(()); // Dead handle: unchecked-transfer misuse, not caught here.
        };
        if o.frozen {
            return Err(object_is_frozen());
        }
        if o.owner != Owner::Local(worker) {
            panic!("{worker} mutated {obj:?} owned by {:?}", o.owner);
        }
        let old = match &mut o.body {
            Body::Record { fields } => {
                if index >= fields.len() {
                    return Ok(());
                }
                std::mem::replace(&mut fields[index], value)
            }
            Body::AtomicCell { .. } => return Ok(()),
        };
        if let Some(r) = old.as_ref() {
            inner.decref(r);
        }
        Ok(())
    }

    // ── Copies ───────────────────────────────────────────────────────────

    /// Verbatim shallow copy of a record: a fresh unfrozen object owned by
    /// `worker` holding the same field values (each `Ref` field retained).
    ///
    /// Used to manually build disjoint graphs before a transfer.
    pub fn shallow_copy(&self, worker: WorkerId, obj: ObjRef) -> Option<ObjRef> {
        let mut inner = self.inner.write();
        let fields = match &inner.get(obj)?.body {
            Body::Record { fields } => fields.clone(),
            Body::AtomicCell { .. } => return None,
        };
        for r in fields.iter().filter_map(Value::as_ref) {
            if let Some(o) = inner.get_mut(r) {
                o.strong += 1;
            }
        }
        Some(inner.insert(Object::record(worker, fields)))
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Whether the handle names a live object.
    pub fn is_live(&self, obj: ObjRef) -> bool {
        self.inner.read().get(obj).is_some()
    }

    pub fn is_frozen(&self, obj: ObjRef) -> bool {
        self.inner.read().get(obj).is_some_and(|o| o.frozen)
    }

    pub fn owner(&self, obj: ObjRef) -> Option<Owner> {
        self.inner.read().get(obj).map(|o| o.owner)
    }

    /// Current strong count (test and diagnostic aid).
    pub fn strong_count(&self, obj: ObjRef) -> Option<u32> {
        self.inner.read().get(obj).map(|o| o.strong)
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.inner.read().live
    }

    /// Number of objects waiting in the deferred-release buffer.
    pub fn deferred_len(&self) -> usize {
        self.inner.read().deferred.len()
    }

    /// Current atomic-mutation epoch.
    pub fn mutation_epoch(&self) -> u64 {
        self.mutation_epoch.load(Ordering::Acquire)
    }

    pub(crate) fn bump_mutation_epoch(&self) {
        self.mutation_epoch.fetch_add(1, Ordering::Release);
    }

    // ── Guarded multi-step access ────────────────────────────────────────

    /// Shared view for multi-step analysis (collector closure walk).
    pub fn reader(&self) -> HeapReader<'_> {
        HeapReader {
            inner: self.inner.read(),
        }
    }

    /// Exclusive view for multi-step updates (transfer, cycle release).
    /// Holding this guard is the collector's safe point.
    pub fn writer(&self) -> HeapWriter<'_> {
        HeapWriter {
            inner: self.inner.write(),
        }
    }

    pub(crate) fn lock_inner(&self) -> RwLockWriteGuard<'_, HeapInner> {
        self.inner.write()
    }

    pub(crate) fn read_inner(&self) -> RwLockReadGuard<'_, HeapInner> {
        self.inner.read()
    }
}

impl HeapInner {
    fn insert(&mut self, object: Object) -> ObjRef {
        let is_cell = matches!(object.body, Body::AtomicCell { .. });
        let r = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            ObjRef::new(index, slot.generation)
        } else {
            // Handle indices are u32; wrapping would alias live objects.
            let Ok(index) = u32::try_from(self.slots.len()) else {
                panic!("heap exhausted: {} slots in use", self.slots.len());
            };
            self.slots.push(Slot {
                generation: 0,
                object: Some(object),
            });
            ObjRef::new(index, 0)
        };
        self.live += 1;
        if is_cell {
            self.atomic_roots.insert(r);
        }
        r
    }

    pub(crate) fn get(&self, r: ObjRef) -> Option<&Object> {
        let slot = self.slots.get(r.index() as usize)?;
        if slot.generation != r.generation() {
            return None;
        }
        slot.object.as_ref()
    }

    pub(crate) fn get_mut(&mut self, r: ObjRef) -> Option<&mut Object> {
        let slot = self.slots.get_mut(r.index() as usize)?;
        if slot.generation != r.generation() {
            return None;
        }
        slot.object.as_mut()
    }

    pub(crate) fn atomic_roots(&self) -> &FxHashSet<ObjRef> {
        &self.atomic_roots
    }

    /// Decrement a strong count, routing zero to the right release path.
    pub(crate) fn decref(&mut self, r: ObjRef) {
        let Some(o) = self.get_mut(r) else { return };
        o.strong = o.strong.saturating_sub(1);
        if o.strong > 0 {
            return;
        }
        if o.frozen {
            // Frozen garbage may sit in shared cycles: funnel it through
            // the collector's deferred-release path.
            self.deferred.push(r);
        } else {
            self.free_now(r);
        }
    }

    /// Immediate recursive free of an unfrozen local subgraph (worklist,
    /// not call-stack recursion).
    fn free_now(&mut self, root: ObjRef) {
        let mut worklist = vec![root];
        while let Some(r) = worklist.pop() {
            let Some(object) = self.take(r) else { continue };
            for child in object.outgoing() {
                let Some(c) = self.get_mut(child) else {
                    continue;
                };
                c.strong = c.strong.saturating_sub(1);
                if c.strong == 0 {
                    if c.frozen {
                        self.deferred.push(child);
                    } else {
                        worklist.push(child);
                    }
                }
            }
        }
    }

    /// Remove an object from its slot, bumping the generation so stale
    /// handles (and weak references) observe the death.
    fn take(&mut self, r: ObjRef) -> Option<Object> {
        let slot = self.slots.get_mut(r.index() as usize)?;
        if slot.generation != r.generation() {
            return None;
        }
        let object = slot.object.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(r.index());
        self.live -= 1;
        self.atomic_roots.remove(&r);
        self.deferred.retain(|d| *d != r);
        Some(object)
    }

    pub(crate) fn drain_deferred(&mut self) -> usize {
        let mut reclaimed = 0;
        while let Some(r) = self.deferred.pop() {
            let Some(o) = self.get(r) else { continue };
            if o.strong != 0 {
                continue; // Resurrected since it was buffered.
            }
            let Some(object) = self.take(r) else { continue };
            reclaimed += 1;
            for child in object.outgoing() {
                self.decref(child);
            }
        }
        reclaimed
    }

    /// Sever all outgoing edges of a (frozen) object, releasing the
    /// pointees. Used by the cyclic collector on garbage cycle roots.
    pub(crate) fn sever_edges(&mut self, r: ObjRef) {
        let Some(o) = self.get_mut(r) else { return };
        let children: SmallVec<[ObjRef; 4]> = match &mut o.body {
            Body::Record { fields } => {
                let refs = fields.iter().filter_map(Value::as_ref).collect();
                for f in fields.iter_mut() {
                    if f.is_ref() {
                        *f = Value::Unit;
                    }
                }
                refs
            }
            Body::AtomicCell { value, .. } => {
                let refs = value.as_ref().into_iter().collect();
                if value.is_ref() {
                    *value = Value::Unit;
                }
                refs
            }
        };
        for child in children {
            self.decref(child);
        }
    }
}

/// Shared multi-step view of the heap.
pub struct HeapReader<'a> {
    inner: RwLockReadGuard<'a, HeapInner>,
}

impl HeapReader<'_> {
    pub fn atomic_roots(&self) -> Vec<ObjRef> {
        self.inner.atomic_roots().iter().copied().collect()
    }

    pub fn is_frozen(&self, r: ObjRef) -> bool {
        self.inner.get(r).is_some_and(|o| o.frozen)
    }

    pub fn strong(&self, r: ObjRef) -> Option<u32> {
        self.inner.get(r).map(|o| o.strong)
    }

    pub fn outgoing(&self, r: ObjRef) -> SmallVec<[ObjRef; 4]> {
        self.inner
            .get(r)
            .map(|o| o.outgoing().collect())
            .unwrap_or_default()
    }
}

/// Exclusive multi-step view of the heap (transfer, cycle release).
pub struct HeapWriter<'a> {
    inner: RwLockWriteGuard<'a, HeapInner>,
}

impl HeapWriter<'_> {
    pub fn is_live(&self, r: ObjRef) -> bool {
        self.inner.get(r).is_some()
    }

    pub fn is_frozen(&self, r: ObjRef) -> bool {
        self.inner.get(r).is_some_and(|o| o.frozen)
    }

    pub fn strong(&self, r: ObjRef) -> Option<u32> {
        self.inner.get(r).map(|o| o.strong)
    }

    pub fn owner(&self, r: ObjRef) -> Option<Owner> {
        self.inner.get(r).map(|o| o.owner)
    }

    pub fn outgoing(&self, r: ObjRef) -> SmallVec<[ObjRef; 4]> {
        self.inner
            .get(r)
            .map(|o| o.outgoing().collect())
            .unwrap_or_default()
    }

    pub fn is_atomic_root(&self, r: ObjRef) -> bool {
        self.inner.atomic_roots().contains(&r)
    }

    pub fn retain(&mut self, r: ObjRef) {
        if let Some(o) = self.inner.get_mut(r) {
            o.strong += 1;
        }
    }

    /// Rebind the owner tag of an unfrozen object. No-op on frozen or dead
    /// objects (frozen objects are permanently `Shared`).
    pub fn rebind_owner(&mut self, r: ObjRef, worker: WorkerId) {
        if let Some(o) = self.inner.get_mut(r) {
            if !o.frozen {
                o.owner = Owner::Local(worker);
            }
        }
    }

    /// Sever the outgoing edges of a garbage cycle root; pointees cascade
    /// into the deferred-release buffer.
    pub fn sever_edges(&mut self, r: ObjRef) {
        self.inner.sever_edges(r);
    }

    /// Deep structural copy of the unfrozen subgraph rooted at `root`,
    /// owned by `to`. Frozen children are shared by reference (retained,
    /// not copied). Returns the copy's root.
    pub fn deep_copy(&mut self, root: ObjRef, to: WorkerId) -> Option<ObjRef> {
        if self.inner.get(root)?.frozen {
            // Frozen data never needs a copy; share it.
            self.retain(root);
            return Some(root);
        }

        // Pass 1: allocate empty shells for every unfrozen member so cycles
        // can be rewired to their copies.
        let mut mapping: FxHashMap<ObjRef, ObjRef> = FxHashMap::default();
        let mut order = vec![root];
        let mut seen: FxHashSet<ObjRef> = FxHashSet::default();
        seen.insert(root);
        let mut i = 0;
        while i < order.len() {
            let r = order[i];
            i += 1;
            let Some(o) = self.inner.get(r) else { continue };
            for child in o.outgoing() {
                if let Some(c) = self.inner.get(child) {
                    if !c.frozen && seen.insert(child) {
                        order.push(child);
                    }
                }
            }
        }
        for &r in &order {
            let Some(o) = self.inner.get(r) else { continue };
            let shell = Object {
                strong: 0,
                frozen: false,
                owner: Owner::Local(to),
                body: match &o.body {
                    Body::Record { fields } => Body::Record {
                        fields: SmallVec::with_capacity(fields.len()),
                    },
                    Body::AtomicCell { freezable, .. } => Body::AtomicCell {
                        value: Value::Unit,
                        freezable: *freezable,
                    },
                },
            };
            let copy = self.inner.insert(shell);
            mapping.insert(r, copy);
        }

        // Pass 2: fill fields, rewiring refs into the copy and counting the
        // strong references each copy accumulates.
        for &r in &order {
            let body = match self.inner.get(r) {
                Some(o) => o.body.clone(),
                None => continue,
            };
            let copy = mapping[&r];
            let map_value = |this: &mut Self, v: &Value| -> Value {
                match v.as_ref() {
                    Some(child) => {
                        if let Some(&c) = mapping.get(&child) {
                            if let Some(o) = this.inner.get_mut(c) {
                                o.strong += 1;
                            }
                            Value::Ref(c)
                        } else {
                            // Frozen (or dead) child: shared by reference.
                            this.retain(child);
                            v.clone()
                        }
                    }
                    None => v.clone(),
                }
            };
            let new_body = match &body {
                Body::Record { fields } => Body::Record {
                    fields: fields.iter().map(|v| map_value(self, v)).collect(),
                },
                Body::AtomicCell { value, freezable } => Body::AtomicCell {
                    value: map_value(self, value),
                    freezable: *freezable,
                },
            };
            if let Some(o) = self.inner.get_mut(copy) {
                o.body = new_body;
            }
        }

        // The caller's handle is the copy root's one external reference.
        let copy_root = mapping[&root];
        if let Some(o) = self.inner.get_mut(copy_root) {
            o.strong += 1;
        }
        Some(copy_root)
    }
}
