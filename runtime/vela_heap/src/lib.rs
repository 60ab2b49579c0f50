//! Heap object model for the Vela runtime.
//!
//! This crate provides:
//!
//! - **The heap arena** ([`Heap`]) — generational slots indexed by
//!   [`ObjRef`] handles, per-object reference counts, frozen bits, and
//!   ownership tags ([`Owner`]).
//! - **The freeze subsystem** — transitive, irreversible marking of object
//!   graphs as immutable and safely shareable (`Heap::freeze`).
//! - **Atomic reference cells** — the only sanctioned mutable edges visible
//!   to multiple workers, and the cyclic collector's root set.
//! - **Weak references** ([`WeakRef`]) — non-owning observation edges.
//! - **Runtime error types** ([`RuntimeError`], [`RuntimeErrorKind`]) used
//!   across the whole runtime workspace.
//!
//! # Ownership model
//!
//! Every allocation is local to exactly one worker, which is the only
//! worker allowed to mutate or release it while it is unfrozen. Objects
//! cross worker boundaries either by explicit ownership transfer (see
//! `vela_workers`) or by becoming permanently frozen and shared. The two
//! zero-count release paths — immediate recursive free for unfrozen local
//! objects, deferred buffering for frozen shared ones — are described in
//! the [`heap`] module docs.

pub mod atomic;
pub mod errors;
pub mod freeze;
pub mod handle;
pub mod heap;
pub mod object;
pub mod value;
pub mod weak;

#[cfg(test)]
mod tests;

pub use errors::{
    illegal_future_state, invalid_mutability, job_failed, object_is_frozen, still_reachable,
    unknown_future, unknown_worker, worker_terminated, RuntimeError, RuntimeErrorKind,
    RuntimeResult,
};
pub use handle::{ObjRef, WorkerId};
pub use heap::{Heap, HeapReader, HeapWriter};
pub use object::{Body, Object, Owner};
pub use value::Value;
pub use weak::WeakRef;
