//! Workers, futures, and ownership transfer for the Vela runtime.
//!
//! The concurrency story is ownership-based: every unfrozen object belongs
//! to exactly one worker, and the only ways data crosses workers are
//!
//! - **transfer** ([`transfer::transfer`]) — move an unfrozen graph to
//!   another worker, verified ([`TransferMode::Checked`]), copied on
//!   demand ([`TransferMode::Safe`]), or on the caller's word
//!   ([`TransferMode::Unchecked`]);
//! - **freezing** — after which the graph is immutable and crosses freely
//!   (see `vela_heap`).
//!
//! The [`Scheduler`] owns the worker registry and the futures table, and
//! applies the transfer protocol to every job argument and result.

pub mod future;
pub mod scheduler;
pub mod transfer;


pub use future::{FutureId, FutureState};
pub use scheduler::{JobFn, Scheduler, WorkerContext};
pub use transfer::{transfer, TransferMode};
