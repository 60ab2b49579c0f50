//! Garbage collection for the Vela runtime heap.
//!
//! Reference counting handles the acyclic common case inline; this crate
//! adds the two episodic pieces:
//!
//! - **Deferred-release draining** ([`Collector::collect`]) — finalizes
//!   frozen objects whose strong count reached zero, on a worker's own
//!   turn rather than at the release site.
//! - **Cyclic collection** ([`Collector::collect_cyclic`]) — trial
//!   deletion over the closure of frozen atomic cells, reclaiming frozen
//!   cycles that reference counting alone can never free.
//!
//! Both entry points are explicit. Nothing in this crate runs on its own
//! thread or on an allocation heuristic; the runtime decides when an
//! episode happens.

pub mod collector;
pub mod config;

pub use collector::{CollectStats, Collector};
pub use config::GcConfig;
