//! The episodic cyclic collector.
//!
//! Plain reference counting cannot reclaim cycles, and frozen shared graphs
//! are the one place the runtime lets cycles survive: freezable atomic
//! cells can close a loop over otherwise-immutable data. The collector
//! reclaims those with trial deletion over the frozen rootset closure:
//!
//! 1. **Analysis** (read lock): walk the frozen subgraph reachable from the
//!    live atomic cells, counting for each member how many of its strong
//!    references originate inside the closure (its *side count*).
//! 2. **Poisoning**: any member whose strong count exceeds its side count
//!    has an external reference; it and everything it reaches are live.
//! 3. **Release** (write lock): the remaining members are garbage cycles.
//!    Severing their outgoing edges removes exactly the internal
//!    references, so their counts fall to zero and they cascade into the
//!    heap's deferred-release buffer, which is then drained.
//!
//! Atomic cell writes and weak upgrades bump the heap's mutation epoch; if
//! the epoch moved between analysis and release, the pass restarts from
//! scratch (bounded by [`GcConfig::max_restarts`]).

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use vela_heap::{Heap, ObjRef};

use crate::config::GcConfig;

/// Outcome of one collection episode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Garbage cycle members whose edges the cyclic pass severed.
    pub severed: usize,
    /// Objects reclaimed from the deferred-release buffer.
    pub reclaimed: usize,
    /// Times the cyclic pass restarted after a concurrent atomic mutation.
    pub restarts: u32,
}

/// The garbage collector for a single heap.
///
/// Stateless between episodes; every pass re-derives the rootset from the
/// heap's live atomic cells.
#[derive(Debug)]
pub struct Collector {
    config: GcConfig,
}

impl Collector {
    pub fn new(config: GcConfig) -> Self {
        Collector { config }
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Acyclic collection: drain the deferred-release buffer.
    ///
    /// Safe to call from any worker's own turn; returns the number of
    /// objects reclaimed.
    pub fn collect(&self, heap: &Heap) -> usize {
        heap.drain_deferred()
    }

    /// Full collection episode: the cyclic pass followed by a drain.
    pub fn collect_cyclic(&self, heap: &Heap) -> CollectStats {
        let mut restarts = 0u32;
        let severed = loop {
            let epoch = heap.mutation_epoch();
            let garbage = find_garbage_cycles(heap);

            let mut writer = heap.writer();
            if heap.mutation_epoch() == epoch {
                for &g in &garbage {
                    writer.sever_edges(g);
                }
                break garbage.len();
            }
            drop(writer);

            restarts += 1;
            if restarts > self.config.max_restarts {
                debug!(restarts, "cyclic pass gave up after repeated atomic mutation");
                break 0;
            }
            trace!(restarts, "atomic mutation during analysis, restarting");
        };

        let reclaimed = heap.drain_deferred();
        if severed > 0 || reclaimed > 0 {
            debug!(severed, reclaimed, restarts, "cyclic collection episode");
        }
        CollectStats {
            severed,
            reclaimed,
            restarts,
        }
    }
}

/// Trial deletion over the frozen closure of the atomic rootset.
///
/// Returns the members that belong to garbage cycles: frozen objects all of
/// whose strong references originate inside the closure, unreachable from
/// any externally-referenced member.
fn find_garbage_cycles(heap: &Heap) -> Vec<ObjRef> {
    let reader = heap.reader();

    let roots: Vec<ObjRef> = reader
        .atomic_roots()
        .into_iter()
        .filter(|r| reader.is_frozen(*r))
        .collect();

    // Closure walk, accumulating side counts (internal edges per member).
    // Children of frozen objects are frozen themselves, but the guard keeps
    // a freezable cell that is still unfrozen out of the candidate set.
    let mut members: FxHashSet<ObjRef> = roots.iter().copied().collect();
    let mut order: Vec<ObjRef> = roots;
    let mut side: FxHashMap<ObjRef, u32> = FxHashMap::default();
    let mut i = 0;
    while i < order.len() {
        let r = order[i];
        i += 1;
        for child in reader.outgoing(r) {
            if !reader.is_frozen(child) {
                continue;
            }
            *side.entry(child).or_insert(0) += 1;
            if members.insert(child) {
                order.push(child);
            }
        }
    }

    // Poison pass: a member whose strong count exceeds its side count is
    // referenced from outside the closure. It is live, and so is everything
    // it reaches.
    let mut live: FxHashSet<ObjRef> = FxHashSet::default();
    let mut stack: Vec<ObjRef> = order
        .iter()
        .copied()
        .filter(|r| {
            let strong = reader.strong(*r).unwrap_or(0);
            strong > side.get(r).copied().unwrap_or(0)
        })
        .collect();
    while let Some(r) = stack.pop() {
        if !live.insert(r) {
            continue;
        }
        for child in reader.outgoing(r) {
            if members.contains(&child) && !live.contains(&child) {
                stack.push(child);
            }
        }
    }

    order.retain(|r| !live.contains(r));
    order
}
