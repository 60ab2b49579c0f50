//! The Vela runtime: one handle over the heap, the workers, and the
//! garbage collector.
//!
//! [`Runtime::init`] registers the calling thread as the main worker and
//! wires the three subsystems together:
//!
//! - `vela_heap` — the object model: refcounted records, transitive
//!   freezing, atomic cells, weak references;
//! - `vela_workers` — the scheduler and the cross-worker ownership
//!   transfer protocol;
//! - `vela_gc` — deferred-release draining and the episodic cyclic
//!   collector over frozen shared graphs.
//!
//! A `Runtime` is a plain value; dropping it (or calling
//! [`Runtime::shutdown`] for an orderly exit) releases everything. There
//! is no global state.

use std::sync::Arc;

use tracing::debug;

pub use vela_gc::{CollectStats, Collector, GcConfig};
pub use vela_heap::{
    Body, Heap, ObjRef, Object, Owner, RuntimeError, RuntimeErrorKind, RuntimeResult, Value,
    WeakRef, WorkerId,
};
pub use vela_workers::{FutureId, FutureState, JobFn, Scheduler, TransferMode, WorkerContext};


/// Runtime-wide configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub gc: GcConfig,
}

/// A fully wired runtime instance.
pub struct Runtime {
    heap: Arc<Heap>,
    scheduler: Scheduler,
    collector: Collector,
}

impl Runtime {
    /// Initialize a runtime, registering the calling thread as the main
    /// worker.
    pub fn init(config: RuntimeConfig) -> Self {
        let heap = Arc::new(Heap::new());
        let scheduler = Scheduler::new(Arc::clone(&heap));
        let collector = Collector::new(config.gc);
        debug!(?config, "runtime initialized");
        Runtime {
            heap,
            scheduler,
            collector,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// The worker bound to the thread that called [`Runtime::init`].
    pub fn main_worker(&self) -> WorkerId {
        self.scheduler.main_worker()
    }

    // ── Workers and jobs (scheduler passthroughs) ────────────────────────

    pub fn start_worker(&self, name: impl Into<String>) -> WorkerId {
        self.scheduler.start_worker(name)
    }

    pub fn schedule(
        &self,
        from: WorkerId,
        to: WorkerId,
        mode: TransferMode,
        argument: Value,
        run: JobFn,
    ) -> RuntimeResult<FutureId> {
        self.scheduler.schedule(from, to, mode, argument, run)
    }

    pub fn consume(&self, consumer: WorkerId, future: FutureId) -> RuntimeResult<Value> {
        self.scheduler.consume(consumer, future)
    }

    pub fn request_termination(
        &self,
        worker: WorkerId,
        process_scheduled_jobs: bool,
    ) -> RuntimeResult<FutureId> {
        self.scheduler
            .request_termination(worker, process_scheduled_jobs)
    }

    pub fn discard(&self, worker: WorkerId, future: FutureId) -> RuntimeResult<()> {
        self.scheduler.discard(worker, future)
    }

    // ── Collection ───────────────────────────────────────────────────────

    /// Run a collection episode on the caller's turn.
    ///
    /// Always drains the deferred-release buffer; runs the cyclic pass as
    /// well when [`GcConfig::cyclic_collector`] is enabled.
    pub fn gc(&self) -> CollectStats {
        if self.collector.config().cyclic_collector {
            self.collector.collect_cyclic(&self.heap)
        } else {
            CollectStats {
                reclaimed: self.collector.collect(&self.heap),
                ..CollectStats::default()
            }
        }
    }

    /// Orderly exit: terminate every spawned worker, wait for them, then
    /// run a final collection episode.
    ///
    /// Objects still referenced at this point go down with the heap when
    /// the runtime value drops.
    pub fn shutdown(self) {
        let main = self.main_worker();
        let workers: Vec<WorkerId> = self
            .scheduler
            .worker_ids()
            .into_iter()
            .filter(|w| *w != main)
            .collect();
        let mut pending = Vec::new();
        for &worker in &workers {
            // Already-terminated workers only need the join below.
            if let Ok(future) = self.scheduler.request_termination(worker, true) {
                pending.push(future);
            }
        }
        for future in pending {
            let _ = self.scheduler.consume(main, future);
            let _ = self.scheduler.discard(main, future);
        }
        for worker in workers {
            let _ = self.scheduler.join_worker(worker);
        }
        let stats = self.gc();
        debug!(?stats, "runtime shut down");
    }
}
