//! The worker scheduler: worker registry, job queues, futures table.
//!
//! Each spawned worker is a thread draining an unbounded channel of jobs.
//! The main worker (the thread that created the scheduler) has a queue but
//! no thread; it runs its jobs explicitly through [`Scheduler::process_queue`]
//! or [`Scheduler::park`].
//!
//! Scheduling transfers the argument to the target worker up front, under
//! the job's transfer mode; the worker transfers the result back under the
//! same mode when the job completes. A worker drains the heap's
//! deferred-release buffer between jobs, on its own turn.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use vela_heap::{
    illegal_future_state, job_failed, unknown_future, unknown_worker, worker_terminated, Heap,
    RuntimeResult, Value, WorkerId,
};

use crate::future::{FutureId, FutureSlot, FutureState};
use crate::transfer::{rebind_closure, transfer, TransferMode};

/// The body of a scheduled job. Receives the worker's context and the
/// transferred argument; the returned value becomes the future's result.
pub type JobFn = Box<dyn FnOnce(&WorkerContext, Value) -> RuntimeResult<Value> + Send + 'static>;

enum Job {
    Regular {
        run: JobFn,
        argument: Value,
        mode: TransferMode,
        future: FutureId,
    },
    Terminate {
        future: FutureId,
    },
}

struct WorkerEntry {
    name: String,
    sender: Sender<Job>,
    /// Scheduler-side view of the worker's queue, used to drain unstarted
    /// jobs on termination and to run a threadless worker's jobs in place.
    receiver: Receiver<Job>,
    /// Whether a dedicated thread drains the queue. The main worker has
    /// none; its jobs run through `process_queue` or `park`.
    threaded: bool,
    join: Option<JoinHandle<()>>,
    /// Set when termination was requested; no further jobs are accepted.
    terminated: bool,
}

struct State {
    workers: FxHashMap<WorkerId, WorkerEntry>,
    futures: FxHashMap<FutureId, Arc<FutureSlot>>,
    next_worker: u32,
    next_future: u32,
}

impl State {
    fn new_future(&mut self) -> FutureId {
        let id = FutureId::new(self.next_future);
        self.next_future += 1;
        self.futures.insert(id, Arc::new(FutureSlot::new()));
        id
    }
}

struct Shared {
    heap: Arc<Heap>,
    state: Mutex<State>,
    main: WorkerId,
}

/// Handle to the scheduler; cheap to clone and share between workers.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

/// Per-job view of the executing worker, passed to every job body.
pub struct WorkerContext {
    worker: WorkerId,
    scheduler: Scheduler,
}

impl WorkerContext {
    /// The id of the worker running the job.
    pub fn id(&self) -> WorkerId {
        self.worker
    }

    pub fn heap(&self) -> &Heap {
        self.scheduler.heap()
    }

    /// The scheduler, for jobs that schedule further jobs.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Scheduler {
    /// Create a scheduler over `heap`, registering the calling thread as
    /// the main worker.
    pub fn new(heap: Arc<Heap>) -> Self {
        let main = WorkerId::new(1);
        let (sender, receiver) = unbounded();
        let mut workers = FxHashMap::default();
        workers.insert(
            main,
            WorkerEntry {
                name: "main".to_owned(),
                sender,
                receiver,
                threaded: false,
                join: None,
                terminated: false,
            },
        );
        Scheduler {
            shared: Arc::new(Shared {
                heap,
                state: Mutex::new(State {
                    workers,
                    futures: FxHashMap::default(),
                    next_worker: 2,
                    next_future: 1,
                }),
                main,
            }),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.shared.heap
    }

    /// The worker registered for the thread that created the scheduler.
    pub fn main_worker(&self) -> WorkerId {
        self.shared.main
    }

    /// Every worker currently registered, the main worker included.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.shared.state.lock().workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The human-readable name a worker was started with.
    pub fn worker_name(&self, worker: WorkerId) -> Option<String> {
        let state = self.shared.state.lock();
        state.workers.get(&worker).map(|e| e.name.clone())
    }

    // ── Worker lifecycle ─────────────────────────────────────────────────

    /// Start a new worker thread.
    ///
    /// # Panics
    ///
    /// Panics if the platform cannot spawn threads; a runtime without
    /// workers cannot honor the programming model at all.
    pub fn start_worker(&self, name: impl Into<String>) -> WorkerId {
        let name = name.into();
        let (sender, receiver) = unbounded();
        let id = {
            let mut state = self.shared.state.lock();
            let id = WorkerId::new(state.next_worker);
            state.next_worker += 1;
            state.workers.insert(
                id,
                WorkerEntry {
                    name: name.clone(),
                    sender,
                    receiver: receiver.clone(),
                    threaded: true,
                    join: None,
                    terminated: false,
                },
            );
            id
        };

        let sched = self.clone();
        let spawned = thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(&sched, id, &receiver));
        match spawned {
            Ok(handle) => {
                let mut state = self.shared.state.lock();
                if let Some(entry) = state.workers.get_mut(&id) {
                    entry.join = Some(handle);
                }
            }
            Err(err) => panic!("workers are not supported: {err}"),
        }
        debug!(%id, "worker started");
        id
    }

    /// Ask `worker` to exit. Returns the future that completes (with unit)
    /// once the worker honors the request; jobs scheduled after this call
    /// are rejected.
    ///
    /// With `process_scheduled_jobs` set the worker finishes its queue
    /// first. Without it, every job still waiting in the queue is cancelled
    /// here: its future moves to `Cancelled` and its already-transferred
    /// argument is released on the worker's behalf. A job the worker is in
    /// the middle of running is never interrupted either way.
    pub fn request_termination(
        &self,
        worker: WorkerId,
        process_scheduled_jobs: bool,
    ) -> RuntimeResult<FutureId> {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.workers.get_mut(&worker) else {
            return Err(unknown_worker(worker));
        };
        if entry.terminated {
            return Err(worker_terminated(worker));
        }
        entry.terminated = true;
        let sender = entry.sender.clone();
        let receiver = entry.receiver.clone();
        if !process_scheduled_jobs {
            // `schedule` takes the same lock and the worker is now marked
            // terminated, so nothing lands behind this drain. The worker
            // may still steal a front-of-queue job mid-drain and run it.
            while let Ok(job) = receiver.try_recv() {
                match job {
                    Job::Regular {
                        argument, future, ..
                    } => {
                        if let Some(slot) = state.futures.get(&future) {
                            slot.cancel();
                        }
                        if let Some(r) = argument.as_ref() {
                            self.shared.heap.release(worker, r);
                        }
                    }
                    Job::Terminate { future } => {
                        if let Some(slot) = state.futures.get(&future) {
                            slot.complete(Ok(Value::Unit));
                        }
                    }
                }
            }
        }
        let future = state.new_future();
        if sender.send(Job::Terminate { future }).is_err() {
            // The worker is already gone; honor the request in place.
            if let Some(slot) = state.futures.get(&future) {
                slot.complete(Ok(Value::Unit));
            }
        }
        trace!(%worker, %future, process_scheduled_jobs, "termination requested");
        Ok(future)
    }

    /// Wait for a terminated worker's thread to exit, then drop its
    /// registry entry. The main worker has no thread; joining it only
    /// unregisters it once terminated.
    pub fn join_worker(&self, worker: WorkerId) -> RuntimeResult<()> {
        let handle = {
            let mut state = self.shared.state.lock();
            let Some(entry) = state.workers.get_mut(&worker) else {
                return Err(unknown_worker(worker));
            };
            entry.join.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        let mut state = self.shared.state.lock();
        // Only terminated workers leave the registry; joining an id keeps
        // it known until its termination was requested.
        if state.workers.get(&worker).is_some_and(|e| e.terminated) {
            state.workers.remove(&worker);
            debug!(%worker, "worker unregistered");
        }
        Ok(())
    }

    // ── Scheduling ───────────────────────────────────────────────────────

    /// Schedule `run` on worker `to`, transferring `argument` from worker
    /// `from` under `mode`.
    ///
    /// The argument changes hands here, before the job is queued: on `Ok`
    /// the caller no longer owns it, on `Err` nothing moved. The result
    /// will be transferred back under the same mode when the job finishes.
    pub fn schedule(
        &self,
        from: WorkerId,
        to: WorkerId,
        mode: TransferMode,
        argument: Value,
        run: JobFn,
    ) -> RuntimeResult<FutureId> {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.workers.get(&to) else {
            return Err(unknown_worker(to));
        };
        if entry.terminated {
            return Err(worker_terminated(to));
        }
        let sender = entry.sender.clone();

        let argument = transfer(&self.shared.heap, from, to, argument, mode)?;
        let future = state.new_future();
        let sent = sender.send(Job::Regular {
            run,
            argument,
            mode,
            future,
        });
        if sent.is_err() {
            if let Some(slot) = state.futures.get(&future) {
                slot.cancel();
            }
            return Err(worker_terminated(to));
        }
        trace!(%from, %to, %future, ?mode, "job scheduled");
        Ok(future)
    }

    /// Block until the future completes and take its result as `consumer`.
    ///
    /// Idempotent: the slot keeps the outcome, and every successful call
    /// returns a freshly retained handle with the result's unfrozen closure
    /// rebound to the consuming worker. Failed jobs re-raise their error
    /// here; cancelled and invalid futures raise an illegal-state error.
    pub fn consume(&self, consumer: WorkerId, future: FutureId) -> RuntimeResult<Value> {
        let Some(slot) = self.future_slot(future) else {
            return Err(unknown_future(future.raw()));
        };
        let value = slot.wait_outcome()?;
        if let Some(r) = value.as_ref() {
            let mut writer = self.shared.heap.writer();
            rebind_closure(&mut writer, r, consumer);
            writer.retain(r);
        }
        Ok(value)
    }

    /// Current lifecycle state of a future; `Invalid` for unknown ids.
    pub fn future_state(&self, future: FutureId) -> FutureState {
        match self.future_slot(future) {
            Some(slot) => slot.state(),
            None => FutureState::Invalid,
        }
    }

    /// Drop a settled future, releasing the strong count its slot holds on
    /// the result. The id becomes invalid; outstanding handles from earlier
    /// consumes are unaffected.
    ///
    /// Fails with an illegal-state error while the job is still scheduled:
    /// a pending slot is the only channel through which the result could
    /// ever be reached, so discarding it would leak the job's output.
    pub fn discard(&self, worker: WorkerId, future: FutureId) -> RuntimeResult<()> {
        let slot = {
            let mut state = self.shared.state.lock();
            let Some(slot) = state.futures.get(&future).cloned() else {
                return Err(unknown_future(future.raw()));
            };
            if slot.state() == FutureState::Scheduled {
                return Err(illegal_future_state(FutureState::Scheduled.name()));
            }
            state.futures.remove(&future);
            slot
        };
        if let Some(r) = slot.result_ref() {
            // The slot's count may be the last one; rebind the closure so
            // the discarding worker is entitled to release it.
            {
                let mut writer = self.shared.heap.writer();
                rebind_closure(&mut writer, r, worker);
            }
            self.shared.heap.release(worker, r);
        }
        trace!(%future, "future discarded");
        Ok(())
    }

    // ── Queue processing (threadless workers) ────────────────────────────

    /// Run one queued job of a threadless worker on the calling thread.
    ///
    /// Returns whether a job ran. Workers with a dedicated thread drain
    /// their own queue, so this reports `false` for them.
    pub fn process_queue(&self, worker: WorkerId) -> RuntimeResult<bool> {
        let receiver = {
            let state = self.shared.state.lock();
            let Some(entry) = state.workers.get(&worker) else {
                return Err(unknown_worker(worker));
            };
            if entry.threaded {
                return Ok(false);
            }
            entry.receiver.clone()
        };
        match receiver.try_recv() {
            Ok(job) => {
                self.run_job(worker, job);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Park a threadless worker's thread for up to `timeout`.
    ///
    /// The deferred-release buffer is drained first, so a parked worker
    /// never starves collector-deferred releases. With `process` set,
    /// queued jobs run on the calling thread while parked (waiting up to
    /// the deadline for the first one); without it the queue is left
    /// untouched and the call just sleeps. Returns whether any job ran.
    pub fn park(&self, worker: WorkerId, timeout: Duration, process: bool) -> RuntimeResult<bool> {
        self.shared.heap.drain_deferred();
        let receiver = {
            let state = self.shared.state.lock();
            let Some(entry) = state.workers.get(&worker) else {
                return Err(unknown_worker(worker));
            };
            if entry.threaded {
                return Ok(false);
            }
            entry.receiver.clone()
        };
        if !process {
            thread::sleep(timeout);
            return Ok(false);
        }

        let deadline = Instant::now() + timeout;
        let mut ran = false;
        loop {
            match receiver.try_recv() {
                Ok(job) => {
                    self.run_job(worker, job);
                    ran = true;
                }
                Err(_) => {
                    if ran {
                        return Ok(true);
                    }
                    match receiver.recv_deadline(deadline) {
                        Ok(job) => {
                            self.run_job(worker, job);
                            ran = true;
                        }
                        Err(_) => return Ok(false),
                    }
                }
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn future_slot(&self, future: FutureId) -> Option<Arc<FutureSlot>> {
        self.shared.state.lock().futures.get(&future).cloned()
    }

    /// Execute one job as `worker`. Returns `false` when the job was a
    /// termination request.
    fn run_job(&self, worker: WorkerId, job: Job) -> bool {
        match job {
            Job::Regular {
                run,
                argument,
                mode,
                future,
            } => {
                let ctx = WorkerContext {
                    worker,
                    scheduler: self.clone(),
                };
                let outcome = match catch_unwind(AssertUnwindSafe(|| run(&ctx, argument))) {
                    // The result changes hands under the job's mode; a
                    // still-reachable result surfaces at the consumer.
                    Ok(Ok(value)) => transfer(&self.shared.heap, worker, worker, value, mode),
                    Ok(Err(err)) => Err(job_failed(err.message)),
                    Err(_) => Err(job_failed("job panicked")),
                };
                if let Some(slot) = self.future_slot(future) {
                    slot.complete(outcome);
                }
                self.shared.heap.drain_deferred();
                true
            }
            Job::Terminate { future } => {
                if let Some(slot) = self.future_slot(future) {
                    slot.complete(Ok(Value::Unit));
                }
                false
            }
        }
    }
}

fn worker_loop(sched: &Scheduler, id: WorkerId, receiver: &Receiver<Job>) {
    // Unstarted jobs behind a termination request are cancelled by
    // `request_termination` itself; the loop only ever sees jobs meant
    // to run.
    while let Ok(job) = receiver.recv() {
        if !sched.run_job(id, job) {
            break;
        }
    }
    sched.heap().drain_deferred();
    debug!(%id, "worker exited");
}
