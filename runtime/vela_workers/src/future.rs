//! Futures: the completion handles of scheduled jobs.
//!
//! A future is a one-shot slot filled by the worker that runs the job and
//! awaited by whoever consumes it. Consumption is idempotent: the slot
//! keeps its outcome, and every successful consume hands out a freshly
//! retained handle to the result (the scheduler rebinds ownership to the
//! consuming worker).

use std::fmt;

use parking_lot::{Condvar, Mutex};

use vela_heap::{illegal_future_state, ObjRef, RuntimeError, RuntimeResult, Value};

/// Process-unique identifier of a future.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FutureId(u32);

impl FutureId {
    pub(crate) const fn new(raw: u32) -> Self {
        FutureId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "future#{}", self.0)
    }
}

/// Lifecycle state of a future.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FutureState {
    /// The id names no live future.
    Invalid,
    /// The job is queued or running; the outcome is not available yet.
    Scheduled,
    /// The job finished; the outcome (value or error) is available.
    Computed,
    /// The job was discarded before running (its worker terminated).
    Cancelled,
}

impl FutureState {
    pub fn name(self) -> &'static str {
        match self {
            FutureState::Invalid => "invalid",
            FutureState::Scheduled => "scheduled",
            FutureState::Computed => "computed",
            FutureState::Cancelled => "cancelled",
        }
    }
}

struct FutureInner {
    state: FutureState,
    outcome: Option<Result<Value, RuntimeError>>,
}

/// A completion slot shared between the scheduling side and the worker.
pub(crate) struct FutureSlot {
    inner: Mutex<FutureInner>,
    cond: Condvar,
}

impl FutureSlot {
    pub(crate) fn new() -> Self {
        FutureSlot {
            inner: Mutex::new(FutureInner {
                state: FutureState::Scheduled,
                outcome: None,
            }),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> FutureState {
        self.inner.lock().state
    }

    /// Fill the slot and wake every waiter. The stored `Ok` value carries
    /// the one strong count the slot itself holds on the result.
    pub(crate) fn complete(&self, outcome: Result<Value, RuntimeError>) {
        let mut inner = self.inner.lock();
        if inner.state != FutureState::Scheduled {
            return;
        }
        inner.state = FutureState::Computed;
        inner.outcome = Some(outcome);
        self.cond.notify_all();
    }

    /// Discard a job that will never run.
    pub(crate) fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.state == FutureState::Scheduled {
            inner.state = FutureState::Cancelled;
        }
        self.cond.notify_all();
    }

    /// The heap object a successful outcome refers to, if any. This is the
    /// object the slot's own strong count pins.
    pub(crate) fn result_ref(&self) -> Option<ObjRef> {
        match &self.inner.lock().outcome {
            Some(Ok(value)) => value.as_ref(),
            _ => None,
        }
    }

    /// Block until the future leaves `Scheduled`, then return a copy of the
    /// outcome. The caller is responsible for retaining any `Ref` result.
    pub(crate) fn wait_outcome(&self) -> RuntimeResult<Value> {
        let mut inner = self.inner.lock();
        while inner.state == FutureState::Scheduled {
            self.cond.wait(&mut inner);
        }
        match inner.state {
            FutureState::Computed => match &inner.outcome {
                Some(outcome) => outcome.clone(),
                None => Err(illegal_future_state(FutureState::Invalid.name())),
            },
            state => Err(illegal_future_state(state.name())),
        }
    }
}
