//! Error types for the Vela runtime.
//!
//! `RuntimeErrorKind` provides typed error categories so callers can match
//! on the condition (retry a transfer in `Safe` mode, for example) instead
//! of parsing message strings. Factory functions are the public
//! construction API — they populate both `kind` and `message`.
//!
//! Contract violations (releasing or mutating an object a worker does not
//! own, thread-spawn failure on a platform without threading) are *not*
//! represented here: they panic, since guaranteeing recovery would require
//! the exact ownership checks the caller opted out of.

use std::fmt;

use crate::handle::WorkerId;

/// Result of a runtime operation.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Typed error category for the runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// A `Checked` transfer found the subgraph reachable from the sender.
    StillReachable,
    /// A write hit a frozen object or a frozen atomic cell.
    FrozenMutation,
    /// A non-freezable atomic cell was asked to hold an unfrozen object.
    InvalidMutability,
    /// A future was consumed in a state that has no result.
    IllegalFutureState { state: &'static str },
    /// A job was scheduled on a worker that already honored termination.
    WorkerTerminated { worker: WorkerId },
    /// A worker id did not name a live worker.
    UnknownWorker { worker: WorkerId },
    /// A future id did not name a live future.
    UnknownFuture { id: u32 },
    /// A scheduled job failed; re-raised at the consuming worker.
    JobFailed { message: String },
    /// Catch-all for errors without a structured kind yet.
    Custom { message: String },
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StillReachable => {
                write!(f, "object still reachable from the sending worker")
            }
            Self::FrozenMutation => write!(f, "object is frozen"),
            Self::InvalidMutability => {
                write!(f, "atomic reference requires a frozen value")
            }
            Self::IllegalFutureState { state } => {
                write!(f, "future is in an illegal state: {state}")
            }
            Self::WorkerTerminated { worker } => {
                write!(f, "{worker} has terminated and accepts no new jobs")
            }
            Self::UnknownWorker { worker } => write!(f, "no such worker: {worker}"),
            Self::UnknownFuture { id } => write!(f, "no such future: {id}"),
            Self::JobFailed { message } => write!(f, "job failed: {message}"),
            Self::Custom { message } => write!(f, "{message}"),
        }
    }
}

/// A runtime error: structured kind plus rendered message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeError {
    /// Structured category for programmatic matching.
    pub kind: RuntimeErrorKind,
    /// Human-readable message; equals `kind.to_string()` for factory-made
    /// errors.
    pub message: String,
}

impl RuntimeError {
    /// Create an error with just a message (`Custom` kind). Prefer the
    /// factory functions when a structured kind exists.
    pub fn new(message: impl Into<String>) -> Self {
        let msg = message.into();
        RuntimeError {
            kind: RuntimeErrorKind::Custom {
                message: msg.clone(),
            },
            message: msg,
        }
    }

    /// Create an error from a structured kind.
    pub fn from_kind(kind: RuntimeErrorKind) -> Self {
        let message = kind.to_string();
        RuntimeError { kind, message }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RuntimeError {}

// Factory functions

/// `Checked` transfer failed: the subgraph is reachable from the sender.
pub fn still_reachable() -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::StillReachable)
}

/// Mutation of a frozen object or cell.
pub fn object_is_frozen() -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::FrozenMutation)
}

/// Unfrozen value stored into a non-freezable atomic cell.
pub fn invalid_mutability() -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::InvalidMutability)
}

/// Consuming a future in `Invalid` or `Cancelled` state.
pub fn illegal_future_state(state: &'static str) -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::IllegalFutureState { state })
}

/// Scheduling on a worker that has honored termination.
pub fn worker_terminated(worker: WorkerId) -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::WorkerTerminated { worker })
}

/// Operation on a worker id that names no live worker.
pub fn unknown_worker(worker: WorkerId) -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::UnknownWorker { worker })
}

/// Operation on a future id that names no live future.
pub fn unknown_future(id: u32) -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::UnknownFuture { id })
}

/// A scheduled job failed with the given message.
pub fn job_failed(message: impl Into<String>) -> RuntimeError {
    RuntimeError::from_kind(RuntimeErrorKind::JobFailed {
        message: message.into(),
    })
}
