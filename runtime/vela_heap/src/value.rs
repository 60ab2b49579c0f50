//! Runtime values stored in object fields and atomic cells.
//!
//! Scalars are inline and freely copyable; strings are immutable and shared
//! (`Arc<str>`), so neither participates in ownership transfer. Only
//! [`Value::Ref`] carries ownership semantics — it is a handle into the
//! heap arena and its strong count is managed explicitly by the heap.

use std::fmt;
use std::sync::Arc;

use crate::handle::ObjRef;

/// A runtime value.
///
/// The refcounting discipline lives entirely in the heap: cloning a `Value`
/// does *not* retain the referent. Code that stores an extra `Ref` into the
/// object graph must call `Heap::retain` itself, exactly as compiler-emitted
/// RC ops would.
#[derive(Clone, PartialEq)]
pub enum Value {
    /// Unit (void) value.
    Unit,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Immutable string, shared by reference.
    Str(Arc<str>),
    /// Handle to a heap object.
    Ref(ObjRef),
}

impl Value {
    /// Create a string value.
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// The object handle, if this value is a reference.
    pub fn as_ref(&self) -> Option<ObjRef> {
        match self {
            Value::Ref(r) => Some(*r),
            _ => None,
        }
    }

    /// Whether this value is a heap reference.
    pub fn is_ref(&self) -> bool {
        matches!(self, Value::Ref(_))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "unit"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Ref(r) => write!(f, "{r:?}"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ObjRef> for Value {
    fn from(r: ObjRef) -> Self {
        Value::Ref(r)
    }
}
