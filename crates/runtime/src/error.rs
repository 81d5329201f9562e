//! Error types for the runtime core.
//!
//! Script-level exceptions and infrastructure failures travel through the
//! same `Result` channel but must never be confused: a thrown script error is
//! the [`RuntimeError::Exception`] variant and is the only thing a `catch`
//! handler ever sees. Everything else (dispatch misuse, allocation failure,
//! stale handles) bypasses script handlers and surfaces to the embedder.

use thiserror::Error;

/// Runtime errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A script exception is in flight. The error object itself lives in the
    /// runtime's exception slot; this variant is only the unwind signal.
    #[error("script exception in flight")]
    Exception,

    /// The heap could not satisfy an allocation.
    #[error("out of memory: allocation of {size} bytes failed")]
    OutOfMemory { size: usize },

    /// An object handle no longer refers to a live slot.
    #[error("stale object handle: {handle:#018x}")]
    StaleHandle { handle: u64 },

    /// A null object was used where a live object is required.
    #[error("null object in {operation}")]
    NullObject { operation: &'static str },

    /// A member index fell outside the class's member table.
    #[error("member index {index} out of range for class \"{class}\" ({count} members)")]
    MemberOutOfRange {
        class: &'static str,
        index: u32,
        count: u32,
    },

    /// A method slot was used as a field, or a field slot was called.
    #[error("member {index} of class \"{class}\" is a {actual}, not a {expected}")]
    MemberKindMismatch {
        class: &'static str,
        index: u32,
        expected: &'static str,
        actual: &'static str,
    },

    /// An object's payload did not have the expected shape.
    #[error("object of class \"{class}\" is not a {expected}")]
    PayloadMismatch {
        class: &'static str,
        expected: &'static str,
    },

    /// An operation required a class the current context does not provide.
    #[error("invalid operation: {operation}, reason: {reason}")]
    InvalidOperation {
        operation: &'static str,
        reason: String,
    },
}

impl RuntimeError {
    /// Returns true if this error is a script exception (catchable).
    pub fn is_exception(&self) -> bool {
        matches!(self, RuntimeError::Exception)
    }

    /// Creates an invalid-operation error with context.
    pub fn invalid_operation(operation: &'static str, reason: impl Into<String>) -> Self {
        RuntimeError::InvalidOperation {
            operation,
            reason: reason.into(),
        }
    }
}

/// Result type used by every fallible runtime operation.
pub type RtResult<T> = Result<T, RuntimeError>;
