//! Error types for queue, endpoint, routing and bus setup failures.
//!
//! Every error here is recovered at the boundary where it occurs. Only
//! [`BusError`] raised while the registry is being built is allowed to abort
//! the process, because a bus without its endpoints cannot run at all.

use thiserror::Error;

/// Status code returned to callers on a successful write.
pub const STATUS_OK: i32 = 0;

/// Failure of a raw enqueue/dequeue on a [`BoundedQueue`](crate::queue::BoundedQueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue already holds `capacity` messages.
    #[error("queue full")]
    Full,
    /// The queue holds no messages.
    #[error("queue empty")]
    Empty,
}

/// Errors returned by [`QueueEndpoint::write`](crate::endpoint::QueueEndpoint::write).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The caller passed a buffer whose length is not the fixed record size.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// The fixed record size.
        expected: usize,
        /// The length supplied by the caller.
        actual: usize,
    },

    /// The endpoint's queue is full; the caller may retry.
    #[error("endpoint rejected the message: queue full")]
    Rejected,

    /// Storage for the incoming message could not be acquired or filled.
    #[error("could not acquire storage for the incoming message")]
    AllocationFailure,
}

/// Errors returned by [`QueueEndpoint::read`](crate::endpoint::QueueEndpoint::read).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The caller passed a buffer whose length is not the fixed record size.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// The fixed record size.
        expected: usize,
        /// The length supplied by the caller.
        actual: usize,
    },

    /// The endpoint's queue is empty; the caller may retry.
    #[error("endpoint has no message to read")]
    Empty,

    /// The outgoing record could not be produced for the caller.
    #[error("could not copy the message out to the caller")]
    AllocationFailure,
}

/// Errors raised while resolving a message's destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The destination id does not name any configured outbound endpoint.
    #[error("destination {destination} does not resolve to an outbound endpoint")]
    UnresolvedDestination {
        /// The offending destination id.
        destination: u32,
    },
}

/// Fatal errors raised while building or addressing the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The supplied configuration cannot produce a working bus.
    #[error("invalid bus configuration: {message}")]
    InvalidConfig {
        /// Details about the invalid setting.
        message: String,
    },

    /// No endpoint is registered under the requested name.
    #[error("unknown endpoint: {name}")]
    UnknownEndpoint {
        /// The name that failed to resolve.
        name: String,
    },
}

/// Negative status codes handed back across the session boundary.
///
/// Mirrors the classic character-device convention: success is `0` (or the
/// byte count for reads), failures are negated errno values.
pub trait StatusCode {
    /// The negative errno value for this error.
    fn status(&self) -> i32;

    /// Whether the caller may sensibly retry the same call later.
    fn is_retryable(&self) -> bool;
}

impl StatusCode for WriteError {
    fn status(&self) -> i32 {
        match self {
            WriteError::SizeMismatch { .. } => -libc::EINVAL,
            WriteError::Rejected => -libc::EAGAIN,
            WriteError::AllocationFailure => -libc::ENOMEM,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, WriteError::Rejected)
    }
}

impl StatusCode for ReadError {
    fn status(&self) -> i32 {
        match self {
            ReadError::SizeMismatch { .. } => -libc::EINVAL,
            ReadError::Empty => -libc::EAGAIN,
            ReadError::AllocationFailure => -libc::ENOMEM,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, ReadError::Empty)
    }
}
