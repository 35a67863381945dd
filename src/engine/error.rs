use std::fmt;

/// Error classes surfaced by engine operations. The wire layer maps each
/// variant to a distinct SQLSTATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or out-of-range input. Never retried.
    InvalidArgument(String),
    /// No caller identity on an operation that requires one.
    Unauthenticated(String),
    /// Caller identity present but not allowed to perform the operation.
    PermissionDenied(String),
    /// Referenced entity does not exist.
    NotFound(String),
    /// No table in the venue can ever satisfy the request.
    FailedPrecondition(String),
    /// Every matching table is taken for the requested slot.
    ResourceExhausted(String),
    /// Contention retry budget exhausted; safe to retry from scratch.
    Aborted(String),
    /// Journal, gateway or other infrastructure failure.
    Internal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::Unauthenticated(msg) => write!(f, "unauthenticated: {msg}"),
            EngineError::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            EngineError::NotFound(msg) => write!(f, "not found: {msg}"),
            EngineError::FailedPrecondition(msg) => write!(f, "failed precondition: {msg}"),
            EngineError::ResourceExhausted(msg) => write!(f, "resource exhausted: {msg}"),
            EngineError::Aborted(msg) => write!(f, "aborted: {msg}"),
            EngineError::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
