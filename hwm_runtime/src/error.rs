//! Runtime error type.
//!
//! Every fallible runtime operation returns [`HwmResult`]. Errors carry an
//! [`ErrorKind`] so callers (and the trigger plumbing) can branch on the
//! category without matching message text.

use crate::module::{DriverError, Severity};
use hwm_common::config::ConfigError;
use hwm_shared_memory::ShmError;
use std::fmt;
use thiserror::Error;

/// Error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller passed something unusable (bad name, bad config value).
    InvalidArgument,
    /// Interface or segment advertised twice.
    AlreadyExists,
    /// Interface or segment does not exist.
    NotFound,
    /// A fixed capacity (segments, queue, completion slots) is used up.
    ResourceExhausted,
    /// Operation not possible in the current state.
    FailedPrecondition,
    /// A bounded wait ran out.
    DeadlineExceeded,
    /// The request was cancelled before it was applied.
    Cancelled,
    /// Broken invariant or OS failure.
    Internal,
    /// Peer or resource went away (closed futex, fatal driver fault).
    Unavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::AlreadyExists => "AlreadyExists",
            Self::NotFound => "NotFound",
            Self::ResourceExhausted => "ResourceExhausted",
            Self::FailedPrecondition => "FailedPrecondition",
            Self::DeadlineExceeded => "DeadlineExceeded",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
            Self::Unavailable => "Unavailable",
        };
        f.write_str(name)
    }
}

/// Categorized runtime error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct HwmError {
    kind: ErrorKind,
    message: String,
}

/// Result alias for runtime operations.
pub type HwmResult<T> = Result<T, HwmError>;

impl HwmError {
    /// Error of `kind` with `message`.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human readable message, without the category prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Shorthand for [`ErrorKind::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Shorthand for [`ErrorKind::FailedPrecondition`].
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    /// Shorthand for [`ErrorKind::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<ShmError> for HwmError {
    fn from(e: ShmError) -> Self {
        let kind = match &e {
            ShmError::InvalidName { .. }
            | ShmError::TypeIdTooLong { .. }
            | ShmError::UnsupportedAlignment { .. } => ErrorKind::InvalidArgument,
            ShmError::AlreadyExists { .. } | ShmError::WriterAttached { .. } => {
                ErrorKind::AlreadyExists
            }
            ShmError::NotFound { .. } => ErrorKind::NotFound,
            ShmError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            ShmError::TypeMismatch { .. }
            | ShmError::SchemaVersionMismatch { .. }
            | ShmError::SizeMismatch { .. }
            | ShmError::InvalidHeader { .. } => ErrorKind::FailedPrecondition,
            ShmError::Timeout { .. } => ErrorKind::DeadlineExceeded,
            ShmError::Closed => ErrorKind::Unavailable,
            ShmError::UnexpectedFutexValue { .. }
            | ShmError::ThreadSetup { .. }
            | ShmError::Io { .. }
            | ShmError::Nix { .. } => ErrorKind::Internal,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<ConfigError> for HwmError {
    fn from(e: ConfigError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

impl From<DriverError> for HwmError {
    fn from(e: DriverError) -> Self {
        let kind = match e.severity {
            Severity::Fault => ErrorKind::FailedPrecondition,
            Severity::Fatal => ErrorKind::Unavailable,
        };
        Self::new(kind, e.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let e = HwmError::new(ErrorKind::NotFound, "no such interface");
        assert_eq!(e.to_string(), "NotFound: no such interface");
        assert_eq!(e.message(), "no such interface");
    }

    #[test]
    fn shm_errors_are_categorized() {
        let e: HwmError = ShmError::AlreadyExists {
            name: "joint_state".into(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::AlreadyExists);

        let e: HwmError = ShmError::Timeout { elapsed_ms: 10 }.into();
        assert_eq!(e.kind(), ErrorKind::DeadlineExceeded);

        let e: HwmError = ShmError::InvalidName {
            name: "a/b".into(),
            reason: "slash".into(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn driver_severity_maps_to_kind() {
        let e: HwmError = DriverError::fault("encoder lost").into();
        assert_eq!(e.kind(), ErrorKind::FailedPrecondition);
        assert_eq!(e.message(), "encoder lost");

        let e: HwmError = DriverError::fatal("bus gone").into();
        assert_eq!(e.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn config_errors_are_invalid_argument() {
        let e: HwmError = ConfigError::ValidationError("name cannot be empty".into()).into();
        assert_eq!(e.kind(), ErrorKind::InvalidArgument);
    }
}
