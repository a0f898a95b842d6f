//! Error types for schedule policy operations.

use thiserror::Error;

use crate::PolicyType;

/// Coarse error category, for callers deciding between retry and abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, detected before any network call.
    Validation,
    /// A policy, schedule or builder does not exist.
    NotFound,
    /// The authority answered with a non-zero error code.
    RemoteRejected,
    /// Transport failure or an unusable response.
    RemoteUnavailable,
}

/// Errors that can occur in schedule policy operations.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Input failed validation.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A schedule selector named both or neither of id and name.
    #[error("schedule selector must name exactly one of id or name")]
    AmbiguousSelector,

    /// A schedule could not be built from its pattern or options.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// An option set of one kind was handed to a builder of another.
    #[error("option set mismatch: policy type {policy_type} expects {expected} options, got {found}")]
    OptionSetMismatch {
        policy_type: PolicyType,
        expected: &'static str,
        found: &'static str,
    },

    /// No policy with this name or id.
    #[error("schedule policy not found: {0}")]
    PolicyNotFound(String),

    /// No schedule matched the selector.
    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    /// No option builder is registered for the policy type.
    #[error("unsupported policy type: {0}")]
    UnsupportedPolicyType(PolicyType),

    /// The authority rejected the request.
    #[error("remote rejected request (error code {code}): {message}")]
    RemoteRejected { code: i64, message: String },

    /// The authority could not be reached or answered with garbage.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] cadence_transport::TransportError),
}

impl PolicyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PolicyError::Validation(_)
            | PolicyError::AmbiguousSelector
            | PolicyError::InvalidSchedule(_)
            | PolicyError::OptionSetMismatch { .. } => ErrorKind::Validation,
            PolicyError::PolicyNotFound(_)
            | PolicyError::ScheduleNotFound(_)
            | PolicyError::UnsupportedPolicyType(_) => ErrorKind::NotFound,
            PolicyError::RemoteRejected { .. } => ErrorKind::RemoteRejected,
            PolicyError::RemoteUnavailable(_) | PolicyError::Transport(_) => {
                ErrorKind::RemoteUnavailable
            }
        }
    }
}
