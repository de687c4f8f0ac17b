//! Error types shared across examguard crates.
//!
//! Backend errors live here rather than in `examguard-providers` so the
//! session driver can downcast and classify them without string matching.

use thiserror::Error;

use crate::session::SessionState;
use crate::verification::VerificationState;

/// Errors that can occur when talking to the exam backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The credential was rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The backend returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Local storage used by an offline backend failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl BackendError {
    /// Returns `true` if the failure may go away on its own.
    ///
    /// The session never retries; callers use this for log levels and exit
    /// codes only.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Timeout(_) | BackendError::Network(_) => true,
            BackendError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Errors raised by the session state machine for rejected user actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The action is not legal in the current state.
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },

    /// The answer does not fit the question.
    #[error("invalid answer for question {question_id}: {reason}")]
    InvalidAnswer { question_id: u32, reason: String },

    /// No question with this identifier exists.
    #[error("unknown question: {0}")]
    UnknownQuestion(u32),

    /// The exam definition cannot be taken.
    #[error("invalid exam definition: {0}")]
    InvalidExam(String),
}

/// Errors from a signal classifier.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The classifier backend is not available.
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    /// The classifier failed while producing a reading.
    #[error("classification failed: {0}")]
    Failed(String),
}

/// Camera faults, worded for the person in front of the camera.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("Camera access denied. Please allow camera access to continue.")]
    Denied,

    #[error("No camera found. Please connect a camera and try again.")]
    NotFound,

    #[error("Camera is in use by another application.")]
    Busy,

    #[error("Camera error: {0}")]
    Other(String),
}

/// Errors from the identity check.
#[derive(Debug, Error)]
pub enum VerificationError {
    /// No usable frame could be captured.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// The verifier could not produce a verdict.
    #[error("verifier unavailable: {0}")]
    Unavailable(String),

    /// The step is not legal in the current state.
    #[error("cannot {action} while verification is {state}")]
    InvalidTransition {
        state: VerificationState,
        action: &'static str,
    },
}
