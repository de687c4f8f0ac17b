//! Core trait definitions for exam backends.
//!
//! The backend trait is implemented by the `examguard-providers` crate. The
//! classifier and warning-source seams live in [`crate::monitoring`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::ExamDefinition;
use crate::submission::{SubmissionAck, SubmissionPayload};

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// Caller identity passed explicitly into a session.
///
/// `Debug` masks the secret so it never ends up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"***").finish()
    }
}

// ---------------------------------------------------------------------------
// Exam backend trait
// ---------------------------------------------------------------------------

/// Trait for the service that serves exam definitions and accepts attempts.
#[async_trait]
pub trait ExamBackend: Send + Sync {
    /// Human-readable backend name (e.g. "http").
    fn name(&self) -> &str;

    /// Fetch an exam definition. `Ok(None)` means the exam does not exist.
    async fn fetch_exam(
        &self,
        exam_id: &str,
        credential: &Credential,
    ) -> anyhow::Result<Option<ExamDefinition>>;

    /// Send a finished attempt. Called at most once per session.
    async fn submit_attempt(
        &self,
        payload: &SubmissionPayload,
        credential: &Credential,
    ) -> anyhow::Result<SubmissionAck>;
}
