//! Submission payload and the at-most-once, non-blocking submit protocol.
//!
//! A payload is a read-only snapshot built when the session leaves the
//! interactive states. [`SubmissionProtocol::submit`] consumes it, sends it
//! once, and always resolves to a [`SubmissionResult`]: failures are logged
//! and turned into [`SubmissionResult::ClosedWithoutAck`] so the attempt still
//! reaches its completion view. Nothing here retries.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::answers::AnswerStore;
use crate::error::BackendError;
use crate::model::{AnswerValue, ExamDefinition, QuestionKind};
use crate::traits::{Credential, ExamBackend};

/// Default upper bound on the submit call.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// What caused the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTrigger {
    /// The student confirmed the submission.
    Manual,
    /// The session clock ran out.
    ClockExpired,
}

impl fmt::Display for SubmitTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitTrigger::Manual => write!(f, "manual"),
            SubmitTrigger::ClockExpired => write!(f, "clock expired"),
        }
    }
}

/// Session context that is not part of the answers themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditContext {
    pub attempt_id: Uuid,
    pub warning_count: u64,
    pub remaining_secs: u64,
}

/// Audit trail sent alongside the answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditTrail {
    pub attempt_id: Uuid,
    pub trigger: SubmitTrigger,
    pub warning_count: u64,
    pub answered_count: usize,
    pub flagged_count: usize,
    pub flagged_questions: Vec<u32>,
    pub remaining_secs: u64,
    pub submitted_at: DateTime<Utc>,
}

/// One question as it appears in the submit request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedQuestion {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<usize>,
    /// Option text for multiple-choice, raw text for essays. Absent when
    /// unanswered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_answer: Option<String>,
}

/// Snapshot of an attempt, ready to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub exam_id: String,
    pub teacher_id: String,
    pub questions: Vec<SubmittedQuestion>,
    pub audit: AuditTrail,
}

impl SubmissionPayload {
    /// Build the payload from the exam and the current answers.
    pub fn build(
        exam: &ExamDefinition,
        answers: &AnswerStore,
        trigger: SubmitTrigger,
        context: AuditContext,
    ) -> Self {
        let questions = exam
            .questions
            .iter()
            .map(|question| {
                let selected_answer = match (question.kind, answers.answer(question.id)) {
                    (QuestionKind::MultipleChoice, Some(AnswerValue::Choice(index))) => {
                        question.options.get(*index).cloned()
                    }
                    (QuestionKind::Essay, Some(AnswerValue::Text(text))) => Some(text.clone()),
                    _ => None,
                };
                let options = match question.kind {
                    QuestionKind::MultipleChoice => Some(question.options.clone()),
                    QuestionKind::Essay => None,
                };
                SubmittedQuestion {
                    text: question.text.clone(),
                    options,
                    correct_answer: question.correct_answer,
                    selected_answer,
                }
            })
            .collect();

        Self {
            exam_id: exam.id.clone(),
            teacher_id: exam.teacher_id.clone(),
            questions,
            audit: AuditTrail {
                attempt_id: context.attempt_id,
                trigger,
                warning_count: context.warning_count,
                answered_count: answers.answered_count(),
                flagged_count: answers.flagged_count(),
                flagged_questions: answers.flagged(),
                remaining_secs: context.remaining_secs,
                submitted_at: Utc::now(),
            },
        }
    }
}

/// The backend's acknowledgement of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionAck {
    /// Score computed by the server, if it reported one.
    #[serde(default)]
    pub score: Option<f64>,
    /// Full response body.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl SubmissionAck {
    /// Interpret a response body. A numeric `score` field, at the top level
    /// or under `result`, is picked up.
    pub fn from_response(raw: serde_json::Value) -> Self {
        let score = raw
            .get("score")
            .or_else(|| raw.get("result").and_then(|r| r.get("score")))
            .and_then(serde_json::Value::as_f64);
        Self { score, raw }
    }
}

/// How the submission ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionResult {
    /// The backend accepted the attempt.
    Acknowledged(SubmissionAck),
    /// The backend could not be reached or refused; the session closes anyway.
    ClosedWithoutAck { reason: String },
}

impl SubmissionResult {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, SubmissionResult::Acknowledged(_))
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            SubmissionResult::Acknowledged(ack) => ack.score,
            SubmissionResult::ClosedWithoutAck { .. } => None,
        }
    }
}

/// Sends a payload once and never fails.
pub struct SubmissionProtocol {
    backend: Arc<dyn ExamBackend>,
    timeout: Duration,
}

impl SubmissionProtocol {
    pub fn new(backend: Arc<dyn ExamBackend>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `payload` to the backend.
    ///
    /// Takes the payload by value: a payload is submitted at most once.
    pub async fn submit(
        &self,
        payload: SubmissionPayload,
        credential: &Credential,
    ) -> SubmissionResult {
        let start = Instant::now();
        let exam_id = payload.exam_id.clone();
        tracing::info!(
            exam_id = %exam_id,
            backend = self.backend.name(),
            trigger = %payload.audit.trigger,
            "submitting attempt"
        );

        let outcome =
            tokio::time::timeout(self.timeout, self.backend.submit_attempt(&payload, credential))
                .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(ack)) => {
                tracing::info!(
                    exam_id = %exam_id,
                    elapsed_ms,
                    score = ?ack.score,
                    "attempt submitted"
                );
                SubmissionResult::Acknowledged(ack)
            }
            Ok(Err(e)) => {
                let transient = e
                    .downcast_ref::<BackendError>()
                    .is_some_and(BackendError::is_transient);
                tracing::error!(
                    exam_id = %exam_id,
                    elapsed_ms,
                    transient,
                    "submission failed, closing session without acknowledgement: {e:#}"
                );
                SubmissionResult::ClosedWithoutAck {
                    reason: format!("{e:#}"),
                }
            }
            Err(_) => {
                let timeout = BackendError::Timeout(self.timeout.as_secs());
                tracing::error!(
                    exam_id = %exam_id,
                    elapsed_ms,
                    "submission failed, closing session without acknowledgement: {timeout}"
                );
                SubmissionResult::ClosedWithoutAck {
                    reason: timeout.to_string(),
                }
            }
        }
    }
}
