//! The exam session state machine.
//!
//! ```text
//! loading ──► in_progress ◄──► confirming_submit
//!    │             │                  │
//!    │             └──── expiry ──────┤
//!    ▼                                ▼
//! not_found                      submitting ──► submitted
//!                                     └───────► closed_without_ack
//! ```
//!
//! [`ExamSession`] is synchronous and owns the answer store and the cursor.
//! Timers, the monitoring feed and the network live in
//! [`crate::driver::SessionDriver`], which feeds events into this type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::answers::{AnswerStore, QuestionStatus};
use crate::error::SessionError;
use crate::model::{AnswerValue, ExamDefinition, Question, QuestionKind};
use crate::submission::{AuditContext, SubmissionPayload, SubmissionResult, SubmitTrigger};

/// Lifecycle state of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Loading,
    InProgress,
    ConfirmingSubmit,
    Submitting,
    Submitted,
    /// Submission failed but the session closed anyway.
    ClosedWithoutAck,
    /// The exam could not be found. Never reaches `InProgress`.
    NotFound,
    /// Torn down before submission.
    Abandoned,
}

impl SessionState {
    /// No further session-owned transition can occur.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Submitted
                | SessionState::ClosedWithoutAck
                | SessionState::NotFound
                | SessionState::Abandoned
        )
    }

    /// The student can still change answers or navigate.
    pub fn is_interactive(self) -> bool {
        matches!(
            self,
            SessionState::InProgress | SessionState::ConfirmingSubmit
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Loading => write!(f, "loading"),
            SessionState::InProgress => write!(f, "in progress"),
            SessionState::ConfirmingSubmit => write!(f, "confirming submit"),
            SessionState::Submitting => write!(f, "submitting"),
            SessionState::Submitted => write!(f, "submitted"),
            SessionState::ClosedWithoutAck => write!(f, "closed without acknowledgement"),
            SessionState::NotFound => write!(f, "not found"),
            SessionState::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// A user action delivered to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Next,
    Previous,
    /// Jump to a 0-based question index.
    GoTo(usize),
    /// Choose a 0-based option on the current question.
    SelectOption(usize),
    /// Replace the essay text of the current question.
    WriteEssay(String),
    ToggleFlag,
    RequestSubmit,
    CancelSubmit,
    ConfirmSubmit,
    Quit,
}

/// Counts shown on the confirmation dialog and the navigation grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub question_count: usize,
    pub answered_count: usize,
    pub flagged_count: usize,
    pub current_index: usize,
    /// Grid status per question, in exam order.
    pub statuses: Vec<QuestionStatus>,
}

/// One attempt's state machine.
#[derive(Debug, Clone)]
pub struct ExamSession {
    state: SessionState,
    exam: Option<ExamDefinition>,
    answers: AnswerStore,
    current: usize,
    trigger: Option<SubmitTrigger>,
    result: Option<SubmissionResult>,
}

impl Default for ExamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ExamSession {
    /// A session waiting for its exam definition.
    pub fn new() -> Self {
        Self {
            state: SessionState::Loading,
            exam: None,
            answers: AnswerStore::new(),
            current: 0,
            trigger: None,
            result: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn exam(&self) -> Option<&ExamDefinition> {
        self.exam.as_ref()
    }

    pub fn answers(&self) -> &AnswerStore {
        &self.answers
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.exam.as_ref()?.questions.get(self.current)
    }

    pub fn trigger(&self) -> Option<SubmitTrigger> {
        self.trigger
    }

    pub fn result(&self) -> Option<&SubmissionResult> {
        self.result.as_ref()
    }

    /// Install the fetched exam and enter `InProgress`.
    pub fn begin(&mut self, exam: ExamDefinition) -> Result<(), SessionError> {
        self.require(&[SessionState::Loading], "begin")?;
        if exam.questions.is_empty() {
            return Err(SessionError::InvalidExam(format!(
                "exam {} has no questions",
                exam.id
            )));
        }
        if let Some(q) = exam
            .questions
            .iter()
            .find(|q| q.kind == QuestionKind::MultipleChoice && q.options.len() < 2)
        {
            return Err(SessionError::InvalidExam(format!(
                "question {} has fewer than two options",
                q.id
            )));
        }

        tracing::info!(exam_id = %exam.id, questions = exam.questions.len(), "session started");
        self.exam = Some(exam);
        self.answers.reset();
        self.current = 0;
        self.state = SessionState::InProgress;
        Ok(())
    }

    /// The exam lookup failed. Terminal.
    pub fn not_found(&mut self) -> Result<(), SessionError> {
        self.require(&[SessionState::Loading], "report not found")?;
        self.state = SessionState::NotFound;
        Ok(())
    }

    /// Move to the next question. Returns `false` at the last question.
    pub fn next_question(&mut self) -> Result<bool, SessionError> {
        self.require(&[SessionState::InProgress], "navigate")?;
        if self.current + 1 < self.question_count() {
            self.current += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Move to the previous question. Returns `false` at the first question.
    pub fn previous_question(&mut self) -> Result<bool, SessionError> {
        self.require(&[SessionState::InProgress], "navigate")?;
        if self.current > 0 {
            self.current -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Jump to `index`. Out-of-range indexes leave the cursor alone.
    pub fn go_to(&mut self, index: usize) -> Result<bool, SessionError> {
        self.require(&[SessionState::InProgress], "navigate")?;
        if index < self.question_count() && index != self.current {
            self.current = index;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Choose option `index` on the current question.
    pub fn select_option(&mut self, index: usize) -> Result<(), SessionError> {
        let id = self.current_id("answer")?;
        self.answer(id, AnswerValue::Choice(index))
    }

    /// Replace the essay text of the current question.
    pub fn write_essay(&mut self, text: impl Into<String>) -> Result<(), SessionError> {
        let id = self.current_id("answer")?;
        self.answer(id, AnswerValue::Text(text.into()))
    }

    /// Record `value` for `question_id`.
    pub fn answer(&mut self, question_id: u32, value: AnswerValue) -> Result<(), SessionError> {
        self.require(&[SessionState::InProgress], "answer")?;
        let question = self
            .exam
            .as_ref()
            .and_then(|exam| exam.question(question_id))
            .ok_or(SessionError::UnknownQuestion(question_id))?;
        if !question.accepts(&value) {
            let reason = match (&value, question.kind) {
                (AnswerValue::Choice(index), QuestionKind::MultipleChoice) => format!(
                    "option {index} out of range for {} options",
                    question.options.len()
                ),
                (_, kind) => format!("{kind} question does not take this answer"),
            };
            return Err(SessionError::InvalidAnswer {
                question_id,
                reason,
            });
        }
        self.answers.set_answer(question_id, value);
        Ok(())
    }

    /// Toggle the review flag on the current question and return its new state.
    pub fn toggle_flag(&mut self) -> Result<bool, SessionError> {
        let id = self.current_id("flag")?;
        Ok(self.answers.toggle_flag(id))
    }

    /// Ask to submit. Opens the confirmation step.
    pub fn request_submit(&mut self) -> Result<(), SessionError> {
        self.require(&[SessionState::InProgress], "request submission")?;
        self.state = SessionState::ConfirmingSubmit;
        Ok(())
    }

    /// Back out of the confirmation step.
    pub fn cancel_submit(&mut self) -> Result<(), SessionError> {
        self.require(&[SessionState::ConfirmingSubmit], "cancel submission")?;
        self.state = SessionState::InProgress;
        Ok(())
    }

    /// Confirm a manual submission and enter `Submitting`.
    pub fn confirm_submit(
        &mut self,
        context: AuditContext,
    ) -> Result<SubmissionPayload, SessionError> {
        self.require(&[SessionState::ConfirmingSubmit], "confirm submission")?;
        self.start_submitting(SubmitTrigger::Manual, context)
            .ok_or(SessionError::InvalidTransition {
                state: self.state,
                action: "confirm submission",
            })
    }

    /// The clock ran out. Forces `Submitting` from either interactive state,
    /// skipping confirmation. Returns `None` if the session is past that point.
    pub fn expire(&mut self, context: AuditContext) -> Option<SubmissionPayload> {
        if !self.state.is_interactive() {
            return None;
        }
        tracing::info!(from = %self.state, "time is up, submitting automatically");
        self.start_submitting(SubmitTrigger::ClockExpired, context)
    }

    /// Record how the submission ended and enter the matching terminal state.
    pub fn finish(&mut self, result: SubmissionResult) -> Result<SessionState, SessionError> {
        self.require(&[SessionState::Submitting], "finish submission")?;
        self.state = if result.is_acknowledged() {
            SessionState::Submitted
        } else {
            SessionState::ClosedWithoutAck
        };
        self.result = Some(result);
        Ok(self.state)
    }

    /// Tear the session down without submitting.
    pub fn abandon(&mut self) -> Result<(), SessionError> {
        self.require(
            &[
                SessionState::Loading,
                SessionState::InProgress,
                SessionState::ConfirmingSubmit,
            ],
            "abandon",
        )?;
        tracing::info!(from = %self.state, "session abandoned");
        self.state = SessionState::Abandoned;
        Ok(())
    }

    /// Dispatch a user command.
    ///
    /// Returns the payload when the command starts a submission.
    pub fn apply(
        &mut self,
        command: UserCommand,
        context: AuditContext,
    ) -> Result<Option<SubmissionPayload>, SessionError> {
        match command {
            UserCommand::Next => self.next_question().map(|_| None),
            UserCommand::Previous => self.previous_question().map(|_| None),
            UserCommand::GoTo(index) => self.go_to(index).map(|_| None),
            UserCommand::SelectOption(index) => self.select_option(index).map(|_| None),
            UserCommand::WriteEssay(text) => self.write_essay(text).map(|_| None),
            UserCommand::ToggleFlag => self.toggle_flag().map(|_| None),
            UserCommand::RequestSubmit => self.request_submit().map(|_| None),
            UserCommand::CancelSubmit => self.cancel_submit().map(|_| None),
            UserCommand::ConfirmSubmit => self.confirm_submit(context).map(Some),
            UserCommand::Quit => self.abandon().map(|_| None),
        }
    }

    /// Counts and grid statuses for display.
    pub fn summary(&self) -> SessionSummary {
        let statuses = self
            .exam
            .as_ref()
            .map(|exam| {
                exam.questions
                    .iter()
                    .map(|q| self.answers.status(q.id))
                    .collect()
            })
            .unwrap_or_default();
        SessionSummary {
            question_count: self.question_count(),
            answered_count: self.answers.answered_count(),
            flagged_count: self.answers.flagged_count(),
            current_index: self.current,
            statuses,
        }
    }

    fn question_count(&self) -> usize {
        self.exam.as_ref().map_or(0, ExamDefinition::question_count)
    }

    fn current_id(&self, action: &'static str) -> Result<u32, SessionError> {
        self.require(&[SessionState::InProgress], action)?;
        self.current_question()
            .map(|q| q.id)
            .ok_or(SessionError::InvalidTransition {
                state: self.state,
                action,
            })
    }

    fn start_submitting(
        &mut self,
        trigger: SubmitTrigger,
        context: AuditContext,
    ) -> Option<SubmissionPayload> {
        let exam = self.exam.as_ref()?;
        let payload = SubmissionPayload::build(exam, &self.answers, trigger, context);
        self.state = SessionState::Submitting;
        self.trigger = Some(trigger);
        Some(payload)
    }

    fn require(&self, allowed: &[SessionState], action: &'static str) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::SubmissionAck;
    use uuid::Uuid;

    fn mcq(id: u32) -> Question {
        Question {
            id,
            kind: QuestionKind::MultipleChoice,
            text: format!("question {id}"),
            options: vec!["first".into(), "second".into(), "third".into()],
            correct_answer: Some(0),
        }
    }

    fn exam(count: u32) -> ExamDefinition {
        let mut questions: Vec<Question> = (1..count).map(mcq).collect();
        questions.push(Question {
            id: count,
            kind: QuestionKind::Essay,
            text: "explain".into(),
            options: vec![],
            correct_answer: None,
        });
        ExamDefinition {
            id: "exam-1".into(),
            title: "Test".into(),
            teacher_id: "T1".into(),
            duration_secs: 60,
            instructions: String::new(),
            questions,
        }
    }

    fn ctx() -> AuditContext {
        AuditContext {
            attempt_id: Uuid::nil(),
            warning_count: 0,
            remaining_secs: 10,
        }
    }

    fn started(count: u32) -> ExamSession {
        let mut session = ExamSession::new();
        session.begin(exam(count)).unwrap();
        session
    }

    #[test]
    fn begins_in_progress_at_first_question() {
        let session = started(3);
        assert_eq!(session.state(), SessionState::InProgress);
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.current_question().unwrap().id, 1);
    }

    #[test]
    fn rejects_unusable_exams() {
        let mut session = ExamSession::new();
        let mut empty = exam(1);
        empty.questions.clear();
        assert!(matches!(
            session.begin(empty),
            Err(SessionError::InvalidExam(_))
        ));

        let mut one_option = exam(2);
        one_option.questions[0].options.truncate(1);
        assert!(matches!(
            session.begin(one_option),
            Err(SessionError::InvalidExam(_))
        ));
        assert_eq!(session.state(), SessionState::Loading);
    }

    #[test]
    fn navigation_clamps_at_both_ends() {
        let mut session = started(3);
        for _ in 0..10 {
            session.previous_question().unwrap();
            assert_eq!(session.current_index(), 0);
        }
        for _ in 0..10 {
            session.next_question().unwrap();
            assert!(session.current_index() < 3);
        }
        assert_eq!(session.current_index(), 2);
        assert!(!session.next_question().unwrap());
        assert!(session.previous_question().unwrap());
        assert_eq!(session.current_index(), 1);

        assert!(!session.go_to(3).unwrap());
        assert_eq!(session.current_index(), 1);
        assert!(session.go_to(0).unwrap());
    }

    #[test]
    fn single_question_exam_never_moves() {
        let mut session = started(1);
        assert!(!session.next_question().unwrap());
        assert!(!session.previous_question().unwrap());
        assert_eq!(session.current_index(), 0);
    }

    #[test]
    fn answers_are_validated_against_the_question() {
        let mut session = started(2);
        assert!(session.select_option(2).is_ok());
        assert!(matches!(
            session.select_option(3),
            Err(SessionError::InvalidAnswer { question_id: 1, .. })
        ));
        assert!(session.write_essay("not an essay").is_err());

        session.next_question().unwrap();
        session.write_essay("draft").unwrap();
        session.write_essay("final").unwrap();
        assert_eq!(
            session.answers().answer(2),
            Some(&AnswerValue::Text("final".into()))
        );
        assert!(matches!(
            session.answer(9, AnswerValue::Choice(0)),
            Err(SessionError::UnknownQuestion(9))
        ));
    }

    #[test]
    fn confirmation_can_be_cancelled() {
        let mut session = started(2);
        session.request_submit().unwrap();
        assert_eq!(session.state(), SessionState::ConfirmingSubmit);
        assert!(session.next_question().is_err());
        assert!(session.select_option(0).is_err());

        session.cancel_submit().unwrap();
        assert_eq!(session.state(), SessionState::InProgress);
        assert!(session.cancel_submit().is_err());
    }

    #[test]
    fn confirm_requires_confirmation_step() {
        let mut session = started(2);
        assert!(session.confirm_submit(ctx()).is_err());
        session.request_submit().unwrap();
        let payload = session.confirm_submit(ctx()).unwrap();
        assert_eq!(payload.audit.trigger, SubmitTrigger::Manual);
        assert_eq!(session.state(), SessionState::Submitting);
    }

    #[test]
    fn expiry_skips_pending_confirmation() {
        let mut session = started(2);
        session.select_option(1).unwrap();
        session.request_submit().unwrap();

        let payload = session.expire(ctx()).expect("expiry should submit");
        assert_eq!(session.state(), SessionState::Submitting);
        assert_eq!(session.trigger(), Some(SubmitTrigger::ClockExpired));
        assert_eq!(payload.audit.trigger, SubmitTrigger::ClockExpired);
        assert_eq!(payload.questions[0].selected_answer.as_deref(), Some("second"));

        assert!(session.expire(ctx()).is_none());
        assert!(session.cancel_submit().is_err());
    }

    #[test]
    fn failed_submission_still_closes() {
        let mut session = started(2);
        session.expire(ctx()).unwrap();
        let state = session
            .finish(SubmissionResult::ClosedWithoutAck {
                reason: "HTTP 500".into(),
            })
            .unwrap();
        assert_eq!(state, SessionState::ClosedWithoutAck);
        assert!(state.is_terminal());
        assert!(session.abandon().is_err());
    }

    #[test]
    fn acknowledged_submission_is_submitted() {
        let mut session = started(2);
        session.request_submit().unwrap();
        session.confirm_submit(ctx()).unwrap();
        let state = session
            .finish(SubmissionResult::Acknowledged(SubmissionAck::from_response(
                serde_json::json!({"score": 1}),
            )))
            .unwrap();
        assert_eq!(state, SessionState::Submitted);
        assert_eq!(session.result().and_then(SubmissionResult::score), Some(1.0));
    }

    #[test]
    fn not_found_never_reaches_in_progress() {
        let mut session = ExamSession::new();
        session.not_found().unwrap();
        assert_eq!(session.state(), SessionState::NotFound);
        assert!(session.begin(exam(2)).is_err());
        assert!(session.next_question().is_err());
    }

    #[test]
    fn apply_dispatches_commands() {
        let mut session = started(3);
        session.apply(UserCommand::Next, ctx()).unwrap();
        session.apply(UserCommand::SelectOption(0), ctx()).unwrap();
        session.apply(UserCommand::ToggleFlag, ctx()).unwrap();
        session.apply(UserCommand::GoTo(2), ctx()).unwrap();
        session
            .apply(UserCommand::WriteEssay("text".into()), ctx())
            .unwrap();
        assert!(session.apply(UserCommand::RequestSubmit, ctx()).unwrap().is_none());
        let payload = session.apply(UserCommand::ConfirmSubmit, ctx()).unwrap();
        assert!(payload.is_some());

        let summary = session.summary();
        assert_eq!(summary.answered_count, 2);
        assert_eq!(summary.flagged_count, 1);
        assert_eq!(
            summary.statuses,
            vec![
                QuestionStatus::Unanswered,
                QuestionStatus::Flagged,
                QuestionStatus::Answered
            ]
        );
    }

    #[test]
    fn quit_abandons() {
        let mut session = started(2);
        session.apply(UserCommand::Quit, ctx()).unwrap();
        assert_eq!(session.state(), SessionState::Abandoned);
        assert!(session.expire(ctx()).is_none());
    }
}
