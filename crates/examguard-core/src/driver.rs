//! Async session driver.
//!
//! Owns one attempt end to end: fetches the exam, arms the clock, runs the
//! monitoring feed, feeds user commands into the [`ExamSession`] state machine
//! and submits exactly once when the session leaves the interactive states.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::clock::{ClockEvent, SessionClock};
use crate::error::SessionError;
use crate::model::ExamDefinition;
use crate::monitoring::{
    MonitorEvent, MonitorSnapshot, MonitoringConfig, MonitoringFeed, SignalClassifier,
    WarningCounter, WarningNotice, WarningSource,
};
use crate::session::{ExamSession, SessionState, SessionSummary, UserCommand};
use crate::submission::{
    AuditContext, SubmissionPayload, SubmissionProtocol, SubmissionResult, SubmitTrigger,
    DEFAULT_SUBMIT_TIMEOUT,
};
use crate::traits::{Credential, ExamBackend};

/// Configuration for the session driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub monitoring: MonitoringConfig,
    /// Upper bound on the time spent in `Submitting`.
    pub submit_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            monitoring: MonitoringConfig::default(),
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }
}

/// Which exam to take, and as whom.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub exam_id: String,
    pub credential: Credential,
}

/// What the completion view receives once submission resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionHandoff {
    pub exam_id: String,
    pub attempt_id: Uuid,
    pub state: SessionState,
    pub score: Option<f64>,
    pub acknowledged: bool,
}

/// Session progress callbacks.
pub trait SessionObserver: Send + Sync {
    fn on_state_change(&self, from: SessionState, to: SessionState);
    fn on_exam_loaded(&self, exam: &ExamDefinition);
    fn on_tick(&self, remaining_secs: u64);
    fn on_status(&self, snapshot: &MonitorSnapshot);
    fn on_warning(&self, notice: &WarningNotice);
    fn on_command_rejected(&self, error: &SessionError);
    /// Called after every accepted command so a UI can redraw.
    fn on_view(&self, session: &ExamSession);
    fn on_complete(&self, handoff: &CompletionHandoff);
    fn on_not_found(&self, exam_id: &str);
}

/// No-op observer.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_state_change(&self, _: SessionState, _: SessionState) {}
    fn on_exam_loaded(&self, _: &ExamDefinition) {}
    fn on_tick(&self, _: u64) {}
    fn on_status(&self, _: &MonitorSnapshot) {}
    fn on_warning(&self, _: &WarningNotice) {}
    fn on_command_rejected(&self, _: &SessionError) {}
    fn on_view(&self, _: &ExamSession) {}
    fn on_complete(&self, _: &CompletionHandoff) {}
    fn on_not_found(&self, _: &str) {}
}

/// Record of a finished attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub attempt_id: Uuid,
    pub exam_id: String,
    pub exam_title: Option<String>,
    pub state: SessionState,
    pub trigger: Option<SubmitTrigger>,
    pub result: Option<SubmissionResult>,
    pub warning_count: u64,
    pub summary: Option<SessionSummary>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SessionOutcome {
    /// Save the outcome to a JSON file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize outcome")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write outcome to {}", path.display()))?;
        Ok(())
    }

    /// Load an outcome from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read outcome from {}", path.display()))?;
        let outcome: SessionOutcome =
            serde_json::from_str(&content).context("failed to parse outcome JSON")?;
        Ok(outcome)
    }

    pub fn score(&self) -> Option<f64> {
        self.result.as_ref().and_then(SubmissionResult::score)
    }
}

/// Runs exam sessions against a backend and a proctoring feed.
pub struct SessionDriver {
    backend: Arc<dyn ExamBackend>,
    classifier: Arc<dyn SignalClassifier>,
    warnings: Arc<dyn WarningSource>,
    config: DriverConfig,
}

impl SessionDriver {
    pub fn new(
        backend: Arc<dyn ExamBackend>,
        classifier: Arc<dyn SignalClassifier>,
        warnings: Arc<dyn WarningSource>,
        config: DriverConfig,
    ) -> Self {
        Self {
            backend,
            classifier,
            warnings,
            config,
        }
    }

    /// Run one attempt until it reaches a terminal state.
    ///
    /// Returns `Err` only when the exam cannot be loaded (transport failure or
    /// an unusable definition). A missing exam, an abandoned attempt and a
    /// failed submission all produce an `Ok` outcome.
    pub async fn run(
        &self,
        request: SessionRequest,
        mut commands: mpsc::UnboundedReceiver<UserCommand>,
        observer: &dyn SessionObserver,
    ) -> Result<SessionOutcome> {
        let start = Instant::now();
        let attempt_id = Uuid::new_v4();
        let mut session = ExamSession::new();

        tracing::info!(
            exam_id = %request.exam_id,
            %attempt_id,
            backend = self.backend.name(),
            "loading exam"
        );

        let fetched = self
            .backend
            .fetch_exam(&request.exam_id, &request.credential)
            .await
            .with_context(|| format!("failed to load exam '{}'", request.exam_id))?;

        let Some(exam) = fetched else {
            session.not_found()?;
            tracing::warn!(exam_id = %request.exam_id, "exam not found");
            observer.on_state_change(SessionState::Loading, SessionState::NotFound);
            observer.on_not_found(&request.exam_id);
            return Ok(self.outcome(&session, &request, attempt_id, 0, start));
        };

        let duration_secs = exam.duration_secs;
        observer.on_exam_loaded(&exam);
        session.begin(exam)?;
        observer.on_state_change(SessionState::Loading, SessionState::InProgress);
        observer.on_view(&session);

        let (mut clock, mut clock_rx) = SessionClock::new();
        let (mut feed, mut monitor_rx) = MonitoringFeed::new(
            Arc::clone(&self.classifier),
            Arc::clone(&self.warnings),
            self.config.monitoring.clone(),
        );
        let counter = feed.warning_counter();
        clock.arm(duration_secs);
        feed.start();

        let payload = loop {
            tokio::select! {
                biased;

                Some(signal) = clock_rx.recv() => {
                    match clock.accept(signal) {
                        Some(ClockEvent::Tick { remaining }) => observer.on_tick(remaining),
                        Some(ClockEvent::Expired) => {
                            let before = session.state();
                            let context = audit_context(attempt_id, &counter, &clock);
                            if let Some(payload) = session.expire(context) {
                                observer.on_state_change(before, session.state());
                                break Some(payload);
                            }
                        }
                        None => {}
                    }
                }

                Some(event) = monitor_rx.recv() => match event {
                    MonitorEvent::Status(snapshot) => observer.on_status(&snapshot),
                    MonitorEvent::Warning(notice) => observer.on_warning(&notice),
                },

                command = commands.recv() => {
                    let before = session.state();
                    let Some(command) = command else {
                        tracing::info!("command channel closed");
                        session.abandon()?;
                        observer.on_state_change(before, session.state());
                        break None;
                    };

                    let context = audit_context(attempt_id, &counter, &clock);
                    let submitted = match session.apply(command, context) {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::debug!("command rejected: {e}");
                            observer.on_command_rejected(&e);
                            None
                        }
                    };
                    if session.state() != before {
                        observer.on_state_change(before, session.state());
                    }
                    if submitted.is_some() {
                        break submitted;
                    }
                    if session.state() == SessionState::Abandoned {
                        break None;
                    }
                    observer.on_view(&session);
                }
            }
        };

        // Nothing may tick once the session has left the interactive states.
        clock.cancel();
        feed.stop();

        if let Some(payload) = payload {
            self.submit(&mut session, payload, &request, attempt_id, observer)
                .await?;
        }

        Ok(self.outcome(&session, &request, attempt_id, counter.get(), start))
    }

    async fn submit(
        &self,
        session: &mut ExamSession,
        payload: SubmissionPayload,
        request: &SessionRequest,
        attempt_id: Uuid,
        observer: &dyn SessionObserver,
    ) -> Result<()> {
        let protocol = SubmissionProtocol::new(Arc::clone(&self.backend))
            .with_timeout(self.config.submit_timeout);
        let result = protocol.submit(payload, &request.credential).await;

        let handoff = CompletionHandoff {
            exam_id: request.exam_id.clone(),
            attempt_id,
            state: SessionState::Submitting,
            score: result.score(),
            acknowledged: result.is_acknowledged(),
        };
        let state = session.finish(result)?;
        observer.on_state_change(SessionState::Submitting, state);
        observer.on_complete(&CompletionHandoff { state, ..handoff });
        Ok(())
    }

    fn outcome(
        &self,
        session: &ExamSession,
        request: &SessionRequest,
        attempt_id: Uuid,
        warning_count: u64,
        start: Instant,
    ) -> SessionOutcome {
        let summary = session.exam().map(|_| session.summary());
        SessionOutcome {
            attempt_id,
            exam_id: request.exam_id.clone(),
            exam_title: session.exam().map(|exam| exam.title.clone()),
            state: session.state(),
            trigger: session.trigger(),
            result: session.result().cloned(),
            warning_count,
            summary,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

fn audit_context(attempt_id: Uuid, counter: &WarningCounter, clock: &SessionClock) -> AuditContext {
    AuditContext {
        attempt_id,
        warning_count: counter.get(),
        remaining_secs: clock.remaining(),
    }
}
