//! Deterministic fakes for testing sessions without a server or detectors.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use examguard_core::error::{BackendError, CameraError, ClassifierError, VerificationError};
use examguard_core::model::ExamDefinition;
use examguard_core::monitoring::{Severity, SignalClassifier, SignalKind, WarningSource};
use examguard_core::submission::{SubmissionAck, SubmissionPayload};
use examguard_core::traits::{Credential, ExamBackend};
use examguard_core::verification::{FaceCapture, IdentityVerifier};

/// How a [`MockBackend`] answers a submission.
#[derive(Debug, Clone)]
pub enum MockSubmit {
    /// Acknowledge with this response body.
    Ack(serde_json::Value),
    /// Fail with this HTTP status.
    Status(u16),
    /// Wait this long, then acknowledge with an empty body.
    Delay(Duration),
}

/// A mock exam backend with a scripted exam and submit outcome.
pub struct MockBackend {
    exams: HashMap<String, ExamDefinition>,
    submit: MockSubmit,
    fetch_count: AtomicU32,
    submit_count: AtomicU32,
    last_payload: Mutex<Option<SubmissionPayload>>,
}

impl MockBackend {
    /// Serve `exam` and acknowledge every submission with an empty body.
    pub fn new(exam: ExamDefinition) -> Self {
        let mut exams = HashMap::new();
        exams.insert(exam.id.clone(), exam);
        Self {
            exams,
            submit: MockSubmit::Ack(serde_json::json!({})),
            fetch_count: AtomicU32::new(0),
            submit_count: AtomicU32::new(0),
            last_payload: Mutex::new(None),
        }
    }

    /// A backend that knows no exams.
    pub fn empty() -> Self {
        Self {
            exams: HashMap::new(),
            submit: MockSubmit::Ack(serde_json::json!({})),
            fetch_count: AtomicU32::new(0),
            submit_count: AtomicU32::new(0),
            last_payload: Mutex::new(None),
        }
    }

    pub fn with_submit(mut self, submit: MockSubmit) -> Self {
        self.submit = submit;
        self
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    pub fn submit_count(&self) -> u32 {
        self.submit_count.load(Ordering::Relaxed)
    }

    /// The last payload submitted to this backend.
    pub fn last_payload(&self) -> Option<SubmissionPayload> {
        self.last_payload.lock().ok().and_then(|p| p.clone())
    }
}

#[async_trait]
impl ExamBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_exam(
        &self,
        exam_id: &str,
        _credential: &Credential,
    ) -> anyhow::Result<Option<ExamDefinition>> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        Ok(self.exams.get(exam_id).cloned())
    }

    async fn submit_attempt(
        &self,
        payload: &SubmissionPayload,
        _credential: &Credential,
    ) -> anyhow::Result<SubmissionAck> {
        self.submit_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_payload.lock() {
            *last = Some(payload.clone());
        }

        match &self.submit {
            MockSubmit::Ack(body) => Ok(SubmissionAck::from_response(body.clone())),
            MockSubmit::Status(status) => Err(BackendError::Api {
                status: *status,
                message: "mock failure".into(),
            }
            .into()),
            MockSubmit::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(SubmissionAck::from_response(serde_json::Value::Null))
            }
        }
    }
}

/// Classifier that replays scripted readings.
///
/// Each kind has its own queue; once a queue is down to its last reading
/// that reading repeats. Kinds with no script read `Ok`.
#[derive(Default)]
pub struct ScriptedClassifier {
    scripts: Mutex<HashMap<SignalKind, VecDeque<Severity>>>,
    failing: Vec<SignalKind>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every poll reads `severity` for `kind`.
    pub fn fixed(self, kind: SignalKind, severity: Severity) -> Self {
        self.script(kind, [severity])
    }

    /// Successive polls read `readings` for `kind`.
    pub fn script(self, kind: SignalKind, readings: impl IntoIterator<Item = Severity>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(kind, readings.into_iter().collect());
        }
        self
    }

    /// Classification of `kind` always fails.
    pub fn failing(mut self, kind: SignalKind) -> Self {
        self.failing.push(kind);
        self
    }
}

#[async_trait]
impl SignalClassifier for ScriptedClassifier {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn classify(&self, kind: SignalKind) -> Result<Severity, ClassifierError> {
        if self.failing.contains(&kind) {
            return Err(ClassifierError::Failed(format!("{kind} detector offline")));
        }
        let mut scripts = self
            .scripts
            .lock()
            .map_err(|_| ClassifierError::Unavailable("script poisoned".into()))?;
        let Some(queue) = scripts.get_mut(&kind) else {
            return Ok(Severity::Ok);
        };
        let severity = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        };
        Ok(severity.unwrap_or_default())
    }
}

/// Warning source that replays a fixed sequence of decisions.
///
/// `None` entries are quiet polls. Once the sequence is exhausted every poll
/// is quiet.
#[derive(Default)]
pub struct ScriptedWarnings {
    queue: Mutex<VecDeque<Option<String>>>,
}

impl ScriptedWarnings {
    pub fn new(decisions: impl IntoIterator<Item = Option<String>>) -> Self {
        Self {
            queue: Mutex::new(decisions.into_iter().collect()),
        }
    }

    /// Never raises a warning.
    pub fn quiet() -> Self {
        Self::default()
    }
}

impl WarningSource for ScriptedWarnings {
    fn poll(&self) -> Option<String> {
        self.queue.lock().ok()?.pop_front().flatten()
    }
}

/// One scripted identity-check result.
#[derive(Debug, Clone, PartialEq)]
pub enum MockVerdict {
    Match,
    Mismatch,
    /// The verifier errors out.
    Unavailable,
    /// The camera cannot produce a frame.
    Camera(CameraError),
}

/// Identity verifier that replays scripted verdicts.
///
/// The last verdict repeats once the script is down to one entry. An empty
/// script always matches.
#[derive(Default)]
pub struct ScriptedVerifier {
    verdicts: Mutex<VecDeque<MockVerdict>>,
    captures: AtomicU32,
}

impl ScriptedVerifier {
    pub fn new(verdicts: impl IntoIterator<Item = MockVerdict>) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.into_iter().collect()),
            captures: AtomicU32::new(0),
        }
    }

    /// Number of frames captured so far.
    pub fn capture_count(&self) -> u32 {
        self.captures.load(Ordering::Relaxed)
    }

    fn next(&self) -> MockVerdict {
        let Ok(mut verdicts) = self.verdicts.lock() else {
            return MockVerdict::Unavailable;
        };
        let verdict = if verdicts.len() > 1 {
            verdicts.pop_front()
        } else {
            verdicts.front().cloned()
        };
        verdict.unwrap_or(MockVerdict::Match)
    }
}

#[async_trait]
impl IdentityVerifier for ScriptedVerifier {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn capture(&self, attempt: u32) -> Result<FaceCapture, CameraError> {
        self.captures.fetch_add(1, Ordering::Relaxed);
        Ok(FaceCapture {
            attempt,
            captured_at: Utc::now(),
            image: Vec::new(),
        })
    }

    async fn verify(&self, _capture: &FaceCapture) -> Result<bool, VerificationError> {
        match self.next() {
            MockVerdict::Match => Ok(true),
            MockVerdict::Mismatch => Ok(false),
            MockVerdict::Unavailable => Err(VerificationError::Unavailable("scripted".into())),
            MockVerdict::Camera(e) => Err(e.into()),
        }
    }
}
