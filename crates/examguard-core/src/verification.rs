//! Identity check before an attempt.
//!
//! The check follows a webcam check-in: a short countdown while the student
//! holds still, an automatic capture when it reaches zero, then a verdict
//! from the [`IdentityVerifier`]. A failed check goes back to the start on
//! retry. The countdown runs on a [`TimerHandle`] and reports through
//! generation-stamped signals, the same way the session clock does.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::{CameraError, VerificationError};
use crate::timer::TimerHandle;

const TICK: Duration = Duration::from_secs(1);

/// Seconds between starting a check and the automatic capture.
pub const DEFAULT_COUNTDOWN_SECS: u32 = 3;

/// Shown when the verifier looked at the capture and said no.
pub const REJECTED_MESSAGE: &str = "Face verification failed. Please try again.";

/// Shown when no verdict could be obtained.
pub const ERROR_MESSAGE: &str = "An error occurred during verification. Please try again.";

/// Where an identity check stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Initial,
    Capturing,
    Verifying,
    Success,
    Failed,
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationState::Initial => write!(f, "not started"),
            VerificationState::Capturing => write!(f, "capturing"),
            VerificationState::Verifying => write!(f, "verifying"),
            VerificationState::Success => write!(f, "verified"),
            VerificationState::Failed => write!(f, "failed"),
        }
    }
}

/// One frame taken for a check.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceCapture {
    /// 1-based attempt the frame belongs to.
    pub attempt: u32,
    pub captured_at: DateTime<Utc>,
    /// Encoded image. Empty for simulated cameras.
    pub image: Vec<u8>,
}

/// Camera plus face matcher.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Human-readable verifier name (e.g. "simulated").
    fn name(&self) -> &str;

    /// Take a frame for `attempt`.
    async fn capture(&self, attempt: u32) -> Result<FaceCapture, CameraError>;

    /// Decide whether the frame shows the expected person.
    async fn verify(&self, capture: &FaceCapture) -> Result<bool, VerificationError>;
}

/// Raw output of a capture countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownSignal {
    generation: u64,
    remaining: u32,
}

/// A countdown event the check should react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEvent {
    /// One second elapsed, capture still pending.
    Tick { remaining: u32 },
    /// The countdown reached zero. Fires once per start.
    CaptureDue,
}

/// The identity-check state machine.
#[derive(Debug)]
pub struct VerificationFlow {
    state: VerificationState,
    countdown_secs: u32,
    remaining: u32,
    attempts: u32,
    message: Option<String>,
    generation: u64,
    tx: mpsc::UnboundedSender<CountdownSignal>,
    timer: Option<TimerHandle>,
}

impl VerificationFlow {
    /// Create a check in `Initial` and the receiver its countdown arrives on.
    pub fn new(countdown_secs: u32) -> (Self, mpsc::UnboundedReceiver<CountdownSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let flow = Self {
            state: VerificationState::Initial,
            countdown_secs,
            remaining: countdown_secs,
            attempts: 0,
            message: None,
            generation: 0,
            tx,
            timer: None,
        };
        (flow, rx)
    }

    pub fn state(&self) -> VerificationState {
        self.state
    }

    /// Seconds left before the capture.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Number of checks started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Why the last check failed.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_verified(&self) -> bool {
        self.state == VerificationState::Success
    }

    /// Start a check and its capture countdown.
    pub fn start(&mut self) -> Result<(), VerificationError> {
        self.require(VerificationState::Initial, "start")?;
        self.state = VerificationState::Capturing;
        self.attempts += 1;
        self.remaining = self.countdown_secs;
        self.generation += 1;

        let generation = self.generation;
        let tx = self.tx.clone();
        let mut remaining = self.countdown_secs;
        self.timer = Some(TimerHandle::spawn("capture-countdown", async move {
            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                if remaining > 0 {
                    ticker.tick().await;
                    remaining -= 1;
                }
                let signal = CountdownSignal {
                    generation,
                    remaining,
                };
                if tx.send(signal).is_err() || remaining == 0 {
                    return;
                }
            }
        }));
        tracing::info!(attempt = self.attempts, "identity check started");
        Ok(())
    }

    /// Accept a signal from the countdown task.
    ///
    /// Returns `None` for signals from a cancelled or superseded countdown.
    pub fn accept(&mut self, signal: CountdownSignal) -> Option<CountdownEvent> {
        if self.state != VerificationState::Capturing || signal.generation != self.generation {
            return None;
        }
        self.remaining = signal.remaining;
        if signal.remaining == 0 {
            self.timer = None;
            Some(CountdownEvent::CaptureDue)
        } else {
            Some(CountdownEvent::Tick {
                remaining: signal.remaining,
            })
        }
    }

    /// Move to `Verifying` once the countdown is done. Returns the attempt
    /// number the capture belongs to.
    pub fn begin_verifying(&mut self) -> Result<u32, VerificationError> {
        self.require(VerificationState::Capturing, "verify")?;
        if self.remaining > 0 {
            return Err(VerificationError::InvalidTransition {
                state: self.state,
                action: "verify before the countdown ends",
            });
        }
        self.state = VerificationState::Verifying;
        Ok(self.attempts)
    }

    /// Record the verifier's verdict.
    pub fn record(
        &mut self,
        verdict: Result<bool, VerificationError>,
    ) -> Result<VerificationState, VerificationError> {
        self.require(VerificationState::Verifying, "record a verdict")?;
        match verdict {
            Ok(true) => {
                self.state = VerificationState::Success;
                self.message = None;
                tracing::info!(attempt = self.attempts, "identity verified");
            }
            Ok(false) => {
                self.state = VerificationState::Failed;
                self.message = Some(REJECTED_MESSAGE.to_string());
                tracing::warn!(attempt = self.attempts, "identity check rejected");
            }
            Err(VerificationError::Camera(e)) => {
                self.state = VerificationState::Failed;
                self.message = Some(e.to_string());
                tracing::warn!(attempt = self.attempts, "camera unavailable: {e}");
            }
            Err(e) => {
                self.state = VerificationState::Failed;
                self.message = Some(ERROR_MESSAGE.to_string());
                tracing::warn!(attempt = self.attempts, "identity check errored: {e}");
            }
        }
        Ok(self.state)
    }

    /// Go back to `Initial` after a failure.
    pub fn retry(&mut self) -> Result<(), VerificationError> {
        self.require(VerificationState::Failed, "retry")?;
        self.state = VerificationState::Initial;
        self.message = None;
        self.remaining = self.countdown_secs;
        Ok(())
    }

    /// Abort a pending capture and return to `Initial`.
    pub fn cancel(&mut self) {
        self.timer = None;
        if self.state == VerificationState::Capturing {
            self.state = VerificationState::Initial;
            self.remaining = self.countdown_secs;
        }
    }

    fn require(
        &self,
        expected: VerificationState,
        action: &'static str,
    ) -> Result<(), VerificationError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(VerificationError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }
}

/// Settings for [`run_verification`].
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub countdown_secs: u32,
    /// Checks to run before giving up. Zero counts as one.
    pub max_attempts: u32,
    /// Upper bound on capture plus verdict for one check.
    pub verify_timeout: Duration,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            max_attempts: 3,
            verify_timeout: Duration::from_secs(10),
        }
    }
}

/// Receives progress from [`run_verification`]. Every method defaults to
/// doing nothing.
pub trait VerificationObserver: Send + Sync {
    fn on_state_change(&self, _from: VerificationState, _to: VerificationState) {}
    fn on_countdown(&self, _remaining: u32) {}
    fn on_attempt_failed(&self, _attempt: u32, _message: &str) {}
}

/// Observer that ignores everything.
pub struct QuietVerification;

impl VerificationObserver for QuietVerification {}

/// How an identity check ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub state: VerificationState,
    pub attempts: u32,
    /// Failure message of the last attempt.
    pub message: Option<String>,
}

impl VerificationOutcome {
    pub fn verified(&self) -> bool {
        self.state == VerificationState::Success
    }
}

/// Run identity checks until one succeeds or the attempts run out.
pub async fn run_verification(
    verifier: &dyn IdentityVerifier,
    config: &VerificationConfig,
    observer: &dyn VerificationObserver,
) -> Result<VerificationOutcome, VerificationError> {
    let max_attempts = config.max_attempts.max(1);
    let (mut flow, mut rx) = VerificationFlow::new(config.countdown_secs);

    loop {
        step(&mut flow, observer, VerificationFlow::start)?;

        while let Some(signal) = rx.recv().await {
            match flow.accept(signal) {
                Some(CountdownEvent::Tick { remaining }) => observer.on_countdown(remaining),
                Some(CountdownEvent::CaptureDue) => {
                    observer.on_countdown(0);
                    break;
                }
                None => {}
            }
        }

        let attempt = step(&mut flow, observer, VerificationFlow::begin_verifying)?;
        let verdict = match tokio::time::timeout(
            config.verify_timeout,
            capture_and_verify(verifier, attempt),
        )
        .await
        {
            Ok(verdict) => verdict,
            Err(_) => Err(VerificationError::Unavailable(format!(
                "{} gave no verdict within {}s",
                verifier.name(),
                config.verify_timeout.as_secs()
            ))),
        };

        let state = step(&mut flow, observer, |f| f.record(verdict))?;
        if state == VerificationState::Failed {
            observer.on_attempt_failed(attempt, flow.message().unwrap_or(ERROR_MESSAGE));
        }
        if state == VerificationState::Success || flow.attempts() >= max_attempts {
            break;
        }
        step(&mut flow, observer, VerificationFlow::retry)?;
    }

    Ok(VerificationOutcome {
        state: flow.state(),
        attempts: flow.attempts(),
        message: flow.message().map(str::to_string),
    })
}

async fn capture_and_verify(
    verifier: &dyn IdentityVerifier,
    attempt: u32,
) -> Result<bool, VerificationError> {
    let capture = verifier.capture(attempt).await?;
    verifier.verify(&capture).await
}

fn step<T>(
    flow: &mut VerificationFlow,
    observer: &dyn VerificationObserver,
    action: impl FnOnce(&mut VerificationFlow) -> Result<T, VerificationError>,
) -> Result<T, VerificationError> {
    let before = flow.state();
    let out = action(flow)?;
    observer.on_state_change(before, flow.state());
    Ok(out)
}
