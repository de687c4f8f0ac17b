//! Proctoring signal feed.
//!
//! Two independent periodic sources run next to the session clock:
//!
//! - a **status poll** that classifies every [`SignalKind`] and publishes an
//!   aggregated [`MonitorSnapshot`];
//! - a **warning poll** that occasionally raises a [`WarningNotice`] drawn
//!   from a fixed catalog and bumps the shared [`WarningCounter`].
//!
//! Both the classification and the warning decision sit behind traits so the
//! placeholder heuristics can be swapped for real models or deterministic
//! fakes. Warnings are advisory: nothing here ends a session.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::ClassifierError;
use crate::timer::TimerHandle;

/// Message shown when any kind is at warning level and none is in error.
pub const GENERAL_WARNING_MESSAGE: &str =
    "Please ensure you remain visible and focused during the exam.";

/// Catalog the discrete warning emitter draws from.
pub const WARNING_CATALOG: [&str; 5] = [
    "Looking away from screen detected",
    "Multiple faces detected in camera",
    "Tab switching detected",
    "Unusual audio detected",
    "Face not visible",
];

/// A monitored behaviour channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Face,
    Eye,
    Audio,
    Tab,
}

impl SignalKind {
    /// All kinds in message-priority order.
    pub const ALL: [SignalKind; 4] = [
        SignalKind::Face,
        SignalKind::Eye,
        SignalKind::Audio,
        SignalKind::Tab,
    ];

    /// Display name of the detector behind this kind.
    pub fn label(self) -> &'static str {
        match self {
            SignalKind::Face => "Face Detection",
            SignalKind::Eye => "Eye Tracking",
            SignalKind::Audio => "Audio Analysis",
            SignalKind::Tab => "Tab Monitor",
        }
    }

    /// Message surfaced when this kind is in error.
    pub fn error_message(self) -> &'static str {
        match self {
            SignalKind::Face => {
                "Face not detected. Please position yourself in front of the camera."
            }
            SignalKind::Eye => "Looking away from screen detected. Please focus on the exam.",
            SignalKind::Audio => {
                "Unusual audio detected. Please maintain silence during the exam."
            }
            SignalKind::Tab => "Tab switching detected. This activity is being logged.",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Face => write!(f, "face"),
            SignalKind::Eye => write!(f, "eye"),
            SignalKind::Audio => write!(f, "audio"),
            SignalKind::Tab => write!(f, "tab"),
        }
    }
}

/// Classification of one signal. Ordered from best to worst.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Ok,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Ok => write!(f, "ok"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One classified proctoring signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSignal {
    pub kind: SignalKind,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl MonitoringSignal {
    pub fn new(kind: SignalKind, severity: Severity, timestamp: DateTime<Utc>) -> Self {
        let message = match severity {
            Severity::Ok => format!("{} active", kind.label()),
            Severity::Warning => GENERAL_WARNING_MESSAGE.to_string(),
            Severity::Error => kind.error_message().to_string(),
        };
        Self {
            kind,
            severity,
            message,
            timestamp,
        }
    }
}

/// Classifies a single signal kind.
///
/// Implementations take no state from the caller; whatever camera, microphone
/// or browser hooks they need are their own business.
#[async_trait]
pub trait SignalClassifier: Send + Sync {
    /// Human-readable classifier name (e.g. "simulated").
    fn name(&self) -> &str;

    /// Produce the current classification for `kind`.
    async fn classify(&self, kind: SignalKind) -> Result<Severity, ClassifierError>;
}

/// Decides, once per warning interval, whether to raise a warning.
pub trait WarningSource: Send + Sync {
    /// Return the warning message to raise, if any.
    fn poll(&self) -> Option<String>;
}

/// Aggregated view of one status poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    /// One signal per kind, in [`SignalKind::ALL`] order.
    pub signals: Vec<MonitoringSignal>,
    /// Worst severity across all kinds.
    pub overall: Severity,
    /// Highest-priority message, if anything is off.
    pub message: Option<String>,
    pub taken_at: DateTime<Utc>,
}

impl MonitorSnapshot {
    /// Aggregate per-kind readings.
    ///
    /// Kinds missing from `readings` count as `Ok`.
    pub fn from_readings(readings: &[(SignalKind, Severity)], taken_at: DateTime<Utc>) -> Self {
        let severity_of = |kind: SignalKind| {
            readings
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, s)| *s)
                .unwrap_or_default()
        };

        let signals: Vec<MonitoringSignal> = SignalKind::ALL
            .iter()
            .map(|&kind| MonitoringSignal::new(kind, severity_of(kind), taken_at))
            .collect();

        let overall = signals
            .iter()
            .map(|s| s.severity)
            .max()
            .unwrap_or_default();

        let message = signals
            .iter()
            .find(|s| s.severity == Severity::Error)
            .map(|s| s.kind.error_message().to_string())
            .or_else(|| {
                (overall == Severity::Warning).then(|| GENERAL_WARNING_MESSAGE.to_string())
            });

        Self {
            signals,
            overall,
            message,
            taken_at,
        }
    }

    /// Severity recorded for `kind`.
    pub fn severity(&self, kind: SignalKind) -> Severity {
        self.signals
            .iter()
            .find(|s| s.kind == kind)
            .map(|s| s.severity)
            .unwrap_or_default()
    }

    /// Compact status line for headers.
    pub fn status_label(&self) -> &'static str {
        match self.overall {
            Severity::Error => "Issue Detected",
            Severity::Warning => "Warning",
            Severity::Ok => "All Systems Active",
        }
    }
}

/// A discrete warning raised by the warning poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningNotice {
    pub message: String,
    /// Value of the warning counter after this warning was counted.
    pub sequence: u64,
    pub raised_at: DateTime<Utc>,
    /// When a UI should stop showing the notice.
    pub visible_until: DateTime<Utc>,
}

/// Increment-only count of raised warnings.
///
/// Clones share the same count. The feed increments; anyone may read.
#[derive(Debug, Clone, Default)]
pub struct WarningCounter(Arc<AtomicU64>);

impl WarningCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Something the feed wants the session to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Status(MonitorSnapshot),
    Warning(WarningNotice),
}

/// Timing for the monitoring feed.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Interval between status polls.
    pub status_interval: Duration,
    /// Interval between warning decisions.
    pub warning_interval: Duration,
    /// A classification slower than this counts as unavailable.
    pub classify_timeout: Duration,
    /// How long a warning notice stays visible.
    pub warning_display: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(5),
            warning_interval: Duration::from_secs(20),
            classify_timeout: Duration::from_secs(2),
            warning_display: Duration::from_secs(5),
        }
    }
}

/// Classify every kind concurrently and aggregate the readings.
///
/// A failing, slow or panicking classifier degrades to `Ok` for the affected
/// kind only.
pub async fn classify_all(
    classifier: &dyn SignalClassifier,
    timeout: Duration,
) -> MonitorSnapshot {
    let readings = futures::future::join_all(
        SignalKind::ALL
            .iter()
            .map(|&kind| async move { (kind, classify_one(classifier, kind, timeout).await) }),
    )
    .await;

    MonitorSnapshot::from_readings(&readings, Utc::now())
}

async fn classify_one(
    classifier: &dyn SignalClassifier,
    kind: SignalKind,
    timeout: Duration,
) -> Severity {
    let guarded = AssertUnwindSafe(classifier.classify(kind)).catch_unwind();
    match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(Ok(severity))) => severity,
        Ok(Ok(Err(e))) => {
            tracing::warn!(classifier = classifier.name(), %kind, "classification failed: {e}");
            Severity::Ok
        }
        Ok(Err(_)) => {
            tracing::warn!(classifier = classifier.name(), %kind, "classifier panicked");
            Severity::Ok
        }
        Err(_) => {
            tracing::warn!(
                classifier = classifier.name(),
                %kind,
                "classification timed out after {}ms",
                timeout.as_millis()
            );
            Severity::Ok
        }
    }
}

/// Ask the warning source for a decision. A panic counts as no warning.
fn poll_warning(warnings: &dyn WarningSource) -> Option<String> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| warnings.poll())) {
        Ok(decision) => decision,
        Err(_) => {
            tracing::warn!("warning source panicked, skipping this poll");
            None
        }
    }
}

/// Periodic proctoring feed owned by a session.
pub struct MonitoringFeed {
    classifier: Arc<dyn SignalClassifier>,
    warnings: Arc<dyn WarningSource>,
    config: MonitoringConfig,
    counter: WarningCounter,
    tx: mpsc::UnboundedSender<MonitorEvent>,
    status_timer: Option<TimerHandle>,
    warning_timer: Option<TimerHandle>,
}

impl MonitoringFeed {
    /// Create a stopped feed and the receiver its events arrive on.
    pub fn new(
        classifier: Arc<dyn SignalClassifier>,
        warnings: Arc<dyn WarningSource>,
        config: MonitoringConfig,
    ) -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let feed = Self {
            classifier,
            warnings,
            config,
            counter: WarningCounter::new(),
            tx,
            status_timer: None,
            warning_timer: None,
        };
        (feed, rx)
    }

    /// Start both polls. Does nothing if already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let classifier = Arc::clone(&self.classifier);
        let tx = self.tx.clone();
        let every = self.config.status_interval;
        let timeout = self.config.classify_timeout;
        self.status_timer = Some(TimerHandle::spawn("status-poll", async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let snapshot = classify_all(classifier.as_ref(), timeout).await;
                if tx.send(MonitorEvent::Status(snapshot)).is_err() {
                    return;
                }
            }
        }));

        let warnings = Arc::clone(&self.warnings);
        let counter = self.counter.clone();
        let tx = self.tx.clone();
        let every = self.config.warning_interval;
        let display = chrono::Duration::from_std(self.config.warning_display)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        self.warning_timer = Some(TimerHandle::spawn("warning-poll", async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(message) = poll_warning(warnings.as_ref()) else {
                    continue;
                };
                let sequence = counter.increment();
                let raised_at = Utc::now();
                tracing::info!(sequence, "proctoring warning: {message}");
                let notice = WarningNotice {
                    message,
                    sequence,
                    raised_at,
                    visible_until: raised_at + display,
                };
                if tx.send(MonitorEvent::Warning(notice)).is_err() {
                    return;
                }
            }
        }));
    }

    /// Cancel both polls.
    pub fn stop(&mut self) {
        self.status_timer = None;
        self.warning_timer = None;
    }

    /// True while at least one poll task is alive.
    pub fn is_running(&self) -> bool {
        [&self.status_timer, &self.warning_timer]
            .into_iter()
            .any(|timer| timer.as_ref().is_some_and(|t| !t.is_finished()))
    }

    /// Shared handle to the warning count.
    pub fn warning_counter(&self) -> WarningCounter {
        self.counter.clone()
    }

    /// Run a single status poll immediately, outside the schedule.
    pub async fn poll_once(&self) -> MonitorSnapshot {
        classify_all(self.classifier.as_ref(), self.config.classify_timeout).await
    }
}
