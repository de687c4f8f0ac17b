//! Random placeholder proctoring.
//!
//! Stand-ins for real detectors: each classification, each warning decision
//! and each identity verdict is a weighted coin flip. Seeding makes a run
//! reproducible.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use examguard_core::error::{CameraError, ClassifierError, VerificationError};
use examguard_core::monitoring::{
    Severity, SignalClassifier, SignalKind, WarningSource, WARNING_CATALOG,
};
use examguard_core::verification::{FaceCapture, IdentityVerifier};

/// Default probability of an `ok` reading.
pub const DEFAULT_OK_WEIGHT: f64 = 0.7;
/// Default probability of a `warning` reading. The remainder is `error`.
pub const DEFAULT_WARNING_WEIGHT: f64 = 0.2;
/// Default chance that a warning poll raises a warning.
pub const DEFAULT_WARNING_PROBABILITY: f64 = 0.3;
/// Default chance that an identity check passes.
pub const DEFAULT_MATCH_PROBABILITY: f64 = 0.95;
/// Default time the simulated matcher takes per verdict.
pub const DEFAULT_VERIFY_DELAY: Duration = Duration::from_secs(2);

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Classifier that draws each reading from a fixed distribution.
pub struct SimulatedClassifier {
    ok_weight: f64,
    warning_weight: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedClassifier {
    pub fn new(seed: Option<u64>) -> Self {
        Self::with_weights(DEFAULT_OK_WEIGHT, DEFAULT_WARNING_WEIGHT, seed)
    }

    /// Weights are clamped so `ok + warning <= 1`. Non-finite weights fall
    /// back to the defaults.
    pub fn with_weights(ok_weight: f64, warning_weight: f64, seed: Option<u64>) -> Self {
        let ok_weight = finite_or(ok_weight, DEFAULT_OK_WEIGHT).clamp(0.0, 1.0);
        let warning_weight =
            finite_or(warning_weight, DEFAULT_WARNING_WEIGHT).clamp(0.0, 1.0 - ok_weight);
        Self {
            ok_weight,
            warning_weight,
            rng: Mutex::new(rng_from(seed)),
        }
    }

    fn draw(&self) -> Result<Severity, ClassifierError> {
        let roll: f64 = self
            .rng
            .lock()
            .map_err(|_| ClassifierError::Unavailable("random source poisoned".into()))?
            .gen();
        Ok(if roll < self.ok_weight {
            Severity::Ok
        } else if roll < self.ok_weight + self.warning_weight {
            Severity::Warning
        } else {
            Severity::Error
        })
    }
}

#[async_trait]
impl SignalClassifier for SimulatedClassifier {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn classify(&self, _kind: SignalKind) -> Result<Severity, ClassifierError> {
        self.draw()
    }
}

/// Warning source that raises a random catalog entry with fixed probability.
pub struct SimulatedWarnings {
    probability: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedWarnings {
    pub fn new(seed: Option<u64>) -> Self {
        Self::with_probability(DEFAULT_WARNING_PROBABILITY, seed)
    }

    pub fn with_probability(probability: f64, seed: Option<u64>) -> Self {
        Self {
            probability: finite_or(probability, DEFAULT_WARNING_PROBABILITY).clamp(0.0, 1.0),
            rng: Mutex::new(rng_from(seed)),
        }
    }
}

impl WarningSource for SimulatedWarnings {
    fn poll(&self) -> Option<String> {
        let mut rng = self.rng.lock().ok()?;
        if !rng.gen_bool(self.probability) {
            return None;
        }
        WARNING_CATALOG.choose(&mut *rng).map(|m| m.to_string())
    }
}

/// Identity verifier that thinks for a while, then passes with fixed
/// probability. Its camera always delivers an empty frame.
pub struct SimulatedVerifier {
    probability: f64,
    delay: Duration,
    rng: Mutex<StdRng>,
}

impl SimulatedVerifier {
    pub fn new(seed: Option<u64>) -> Self {
        Self::with_probability(DEFAULT_MATCH_PROBABILITY, DEFAULT_VERIFY_DELAY, seed)
    }

    pub fn with_probability(probability: f64, delay: Duration, seed: Option<u64>) -> Self {
        Self {
            probability: finite_or(probability, DEFAULT_MATCH_PROBABILITY).clamp(0.0, 1.0),
            delay,
            rng: Mutex::new(rng_from(seed)),
        }
    }
}

#[async_trait]
impl IdentityVerifier for SimulatedVerifier {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn capture(&self, attempt: u32) -> Result<FaceCapture, CameraError> {
        Ok(FaceCapture {
            attempt,
            captured_at: Utc::now(),
            image: Vec::new(),
        })
    }

    async fn verify(&self, _capture: &FaceCapture) -> Result<bool, VerificationError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| VerificationError::Unavailable("random source poisoned".into()))?;
        Ok(rng.gen_bool(self.probability))
    }
}
