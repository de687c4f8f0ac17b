//! Configuration loading and component factories.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use examguard_core::driver::DriverConfig;
use examguard_core::monitoring::{MonitoringConfig, SignalClassifier, WarningSource};
use examguard_core::traits::ExamBackend;
use examguard_core::verification::{IdentityVerifier, VerificationConfig};

use crate::file::FileBackend;
use crate::http::HttpBackend;
use crate::simulated::{
    SimulatedClassifier, SimulatedVerifier, SimulatedWarnings, DEFAULT_MATCH_PROBABILITY,
    DEFAULT_OK_WEIGHT, DEFAULT_VERIFY_DELAY, DEFAULT_WARNING_PROBABILITY, DEFAULT_WARNING_WEIGHT,
};

/// Where exams come from and where attempts go.
///
/// Note: Custom Debug impl masks the token to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Http {
        base_url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default = "default_http_timeout")]
        timeout_secs: u64,
    },
    File {
        #[serde(default = "default_exams_dir")]
        exams_dir: PathBuf,
        #[serde(default = "default_outbox_dir")]
        outbox_dir: PathBuf,
    },
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendConfig::Http {
                base_url,
                token,
                timeout_secs,
            } => f
                .debug_struct("Http")
                .field("base_url", base_url)
                .field("token", &token.as_ref().map(|_| "***"))
                .field("timeout_secs", timeout_secs)
                .finish(),
            BackendConfig::File {
                exams_dir,
                outbox_dir,
            } => f
                .debug_struct("File")
                .field("exams_dir", exams_dir)
                .field("outbox_dir", outbox_dir)
                .finish(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::File {
            exams_dir: default_exams_dir(),
            outbox_dir: default_outbox_dir(),
        }
    }
}

fn default_http_timeout() -> u64 {
    30
}
fn default_exams_dir() -> PathBuf {
    PathBuf::from("./exams")
}
fn default_outbox_dir() -> PathBuf {
    PathBuf::from("./examguard-outbox")
}

/// `[session]` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Upper bound on waiting for the submit response.
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
}

fn default_submit_timeout() -> u64 {
    30
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            submit_timeout_secs: default_submit_timeout(),
        }
    }
}

/// `[monitoring]` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSettings {
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
    #[serde(default = "default_warning_interval")]
    pub warning_interval_secs: u64,
    #[serde(default = "default_classify_timeout")]
    pub classify_timeout_ms: u64,
    #[serde(default = "default_warning_display")]
    pub warning_display_secs: u64,
    #[serde(default = "default_ok_weight")]
    pub ok_weight: f64,
    #[serde(default = "default_warning_weight")]
    pub warning_weight: f64,
    #[serde(default = "default_warning_probability")]
    pub warning_probability: f64,
    /// Seed for the simulated detectors. Unset means a fresh seed per run.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_status_interval() -> u64 {
    5
}
fn default_warning_interval() -> u64 {
    20
}
fn default_classify_timeout() -> u64 {
    2000
}
fn default_warning_display() -> u64 {
    5
}
fn default_ok_weight() -> f64 {
    DEFAULT_OK_WEIGHT
}
fn default_warning_weight() -> f64 {
    DEFAULT_WARNING_WEIGHT
}
fn default_warning_probability() -> f64 {
    DEFAULT_WARNING_PROBABILITY
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            status_interval_secs: default_status_interval(),
            warning_interval_secs: default_warning_interval(),
            classify_timeout_ms: default_classify_timeout(),
            warning_display_secs: default_warning_display(),
            ok_weight: default_ok_weight(),
            warning_weight: default_warning_weight(),
            warning_probability: default_warning_probability(),
            seed: None,
        }
    }
}

impl MonitoringSettings {
    /// Reject probabilities that are not finite numbers.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("ok_weight", self.ok_weight),
            ("warning_weight", self.warning_weight),
            ("warning_probability", self.warning_probability),
        ] {
            if !value.is_finite() {
                anyhow::bail!("monitoring.{name} must be a finite number, got {value}");
            }
        }
        Ok(())
    }

    /// Feed timings. Zero intervals are bumped to one second.
    pub fn feed_config(&self) -> MonitoringConfig {
        MonitoringConfig {
            status_interval: Duration::from_secs(self.status_interval_secs.max(1)),
            warning_interval: Duration::from_secs(self.warning_interval_secs.max(1)),
            classify_timeout: Duration::from_millis(self.classify_timeout_ms),
            warning_display: Duration::from_secs(self.warning_display_secs),
        }
    }
}

/// `[verification]` settings for the identity check before `take`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSettings {
    /// Run the identity check before an exam.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_countdown")]
    pub countdown_secs: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,
    /// Chance that the simulated matcher accepts a capture.
    #[serde(default = "default_match_probability")]
    pub match_probability: f64,
    /// How long the simulated matcher takes per verdict.
    #[serde(default = "default_verify_delay")]
    pub verify_delay_ms: u64,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_true() -> bool {
    true
}
fn default_countdown() -> u32 {
    examguard_core::verification::DEFAULT_COUNTDOWN_SECS
}
fn default_max_attempts() -> u32 {
    3
}
fn default_verify_timeout() -> u64 {
    10
}
fn default_match_probability() -> f64 {
    DEFAULT_MATCH_PROBABILITY
}
fn default_verify_delay() -> u64 {
    DEFAULT_VERIFY_DELAY.as_millis() as u64
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            countdown_secs: default_countdown(),
            max_attempts: default_max_attempts(),
            verify_timeout_secs: default_verify_timeout(),
            match_probability: default_match_probability(),
            verify_delay_ms: default_verify_delay(),
            seed: None,
        }
    }
}

impl VerificationSettings {
    pub fn flow_config(&self) -> VerificationConfig {
        VerificationConfig {
            countdown_secs: self.countdown_secs,
            max_attempts: self.max_attempts,
            verify_timeout: Duration::from_secs(self.verify_timeout_secs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.match_probability.is_finite() {
            anyhow::bail!(
                "verification.match_probability must be a finite number, got {}",
                self.match_probability
            );
        }
        Ok(())
    }
}

/// Top-level examguard configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExamguardConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub monitoring: MonitoringSettings,
    #[serde(default)]
    pub verification: VerificationSettings,
}

impl ExamguardConfig {
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            monitoring: self.monitoring.feed_config(),
            submit_timeout: Duration::from_secs(self.session.submit_timeout_secs),
        }
    }

    /// The token configured for the HTTP backend, if any.
    pub fn token(&self) -> Option<&str> {
        match &self.backend {
            BackendConfig::Http { token, .. } => token.as_deref().filter(|t| !t.is_empty()),
            BackendConfig::File { .. } => None,
        }
    }

    /// Apply `EXAMGUARD_BASE_URL` and `EXAMGUARD_TOKEN` from `lookup`.
    ///
    /// A base URL switches a file backend over to HTTP.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("EXAMGUARD_BASE_URL") {
            match &mut self.backend {
                BackendConfig::Http { base_url, .. } => *base_url = url,
                BackendConfig::File { .. } => {
                    self.backend = BackendConfig::Http {
                        base_url: url,
                        token: None,
                        timeout_secs: default_http_timeout(),
                    };
                }
            }
        }

        if let Some(key) = lookup("EXAMGUARD_TOKEN") {
            if let BackendConfig::Http { token, .. } = &mut self.backend {
                *token = Some(key);
            }
        }
    }

    fn resolve(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let expand = |s: &str| resolve_env_vars(s, lookup);
        self.backend = match &self.backend {
            BackendConfig::Http {
                base_url,
                token,
                timeout_secs,
            } => BackendConfig::Http {
                base_url: expand(base_url),
                token: token.as_deref().map(expand),
                timeout_secs: *timeout_secs,
            },
            BackendConfig::File {
                exams_dir,
                outbox_dir,
            } => BackendConfig::File {
                exams_dir: PathBuf::from(expand(&exams_dir.to_string_lossy())),
                outbox_dir: PathBuf::from(expand(&outbox_dir.to_string_lossy())),
            },
        };
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
///
/// Unset variables resolve to the empty string.
fn resolve_env_vars(s: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = lookup(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `examguard.toml` in the current directory
/// 2. `~/.config/examguard/config.toml`
///
/// Environment variable overrides: `EXAMGUARD_BASE_URL`, `EXAMGUARD_TOKEN`.
pub fn load_config() -> Result<ExamguardConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ExamguardConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("examguard.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            parse_config(
                &std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config: {}", path.display()))?,
            )
            .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ExamguardConfig::default(),
    };

    config.apply_overrides(env_lookup);
    config.resolve(&env_lookup);
    config
        .monitoring
        .validate()
        .context("invalid [monitoring] settings")?;
    config
        .verification
        .validate()
        .context("invalid [verification] settings")?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<ExamguardConfig> {
    Ok(toml::from_str::<ExamguardConfig>(content)?)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("examguard"))
}

/// Create a backend instance from its configuration.
pub fn create_backend(config: &BackendConfig) -> Result<Arc<dyn ExamBackend>> {
    match config {
        BackendConfig::Http {
            base_url,
            timeout_secs,
            ..
        } => {
            if base_url.is_empty() {
                anyhow::bail!("http backend needs a base_url");
            }
            Ok(Arc::new(HttpBackend::new(
                base_url,
                Some(Duration::from_secs(*timeout_secs)),
            )?))
        }
        BackendConfig::File {
            exams_dir,
            outbox_dir,
        } => Ok(Arc::new(FileBackend::new(exams_dir, outbox_dir))),
    }
}

/// Create the simulated classifier described by `[monitoring]`.
pub fn create_classifier(settings: &MonitoringSettings) -> Result<Arc<dyn SignalClassifier>> {
    settings.validate()?;
    Ok(Arc::new(SimulatedClassifier::with_weights(
        settings.ok_weight,
        settings.warning_weight,
        settings.seed,
    )))
}

/// Create the simulated warning source described by `[monitoring]`.
///
/// Its seed is offset from the classifier's so the two streams differ.
pub fn create_warning_source(settings: &MonitoringSettings) -> Result<Arc<dyn WarningSource>> {
    settings.validate()?;
    Ok(Arc::new(SimulatedWarnings::with_probability(
        settings.warning_probability,
        settings.seed.map(|s| s.wrapping_add(1)),
    )))
}

/// Create the simulated identity verifier described by `[verification]`.
pub fn create_verifier(settings: &VerificationSettings) -> Result<Arc<dyn IdentityVerifier>> {
    settings.validate()?;
    Ok(Arc::new(SimulatedVerifier::with_probability(
        settings.match_probability,
        Duration::from_millis(settings.verify_delay_ms),
        settings.seed,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn resolve_env_vars_basic() {
        let lookup = lookup_from(&[("EXAM_HOST", "exams.example.edu")]);
        assert_eq!(resolve_env_vars("${EXAM_HOST}", &lookup), "exams.example.edu");
        assert_eq!(
            resolve_env_vars("https://${EXAM_HOST}/v1", &lookup),
            "https://exams.example.edu/v1"
        );
        assert_eq!(resolve_env_vars("${MISSING}", &lookup), "");
        assert_eq!(resolve_env_vars("${unterminated", &lookup), "${unterminated");
    }

    #[test]
    fn default_config() {
        let config = ExamguardConfig::default();
        assert!(matches!(config.backend, BackendConfig::File { .. }));
        assert_eq!(config.session.submit_timeout_secs, 30);
        assert_eq!(config.monitoring.status_interval_secs, 5);
        assert_eq!(config.monitoring.warning_interval_secs, 20);
        assert!(config.token().is_none());
    }

    #[test]
    fn parse_http_config() {
        let toml_str = r#"
[backend]
type = "http"
base_url = "https://${EXAM_HOST}"
token = "${EXAM_TOKEN}"

[session]
submit_timeout_secs = 10

[monitoring]
status_interval_secs = 2
seed = 99
"#;
        let mut config = parse_config(toml_str).unwrap();
        config.resolve(&lookup_from(&[
            ("EXAM_HOST", "exams.example.edu"),
            ("EXAM_TOKEN", "s3cret"),
        ]));

        match &config.backend {
            BackendConfig::Http {
                base_url,
                timeout_secs,
                ..
            } => {
                assert_eq!(base_url, "https://exams.example.edu");
                assert_eq!(*timeout_secs, 30);
            }
            other => panic!("expected http backend, got {other:?}"),
        }
        assert_eq!(config.token(), Some("s3cret"));

        let driver = config.driver_config();
        assert_eq!(driver.submit_timeout, Duration::from_secs(10));
        assert_eq!(driver.monitoring.status_interval, Duration::from_secs(2));
        assert_eq!(config.monitoring.seed, Some(99));
    }

    #[test]
    fn debug_masks_token() {
        let backend = BackendConfig::Http {
            base_url: "https://exams.example.edu".into(),
            token: Some("s3cret".into()),
            timeout_secs: 30,
        };
        let rendered = format!("{backend:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn base_url_override_switches_to_http() {
        let mut config = ExamguardConfig::default();
        config.apply_overrides(lookup_from(&[
            ("EXAMGUARD_BASE_URL", "http://localhost:5000"),
            ("EXAMGUARD_TOKEN", "env-token"),
        ]));
        assert!(matches!(
            &config.backend,
            BackendConfig::Http { base_url, .. } if base_url == "http://localhost:5000"
        ));
        assert_eq!(config.token(), Some("env-token"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = load_config_from(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn load_file_backend_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("examguard.toml");
        std::fs::write(
            &path,
            "[backend]\ntype = \"file\"\nexams_dir = \"./my-exams\"\n",
        )
        .unwrap();

        let config = load_config_from(Some(&path)).unwrap();
        match config.backend {
            BackendConfig::File { exams_dir, outbox_dir } => {
                assert_eq!(exams_dir, PathBuf::from("./my-exams"));
                assert_eq!(outbox_dir, PathBuf::from("./examguard-outbox"));
            }
            // EXAMGUARD_BASE_URL in the test environment turns this into http.
            BackendConfig::Http { .. } => {}
        }
    }

    #[test]
    fn http_backend_requires_base_url() {
        let config = BackendConfig::Http {
            base_url: String::new(),
            token: None,
            timeout_secs: 5,
        };
        assert!(create_backend(&config).is_err());
    }

    #[test]
    fn non_finite_weights_are_rejected() {
        let settings = MonitoringSettings {
            ok_weight: f64::NAN,
            ..MonitoringSettings::default()
        };
        let err = create_classifier(&settings).err().unwrap();
        assert!(err.to_string().contains("ok_weight"));

        let settings = MonitoringSettings {
            warning_probability: f64::INFINITY,
            ..MonitoringSettings::default()
        };
        assert!(create_warning_source(&settings).is_err());
        assert!(create_classifier(&MonitoringSettings::default()).is_ok());
    }

    #[test]
    fn nan_in_config_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("examguard.toml");
        std::fs::write(&path, "[monitoring]
warning_probability = nan
").unwrap();

        let err = load_config_from(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("warning_probability"));
    }

    #[test]
    fn verification_settings() {
        let config = parse_config(
            "[verification]\nenabled = false\ncountdown_secs = 0\nmax_attempts = 5\n",
        )
        .unwrap();
        assert!(!config.verification.enabled);
        let flow = config.verification.flow_config();
        assert_eq!(flow.countdown_secs, 0);
        assert_eq!(flow.max_attempts, 5);
        assert_eq!(flow.verify_timeout, Duration::from_secs(10));
        assert_eq!(config.verification.match_probability, DEFAULT_MATCH_PROBABILITY);

        let defaults = VerificationSettings::default();
        assert!(defaults.enabled);
        assert_eq!(defaults.countdown_secs, 3);
        assert_eq!(defaults.verify_delay_ms, 2000);

        let broken = VerificationSettings {
            match_probability: f64::NAN,
            ..VerificationSettings::default()
        };
        assert!(create_verifier(&broken).is_err());
    }
}
