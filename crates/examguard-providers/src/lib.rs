//! examguard-providers: exam backends and proctoring sources.
//!
//! Implements the `ExamBackend` trait over HTTP and the local filesystem,
//! provides the simulated and scripted signal classifiers and identity
//! verifiers, and loads the examguard configuration that wires them together.

pub mod config;
pub mod file;
pub mod http;
pub mod mock;
pub mod simulated;

pub use config::{
    create_backend, create_classifier, create_verifier, create_warning_source, load_config,
    load_config_from, BackendConfig, ExamguardConfig,
};
pub use file::FileBackend;
pub use http::HttpBackend;
pub use simulated::{SimulatedClassifier, SimulatedVerifier, SimulatedWarnings};
