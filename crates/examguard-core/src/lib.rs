//! examguard-core: timed exam session engine and proctoring feed.
//!
//! This crate defines the exam data model, the session state machine, the
//! countdown clock, the monitoring feed, the pre-exam identity check, and the
//! submission protocol that the rest of examguard builds on.

pub mod answers;
pub mod clock;
pub mod driver;
pub mod error;
pub mod model;
pub mod monitoring;
pub mod parser;
pub mod session;
pub mod submission;
pub mod timer;
pub mod traits;
pub mod verification;
