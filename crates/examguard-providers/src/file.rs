//! Offline backend backed by the local filesystem.
//!
//! Exams are read from a directory of TOML files; each submission is written
//! as a JSON file into an outbox directory for later upload or grading.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tracing::instrument;

use examguard_core::error::BackendError;
use examguard_core::model::ExamDefinition;
use examguard_core::parser::load_exam_directory;
use examguard_core::submission::{SubmissionAck, SubmissionPayload};
use examguard_core::traits::{Credential, ExamBackend};

pub struct FileBackend {
    exams_dir: PathBuf,
    outbox_dir: PathBuf,
}

impl FileBackend {
    pub fn new(exams_dir: impl Into<PathBuf>, outbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            exams_dir: exams_dir.into(),
            outbox_dir: outbox_dir.into(),
        }
    }

    pub fn exams_dir(&self) -> &Path {
        &self.exams_dir
    }

    pub fn outbox_dir(&self) -> &Path {
        &self.outbox_dir
    }
}

#[async_trait]
impl ExamBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    #[instrument(skip(self, _credential), fields(dir = %self.exams_dir.display()))]
    async fn fetch_exam(
        &self,
        exam_id: &str,
        _credential: &Credential,
    ) -> anyhow::Result<Option<ExamDefinition>> {
        let exams = load_exam_directory(&self.exams_dir)
            .with_context(|| format!("failed to load exams from {}", self.exams_dir.display()))?;
        tracing::debug!(count = exams.len(), "loaded exam files");
        Ok(exams.into_iter().find(|exam| exam.id == exam_id))
    }

    #[instrument(skip(self, payload, _credential), fields(exam_id = %payload.exam_id))]
    async fn submit_attempt(
        &self,
        payload: &SubmissionPayload,
        _credential: &Credential,
    ) -> anyhow::Result<SubmissionAck> {
        let json = serde_json::to_string_pretty(payload)
            .map_err(|e| BackendError::Storage(format!("failed to serialize payload: {e}")))?;

        std::fs::create_dir_all(&self.outbox_dir).map_err(|e| {
            BackendError::Storage(format!(
                "failed to create outbox {}: {e}",
                self.outbox_dir.display()
            ))
        })?;

        let path = self
            .outbox_dir
            .join(format!("{}-{}.json", payload.exam_id, payload.audit.attempt_id));
        std::fs::write(&path, json).map_err(|e| {
            BackendError::Storage(format!("failed to write {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "attempt written to outbox");

        Ok(SubmissionAck::from_response(serde_json::json!({
            "stored": path.display().to_string(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use examguard_core::answers::AnswerStore;
    use examguard_core::submission::{AuditContext, SubmitTrigger};

    const EXAM: &str = r#"
[exam]
id = "algebra-1"
title = "Algebra I"
teacher_id = "T42"
duration_secs = 900

[[questions]]
text = "2 + 2 = ?"
options = ["3", "4", "5"]
correct_answer = 1
"#;

    #[tokio::test]
    async fn fetches_exam_by_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("algebra.toml"), EXAM).unwrap();
        let backend = FileBackend::new(dir.path(), dir.path().join("outbox"));
        let credential = Credential::new("");

        let exam = backend.fetch_exam("algebra-1", &credential).await.unwrap();
        assert_eq!(exam.unwrap().title, "Algebra I");

        let missing = backend.fetch_exam("geometry", &credential).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn missing_exam_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nope"), dir.path().join("outbox"));
        let result = backend.fetch_exam("algebra-1", &Credential::new("")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn submission_lands_in_outbox() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("algebra.toml"), EXAM).unwrap();
        let outbox = dir.path().join("outbox");
        let backend = FileBackend::new(dir.path(), &outbox);
        let credential = Credential::new("");

        let exam = backend
            .fetch_exam("algebra-1", &credential)
            .await
            .unwrap()
            .unwrap();
        let payload = SubmissionPayload::build(
            &exam,
            &AnswerStore::new(),
            SubmitTrigger::ClockExpired,
            AuditContext {
                attempt_id: uuid::Uuid::new_v4(),
                warning_count: 2,
                remaining_secs: 0,
            },
        );

        let ack = backend.submit_attempt(&payload, &credential).await.unwrap();
        assert_eq!(ack.score, None);

        let files: Vec<_> = std::fs::read_dir(&outbox).unwrap().collect();
        assert_eq!(files.len(), 1);
        let written: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap(),
        )
        .unwrap();
        assert_eq!(written["examId"], "algebra-1");
        assert_eq!(written["audit"]["warningCount"], 2);
        assert_eq!(written["audit"]["trigger"], "clock_expired");
    }
}
