//! HTTP exam service backend.
//!
//! Talks to the exam REST API: `GET /api/exams` lists every exam visible to
//! the caller and `POST /api/exam/submit` records an attempt. Both calls carry
//! the credential in the `x-access-token` header.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::instrument;

use examguard_core::error::BackendError;
use examguard_core::model::{ExamDefinition, Question, QuestionKind, DEFAULT_INSTRUCTIONS};
use examguard_core::submission::{SubmissionAck, SubmissionPayload};
use examguard_core::traits::{Credential, ExamBackend};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const TOKEN_HEADER: &str = "x-access-token";

/// Exam service reached over HTTP.
pub struct HttpBackend {
    base_url: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let timeout = timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: timeout.as_secs(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout_secs)
        } else {
            BackendError::Network(e.to_string())
        }
    }
}

/// Map an error status to a [`BackendError`], passing successes through.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status().as_u16();
    if status == 401 || status == 403 {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Unauthorized(body));
    }
    if status >= 400 {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Api {
            status,
            message: body,
        });
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExamRecord {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    teacher_id: String,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    duration_secs: Option<u64>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    questions: Vec<QuestionRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionRecord {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    text: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    correct_answer: Option<CorrectAnswer>,
}

/// Exams created through the web form store the correct option's text;
/// older records store its index.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CorrectAnswer {
    Index(usize),
    Text(String),
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
                .ok()
                .map(|t| t.and_utc())
        })
}

impl ExamRecord {
    fn duration_secs(&self) -> Result<u64, BackendError> {
        if let Some(secs) = self.duration_secs {
            return Ok(secs);
        }
        let (Some(start), Some(end)) = (&self.start_time, &self.end_time) else {
            return Err(BackendError::Decode(format!(
                "exam '{}' has neither durationSecs nor startTime/endTime",
                self.id
            )));
        };
        let parse = |raw: &str| {
            parse_timestamp(raw)
                .ok_or_else(|| BackendError::Decode(format!("invalid timestamp: {raw}")))
        };
        let seconds = (parse(end)? - parse(start)?).num_seconds();
        Ok(seconds.max(0) as u64)
    }

    fn into_definition(self) -> Result<ExamDefinition, BackendError> {
        let duration_secs = self.duration_secs()?;
        let questions = self
            .questions
            .into_iter()
            .enumerate()
            .map(|(index, q)| {
                let kind = match q.kind.as_deref() {
                    Some(raw) => raw.parse::<QuestionKind>().map_err(BackendError::Decode)?,
                    None => QuestionKind::MultipleChoice,
                };
                let correct_answer = match q.correct_answer {
                    Some(CorrectAnswer::Index(i)) => Some(i),
                    Some(CorrectAnswer::Text(text)) => q.options.iter().position(|o| *o == text),
                    None => None,
                };
                Ok(Question {
                    id: index as u32 + 1,
                    kind,
                    text: q.text,
                    options: q.options,
                    correct_answer,
                })
            })
            .collect::<Result<Vec<_>, BackendError>>()?;

        Ok(ExamDefinition {
            id: self.id,
            title: self.title,
            teacher_id: self.teacher_id,
            duration_secs,
            instructions: self
                .instructions
                .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            questions,
        })
    }
}

#[async_trait]
impl ExamBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, credential), fields(base_url = %self.base_url))]
    async fn fetch_exam(
        &self,
        exam_id: &str,
        credential: &Credential,
    ) -> anyhow::Result<Option<ExamDefinition>> {
        let response = self
            .client
            .get(format!("{}/api/exams", self.base_url))
            .header(TOKEN_HEADER, credential.expose())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = check_status(response).await?;

        let records: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(format!("failed to parse exam list: {e}")))?;
        tracing::debug!(count = records.len(), "fetched exam list");

        let Some(record) = records
            .into_iter()
            .find(|r| r.get("_id").and_then(|id| id.as_str()) == Some(exam_id))
        else {
            return Ok(None);
        };

        let record: ExamRecord = serde_json::from_value(record)
            .map_err(|e| BackendError::Decode(format!("malformed exam '{exam_id}': {e}")))?;
        Ok(Some(record.into_definition()?))
    }

    #[instrument(skip(self, payload, credential), fields(exam_id = %payload.exam_id))]
    async fn submit_attempt(
        &self,
        payload: &SubmissionPayload,
        credential: &Credential,
    ) -> anyhow::Result<SubmissionAck> {
        let response = self
            .client
            .post(format!("{}/api/exam/submit", self.base_url))
            .header(TOKEN_HEADER, credential.expose())
            .header("content-type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let response = check_status(response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;
        let raw = if body.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&body)
                .map_err(|e| BackendError::Decode(format!("failed to parse submit response: {e}")))?
        };
        Ok(SubmissionAck::from_response(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use examguard_core::answers::AnswerStore;
    use examguard_core::submission::{AuditContext, SubmitTrigger};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn exam_list() -> serde_json::Value {
        serde_json::json!([
            {
                "_id": "other",
                "title": "Something Else",
                "teacherId": "T9",
                "durationSecs": 60,
                "questions": []
            },
            {
                "_id": "665f1c",
                "title": "Introduction to Psychology",
                "teacherId": "T001",
                "startTime": "2024-06-01T10:00:00Z",
                "endTime": "2024-06-01T12:00:00Z",
                "questions": [
                    {
                        "text": "Which of the following is NOT a perspective in psychology?",
                        "options": ["Behavioral", "Cognitive", "Mathematical", "Psychodynamic"],
                        "correctAnswer": "Mathematical"
                    },
                    {
                        "text": "Who developed psychoanalysis?",
                        "options": ["Freud", "Skinner"],
                        "correctAnswer": 0
                    }
                ]
            }
        ])
    }

    async fn mount_exams(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/api/exams"))
            .and(header("x-access-token", "student-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetch_maps_exam_record() {
        let server = MockServer::start().await;
        mount_exams(&server, exam_list()).await;

        let backend = HttpBackend::new(&server.uri(), None).unwrap();
        let exam = backend
            .fetch_exam("665f1c", &Credential::new("student-token"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exam.title, "Introduction to Psychology");
        assert_eq!(exam.teacher_id, "T001");
        assert_eq!(exam.duration_secs, 7200);
        assert_eq!(exam.instructions, DEFAULT_INSTRUCTIONS);
        assert_eq!(exam.questions.len(), 2);
        assert_eq!(exam.questions[0].id, 1);
        assert_eq!(exam.questions[0].kind, QuestionKind::MultipleChoice);
        assert_eq!(exam.questions[0].correct_answer, Some(2));
        assert_eq!(exam.questions[1].id, 2);
        assert_eq!(exam.questions[1].correct_answer, Some(0));
    }

    #[tokio::test]
    async fn fetch_unknown_exam_is_none() {
        let server = MockServer::start().await;
        mount_exams(&server, exam_list()).await;

        let backend = HttpBackend::new(&server.uri(), None).unwrap();
        let exam = backend
            .fetch_exam("missing", &Credential::new("student-token"))
            .await
            .unwrap();
        assert!(exam.is_none());
    }

    #[tokio::test]
    async fn fetch_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/exams"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&server.uri(), None).unwrap();
        let err = backend
            .fetch_exam("665f1c", &Credential::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn fetch_record_without_duration_is_decode_error() {
        let server = MockServer::start().await;
        mount_exams(
            &server,
            serde_json::json!([{"_id": "x", "title": "X", "questions": []}]),
        )
        .await;

        let backend = HttpBackend::new(&server.uri(), None).unwrap();
        let err = backend
            .fetch_exam("x", &Credential::new("student-token"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BackendError>(),
            Some(BackendError::Decode(_))
        ));
    }

    fn payload() -> SubmissionPayload {
        let exam = ExamDefinition {
            id: "665f1c".into(),
            title: "Quiz".into(),
            teacher_id: "T001".into(),
            duration_secs: 60,
            instructions: String::new(),
            questions: vec![Question {
                id: 1,
                kind: QuestionKind::MultipleChoice,
                text: "Pick b".into(),
                options: vec!["a".into(), "b".into()],
                correct_answer: Some(1),
            }],
        };
        let mut answers = AnswerStore::new();
        answers.set_answer(1, examguard_core::model::AnswerValue::Choice(1));
        SubmissionPayload::build(
            &exam,
            &answers,
            SubmitTrigger::Manual,
            AuditContext {
                attempt_id: uuid::Uuid::nil(),
                warning_count: 0,
                remaining_secs: 30,
            },
        )
    }

    #[tokio::test]
    async fn submit_posts_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/exam/submit"))
            .and(header("x-access-token", "student-token"))
            .and(body_partial_json(serde_json::json!({
                "examId": "665f1c",
                "teacherId": "T001",
                "questions": [{"text": "Pick b", "selectedAnswer": "b", "correctAnswer": 1}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"score": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&server.uri(), None).unwrap();
        let ack = backend
            .submit_attempt(&payload(), &Credential::new("student-token"))
            .await
            .unwrap();
        assert_eq!(ack.score, Some(1.0));
    }

    #[tokio::test]
    async fn submit_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/exam/submit"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&server.uri(), None).unwrap();
        let err = backend
            .submit_attempt(&payload(), &Credential::new("student-token"))
            .await
            .unwrap_err();
        let backend_err = err.downcast_ref::<BackendError>().unwrap();
        assert!(matches!(backend_err, BackendError::Api { status: 500, .. }));
        assert!(backend_err.is_transient());
    }

    #[tokio::test]
    async fn submit_empty_body_is_acknowledged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/exam/submit"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(&server.uri(), None).unwrap();
        let ack = backend
            .submit_attempt(&payload(), &Credential::new("t"))
            .await
            .unwrap();
        assert_eq!(ack.score, None);
    }

    #[test]
    fn parses_form_timestamps_without_offset() {
        let t = parse_timestamp("2024-06-01T10:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-06-01T10:00:00+00:00");
    }
}
