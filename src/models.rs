// src/models.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

/// One inbound `/run` request, owned by a single solve loop.
#[derive(Debug, Clone)]
pub struct QuizSession {
    pub run_id: Uuid,
    pub email: String,
    pub initial_url: String,
    pub deadline: Instant,
}

impl QuizSession {
    pub fn new(email: impl Into<String>, initial_url: impl Into<String>, budget: Duration) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            email: email.into(),
            initial_url: initial_url.into(),
            deadline: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// What the renderer extracted from a quiz page after its scripts ran.
#[derive(Debug, Clone, Default)]
pub struct RenderedPage {
    pub url: String,
    pub text: String,
    pub screenshot: Option<Vec<u8>>,
    pub resources: Vec<String>,
}

/// Per-URL working state. A fresh one is built every time the loop moves to a new URL,
/// so the error history of one page can never leak into another.
#[derive(Debug, Clone)]
pub struct PageContext {
    pub url: String,
    pub page: RenderedPage,
    pub errors: Vec<String>,
    pub attempts: u32,
    pub skip_retries: u32,
}

impl PageContext {
    pub fn new(url: impl Into<String>, page: RenderedPage) -> Self {
        Self {
            url: url.into(),
            page,
            errors: Vec::new(),
            attempts: 0,
            skip_retries: 0,
        }
    }

    /// Records a failed attempt and returns the new attempt count.
    pub fn record_failure(&mut self, reason: impl Into<String>) -> u32 {
        self.errors.push(reason.into());
        self.attempts += 1;
        self.attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled,
    Timeout,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {}", code),
            ExitStatus::Signaled => write!(f, "killed by signal"),
            ExitStatus::Timeout => write!(f, "timed out"),
        }
    }
}

/// Output of one sandboxed run of generated code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    pub code: String,
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

impl AttemptResult {
    /// Description of a failed run, fed back into the next plan request.
    /// Stderr is carried as captured.
    pub fn failure_summary(&self) -> String {
        if self.stderr.is_empty() {
            self.status.to_string()
        } else {
            format!("{}\n{}", self.status, self.stderr)
        }
    }
}

/// The literal answer text submitted to the quiz server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Answer(pub String);

impl Answer {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body POSTed to the submission endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRequest {
    pub email: String,
    pub secret: String,
    pub url: String,
    pub answer: Answer,
}

impl SubmissionRequest {
    /// JSON form safe to write to logs.
    pub fn redacted(&self) -> serde_json::Value {
        serde_json::json!({
            "email": self.email,
            "secret": "***",
            "url": self.url,
            "answer": self.answer,
        })
    }
}

/// The quiz server's verdict.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SubmissionOutcome {
    #[serde(default)]
    pub correct: bool,
    #[serde(default, rename = "url")]
    pub next_url: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub delay: Option<f64>,
}

impl SubmissionOutcome {
    /// Advisory pause before the next page. Values too large for a `Duration` saturate;
    /// the loop caps the pause at the remaining budget anyway.
    pub fn pacing(&self) -> Option<Duration> {
        self.delay
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| Duration::try_from_secs_f64(d).unwrap_or(Duration::MAX))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopResult {
    Completed { pages: usize },
    FailedWithinAttempts { url: String, errors: Vec<String> },
    TimedOut { url: String },
}

impl LoopResult {
    pub fn detail(&self) -> &'static str {
        match self {
            LoopResult::Completed { .. } => "Quiz Completed",
            LoopResult::FailedWithinAttempts { .. } => "Failed to solve quiz within attempts.",
            LoopResult::TimedOut { .. } => "Timed out before completing quiz.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_defaults_missing_fields() {
        let outcome: SubmissionOutcome = serde_json::from_str(r#"{"reason": "nope"}"#).unwrap();
        assert!(!outcome.correct);
        assert_eq!(outcome.next_url, None);
        assert_eq!(outcome.reason.as_deref(), Some("nope"));
    }

    #[test]
    fn outcome_reads_next_url_from_url_field() {
        let outcome: SubmissionOutcome =
            serde_json::from_str(r#"{"correct": true, "url": "https://q.example/2", "delay": 1.5}"#).unwrap();
        assert!(outcome.correct);
        assert_eq!(outcome.next_url.as_deref(), Some("https://q.example/2"));
        assert_eq!(outcome.pacing(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn negative_delay_is_ignored() {
        let outcome = SubmissionOutcome { delay: Some(-3.0), ..Default::default() };
        assert_eq!(outcome.pacing(), None);
    }

    #[test]
    fn huge_delay_saturates_instead_of_panicking() {
        let outcome: SubmissionOutcome =
            serde_json::from_str(r#"{"correct": false, "reason": "x", "delay": 1e20}"#).unwrap();
        assert_eq!(outcome.pacing(), Some(Duration::MAX));
    }

    #[test]
    fn answer_serializes_as_plain_string() {
        let req = SubmissionRequest {
            email: "a@b.c".to_string(),
            secret: "s3cr3t".to_string(),
            url: "https://q.example/1".to_string(),
            answer: Answer("12.50".to_string()),
        };
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body["answer"], "12.50");
        assert_eq!(req.redacted()["secret"], "***");
    }

    #[test]
    fn failure_summary_includes_stderr() {
        let result = AttemptResult {
            code: String::new(),
            stdout: String::new(),
            stderr: "Traceback: boom\n".to_string(),
            status: ExitStatus::Exited(1),
        };
        assert_eq!(result.failure_summary(), "exit code 1\nTraceback: boom\n");
    }

    #[test]
    fn failure_summary_keeps_stderr_indentation() {
        let result = AttemptResult {
            code: String::new(),
            stdout: String::new(),
            stderr: "  File \"solution.py\", line 1\n    print(x\n".to_string(),
            status: ExitStatus::Exited(1),
        };
        assert!(result.failure_summary().ends_with("\n  File \"solution.py\", line 1\n    print(x\n"));
    }
}
