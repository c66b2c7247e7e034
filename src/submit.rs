// src/submit.rs
use log::{info, warn};
use reqwest::Client;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

use crate::errors::{AgentError, Result};
use crate::events::EventLog;
use crate::models::{SubmissionOutcome, SubmissionRequest};

/// Delivers an answer to the quiz server and returns its verdict.
pub trait Submitter: Send + Sync {
    fn submit(
        &self,
        run_id: Uuid,
        target: &Url,
        request: &SubmissionRequest,
    ) -> impl Future<Output = Result<SubmissionOutcome>> + Send;
}

pub struct HttpSubmitter {
    client: Client,
    events: Arc<EventLog>,
}

impl HttpSubmitter {
    pub fn new(client: Client, events: Arc<EventLog>) -> Self {
        Self { client, events }
    }
}

impl Submitter for HttpSubmitter {
    async fn submit(
        &self,
        run_id: Uuid,
        target: &Url,
        request: &SubmissionRequest,
    ) -> Result<SubmissionOutcome> {
        info!("📤 Submitting answer for {} to {}", request.url, target);

        let resp = match self.client.post(target.as_str()).json(request).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.events.record(
                    run_id,
                    "SENT_POST",
                    json!({
                        "submit_url": target.as_str(),
                        "status_code": "network_error",
                        "payload": request.redacted(),
                        "error": e.to_string(),
                    }),
                ).await;
                return Err(AgentError::SubmissionUnreachable(e.to_string()));
            }
        };

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AgentError::SubmissionUnreachable(format!("reading response: {}", e)))?;
        self.events.record(
            run_id,
            "SENT_POST",
            json!({
                "submit_url": target.as_str(),
                "status_code": status.as_u16(),
                "payload": request.redacted(),
            }),
        ).await;

        let outcome = parse_outcome(status.as_u16(), &body)?;
        self.events.record(
            run_id,
            "SUBMISSION_RESULT",
            json!({
                "submit_url": target.as_str(),
                "status_code": status.as_u16(),
                "correct": outcome.correct,
                "next_url": outcome.next_url,
                "reason": outcome.reason,
                "raw_response": body,
            }),
        ).await;
        Ok(outcome)
    }
}

/// Reads the server's verdict. Quiz servers answer wrong submissions with 4xx and a JSON
/// verdict, so the status code alone does not make a response unusable.
pub fn parse_outcome(status: u16, body: &str) -> Result<SubmissionOutcome> {
    serde_json::from_str::<SubmissionOutcome>(body).map_err(|e| {
        warn!("Submission endpoint returned non-JSON body (status {}): {}", status, e);
        AgentError::SubmissionUnreachable(format!(
            "invalid response from submission endpoint (status {}): {}",
            status, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verdict_with_next_url() {
        let outcome =
            parse_outcome(200, r#"{"correct": true, "url": "https://q.example/2", "reason": null}"#).unwrap();
        assert!(outcome.correct);
        assert_eq!(outcome.next_url.as_deref(), Some("https://q.example/2"));
    }

    #[test]
    fn rejected_verdict_on_client_error_is_still_a_verdict() {
        let outcome = parse_outcome(400, r#"{"correct": false, "reason": "Wrong sum"}"#).unwrap();
        assert!(!outcome.correct);
        assert_eq!(outcome.reason.as_deref(), Some("Wrong sum"));
    }

    #[test]
    fn html_body_is_unreachable() {
        let err = parse_outcome(502, "<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, AgentError::SubmissionUnreachable(_)));
        assert!(err.to_string().contains("status 502"));
    }
}
