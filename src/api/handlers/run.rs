// src/api/handlers/run.rs
use actix_web::{HttpResponse, Result, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Duration;
use url::Url;

use crate::api::AppState;
use crate::errors::AgentError;
use crate::models::{LoopResult, QuizSession};

/// Slack on top of the session budget before the handler stops waiting on the loop.
const RUN_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone, Deserialize)]
pub struct RunRequest {
    pub email: String,
    pub secret: String,
    pub url: String,
}

#[derive(Serialize)]
pub struct RunResponse {
    pub status: String,
    pub detail: Option<String>,
}

pub async fn run_quiz(state: web::Data<AppState>, req: web::Json<RunRequest>) -> Result<HttpResponse> {
    let req = req.into_inner();

    if req.secret != state.config.student_secret {
        return Ok(HttpResponse::Forbidden().json(json!({ "detail": "Invalid secret" })));
    }
    if Url::parse(req.url.trim()).is_err() {
        return Ok(HttpResponse::BadRequest().json(json!({
            "detail": "Invalid JSON or request body",
            "errors": format!("'{}' is not an absolute URL", req.url),
        })));
    }

    let budget = state.config.policy.max_run;
    let session = QuizSession::new(req.email, req.url.trim(), budget);
    let solver = state.solver();

    let outcome = tokio::time::timeout(budget + RUN_GRACE, solver.run(&session)).await;
    match outcome {
        Ok(Ok(result)) => Ok(HttpResponse::Ok().json(RunResponse {
            status: "ok".to_string(),
            detail: Some(result.detail().to_string()),
        })),
        Ok(Err(e)) => {
            let response = RunResponse {
                status: "error".to_string(),
                detail: Some(format!("Run aborted: {}", e)),
            };
            match e {
                AgentError::RenderUnavailable { .. } => Ok(HttpResponse::BadGateway().json(response)),
                _ => Ok(HttpResponse::InternalServerError().json(response)),
            }
        }
        Err(_) => {
            log::warn!("Run {} overran its budget; abandoning", session.run_id);
            let timed_out = LoopResult::TimedOut { url: session.initial_url.clone() };
            Ok(HttpResponse::Ok().json(RunResponse {
                status: "ok".to_string(),
                detail: Some(timed_out.detail().to_string()),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::config::AppConfig;
    use actix_web::{App, http::StatusCode, test};
    use std::collections::HashMap;

    fn test_state() -> AppState {
        let env: HashMap<&str, &str> = [
            ("STUDENT_SECRET", "letmein"),
            ("OPENAI_API_KEY", "test-key"),
            ("EVENT_LOG", "off"),
        ]
        .into_iter()
        .collect();
        let config = AppConfig::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        AppState::new(config).unwrap()
    }

    #[actix_web::test]
    async fn test_wrong_secret_is_forbidden() {
        let app = test::init_service(
            App::new().app_data(web::Data::new(test_state())).configure(configure_routes),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/run")
            .set_json(json!({"email": "a@b.c", "secret": "nope", "url": "https://q.example/1"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["detail"], "Invalid secret");
    }

    #[actix_web::test]
    async fn test_malformed_json_is_bad_request() {
        let app = test::init_service(
            App::new().app_data(web::Data::new(test_state())).configure(configure_routes),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/run")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["detail"], "Invalid JSON or request body");
    }

    #[actix_web::test]
    async fn test_missing_field_is_bad_request() {
        let app = test::init_service(
            App::new().app_data(web::Data::new(test_state())).configure(configure_routes),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/run")
            .set_json(json!({"email": "a@b.c", "secret": "letmein"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_relative_url_is_bad_request() {
        let app = test::init_service(
            App::new().app_data(web::Data::new(test_state())).configure(configure_routes),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/run")
            .set_json(json!({"email": "a@b.c", "secret": "letmein", "url": "/quiz-1"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_health_check() {
        let app = test::init_service(
            App::new().app_data(web::Data::new(test_state())).configure(configure_routes),
        )
        .await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["service"], "quiz-agent");
    }
}
