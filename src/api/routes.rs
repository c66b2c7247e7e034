// src/api/routes.rs
use actix_web::{HttpResponse, error, web};
use serde_json::json;

use super::handlers;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/health", web::get().to(handlers::health_check))
        .route("/run", web::post().to(handlers::run_quiz));
}

/// Malformed or incomplete bodies are answered with 400 instead of actix's default.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let detail = err.to_string();
        error::InternalError::from_response(
            err,
            HttpResponse::BadRequest().json(json!({
                "detail": "Invalid JSON or request body",
                "errors": detail,
            })),
        )
        .into()
    })
}
