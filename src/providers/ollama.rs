// src/providers/ollama.rs

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::info;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::OllamaConfig;
use crate::errors::{AgentError, Result};
use crate::providers::{LlmProvider, PromptRequest};

/// A provider for interacting with local Ollama models.
pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaProvider {
    /// Creates a new `OllamaProvider`.
    pub fn new(client: Client, config: OllamaConfig) -> Self {
        Self { client, config }
    }
}

impl LlmProvider for OllamaProvider {
    /// Calls the Ollama API and returns the model's response text and latency.
    async fn generate(&self, model: &str, request: &PromptRequest<'_>) -> Result<(String, u64)> {
        let url = format!("{}/api/generate", self.config.api_base.trim_end_matches('/'));

        info!("📡 Calling Ollama: {} with model: {}", url, model);

        let body = OllamaRequest {
            model,
            system: request.system,
            prompt: request.user,
            stream: false,
            images: request.image_png.map(|png| STANDARD.encode(png)).into_iter().collect(),
        };

        let start = Instant::now();

        let resp = self.client.post(&url).json(&body).send().await?;

        let status = resp.status();
        let latency_ms = start.elapsed().as_millis() as u64;

        info!("📥 Ollama response status: {} ({}ms)", status, latency_ms);

        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error body".to_string());
            return Err(AgentError::ApiError {
                status: status.as_u16(),
                body: error_body,
            });
        }

        let ollama_resp: OllamaResponse = resp.json().await?;
        if ollama_resp.response.trim().is_empty() {
            return Err(AgentError::EmptyResponse);
        }

        Ok((ollama_resp.response, latency_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_without_screenshot_omits_images() {
        let body = serde_json::to_value(OllamaRequest {
            model: "llama3",
            system: "sys",
            prompt: "hello",
            stream: false,
            images: Vec::new(),
        })
        .unwrap();
        assert_eq!(body["stream"], false);
        assert_eq!(body["system"], "sys");
        assert!(body.get("images").is_none());
    }
}
