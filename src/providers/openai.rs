// src/providers/openai.rs

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::info;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::config::OpenAIConfig;
use crate::errors::{AgentError, Result};
use crate::providers::{LlmProvider, PromptRequest};

/// A provider for OpenAI-compatible chat completion APIs.
pub struct OpenAIProvider {
    client: Client,
    config: OpenAIConfig,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

impl OpenAIProvider {
    /// Creates a new `OpenAIProvider`.
    pub fn new(client: Client, config: OpenAIConfig) -> Self {
        Self { client, config }
    }
}

fn build_messages<'a>(request: &PromptRequest<'a>) -> Vec<Message<'a>> {
    let mut user = vec![ContentPart::Text { text: request.user }];
    if let Some(png) = request.image_png {
        user.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/png;base64,{}", STANDARD.encode(png)),
            },
        });
    }
    vec![
        Message {
            role: "system",
            content: vec![ContentPart::Text { text: request.system }],
        },
        Message {
            role: "user",
            content: user,
        },
    ]
}

impl LlmProvider for OpenAIProvider {
    /// Calls the chat completions endpoint and returns the model's response text and latency.
    async fn generate(&self, model: &str, request: &PromptRequest<'_>) -> Result<(String, u64)> {
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));

        info!("📡 Calling OpenAI: {} with model: {}", url, model);

        let body = OpenAIRequest {
            model,
            messages: build_messages(request),
        };

        let start = Instant::now();

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let latency_ms = start.elapsed().as_millis() as u64;

        info!("📥 OpenAI response status: {} ({}ms)", status, latency_ms);

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

        let openai_resp: OpenAIResponse = resp.json().await?;

        let output = openai_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::UnexpectedResponse("No choices in response".to_string()))?
            .message
            .content
            .unwrap_or_default();

        if output.trim().is_empty() {
            return Err(AgentError::EmptyResponse);
        }

        Ok((output, latency_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_only_request_shape() {
        let request = PromptRequest { system: "sys", user: "hello", image_png: None };
        let body = serde_json::to_value(OpenAIRequest {
            model: "gpt-5.1",
            messages: build_messages(&request),
        })
        .unwrap();

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"][0]["type"], "text");
        assert_eq!(body["messages"][1]["content"][0]["text"], "hello");
        assert_eq!(body["messages"][1]["content"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_screenshot_becomes_data_url() {
        let request = PromptRequest { system: "sys", user: "look", image_png: Some(&[1, 2, 3]) };
        let body = serde_json::to_value(OpenAIRequest {
            model: "gpt-5.1",
            messages: build_messages(&request),
        })
        .unwrap();

        let image = &body["messages"][1]["content"][1];
        assert_eq!(image["type"], "image_url");
        assert_eq!(image["image_url"]["url"], "data:image/png;base64,AQID");
    }
}
