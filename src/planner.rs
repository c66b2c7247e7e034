// src/planner.rs
use log::info;
use regex::Regex;
use reqwest::Client;
use std::future::Future;
use std::sync::{Arc, LazyLock};

use crate::config::AppConfig;
use crate::errors::{AgentError, Result};
use crate::models::RenderedPage;
use crate::providers::{
    LlmProvider, PromptRequest, ollama::OllamaProvider, openai::OpenAIProvider, parse_model_string,
};

const SYSTEM_PROMPT: &str = "You solve data quizzes published as web pages by writing a single \
self-contained Python 3 program. The program's standard output is submitted verbatim as the \
answer, so it must print the answer and nothing else. Never print credentials, secrets or \
tokens that appear on the page; they are not the answer.";

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+\-]*[ \t]*\r?\n(.*?)```").expect("fence pattern"));

/// Everything the plan service sees for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub url: &'a str,
    pub page: &'a RenderedPage,
    /// Failures of earlier attempts on this same URL, oldest first.
    pub errors: &'a [String],
}

/// Turns page content into a program that computes the answer.
pub trait PlanService: Send + Sync {
    fn plan(&self, request: &PlanRequest<'_>) -> impl Future<Output = Result<String>> + Send;
}

/// Plan service backed by an LLM provider selected from `AppConfig::plan_model`.
pub struct LlmPlanner {
    config: Arc<AppConfig>,
    client: Client,
}

impl LlmPlanner {
    pub fn new(config: Arc<AppConfig>, client: Client) -> Self {
        Self { config, client }
    }

    /// Call the appropriate provider based on the provider name
    async fn call_provider(&self, prompt: &PromptRequest<'_>) -> Result<(String, u64)> {
        let (provider_name, model_name) = parse_model_string(&self.config.plan_model);
        match provider_name.as_str() {
            "openai" => {
                let openai_config = self
                    .config
                    .openai
                    .as_ref()
                    .ok_or_else(|| AgentError::ProviderNotFound("openai".to_string()))?;
                let provider = OpenAIProvider::new(self.client.clone(), openai_config.clone());
                provider.generate(&model_name, prompt).await
            }
            "ollama" => {
                let ollama_config = self
                    .config
                    .ollama
                    .as_ref()
                    .ok_or_else(|| AgentError::ProviderNotFound("ollama".to_string()))?;
                let provider = OllamaProvider::new(self.client.clone(), ollama_config.clone());
                provider.generate(&model_name, prompt).await
            }
            _ => Err(AgentError::ProviderNotFound(provider_name)),
        }
    }
}

impl PlanService for LlmPlanner {
    async fn plan(&self, request: &PlanRequest<'_>) -> Result<String> {
        let user = build_prompt(request, self.config.sandbox.allow_network);
        let image_png = if self.config.attach_screenshot {
            request.page.screenshot.as_deref()
        } else {
            None
        };
        let prompt = PromptRequest {
            system: SYSTEM_PROMPT,
            user: &user,
            image_png,
        };

        let (response, latency_ms) = self.call_provider(&prompt).await?;
        info!(
            "🧠 Plan for {} received in {}ms ({} prior errors)",
            request.url,
            latency_ms,
            request.errors.len()
        );
        extract_code(&response)
    }
}

/// Builds the user turn: the task page, hints about linked data and what went wrong so far.
pub fn build_prompt(request: &PlanRequest<'_>, network: bool) -> String {
    let mut prompt = format!(
        "Quiz page URL: {}\n\nRendered page text:\n-----\n{}\n-----\n",
        request.url,
        request.page.text.trim()
    );

    if !request.page.resources.is_empty() {
        prompt.push_str("\nFiles and media linked from the page:\n");
        for resource in &request.page.resources {
            prompt.push_str(&format!("- {}\n", resource));
        }
    }

    prompt.push_str(
        "\nThe page may show an example JSON payload with fields such as email, secret, url \
         and answer. Compute only the value of the answer field.\n",
    );
    if network {
        prompt.push_str("The program may download the linked files.\n");
    } else {
        prompt.push_str(
            "The program runs without network access; embed any data it needs from the page text.\n",
        );
    }

    if !request.errors.is_empty() {
        prompt.push_str("\nPrevious attempts on this page failed:\n");
        for (i, error) in request.errors.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, error));
        }
        prompt.push_str("Fix the cause of these failures.\n");
    }

    prompt.push_str("\nReply with the Python program only.");
    prompt
}

/// Takes the first fenced code block if the model used one, otherwise the whole reply.
pub fn extract_code(response: &str) -> Result<String> {
    let code = FENCED_BLOCK
        .captures(response)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(response)
        .trim();
    if code.is_empty() {
        return Err(AgentError::EmptyResponse);
    }
    Ok(code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str, resources: &[&str]) -> RenderedPage {
        RenderedPage {
            url: "https://q.example/1".to_string(),
            text: text.to_string(),
            screenshot: None,
            resources: resources.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_extract_fenced_python() {
        let reply = "Here you go:\n```python\nprint(6 * 7)\n```\nGood luck";
        assert_eq!(extract_code(reply).unwrap(), "print(6 * 7)");
    }

    #[test]
    fn test_extract_unfenced_reply() {
        assert_eq!(extract_code("  print('x')\n").unwrap(), "print('x')");
    }

    #[test]
    fn test_extract_empty_fence_is_error() {
        assert!(matches!(extract_code("```python\n\n```"), Err(AgentError::EmptyResponse)));
    }

    #[test]
    fn test_prompt_lists_errors_in_order() {
        let page = page("What is 2+2?", &[]);
        let errors = vec!["wrong".to_string(), "execution failed: exit code 1".to_string()];
        let prompt = build_prompt(
            &PlanRequest { url: &page.url, page: &page, errors: &errors },
            false,
        );
        assert!(prompt.contains("What is 2+2?"));
        assert!(prompt.contains("1. wrong\n2. execution failed: exit code 1"));
        assert!(prompt.contains("without network access"));
    }

    #[test]
    fn test_prompt_without_errors_has_no_history_section() {
        let page = page("Sum the column.", &["https://q.example/data.csv"]);
        let prompt = build_prompt(&PlanRequest { url: &page.url, page: &page, errors: &[] }, true);
        assert!(!prompt.contains("Previous attempts"));
        assert!(prompt.contains("- https://q.example/data.csv"));
    }
}
