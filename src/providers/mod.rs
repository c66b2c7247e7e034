// src/providers/mod.rs

use std::future::Future;

use crate::errors::Result;

pub mod ollama;
pub mod openai;

/// One prompt sent to a model: system instructions, the user turn and an optional page screenshot.
#[derive(Debug, Clone, Copy)]
pub struct PromptRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    pub image_png: Option<&'a [u8]>,
}

/// A common trait for Large Language Model (LLM) providers.
/// This allows the planner to talk to a hosted OpenAI-compatible API or a local Ollama
/// through the same interface.
///
/// Note: We're not using async_trait here, so implementers must handle async directly.
pub trait LlmProvider: Send + Sync {
    /// Generates a response from the LLM.
    ///
    /// # Arguments
    /// * `model` - The specific model to use for generation (e.g., "gpt-5.1", "llama3").
    /// * `request` - The prompt to send to the model.
    ///
    /// # Returns
    /// A `Result` containing a tuple of the generated `String` and the latency in milliseconds (`u64`).
    fn generate(
        &self,
        model: &str,
        request: &PromptRequest<'_>,
    ) -> impl Future<Output = Result<(String, u64)>> + Send;
}

/// Parses a model string like "provider:model_name" and returns the provider and model.
/// Defaults to "openai" if no provider is specified.
pub fn parse_model_string(model_str: &str) -> (String, String) {
    match model_str.split_once(':') {
        Some((provider, model)) => (provider.to_string(), model.to_string()),
        None => ("openai".to_string(), model_str.to_string()),
    }
}
