// src/config.rs
use std::path::PathBuf;
use std::str::FromStr;
use tokio::time::Duration;

use crate::errors::{AgentError, Result};

/// Configuration for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_base: String,
    pub api_key: String,
}

/// Configuration for the Ollama provider.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub api_base: String,
}

/// How generated code is launched.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub interpreter: String,
    pub args: Vec<String>,
    pub script_name: String,
    pub allow_network: bool,
    pub memory_limit_bytes: Option<u64>,
    /// Bytes kept per output stream.
    pub output_limit: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            args: vec!["-I".to_string()],
            script_name: "solution.py".to_string(),
            allow_network: false,
            memory_limit_bytes: None,
            output_limit: 64 * 1024,
        }
    }
}

/// Limits and thresholds of the solve loop.
#[derive(Debug, Clone)]
pub struct LoopPolicy {
    /// Total wall-clock budget of one `/run` request.
    pub max_run: Duration,
    /// Attempts per URL before giving up on it.
    pub max_attempts: u32,
    /// Render tries before the run fails with `RenderUnavailable`.
    pub render_attempts: u32,
    pub render_retry_pause: Duration,
    /// Upper bound for a single sandboxed execution.
    pub exec_time_limit: Duration,
    /// Budget kept free after an execution so the answer can still be submitted.
    pub submit_reserve: Duration,
    /// Same-URL retries allowed when the server also offers a next URL.
    pub skip_retries: u32,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            max_run: Duration::from_secs(170),
            max_attempts: 3,
            render_attempts: 3,
            render_retry_pause: Duration::from_millis(500),
            exec_time_limit: Duration::from_secs(60),
            submit_reserve: Duration::from_secs(5),
            skip_retries: 1,
        }
    }
}

/// High-level application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub student_secret: String,
    pub openai: Option<OpenAIConfig>,
    pub ollama: Option<OllamaConfig>,
    /// `provider:model`, e.g. `openai:gpt-5.1` or `ollama:llama3`.
    pub plan_model: String,
    pub attach_screenshot: bool,
    pub browser_timeout: Duration,
    pub headless: bool,
    pub http_timeout: Duration,
    pub policy: LoopPolicy,
    pub sandbox: SandboxConfig,
    pub event_log: Option<PathBuf>,
    pub bind_addr: String,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let student_secret = get("STUDENT_SECRET")
            .ok_or_else(|| AgentError::Config("STUDENT_SECRET must be set".to_string()))?;

        let openai = get("OPENAI_API_KEY").map(|api_key| OpenAIConfig {
            api_base: get("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key,
        });
        let ollama = get("OLLAMA_API_BASE").map(|api_base| OllamaConfig { api_base });

        if openai.is_none() && ollama.is_none() {
            return Err(AgentError::Config(
                "No LLM providers configured. Please set either OPENAI_API_KEY or OLLAMA_API_BASE.".to_string(),
            ));
        }

        let default_model = if openai.is_some() { "openai:gpt-5.1" } else { "ollama:llama3" };
        let plan_model = get("PLAN_MODEL").unwrap_or_else(|| default_model.to_string());

        let defaults = LoopPolicy::default();
        let policy = LoopPolicy {
            max_run: Duration::from_secs(parse_or(&get, "MAX_RUN_SECONDS", 170)?),
            max_attempts: parse_or(&get, "MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            render_attempts: parse_or(&get, "RENDER_ATTEMPTS", defaults.render_attempts)?.max(1),
            render_retry_pause: defaults.render_retry_pause,
            exec_time_limit: Duration::from_secs(parse_or(&get, "SANDBOX_TIMEOUT_SECS", 60)?),
            submit_reserve: Duration::from_secs(parse_or(&get, "SUBMIT_RESERVE_SECS", 5)?),
            skip_retries: parse_or(&get, "SKIP_RETRIES", defaults.skip_retries)?,
        };

        let sandbox_defaults = SandboxConfig::default();
        let sandbox = SandboxConfig {
            interpreter: get("SANDBOX_INTERPRETER").unwrap_or(sandbox_defaults.interpreter),
            allow_network: parse_or(&get, "SANDBOX_ALLOW_NETWORK", false)?,
            memory_limit_bytes: get("SANDBOX_MEMORY_MB")
                .map(|v| parse_value::<u64>("SANDBOX_MEMORY_MB", &v))
                .transpose()?
                .map(|mb| mb * 1024 * 1024),
            output_limit: parse_or(&get, "SANDBOX_OUTPUT_LIMIT", sandbox_defaults.output_limit)?,
            ..sandbox_defaults
        };

        let event_log = match get("EVENT_LOG") {
            Some(v) if v.eq_ignore_ascii_case("off") => None,
            Some(v) => Some(PathBuf::from(v)),
            None => Some(PathBuf::from("logs/agent.log")),
        };

        Ok(AppConfig {
            student_secret,
            openai,
            ollama,
            plan_model,
            attach_screenshot: parse_or(&get, "PLAN_ATTACH_SCREENSHOT", false)?,
            browser_timeout: Duration::from_millis(parse_or(&get, "BROWSER_TIMEOUT_MS", 30_000)?),
            headless: parse_or(&get, "HEADLESS", true)?,
            http_timeout: Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECS", 60)?),
            policy,
            sandbox,
            event_log,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 8080)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| AgentError::Config(format!("{} has an invalid value: '{}'", key, raw)))
}
