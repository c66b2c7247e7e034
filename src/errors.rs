// src/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("API request failed with status {status}: {body}")]
    ApiError { status: u16, body: String },

    #[error("API returned an error: {0}")]
    ApiResponse(String),

    #[error("Unexpected response structure: {0}")]
    UnexpectedResponse(String),

    #[error("Received empty text response from model")]
    EmptyResponse,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider '{0}' not found")]
    ProviderNotFound(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Page '{url}' could not be rendered after {attempts} attempts: {reason}")]
    RenderUnavailable {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("No submission target found: {0}")]
    NoTargetFound(String),

    #[error("Sandbox could not start: {0}")]
    SandboxFault(String),

    #[error("Program produced no answer on stdout")]
    EmptyAnswer,

    #[error("Submission endpoint unreachable: {0}")]
    SubmissionUnreachable(String),
}

impl AgentError {
    /// Faults that abort a whole run instead of consuming one attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::RenderUnavailable { .. } | AgentError::SandboxFault(_)
        )
    }
}

impl From<eoka::Error> for AgentError {
    fn from(err: eoka::Error) -> Self {
        AgentError::Browser(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
