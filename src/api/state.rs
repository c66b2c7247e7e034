// src/api/state.rs
use crate::config::AppConfig;
use crate::errors::Result;
use crate::events::EventLog;
use crate::planner::LlmPlanner;
use crate::renderer::EokaRenderer;
use crate::runner::SolveLoop;
use crate::sandbox::Sandbox;
use crate::submit::HttpSubmitter;
use reqwest::Client;
use std::sync::Arc;

/// The production wiring of the solve loop.
pub type QuizSolver = SolveLoop<EokaRenderer, LlmPlanner, Sandbox, HttpSubmitter>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub client: Client,
    pub events: Arc<EventLog>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        let events = Arc::new(EventLog::new(config.event_log.clone()));
        Ok(Self {
            config: Arc::new(config),
            client,
            events,
        })
    }

    /// Builds an independent solver for one run; sessions share only read-only config.
    pub fn solver(&self) -> QuizSolver {
        let config = &self.config;
        SolveLoop::new(
            EokaRenderer::new(config.browser_timeout, config.headless, config.attach_screenshot),
            LlmPlanner::new(Arc::clone(config), self.client.clone()),
            Sandbox::new(config.sandbox.clone()),
            HttpSubmitter::new(self.client.clone(), Arc::clone(&self.events)),
            config.policy.clone(),
            config.student_secret.clone(),
        )
        .with_events(Arc::clone(&self.events))
    }
}
