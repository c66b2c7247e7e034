// src/runner.rs
//! The solve loop: render a quiz page, plan code, run it, submit the answer and follow
//! the server's verdict to the next page until the chain ends or the session deadline passes.
//!
//! Only two faults escape `SolveLoop::run`: `RenderUnavailable` and `SandboxFault`.
//! Everything else is folded into the per-URL retry budget.

use log::{debug, info, warn};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Duration;
use url::Url;

use crate::config::LoopPolicy;
use crate::errors::{AgentError, Result};
use crate::events::EventLog;
use crate::models::{
    Answer, AttemptResult, LoopResult, PageContext, QuizSession, RenderedPage, SubmissionOutcome,
    SubmissionRequest,
};
use crate::normalizer::normalize;
use crate::planner::{PlanRequest, PlanService};
use crate::policy::{RetryThenSkip, SkipDecision, SkipPolicy, SkipState};
use crate::renderer::PageRenderer;
use crate::resolver::SubmissionResolver;
use crate::sandbox::CodeRunner;
use crate::submit::Submitter;

/// States of one page attempt. `Ingest` happens before a `PageContext` exists.
#[derive(Debug)]
enum Step {
    Plan,
    Execute(String),
    Normalize(AttemptResult),
    Submit(Answer),
    Evaluate(SubmissionOutcome),
}

/// How work on a single URL ended.
#[derive(Debug)]
enum PageOutcome {
    Advance { next: String, pause: Option<Duration> },
    Completed,
    Exhausted,
    TimedOut,
}

enum Transition {
    Continue(Step),
    Finish(PageOutcome),
}

pub struct SolveLoop<R, P, X, S> {
    renderer: R,
    planner: P,
    runner: X,
    submitter: S,
    resolver: SubmissionResolver,
    skip_policy: Box<dyn SkipPolicy>,
    policy: LoopPolicy,
    secret: String,
    events: Arc<EventLog>,
}

impl<R, P, X, S> SolveLoop<R, P, X, S>
where
    R: PageRenderer,
    P: PlanService,
    X: CodeRunner,
    S: Submitter,
{
    pub fn new(
        renderer: R,
        planner: P,
        runner: X,
        submitter: S,
        policy: LoopPolicy,
        secret: impl Into<String>,
    ) -> Self {
        let skip_policy = Box::new(RetryThenSkip { retries: policy.skip_retries });
        Self {
            renderer,
            planner,
            runner,
            submitter,
            resolver: SubmissionResolver::default(),
            skip_policy,
            policy,
            secret: secret.into(),
            events: Arc::new(EventLog::disabled()),
        }
    }

    pub fn with_skip_policy(mut self, skip_policy: impl SkipPolicy + 'static) -> Self {
        self.skip_policy = Box::new(skip_policy);
        self
    }

    pub fn with_resolver(mut self, resolver: SubmissionResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_events(mut self, events: Arc<EventLog>) -> Self {
        self.events = events;
        self
    }

    /// Runs the whole chain for one session.
    pub async fn run(&self, session: &QuizSession) -> Result<LoopResult> {
        info!("🚀 Run {} starting at {}", session.run_id, session.initial_url);
        self.events
            .record(
                session.run_id,
                "RUN_START",
                json!({ "url": session.initial_url, "email": session.email }),
            )
            .await;

        let result = self.drive(session).await;

        match &result {
            Ok(outcome) => {
                info!("🏁 Run {} finished: {}", session.run_id, outcome.detail());
                self.events
                    .record(session.run_id, "RUN_END", json!({ "detail": outcome.detail() }))
                    .await;
            }
            Err(e) => {
                warn!("❌ Run {} aborted: {}", session.run_id, e);
                self.events
                    .record(session.run_id, "RUN_ABORTED", json!({ "error": e.to_string() }))
                    .await;
            }
        }
        result
    }

    async fn drive(&self, session: &QuizSession) -> Result<LoopResult> {
        let mut url = session.initial_url.clone();
        let mut pages = 0;

        loop {
            if session.expired() {
                return Ok(LoopResult::TimedOut { url });
            }

            let Some(page) = self.ingest(session, &url).await? else {
                return Ok(LoopResult::TimedOut { url });
            };
            pages += 1;

            // A new context per URL: error history and counters start empty.
            let mut ctx = PageContext::new(url.clone(), page);
            match self.solve_page(session, &mut ctx).await? {
                PageOutcome::Advance { next, pause } => {
                    url = resolve_next(&ctx.url, &next);
                    info!("➡️  Moving from {} to {}", ctx.url, url);
                    if let Some(pause) = pause {
                        let pause = pause.min(session.remaining());
                        debug!("Server asked for a {:?} pause", pause);
                        tokio::time::sleep(pause).await;
                    }
                }
                PageOutcome::Completed => return Ok(LoopResult::Completed { pages }),
                PageOutcome::Exhausted => {
                    return Ok(LoopResult::FailedWithinAttempts {
                        url: ctx.url,
                        errors: ctx.errors,
                    });
                }
                PageOutcome::TimedOut => return Ok(LoopResult::TimedOut { url: ctx.url }),
            }
        }
    }

    /// Renders `url`, retrying a few times. `None` means the deadline passed first.
    async fn ingest(&self, session: &QuizSession, url: &str) -> Result<Option<RenderedPage>> {
        let attempts = self.policy.render_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if session.expired() {
                return Ok(None);
            }
            match self.renderer.render(url).await {
                Ok(page) => {
                    self.events.record(
                        session.run_id,
                        "PAGE_RENDERED",
                        json!({
                            "url": url,
                            "text_chars": page.text.chars().count(),
                            "resources": page.resources,
                            "screenshot": page.screenshot.is_some(),
                        }),
                    ).await;
                    return Ok(Some(page));
                }
                Err(e) => {
                    warn!("Render attempt {}/{} for {} failed: {}", attempt, attempts, url, e);
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.render_retry_pause.min(session.remaining())).await;
                    }
                }
            }
        }

        Err(AgentError::RenderUnavailable {
            url: url.to_string(),
            attempts,
            reason: last_error,
        })
    }

    async fn solve_page(&self, session: &QuizSession, ctx: &mut PageContext) -> Result<PageOutcome> {
        let mut step = Step::Plan;

        loop {
            if session.expired() {
                info!("⏱️  Deadline reached on {} before {:?}", ctx.url, step_name(&step));
                return Ok(PageOutcome::TimedOut);
            }

            let transition = match step {
                Step::Plan => self.plan(session, ctx).await,
                Step::Execute(code) => self.execute(session, ctx, code).await?,
                Step::Normalize(result) => match normalize(&result) {
                    Ok(answer) => Transition::Continue(Step::Submit(answer)),
                    Err(e) => self.fail_attempt(session, ctx, format!("execution failed: {}", e)).await,
                },
                Step::Submit(answer) => self.submit(session, ctx, answer).await,
                Step::Evaluate(outcome) => self.evaluate(session, ctx, outcome).await,
            };

            step = match transition {
                Transition::Continue(next) => next,
                Transition::Finish(outcome) => return Ok(outcome),
            };
        }
    }

    async fn plan(&self, session: &QuizSession, ctx: &mut PageContext) -> Transition {
        let request = PlanRequest {
            url: &ctx.url,
            page: &ctx.page,
            errors: &ctx.errors,
        };
        match self.planner.plan(&request).await {
            Ok(code) => {
                self.events.record(
                    session.run_id,
                    "CODE_GENERATED",
                    json!({ "url": ctx.url, "attempt": ctx.attempts + 1, "code": code }),
                ).await;
                Transition::Continue(Step::Execute(code))
            }
            Err(e) => self.fail_attempt(session, ctx, format!("plan failed: {}", e)).await,
        }
    }

    async fn execute(
        &self,
        session: &QuizSession,
        ctx: &mut PageContext,
        code: String,
    ) -> Result<Transition> {
        let Some(limit) = self.exec_limit(session) else {
            info!("⏱️  Not enough budget left to run code for {}", ctx.url);
            return Ok(Transition::Finish(PageOutcome::TimedOut));
        };

        let result = self.runner.run(&code, limit).await?;
        self.events.record(
            session.run_id,
            "EXECUTION",
            json!({
                "url": ctx.url,
                "status": result.status.to_string(),
                "stdout": result.stdout,
                "stderr": result.stderr,
            }),
        ).await;

        if result.status.success() {
            Ok(Transition::Continue(Step::Normalize(result)))
        } else {
            let reason = format!("execution failed: {}", result.failure_summary());
            Ok(self.fail_attempt(session, ctx, reason).await)
        }
    }

    async fn submit(&self, session: &QuizSession, ctx: &mut PageContext, answer: Answer) -> Transition {
        // Always the text of the page currently being solved, never an earlier one.
        let target = match self.resolver.resolve(&ctx.page.text, &ctx.url) {
            Ok(target) => target,
            Err(e) => {
                return self.fail_attempt(session, ctx, format!("submission failed: {}", e)).await;
            }
        };

        let request = SubmissionRequest {
            email: session.email.clone(),
            secret: self.secret.clone(),
            url: ctx.url.clone(),
            answer,
        };
        match self.submitter.submit(session.run_id, &target, &request).await {
            Ok(outcome) => Transition::Continue(Step::Evaluate(outcome)),
            Err(e) => self.fail_attempt(session, ctx, format!("submission failed: {}", e)).await,
        }
    }

    async fn evaluate(
        &self,
        session: &QuizSession,
        ctx: &mut PageContext,
        outcome: SubmissionOutcome,
    ) -> Transition {
        let pause = outcome.pacing();
        let reason = outcome
            .reason
            .unwrap_or_else(|| "Incorrect answer".to_string());

        match (outcome.correct, outcome.next_url) {
            (true, Some(next)) => {
                info!("✅ Correct on {}", ctx.url);
                Transition::Finish(PageOutcome::Advance { next, pause })
            }
            (true, None) => {
                info!("✅ Correct on {}, no further pages", ctx.url);
                Transition::Finish(PageOutcome::Completed)
            }
            (false, None) => self.fail_attempt(session, ctx, reason).await,
            (false, Some(next)) => {
                let attempts = self.record_failure(session, ctx, reason).await;
                let state = SkipState {
                    attempts,
                    max_attempts: self.policy.max_attempts,
                    skip_retries: ctx.skip_retries,
                };
                match self.skip_policy.decide(&state) {
                    SkipDecision::Retry if attempts < self.policy.max_attempts => {
                        ctx.skip_retries += 1;
                        info!("🔁 Retrying {} although {} is offered", ctx.url, next);
                        Transition::Continue(Step::Plan)
                    }
                    _ => {
                        info!("⏭️  Skipping {} after {} attempts", ctx.url, attempts);
                        Transition::Finish(PageOutcome::Advance { next, pause })
                    }
                }
            }
        }
    }

    /// Consumes one attempt; retries the same URL while attempts remain.
    async fn fail_attempt(&self, session: &QuizSession, ctx: &mut PageContext, reason: String) -> Transition {
        let attempts = self.record_failure(session, ctx, reason).await;
        if attempts < self.policy.max_attempts {
            Transition::Continue(Step::Plan)
        } else {
            Transition::Finish(PageOutcome::Exhausted)
        }
    }

    async fn record_failure(&self, session: &QuizSession, ctx: &mut PageContext, reason: String) -> u32 {
        warn!("❌ Attempt {} on {} failed: {}", ctx.attempts + 1, ctx.url, reason);
        self.events.record(
            session.run_id,
            "ATTEMPT_FAILED",
            json!({ "url": ctx.url, "attempt": ctx.attempts + 1, "reason": reason }),
        ).await;
        ctx.record_failure(reason)
    }

    /// Time the sandbox may use: the configured limit, but always leaving room to submit.
    fn exec_limit(&self, session: &QuizSession) -> Option<Duration> {
        let available = session.remaining().saturating_sub(self.policy.submit_reserve);
        let limit = self.policy.exec_time_limit.min(available);
        (!limit.is_zero()).then_some(limit)
    }
}

fn step_name(step: &Step) -> &'static str {
    match step {
        Step::Plan => "plan",
        Step::Execute(_) => "execute",
        Step::Normalize(_) => "normalize",
        Step::Submit(_) => "submit",
        Step::Evaluate(_) => "evaluate",
    }
}

/// Next-page URLs may be relative to the page that produced them.
fn resolve_next(current: &str, next: &str) -> String {
    Url::parse(current)
        .and_then(|base| base.join(next.trim()))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| next.to_string())
}
