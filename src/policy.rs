// src/policy.rs
//! What to do when the server rejects an answer but also offers the next page.
//!
//! Staying buys correctness on the current item, moving on saves budget for the
//! rest of the chain. The loop asks a `SkipPolicy` instead of deciding itself.

/// State of the current URL at the moment a skip is offered.
/// `attempts` already includes the rejected attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipState {
    pub attempts: u32,
    pub max_attempts: u32,
    pub skip_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    Retry,
    Skip,
}

pub trait SkipPolicy: Send + Sync {
    fn decide(&self, state: &SkipState) -> SkipDecision;
}

/// Retries the current URL up to `retries` times over its lifetime, then takes the offered URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryThenSkip {
    pub retries: u32,
}

impl Default for RetryThenSkip {
    fn default() -> Self {
        Self { retries: 1 }
    }
}

impl SkipPolicy for RetryThenSkip {
    fn decide(&self, state: &SkipState) -> SkipDecision {
        if state.skip_retries < self.retries && state.attempts < state.max_attempts {
            SkipDecision::Retry
        } else {
            SkipDecision::Skip
        }
    }
}
