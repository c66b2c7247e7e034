// src/normalizer.rs
use crate::errors::{AgentError, Result};
use crate::models::{Answer, AttemptResult};

/// Turns captured stdout into the submitted answer.
///
/// Only surrounding whitespace is removed. Numeric-looking output stays text so
/// formatting such as fixed decimal places reaches the server unchanged.
pub fn normalize(result: &AttemptResult) -> Result<Answer> {
    let trimmed = result.stdout.trim();
    if trimmed.is_empty() {
        return Err(AgentError::EmptyAnswer);
    }
    Ok(Answer(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitStatus;

    fn attempt(stdout: &str) -> AttemptResult {
        AttemptResult {
            code: "print(1)".to_string(),
            stdout: stdout.to_string(),
            stderr: String::new(),
            status: ExitStatus::Exited(0),
        }
    }

    #[test]
    fn trims_and_keeps_formatting() {
        let answer = normalize(&attempt("  12.50\n")).unwrap();
        assert_eq!(answer.as_str(), "12.50");
    }

    #[test]
    fn keeps_inner_lines() {
        let answer = normalize(&attempt("\nline one\nline two\n\n")).unwrap();
        assert_eq!(answer.as_str(), "line one\nline two");
    }

    #[test]
    fn whitespace_only_is_empty_answer() {
        assert!(matches!(normalize(&attempt(" \n\t ")), Err(AgentError::EmptyAnswer)));
    }

    #[test]
    fn is_idempotent() {
        let result = attempt("  0042 ");
        assert_eq!(normalize(&result).unwrap(), normalize(&result).unwrap());
    }
}
