//! Agent runner result and error types.
//!
//! The runner itself lives outside the engine; these are the shapes it
//! reports back. A runner that completes but reports `success: false` has
//! produced a task failure. A runner that returns a [`RunnerError`] has
//! raised an exception, which the engine classifies and may retry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of running one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    /// Short human-readable summary.
    pub summary: String,
    /// Full output (often JSON) when the runner produced any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResult {
    pub fn succeeded(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            raw_output: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            summary: format!("Failed: {error}"),
            raw_output: None,
            error: Some(error),
        }
    }

    /// Builder: attach raw output.
    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }
}

/// Errors raised by an agent runner or prompt builder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("runner timed out after {0}ms")]
    Timeout(u64),

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider error: {message}")]
    Provider {
        message: String,
        status: Option<u16>,
    },

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_carries_error() {
        let r = AgentResult::failed("compile error");
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("compile error"));
        assert!(r.summary.contains("compile error"));
    }

    #[test]
    fn test_agent_result_omits_empty_optionals() {
        let json = serde_json::to_value(AgentResult::succeeded("done")).unwrap();
        assert!(json.get("raw_output").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["summary"], "done");
    }

    #[test]
    fn test_runner_error_display() {
        let err = RunnerError::RateLimited {
            retry_after_ms: Some(500),
        };
        assert!(err.to_string().contains("500"));
        let err = RunnerError::Provider {
            message: "overloaded".into(),
            status: Some(529),
        };
        assert_eq!(err.to_string(), "provider error: overloaded");
    }
}
