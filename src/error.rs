// SPDX-License-Identifier: MIT
//! Error taxonomy for the review pipeline.
//!
//! Four classes of failure, with different retry semantics:
//! - [`ReviewError::Authentication`] — never retried (bad credentials stay bad).
//! - [`ReviewError::Validation`] / [`ReviewError::AiValidation`] — fatal to the
//!   current attempt, but retryable at the task level (a regenerated response
//!   may validate).
//! - [`ReviewError::GitHubApi`] / [`ReviewError::ExternalService`] /
//!   [`ReviewError::Database`] — transient, retried with backoff.
//! - [`ReviewError::ToolUnavailable`] — degrades a single analyzer tool; the
//!   aggregator folds it into the result and never propagates it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    /// Bad webhook signature or bad App credentials. Terminal.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Malformed webhook payload or missing required fields.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The AI response failed the schema contract.
    #[error("AI response validation failed: {0}")]
    AiValidation(String),

    /// GitHub returned a status outside the expected set for an operation.
    #[error("GitHub API error (status {status}): {body}")]
    GitHubApi { status: u16, body: String },

    /// Network failure, timeout, or an AI API failure.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// An analyzer binary is missing or unusable. Non-fatal to the pipeline.
    #[error("analysis tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ReviewError {
    /// Whether the worker may reschedule the task after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReviewError::Authentication(_) => false,
            ReviewError::Validation(_) => true,
            ReviewError::AiValidation(_) => true,
            ReviewError::GitHubApi { .. } => true,
            ReviewError::ExternalService(_) => true,
            // Never reaches the worker — the aggregator absorbs it.
            ReviewError::ToolUnavailable(_) => false,
            ReviewError::Database(_) => true,
        }
    }
}

impl From<reqwest::Error> for ReviewError {
    fn from(e: reqwest::Error) -> Self {
        ReviewError::ExternalService(e.to_string())
    }
}

pub type Result<T, E = ReviewError> = std::result::Result<T, E>;
