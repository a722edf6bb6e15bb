// SPDX-License-Identifier: MIT
//! Persistent review entities: sessions and their comments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ai::schema::{AiReview, InlineComment};

// ─── SessionStatus ────────────────────────────────────────────────────────────

/// Lifecycle of a review session:
/// `pending → in_progress → {completed | failed}`, with `failed →
/// in_progress` as the retry path. `completed` never reopens; a retry
/// revises the result fields of the same row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// Whether `self → next` is a legal move. `failed → in_progress` is the
    /// retry path: the worker revises the same row on its next attempt.
    /// `completed` never reopens.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Pending, SessionStatus::InProgress)
                | (SessionStatus::InProgress, SessionStatus::Completed)
                | (SessionStatus::InProgress, SessionStatus::Failed)
                | (SessionStatus::Failed, SessionStatus::InProgress)
        )
    }
}

// ─── ReviewSession ────────────────────────────────────────────────────────────

/// One review of one pull request head. Created when the job is accepted,
/// revised across retry attempts, closed exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewSession {
    /// UUID v4.
    pub id: String,
    pub owner: String,
    pub repo: String,
    pub pull_number: i64,
    pub installation_id: i64,
    pub status: SessionStatus,
    /// Set on completion, from the validated AI review.
    pub risk_level: Option<String>,
    pub approval_recommendation: Option<String>,
    pub breaking_changes: bool,
    /// JSON array of changed paths.
    pub files_changed: Option<String>,
    /// JSON object of language byte counts.
    pub languages_detected: Option<String>,
    pub lines_added: i64,
    pub lines_removed: i64,
    pub ai_model_used: Option<String>,
    pub review_duration_seconds: Option<f64>,
    pub retry_count: i64,
    pub error_message: Option<String>,
    /// JSON blob: triggering action, focus area, attempt details.
    pub error_details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ─── ReviewComment ────────────────────────────────────────────────────────────

/// One inline comment, persisted before any attempt to post it.
/// `posted_to_github` flips exactly once, after GitHub accepts the post.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewComment {
    pub id: String,
    pub session_id: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub severity: String,
    pub category: String,
    pub body: String,
    pub github_comment_id: Option<i64>,
    pub posted_to_github: bool,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
}

impl ReviewComment {
    /// Build the comment rows for a validated review.
    pub fn from_review(session_id: &str, review: &AiReview) -> Vec<Self> {
        review
            .inline_comments
            .iter()
            .map(|c| Self::from_inline(session_id, c))
            .collect()
    }

    fn from_inline(session_id: &str, c: &InlineComment) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            file_path: c.path.clone(),
            start_line: c.start_line as i64,
            end_line: c.end_line as i64,
            severity: c.severity.as_str().to_string(),
            category: c.category.as_str().to_string(),
            body: c.comment.clone(),
            github_comment_id: None,
            posted_to_github: false,
            created_at: Utc::now(),
            posted_at: None,
        }
    }
}

/// Details recorded alongside a session for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    /// Webhook action or "manual_trigger".
    pub trigger_action: String,
    pub focus_area: Option<String>,
    pub attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::schema;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SessionStatus::Pending,
            SessionStatus::InProgress,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("cancelled"), None);
    }

    #[test]
    fn transitions_are_monotonic_except_retry() {
        use SessionStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        // The retry path reuses the row.
        assert!(Failed.can_transition_to(InProgress));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn terminal_states() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(!SessionStatus::InProgress.is_terminal());
    }

    #[test]
    fn comments_inherit_review_fields() {
        let review = schema::parse_review(
            r#"{
                "inline_comments": [
                    {"path": "a.py", "start_line": 1, "end_line": 2,
                     "severity": "medium", "category": "bug", "comment": "check this"}
                ],
                "summary": "ok", "risk": "Low", "breaking_changes": false,
                "approval_recommendation": "comment"
            }"#,
        )
        .unwrap();
        let comments = ReviewComment::from_review("session-1", &review);
        assert_eq!(comments.len(), 1);
        let c = &comments[0];
        assert_eq!(c.session_id, "session-1");
        assert_eq!(c.severity, "medium");
        assert_eq!((c.start_line, c.end_line), (1, 2));
        assert!(!c.posted_to_github);
        assert!(c.github_comment_id.is_none());
    }
}
