//! SQLite persistence for review sessions, comments, and webhook deliveries.
//!
//! WAL-mode SQLite behind a sqlx pool, with embedded migrations. Status
//! transitions are enforced in SQL (`WHERE status IN (...)`) so concurrent
//! writers cannot reopen a completed session.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqliteConnectOptions, FromRow, SqlitePool};
use tracing::{info, warn};

use crate::ai::schema::AiReview;
use crate::error::ReviewError;
use crate::review::model::{ReviewComment, ReviewSession, SessionContext, SessionStatus};

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

// ─── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, FromRow)]
struct SessionRow {
    id: String,
    owner: String,
    repo: String,
    pull_number: i64,
    installation_id: i64,
    status: String,
    risk_level: Option<String>,
    approval_recommendation: Option<String>,
    breaking_changes: i64,
    files_changed: Option<String>,
    languages_detected: Option<String>,
    lines_added: i64,
    lines_removed: i64,
    ai_model_used: Option<String>,
    review_duration_seconds: Option<f64>,
    retry_count: i64,
    error_message: Option<String>,
    error_details: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    fn into_session(self) -> Result<ReviewSession> {
        let status = SessionStatus::parse(&self.status)
            .with_context(|| format!("unknown session status {:?}", self.status))?;
        Ok(ReviewSession {
            id: self.id,
            owner: self.owner,
            repo: self.repo,
            pull_number: self.pull_number,
            installation_id: self.installation_id,
            status,
            risk_level: self.risk_level,
            approval_recommendation: self.approval_recommendation,
            breaking_changes: self.breaking_changes != 0,
            files_changed: self.files_changed,
            languages_detected: self.languages_detected,
            lines_added: self.lines_added,
            lines_removed: self.lines_removed,
            ai_model_used: self.ai_model_used,
            review_duration_seconds: self.review_duration_seconds,
            retry_count: self.retry_count,
            error_message: self.error_message,
            error_details: self.error_details,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CommentRow {
    id: String,
    session_id: String,
    file_path: String,
    start_line: i64,
    end_line: i64,
    severity: String,
    category: String,
    body: String,
    github_comment_id: Option<i64>,
    posted_to_github: i64,
    created_at: DateTime<Utc>,
    posted_at: Option<DateTime<Utc>>,
}

impl CommentRow {
    fn into_comment(self) -> ReviewComment {
        ReviewComment {
            id: self.id,
            session_id: self.session_id,
            file_path: self.file_path,
            start_line: self.start_line,
            end_line: self.end_line,
            severity: self.severity,
            category: self.category,
            body: self.body,
            github_comment_id: self.github_comment_id,
            posted_to_github: self.posted_to_github != 0,
            created_at: self.created_at,
            posted_at: self.posted_at,
        }
    }
}

/// Fields written when a validated review is persisted. Grouped so the
/// update and the comment inserts share one transaction.
pub struct SessionResult<'a> {
    pub review: &'a AiReview,
    pub ai_model: &'a str,
    pub files_changed: &'a [String],
    pub languages: &'a std::collections::HashMap<String, i64>,
    pub lines_added: i64,
    pub lines_removed: i64,
}

#[derive(Debug, serde::Serialize)]
pub struct ReviewStats {
    pub total_sessions: i64,
    pub completed: i64,
    pub failed: i64,
    pub success_rate: f64,
    pub reviews_today: i64,
}

// ─── Storage ──────────────────────────────────────────────────────────────────

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("revd.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        info!(path = %db_path.display(), "database opened");
        Ok(Self { pool })
    }

    /// In-memory database for tests. Pinned to one connection — each
    /// `:memory:` connection is otherwise its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("src/storage/migrations")
            .run(pool)
            .await
            .context("failed to run database migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    // ─── Sessions ─────────────────────────────────────────────────────────

    pub async fn create_session(
        &self,
        owner: &str,
        repo: &str,
        pull_number: u64,
        installation_id: i64,
        context: &SessionContext,
    ) -> Result<ReviewSession, ReviewError> {
        let id = uuid::Uuid::new_v4().to_string();
        let details = serde_json::to_string(context)
            .map_err(|e| ReviewError::Validation(format!("context serialization: {e}")))?;
        sqlx::query(
            "INSERT INTO review_sessions (id, owner, repo, pull_number, installation_id, status, error_details) \
             VALUES (?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(&id)
        .bind(owner)
        .bind(repo)
        .bind(pull_number as i64)
        .bind(installation_id)
        .bind(&details)
        .execute(&self.pool)
        .await?;
        self.get_session(&id).await
    }

    pub async fn get_session(&self, id: &str) -> Result<ReviewSession, ReviewError> {
        let row: SessionRow = sqlx::query_as("SELECT * FROM review_sessions WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        row.into_session()
            .map_err(|e| ReviewError::Validation(e.to_string()))
    }

    pub async fn latest_session_for_pr(
        &self,
        owner: &str,
        repo: &str,
        pull_number: u64,
    ) -> Result<Option<ReviewSession>, ReviewError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT * FROM review_sessions WHERE owner = ? AND repo = ? AND pull_number = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(owner)
        .bind(repo)
        .bind(pull_number as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_session().map_err(|e| ReviewError::Validation(e.to_string())))
            .transpose()
    }

    /// Move a session to `in_progress`, from `pending` (first attempt) or
    /// `failed` (retry). Completed sessions never reopen.
    pub async fn mark_in_progress(&self, id: &str) -> Result<(), ReviewError> {
        let result = sqlx::query(
            "UPDATE review_sessions \
             SET status = 'in_progress', started_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), \
                 error_message = NULL \
             WHERE id = ? AND status IN ('pending', 'failed')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ReviewError::Validation(format!(
                "session {id} is not in a startable state"
            )));
        }
        Ok(())
    }

    /// Persist a validated review: result fields plus all comment rows, in
    /// one transaction. The session stays `in_progress` until posting is done
    /// and [`Storage::finish_session`] closes it.
    pub async fn save_review_result(
        &self,
        id: &str,
        result: &SessionResult<'_>,
    ) -> Result<Vec<ReviewComment>, ReviewError> {
        let files = serde_json::to_string(result.files_changed)
            .map_err(|e| ReviewError::Validation(format!("files serialization: {e}")))?;
        let languages = serde_json::to_string(result.languages)
            .map_err(|e| ReviewError::Validation(format!("languages serialization: {e}")))?;
        let comments = ReviewComment::from_review(id, result.review);

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE review_sessions \
             SET risk_level = ?, approval_recommendation = ?, breaking_changes = ?, \
                 files_changed = ?, languages_detected = ?, \
                 lines_added = ?, lines_removed = ?, \
                 ai_model_used = ? \
             WHERE id = ? AND status = 'in_progress'",
        )
        .bind(result.review.risk.as_str())
        .bind(result.review.approval_recommendation.as_str())
        .bind(result.review.breaking_changes as i64)
        .bind(&files)
        .bind(&languages)
        .bind(result.lines_added)
        .bind(result.lines_removed)
        .bind(result.ai_model)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(ReviewError::Validation(format!(
                "session {id} is not in progress; refusing to save a result"
            )));
        }

        // A retry may have persisted comments on an earlier attempt that
        // never got posted; replace them with this attempt's set.
        sqlx::query("DELETE FROM review_comments WHERE session_id = ? AND posted_to_github = 0")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for c in &comments {
            sqlx::query(
                "INSERT INTO review_comments \
                 (id, session_id, file_path, start_line, end_line, severity, category, body) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&c.id)
            .bind(&c.session_id)
            .bind(&c.file_path)
            .bind(c.start_line)
            .bind(c.end_line)
            .bind(&c.severity)
            .bind(&c.category)
            .bind(&c.body)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(comments)
    }

    /// Close a session as completed, recording the attempt duration.
    pub async fn finish_session(&self, id: &str, duration_seconds: f64) -> Result<(), ReviewError> {
        let result = sqlx::query(
            "UPDATE review_sessions \
             SET status = 'completed', review_duration_seconds = ?, \
                 completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
             WHERE id = ? AND status = 'in_progress'",
        )
        .bind(duration_seconds)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ReviewError::Validation(format!(
                "session {id} is not in progress; refusing to complete"
            )));
        }
        Ok(())
    }

    pub async fn fail_session(
        &self,
        id: &str,
        error_message: &str,
        error_details: Option<&serde_json::Value>,
    ) -> Result<(), ReviewError> {
        let details = error_details.map(|d| d.to_string());
        let result = sqlx::query(
            "UPDATE review_sessions \
             SET status = 'failed', error_message = ?, \
                 error_details = COALESCE(?, error_details), \
                 completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
             WHERE id = ? AND status = 'in_progress'",
        )
        .bind(error_message)
        .bind(details)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            warn!(session_id = id, "fail_session on a session not in progress");
        }
        Ok(())
    }

    pub async fn increment_retry(&self, id: &str) -> Result<(), ReviewError> {
        sqlx::query("UPDATE review_sessions SET retry_count = retry_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reaper: mark sessions stuck `in_progress` longer than `older_than` as
    /// failed. Covers worker crashes between start and terminal write.
    pub async fn fail_stale_sessions(&self, older_than: Duration) -> Result<u64, ReviewError> {
        let cutoff = Utc::now() - older_than;
        let result = sqlx::query(
            "UPDATE review_sessions \
             SET status = 'failed', error_message = 'review timed out', \
                 completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
             WHERE status = 'in_progress' AND started_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        let n = result.rows_affected();
        if n > 0 {
            warn!(count = n, "marked stale in_progress sessions as failed");
        }
        Ok(n)
    }

    /// Retention cleanup: delete terminal sessions older than the cutoff.
    /// Comments go with them via ON DELETE CASCADE.
    pub async fn cleanup_old_sessions(&self, retention_days: u32) -> Result<u64, ReviewError> {
        if retention_days == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let result = sqlx::query(
            "DELETE FROM review_sessions \
             WHERE status IN ('completed', 'failed') AND created_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ─── Comments ─────────────────────────────────────────────────────────

    pub async fn comments_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<ReviewComment>, ReviewError> {
        let rows: Vec<CommentRow> = sqlx::query_as(
            "SELECT * FROM review_comments WHERE session_id = ? ORDER BY file_path, start_line",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CommentRow::into_comment).collect())
    }

    pub async fn mark_comment_posted(
        &self,
        comment_id: &str,
        github_comment_id: Option<i64>,
    ) -> Result<(), ReviewError> {
        sqlx::query(
            "UPDATE review_comments \
             SET posted_to_github = 1, github_comment_id = ?, \
                 posted_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
             WHERE id = ?",
        )
        .bind(github_comment_id)
        .bind(comment_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ─── Webhook events ───────────────────────────────────────────────────

    /// Log an accepted delivery. Returns false when the delivery id was seen
    /// before (GitHub redelivery), in which case no new job should start.
    pub async fn record_webhook_event(
        &self,
        event_type: &str,
        action: &str,
        delivery_id: &str,
        owner: &str,
        repo: &str,
        pull_number: u64,
    ) -> Result<bool, ReviewError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO webhook_events \
             (id, event_type, action, delivery_id, owner, repo, pull_number) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(event_type)
        .bind(action)
        .bind(delivery_id)
        .bind(owner)
        .bind(repo)
        .bind(pull_number as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_event_processed(&self, delivery_id: &str) -> Result<(), ReviewError> {
        sqlx::query("UPDATE webhook_events SET processed = 1 WHERE delivery_id = ?")
            .bind(delivery_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ─── Stats ────────────────────────────────────────────────────────────

    pub async fn stats(&self) -> Result<ReviewStats, ReviewError> {
        let (total, completed, failed, today): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), \
                    COALESCE(SUM(status = 'completed'), 0), \
                    COALESCE(SUM(status = 'failed'), 0), \
                    COALESCE(SUM(date(created_at) = date('now')), 0) \
             FROM review_sessions",
        )
        .fetch_one(&self.pool)
        .await?;

        let success_rate = if total > 0 {
            completed as f64 / total as f64
        } else {
            0.0
        };
        Ok(ReviewStats {
            total_sessions: total,
            completed,
            failed,
            success_rate,
            reviews_today: today,
        })
    }

    /// Liveness probe for /health.
    pub async fn test_connection(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
