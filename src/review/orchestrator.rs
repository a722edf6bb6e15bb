// SPDX-License-Identifier: MIT
//! One review attempt, end to end.
//!
//! Step order is fixed: session marked in_progress → PR/diff/files/languages
//! fetched → file contents fetched at the head sha → static analysis → AI
//! review validated and capped → result and comments persisted → comments
//! posted → check run created → session completed. Persistence strictly
//! precedes posting, so `posted_to_github = false` rows always identify
//! comments GitHub never confirmed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::ai::schema::cap_comments;
use crate::ai::{AiReviewer, ReviewInput};
use crate::analysis::AnalyzerRegistry;
use crate::error::ReviewError;
use crate::github::types::ReviewRequestComment;
use crate::github::{check_conclusion, GitHubClient};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::review::model::ReviewComment;
use crate::review::ReviewJob;
use crate::storage::{SessionResult, Storage};

pub struct Orchestrator {
    github: Arc<GitHubClient>,
    ai: Arc<AiReviewer>,
    analyzers: Arc<AnalyzerRegistry>,
    storage: Storage,
    max_comments: usize,
}

impl Orchestrator {
    pub fn new(
        github: Arc<GitHubClient>,
        ai: Arc<AiReviewer>,
        analyzers: Arc<AnalyzerRegistry>,
        storage: Storage,
        max_comments: usize,
    ) -> Self {
        Self {
            github,
            ai,
            analyzers,
            storage,
            max_comments,
        }
    }

    /// Run one attempt for `job` against an existing session row.
    pub async fn run_attempt(&self, job: &ReviewJob, session_id: &str) -> Result<(), ReviewError> {
        let start = Instant::now();
        self.storage.mark_in_progress(session_id).await?;

        let (owner, repo, pull_number, installation_id) =
            (&job.owner, &job.repo, job.pull_number, job.installation_id);

        info!(session_id, owner, repo, pull_number, "fetching pull request data");
        // These reads are idempotent, so transient upstream failures get a
        // quick in-attempt retry.
        let fetch = RetryConfig::transient_fetch();
        let pr = retry_with_backoff(&fetch, ReviewError::is_retryable, || {
            self.github.get_pull_request(installation_id, owner, repo, pull_number)
        })
        .await?;
        let diff = retry_with_backoff(&fetch, ReviewError::is_retryable, || {
            self.github.get_pull_request_diff(installation_id, owner, repo, pull_number)
        })
        .await?;
        let files = retry_with_backoff(&fetch, ReviewError::is_retryable, || {
            self.github.get_pull_request_files(installation_id, owner, repo, pull_number)
        })
        .await?;
        let languages = retry_with_backoff(&fetch, ReviewError::is_retryable, || {
            self.github.get_repository_languages(installation_id, owner, repo)
        })
        .await?;

        // Head-revision contents for added/modified files. A single file
        // failing to fetch (just-deleted, too large, submodule) is a warning,
        // not a pipeline error.
        let mut file_paths = Vec::new();
        let mut file_contents = HashMap::new();
        for file in &files {
            if file.status != "added" && file.status != "modified" {
                continue;
            }
            file_paths.push(file.filename.clone());
            match self
                .github
                .get_file_content(installation_id, owner, repo, &file.filename, &pr.head.sha)
                .await
            {
                Ok(content) => {
                    file_contents.insert(file.filename.clone(), content);
                }
                Err(e) => {
                    warn!(session_id, path = %file.filename, err = %e, "skipping unfetchable file");
                }
            }
        }

        info!(session_id, files = file_contents.len(), "running static analysis");
        let analysis = self.analyzers.analyze_files(&file_contents).await;
        let analysis_text = analysis.render();

        info!(session_id, "generating AI review");
        let (mut review, model) = self
            .ai
            .generate_review(&ReviewInput {
                file_paths: &file_paths,
                languages: &languages,
                analysis_summary: &analysis_text,
                diff: &diff,
                focus_area: job.focus_area.as_deref(),
            })
            .await?;
        cap_comments(&mut review, self.max_comments);

        let lines_added: i64 = files.iter().map(|f| f.additions).sum();
        let lines_removed: i64 = files.iter().map(|f| f.deletions).sum();

        info!(session_id, comments = review.inline_comments.len(), "persisting review");
        let comments = self
            .storage
            .save_review_result(
                session_id,
                &SessionResult {
                    review: &review,
                    ai_model: &model,
                    files_changed: &file_paths,
                    languages: &languages,
                    lines_added,
                    lines_removed,
                },
            )
            .await?;

        info!(session_id, "posting comments to GitHub");
        self.post_comments(job, &pr.head.sha, &comments, &review.summary, &review).await?;

        let conclusion = check_conclusion(review.risk.as_str());
        self.github
            .create_check_run(
                installation_id,
                owner,
                repo,
                &pr.head.sha,
                conclusion,
                &format!("AI Code Review - {} Risk", review.risk.as_str()),
                &review.summary,
            )
            .await?;

        let duration = start.elapsed().as_secs_f64();
        self.storage.finish_session(session_id, duration).await?;
        info!(session_id, duration_s = duration, conclusion, "review completed");
        Ok(())
    }

    /// One review per file with its inline comments grouped, then a summary
    /// review with no anchors. Each file's rows are flagged posted as soon as
    /// GitHub accepts that file's review.
    async fn post_comments(
        &self,
        job: &ReviewJob,
        head_sha: &str,
        comments: &[ReviewComment],
        summary: &str,
        review: &crate::ai::schema::AiReview,
    ) -> Result<(), ReviewError> {
        let mut by_file: HashMap<&str, Vec<&ReviewComment>> = HashMap::new();
        for c in comments {
            by_file.entry(c.file_path.as_str()).or_default().push(c);
        }
        let mut file_order: Vec<&str> = by_file.keys().copied().collect();
        file_order.sort_unstable();

        for path in file_order {
            let group = &by_file[path];
            let body = format!(
                "## AI Code Review - {path}\n\n{}",
                group
                    .iter()
                    .map(|c| format_comment(c))
                    .collect::<Vec<_>>()
                    .join("\n\n")
            );
            let inline = group
                .iter()
                .map(|c| ReviewRequestComment {
                    path: c.file_path.clone(),
                    line: c.end_line as u32,
                    start_line: (c.start_line < c.end_line).then_some(c.start_line as u32),
                    side: "RIGHT",
                    body: format_comment(c),
                })
                .collect();

            let posted = self
                .github
                .post_review(
                    job.installation_id,
                    &job.owner,
                    &job.repo,
                    job.pull_number,
                    head_sha,
                    &body,
                    inline,
                )
                .await?;

            for c in group.iter() {
                self.storage.mark_comment_posted(&c.id, Some(posted.id)).await?;
            }
        }

        let summary_body = format!(
            "## AI Code Review Summary\n\n{summary}\n\n\
             **Risk Level:** {}\n**Recommendation:** {}\n\n\
             *This review was generated by AI and should be used as a starting point for human review.*",
            review.risk.as_str(),
            review.approval_recommendation.as_str(),
        );
        self.github
            .post_review(
                job.installation_id,
                &job.owner,
                &job.repo,
                job.pull_number,
                head_sha,
                &summary_body,
                Vec::new(),
            )
            .await?;
        Ok(())
    }
}

fn format_comment(c: &ReviewComment) -> String {
    format!(
        "**{}** ({}): {}",
        c.severity.to_uppercase(),
        c.category,
        c.body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn comment(severity: &str, category: &str, body: &str) -> ReviewComment {
        ReviewComment {
            id: "c1".into(),
            session_id: "s1".into(),
            file_path: "src/a.py".into(),
            start_line: 3,
            end_line: 5,
            severity: severity.into(),
            category: category.into(),
            body: body.into(),
            github_comment_id: None,
            posted_to_github: false,
            created_at: Utc::now(),
            posted_at: None,
        }
    }

    #[test]
    fn comment_formatting_matches_posted_style() {
        let c = comment("high", "security", "Parameterize this query.");
        assert_eq!(
            format_comment(&c),
            "**HIGH** (security): Parameterize this query."
        );
    }
}
