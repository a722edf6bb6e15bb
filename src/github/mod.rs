// SPDX-License-Identifier: MIT
//! GitHub REST client for the review pipeline.
//!
//! Every operation resolves an installation token (cached in [`auth::TokenCache`]),
//! runs one HTTP call with an explicit timeout, and maps any status outside
//! the operation's expected set to [`ReviewError::GitHubApi`]. Retry policy
//! lives with the caller, not here.

pub mod auth;
pub mod types;

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::ReviewError;
use auth::TokenCache;
use types::{
    CheckRun, CheckRunOutput, CheckRunRequest, CommitDetails, FileContent, InstallationInfo,
    InstallationTokenResponse, PostedReview, PrFile, PullRequest, ReviewRequest,
    ReviewRequestComment,
};

const API_VERSION: &str = "2022-11-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Raw diffs for large PRs can be slow to stream.
const DIFF_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    app_id: String,
    private_key_pem: String,
    cache: TokenCache,
}

impl GitHubClient {
    pub fn new(config: &AppConfig) -> Result<Self, ReviewError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ReviewError::ExternalService(format!("http client init: {e}")))?;
        Ok(Self {
            http,
            api_url: config.github_api_url.trim_end_matches('/').to_string(),
            app_id: config.github_app_id.clone(),
            private_key_pem: config.github_private_key.clone(),
            cache: TokenCache::new(),
        })
    }

    fn base_headers(token: &str) -> Result<HeaderMap, ReviewError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("revd"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        let auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ReviewError::Authentication(format!("bad token bytes: {e}")))?;
        headers.insert(AUTHORIZATION, auth);
        Ok(headers)
    }

    /// Resolve an installation access token, preferring the cache.
    async fn installation_token(&self, installation_id: i64) -> Result<String, ReviewError> {
        if let Some(token) = self.cache.get(installation_id).await {
            return Ok(token);
        }

        let jwt = auth::mint_app_jwt(&self.app_id, &self.private_key_pem)?;
        let url = format!("{}/app/installations/{installation_id}/access_tokens", self.api_url);
        let resp = self
            .http
            .post(&url)
            .headers(Self::base_headers(&jwt)?)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        let token: InstallationTokenResponse = resp.json().await?;
        debug!(installation_id, "exchanged App JWT for installation token");
        self.cache.put(installation_id, &token).await;
        Ok(token.token)
    }

    /// Find the App installation for a repository. `Ok(None)` means the App
    /// is not installed there.
    pub async fn get_installation_id(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Option<i64>, ReviewError> {
        let jwt = auth::mint_app_jwt(&self.app_id, &self.private_key_pem)?;
        let url = format!("{}/repos/{owner}/{repo}/installation", self.api_url);
        let resp = self
            .http
            .get(&url)
            .headers(Self::base_headers(&jwt)?)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        let installation: InstallationInfo = resp.json().await?;
        Ok(Some(installation.id))
    }

    // ─── Pull request reads ───────────────────────────────────────────────────

    pub async fn get_pull_request(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        pull_number: u64,
    ) -> Result<PullRequest, ReviewError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!("{}/repos/{owner}/{repo}/pulls/{pull_number}", self.api_url);
        let resp = self
            .http
            .get(&url)
            .headers(Self::base_headers(&token)?)
            .send()
            .await?;
        expect_success(resp).await?.json().await.map_err(Into::into)
    }

    /// The raw unified diff for the pull request.
    pub async fn get_pull_request_diff(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        pull_number: u64,
    ) -> Result<String, ReviewError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!("{}/repos/{owner}/{repo}/pulls/{pull_number}", self.api_url);
        let mut headers = Self::base_headers(&token)?;
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github.v3.diff"));
        let resp = self
            .http
            .get(&url)
            .headers(headers)
            .timeout(DIFF_TIMEOUT)
            .send()
            .await?;
        expect_success(resp).await?.text().await.map_err(Into::into)
    }

    pub async fn get_pull_request_files(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        pull_number: u64,
    ) -> Result<Vec<PrFile>, ReviewError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!(
            "{}/repos/{owner}/{repo}/pulls/{pull_number}/files?per_page=100",
            self.api_url
        );
        let resp = self
            .http
            .get(&url)
            .headers(Self::base_headers(&token)?)
            .send()
            .await?;
        expect_success(resp).await?.json().await.map_err(Into::into)
    }

    /// File content at a ref, decoded from the contents API's base64.
    pub async fn get_file_content(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<String, ReviewError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!(
            "{}/repos/{owner}/{repo}/contents/{path}?ref={git_ref}",
            self.api_url
        );
        let resp = self
            .http
            .get(&url)
            .headers(Self::base_headers(&token)?)
            .send()
            .await?;
        let file: FileContent = expect_success(resp).await?.json().await?;
        if file.encoding != "base64" {
            return Err(ReviewError::Validation(format!(
                "unexpected content encoding {:?} for {path}",
                file.encoding
            )));
        }
        // The API inserts newlines into the base64 stream.
        let compact: String = file.content.split_whitespace().collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| ReviewError::Validation(format!("bad base64 for {path}: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| ReviewError::Validation(format!("{path} is not UTF-8: {e}")))
    }

    /// Byte counts per language as reported by GitHub.
    pub async fn get_repository_languages(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
    ) -> Result<HashMap<String, i64>, ReviewError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!("{}/repos/{owner}/{repo}/languages", self.api_url);
        let resp = self
            .http
            .get(&url)
            .headers(Self::base_headers(&token)?)
            .send()
            .await?;
        expect_success(resp).await?.json().await.map_err(Into::into)
    }

    pub async fn get_commit_details(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CommitDetails, ReviewError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!("{}/repos/{owner}/{repo}/commits/{sha}", self.api_url);
        let resp = self
            .http
            .get(&url)
            .headers(Self::base_headers(&token)?)
            .send()
            .await?;
        expect_success(resp).await?.json().await.map_err(Into::into)
    }

    // ─── Writes ───────────────────────────────────────────────────────────────

    /// Post a review: a body plus inline comments anchored to diff lines.
    pub async fn post_review(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        pull_number: u64,
        commit_id: &str,
        body: &str,
        comments: Vec<ReviewRequestComment>,
    ) -> Result<PostedReview, ReviewError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!(
            "{}/repos/{owner}/{repo}/pulls/{pull_number}/reviews",
            self.api_url
        );
        let request = ReviewRequest {
            commit_id: commit_id.to_string(),
            body: body.to_string(),
            event: "COMMENT".to_string(),
            comments,
        };
        let resp = self
            .http
            .post(&url)
            .headers(Self::base_headers(&token)?)
            .json(&request)
            .send()
            .await?;
        expect_success(resp).await?.json().await.map_err(Into::into)
    }

    /// Post a single inline comment outside a review. Used as a fallback when
    /// a grouped review is rejected (stale anchors after a force push).
    pub async fn post_inline_comment(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        pull_number: u64,
        commit_id: &str,
        path: &str,
        line: u32,
        body: &str,
    ) -> Result<i64, ReviewError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!(
            "{}/repos/{owner}/{repo}/pulls/{pull_number}/comments",
            self.api_url
        );
        let resp = self
            .http
            .post(&url)
            .headers(Self::base_headers(&token)?)
            .json(&serde_json::json!({
                "body": body,
                "commit_id": commit_id,
                "path": path,
                "line": line,
                "side": "RIGHT",
            }))
            .send()
            .await?;
        let posted: serde_json::Value = expect_success(resp).await?.json().await?;
        posted["id"]
            .as_i64()
            .ok_or_else(|| ReviewError::Validation("comment response missing id".into()))
    }

    pub async fn create_check_run(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        head_sha: &str,
        conclusion: &str,
        title: &str,
        summary: &str,
    ) -> Result<CheckRun, ReviewError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!("{}/repos/{owner}/{repo}/check-runs", self.api_url);
        let request = CheckRunRequest {
            name: "AI Code Review".to_string(),
            head_sha: head_sha.to_string(),
            status: "completed".to_string(),
            conclusion: Some(conclusion.to_string()),
            output: CheckRunOutput {
                title: title.to_string(),
                summary: summary.to_string(),
            },
        };
        let resp = self
            .http
            .post(&url)
            .headers(Self::base_headers(&token)?)
            .json(&request)
            .send()
            .await?;
        expect_success(resp).await?.json().await.map_err(Into::into)
    }

    pub async fn update_check_run(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        check_run_id: i64,
        conclusion: &str,
        title: &str,
        summary: &str,
    ) -> Result<(), ReviewError> {
        let token = self.installation_token(installation_id).await?;
        let url = format!(
            "{}/repos/{owner}/{repo}/check-runs/{check_run_id}",
            self.api_url
        );
        let resp = self
            .http
            .patch(&url)
            .headers(Self::base_headers(&token)?)
            .json(&serde_json::json!({
                "status": "completed",
                "conclusion": conclusion,
                "output": {"title": title, "summary": summary},
            }))
            .send()
            .await?;
        expect_success(resp).await?;
        Ok(())
    }
}

/// Map the check-run conclusion from the review's risk level.
pub fn check_conclusion(risk: &str) -> &'static str {
    match risk {
        "High" => "failure",
        "Medium" => "neutral",
        _ => "success",
    }
}

async fn expect_success(resp: reqwest::Response) -> Result<reqwest::Response, ReviewError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(api_error(resp).await)
    }
}

async fn api_error(resp: reqwest::Response) -> ReviewError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let truncated: String = body.chars().take(500).collect();
    if truncated.len() < body.len() {
        warn!(status, "GitHub error body truncated for logging");
    }
    ReviewError::GitHubApi {
        status,
        body: truncated,
    }
}
