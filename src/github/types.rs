//! Wire types for the GitHub REST API, limited to the fields the pipeline
//! reads. Unknown fields are ignored by serde.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
    #[serde(default)]
    pub changed_files: i64,
    pub head: GitRef,
    pub base: GitRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: RepositoryOwner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryOwner {
    pub login: String,
}

/// One entry from `GET /pulls/{n}/files`.
#[derive(Debug, Clone, Deserialize)]
pub struct PrFile {
    pub filename: String,
    /// "added" | "modified" | "removed" | "renamed".
    pub status: String,
    pub additions: i64,
    pub deletions: i64,
    pub changes: i64,
    /// Unified diff hunk for this file; absent for binary files.
    pub patch: Option<String>,
}

/// `GET /contents/{path}` response; `content` is base64 with embedded newlines.
#[derive(Debug, Deserialize)]
pub struct FileContent {
    pub content: String,
    pub encoding: String,
}

/// `GET /repos/{owner}/{repo}/installation` response, used to resolve an
/// installation when a manual trigger carries no installation id.
#[derive(Debug, Deserialize)]
pub struct InstallationInfo {
    pub id: i64,
}

/// `POST /app/installations/{id}/access_tokens` response.
#[derive(Debug, Deserialize)]
pub struct InstallationTokenResponse {
    pub token: String,
    /// RFC 3339 expiry, roughly one hour out.
    pub expires_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CommitDetails {
    pub sha: String,
    pub commit: CommitInner,
}

#[derive(Debug, Deserialize)]
pub struct CommitInner {
    pub message: String,
}

// ─── Request bodies ───────────────────────────────────────────────────────────

/// `POST /pulls/{n}/reviews` body: a summary plus grouped inline comments.
#[derive(Debug, Serialize)]
pub struct ReviewRequest {
    pub commit_id: String,
    pub body: String,
    /// "COMMENT" | "REQUEST_CHANGES" | "APPROVE".
    pub event: String,
    pub comments: Vec<ReviewRequestComment>,
}

#[derive(Debug, Serialize)]
pub struct ReviewRequestComment {
    pub path: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
    pub side: &'static str,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct CheckRunRequest {
    pub name: String,
    pub head_sha: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    pub output: CheckRunOutput,
}

#[derive(Debug, Serialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckRun {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct PostedReview {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pr_file_without_patch_parses() {
        let f: PrFile = serde_json::from_str(
            r#"{"filename":"logo.png","status":"added","additions":0,"deletions":0,"changes":0}"#,
        )
        .unwrap();
        assert!(f.patch.is_none());
    }

    #[test]
    fn git_ref_renames_ref_field() {
        let r: GitRef = serde_json::from_str(r#"{"sha":"abc","ref":"main"}"#).unwrap();
        assert_eq!(r.ref_name, "main");
    }
}
