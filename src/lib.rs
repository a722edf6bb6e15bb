// SPDX-License-Identifier: MIT
//! revd — AI code review daemon for GitHub pull requests.
//!
//! Pipeline: signed webhook → job queue → fetch PR diff and files → static
//! analysis fan-out → Gemini review with schema validation → persist session
//! and comments → post review comments and a check run back to GitHub.

pub mod ai;
pub mod analysis;
pub mod config;
pub mod error;
pub mod github;
pub mod retry;
pub mod review;
pub mod server;
pub mod storage;
pub mod webhook;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::github::GitHubClient;
use crate::review::worker::ReviewQueue;
use crate::storage::Storage;

/// Shared state handed to every HTTP handler.
pub struct AppContext {
    pub config: AppConfig,
    pub storage: Storage,
    pub github: Arc<GitHubClient>,
    pub queue: ReviewQueue,
}
