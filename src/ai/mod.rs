// SPDX-License-Identifier: MIT
//! AI review generation against the Gemini API.
//!
//! Model choice is a pure function of PR complexity so it can be tested
//! without network access. The prompt embeds language/framework context, the
//! static-analysis rollup, and the raw diff; the response must satisfy the
//! [`schema::AiReview`] contract or the attempt fails.

pub mod schema;

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::ReviewError;
use schema::AiReview;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const TEMPERATURE: f64 = 0.1;
const MAX_OUTPUT_TOKENS: u32 = 4096;

/// Thresholds above which the full-capability model is used.
const PRO_DIFF_SIZE: usize = 10_000;
const PRO_FILE_COUNT: usize = 10;
const PRO_ANALYSIS_LEN: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Pro,
    Flash,
}

/// Pick the model tier from PR complexity.
pub fn select_model(diff_size: usize, file_count: usize, analysis_len: usize) -> ModelTier {
    if diff_size > PRO_DIFF_SIZE || file_count > PRO_FILE_COUNT || analysis_len > PRO_ANALYSIS_LEN {
        ModelTier::Pro
    } else {
        ModelTier::Flash
    }
}

/// Primary language (from GitHub byte counts) and a framework guess from
/// marker files in the changed set.
pub fn detect_language_and_framework(
    file_paths: &[String],
    languages: &HashMap<String, i64>,
) -> (String, String) {
    let primary = languages
        .iter()
        .max_by_key(|(_, bytes)| **bytes)
        .map(|(name, _)| name.to_lowercase())
        .unwrap_or_else(|| "unknown".to_string());

    let has = |needle: &str| file_paths.iter().any(|p| p.contains(needle));

    let framework = if has("package.json") {
        if has("next.config") {
            "Next.js"
        } else if has("angular.json") {
            "Angular"
        } else if has("src/components") {
            "React"
        } else {
            "Node.js"
        }
    } else if has("requirements.txt") {
        if has("django") {
            "Django"
        } else if has("flask") {
            "Flask"
        } else if has("fastapi") {
            "FastAPI"
        } else {
            "Python"
        }
    } else if has("pom.xml") {
        "Maven"
    } else if has("build.gradle") {
        "Gradle"
    } else {
        "unknown"
    };

    (primary, framework.to_string())
}

/// Inputs gathered by the orchestrator for one review generation.
pub struct ReviewInput<'a> {
    pub file_paths: &'a [String],
    pub languages: &'a HashMap<String, i64>,
    pub analysis_summary: &'a str,
    pub diff: &'a str,
    pub focus_area: Option<&'a str>,
}

pub struct AiReviewer {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model_pro: String,
    model_flash: String,
}

impl AiReviewer {
    pub fn new(config: &AppConfig) -> Result<Self, ReviewError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ReviewError::ExternalService(format!("http client init: {e}")))?;
        Ok(Self {
            http,
            api_url: config.gemini_api_url.trim_end_matches('/').to_string(),
            api_key: config.gemini_api_key.clone(),
            model_pro: config.gemini_model_pro.clone(),
            model_flash: config.gemini_model_flash.clone(),
        })
    }

    pub fn model_name(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Pro => &self.model_pro,
            ModelTier::Flash => &self.model_flash,
        }
    }

    /// Generate and validate a review. One generation, one validation; the
    /// task-level retry loop owns any second chances.
    pub async fn generate_review(&self, input: &ReviewInput<'_>) -> Result<(AiReview, String), ReviewError> {
        let tier = select_model(
            input.diff.len(),
            input.file_paths.len(),
            input.analysis_summary.len(),
        );
        let model = self.model_name(tier).to_string();
        let prompt = build_prompt(input);

        info!(
            model,
            files = input.file_paths.len(),
            diff_bytes = input.diff.len(),
            "requesting AI review"
        );

        let text = self.generate(&model, &prompt, TEMPERATURE, MAX_OUTPUT_TOKENS).await?;
        let review = schema::parse_review(&text)?;

        info!(
            model,
            comments = review.inline_comments.len(),
            risk = review.risk.as_str(),
            recommendation = review.approval_recommendation.as_str(),
            "AI review validated"
        );
        Ok((review, model))
    }

    /// Cheap liveness probe against the flash model.
    pub async fn test_connection(&self) -> bool {
        let model = self.model_flash.clone();
        match self.generate(&model, "Respond with 'OK'.", 0.0, 10).await {
            Ok(text) => !text.trim().is_empty(),
            Err(e) => {
                warn!(err = %e, "Gemini connection test failed");
                false
            }
        }
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, ReviewError> {
        let url = format!("{}/models/{model}:generateContent", self.api_url);
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_tokens,
                "topP": 0.8,
                "topK": 40,
            },
        });

        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(500).collect();
            return Err(ReviewError::ExternalService(format!(
                "Gemini API error (status {status}): {truncated}"
            )));
        }

        let parsed: GenerateContentResponse = resp.json().await?;
        parsed
            .first_text()
            .ok_or_else(|| ReviewError::AiValidation("empty response from model".into()))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .find_map(|p| p.text)
            .filter(|t| !t.trim().is_empty())
    }
}

fn build_prompt(input: &ReviewInput<'_>) -> String {
    let (language, framework) = detect_language_and_framework(input.file_paths, input.languages);
    let lines_added = input.diff.lines().filter(|l| l.starts_with('+') && !l.starts_with("+++")).count();
    let lines_removed = input.diff.lines().filter(|l| l.starts_with('-') && !l.starts_with("---")).count();
    let focus = input
        .focus_area
        .map(|f| format!("\n## Reviewer Focus\nPay particular attention to: {f}\n"))
        .unwrap_or_default();

    format!(
        r#"You are a senior code reviewer with expertise in multiple programming languages and frameworks. Review the code changes in this pull request and provide actionable feedback.

- Be precise, concise, and constructive.
- Focus on critical issues: bugs, security vulnerabilities, performance problems, and architectural concerns.
- Avoid style nitpicks unless they violate established coding standards.
- Suggest specific fixes when possible.

Severity guide: "high" for security vulnerabilities, crash/corruption bugs, and undocumented breaking changes; "medium" for unhandled edge cases, maintainability problems, and missing tests for complex logic; "low" for minor inconsistencies and documentation gaps; "nit" for cosmetic preferences.

You must respond with valid JSON matching this exact schema, and nothing else:

{{
  "inline_comments": [
    {{
      "path": "src/file.js",
      "start_line": 42,
      "end_line": 42,
      "severity": "high|medium|low|nit",
      "category": "security|performance|bug|style|architecture|testing",
      "comment": "Precise, actionable feedback."
    }}
  ],
  "summary": "Overall assessment of the PR.",
  "tests_to_add": ["Specific tests that should be added"],
  "risk": "Low|Medium|High",
  "breaking_changes": false,
  "approval_recommendation": "approve|request_changes|comment"
}}

## Context
- Language: {language}
- Framework: {framework}
- File changes: {file_count} files modified
- Lines changed: {lines_added} added, {lines_removed} removed
{focus}
## Static Analysis Results
{analysis}

## Code Changes
{diff}
"#,
        file_count = input.file_paths.len(),
        analysis = input.analysis_summary,
        diff = input.diff,
    )
}
