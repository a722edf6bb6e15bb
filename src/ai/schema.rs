// SPDX-License-Identifier: MIT
//! Structured contract for the AI review response.
//!
//! The model must return a JSON object matching [`AiReview`] exactly.
//! Validation fails closed: any missing field, out-of-set enum value, or
//! nonsensical line range rejects the whole response, and the caller decides
//! whether to retry with a fresh generation.

use serde::{Deserialize, Serialize};

use crate::error::ReviewError;

// ─── Enums ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentSeverity {
    High,
    Medium,
    Low,
    Nit,
}

impl CommentSeverity {
    /// Rank used for capping; higher sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            CommentSeverity::High => 4,
            CommentSeverity::Medium => 3,
            CommentSeverity::Low => 2,
            CommentSeverity::Nit => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommentSeverity::High => "high",
            CommentSeverity::Medium => "medium",
            CommentSeverity::Low => "low",
            CommentSeverity::Nit => "nit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentCategory {
    Security,
    Performance,
    Bug,
    Style,
    Architecture,
    Testing,
}

impl CommentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentCategory::Security => "security",
            CommentCategory::Performance => "performance",
            CommentCategory::Bug => "bug",
            CommentCategory::Style => "style",
            CommentCategory::Architecture => "architecture",
            CommentCategory::Testing => "testing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRecommendation {
    Approve,
    RequestChanges,
    Comment,
}

impl ApprovalRecommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalRecommendation::Approve => "approve",
            ApprovalRecommendation::RequestChanges => "request_changes",
            ApprovalRecommendation::Comment => "comment",
        }
    }
}

// ─── Review payload ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineComment {
    pub path: String,
    /// 1-based, inclusive.
    pub start_line: u32,
    pub end_line: u32,
    pub severity: CommentSeverity,
    pub category: CommentCategory,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiReview {
    pub inline_comments: Vec<InlineComment>,
    pub summary: String,
    #[serde(default)]
    pub tests_to_add: Vec<String>,
    pub risk: RiskLevel,
    pub breaking_changes: bool,
    pub approval_recommendation: ApprovalRecommendation,
}

/// Strip a surrounding Markdown code fence, with or without a `json` tag.
/// Models routinely wrap their output even when told not to.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse and validate a raw model response.
pub fn parse_review(raw: &str) -> Result<AiReview, ReviewError> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(ReviewError::AiValidation("empty response from model".into()));
    }
    let review: AiReview = serde_json::from_str(body)
        .map_err(|e| ReviewError::AiValidation(format!("response schema violation: {e}")))?;

    for (i, c) in review.inline_comments.iter().enumerate() {
        if c.start_line == 0 || c.end_line < c.start_line {
            return Err(ReviewError::AiValidation(format!(
                "comment {i} has invalid line range {}..{}",
                c.start_line, c.end_line
            )));
        }
        if c.path.is_empty() {
            return Err(ReviewError::AiValidation(format!("comment {i} has empty path")));
        }
    }
    Ok(review)
}

/// Cap inline comments at `max`, keeping the most severe ones.
///
/// The sort is stable so equally severe comments keep their original order.
/// When a truncation happens the summary gains a note; calling this again on
/// an already-capped review is a no-op.
pub fn cap_comments(review: &mut AiReview, max: usize) {
    if review.inline_comments.len() <= max {
        return;
    }
    review
        .inline_comments
        .sort_by(|a, b| b.severity.rank().cmp(&a.severity.rank()));
    review.inline_comments.truncate(max);
    review
        .summary
        .push_str(&format!("\n\n*Note: Limited to {max} most important comments.*"));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_json() -> String {
        r#"{
            "inline_comments": [
                {"path": "src/a.py", "start_line": 3, "end_line": 4,
                 "severity": "high", "category": "security",
                 "comment": "SQL built by string concatenation."}
            ],
            "summary": "One serious issue.",
            "tests_to_add": ["injection regression test"],
            "risk": "High",
            "breaking_changes": false,
            "approval_recommendation": "request_changes"
        }"#
        .to_string()
    }

    fn comment(severity: CommentSeverity, tag: &str) -> InlineComment {
        InlineComment {
            path: format!("src/{tag}.rs"),
            start_line: 1,
            end_line: 1,
            severity,
            category: CommentCategory::Bug,
            comment: tag.to_string(),
        }
    }

    #[test]
    fn valid_response_round_trips() {
        let review = parse_review(&valid_json()).unwrap();
        assert_eq!(review.risk, RiskLevel::High);
        assert_eq!(review.inline_comments.len(), 1);
        assert_eq!(
            review.approval_recommendation,
            ApprovalRecommendation::RequestChanges
        );

        let reserialized = serde_json::to_string(&review).unwrap();
        let again = parse_review(&reserialized).unwrap();
        assert_eq!(again.summary, review.summary);
        assert_eq!(again.inline_comments[0].severity, CommentSeverity::High);
    }

    #[test]
    fn fenced_response_parses() {
        let raw = format!("```json\n{}\n```", valid_json());
        assert!(parse_review(&raw).is_ok());
        let raw = format!("```\n{}\n```", valid_json());
        assert!(parse_review(&raw).is_ok());
    }

    #[test]
    fn missing_field_fails_closed() {
        let raw = valid_json().replace(r#""risk": "High","#, "");
        let err = parse_review(&raw).unwrap_err();
        assert!(matches!(err, ReviewError::AiValidation(_)));
    }

    #[test]
    fn out_of_set_enum_fails_closed() {
        let raw = valid_json().replace(r#""severity": "high""#, r#""severity": "catastrophic""#);
        assert!(parse_review(&raw).is_err());
        let raw = valid_json().replace(r#""risk": "High""#, r#""risk": "extreme""#);
        assert!(parse_review(&raw).is_err());
        let raw = valid_json().replace("request_changes", "block");
        assert!(parse_review(&raw).is_err());
    }

    #[test]
    fn inverted_line_range_fails_closed() {
        let raw = valid_json().replace(r#""end_line": 4"#, r#""end_line": 2"#);
        let err = parse_review(&raw).unwrap_err();
        assert!(matches!(err, ReviewError::AiValidation(_)));
    }

    #[test]
    fn empty_and_garbage_responses_fail() {
        assert!(parse_review("").is_err());
        assert!(parse_review("```json\n```").is_err());
        assert!(parse_review("I could not review this PR, sorry!").is_err());
    }

    #[test]
    fn tests_to_add_is_optional() {
        let raw = valid_json().replace(r#""tests_to_add": ["injection regression test"],"#, "");
        let review = parse_review(&raw).unwrap();
        assert!(review.tests_to_add.is_empty());
    }

    #[test]
    fn capping_keeps_most_severe_and_is_stable() {
        let mut review = parse_review(&valid_json()).unwrap();
        review.inline_comments = vec![
            comment(CommentSeverity::Nit, "n1"),
            comment(CommentSeverity::High, "h1"),
            comment(CommentSeverity::Medium, "m1"),
            comment(CommentSeverity::High, "h2"),
            comment(CommentSeverity::Low, "l1"),
        ];
        cap_comments(&mut review, 3);

        let tags: Vec<&str> = review
            .inline_comments
            .iter()
            .map(|c| c.comment.as_str())
            .collect();
        // Both highs (original order preserved), then the medium.
        assert_eq!(tags, vec!["h1", "h2", "m1"]);
        assert!(review.summary.contains("Limited to 3"));
    }

    #[test]
    fn capping_is_idempotent() {
        let mut review = parse_review(&valid_json()).unwrap();
        review.inline_comments = (0..25)
            .map(|i| comment(CommentSeverity::Medium, &format!("c{i}")))
            .collect();
        cap_comments(&mut review, 20);
        let after_first = review.summary.clone();
        assert_eq!(review.inline_comments.len(), 20);

        cap_comments(&mut review, 20);
        assert_eq!(review.inline_comments.len(), 20);
        assert_eq!(review.summary, after_first);
    }

    #[test]
    fn under_limit_review_is_untouched() {
        let mut review = parse_review(&valid_json()).unwrap();
        let before = review.summary.clone();
        cap_comments(&mut review, 20);
        assert_eq!(review.summary, before);
        assert_eq!(review.inline_comments.len(), 1);
    }
}
