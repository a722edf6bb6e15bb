// SPDX-License-Identifier: MIT
//! JavaScript backend: eslint (lint) and prettier (format).

use async_trait::async_trait;

use crate::analysis::exec::{run_tool, write_temp};
use crate::analysis::model::{
    AnalysisIssue, FileAnalysis, IssueSeverity, Language, ToolStatus,
};
use crate::analysis::Analyzer;

pub struct JavascriptAnalyzer;

#[async_trait]
impl Analyzer for JavascriptAnalyzer {
    fn language(&self) -> Language {
        Language::Javascript
    }

    async fn analyze(&self, path: &str, content: &str) -> FileAnalysis {
        let mut out = FileAnalysis::new(path, Language::Javascript);
        let temp = match write_temp(content, "js") {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(path, err = %e, "could not stage file for analysis");
                return out;
            }
        };
        let temp_path = temp.path().to_string_lossy().into_owned();

        run_eslint(&temp_path, &mut out).await;
        run_prettier(&temp_path, &mut out).await;
        out
    }
}

pub(crate) async fn run_eslint(temp_path: &str, out: &mut FileAnalysis) {
    match run_tool("eslint", &["--format=json", temp_path]).await {
        Err(_) => {
            out.tool_status.insert("eslint".into(), ToolStatus::Error);
        }
        Ok(result) if result.succeeded() => {
            out.tool_status.insert("eslint".into(), ToolStatus::Success);
        }
        Ok(result) => match parse_eslint_json(&result.stdout) {
            Some(issues) => {
                out.tool_status.insert("eslint".into(), ToolStatus::Success);
                out.issues.extend(issues);
            }
            None => {
                out.tool_status.insert("eslint".into(), ToolStatus::Error);
            }
        },
    }
}

async fn run_prettier(temp_path: &str, out: &mut FileAnalysis) {
    match run_tool("prettier", &["--check", temp_path]).await {
        Err(_) => {
            out.tool_status.insert("prettier".into(), ToolStatus::Error);
        }
        Ok(result) => {
            out.tool_status.insert("prettier".into(), ToolStatus::Success);
            if !result.succeeded() {
                out.issues.push(AnalysisIssue {
                    tool: "prettier".into(),
                    severity: IssueSeverity::Low,
                    message: "Code formatting issues detected".into(),
                    line: None,
                    code: Some("formatting".into()),
                });
            }
        }
    }
}

/// Parse eslint's `--format=json` output: an array of per-file reports, each
/// with a `messages` array. eslint severity 1 = warn, 2 = error.
pub(crate) fn parse_eslint_json(stdout: &str) -> Option<Vec<AnalysisIssue>> {
    let reports: serde_json::Value = serde_json::from_str(stdout).ok()?;
    let reports = reports.as_array()?;
    let mut issues = Vec::new();
    for report in reports {
        for message in report["messages"].as_array().into_iter().flatten() {
            let severity = match message["severity"].as_u64() {
                Some(2) => IssueSeverity::Medium,
                Some(n) if n > 2 => IssueSeverity::High,
                _ => IssueSeverity::Low,
            };
            issues.push(AnalysisIssue {
                tool: "eslint".into(),
                severity,
                message: message["message"].as_str().unwrap_or_default().to_string(),
                line: message["line"].as_u64().map(|l| l as u32),
                code: message["ruleId"].as_str().map(String::from),
            });
        }
    }
    Some(issues)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eslint_json_parses_messages() {
        let stdout = r#"[{
            "filePath": "/tmp/x.js",
            "messages": [
                {"ruleId": "no-unused-vars", "severity": 2, "message": "'x' is defined but never used.", "line": 3},
                {"ruleId": "semi", "severity": 1, "message": "Missing semicolon.", "line": 9}
            ]
        }]"#;
        let issues = parse_eslint_json(stdout).unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].severity, IssueSeverity::Medium);
        assert_eq!(issues[0].code.as_deref(), Some("no-unused-vars"));
        assert_eq!(issues[1].severity, IssueSeverity::Low);
        assert_eq!(issues[1].line, Some(9));
    }

    #[test]
    fn malformed_eslint_output_returns_none() {
        assert!(parse_eslint_json("SyntaxError: unexpected token").is_none());
        assert!(parse_eslint_json("{}").is_none());
    }

    #[test]
    fn empty_report_list_yields_no_issues() {
        assert!(parse_eslint_json("[]").unwrap().is_empty());
    }
}
