// SPDX-License-Identifier: MIT
//! SQL backend: sqlfluff.

use async_trait::async_trait;

use crate::analysis::exec::{run_tool, write_temp};
use crate::analysis::model::{
    AnalysisIssue, FileAnalysis, IssueSeverity, Language, ToolStatus,
};
use crate::analysis::Analyzer;

pub struct SqlAnalyzer;

#[async_trait]
impl Analyzer for SqlAnalyzer {
    fn language(&self) -> Language {
        Language::Sql
    }

    async fn analyze(&self, path: &str, content: &str) -> FileAnalysis {
        let mut out = FileAnalysis::new(path, Language::Sql);
        let temp = match write_temp(content, "sql") {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(path, err = %e, "could not stage file for analysis");
                return out;
            }
        };
        let temp_path = temp.path().to_string_lossy().into_owned();

        match run_tool("sqlfluff", &["lint", "--format=json", &temp_path]).await {
            Err(_) => {
                out.tool_status.insert("sqlfluff".into(), ToolStatus::Error);
            }
            Ok(result) if result.succeeded() => {
                out.tool_status.insert("sqlfluff".into(), ToolStatus::Success);
            }
            Ok(result) => match parse_sqlfluff_json(&result.stdout) {
                Some(issues) => {
                    out.tool_status.insert("sqlfluff".into(), ToolStatus::Success);
                    out.issues.extend(issues);
                }
                None => {
                    out.tool_status.insert("sqlfluff".into(), ToolStatus::Error);
                }
            },
        }
        out
    }
}

/// sqlfluff rule codes start with a family letter: E(rror), W(arning), I(nfo).
fn parse_sqlfluff_json(stdout: &str) -> Option<Vec<AnalysisIssue>> {
    let reports: serde_json::Value = serde_json::from_str(stdout).ok()?;
    let reports = reports.as_array()?;
    let mut issues = Vec::new();
    for report in reports {
        for violation in report["violations"].as_array().into_iter().flatten() {
            let code = violation["code"].as_str().unwrap_or("W");
            let severity = match code.chars().next() {
                Some('E') => IssueSeverity::High,
                Some('I') => IssueSeverity::Low,
                _ => IssueSeverity::Medium,
            };
            issues.push(AnalysisIssue {
                tool: "sqlfluff".into(),
                severity,
                message: violation["description"].as_str().unwrap_or_default().to_string(),
                line: violation["line_no"].as_u64().map(|l| l as u32),
                code: Some(code.to_string()),
            });
        }
    }
    Some(issues)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlfluff_json_parses_violations() {
        let stdout = r#"[{
            "filepath": "/tmp/x.sql",
            "violations": [
                {"code": "E101", "description": "Indentation error", "line_no": 2},
                {"code": "W042", "description": "Trailing whitespace", "line_no": 7},
                {"code": "I001", "description": "Informational", "line_no": 9}
            ]
        }]"#;
        let issues = parse_sqlfluff_json(stdout).unwrap();
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].severity, IssueSeverity::High);
        assert_eq!(issues[1].severity, IssueSeverity::Medium);
        assert_eq!(issues[2].severity, IssueSeverity::Low);
        assert_eq!(issues[0].line, Some(2));
    }

    #[test]
    fn malformed_output_returns_none() {
        assert!(parse_sqlfluff_json("Traceback (most recent call last)").is_none());
    }
}
