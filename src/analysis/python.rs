// SPDX-License-Identifier: MIT
//! Python backend: ruff (lint), black (format), bandit (security), mypy (types).

use async_trait::async_trait;

use crate::analysis::exec::{run_tool, write_temp};
use crate::analysis::model::{
    AnalysisIssue, FileAnalysis, IssueSeverity, Language, ToolStatus,
};
use crate::analysis::Analyzer;

pub struct PythonAnalyzer;

#[async_trait]
impl Analyzer for PythonAnalyzer {
    fn language(&self) -> Language {
        Language::Python
    }

    async fn analyze(&self, path: &str, content: &str) -> FileAnalysis {
        let mut out = FileAnalysis::new(path, Language::Python);
        let temp = match write_temp(content, "py") {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(path, err = %e, "could not stage file for analysis");
                return out;
            }
        };
        let temp_path = temp.path().to_string_lossy().into_owned();

        run_ruff(&temp_path, &mut out).await;
        run_black(&temp_path, &mut out).await;
        run_bandit(&temp_path, &mut out).await;
        run_mypy(&temp_path, &mut out).await;
        out
    }
}

async fn run_ruff(temp_path: &str, out: &mut FileAnalysis) {
    match run_tool("ruff", &["check", temp_path, "--output-format=json"]).await {
        Err(_) => {
            out.tool_status.insert("ruff".into(), ToolStatus::Error);
        }
        Ok(result) if result.succeeded() => {
            out.tool_status.insert("ruff".into(), ToolStatus::Success);
        }
        Ok(result) => {
            match serde_json::from_str::<serde_json::Value>(&result.stdout) {
                Ok(serde_json::Value::Array(findings)) => {
                    out.tool_status.insert("ruff".into(), ToolStatus::Success);
                    for finding in findings {
                        let code = finding["code"].as_str().unwrap_or_default();
                        // Pycodestyle "E" rules are real errors; the rest is style.
                        let severity = if code.starts_with('E') {
                            IssueSeverity::Medium
                        } else {
                            IssueSeverity::Low
                        };
                        out.issues.push(AnalysisIssue {
                            tool: "ruff".into(),
                            severity,
                            message: finding["message"].as_str().unwrap_or_default().to_string(),
                            line: finding["location"]["row"].as_u64().map(|l| l as u32),
                            code: Some(code.to_string()),
                        });
                    }
                }
                _ => {
                    out.tool_status.insert("ruff".into(), ToolStatus::Error);
                }
            }
        }
    }
}

async fn run_black(temp_path: &str, out: &mut FileAnalysis) {
    match run_tool("black", &["--check", "--diff", temp_path]).await {
        Err(_) => {
            out.tool_status.insert("black".into(), ToolStatus::Error);
        }
        Ok(result) => {
            out.tool_status.insert("black".into(), ToolStatus::Success);
            if !result.succeeded() {
                out.issues.push(AnalysisIssue {
                    tool: "black".into(),
                    severity: IssueSeverity::Low,
                    message: "Code formatting issues detected".into(),
                    line: None,
                    code: Some("formatting".into()),
                });
            }
        }
    }
}

async fn run_bandit(temp_path: &str, out: &mut FileAnalysis) {
    match run_tool("bandit", &["-f", "json", temp_path]).await {
        Err(_) => {
            out.tool_status.insert("bandit".into(), ToolStatus::Error);
        }
        Ok(result) if result.succeeded() => {
            out.tool_status.insert("bandit".into(), ToolStatus::Success);
        }
        Ok(result) => match serde_json::from_str::<serde_json::Value>(&result.stdout) {
            Ok(report) => {
                out.tool_status.insert("bandit".into(), ToolStatus::Success);
                for finding in report["results"].as_array().into_iter().flatten() {
                    let severity = if finding["issue_severity"].as_str() == Some("HIGH") {
                        IssueSeverity::High
                    } else {
                        IssueSeverity::Medium
                    };
                    out.issues.push(AnalysisIssue {
                        tool: "bandit".into(),
                        severity,
                        message: finding["issue_text"].as_str().unwrap_or_default().to_string(),
                        line: finding["line_number"].as_u64().map(|l| l as u32),
                        code: finding["test_id"].as_str().map(String::from),
                    });
                }
            }
            Err(_) => {
                out.tool_status.insert("bandit".into(), ToolStatus::Error);
            }
        },
    }
}

async fn run_mypy(temp_path: &str, out: &mut FileAnalysis) {
    match run_tool("mypy", &["--show-error-codes", "--no-error-summary", temp_path]).await {
        Err(_) => {
            out.tool_status.insert("mypy".into(), ToolStatus::Error);
        }
        Ok(result) => {
            out.tool_status.insert("mypy".into(), ToolStatus::Success);
            if !result.succeeded() {
                out.issues.extend(parse_mypy_output(&result.stdout));
            }
        }
    }
}

/// Parse mypy's `file:line: error: message` lines.
fn parse_mypy_output(stdout: &str) -> Vec<AnalysisIssue> {
    let mut issues = Vec::new();
    for line in stdout.lines() {
        if !line.contains("error:") {
            continue;
        }
        let parts: Vec<&str> = line.splitn(4, ':').collect();
        if parts.len() < 4 {
            continue;
        }
        issues.push(AnalysisIssue {
            tool: "mypy".into(),
            severity: IssueSeverity::Medium,
            message: parts[3].trim().to_string(),
            line: parts[1].trim().parse().ok(),
            code: Some("type-check".into()),
        });
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mypy_lines_parse_into_issues() {
        let stdout = "\
app.py:12: error: Incompatible return value type (got \"str\", expected \"int\")
app.py:30: note: See documentation
app.py:45: error: Name \"foo\" is not defined";
        let issues = parse_mypy_output(stdout);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].line, Some(12));
        assert!(issues[0].message.starts_with("Incompatible return value"));
        assert_eq!(issues[1].line, Some(45));
        assert!(issues.iter().all(|i| i.severity == IssueSeverity::Medium));
    }

    #[test]
    fn mypy_parser_ignores_malformed_lines() {
        assert!(parse_mypy_output("error: no location info").is_empty());
        assert!(parse_mypy_output("").is_empty());
    }

    #[tokio::test]
    async fn missing_tools_degrade_to_per_tool_errors() {
        // In an environment without the Python toolchain the backend must
        // still return a FileAnalysis, with every tool marked errored.
        let analyzer = PythonAnalyzer;
        let result = analyzer.analyze("app.py", "import os\n").await;
        assert_eq!(result.language, Language::Python);
        for tool in ["ruff", "black", "bandit", "mypy"] {
            assert!(result.tool_status.contains_key(tool), "{tool} missing");
        }
    }
}
