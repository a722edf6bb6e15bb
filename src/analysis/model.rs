// SPDX-License-Identifier: MIT
//! Data model for static analysis results.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── Language ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Typescript,
    Sql,
    Java,
    Go,
    Rust,
}

impl Language {
    /// Detect the language from a file path's extension. `None` means the
    /// file is skipped by analysis.
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = path.rsplit('.').next()?;
        match ext {
            "py" => Some(Language::Python),
            "js" | "jsx" | "mjs" => Some(Language::Javascript),
            "ts" | "tsx" => Some(Language::Typescript),
            "sql" => Some(Language::Sql),
            "java" => Some(Language::Java),
            "go" => Some(Language::Go),
            "rs" => Some(Language::Rust),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Sql => "sql",
            Language::Java => "java",
            Language::Go => "go",
            Language::Rust => "rust",
        }
    }
}

// ─── Severity ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::High => "high",
            IssueSeverity::Medium => "medium",
            IssueSeverity::Low => "low",
        }
    }
}

// ─── Issues and per-file results ──────────────────────────────────────────────

/// One finding from one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisIssue {
    /// Emitting tool, e.g. "ruff", "eslint", "heuristic".
    pub tool: String,
    pub severity: IssueSeverity,
    pub message: String,
    /// 1-based line in the analyzed file, when the tool reports one.
    pub line: Option<u32>,
    /// Tool-specific rule code, e.g. "E501", "B602".
    pub code: Option<String>,
}

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Ran and produced (possibly zero) findings.
    Success,
    /// Missing binary, timeout, or unusable output. The tool's findings are
    /// absent but the file result stands.
    Error,
}

/// Everything analysis learned about one changed file.
#[derive(Debug, Clone, Serialize)]
pub struct FileAnalysis {
    pub path: String,
    pub language: Language,
    pub issues: Vec<AnalysisIssue>,
    /// Per-tool outcome, keyed by tool name.
    pub tool_status: HashMap<String, ToolStatus>,
}

impl FileAnalysis {
    pub fn new(path: &str, language: Language) -> Self {
        Self {
            path: path.to_string(),
            language,
            issues: Vec::new(),
            tool_status: HashMap::new(),
        }
    }

    pub fn highest_severity(&self) -> Option<IssueSeverity> {
        self.issues.iter().map(|i| i.severity).max()
    }
}

// ─── PR-level rollup ──────────────────────────────────────────────────────────

/// Overall status of the analysis pass, derived from the worst finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Clean,
    Info,
    Warning,
    Critical,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Clean => "clean",
            OverallStatus::Info => "info",
            OverallStatus::Warning => "warning",
            OverallStatus::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub total_files: usize,
    pub files_by_language: HashMap<String, usize>,
    pub total_issues: usize,
    pub high_issues: usize,
    pub medium_issues: usize,
    pub low_issues: usize,
    pub overall_status: OverallStatus,
    pub files: Vec<FileAnalysis>,
}

impl AnalysisSummary {
    /// Roll per-file results up into the PR-level summary.
    pub fn from_files(files: Vec<FileAnalysis>) -> Self {
        let mut by_language: HashMap<String, usize> = HashMap::new();
        let mut high = 0;
        let mut medium = 0;
        let mut low = 0;
        for f in &files {
            *by_language.entry(f.language.as_str().to_string()).or_default() += 1;
            for i in &f.issues {
                match i.severity {
                    IssueSeverity::High => high += 1,
                    IssueSeverity::Medium => medium += 1,
                    IssueSeverity::Low => low += 1,
                }
            }
        }
        let overall_status = if high > 0 {
            OverallStatus::Critical
        } else if medium > 0 {
            OverallStatus::Warning
        } else if low > 0 {
            OverallStatus::Info
        } else {
            OverallStatus::Clean
        };
        Self {
            total_files: files.len(),
            files_by_language: by_language,
            total_issues: high + medium + low,
            high_issues: high,
            medium_issues: medium,
            low_issues: low,
            overall_status,
            files,
        }
    }

    pub fn empty() -> Self {
        Self::from_files(Vec::new())
    }

    /// Compact human-readable form embedded in the AI prompt.
    pub fn render(&self) -> String {
        if self.total_files == 0 {
            return "No static analysis results available.".to_string();
        }
        let mut out = format!(
            "Static analysis: {} file(s), {} issue(s) ({} high, {} medium, {} low), status: {}.\n",
            self.total_files,
            self.total_issues,
            self.high_issues,
            self.medium_issues,
            self.low_issues,
            self.overall_status.as_str()
        );
        for f in &self.files {
            if f.issues.is_empty() {
                continue;
            }
            out.push_str(&format!("\n{} ({}):\n", f.path, f.language.as_str()));
            for i in &f.issues {
                let line = i.line.map(|l| format!(" L{l}")).unwrap_or_default();
                let code = i.code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default();
                out.push_str(&format!(
                    "  - ({}) {}{}{}: {}\n",
                    i.severity.as_str(),
                    i.tool,
                    line,
                    code,
                    i.message
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(severity: IssueSeverity) -> AnalysisIssue {
        AnalysisIssue {
            tool: "test".into(),
            severity,
            message: "m".into(),
            line: Some(1),
            code: None,
        }
    }

    #[test]
    fn language_detection_by_extension() {
        assert_eq!(Language::from_path("src/app.py"), Some(Language::Python));
        assert_eq!(Language::from_path("web/index.tsx"), Some(Language::Typescript));
        assert_eq!(Language::from_path("lib.mjs"), Some(Language::Javascript));
        assert_eq!(Language::from_path("schema.sql"), Some(Language::Sql));
        assert_eq!(Language::from_path("main.go"), Some(Language::Go));
        assert_eq!(Language::from_path("README.md"), None);
        assert_eq!(Language::from_path("Makefile"), None);
    }

    #[test]
    fn severity_orders_high_last() {
        assert!(IssueSeverity::High > IssueSeverity::Medium);
        assert!(IssueSeverity::Medium > IssueSeverity::Low);
    }

    #[test]
    fn rollup_counts_and_status() {
        let mut a = FileAnalysis::new("a.py", Language::Python);
        a.issues.push(issue(IssueSeverity::Medium));
        a.issues.push(issue(IssueSeverity::Low));
        let mut b = FileAnalysis::new("b.py", Language::Python);
        b.issues.push(issue(IssueSeverity::High));

        let summary = AnalysisSummary::from_files(vec![a, b]);
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.total_issues, 3);
        assert_eq!(summary.high_issues, 1);
        assert_eq!(summary.overall_status, OverallStatus::Critical);
        assert_eq!(summary.files_by_language.get("python"), Some(&2));
    }

    #[test]
    fn clean_rollup_without_issues() {
        let summary = AnalysisSummary::from_files(vec![FileAnalysis::new("a.go", Language::Go)]);
        assert_eq!(summary.overall_status, OverallStatus::Clean);
        assert_eq!(summary.total_issues, 0);
    }

    #[test]
    fn empty_summary_renders_placeholder() {
        assert!(AnalysisSummary::empty().render().contains("No static analysis"));
    }
}
