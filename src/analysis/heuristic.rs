// SPDX-License-Identifier: MIT
//! Content-heuristic analyzers for languages without a wired-up toolchain.
//!
//! Java, Go, and Rust get a handful of substring checks instead of real
//! tools. Shallow on purpose: these findings only season the AI prompt.

use async_trait::async_trait;

use crate::analysis::model::{
    AnalysisIssue, FileAnalysis, IssueSeverity, Language, ToolStatus,
};
use crate::analysis::Analyzer;

/// One substring-based rule.
struct Heuristic {
    /// Fires when `pattern` is absent (`true`) or present (`false`).
    fire_on_absence: bool,
    patterns: &'static [&'static str],
    severity: IssueSeverity,
    message: &'static str,
    code: &'static str,
}

pub struct HeuristicAnalyzer {
    language: Language,
    tool_name: &'static str,
    rules: Vec<Heuristic>,
}

impl HeuristicAnalyzer {
    pub fn java() -> Self {
        Self {
            language: Language::Java,
            tool_name: "java-syntax",
            rules: vec![
                Heuristic {
                    fire_on_absence: true,
                    patterns: &["public class", "public interface"],
                    severity: IssueSeverity::Medium,
                    message: "No public class or interface found",
                    code: "syntax",
                },
                Heuristic {
                    fire_on_absence: false,
                    patterns: &["System.out.println"],
                    severity: IssueSeverity::Low,
                    message: "Consider using a proper logging framework instead of System.out.println",
                    code: "style",
                },
            ],
        }
    }

    pub fn go() -> Self {
        Self {
            language: Language::Go,
            tool_name: "go-syntax",
            rules: vec![Heuristic {
                fire_on_absence: true,
                patterns: &["package "],
                severity: IssueSeverity::High,
                message: "Missing package declaration",
                code: "syntax",
            }],
        }
    }

    pub fn rust() -> Self {
        Self {
            language: Language::Rust,
            tool_name: "rust-syntax",
            rules: vec![Heuristic {
                fire_on_absence: true,
                patterns: &["fn main", "pub fn"],
                severity: IssueSeverity::Low,
                message: "No main function or public function found",
                code: "syntax",
            }],
        }
    }
}

#[async_trait]
impl Analyzer for HeuristicAnalyzer {
    fn language(&self) -> Language {
        self.language
    }

    async fn analyze(&self, path: &str, content: &str) -> FileAnalysis {
        let mut out = FileAnalysis::new(path, self.language);
        for rule in &self.rules {
            let any_present = rule.patterns.iter().any(|p| content.contains(p));
            let fires = if rule.fire_on_absence {
                !any_present
            } else {
                any_present
            };
            if fires {
                out.issues.push(AnalysisIssue {
                    tool: self.tool_name.to_string(),
                    severity: rule.severity,
                    message: rule.message.to_string(),
                    line: None,
                    code: Some(rule.code.to_string()),
                });
            }
        }
        out.tool_status
            .insert(self.tool_name.to_string(), ToolStatus::Success);
        out
    }
}
