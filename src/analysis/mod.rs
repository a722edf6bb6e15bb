// SPDX-License-Identifier: MIT
//! Static analysis fan-out.
//!
//! One [`Analyzer`] per language, held behind trait objects in a registry.
//! Files route by extension; unsupported files are skipped with a warning.
//! A backend never fails the pipeline: missing tools, timeouts, and garbage
//! output degrade to per-tool [`ToolStatus::Error`] entries and the run
//! continues with whatever was learned.

pub mod exec;
pub mod heuristic;
pub mod javascript;
pub mod model;
pub mod python;
pub mod sql;
pub mod typescript;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use model::{AnalysisSummary, FileAnalysis, Language};

#[async_trait]
pub trait Analyzer: Send + Sync {
    fn language(&self) -> Language;

    /// Analyze one file. Infallible by contract; tool problems are recorded
    /// in the returned [`FileAnalysis::tool_status`].
    async fn analyze(&self, path: &str, content: &str) -> FileAnalysis;
}

pub struct AnalyzerRegistry {
    analyzers: HashMap<Language, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    /// The default registry with every built-in backend.
    pub fn new() -> Self {
        let mut registry = Self {
            analyzers: HashMap::new(),
        };
        registry.register(Arc::new(python::PythonAnalyzer));
        registry.register(Arc::new(javascript::JavascriptAnalyzer));
        registry.register(Arc::new(typescript::TypescriptAnalyzer));
        registry.register(Arc::new(sql::SqlAnalyzer));
        registry.register(Arc::new(heuristic::HeuristicAnalyzer::java()));
        registry.register(Arc::new(heuristic::HeuristicAnalyzer::go()));
        registry.register(Arc::new(heuristic::HeuristicAnalyzer::rust()));
        registry
    }

    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.insert(analyzer.language(), analyzer);
    }

    pub fn get(&self, language: Language) -> Option<&Arc<dyn Analyzer>> {
        self.analyzers.get(&language)
    }

    /// Analyze every supported file and roll the results up.
    ///
    /// `files` maps changed paths to their head-revision contents. Paths with
    /// no recognized extension or no registered analyzer are skipped.
    pub async fn analyze_files(&self, files: &HashMap<String, String>) -> AnalysisSummary {
        let mut results = Vec::new();
        for (path, content) in files {
            let Some(language) = Language::from_path(path) else {
                debug!(path, "skipping file with unsupported extension");
                continue;
            };
            let Some(analyzer) = self.get(language) else {
                warn!(path, language = language.as_str(), "no analyzer registered");
                continue;
            };
            let analysis = analyzer.analyze(path, content).await;
            debug!(
                path,
                language = language.as_str(),
                issues = analysis.issues.len(),
                "file analyzed"
            );
            results.push(analysis);
        }
        // Deterministic ordering regardless of map iteration.
        results.sort_by(|a, b| a.path.cmp(&b.path));
        AnalysisSummary::from_files(results)
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{AnalysisIssue, IssueSeverity};

    struct FakeAnalyzer {
        language: Language,
        severity: Option<IssueSeverity>,
    }

    #[async_trait]
    impl Analyzer for FakeAnalyzer {
        fn language(&self) -> Language {
            self.language
        }

        async fn analyze(&self, path: &str, _content: &str) -> FileAnalysis {
            let mut out = FileAnalysis::new(path, self.language);
            if let Some(severity) = self.severity {
                out.issues.push(AnalysisIssue {
                    tool: "fake".into(),
                    severity,
                    message: "finding".into(),
                    line: Some(1),
                    code: None,
                });
            }
            out
        }
    }

    #[tokio::test]
    async fn routes_by_extension_and_skips_unknown() {
        let mut registry = AnalyzerRegistry {
            analyzers: HashMap::new(),
        };
        registry.register(Arc::new(FakeAnalyzer {
            language: Language::Python,
            severity: Some(IssueSeverity::Medium),
        }));

        let mut files = HashMap::new();
        files.insert("a.py".to_string(), "x = 1".to_string());
        files.insert("README.md".to_string(), "docs".to_string());
        files.insert("lib.rs".to_string(), "pub fn f() {}".to_string());

        let summary = registry.analyze_files(&files).await;
        // README has no language, lib.rs has no registered analyzer here.
        assert_eq!(summary.total_files, 1);
        assert_eq!(summary.medium_issues, 1);
    }

    #[tokio::test]
    async fn results_are_ordered_by_path() {
        let mut registry = AnalyzerRegistry {
            analyzers: HashMap::new(),
        };
        registry.register(Arc::new(FakeAnalyzer {
            language: Language::Go,
            severity: None,
        }));

        let mut files = HashMap::new();
        for name in ["z.go", "a.go", "m.go"] {
            files.insert(name.to_string(), "package main".to_string());
        }
        let summary = registry.analyze_files(&files).await;
        let paths: Vec<&str> = summary.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.go", "m.go", "z.go"]);
    }

    #[test]
    fn default_registry_covers_all_languages() {
        let registry = AnalyzerRegistry::new();
        for language in [
            Language::Python,
            Language::Javascript,
            Language::Typescript,
            Language::Sql,
            Language::Java,
            Language::Go,
            Language::Rust,
        ] {
            assert!(registry.get(language).is_some(), "{language:?}");
        }
    }
}
