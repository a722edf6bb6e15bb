// SPDX-License-Identifier: MIT
//! TypeScript backend: tsc (types) and eslint (lint).

use async_trait::async_trait;

use crate::analysis::exec::{run_tool, write_temp};
use crate::analysis::javascript::run_eslint;
use crate::analysis::model::{
    AnalysisIssue, FileAnalysis, IssueSeverity, Language, ToolStatus,
};
use crate::analysis::Analyzer;

pub struct TypescriptAnalyzer;

#[async_trait]
impl Analyzer for TypescriptAnalyzer {
    fn language(&self) -> Language {
        Language::Typescript
    }

    async fn analyze(&self, path: &str, content: &str) -> FileAnalysis {
        let mut out = FileAnalysis::new(path, Language::Typescript);
        let temp = match write_temp(content, "ts") {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(path, err = %e, "could not stage file for analysis");
                return out;
            }
        };
        let temp_path = temp.path().to_string_lossy().into_owned();

        run_tsc(&temp_path, &mut out).await;
        run_eslint(&temp_path, &mut out).await;
        out
    }
}

async fn run_tsc(temp_path: &str, out: &mut FileAnalysis) {
    match run_tool("tsc", &["--noEmit", "--strict", temp_path]).await {
        Err(_) => {
            out.tool_status.insert("tsc".into(), ToolStatus::Error);
        }
        Ok(result) => {
            out.tool_status.insert("tsc".into(), ToolStatus::Success);
            if !result.succeeded() {
                // tsc reports diagnostics on stdout; older setups use stderr.
                out.issues.extend(parse_tsc_output(&result.stdout));
                out.issues.extend(parse_tsc_output(&result.stderr));
            }
        }
    }
}

/// Parse `file(line,col): error TSxxxx: message` (or colon-separated) lines.
fn parse_tsc_output(text: &str) -> Vec<AnalysisIssue> {
    let mut issues = Vec::new();
    for line in text.lines() {
        if !line.contains("error TS") {
            continue;
        }
        let (location, message) = match line.split_once(": error TS") {
            Some((loc, rest)) => {
                let message = rest.split_once(':').map(|(_, m)| m.trim()).unwrap_or(rest);
                (loc, message.to_string())
            }
            None => continue,
        };
        let line_number = location
            .rsplit_once('(')
            .and_then(|(_, coords)| coords.split(',').next())
            .and_then(|n| n.trim().parse().ok());
        issues.push(AnalysisIssue {
            tool: "tsc".into(),
            severity: IssueSeverity::Medium,
            message,
            line: line_number,
            code: Some("type-check".into()),
        });
    }
    issues
}
