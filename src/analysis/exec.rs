// SPDX-License-Identifier: MIT
//! Bounded-time subprocess execution for analyzer tools.
//!
//! Each backend writes the file under review to a private temp file and runs
//! its tools against that copy. Spawn failures (missing binary) and timeouts
//! surface as [`ReviewError::ToolUnavailable`] so the aggregator can record a
//! per-tool error without failing the file.

use std::io::Write;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ReviewError;

/// Maximum captured output size (64 KiB). Prevents OOM from runaway tool output.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Per-tool execution timeout.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured result of one tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Write `content` to a temp file with the given extension so tools that
/// sniff file types behave normally. The file is deleted on drop.
pub fn write_temp(content: &str, extension: &str) -> Result<NamedTempFile, ReviewError> {
    let mut file = tempfile::Builder::new()
        .prefix("revd-")
        .suffix(&format!(".{extension}"))
        .tempfile()
        .map_err(|e| ReviewError::ToolUnavailable(format!("temp file: {e}")))?;
    file.write_all(content.as_bytes())
        .map_err(|e| ReviewError::ToolUnavailable(format!("temp file write: {e}")))?;
    file.flush()
        .map_err(|e| ReviewError::ToolUnavailable(format!("temp file flush: {e}")))?;
    Ok(file)
}

/// Run `program args...` with [`TOOL_TIMEOUT`], capturing stdout and stderr.
///
/// Lint tools conventionally exit non-zero when they find issues, so a
/// non-zero exit is NOT an error here; callers decide what the exit code
/// means for their tool.
pub async fn run_tool(program: &str, args: &[&str]) -> Result<ToolOutput, ReviewError> {
    debug!(tool = program, "running analyzer tool");
    let start = Instant::now();

    let run = tokio::time::timeout(TOOL_TIMEOUT, async {
        Command::new(program).args(args).kill_on_drop(true).output().await
    })
    .await;

    let output = match run {
        Ok(Ok(o)) => o,
        Ok(Err(e)) => {
            warn!(tool = program, err = %e, "tool spawn failed");
            return Err(ReviewError::ToolUnavailable(format!("{program}: {e}")));
        }
        Err(_) => {
            warn!(tool = program, timeout_s = TOOL_TIMEOUT.as_secs(), "tool timed out");
            return Err(ReviewError::ToolUnavailable(format!(
                "{program}: timed out after {}s",
                TOOL_TIMEOUT.as_secs()
            )));
        }
    };

    debug!(
        tool = program,
        code = ?output.status.code(),
        duration_ms = start.elapsed().as_millis() as u64,
        "tool finished"
    );

    Ok(ToolOutput {
        stdout: truncate_lossy(&output.stdout),
        stderr: truncate_lossy(&output.stderr),
        exit_code: output.status.code(),
    })
}

fn truncate_lossy(bytes: &[u8]) -> String {
    if bytes.len() > MAX_OUTPUT_BYTES {
        warn!(bytes = bytes.len(), "truncating large tool output");
        String::from_utf8_lossy(&bytes[..MAX_OUTPUT_BYTES]).into_owned()
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}
